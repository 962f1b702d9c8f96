//! Message-layer types: fully assembled, immutable conversational turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An assembled message as stored in conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Role-specific payload of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    #[serde(rename = "user_message")]
    User { content: String },

    #[serde(rename = "assistant_message")]
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_sequence: Option<String>,
    },

    #[serde(rename = "tool_call_message")]
    ToolCall { tool_call: ToolCall },

    #[serde(rename = "tool_result_message")]
    ToolResult { tool_result: ToolResult },

    #[serde(rename = "error_message")]
    Error { error: ErrorDescriptor },
}

/// A fully specified tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id shared with the matching [`ToolResult`].
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    /// Set when the streamed input could not be parsed as JSON. `input` then
    /// holds the raw concatenated text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The backend reported a failure or its stream broke.
    Driver,
    /// A pipeline component failed while starting up.
    Reactor,
    /// Anything else raised inside the pipeline.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
}

/// A tool call matched with its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExchange {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: String,
    pub is_error: bool,
    /// Result timestamp minus call timestamp, floored at zero.
    pub duration_ms: i64,
    pub call_message_id: String,
    pub result_message_id: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageBody::User {
            content: content.into(),
        })
    }

    /// Assistant messages reuse the id of the stream message they came from.
    pub fn assistant(
        message_id: impl Into<String>,
        content: impl Into<String>,
        stop_reason: Option<String>,
        stop_sequence: Option<String>,
    ) -> Self {
        Self {
            id: message_id.into(),
            timestamp: Utc::now(),
            body: MessageBody::Assistant {
                content: content.into(),
                stop_reason,
                stop_sequence,
            },
        }
    }

    pub fn tool_call(tool_call: ToolCall) -> Self {
        Self::new(MessageBody::ToolCall { tool_call })
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::new(MessageBody::ToolResult {
            tool_result: ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
                is_error,
            },
        })
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self::new(MessageBody::Error {
            error: ErrorDescriptor {
                kind,
                message: message.into(),
                recoverable,
            },
        })
    }

    fn new(body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.body {
            MessageBody::User { .. } => "user_message",
            MessageBody::Assistant { .. } => "assistant_message",
            MessageBody::ToolCall { .. } => "tool_call_message",
            MessageBody::ToolResult { .. } => "tool_result_message",
            MessageBody::Error { .. } => "error_message",
        }
    }

    /// Text content of user and assistant messages.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::User { content } | MessageBody::Assistant { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match &self.body {
            MessageBody::ToolCall { tool_call } => Some(tool_call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match &self.body {
            MessageBody::ToolResult { tool_result } => Some(tool_result),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorDescriptor> {
        match &self.body {
            MessageBody::Error { error } => Some(error),
            _ => None,
        }
    }
}

impl ToolExchange {
    /// Combine a call message and a result message sharing a correlation id.
    ///
    /// Returns `None` if either message is of the wrong kind or the ids do
    /// not match.
    pub fn pair(call: &Message, result: &Message) -> Option<Self> {
        let tool_call = call.as_tool_call()?;
        let tool_result = result.as_tool_result()?;
        if tool_call.id != tool_result.tool_call_id {
            return None;
        }
        let duration_ms = (result.timestamp - call.timestamp).num_milliseconds().max(0);
        Some(Self {
            tool_call_id: tool_call.id.clone(),
            tool_name: tool_call.name.clone(),
            input: tool_call.input.clone(),
            output: tool_result.content.clone(),
            is_error: tool_result.is_error,
            duration_ms,
            call_message_id: call.id.clone(),
            result_message_id: result.id.clone(),
        })
    }
}
