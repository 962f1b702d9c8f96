//! Raw stream events as produced by a generation driver.
//!
//! These are the low-level, backend-shaped events (block start/stop, token
//! deltas, tool-input fragments) that the stream transformer normalizes.
//! The JSON shape follows the common "content block" streaming layout so
//! recorded streams can be replayed verbatim.

use serde::{Deserialize, Serialize};

/// A single raw event from the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawStreamEvent {
    MessageStart {
        message: RawMessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: RawContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: RawDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: RawMessageDelta,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<RawUsage>,
    },
    MessageStop,
    Ping,
    /// A tool result delivered inside the stream by backends that run tools
    /// themselves.
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    /// A whole assistant message. With `synthetic: true` it is the
    /// backend's way of signalling a failure instead of a real reply.
    Assistant {
        #[serde(default)]
        synthetic: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessageStart {
    pub id: String,
    #[serde(default)]
    pub model: String,
}

/// Kind-specific payload of a `content_block_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Unsupported,
}

/// Kind-specific payload of a `content_block_delta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

impl RawStreamEvent {
    pub fn message_start(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self::MessageStart {
            message: RawMessageStart {
                id: id.into(),
                model: model.into(),
            },
        }
    }

    pub fn text_block_start(index: usize) -> Self {
        Self::ContentBlockStart {
            index,
            content_block: RawContentBlock::Text {
                text: String::new(),
            },
        }
    }

    pub fn text_delta(index: usize, text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            index,
            delta: RawDelta::TextDelta { text: text.into() },
        }
    }

    pub fn tool_use_start(index: usize, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ContentBlockStart {
            index,
            content_block: RawContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
                input: serde_json::Value::Object(Default::default()),
            },
        }
    }

    pub fn input_json_delta(index: usize, partial_json: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            index,
            delta: RawDelta::InputJsonDelta {
                partial_json: partial_json.into(),
            },
        }
    }

    pub fn block_stop(index: usize) -> Self {
        Self::ContentBlockStop { index }
    }

    pub fn stop_reason(reason: impl Into<String>) -> Self {
        Self::MessageDelta {
            delta: RawMessageDelta {
                stop_reason: Some(reason.into()),
                stop_sequence: None,
            },
            usage: None,
        }
    }

    pub fn message_stop() -> Self {
        Self::MessageStop
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    pub fn synthetic_error(message: impl Into<String>) -> Self {
        Self::Assistant {
            synthetic: true,
            text: None,
            error: Some(message.into()),
        }
    }

    /// Short name of the raw event type, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Ping => "ping",
            Self::ToolResult { .. } => "tool_result",
            Self::Assistant { .. } => "assistant",
            Self::Unknown => "unknown",
        }
    }
}
