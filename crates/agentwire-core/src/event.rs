//! The bus envelope shared by all three event layers.
//!
//! Every event carries its own id, the owning agent id, and an emission
//! timestamp. Payloads are flattened into the envelope so a serialized event
//! is one JSON object discriminated by `type`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, MessageBody, ToolExchange};
use crate::state::{LifecycleEvent, StateEvent};
use crate::stream::StreamEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub event_id: String,
    pub agent_id: String,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Stream(StreamEvent),
    State(StateEvent),
    Lifecycle(LifecycleEvent),
    Message(MessageEvent),
    Tool(ToolEvent),
}

/// A Message-layer event. `replayed` marks messages restored from stored
/// history rather than produced by a live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

/// Tool pairing outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    ToolExchangeCompleted { exchange: ToolExchange },
    ToolResultOrphaned {
        tool_call_id: String,
        result_message_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventLayer {
    Stream,
    State,
    Message,
}

/// Every event type that can appear on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageStart,
    MessageStop,
    TextBlockStart,
    TextDelta,
    TextBlockStop,
    ToolBlockStart,
    ToolInputDelta,
    ToolBlockStop,
    ToolResult,
    StateChanged,
    RequestStarted,
    RequestCompleted,
    RequestInterrupted,
    HistoryCleared,
    UserMessage,
    AssistantMessage,
    ToolCallMessage,
    ToolResultMessage,
    ErrorMessage,
    ToolExchangeCompleted,
    ToolResultOrphaned,
}

impl EventKind {
    pub const ALL: [EventKind; 21] = [
        Self::MessageStart,
        Self::MessageStop,
        Self::TextBlockStart,
        Self::TextDelta,
        Self::TextBlockStop,
        Self::ToolBlockStart,
        Self::ToolInputDelta,
        Self::ToolBlockStop,
        Self::ToolResult,
        Self::StateChanged,
        Self::RequestStarted,
        Self::RequestCompleted,
        Self::RequestInterrupted,
        Self::HistoryCleared,
        Self::UserMessage,
        Self::AssistantMessage,
        Self::ToolCallMessage,
        Self::ToolResultMessage,
        Self::ErrorMessage,
        Self::ToolExchangeCompleted,
        Self::ToolResultOrphaned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageStart => "message_start",
            Self::MessageStop => "message_stop",
            Self::TextBlockStart => "text_block_start",
            Self::TextDelta => "text_delta",
            Self::TextBlockStop => "text_block_stop",
            Self::ToolBlockStart => "tool_block_start",
            Self::ToolInputDelta => "tool_input_delta",
            Self::ToolBlockStop => "tool_block_stop",
            Self::ToolResult => "tool_result",
            Self::StateChanged => "state_changed",
            Self::RequestStarted => "request_started",
            Self::RequestCompleted => "request_completed",
            Self::RequestInterrupted => "request_interrupted",
            Self::HistoryCleared => "history_cleared",
            Self::UserMessage => "user_message",
            Self::AssistantMessage => "assistant_message",
            Self::ToolCallMessage => "tool_call_message",
            Self::ToolResultMessage => "tool_result_message",
            Self::ErrorMessage => "error_message",
            Self::ToolExchangeCompleted => "tool_exchange_completed",
            Self::ToolResultOrphaned => "tool_result_orphaned",
        }
    }

    pub fn layer(self) -> EventLayer {
        match self {
            Self::MessageStart
            | Self::MessageStop
            | Self::TextBlockStart
            | Self::TextDelta
            | Self::TextBlockStop
            | Self::ToolBlockStart
            | Self::ToolInputDelta
            | Self::ToolBlockStop
            | Self::ToolResult => EventLayer::Stream,
            Self::StateChanged
            | Self::RequestStarted
            | Self::RequestCompleted
            | Self::RequestInterrupted
            | Self::HistoryCleared => EventLayer::State,
            Self::UserMessage
            | Self::AssistantMessage
            | Self::ToolCallMessage
            | Self::ToolResultMessage
            | Self::ErrorMessage
            | Self::ToolExchangeCompleted
            | Self::ToolResultOrphaned => EventLayer::Message,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = crate::error::AgentwireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::error::AgentwireError::Validation(format!("Unknown event type: {s}")))
    }
}

impl AgentEvent {
    pub fn new(agent_id: impl Into<String>, payload: impl Into<EventPayload>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            emitted_at: Utc::now(),
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn as_stream(&self) -> Option<&StreamEvent> {
        match &self.payload {
            EventPayload::Stream(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageEvent> {
        match &self.payload {
            EventPayload::Message(event) => Some(event),
            _ => None,
        }
    }
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Stream(event) => match event {
                StreamEvent::MessageStart { .. } => EventKind::MessageStart,
                StreamEvent::MessageStop { .. } => EventKind::MessageStop,
                StreamEvent::TextBlockStart { .. } => EventKind::TextBlockStart,
                StreamEvent::TextDelta { .. } => EventKind::TextDelta,
                StreamEvent::TextBlockStop { .. } => EventKind::TextBlockStop,
                StreamEvent::ToolBlockStart { .. } => EventKind::ToolBlockStart,
                StreamEvent::ToolInputDelta { .. } => EventKind::ToolInputDelta,
                StreamEvent::ToolBlockStop { .. } => EventKind::ToolBlockStop,
                StreamEvent::ToolResult { .. } => EventKind::ToolResult,
            },
            Self::State(StateEvent::StateChanged { .. }) => EventKind::StateChanged,
            Self::Lifecycle(event) => match event {
                LifecycleEvent::RequestStarted { .. } => EventKind::RequestStarted,
                LifecycleEvent::RequestCompleted { .. } => EventKind::RequestCompleted,
                LifecycleEvent::RequestInterrupted { .. } => EventKind::RequestInterrupted,
                LifecycleEvent::HistoryCleared => EventKind::HistoryCleared,
            },
            Self::Message(event) => match event.message.body {
                MessageBody::User { .. } => EventKind::UserMessage,
                MessageBody::Assistant { .. } => EventKind::AssistantMessage,
                MessageBody::ToolCall { .. } => EventKind::ToolCallMessage,
                MessageBody::ToolResult { .. } => EventKind::ToolResultMessage,
                MessageBody::Error { .. } => EventKind::ErrorMessage,
            },
            Self::Tool(event) => match event {
                ToolEvent::ToolExchangeCompleted { .. } => EventKind::ToolExchangeCompleted,
                ToolEvent::ToolResultOrphaned { .. } => EventKind::ToolResultOrphaned,
            },
        }
    }

    pub fn message(message: Message) -> Self {
        Self::Message(MessageEvent {
            message,
            replayed: false,
        })
    }

    pub fn replayed(message: Message) -> Self {
        Self::Message(MessageEvent {
            message,
            replayed: true,
        })
    }
}

impl From<StreamEvent> for EventPayload {
    fn from(event: StreamEvent) -> Self {
        Self::Stream(event)
    }
}

impl From<StateEvent> for EventPayload {
    fn from(event: StateEvent) -> Self {
        Self::State(event)
    }
}

impl From<LifecycleEvent> for EventPayload {
    fn from(event: LifecycleEvent) -> Self {
        Self::Lifecycle(event)
    }
}

impl From<ToolEvent> for EventPayload {
    fn from(event: ToolEvent) -> Self {
        Self::Tool(event)
    }
}

impl From<Message> for EventPayload {
    fn from(message: Message) -> Self {
        Self::message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConversationState;

    #[test]
    fn test_kind_names_round_trip_through_from_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("on_text_delta".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_envelope_serializes_flat() {
        let event = AgentEvent::new("agent-1", StreamEvent::TextDelta { text: "Hi".into() });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "text_delta");
        assert_eq!(value["text"], "Hi");
        assert_eq!(value["agent_id"], "agent-1");
        assert!(value["event_id"].is_string());
    }

    #[test]
    fn test_message_event_kind_follows_body() {
        let event = AgentEvent::new("a", Message::assistant("m1", "", None, None));
        assert_eq!(event.kind(), EventKind::AssistantMessage);
        assert_eq!(event.kind().layer(), EventLayer::Message);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "assistant_message");
        assert!(value.get("replayed").is_none());
    }

    #[test]
    fn test_state_event_deserializes_into_state_variant() {
        let event = AgentEvent::new(
            "a",
            StateEvent::StateChanged {
                from: ConversationState::Idle,
                to: ConversationState::Queued,
                trigger: "user_message".into(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let parsed: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), EventKind::StateChanged);
        assert_eq!(parsed, event);
    }
}
