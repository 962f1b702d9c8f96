//! Client-side fold of bus events into a renderable conversation view.

use agentwire_core::event::{AgentEvent, EventPayload, ToolEvent};
use agentwire_core::message::{Message, MessageBody, ToolExchange};
use agentwire_core::state::{ConversationState, LifecycleEvent, StateEvent};
use agentwire_core::stream::StreamEvent;
use serde::Serialize;

/// Assistant text that is still streaming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamingPreview {
    pub message_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationView {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<StreamingPreview>,
    pub state: ConversationState,
    pub exchanges: Vec<ToolExchange>,
    /// Tool calls emitted but not yet paired with a result.
    pub pending_tool_calls: Vec<String>,
    pub orphaned_results: Vec<String>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a AgentEvent>) -> Self {
        let mut view = Self::new();
        for event in events {
            view.apply(event);
        }
        view
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn apply(&mut self, event: &AgentEvent) {
        match &event.payload {
            EventPayload::Stream(stream) => self.apply_stream(stream),

            EventPayload::State(StateEvent::StateChanged { to, .. }) => self.state = *to,

            EventPayload::Lifecycle(LifecycleEvent::RequestInterrupted { .. }) => {
                self.streaming = None;
            }
            EventPayload::Lifecycle(LifecycleEvent::HistoryCleared) => {
                self.messages.clear();
                self.exchanges.clear();
                self.pending_tool_calls.clear();
                self.orphaned_results.clear();
                self.streaming = None;
            }
            EventPayload::Lifecycle(_) => {}

            EventPayload::Message(event) => self.push_message(&event.message),

            EventPayload::Tool(ToolEvent::ToolExchangeCompleted { exchange }) => {
                self.pending_tool_calls.retain(|id| id != &exchange.tool_call_id);
                self.exchanges.push(exchange.clone());
            }
            EventPayload::Tool(ToolEvent::ToolResultOrphaned { tool_call_id, .. }) => {
                self.orphaned_results.push(tool_call_id.clone());
            }
        }
    }

    fn apply_stream(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { message_id, .. } => {
                self.streaming = Some(StreamingPreview {
                    message_id: message_id.clone(),
                    text: String::new(),
                });
            }
            StreamEvent::TextDelta { text } => {
                if let Some(preview) = self.streaming.as_mut() {
                    preview.text.push_str(text);
                }
            }
            _ => {}
        }
    }

    fn push_message(&mut self, message: &Message) {
        if self.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        match &message.body {
            MessageBody::Assistant { .. } => {
                if self.streaming.as_ref().is_some_and(|p| p.message_id == message.id) {
                    self.streaming = None;
                }
            }
            MessageBody::ToolCall { tool_call } => {
                let already_paired = self.exchanges.iter().any(|x| x.tool_call_id == tool_call.id);
                if !already_paired {
                    self.pending_tool_calls.push(tool_call.id.clone());
                }
            }
            _ => {}
        }
        self.messages.push(message.clone());
    }
}
