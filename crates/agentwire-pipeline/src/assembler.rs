//! Message assembler: Stream events in, complete Messages out.
//!
//! Each logical message is emitted at most once. Stops for messages that
//! were already finalized, discarded, or never started are ignored.

use std::collections::HashMap;

use agentwire_core::error::AgentwireError;
use agentwire_core::message::{Message, ToolCall};
use agentwire_core::stream::StreamEvent;
use serde_json::Value;
use tracing::{debug, warn};

use crate::seen::SeenIds;

#[derive(Debug)]
struct MessageAccumulator {
    message_id: String,
    text: String,
}

#[derive(Debug)]
struct ToolAccumulator {
    name: String,
    input_json: String,
}

/// Accumulates Stream events into Messages.
///
/// Closed message ids and emitted tool ids are remembered in bounded
/// [`SeenIds`] sets, so only recent redeliveries are suppressed.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    open: Option<MessageAccumulator>,
    tools: HashMap<String, ToolAccumulator>,
    finalized: SeenIds,
    discarded: SeenIds,
    emitted_calls: SeenIds,
    emitted_results: SeenIds,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the message currently being accumulated, if any.
    pub fn open_message_id(&self) -> Option<&str> {
        self.open.as_ref().map(|acc| acc.message_id.as_str())
    }

    /// Text accumulated so far for the open message.
    pub fn partial_text(&self) -> Option<&str> {
        self.open.as_ref().map(|acc| acc.text.as_str())
    }

    /// Feed one Stream event. Returns the messages it completed, in order.
    pub fn apply(&mut self, event: &StreamEvent) -> Vec<Message> {
        let mut out = Vec::new();

        match event {
            StreamEvent::MessageStart { message_id, .. } => {
                if self.finalized.contains(message_id) || self.discarded.contains(message_id) {
                    debug!(%message_id, "Ignoring start for a closed message");
                    return out;
                }
                if let Some(previous) = self.open.take() {
                    warn!(
                        message_id = %previous.message_id,
                        "New message started before the previous one stopped, discarding it"
                    );
                    self.discarded.insert(previous.message_id);
                }
                self.open = Some(MessageAccumulator {
                    message_id: message_id.clone(),
                    text: String::new(),
                });
            }

            StreamEvent::TextDelta { text } => match self.open.as_mut() {
                Some(acc) => acc.text.push_str(text),
                None => debug!("text_delta without an open message"),
            },

            StreamEvent::ToolBlockStart { tool_id, tool_name } => {
                if self.emitted_calls.contains(tool_id) {
                    debug!(%tool_id, "Ignoring restart of an emitted tool call");
                    return out;
                }
                self.tools.insert(
                    tool_id.clone(),
                    ToolAccumulator {
                        name: tool_name.clone(),
                        input_json: String::new(),
                    },
                );
            }

            StreamEvent::ToolInputDelta { tool_id, partial_json } => match self.tools.get_mut(tool_id) {
                Some(acc) => acc.input_json.push_str(partial_json),
                None => debug!(%tool_id, "tool_input_delta for an unknown tool block"),
            },

            StreamEvent::ToolBlockStop { tool_id } => {
                if let Some(acc) = self.tools.remove(tool_id) {
                    self.emitted_calls.insert(tool_id.clone());
                    out.push(Message::tool_call(build_tool_call(tool_id, acc)));
                }
            }

            StreamEvent::ToolResult {
                tool_id,
                content,
                is_error,
            } => {
                if self.emitted_results.insert(tool_id.clone()) {
                    out.push(Message::tool_result(tool_id.clone(), content.clone(), *is_error));
                } else {
                    debug!(%tool_id, "Ignoring duplicate tool result");
                }
            }

            StreamEvent::MessageStop {
                message_id,
                stop_reason,
                stop_sequence,
            } => {
                let matches_open = self.open.as_ref().is_some_and(|acc| &acc.message_id == message_id);
                if !matches_open {
                    debug!(%message_id, "Ignoring stop without an open accumulator");
                    return out;
                }
                if let Some(acc) = self.open.take() {
                    self.finalized.insert(acc.message_id.clone());
                    out.push(Message::assistant(
                        acc.message_id,
                        acc.text,
                        stop_reason.clone(),
                        stop_sequence.clone(),
                    ));
                }
            }

            StreamEvent::TextBlockStart { .. } | StreamEvent::TextBlockStop { .. } => {}
        }

        out
    }

    /// Drop every open accumulator without emitting anything. Later events
    /// for the discarded message id are ignored.
    pub fn discard(&mut self) {
        if let Some(acc) = self.open.take() {
            debug!(message_id = %acc.message_id, chars = acc.text.len(), "Discarding partial message");
            self.discarded.insert(acc.message_id);
        }
        self.tools.clear();
    }

    /// Forget everything, including which messages were already emitted.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn build_tool_call(tool_id: &str, acc: ToolAccumulator) -> ToolCall {
    let raw = acc.input_json;
    let (input, input_error) = if raw.trim().is_empty() {
        (Value::Object(Default::default()), None)
    } else {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => (value, None),
            Err(e) => {
                let err = AgentwireError::ToolInput {
                    tool_id: tool_id.to_string(),
                    message: e.to_string(),
                };
                warn!(tool = %acc.name, error = %err, "Malformed tool input");
                (Value::String(raw), Some(err.to_string()))
            }
        }
    };
    ToolCall {
        id: tool_id.to_string(),
        name: acc.name,
        input,
        input_error,
    }
}
