//! Tool-call / tool-result pairing.
//!
//! Whichever side of a pair arrives first is buffered under its correlation
//! id until the other side shows up.

use std::collections::HashMap;

use agentwire_core::message::{Message, ToolExchange};
use tracing::debug;

use crate::seen::SeenIds;

#[derive(Debug, Default)]
pub struct ToolPairer {
    pending_calls: HashMap<String, Message>,
    pending_results: HashMap<String, Message>,
    /// Recently paired ids; late duplicates of these are dropped.
    completed: SeenIds,
}

impl ToolPairer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a Message-layer message. Returns the completed exchange when this
    /// message closes a pair. Non-tool messages are ignored.
    pub fn on_message(&mut self, message: &Message) -> Option<ToolExchange> {
        if let Some(call) = message.as_tool_call() {
            if self.completed.contains(&call.id) || self.pending_calls.contains_key(&call.id) {
                debug!(tool_call_id = %call.id, "Ignoring repeated tool call");
                return None;
            }
            return match self.pending_results.remove(&call.id) {
                Some(result) => self.complete(message, &result),
                None => {
                    self.pending_calls.insert(call.id.clone(), message.clone());
                    None
                }
            };
        }

        if let Some(result) = message.as_tool_result() {
            let id = &result.tool_call_id;
            if self.completed.contains(id) || self.pending_results.contains_key(id) {
                debug!(tool_call_id = %id, "Ignoring repeated tool result");
                return None;
            }
            return match self.pending_calls.remove(id) {
                Some(call) => self.complete(&call, message),
                None => {
                    debug!(tool_call_id = %id, "Buffering tool result until its call arrives");
                    self.pending_results.insert(id.clone(), message.clone());
                    None
                }
            };
        }

        None
    }

    fn complete(&mut self, call: &Message, result: &Message) -> Option<ToolExchange> {
        let exchange = ToolExchange::pair(call, result)?;
        self.completed.insert(exchange.tool_call_id.clone());
        debug!(
            tool_call_id = %exchange.tool_call_id,
            tool = %exchange.tool_name,
            duration_ms = exchange.duration_ms,
            "Tool exchange completed"
        );
        Some(exchange)
    }

    /// Ids of calls still waiting for a result.
    pub fn pending_call_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.pending_calls.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Results whose call has not been seen.
    pub fn orphaned_results(&self) -> Vec<&Message> {
        let mut results: Vec<&Message> = self.pending_results.values().collect();
        results.sort_by_key(|m| m.timestamp);
        results
    }

    /// Remove and return every buffered orphan result, oldest first.
    pub fn take_orphans(&mut self) -> Vec<Message> {
        let mut results: Vec<Message> = self.pending_results.drain().map(|(_, m)| m).collect();
        results.sort_by_key(|m| m.timestamp);
        results
    }

    pub fn reset(&mut self) {
        self.pending_calls.clear();
        self.pending_results.clear();
        self.completed.clear();
    }
}
