//! Rebuild history and tool pairings from stored messages.
//!
//! Replay sees no live stream, only the Message layer, and must end up with
//! the same history and exchanges the live pipeline would have produced.

use std::collections::HashSet;

use agentwire_core::message::{Message, ToolExchange};
use tracing::debug;

use crate::pairer::ToolPairer;

/// Outcome of replaying a stored history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    /// Messages in stored order, first occurrence of each id only.
    pub messages: Vec<Message>,
    pub exchanges: Vec<ToolExchange>,
    /// Ids of messages skipped because an earlier message had the same id.
    pub duplicates: Vec<String>,
    /// Tool calls that never received a result.
    pub unanswered_calls: Vec<String>,
    /// Tool results whose call is not in the history.
    pub orphaned_results: Vec<Message>,
}

pub fn replay_history<'a>(stored: impl IntoIterator<Item = &'a Message>) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    let mut seen = HashSet::new();
    let mut pairer = ToolPairer::new();

    for message in stored {
        if !seen.insert(message.id.clone()) {
            debug!(message_id = %message.id, "Skipping duplicate stored message");
            summary.duplicates.push(message.id.clone());
            continue;
        }
        if let Some(exchange) = pairer.on_message(message) {
            summary.exchanges.push(exchange);
        }
        summary.messages.push(message.clone());
    }

    summary.unanswered_calls = pairer.pending_call_ids().into_iter().map(String::from).collect();
    summary.orphaned_results = pairer.take_orphans();
    summary
}
