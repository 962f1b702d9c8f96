//! Normalized Stream-layer events.
//!
//! Every backend's raw stream is reduced to this one shape before anything
//! else in the pipeline sees it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message_id: String,
        model: String,
    },
    MessageStop {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_sequence: Option<String>,
    },
    TextBlockStart {
        index: usize,
    },
    TextDelta {
        text: String,
    },
    TextBlockStop {
        index: usize,
    },
    ToolBlockStart {
        tool_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_id: String,
        partial_json: String,
    },
    ToolBlockStop {
        tool_id: String,
    },
    ToolResult {
        tool_id: String,
        content: String,
        is_error: bool,
    },
}

impl StreamEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::MessageStop { .. } => "message_stop",
            Self::TextBlockStart { .. } => "text_block_start",
            Self::TextDelta { .. } => "text_delta",
            Self::TextBlockStop { .. } => "text_block_stop",
            Self::ToolBlockStart { .. } => "tool_block_start",
            Self::ToolInputDelta { .. } => "tool_input_delta",
            Self::ToolBlockStop { .. } => "tool_block_stop",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}
