//! Conversation lifecycle state and State-layer events.

use serde::{Deserialize, Serialize};

/// Where an agent is in its conversation lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    Queued,
    Thinking,
    Responding,
    PlanningTool,
    AwaitingToolResult,
    Error,
}

impl ConversationState {
    /// Whether the agent is currently doing anything.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Thinking => "thinking",
            Self::Responding => "responding",
            Self::PlanningTool => "planning_tool",
            Self::AwaitingToolResult => "awaiting_tool_result",
            Self::Error => "error",
        }
    }

    /// `Error` may only be left for `Idle`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Error => matches!(next, Self::Idle),
            _ => true,
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-layer events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    StateChanged {
        from: ConversationState,
        to: ConversationState,
        /// Event type that caused the transition.
        trigger: String,
    },
}

/// Request lifecycle signals published by the agent session around each
/// generation request. The pipeline reacts to these instead of being called
/// directly on abort or clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RequestStarted { request_id: String },
    RequestCompleted { request_id: String },
    RequestInterrupted { request_id: String },
    HistoryCleared,
}

impl LifecycleEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RequestStarted { .. } => "request_started",
            Self::RequestCompleted { .. } => "request_completed",
            Self::RequestInterrupted { .. } => "request_interrupted",
            Self::HistoryCleared => "history_cleared",
        }
    }
}
