use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentwireError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Reactor '{reactor}' failed: {message}")]
    Reactor { reactor: String, message: String },

    #[error("Invalid input for tool call {tool_id}: {message}")]
    ToolInput { tool_id: String, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentwireError {
    /// True when the caller's request itself was invalid (as opposed to
    /// something failing downstream).
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Lifecycle(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentwireError>;
