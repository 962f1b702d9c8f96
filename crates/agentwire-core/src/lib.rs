//! Core types, config, and errors for agentwire.
//!
//! Three event layers share one bus: the Stream layer ([`stream`]), the
//! State layer ([`state`]), and the Message layer ([`message`]). The
//! [`event`] module wraps all of them in a single envelope.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod raw;
pub mod state;
pub mod stream;

pub use error::{AgentwireError, Result};
pub use event::{AgentEvent, EventKind, EventLayer, EventPayload};
pub use message::{ErrorDescriptor, ErrorKind, Message, MessageBody, ToolCall, ToolExchange, ToolResult};
pub use raw::RawStreamEvent;
pub use state::ConversationState;
pub use stream::StreamEvent;
