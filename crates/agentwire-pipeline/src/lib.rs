//! Event assembly pipeline.
//!
//! Pure, synchronous building blocks shared by the server-side agent runtime
//! and client-side consumers alike:
//!
//! - [`transformer`] turns raw backend events into normalized Stream events.
//! - [`state_machine`] derives the conversation lifecycle state.
//! - [`assembler`] accumulates Stream events into complete Messages.
//! - [`pairer`] matches tool results to their calls.
//! - [`replay`] rebuilds pairings from stored history.
//! - [`reducer`] folds bus events into a UI-ready conversation view.
//! - [`seen`] bounds the duplicate-suppression memory of the stages above.
//!
//! None of these perform I/O or hold state beyond what they are fed.

pub mod assembler;
pub mod pairer;
pub mod reducer;
pub mod replay;
pub mod seen;
pub mod state_machine;
pub mod transformer;

pub use assembler::MessageAssembler;
pub use pairer::ToolPairer;
pub use reducer::{ConversationView, StreamingPreview};
pub use replay::{ReplaySummary, replay_history};
pub use seen::SeenIds;
pub use state_machine::{ConversationStateMachine, StateChange};
pub use transformer::{BlockKind, ContentBlockContext, StreamTransformer};
