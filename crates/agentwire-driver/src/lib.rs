//! Generation driver abstraction.
//!
//! A driver turns a [`GenerationRequest`] into an asynchronous stream of
//! [`RawStreamEvent`]s and can be told to stop producing them at any time.
//! The backend behind it is opaque to the pipeline.

use std::pin::Pin;

use agentwire_core::message::Message;
use agentwire_core::raw::RawStreamEvent;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

pub mod jsonl;
pub mod scripted;
pub mod sse;

pub use scripted::{ScriptStep, ScriptedDriver};

/// Raw events for one request, in backend order.
pub type RawEventStream = Pin<Box<dyn Stream<Item = anyhow::Result<RawStreamEvent>> + Send>>;

/// Everything a driver needs to start one generation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: String,
    pub agent_id: String,
    pub model: String,
    /// Conversation history up to and including the new user message.
    pub messages: Vec<Message>,
}

/// The core generation driver trait.
#[async_trait]
pub trait GenerationDriver: Send + Sync {
    /// Driver identifier (e.g., "scripted").
    fn id(&self) -> &str;

    /// Begin generating. The returned stream ends when the backend is done.
    async fn start(&self, request: &GenerationRequest) -> anyhow::Result<RawEventStream>;

    /// Release the backend side of an in-flight request. Must tolerate ids
    /// that already finished.
    async fn interrupt(&self, request_id: &str) -> anyhow::Result<()>;
}
