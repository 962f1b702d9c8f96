//! In-memory driver that plays back queued scripts.
//!
//! Each `start` call consumes the next queued script. Used by tests and by
//! the CLI to replay recorded streams.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use agentwire_core::raw::RawStreamEvent;
use async_trait::async_trait;
use tracing::debug;

use crate::{GenerationDriver, GenerationRequest, RawEventStream};

/// One step of a script.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(RawStreamEvent),
    /// Fail the stream with this message.
    Fail(String),
    /// Never yield again; only an interrupt ends the request.
    Hang,
}

#[derive(Default)]
pub struct ScriptedDriver {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
    interrupts: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before yielding each step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_script(&self, events: Vec<RawStreamEvent>) {
        self.push_steps(events.into_iter().map(ScriptStep::Event).collect());
    }

    pub fn push_steps(&self, steps: Vec<ScriptStep>) {
        lock(&self.scripts).push_back(steps);
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    /// Request ids passed to `interrupt`, in call order.
    pub fn interrupts(&self) -> Vec<String> {
        lock(&self.interrupts).clone()
    }
}

#[async_trait]
impl GenerationDriver for ScriptedDriver {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn start(&self, request: &GenerationRequest) -> anyhow::Result<RawEventStream> {
        let Some(steps) = lock(&self.scripts).pop_front() else {
            anyhow::bail!("No script queued for request {}", request.request_id);
        };
        debug!(request_id = %request.request_id, steps = steps.len(), "Starting scripted stream");
        lock(&self.requests).push(request.clone());

        let delay = self.delay;
        let stream = futures::stream::unfold(steps.into_iter(), move |mut steps| async move {
            let step = steps.next()?;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match step {
                ScriptStep::Event(event) => Some((Ok(event), steps)),
                ScriptStep::Fail(message) => Some((Err(anyhow::anyhow!(message)), steps)),
                ScriptStep::Hang => {
                    futures::future::pending::<()>().await;
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn interrupt(&self, request_id: &str) -> anyhow::Result<()> {
        debug!(%request_id, "Scripted stream interrupted");
        lock(&self.interrupts).push(request_id.to_string());
        Ok(())
    }
}

/// Raw events for a plain text reply split into the given chunks.
pub fn text_reply(message_id: &str, chunks: &[&str]) -> Vec<RawStreamEvent> {
    let mut events = vec![
        RawStreamEvent::message_start(message_id, "scripted"),
        RawStreamEvent::text_block_start(0),
    ];
    events.extend(chunks.iter().map(|chunk| RawStreamEvent::text_delta(0, *chunk)));
    events.push(RawStreamEvent::block_stop(0));
    events.push(RawStreamEvent::stop_reason("end_turn"));
    events.push(RawStreamEvent::message_stop());
    events
}

/// Raw events for a reply that is a single tool call with the given input
/// fragments.
pub fn tool_use_reply(message_id: &str, tool_id: &str, tool_name: &str, fragments: &[&str]) -> Vec<RawStreamEvent> {
    let mut events = vec![
        RawStreamEvent::message_start(message_id, "scripted"),
        RawStreamEvent::tool_use_start(0, tool_id, tool_name),
    ];
    events.extend(fragments.iter().map(|f| RawStreamEvent::input_json_delta(0, *f)));
    events.push(RawStreamEvent::block_stop(0));
    events.push(RawStreamEvent::stop_reason("tool_use"));
    events.push(RawStreamEvent::message_stop());
    events
}
