//! Agent sessions: the runtime an engine owns, and the handle callers hold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agentwire_core::config::OrphanPolicy;
use agentwire_core::error::{AgentwireError, Result};
use agentwire_core::event::{AgentEvent, EventKind, EventPayload, ToolEvent};
use agentwire_core::message::{ErrorKind, Message};
use agentwire_core::state::{ConversationState, LifecycleEvent};
use agentwire_core::stream::StreamEvent;
use agentwire_driver::{GenerationDriver, GenerationRequest};
use agentwire_pipeline::{ConversationStateMachine, ReplaySummary, StreamTransformer, ToolPairer, replay_history};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Subscription};
use crate::engine::EngineRef;
use crate::lock;
use crate::react::Reactions;
use crate::reactor::{Reactor, ReactorContext, ReactorRegistry};
use crate::reactors::{AssemblerReactor, HistoryReactor, PairerReactor, StateReactor};

struct InFlight {
    request_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

enum Outcome {
    Completed,
    Interrupted,
    Failed(String),
}

/// Everything one agent owns. Only the engine holds these.
pub(crate) struct AgentRuntime {
    agent_id: String,
    model: String,
    orphan_policy: OrphanPolicy,
    driver: Arc<dyn GenerationDriver>,
    bus: EventBus,
    registry: Mutex<ReactorRegistry>,
    history: Arc<Mutex<Vec<Message>>>,
    machine: Arc<Mutex<ConversationStateMachine>>,
    pairer: Arc<Mutex<ToolPairer>>,
    request: tokio::sync::Mutex<Option<InFlight>>,
    busy: watch::Sender<bool>,
    destroyed: AtomicBool,
}

impl AgentRuntime {
    pub(crate) fn start(
        agent_id: String,
        model: String,
        orphan_policy: OrphanPolicy,
        driver: Arc<dyn GenerationDriver>,
        extra: Vec<Box<dyn Reactor>>,
    ) -> Result<Self> {
        let bus = EventBus::new(agent_id.clone());
        let history = Arc::new(Mutex::new(Vec::new()));
        let machine = Arc::new(Mutex::new(ConversationStateMachine::new()));
        let pairer = Arc::new(Mutex::new(ToolPairer::new()));

        let mut registry = ReactorRegistry::new();
        registry.add(Box::new(AssemblerReactor::new()))?;
        registry.add(Box::new(PairerReactor::new(pairer.clone())))?;
        registry.add(Box::new(StateReactor::new(machine.clone())))?;
        registry.add(Box::new(HistoryReactor::new(history.clone())))?;
        for reactor in extra {
            registry.add(reactor)?;
        }

        let ctx = ReactorContext {
            agent_id: agent_id.clone(),
            bus: bus.clone(),
        };
        if let Err(e) = registry.start(&ctx) {
            bus.close();
            return Err(e);
        }

        let (busy, _) = watch::channel(false);
        Ok(Self {
            agent_id,
            model,
            orphan_policy,
            driver,
            bus,
            registry: Mutex::new(registry),
            history,
            machine,
            pairer,
            request: tokio::sync::Mutex::new(None),
            busy,
            destroyed: AtomicBool::new(false),
        })
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(AgentwireError::Lifecycle(format!("Agent {} has been destroyed", self.agent_id)));
        }
        Ok(())
    }

    fn state(&self) -> ConversationState {
        lock(&self.machine).state()
    }

    fn history(&self) -> Vec<Message> {
        lock(&self.history).clone()
    }

    async fn send(self: &Arc<Self>, text: &str) -> Result<()> {
        let mut slot = self.request.lock().await;
        self.ensure_live()?;
        if slot.as_ref().is_some_and(|f| !f.task.is_finished()) {
            return Err(AgentwireError::Lifecycle("A request is already in flight".into()));
        }
        if self.state() == ConversationState::Error {
            return Err(AgentwireError::Lifecycle(
                "Agent is in the error state; clear it before sending".into(),
            ));
        }

        self.bus.publish(Message::user(text));

        let request = GenerationRequest {
            request_id: Uuid::new_v4().to_string(),
            agent_id: self.agent_id.clone(),
            model: self.model.clone(),
            messages: self.history(),
        };
        let request_id = request.request_id.clone();
        let cancel = CancellationToken::new();
        self.busy.send_replace(true);
        info!(agent_id = %self.agent_id, %request_id, "Request dispatched");

        let task = tokio::spawn(run_request(self.clone(), request, cancel.clone()));
        *slot = Some(InFlight {
            request_id,
            cancel,
            task,
        });
        Ok(())
    }

    async fn interrupt(&self) {
        let mut slot = self.request.lock().await;
        self.interrupt_locked(&mut slot).await;
    }

    async fn interrupt_locked(&self, slot: &mut Option<InFlight>) {
        let request_id = match slot.take() {
            Some(in_flight) if !in_flight.task.is_finished() => {
                info!(agent_id = %self.agent_id, request_id = %in_flight.request_id, "Interrupting request");
                in_flight.cancel.cancel();
                if let Err(e) = in_flight.task.await {
                    warn!(agent_id = %self.agent_id, error = %e, "Request task ended abnormally");
                }
                in_flight.request_id
            }
            Some(finished) => finished.request_id,
            None => String::new(),
        };

        // No stream is left, but the conversation may still be parked on
        // unanswered tool calls.
        if self.state().is_active() {
            info!(agent_id = %self.agent_id, %request_id, "Abandoning tool calls awaiting results");
            self.bus.publish(LifecycleEvent::RequestInterrupted { request_id });
        } else if request_id.is_empty() {
            debug!(agent_id = %self.agent_id, "Interrupt with no request in flight");
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut slot = self.request.lock().await;
        self.ensure_live()?;
        self.interrupt_locked(&mut slot).await;

        let orphans = lock(&self.pairer).take_orphans();
        for orphan in orphans {
            let Some(result) = orphan.as_tool_result() else { continue };
            match self.orphan_policy {
                OrphanPolicy::Report => {
                    warn!(agent_id = %self.agent_id, tool_call_id = %result.tool_call_id, "Tool result never matched a call");
                    self.bus.publish(ToolEvent::ToolResultOrphaned {
                        tool_call_id: result.tool_call_id.clone(),
                        result_message_id: orphan.id.clone(),
                    });
                }
                OrphanPolicy::Drop => {
                    debug!(agent_id = %self.agent_id, tool_call_id = %result.tool_call_id, "Dropping orphaned tool result");
                }
            }
        }

        self.bus.publish(LifecycleEvent::HistoryCleared);
        info!(agent_id = %self.agent_id, "History cleared");
        Ok(())
    }

    async fn restore(&self, messages: Vec<Message>) -> Result<ReplaySummary> {
        let slot = self.request.lock().await;
        self.ensure_live()?;
        if slot.as_ref().is_some_and(|f| !f.task.is_finished()) {
            return Err(AgentwireError::Lifecycle("Cannot restore while a request is in flight".into()));
        }

        let summary = replay_history(&messages);
        for message in &summary.messages {
            self.bus.publish(EventPayload::replayed(message.clone()));
        }
        info!(
            agent_id = %self.agent_id,
            messages = summary.messages.len(),
            duplicates = summary.duplicates.len(),
            "History restored"
        );
        Ok(summary)
    }

    /// Tear everything down. Safe to call more than once.
    pub(crate) async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.interrupt().await;

        for orphan in lock(&self.pairer).orphaned_results() {
            if let Some(result) = orphan.as_tool_result() {
                warn!(agent_id = %self.agent_id, tool_call_id = %result.tool_call_id, "Orphaned tool result at destroy");
            }
        }

        lock(&self.registry).stop();
        self.bus.close();
        self.busy.send_replace(false);
        info!(agent_id = %self.agent_id, "Agent destroyed");
    }

    /// Tear down a runtime that was never shared.
    pub(crate) fn abandon(self) {
        self.destroyed.store(true, Ordering::SeqCst);
        lock(&self.registry).stop();
        self.bus.close();
    }
}

async fn run_request(runtime: Arc<AgentRuntime>, request: GenerationRequest, cancel: CancellationToken) {
    let request_id = request.request_id.clone();
    let bus = &runtime.bus;
    bus.publish(LifecycleEvent::RequestStarted {
        request_id: request_id.clone(),
    });

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Outcome::Interrupted,
        outcome = pump(&runtime, &request) => outcome,
    };

    match outcome {
        Outcome::Completed => {
            debug!(agent_id = %runtime.agent_id, %request_id, "Request completed");
            bus.publish(LifecycleEvent::RequestCompleted { request_id });
        }
        Outcome::Interrupted => {
            if let Err(e) = runtime.driver.interrupt(&request_id).await {
                warn!(agent_id = %runtime.agent_id, %request_id, error = %e, "Driver interrupt failed");
            }
            bus.publish(LifecycleEvent::RequestInterrupted { request_id });
        }
        Outcome::Failed(reason) => {
            error!(agent_id = %runtime.agent_id, %request_id, error = %reason, "Generation failed");
            bus.publish(Message::error(ErrorKind::Driver, reason, true));
            bus.publish(LifecycleEvent::RequestCompleted { request_id });
        }
    }
    runtime.busy.send_replace(false);
}

/// Drive the raw stream through the transformer onto the bus.
async fn pump(runtime: &AgentRuntime, request: &GenerationRequest) -> Outcome {
    let mut stream = match runtime.driver.start(request).await {
        Ok(stream) => stream,
        Err(e) => return Outcome::Failed(format!("{e:#}")),
    };

    let mut transformer = StreamTransformer::new();
    while let Some(item) = stream.next().await {
        let raw = match item {
            Ok(raw) => raw,
            Err(e) => return Outcome::Failed(format!("{e:#}")),
        };
        match transformer.transform(&raw) {
            Ok(Some(event)) => runtime.bus.publish(event),
            Ok(None) => {}
            Err(e) => return Outcome::Failed(e.to_string()),
        }
    }
    Outcome::Completed
}

/// Caller-side handle to one agent. Holds no strong reference to the agent
/// or its engine; every call looks the agent up again.
#[derive(Clone)]
pub struct AgentHandle {
    agent_id: String,
    engine: EngineRef,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle").field("agent_id", &self.agent_id).finish()
    }
}

impl AgentHandle {
    pub(crate) fn new(agent_id: String, engine: EngineRef) -> Self {
        Self { agent_id, engine }
    }

    pub fn id(&self) -> &str {
        &self.agent_id
    }

    fn runtime(&self) -> Result<Arc<AgentRuntime>> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| AgentwireError::Lifecycle("Agent engine has been dropped".into()))?;
        let runtime = engine
            .get(&self.agent_id)
            .ok_or_else(|| AgentwireError::Lifecycle(format!("Agent {} has been destroyed", self.agent_id)))?;
        runtime.ensure_live()?;
        Ok(runtime)
    }

    pub fn is_alive(&self) -> bool {
        self.runtime().is_ok()
    }

    /// Append a user message and start generating a reply.
    ///
    /// Returns once the request is dispatched, not once it is answered; use
    /// [`wait_idle`](Self::wait_idle) to wait for the reply. Empty text is
    /// rejected before anything is published.
    pub async fn send(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(AgentwireError::Validation("Message text is empty".into()));
        }
        self.runtime()?.send(text).await
    }

    /// Abort the in-flight request, if any. Partial output is discarded.
    pub async fn interrupt(&self) -> Result<()> {
        self.runtime()?.interrupt().await;
        Ok(())
    }

    /// Abort, report orphaned tool results, and wipe history.
    pub async fn clear(&self) -> Result<()> {
        self.runtime()?.clear().await
    }

    /// Release every resource the agent holds. Idempotent.
    pub async fn destroy(&self) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        if let Some(runtime) = engine.remove(&self.agent_id) {
            runtime.destroy().await;
        }
    }

    /// Replay stored messages through the Message layer.
    pub async fn restore(&self, messages: Vec<Message>) -> Result<ReplaySummary> {
        self.runtime()?.restore(messages).await
    }

    /// Deliver the result of a tool the host ran.
    pub fn submit_tool_result(&self, tool_call_id: &str, content: impl Into<String>, is_error: bool) -> Result<()> {
        if tool_call_id.trim().is_empty() {
            return Err(AgentwireError::Validation("Tool call id is empty".into()));
        }
        let runtime = self.runtime()?;
        runtime.bus.publish(StreamEvent::ToolResult {
            tool_id: tool_call_id.to_string(),
            content: content.into(),
            is_error,
        });
        Ok(())
    }

    /// Wait until no request is in flight.
    pub async fn wait_idle(&self) -> Result<()> {
        let mut busy = self.runtime()?.busy.subscribe();
        // A closed channel means the agent went away, which is idle too.
        let _ = busy.wait_for(|busy| !*busy).await;
        Ok(())
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Result<Subscription>
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        Ok(self.runtime()?.bus.subscribe(kind, handler))
    }

    pub fn subscribe_where<P, F>(&self, predicate: P, handler: F) -> Result<Subscription>
    where
        P: Fn(&AgentEvent) -> bool + Send + Sync + 'static,
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        Ok(self.runtime()?.bus.subscribe_where(predicate, handler))
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        Ok(self.runtime()?.bus.subscribe_all(handler))
    }

    /// Subscribe a whole handler table at once.
    pub fn react(&self, reactions: Reactions) -> Result<Subscription> {
        Ok(reactions.attach(&self.runtime()?.bus))
    }

    pub fn history(&self) -> Result<Vec<Message>> {
        Ok(self.runtime()?.history())
    }

    pub fn state(&self) -> Result<ConversationState> {
        Ok(self.runtime()?.state())
    }

    /// Whether the agent is doing anything right now.
    pub fn is_active(&self) -> Result<bool> {
        Ok(self.state()?.is_active())
    }

    /// Tool calls emitted but still waiting for their result.
    pub fn pending_tool_calls(&self) -> Result<Vec<String>> {
        let runtime = self.runtime()?;
        let pairer = lock(&runtime.pairer);
        Ok(pairer.pending_call_ids().into_iter().map(String::from).collect())
    }

    /// Tool results buffered without a matching call.
    pub fn orphaned_tool_results(&self) -> Result<Vec<Message>> {
        let runtime = self.runtime()?;
        let pairer = lock(&runtime.pairer);
        Ok(pairer.orphaned_results().into_iter().cloned().collect())
    }

    /// Names of the reactors attached to this agent, in start order.
    pub fn reactor_names(&self) -> Result<Vec<String>> {
        let runtime = self.runtime()?;
        let registry = lock(&runtime.registry);
        Ok(registry.names().into_iter().map(String::from).collect())
    }
}
