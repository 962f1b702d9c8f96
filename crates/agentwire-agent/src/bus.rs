//! Per-agent event bus.
//!
//! Handlers are synchronous and run inside `publish`, in registration order.
//! A publish made from inside a handler is queued and delivered once the
//! current event has reached every subscriber, so all subscribers observe
//! one FIFO order. A publish from another thread while delivery is running
//! waits its turn.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::ThreadId;

use agentwire_core::event::{AgentEvent, EventKind, EventPayload};
use tracing::{debug, trace};

use crate::lock;

pub type EventHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;
pub type EventPredicate = Arc<dyn Fn(&AgentEvent) -> bool + Send + Sync>;

/// Which events a subscription receives.
#[derive(Clone)]
pub enum EventFilter {
    All,
    Kind(EventKind),
    Predicate(EventPredicate),
}

impl EventFilter {
    fn matches(&self, event: &AgentEvent) -> bool {
        match self {
            Self::All => true,
            Self::Kind(kind) => event.kind() == *kind,
            Self::Predicate(predicate) => predicate(event),
        }
    }
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Kind(kind) => write!(f, "Kind({kind})"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    handler: EventHandler,
    active: Arc<AtomicBool>,
    /// Sequence number of the last event published before subscribing.
    since_seq: u64,
}

#[derive(Default)]
struct Dispatch {
    queue: VecDeque<(u64, AgentEvent)>,
    owner: Option<ThreadId>,
}

struct BusInner {
    agent_id: String,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    dispatch: Mutex<Dispatch>,
    idle: Condvar,
    next_id: AtomicU64,
    last_seq: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                agent_id: agent_id.into(),
                subscribers: Mutex::new(Vec::new()),
                dispatch: Mutex::new(Dispatch::default()),
                idle: Condvar::new(),
                next_id: AtomicU64::new(1),
                last_seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    /// A handle that does not keep the bus alive. Handlers that publish
    /// back onto their own bus should capture this instead of the bus.
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Wrap `payload` in an envelope for this agent and deliver it.
    pub fn publish(&self, payload: impl Into<EventPayload>) {
        self.publish_event(AgentEvent::new(self.inner.agent_id.clone(), payload));
    }

    /// Deliver an already enveloped event.
    pub fn publish_event(&self, event: AgentEvent) {
        self.inner.publish(event);
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.add(EventFilter::Kind(kind), Arc::new(handler))
    }

    pub fn subscribe_where<P, F>(&self, predicate: P, handler: F) -> Subscription
    where
        P: Fn(&AgentEvent) -> bool + Send + Sync + 'static,
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.add(EventFilter::Predicate(Arc::new(predicate)), Arc::new(handler))
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.add(EventFilter::All, Arc::new(handler))
    }

    pub fn add(&self, filter: EventFilter, handler: EventHandler) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        if self.is_closed() {
            debug!(agent_id = %self.inner.agent_id, "Subscribe on a closed bus");
            active.store(false, Ordering::SeqCst);
        } else {
            let subscriber = Arc::new(Subscriber {
                id,
                filter,
                handler,
                active: active.clone(),
                since_seq: self.inner.last_seq.load(Ordering::SeqCst),
            });
            lock(&self.inner.subscribers).push(subscriber);
        }

        Subscription {
            id,
            active,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Stop all delivery. Later publishes are dropped with a debug log.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<Arc<Subscriber>> = lock(&self.inner.subscribers).drain(..).collect();
        for subscriber in &drained {
            subscriber.active.store(false, Ordering::SeqCst);
        }
        lock(&self.inner.dispatch).queue.clear();
        debug!(agent_id = %self.inner.agent_id, subscribers = drained.len(), "Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("agent_id", &self.inner.agent_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BusInner {
    fn publish(&self, event: AgentEvent) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(agent_id = %self.agent_id, kind = %event.kind(), "Publish on a closed bus dropped");
            return;
        }

        let me = std::thread::current().id();
        let mut dispatch = lock(&self.dispatch);
        loop {
            match dispatch.owner {
                Some(owner) if owner == me => {
                    // Re-entrant publish from a handler.
                    let seq = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
                    dispatch.queue.push_back((seq, event));
                    return;
                }
                Some(_) => {
                    dispatch = self.idle.wait(dispatch).unwrap_or_else(PoisonError::into_inner);
                }
                None => break,
            }
        }

        let seq = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
        dispatch.owner = Some(me);
        dispatch.queue.push_back((seq, event));
        drop(dispatch);

        let _guard = OwnerGuard { bus: self };
        loop {
            let next = lock(&self.dispatch).queue.pop_front();
            let Some((seq, event)) = next else { break };
            self.deliver(seq, &event);
        }
    }

    fn deliver(&self, seq: u64, event: &AgentEvent) {
        trace!(agent_id = %self.agent_id, seq, kind = %event.kind(), "Delivering event");
        let snapshot: Vec<Arc<Subscriber>> = lock(&self.subscribers).clone();
        for subscriber in snapshot {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            if !subscriber.active.load(Ordering::SeqCst) || seq <= subscriber.since_seq {
                continue;
            }
            if subscriber.filter.matches(event) {
                (subscriber.handler)(event);
            }
        }
    }

    fn remove(&self, id: u64) {
        lock(&self.subscribers).retain(|s| s.id != id);
    }
}

/// Releases delivery ownership even if a handler panics.
struct OwnerGuard<'a> {
    bus: &'a BusInner,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        let mut dispatch = lock(&self.bus.dispatch);
        dispatch.owner = None;
        if std::thread::panicking() {
            dispatch.queue.clear();
        }
        drop(dispatch);
        self.bus.idle.notify_all();
    }
}

/// Publishing handle that does not keep the bus alive.
#[derive(Clone)]
pub struct WeakEventBus {
    inner: Weak<BusInner>,
}

impl WeakEventBus {
    pub fn publish(&self, payload: impl Into<EventPayload>) {
        if let Some(inner) = self.inner.upgrade() {
            let event = AgentEvent::new(inner.agent_id.clone(), payload);
            inner.publish(event);
        }
    }
}

/// Handle returned by every subscribe call.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Stop receiving events. Idempotent, and safe to call from inside the
    /// subscription's own handler.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
