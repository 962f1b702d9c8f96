//! Bulk subscription through an explicit event-kind to handler table.

use std::collections::HashMap;
use std::sync::Arc;

use agentwire_core::event::{AgentEvent, EventKind};

use crate::bus::{EventBus, EventHandler, Subscription};

/// A set of handlers keyed by event kind.
///
/// ```ignore
/// let reactions = Reactions::new()
///     .on(EventKind::TextDelta, |e| print_delta(e))
///     .on(EventKind::AssistantMessage, |e| save(e));
/// let subscription = handle.react(reactions)?;
/// ```
#[derive(Default, Clone)]
pub struct Reactions {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `kind`. Several handlers per kind run in the order
    /// they were added.
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
        self
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Subscribe the whole table. One unsubscribe removes every handler.
    pub fn attach(self, bus: &EventBus) -> Subscription {
        let handlers = self.handlers;
        bus.subscribe_where(
            {
                let kinds: Vec<EventKind> = handlers.keys().copied().collect();
                move |event| kinds.contains(&event.kind())
            },
            move |event| {
                if let Some(chain) = handlers.get(&event.kind()) {
                    for handler in chain {
                        handler(event);
                    }
                }
            },
        )
    }
}

impl std::fmt::Debug for Reactions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactions").field("kinds", &self.kinds()).finish()
    }
}
