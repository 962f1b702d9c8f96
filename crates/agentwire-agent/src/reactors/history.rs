//! Append-only message history.

use std::sync::{Arc, Mutex};

use agentwire_core::event::EventPayload;
use agentwire_core::message::Message;
use agentwire_core::state::LifecycleEvent;
use tracing::debug;

use crate::bus::Subscription;
use crate::lock;
use crate::reactor::{Reactor, ReactorContext};

pub struct HistoryReactor {
    history: Arc<Mutex<Vec<Message>>>,
    subscription: Option<Subscription>,
}

impl HistoryReactor {
    pub fn new(history: Arc<Mutex<Vec<Message>>>) -> Self {
        Self {
            history,
            subscription: None,
        }
    }
}

impl Reactor for HistoryReactor {
    fn name(&self) -> &str {
        "history"
    }

    fn init(&mut self, ctx: &ReactorContext) -> anyhow::Result<()> {
        let history = self.history.clone();

        self.subscription = Some(ctx.bus.subscribe_all(move |event| match &event.payload {
            EventPayload::Message(event) => {
                let mut history = lock(&history);
                if history.iter().any(|m| m.id == event.message.id) {
                    debug!(message_id = %event.message.id, "Message already in history");
                } else {
                    history.push(event.message.clone());
                }
            }
            EventPayload::Lifecycle(LifecycleEvent::HistoryCleared) => lock(&history).clear(),
            _ => {}
        }));
        Ok(())
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        super::release(&mut self.subscription);
        Ok(())
    }
}
