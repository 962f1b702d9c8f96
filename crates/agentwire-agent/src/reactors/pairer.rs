//! Matches tool results to tool calls and publishes completed exchanges.

use std::sync::{Arc, Mutex};

use agentwire_core::event::{EventPayload, ToolEvent};
use agentwire_core::state::LifecycleEvent;
use agentwire_pipeline::ToolPairer;

use crate::bus::Subscription;
use crate::lock;
use crate::reactor::{Reactor, ReactorContext};

pub struct PairerReactor {
    pairer: Arc<Mutex<ToolPairer>>,
    subscription: Option<Subscription>,
}

impl PairerReactor {
    /// The session keeps a clone of `pairer` to report orphans.
    pub fn new(pairer: Arc<Mutex<ToolPairer>>) -> Self {
        Self {
            pairer,
            subscription: None,
        }
    }
}

impl Reactor for PairerReactor {
    fn name(&self) -> &str {
        "pairer"
    }

    fn init(&mut self, ctx: &ReactorContext) -> anyhow::Result<()> {
        let pairer = self.pairer.clone();
        let bus = ctx.bus.downgrade();

        self.subscription = Some(ctx.bus.subscribe_all(move |event| {
            let exchange = match &event.payload {
                EventPayload::Message(message) => lock(&pairer).on_message(&message.message),
                EventPayload::Lifecycle(LifecycleEvent::HistoryCleared) => {
                    lock(&pairer).reset();
                    None
                }
                _ => None,
            };
            if let Some(exchange) = exchange {
                bus.publish(ToolEvent::ToolExchangeCompleted { exchange });
            }
        }));
        Ok(())
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        super::release(&mut self.subscription);
        Ok(())
    }
}
