//! Drives the conversation state machine and publishes its transitions.

use std::sync::{Arc, Mutex};

use agentwire_core::event::EventPayload;
use agentwire_core::state::StateEvent;
use agentwire_pipeline::ConversationStateMachine;
use tracing::info;

use crate::bus::Subscription;
use crate::lock;
use crate::reactor::{Reactor, ReactorContext};

pub struct StateReactor {
    machine: Arc<Mutex<ConversationStateMachine>>,
    subscription: Option<Subscription>,
}

impl StateReactor {
    pub fn new(machine: Arc<Mutex<ConversationStateMachine>>) -> Self {
        Self {
            machine,
            subscription: None,
        }
    }
}

impl Reactor for StateReactor {
    fn name(&self) -> &str {
        "state"
    }

    fn init(&mut self, ctx: &ReactorContext) -> anyhow::Result<()> {
        let machine = self.machine.clone();
        let bus = ctx.bus.downgrade();
        let agent_id = ctx.agent_id.clone();

        self.subscription = Some(ctx.bus.subscribe_where(
            |event| !matches!(event.payload, EventPayload::State(_)),
            move |event| {
                let changes = lock(&machine).apply(&event.payload);
                for change in changes {
                    info!(%agent_id, from = %change.from, to = %change.to, trigger = %change.trigger, "State changed");
                    bus.publish(StateEvent::StateChanged {
                        from: change.from,
                        to: change.to,
                        trigger: change.trigger.to_string(),
                    });
                }
            },
        ));
        Ok(())
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        super::release(&mut self.subscription);
        Ok(())
    }
}
