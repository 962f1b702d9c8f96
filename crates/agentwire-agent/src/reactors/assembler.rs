//! Stream layer to Message layer.

use std::sync::{Arc, Mutex};

use agentwire_core::event::EventPayload;
use agentwire_core::message::MessageBody;
use agentwire_core::state::LifecycleEvent;
use agentwire_pipeline::MessageAssembler;

use crate::bus::Subscription;
use crate::lock;
use crate::reactor::{Reactor, ReactorContext};

#[derive(Default)]
pub struct AssemblerReactor {
    subscription: Option<Subscription>,
}

impl AssemblerReactor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reactor for AssemblerReactor {
    fn name(&self) -> &str {
        "assembler"
    }

    fn init(&mut self, ctx: &ReactorContext) -> anyhow::Result<()> {
        let assembler = Arc::new(Mutex::new(MessageAssembler::new()));
        let bus = ctx.bus.downgrade();

        self.subscription = Some(ctx.bus.subscribe_all(move |event| {
            let completed = {
                let mut assembler = lock(&assembler);
                match &event.payload {
                    EventPayload::Stream(stream) => assembler.apply(stream),
                    EventPayload::Lifecycle(LifecycleEvent::RequestInterrupted { .. }) => {
                        assembler.discard();
                        Vec::new()
                    }
                    EventPayload::Lifecycle(LifecycleEvent::HistoryCleared) => {
                        assembler.reset();
                        Vec::new()
                    }
                    EventPayload::Message(message)
                        if !message.replayed && matches!(message.message.body, MessageBody::Error { .. }) =>
                    {
                        assembler.discard();
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            };
            for message in completed {
                bus.publish(EventPayload::message(message));
            }
        }));
        Ok(())
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        super::release(&mut self.subscription);
        Ok(())
    }
}
