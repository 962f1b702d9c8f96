//! Reactors and their lifecycle.
//!
//! A reactor is a pipeline stage that subscribes to the bus when it starts
//! and may publish derived events back onto it. The registry starts reactors
//! in registration order and stops them in reverse.

use std::collections::HashSet;

use agentwire_core::error::{AgentwireError, Result};
use agentwire_core::message::{ErrorKind, Message};
use tracing::{debug, info, warn};

use crate::bus::EventBus;

/// What a reactor gets to work with while starting.
#[derive(Debug, Clone)]
pub struct ReactorContext {
    pub agent_id: String,
    pub bus: EventBus,
}

pub trait Reactor: Send {
    /// Unique name within one agent.
    fn name(&self) -> &str;

    /// Subscribe to the bus. An error here fails agent construction.
    fn init(&mut self, ctx: &ReactorContext) -> anyhow::Result<()>;

    /// Release subscriptions. Errors are logged and otherwise ignored.
    fn destroy(&mut self) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct ReactorRegistry {
    reactors: Vec<Box<dyn Reactor>>,
    names: HashSet<String>,
    /// Number of leading reactors that are currently initialized.
    started: usize,
}

impl ReactorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reactor. Returns an error if one with the same name is already registered.
    pub fn add(&mut self, reactor: Box<dyn Reactor>) -> Result<()> {
        let name = reactor.name().to_string();
        if !self.names.insert(name.clone()) {
            return Err(AgentwireError::Validation(format!("Duplicate reactor name: {name}")));
        }
        debug!(reactor = %name, "Reactor added");
        self.reactors.push(reactor);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.reactors.iter().map(|r| r.name()).collect()
    }

    /// Initialize every reactor in order.
    ///
    /// On the first failure an error message is published, the reactors
    /// that already started are destroyed in reverse order, and the failure
    /// is returned.
    pub fn start(&mut self, ctx: &ReactorContext) -> Result<()> {
        while self.started < self.reactors.len() {
            let reactor = &mut self.reactors[self.started];
            let name = reactor.name().to_string();
            match reactor.init(ctx) {
                Ok(()) => {
                    debug!(agent_id = %ctx.agent_id, reactor = %name, "Reactor initialized");
                    self.started += 1;
                }
                Err(e) => {
                    let err = AgentwireError::Reactor {
                        reactor: name,
                        message: format!("{e:#}"),
                    };
                    warn!(agent_id = %ctx.agent_id, error = %err, "Reactor failed to initialize");
                    ctx.bus
                        .publish(Message::error(ErrorKind::Reactor, err.to_string(), false));
                    self.stop();
                    return Err(err);
                }
            }
        }
        info!(agent_id = %ctx.agent_id, reactors = self.started, "Reactors started");
        Ok(())
    }

    /// Destroy every started reactor in reverse order. Never fails; each
    /// reactor gets its turn even if an earlier one errors.
    pub fn stop(&mut self) {
        while self.started > 0 {
            self.started -= 1;
            let reactor = &mut self.reactors[self.started];
            match reactor.destroy() {
                Ok(()) => debug!(reactor = %reactor.name(), "Reactor destroyed"),
                Err(e) => warn!(reactor = %reactor.name(), error = %e, "Reactor teardown failed, continuing"),
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started > 0
    }
}
