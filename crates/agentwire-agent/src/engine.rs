//! Agent engine: the explicit owner of every agent runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use agentwire_core::config::Config;
use agentwire_core::error::{AgentwireError, Result};
use agentwire_driver::GenerationDriver;
use tracing::info;
use uuid::Uuid;

use crate::lock;
use crate::reactor::Reactor;
use crate::session::{AgentHandle, AgentRuntime};

pub(crate) struct EngineInner {
    pub(crate) agents: Mutex<HashMap<String, Arc<AgentRuntime>>>,
    driver: Arc<dyn GenerationDriver>,
    config: Config,
}

impl EngineInner {
    pub(crate) fn get(&self, agent_id: &str) -> Option<Arc<AgentRuntime>> {
        lock(&self.agents).get(agent_id).cloned()
    }

    pub(crate) fn remove(&self, agent_id: &str) -> Option<Arc<AgentRuntime>> {
        lock(&self.agents).remove(agent_id)
    }
}

/// Owns agents and the driver they share. Cloning yields another handle to
/// the same engine.
#[derive(Clone)]
pub struct AgentEngine {
    inner: Arc<EngineInner>,
}

impl AgentEngine {
    pub fn new(driver: Arc<dyn GenerationDriver>, config: Config) -> Self {
        info!(driver = %driver.id(), model = %config.model(), "Agent engine created");
        Self {
            inner: Arc::new(EngineInner {
                agents: Mutex::new(HashMap::new()),
                driver,
                config,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn builder(&self) -> AgentBuilder {
        AgentBuilder {
            engine: self.inner.clone(),
            agent_id: None,
            model: None,
            reactors: Vec::new(),
        }
    }

    /// Handle to a live agent.
    pub fn get(&self, agent_id: &str) -> Option<AgentHandle> {
        self.inner
            .get(agent_id)
            .map(|_| AgentHandle::new(agent_id.to_string(), Arc::downgrade(&self.inner)))
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.agents).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Destroy every agent.
    pub async fn shutdown(&self) {
        let runtimes: Vec<Arc<AgentRuntime>> = lock(&self.inner.agents).drain().map(|(_, rt)| rt).collect();
        info!(agents = runtimes.len(), "Shutting down agent engine");
        for runtime in runtimes {
            runtime.destroy().await;
        }
    }
}

/// Configures and starts one agent.
pub struct AgentBuilder {
    engine: Arc<EngineInner>,
    agent_id: Option<String>,
    model: Option<String>,
    reactors: Vec<Box<dyn Reactor>>,
}

impl AgentBuilder {
    pub fn with_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Override the configured model for this agent.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Add a reactor after the built-in ones.
    pub fn with_reactor(mut self, reactor: impl Reactor + 'static) -> Self {
        self.reactors.push(Box::new(reactor));
        self
    }

    /// Start every reactor and register the agent with the engine.
    ///
    /// If a reactor fails to start, the ones already started are torn down
    /// and nothing is registered.
    pub fn build(self) -> Result<AgentHandle> {
        let agent_id = self.agent_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if agent_id.trim().is_empty() {
            return Err(AgentwireError::Validation("Agent id is empty".into()));
        }
        if self.engine.get(&agent_id).is_some() {
            return Err(AgentwireError::Validation(format!("Agent id already in use: {agent_id}")));
        }

        let model = self.model.unwrap_or_else(|| self.engine.config.model());
        let runtime = AgentRuntime::start(
            agent_id.clone(),
            model,
            self.engine.config.orphan_policy(),
            self.engine.driver.clone(),
            self.reactors,
        )?;

        {
            let mut agents = lock(&self.engine.agents);
            if agents.contains_key(&agent_id) {
                drop(agents);
                runtime.abandon();
                return Err(AgentwireError::Validation(format!("Agent id already in use: {agent_id}")));
            }
            agents.insert(agent_id.clone(), Arc::new(runtime));
        }

        info!(%agent_id, "Agent created");
        Ok(AgentHandle::new(agent_id, Arc::downgrade(&self.engine)))
    }
}

pub(crate) type EngineRef = Weak<EngineInner>;
