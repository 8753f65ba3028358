use std::collections::BTreeSet;
use std::sync::Arc;

use parley_bus::BusTransport;
use parley_core::audit::{AuditSink, NoopAuditSink};
use parley_core::config::AppConfig;
use parley_core::domain::conversation::ParticipantRole;
use parley_core::flow::FlowCoordinator;
use thiserror::Error;
use tracing::info;

use crate::arbiter::{DrawSource, ResponseArbiter};
use crate::llm::{generator_from_config, GenerationError, TextGenerator};
use crate::profile::AgentProfile;
use crate::runtime::{AgentRuntime, RuntimeDeps, RuntimeError, RuntimeSettings};

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("agent id `{0}` is configured more than once")]
    DuplicateAgent(String),
    #[error("agent id must not be empty")]
    BlankAgentId,
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Every enabled `[[agents]]` entry as a runtime, sharing one arbiter and one generator.
pub struct AgentFleet {
    runtimes: Vec<Arc<AgentRuntime>>,
}

impl AgentFleet {
    /// Builds the fleet and registers each agent in the roster so stats list them before they
    /// ever speak.
    pub fn from_config(
        config: &AppConfig,
        coordinator: &FlowCoordinator,
        transport: Arc<dyn BusTransport>,
        draws: Arc<dyn DrawSource>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self, FleetError> {
        let generator = generator_from_config(&config.llm, draws.clone())?;
        Self::with_generator(config, coordinator, transport, draws, generator, audit)
    }

    pub fn with_generator(
        config: &AppConfig,
        coordinator: &FlowCoordinator,
        transport: Arc<dyn BusTransport>,
        draws: Arc<dyn DrawSource>,
        generator: Arc<dyn TextGenerator>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self, FleetError> {
        let arbiter = Arc::new(ResponseArbiter::new(config.arbiter.clone(), draws));
        let deps = RuntimeDeps::new(coordinator.store().clone(), arbiter, generator, transport)
            .with_audit_sink(audit.unwrap_or_else(|| Arc::new(NoopAuditSink)));

        let mut seen = BTreeSet::new();
        let mut runtimes = Vec::new();
        for agent in config.enabled_agents() {
            let id = agent.id.trim();
            if id.is_empty() {
                return Err(FleetError::BlankAgentId);
            }
            if !seen.insert(id.to_string()) {
                return Err(FleetError::DuplicateAgent(id.to_string()));
            }

            let profile = AgentProfile::from(agent);
            coordinator.register_participant(
                profile.id.clone(),
                profile.name.clone(),
                ParticipantRole::Agent,
                profile.capabilities.iter().cloned(),
                Some(profile.personality.to_string()),
            );
            let settings = RuntimeSettings::from_config(config, &profile.id);
            runtimes.push(Arc::new(AgentRuntime::new(profile, deps.clone(), settings)));
        }

        info!(
            event_name = "agent.fleet.built",
            agents = runtimes.len(),
            backend = deps.generator.backend(),
            "agent fleet built"
        );
        Ok(Self { runtimes })
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    pub fn runtimes(&self) -> &[Arc<AgentRuntime>] {
        &self.runtimes
    }

    pub fn profiles(&self) -> impl Iterator<Item = &AgentProfile> {
        self.runtimes.iter().map(|runtime| runtime.profile())
    }

    pub async fn start_all(&self) -> Result<usize, FleetError> {
        for runtime in &self.runtimes {
            runtime.start().await?;
        }
        Ok(self.runtimes.len())
    }

    /// Signals every runtime to stop. Returns how many were still running.
    pub fn stop_all(&self) -> usize {
        self.runtimes.iter().filter(|runtime| runtime.stop()).count()
    }

    /// Stops every runtime and waits for their workers.
    pub async fn shutdown(&self) {
        self.stop_all();
        for runtime in &self.runtimes {
            runtime.shutdown().await;
        }
    }
}
