use std::sync::Arc;
use std::time::Duration;

use parley_agent::{AgentFleet, DrawSource, FleetError};
use parley_bus::{
    BusConsumer, BusTransport, ConsumerExit, InMemoryBus, ReconnectPolicy, TransportError,
};
use parley_core::audit::{AuditSink, TracingAuditSink};
use parley_core::classifier::Classifier;
use parley_core::config::AppConfig;
use parley_core::flow::FlowCoordinator;
use parley_core::store::ConversationStore;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub bus: InMemoryBus,
    pub coordinator: Arc<FlowCoordinator>,
    pub fleet: AgentFleet,
    ingress: Option<IngressWorker>,
}

struct IngressWorker {
    cancel: CancellationToken,
    handle: JoinHandle<ConsumerExit>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error("ingress subscription failed: {0}")]
    Ingress(#[source] TransportError),
}

/// Wires store, coordinator, bus and fleet without subscribing anything yet.
pub fn bootstrap_with_config(
    config: AppConfig,
    draws: Arc<dyn DrawSource>,
) -> Result<Application, BootstrapError> {
    bootstrap_with_audit(config, draws, Arc::new(TracingAuditSink))
}

pub fn bootstrap_with_audit(
    config: AppConfig,
    draws: Arc<dyn DrawSource>,
    audit: Arc<dyn AuditSink>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        agents_configured = config.agents.len(),
        "starting application bootstrap"
    );

    let store = Arc::new(ConversationStore::new());
    let coordinator = Arc::new(
        FlowCoordinator::new(store, Classifier::default()).with_audit_sink(audit.clone()),
    );
    let bus = InMemoryBus::with_capacity(config.bus.channel_capacity);
    let transport: Arc<dyn BusTransport> = Arc::new(bus.clone());
    let fleet = AgentFleet::from_config(&config, &coordinator, transport, draws, Some(audit))?;

    info!(
        event_name = "system.bootstrap.fleet_ready",
        correlation_id = "bootstrap",
        agents = fleet.len(),
        "agent fleet ready"
    );

    Ok(Application { config, bus, coordinator, fleet, ingress: None })
}

impl Application {
    pub fn transport(&self) -> Arc<dyn BusTransport> {
        Arc::new(self.bus.clone())
    }

    /// Subscribes ingress first, then every agent. Anything published after this returns is seen
    /// by all of them.
    pub async fn start(&mut self) -> Result<(), BootstrapError> {
        if self.ingress.is_none() {
            let consumer = BusConsumer::new(
                self.transport(),
                self.config.bus.topic.clone(),
                self.config.bus.ingress_consumer.clone(),
                ReconnectPolicy::from(&self.config.bus),
            );
            let subscription = consumer.subscribe().await.map_err(BootstrapError::Ingress)?;
            let cancel = consumer.cancellation_token();
            let coordinator = self.coordinator.clone();
            let handle = tokio::spawn(async move {
                consumer.run_with(Some(subscription), coordinator.as_ref()).await
            });
            self.ingress = Some(IngressWorker { cancel, handle });
        }

        let agents = self.fleet.start_all().await?;
        info!(
            event_name = "system.bootstrap.started",
            correlation_id = "bootstrap",
            topic = %self.config.bus.topic,
            agents,
            "ingress and agents subscribed"
        );
        Ok(())
    }

    /// Stops the agents, then closes the bus. Ingress keeps reading until the closed stream runs
    /// dry, so every record published before the close is applied before the store is released.
    /// Ingress is cancelled only if draining outlasts the graceful window.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let grace = Duration::from_secs(self.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, self.fleet.shutdown()).await.is_err() {
            warn!(
                event_name = "system.shutdown.agents_timed_out",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "agents did not stop within the graceful window"
            );
        }

        self.bus.shutdown();
        let ingress = match self.ingress.take() {
            Some(mut worker) => match tokio::time::timeout(grace, &mut worker.handle).await {
                Ok(Ok(exit)) => Some(exit),
                Ok(Err(error)) => {
                    warn!(
                        event_name = "system.shutdown.ingress_failed",
                        correlation_id = "shutdown",
                        error = %error,
                        "ingress worker ended abnormally"
                    );
                    None
                }
                Err(_) => {
                    warn!(
                        event_name = "system.shutdown.ingress_timed_out",
                        correlation_id = "shutdown",
                        grace_secs = grace.as_secs(),
                        "ingress did not drain within the graceful window"
                    );
                    worker.cancel.cancel();
                    None
                }
            },
            None => None,
        };

        let conversations_released = self.coordinator.store().teardown();
        info!(
            event_name = "system.shutdown.complete",
            correlation_id = "shutdown",
            conversations_released,
            "application stopped"
        );
        ShutdownReport { ingress, conversations_released }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    pub ingress: Option<ConsumerExit>,
    pub conversations_released: usize,
}
