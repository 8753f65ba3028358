use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parley_agent::{AgentFleet, DrawSource, SeededDraws};
use parley_bus::{BusConsumer, BusPublisher, BusTransport, InMemoryBus, ReconnectPolicy};
use parley_core::audit::{AuditSink, InMemoryAuditSink};
use parley_core::classifier::Classifier;
use parley_core::config::{AgentConfig, AppConfig, LlmProvider, LoadOptions};
use parley_core::domain::message::{ConversationId, Message, MessageKind};
use parley_core::flow::FlowCoordinator;
use parley_core::store::ConversationStore;
use serde::Serialize;

use crate::commands::{serialization_failure, CommandResult};

const OPERATOR_ID: &str = "operator";
const DEFAULT_OPENER: &str = "Hello everyone! What do you think about programming?";

#[derive(Clone, Debug)]
pub struct SimulateOptions {
    pub seed: u64,
    pub pacing_ms: u64,
    pub settle_ms: u64,
    pub messages: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    command: &'static str,
    status: &'static str,
    seed: u64,
    conversation_id: String,
    topic: Option<String>,
    mood: Option<String>,
    message_count: usize,
    participant_count: usize,
    replies_published: usize,
    replies_suppressed: usize,
    transcript: Vec<TranscriptLine>,
}

#[derive(Debug, Serialize)]
struct TranscriptLine {
    kind: &'static str,
    sender: String,
    text: String,
}

/// Runs ingress and a template-backed fleet against an in-memory bus. Model backends in the
/// loaded config are ignored; an empty roster is replaced by a small default cast.
pub fn run(options: LoadOptions, simulate: &SimulateOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("simulate", "config_validation", error.to_string(), 2)
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "simulate",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        }
    };

    match runtime.block_on(simulate_conversation(config, simulate)) {
        Ok(report) => CommandResult {
            exit_code: 0,
            output: serde_json::to_string_pretty(&report)
                .unwrap_or_else(|error| serialization_failure(&error)),
        },
        Err(error) => CommandResult::failure("simulate", "simulation", format!("{error:#}"), 4),
    }
}

fn default_cast() -> Vec<AgentConfig> {
    [
        ("agent-iris", "Iris", "curious"),
        ("agent-ada", "Ada", "technical"),
        ("agent-milo", "Milo", "social"),
    ]
    .into_iter()
    .map(|(id, name, personality)| {
        let mut agent = AgentConfig::new(id, personality);
        agent.name = Some(name.to_string());
        agent
    })
    .collect()
}

async fn simulate_conversation(
    mut config: AppConfig,
    simulate: &SimulateOptions,
) -> anyhow::Result<SimulationReport> {
    config.llm.provider = LlmProvider::Template;
    config.runtime.pacing_delay_ms = simulate.pacing_ms;
    if config.enabled_agents().next().is_none() {
        config.agents = default_cast();
    }

    let draws: Arc<dyn DrawSource> = Arc::new(SeededDraws::new(simulate.seed));
    let audit = Arc::new(InMemoryAuditSink::default());
    let sink: Arc<dyn AuditSink> = audit.clone();
    let store = Arc::new(ConversationStore::new());
    let coordinator = Arc::new(
        FlowCoordinator::new(store.clone(), Classifier::default()).with_audit_sink(sink.clone()),
    );
    let bus = InMemoryBus::with_capacity(config.bus.channel_capacity);
    let transport: Arc<dyn BusTransport> = Arc::new(bus.clone());

    let fleet =
        AgentFleet::from_config(&config, &coordinator, transport.clone(), draws, Some(sink))
            .context("building the agent fleet")?;

    let ingress = BusConsumer::new(
        transport.clone(),
        config.bus.topic.clone(),
        config.bus.ingress_consumer.clone(),
        ReconnectPolicy::from(&config.bus),
    );
    let subscription = ingress.subscribe().await.context("subscribing ingress")?;
    let ingress_task = {
        let coordinator = coordinator.clone();
        tokio::spawn(
            async move { ingress.run_with(Some(subscription), coordinator.as_ref()).await },
        )
    };
    fleet.start_all().await.context("starting agents")?;

    let conversation_id = ConversationId::from(config.conversation.default_id.as_str());
    let publisher = BusPublisher::new(transport, config.bus.topic.clone());
    let messages = if simulate.messages.is_empty() {
        vec![DEFAULT_OPENER.to_string()]
    } else {
        simulate.messages.clone()
    };
    for text in messages {
        let message =
            Message::new(MessageKind::User, conversation_id.clone(), OPERATOR_ID, text);
        publisher.publish(&message).await.context("publishing operator message")?;
        tokio::time::sleep(Duration::from_millis(simulate.settle_ms)).await;
    }

    // Closing the bus ends the ingress stream once every reply already published is applied.
    fleet.shutdown().await;
    bus.shutdown();
    ingress_task.await.context("joining ingress")?;

    let stats = coordinator.stats(&conversation_id)?;
    let transcript = store
        .recent(&conversation_id, stats.message_count)
        .into_iter()
        .map(|message| TranscriptLine {
            kind: message.kind.as_str(),
            sender: message.sender_label().to_string(),
            text: message.text,
        })
        .collect();

    Ok(SimulationReport {
        command: "simulate",
        status: "ok",
        seed: simulate.seed,
        conversation_id: stats.conversation_id.to_string(),
        topic: stats.topic,
        mood: stats.mood,
        message_count: stats.message_count,
        participant_count: stats.participant_count,
        replies_published: audit.events_of_type("agent.reply.published").len(),
        replies_suppressed: audit.events_of_type("agent.decision.suppressed").len(),
        transcript,
    })
}
