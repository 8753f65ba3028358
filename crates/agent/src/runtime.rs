//! One agent's consume, decide, pace, compose and publish loop.
//!
//! ```text
//! Idle -> Evaluating -> Suppressed -> Idle
//!                    -> Composing -> Publishing -> Idle
//! (any) -> Stopped
//! ```
//!
//! Messages are handled one at a time per runtime, so a pending reply delays the next evaluation
//! of the same agent but never another agent's.
//!
//! The store only learns about a reply once ingress applies it, so each runtime also remembers
//! the replies it published that the store has not caught up with yet. Those count towards the
//! anti-spam window as the newest entries.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use parley_bus::{
    BusConsumer, BusPublisher, BusTransport, ConsumerExit, HandlerError, MessageHandler,
    PublishError, ReconnectPolicy, TransportError,
};
use parley_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use parley_core::config::AppConfig;
use parley_core::domain::message::{ConversationId, Message, MessageKind, ParticipantId};
use parley_core::store::ConversationStore;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arbiter::{Decision, ResponseArbiter, StyleHint, Suppression};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::{GenerationError, GenerationRequest, TextGenerator};
use crate::profile::AgentProfile;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Idle,
    Evaluating,
    Suppressed,
    Composing,
    Publishing,
    Stopped,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("agent `{0}` has been stopped and cannot be restarted")]
    Stopped(String),
    #[error("agent could not subscribe to the bus: {0}")]
    Subscribe(#[from] TransportError),
}

/// How one handled message ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplyOutcome {
    Suppressed(Suppression),
    Published(Message),
    /// Stopped while the reply was pending.
    Abandoned,
    GenerationFailed(GenerationError),
    Refused { reason_code: &'static str },
    PublishFailed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub topic: String,
    pub consumer_group: String,
    pub reconnect: ReconnectPolicy,
    pub pacing_delay: Duration,
    pub personality_scaled_pacing: bool,
    pub context_limit: usize,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig, agent_id: &ParticipantId) -> Self {
        Self {
            topic: config.bus.topic.clone(),
            consumer_group: format!("{}{}", config.bus.consumer_prefix, agent_id),
            reconnect: ReconnectPolicy::from(&config.bus),
            pacing_delay: Duration::from_millis(config.runtime.pacing_delay_ms),
            personality_scaled_pacing: config.runtime.personality_scaled_pacing,
            context_limit: config.runtime.context_limit,
        }
    }
}

/// Collaborators shared by every runtime of a fleet.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub store: Arc<ConversationStore>,
    pub arbiter: Arc<ResponseArbiter>,
    pub generator: Arc<dyn TextGenerator>,
    pub transport: Arc<dyn BusTransport>,
    pub audit: Arc<dyn AuditSink>,
}

impl RuntimeDeps {
    pub fn new(
        store: Arc<ConversationStore>,
        arbiter: Arc<ResponseArbiter>,
        generator: Arc<dyn TextGenerator>,
        transport: Arc<dyn BusTransport>,
    ) -> Self {
        Self { store, arbiter, generator, transport, audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

pub struct AgentRuntime {
    profile: AgentProfile,
    deps: RuntimeDeps,
    settings: RuntimeSettings,
    guardrails: GuardrailPolicy,
    publisher: BusPublisher,
    state: watch::Sender<RuntimeState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<ConsumerExit>>>,
    unapplied_replies: std::sync::Mutex<HashMap<ConversationId, VecDeque<Message>>>,
}

impl AgentRuntime {
    pub fn new(profile: AgentProfile, deps: RuntimeDeps, settings: RuntimeSettings) -> Self {
        let publisher = BusPublisher::new(deps.transport.clone(), settings.topic.clone());
        let (state, _) = watch::channel(RuntimeState::Idle);
        Self {
            profile,
            deps,
            settings,
            guardrails: GuardrailPolicy::default(),
            publisher,
            state,
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            unapplied_replies: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RuntimeState::Stopped
    }

    pub async fn is_running(&self) -> bool {
        !self.is_stopped() && self.worker.lock().await.is_some()
    }

    /// Opens the agent's own subscription and spawns its worker. Calling it again while running
    /// is a no-op; a stopped runtime stays stopped.
    pub async fn start(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let mut worker = self.worker.lock().await;
        if self.is_stopped() {
            return Err(RuntimeError::Stopped(self.profile.id.to_string()));
        }
        if worker.is_some() {
            return Ok(());
        }

        let consumer = BusConsumer::new(
            self.deps.transport.clone(),
            self.settings.topic.clone(),
            self.settings.consumer_group.clone(),
            self.settings.reconnect.clone(),
        )
        .with_cancellation(self.cancel.clone());
        let subscription = consumer.subscribe().await?;

        let runtime = Arc::clone(self);
        *worker = Some(tokio::spawn(async move {
            let exit = consumer.run_with(Some(subscription), runtime.as_ref()).await;
            debug!(
                event_name = "agent.runtime.worker_exited",
                agent_id = %runtime.profile.id,
                exit = ?exit,
                "agent worker exited"
            );
            exit
        }));

        info!(
            event_name = "agent.runtime.started",
            agent_id = %self.profile.id,
            agent_name = %self.profile.name,
            personality = %self.profile.personality,
            consumer_group = %self.settings.consumer_group,
            "agent started"
        );
        Ok(())
    }

    /// Returns `true` only for the call that actually stopped the agent.
    pub fn stop(&self) -> bool {
        let previous = self.state.send_replace(RuntimeState::Stopped);
        self.cancel.cancel();
        if previous == RuntimeState::Stopped {
            return false;
        }
        info!(
            event_name = "agent.runtime.stopped",
            agent_id = %self.profile.id,
            interrupted_state = ?previous,
            "agent stopped"
        );
        true
    }

    /// Stops the agent and waits for its worker to finish.
    pub async fn shutdown(&self) -> Option<ConsumerExit> {
        self.stop();
        let handle = self.worker.lock().await.take()?;
        match handle.await {
            Ok(exit) => Some(exit),
            Err(error) => {
                warn!(
                    event_name = "agent.runtime.worker_panicked",
                    agent_id = %self.profile.id,
                    error = %error,
                    "agent worker did not finish cleanly"
                );
                None
            }
        }
    }

    /// Runs one message through the decision and, on "go", the reply pipeline.
    pub async fn process(&self, message: Message) -> ReplyOutcome {
        if !self.transition(RuntimeState::Evaluating) {
            return ReplyOutcome::Abandoned;
        }

        let history = self.decision_history(&message.conversation_id);
        let (style_hint, relevance) =
            match self.deps.arbiter.decide(&message, &self.profile, &history) {
                Decision::Respond { style_hint, relevance } => (style_hint, relevance),
                Decision::Suppress(suppression) => {
                    self.transition(RuntimeState::Suppressed);
                    debug!(
                        event_name = "agent.decision.suppressed",
                        correlation_id = %message.id,
                        conversation_id = %message.conversation_id,
                        agent_id = %self.profile.id,
                        reason = suppression.reason_code(),
                        "agent stays quiet"
                    );
                    self.audit(
                        &message,
                        "agent.decision.suppressed",
                        AuditCategory::Decision,
                        AuditOutcome::Rejected,
                        &[("reason", suppression.reason_code())],
                    );
                    self.transition(RuntimeState::Idle);
                    return ReplyOutcome::Suppressed(suppression);
                }
            };

        info!(
            event_name = "agent.decision.respond",
            correlation_id = %message.id,
            conversation_id = %message.conversation_id,
            agent_id = %self.profile.id,
            relevance = relevance.as_str(),
            "agent will reply"
        );
        self.audit(
            &message,
            "agent.decision.respond",
            AuditCategory::Decision,
            AuditOutcome::Success,
            &[("relevance", relevance.as_str())],
        );

        if !self.transition(RuntimeState::Composing) {
            return self.abandon(&message);
        }
        let delay = self.pacing_delay();
        tokio::select! {
            _ = self.cancel.cancelled() => return self.abandon(&message),
            _ = tokio::time::sleep(delay) => {}
        }
        if self.is_stopped() {
            return self.abandon(&message);
        }

        let request = self.generation_request(&message, style_hint);
        let generated = tokio::select! {
            _ = self.cancel.cancelled() => return self.abandon(&message),
            generated = self.deps.generator.generate(&request) => generated,
        };
        let draft = match generated {
            Ok(draft) => draft,
            Err(error) => {
                warn!(
                    event_name = "agent.generation.failed",
                    correlation_id = %message.id,
                    agent_id = %self.profile.id,
                    backend = self.deps.generator.backend(),
                    error = %error,
                    "reply generation failed; staying quiet"
                );
                self.audit(
                    &message,
                    "agent.generation.failed",
                    AuditCategory::Generation,
                    AuditOutcome::Failed,
                    &[("backend", self.deps.generator.backend())],
                );
                self.transition(RuntimeState::Idle);
                return ReplyOutcome::GenerationFailed(error);
            }
        };

        let verdict = self.guardrails.evaluate(&draft, &message, &self.profile.name);
        let Some(text) = verdict.publishable_text() else {
            let reason_code = match &verdict {
                GuardrailDecision::Deny { reason_code, .. } => *reason_code,
                GuardrailDecision::Allow { .. } | GuardrailDecision::Degrade { .. } => "refused",
            };
            info!(
                event_name = "agent.reply.refused",
                correlation_id = %message.id,
                agent_id = %self.profile.id,
                reason = reason_code,
                "drafted reply failed guardrails"
            );
            self.audit(
                &message,
                "agent.reply.refused",
                AuditCategory::Publish,
                AuditOutcome::Rejected,
                &[("reason", reason_code)],
            );
            self.transition(RuntimeState::Idle);
            return ReplyOutcome::Refused { reason_code };
        };

        if !self.transition(RuntimeState::Publishing) {
            return self.abandon(&message);
        }
        let reply = Message::new(
            MessageKind::Agent,
            message.conversation_id.clone(),
            self.profile.id.clone(),
            text,
        )
        .with_display_name(self.profile.name.clone());

        let outcome = match self.publisher.publish(&reply).await {
            Ok(()) => {
                info!(
                    event_name = "agent.reply.published",
                    correlation_id = %message.id,
                    reply_id = %reply.id,
                    conversation_id = %reply.conversation_id,
                    agent_id = %self.profile.id,
                    "agent reply published"
                );
                self.audit(
                    &message,
                    "agent.reply.published",
                    AuditCategory::Publish,
                    AuditOutcome::Success,
                    &[("reply_id", reply.id.as_str())],
                );
                self.remember_reply(&reply);
                ReplyOutcome::Published(reply)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.reply.publish_failed",
                    correlation_id = %message.id,
                    agent_id = %self.profile.id,
                    error = %error,
                    "agent reply could not be published"
                );
                let detail = match &error {
                    PublishError::Encode(_) => "encode",
                    PublishError::Transport(_) => "transport",
                };
                self.audit(
                    &message,
                    "agent.reply.publish_failed",
                    AuditCategory::Publish,
                    AuditOutcome::Failed,
                    &[("stage", detail)],
                );
                ReplyOutcome::PublishFailed(error.to_string())
            }
        };
        self.transition(RuntimeState::Idle);
        outcome
    }

    /// The stored tail of the conversation followed by this agent's own replies that ingress has
    /// not applied yet. Replies the store already holds are forgotten here.
    fn decision_history(&self, conversation_id: &ConversationId) -> Vec<Message> {
        let window = self.deps.arbiter.history_window();
        let mut history = self.deps.store.recent(conversation_id, window);
        let mut unapplied =
            self.unapplied_replies.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = unapplied.get_mut(conversation_id) {
            pending.retain(|reply| !self.deps.store.contains_message(conversation_id, &reply.id));
            history.extend(pending.iter().cloned());
            if pending.is_empty() {
                unapplied.remove(conversation_id);
            }
        }
        history
    }

    fn remember_reply(&self, reply: &Message) {
        let window = self.deps.arbiter.history_window();
        let mut unapplied =
            self.unapplied_replies.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = unapplied.entry(reply.conversation_id.clone()).or_default();
        pending.push_back(reply.clone());
        while pending.len() > window {
            pending.pop_front();
        }
    }

    fn pacing_delay(&self) -> Duration {
        if self.settings.personality_scaled_pacing {
            self.profile.personality.scale_pacing(self.settings.pacing_delay)
        } else {
            self.settings.pacing_delay
        }
    }

    fn generation_request(&self, trigger: &Message, style: StyleHint) -> GenerationRequest {
        GenerationRequest {
            speaker: self.profile.name.clone(),
            persona: self.profile.description.clone(),
            style,
            trigger: trigger.clone(),
            context: self.deps.store.recent(&trigger.conversation_id, self.settings.context_limit),
        }
    }

    /// `Stopped` is absorbing: once there, no other state is entered.
    fn transition(&self, next: RuntimeState) -> bool {
        let mut moved = false;
        self.state.send_if_modified(|state| {
            if *state == RuntimeState::Stopped || *state == next {
                moved = *state == next;
                return false;
            }
            *state = next;
            moved = true;
            true
        });
        moved
    }

    fn abandon(&self, message: &Message) -> ReplyOutcome {
        info!(
            event_name = "agent.reply.abandoned",
            correlation_id = %message.id,
            agent_id = %self.profile.id,
            "agent stopped before replying"
        );
        self.audit(
            message,
            "agent.reply.abandoned",
            AuditCategory::Publish,
            AuditOutcome::Rejected,
            &[],
        );
        ReplyOutcome::Abandoned
    }

    fn audit(
        &self,
        message: &Message,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, &str)],
    ) {
        let event = metadata.iter().fold(
            AuditEvent::for_message(message, event_type, category, &self.profile.id, outcome),
            |event, (key, value)| event.with_metadata(*key, *value),
        );
        self.deps.audit.emit(event);
    }
}

#[async_trait]
impl MessageHandler for AgentRuntime {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match self.process(message).await {
            ReplyOutcome::PublishFailed(error) => Err(HandlerError(error)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parley_bus::{BusPublisher, BusTransport, InMemoryBus, ReconnectPolicy, Subscription};
    use parley_core::audit::InMemoryAuditSink;
    use parley_core::config::ArbiterConfig;
    use parley_core::domain::message::{ConversationId, Message, MessageKind};
    use parley_core::store::ConversationStore;

    use super::{
        AgentRuntime, ReplyOutcome, RuntimeDeps, RuntimeError, RuntimeSettings, RuntimeState,
    };
    use crate::arbiter::{ResponseArbiter, ScriptedDraws, Suppression};
    use crate::llm::{GenerationError, GenerationRequest, TemplateTextGenerator, TextGenerator};
    use crate::profile::{AgentProfile, Personality};

    const TOPIC: &str = "chat-messages";

    struct FixedGenerator(Result<String, GenerationError>);

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        fn backend(&self) -> &'static str {
            "fixed"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
            self.0.clone()
        }
    }

    struct Harness {
        bus: InMemoryBus,
        store: Arc<ConversationStore>,
        audit: InMemoryAuditSink,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                bus: InMemoryBus::new(),
                store: Arc::new(ConversationStore::new()),
                audit: InMemoryAuditSink::default(),
            }
        }

        fn runtime(
            &self,
            profile: AgentProfile,
            draws: ScriptedDraws,
            generator: Arc<dyn TextGenerator>,
            pacing: Duration,
        ) -> Arc<AgentRuntime> {
            let draws = Arc::new(draws);
            let arbiter = Arc::new(ResponseArbiter::new(ArbiterConfig::default(), draws));
            let deps = RuntimeDeps::new(
                self.store.clone(),
                arbiter,
                generator,
                Arc::new(self.bus.clone()),
            )
            .with_audit_sink(Arc::new(self.audit.clone()));
            let settings = RuntimeSettings {
                topic: TOPIC.to_string(),
                consumer_group: format!("parley-agent-{}", profile.id),
                reconnect: ReconnectPolicy::default(),
                pacing_delay: pacing,
                personality_scaled_pacing: false,
                context_limit: 20,
            };
            Arc::new(AgentRuntime::new(profile, deps, settings))
        }

        async fn observer(&self) -> Box<dyn Subscription> {
            self.bus.subscribe(TOPIC, "observer").await.expect("observer subscription")
        }

        fn publisher(&self) -> BusPublisher {
            BusPublisher::new(Arc::new(self.bus.clone()), TOPIC)
        }
    }

    fn profile(id: &str, name: &str, probability: f64) -> AgentProfile {
        AgentProfile::new(id, name, Personality::default()).with_response_probability(probability)
    }

    fn template() -> Arc<dyn TextGenerator> {
        Arc::new(TemplateTextGenerator::new(Arc::new(ScriptedDraws::constant(0.0))))
    }

    async fn next_message(subscription: &mut Box<dyn Subscription>) -> Message {
        let payload = subscription.next_record().await.expect("read").expect("open stream");
        parley_bus::decode(&payload).expect("decodable record")
    }

    #[tokio::test(start_paused = true)]
    async fn two_willing_agents_both_publish_after_pacing() {
        let harness = Harness::new();
        let ada = harness.runtime(
            profile("agent-1", "Ada", 1.0),
            ScriptedDraws::constant(0.99),
            template(),
            Duration::from_secs(4),
        );
        let bo = harness.runtime(
            profile("agent-2", "Bo", 1.0),
            ScriptedDraws::constant(0.99),
            template(),
            Duration::from_secs(4),
        );
        let mut observer = harness.observer().await;
        ada.start().await.expect("start ada");
        bo.start().await.expect("start bo");

        let notice = Message::new(MessageKind::System, "main-conversation", "system", "welcome");
        harness.store.append(&notice.conversation_id, notice.clone());
        harness.publisher().publish(&notice).await.expect("publish notice");

        assert_eq!(next_message(&mut observer).await.id, notice.id);
        let mut authors = Vec::new();
        for _ in 0..2 {
            let reply = next_message(&mut observer).await;
            assert_eq!(reply.kind, MessageKind::Agent);
            assert_eq!(reply.conversation_id, ConversationId::from("main-conversation"));
            harness.store.append(&reply.conversation_id, reply.clone());
            authors.push(reply.sender_id.to_string());
        }
        authors.sort();
        assert_eq!(authors, vec!["agent-1".to_string(), "agent-2".to_string()]);
        assert_eq!(harness.audit.events_of_type("agent.reply.published").len(), 2);

        ada.shutdown().await;
        bo.shutdown().await;
        assert_eq!(ada.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn stopping_while_composing_publishes_nothing() {
        let harness = Harness::new();
        let runtime = harness.runtime(
            profile("agent-1", "Ada", 1.0),
            ScriptedDraws::constant(0.0),
            template(),
            Duration::from_secs(60),
        );
        let mut observer = harness.observer().await;
        let mut states = runtime.watch_state();
        runtime.start().await.expect("start");

        let trigger = Message::new(MessageKind::User, "main-conversation", "user", "anyone?");
        harness.publisher().publish(&trigger).await.expect("publish");
        states.wait_for(|state| *state == RuntimeState::Composing).await.expect("composing");

        assert!(runtime.stop());
        assert!(!runtime.stop());
        runtime.shutdown().await;

        assert_eq!(next_message(&mut observer).await.id, trigger.id);
        let quiet = tokio::time::timeout(Duration::from_millis(50), observer.next_record()).await;
        assert!(quiet.is_err(), "a stopped agent must not publish");
        assert_eq!(harness.audit.events_of_type("agent.reply.abandoned").len(), 1);
        assert_eq!(runtime.state(), RuntimeState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn process_publishes_agent_reply_with_display_name() {
        let harness = Harness::new();
        let runtime = harness.runtime(
            profile("agent-1", "Ada", 1.0).with_capabilities(["app"]),
            ScriptedDraws::constant(0.0),
            Arc::new(FixedGenerator(Ok("Ada: React is a solid pick.".to_string()))),
            Duration::from_secs(4),
        );
        let trigger =
            Message::new(MessageKind::User, "main-conversation", "user", "building an app");

        let outcome = runtime.process(trigger).await;

        let ReplyOutcome::Published(reply) = outcome else {
            panic!("expected a published reply, got {outcome:?}");
        };
        assert_eq!(reply.text, "React is a solid pick.");
        assert_eq!(reply.sender_id.as_str(), "agent-1");
        assert_eq!(reply.display_name.as_deref(), Some("Ada"));
        assert_eq!(runtime.state(), RuntimeState::Idle);
    }

    #[tokio::test]
    async fn replies_ingress_has_not_applied_still_count_towards_the_spam_cap() {
        let harness = Harness::new();
        let runtime = harness.runtime(
            profile("agent-1", "Ada", 1.0),
            ScriptedDraws::constant(0.0),
            template(),
            Duration::ZERO,
        );
        let conversation = ConversationId::from("main-conversation");
        let notice =
            |text: &str| Message::new(MessageKind::System, "main-conversation", "system", text);
        harness.store.append(
            &conversation,
            Message::new(MessageKind::Agent, "main-conversation", "agent-1", "earlier"),
        );
        let first = notice("first notice");
        harness.store.append(&conversation, first.clone());

        let outcome = runtime.process(first).await;
        let ReplyOutcome::Published(reply) = outcome else {
            panic!("expected a published reply, got {outcome:?}");
        };

        // Ingress lags: the reply is on the bus but not in the store yet.
        let second = notice("second notice");
        harness.store.append(&conversation, second.clone());
        assert_eq!(
            runtime.process(second).await,
            ReplyOutcome::Suppressed(Suppression::SpamCap { authored: 2, window: 5 })
        );

        harness.store.append(&conversation, reply);
        let own = harness
            .store
            .recent(&conversation, 5)
            .iter()
            .filter(|entry| entry.sender_id.as_str() == "agent-1")
            .count();
        assert_eq!(own, 2);

        // Once applied, the reply is counted from the store only.
        harness.store.append(&conversation, notice("third notice"));
        let fourth = notice("fourth notice");
        harness.store.append(&conversation, fourth.clone());
        assert!(matches!(runtime.process(fourth).await, ReplyOutcome::Published(_)));
    }

    #[tokio::test]
    async fn own_message_is_suppressed_without_pacing() {
        let harness = Harness::new();
        let runtime = harness.runtime(
            profile("agent-1", "Ada", 1.0),
            ScriptedDraws::constant(0.0),
            template(),
            Duration::from_secs(3_600),
        );
        let own = Message::new(MessageKind::Agent, "main-conversation", "agent-1", "hi");

        assert_eq!(
            runtime.process(own).await,
            ReplyOutcome::Suppressed(Suppression::OwnMessage)
        );
        assert_eq!(runtime.state(), RuntimeState::Idle);
        assert_eq!(harness.audit.events_of_type("agent.decision.suppressed").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_failure_produces_no_reply() {
        let harness = Harness::new();
        let runtime = harness.runtime(
            profile("agent-1", "Ada", 1.0),
            ScriptedDraws::constant(0.0),
            Arc::new(FixedGenerator(Err(GenerationError::Network("refused".to_string())))),
            Duration::from_secs(4),
        );
        let mut observer = harness.observer().await;
        let trigger = Message::new(MessageKind::System, "main-conversation", "system", "ping");

        let outcome = runtime.process(trigger).await;

        assert!(matches!(outcome, ReplyOutcome::GenerationFailed(GenerationError::Network(_))));
        assert_eq!(harness.audit.events_of_type("agent.generation.failed").len(), 1);
        let quiet = tokio::time::timeout(Duration::from_millis(50), observer.next_record()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn echoed_draft_is_refused() {
        let harness = Harness::new();
        let runtime = harness.runtime(
            profile("agent-1", "Ada", 1.0),
            ScriptedDraws::constant(0.0),
            Arc::new(FixedGenerator(Ok("ping".to_string()))),
            Duration::from_secs(4),
        );
        let trigger = Message::new(MessageKind::System, "main-conversation", "system", "ping");

        assert_eq!(
            runtime.process(trigger).await,
            ReplyOutcome::Refused { reason_code: "echoed_trigger" }
        );
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stopped_runtime_cannot_restart() {
        let harness = Harness::new();
        let runtime = harness.runtime(
            profile("agent-1", "Ada", 1.0),
            ScriptedDraws::constant(0.0),
            template(),
            Duration::from_secs(4),
        );

        runtime.start().await.expect("first start");
        runtime.start().await.expect("second start is a no-op");
        assert!(runtime.is_running().await);
        assert_eq!(harness.bus.subscriber_count(TOPIC), 1);

        runtime.shutdown().await;
        assert!(matches!(runtime.start().await, Err(RuntimeError::Stopped(_))));
        assert!(!runtime.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn personality_scaled_pacing_shortens_social_agents() {
        let harness = Harness::new();
        let social = AgentProfile::new("agent-3", "Sam", Personality::Social);
        let runtime = harness.runtime(
            social,
            ScriptedDraws::constant(0.0),
            template(),
            Duration::from_secs(4),
        );
        let mut settings = runtime.settings().clone();
        settings.personality_scaled_pacing = true;
        let profile = runtime.profile().clone();
        let deps = runtime.deps.clone();
        let scaled = AgentRuntime::new(profile, deps, settings);

        assert_eq!(scaled.pacing_delay(), Duration::from_secs(2));
        assert_eq!(runtime.pacing_delay(), Duration::from_secs(4));
    }
}
