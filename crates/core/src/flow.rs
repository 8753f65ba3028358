//! Single ingress path for the canonical stream.
//!
//! Every message seen on the bus passes through [`FlowCoordinator::on_message`] exactly once per
//! delivery: it is validated, appended to its conversation, classified, and its sender is added to
//! the roster if this is the first time the conversation hears from them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::classifier::Classifier;
use crate::domain::conversation::{ConversationStats, Participant, ParticipantRole};
use crate::domain::message::{ConversationId, Message, MessageId, ParticipantId};
use crate::errors::DomainError;
use crate::store::ConversationStore;

const ACTOR: &str = "flow-coordinator";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowOutcome {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub topic: Option<String>,
    pub mood: Option<String>,
    pub sender_registered: bool,
}

pub struct FlowCoordinator {
    store: Arc<ConversationStore>,
    classifier: Classifier,
    audit: Arc<dyn AuditSink>,
}

impl FlowCoordinator {
    pub fn new(store: Arc<ConversationStore>, classifier: Classifier) -> Self {
        Self { store, classifier, audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn on_message(&self, message: &Message) -> Result<FlowOutcome, DomainError> {
        if let Err(error) = message.validate() {
            warn!(
                event_name = "ingress.flow.message_rejected",
                correlation_id = %message.id,
                error = %error,
                "message rejected at ingress"
            );
            self.audit.emit(
                AuditEvent::new(
                    None,
                    message.id.as_str(),
                    "ingress.message_rejected",
                    AuditCategory::Ingress,
                    ACTOR,
                    AuditOutcome::Rejected,
                )
                .with_metadata("error", error.to_string()),
            );
            return Err(error);
        }

        let conversation_id = &message.conversation_id;
        self.store.append(conversation_id, message.clone());

        // Absent labels never clear what an earlier message established.
        let topic = self.classifier.detect_topic(&message.text).map(str::to_owned);
        if let Some(topic) = &topic {
            self.store.set_topic(conversation_id, topic.clone());
        }
        let mood = self.classifier.detect_mood(&message.text).map(str::to_owned);
        if let Some(mood) = &mood {
            self.store.set_mood(conversation_id, mood.clone());
        }

        let sender = Participant::new(
            message.sender_id.clone(),
            message.sender_label(),
            ParticipantRole::from(message.kind),
        );
        let sender_registered = self.store.ensure_participant(conversation_id, sender);
        if sender_registered {
            debug!(
                event_name = "ingress.flow.participant_joined",
                conversation_id = %conversation_id,
                participant_id = %message.sender_id,
                role = message.kind.as_str(),
                "new participant joined conversation"
            );
        }

        info!(
            event_name = "ingress.flow.message_applied",
            correlation_id = %message.id,
            conversation_id = %conversation_id,
            sender_id = %message.sender_id,
            kind = message.kind.as_str(),
            topic = topic.as_deref().unwrap_or("-"),
            mood = mood.as_deref().unwrap_or("-"),
            "message applied to conversation"
        );

        let mut event = AuditEvent::for_message(
            message,
            "ingress.message_applied",
            AuditCategory::Ingress,
            &ParticipantId::from(ACTOR),
            AuditOutcome::Success,
        )
        .with_metadata("sender_id", message.sender_id.as_str())
        .with_metadata("kind", message.kind.as_str());
        if let Some(topic) = &topic {
            event = event.with_metadata("topic", topic.clone());
        }
        if let Some(mood) = &mood {
            event = event.with_metadata("mood", mood.clone());
        }
        self.audit.emit(event);

        Ok(FlowOutcome {
            conversation_id: conversation_id.clone(),
            message_id: message.id.clone(),
            topic,
            mood,
            sender_registered,
        })
    }

    /// Startup registration. The participant is visible in every conversation of the session.
    pub fn register_participant<I, S>(
        &self,
        id: impl Into<ParticipantId>,
        name: impl Into<String>,
        role: ParticipantRole,
        capabilities: I,
        personality: Option<String>,
    ) -> Participant
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let participant = Participant::new(id, name, role)
            .with_capabilities(capabilities)
            .with_personality(personality);
        info!(
            event_name = "ingress.flow.participant_registered",
            participant_id = %participant.id,
            role = ?participant.role,
            "participant registered"
        );
        self.store.register_participant(participant.clone());
        participant
    }

    pub fn set_active(
        &self,
        conversation_id: &ConversationId,
        participant_id: &ParticipantId,
        active: bool,
    ) -> bool {
        self.store.set_active(conversation_id, participant_id, active)
    }

    pub fn stats(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationStats, DomainError> {
        if conversation_id.is_blank() {
            return Err(DomainError::InvariantViolation(
                "conversation id must not be empty".to_owned(),
            ));
        }
        self.store.stats(conversation_id).ok_or_else(|| DomainError::ConversationNotFound {
            conversation_id: conversation_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::FlowCoordinator;
    use crate::audit::InMemoryAuditSink;
    use crate::classifier::Classifier;
    use crate::domain::conversation::ParticipantRole;
    use crate::domain::message::{ConversationId, Message, MessageKind, ParticipantId};
    use crate::errors::DomainError;
    use crate::store::ConversationStore;

    fn coordinator() -> (FlowCoordinator, InMemoryAuditSink) {
        let sink = InMemoryAuditSink::default();
        let coordinator =
            FlowCoordinator::new(Arc::new(ConversationStore::new()), Classifier::default())
                .with_audit_sink(Arc::new(sink.clone()));
        (coordinator, sink)
    }

    fn main_conversation() -> ConversationId {
        ConversationId::from("main-conversation")
    }

    #[test]
    fn on_message_appends_classifies_and_registers_sender() {
        let (coordinator, sink) = coordinator();
        let message = Message::new(
            MessageKind::User,
            "main-conversation",
            "user",
            "I wonder how this software works",
        );

        let outcome = coordinator.on_message(&message).expect("valid message");

        assert_eq!(outcome.topic.as_deref(), Some("technology"));
        assert_eq!(outcome.mood.as_deref(), Some("curious"));
        assert!(outcome.sender_registered);

        let stats = coordinator.stats(&main_conversation()).expect("stats");
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.participant_count, 1);
        assert_eq!(stats.topic.as_deref(), Some("technology"));
        assert_eq!(sink.events_of_type("ingress.message_applied").len(), 1);
    }

    #[test]
    fn unclassified_text_keeps_previous_metadata() {
        let (coordinator, _) = coordinator();
        let first = Message::new(MessageKind::User, "main-conversation", "user", "a recipe, wow");
        let second = Message::new(MessageKind::User, "main-conversation", "user", "zzz");

        coordinator.on_message(&first).expect("first");
        let outcome = coordinator.on_message(&second).expect("second");

        assert_eq!(outcome.topic, None);
        let stats = coordinator.stats(&main_conversation()).expect("stats");
        assert_eq!(stats.topic.as_deref(), Some("food"));
        assert_eq!(stats.mood.as_deref(), Some("excited"));
        assert_eq!(stats.message_count, 2);
    }

    #[test]
    fn sender_role_follows_message_kind() {
        let (coordinator, _) = coordinator();
        coordinator
            .on_message(&Message::new(MessageKind::Context, "main-conversation", "ctx", "note"))
            .expect("context message");
        coordinator
            .on_message(
                &Message::new(MessageKind::Agent, "main-conversation", "agent-1", "hi")
                    .with_display_name("Ada"),
            )
            .expect("agent message");

        let store = coordinator.store();
        let context = store
            .participant(&main_conversation(), &ParticipantId::from("ctx"))
            .expect("context sender");
        assert_eq!(context.role, ParticipantRole::System);

        let agent = store
            .participant(&main_conversation(), &ParticipantId::from("agent-1"))
            .expect("agent sender");
        assert_eq!(agent.role, ParticipantRole::Agent);
        assert_eq!(agent.display_name, "Ada");
    }

    #[test]
    fn repeat_sender_is_not_registered_twice() {
        let (coordinator, _) = coordinator();
        let message = Message::new(MessageKind::User, "main-conversation", "user", "hello");
        assert!(coordinator.on_message(&message).expect("first").sender_registered);
        assert!(!coordinator.on_message(&message).expect("second").sender_registered);
    }

    #[test]
    fn empty_text_is_accepted() {
        let (coordinator, _) = coordinator();
        let outcome = coordinator
            .on_message(&Message::new(MessageKind::User, "main-conversation", "user", ""))
            .expect("empty text is valid");
        assert_eq!(outcome.topic, None);
        assert_eq!(outcome.mood, None);
    }

    #[test]
    fn invalid_messages_never_reach_the_store() {
        let (coordinator, sink) = coordinator();
        let message = Message::new(MessageKind::User, "", "user", "hello").with_id("m-1");

        let error = coordinator.on_message(&message).expect_err("blank conversation id");

        assert_eq!(error, DomainError::MissingConversationId { message_id: "m-1".to_owned() });
        assert!(coordinator.store().is_empty());
        assert_eq!(sink.events_of_type("ingress.message_rejected").len(), 1);
    }

    #[test]
    fn registered_participants_appear_in_stats() {
        let (coordinator, _) = coordinator();
        coordinator.register_participant(
            "agent-1",
            "Ada",
            ParticipantRole::Agent,
            ["code"],
            Some("technical".to_owned()),
        );
        coordinator.store().get_or_create(&main_conversation());

        let stats = coordinator.stats(&main_conversation()).expect("stats");
        assert_eq!(stats.participant_count, 1);
        assert_eq!(stats.message_count, 0);
    }

    #[test]
    fn stats_for_unknown_conversation_is_not_found() {
        let (coordinator, _) = coordinator();
        assert_eq!(
            coordinator.stats(&ConversationId::from("typo")),
            Err(DomainError::ConversationNotFound { conversation_id: "typo".to_owned() })
        );
        assert!(coordinator.store().is_empty());
    }

    #[test]
    fn stats_rejects_blank_conversation_id() {
        let (coordinator, _) = coordinator();
        assert!(matches!(
            coordinator.stats(&ConversationId::from(" ")),
            Err(DomainError::InvariantViolation(_))
        ));
    }
}
