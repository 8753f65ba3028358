pub mod audit;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flow;
pub mod store;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use classifier::{Classifier, KeywordTable};
pub use domain::conversation::{Conversation, ConversationStats, Participant, ParticipantRole};
pub use domain::message::{ConversationId, Message, MessageId, MessageKind, ParticipantId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flow::{FlowCoordinator, FlowOutcome};
pub use store::ConversationStore;
