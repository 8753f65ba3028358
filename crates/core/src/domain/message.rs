use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(MessageId);
string_id!(ConversationId);
string_id!(ParticipantId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Agent,
    System,
    Context,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
            Self::Context => "context",
        }
    }
}

/// A single utterance on the canonical stream. Immutable once published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub text: String,
    pub sender_id: ParticipantId,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: ConversationId,
    pub reply_to: Option<ParticipantId>,
    pub display_name: Option<String>,
    pub tags: BTreeSet<String>,
    pub custom: BTreeMap<String, String>,
}

impl Message {
    pub fn new(
        kind: MessageKind,
        conversation_id: impl Into<ConversationId>,
        sender_id: impl Into<ParticipantId>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            kind,
            text: text.into(),
            sender_id: sender_id.into(),
            timestamp: Utc::now(),
            conversation_id: conversation_id.into(),
            reply_to: None,
            display_name: None,
            tags: BTreeSet::new(),
            custom: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_reply_to(mut self, participant_id: impl Into<ParticipantId>) -> Self {
        self.reply_to = Some(participant_id.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Name to show for the sender: the display name when present, otherwise the sender id.
    pub fn sender_label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.sender_id.as_str())
    }

    /// Boundary check applied before a message may enter the store.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.conversation_id.is_blank() {
            return Err(DomainError::MissingConversationId { message_id: self.id.0.clone() });
        }
        if self.sender_id.is_blank() {
            return Err(DomainError::MissingSenderId { message_id: self.id.0.clone() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessageKind};
    use crate::errors::DomainError;

    #[test]
    fn validate_rejects_blank_conversation_id() {
        let message = Message::new(MessageKind::User, "  ", "user", "hello").with_id("m-1");

        assert_eq!(
            message.validate(),
            Err(DomainError::MissingConversationId { message_id: "m-1".to_owned() })
        );
    }

    #[test]
    fn validate_rejects_blank_sender() {
        let message = Message::new(MessageKind::Agent, "main", "", "hello").with_id("m-2");

        assert_eq!(
            message.validate(),
            Err(DomainError::MissingSenderId { message_id: "m-2".to_owned() })
        );
    }

    #[test]
    fn empty_text_is_still_a_valid_message() {
        let message = Message::new(MessageKind::User, "main", "user", "");
        assert!(message.validate().is_ok());
    }

    #[test]
    fn sender_label_prefers_display_name() {
        let message = Message::new(MessageKind::Agent, "main", "agent-1", "hi");
        assert_eq!(message.sender_label(), "agent-1");

        let named = message.with_display_name("Ada");
        assert_eq!(named.sender_label(), "Ada");
    }
}
