//! JSON wire format shared with every producer and consumer on the chat topic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parley_core::domain::message::{Message, MessageId, MessageKind};
use parley_core::errors::DomainError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("envelope rejected: {0}")]
    Invalid(#[from] DomainError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("could not encode message `{message_id}`: {reason}")]
pub struct EncodeError {
    pub message_id: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: WireMetadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply_to: String,
    /// Human-readable sender name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_agent: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

impl From<&Message> for WireEnvelope {
    fn from(message: &Message) -> Self {
        let sender = message.sender_id.to_string();
        let (agent_id, user_id) = match message.kind {
            MessageKind::Agent => (sender, String::new()),
            MessageKind::User | MessageKind::System | MessageKind::Context => {
                (String::new(), sender)
            }
        };

        Self {
            id: message.id.to_string(),
            kind: message.kind,
            content: message.text.clone(),
            agent_id,
            user_id,
            timestamp: message.timestamp,
            metadata: WireMetadata {
                conversation_id: message.conversation_id.to_string(),
                reply_to: message.reply_to.as_ref().map(ToString::to_string).unwrap_or_default(),
                from_agent: message.display_name.clone().unwrap_or_default(),
                tags: message.tags.iter().cloned().collect(),
                custom: message.custom.clone(),
            },
        }
    }
}

impl WireEnvelope {
    /// Agent messages are attributed to `agent_id`, everything else to `user_id`; whichever is
    /// empty falls back to the other.
    fn sender(&self) -> &str {
        let (primary, secondary) = match self.kind {
            MessageKind::Agent => (&self.agent_id, &self.user_id),
            MessageKind::User | MessageKind::System | MessageKind::Context => {
                (&self.user_id, &self.agent_id)
            }
        };
        if primary.trim().is_empty() {
            secondary
        } else {
            primary
        }
    }

    pub fn into_message(self) -> Result<Message, DecodeError> {
        let id = if self.id.trim().is_empty() {
            MessageId::generate()
        } else {
            MessageId(self.id.clone())
        };
        let sender = self.sender().to_owned();

        let mut message =
            Message::new(self.kind, self.metadata.conversation_id, sender, self.content);
        message.id = id;
        message.timestamp = self.timestamp;
        if !self.metadata.reply_to.trim().is_empty() {
            message.reply_to = Some(self.metadata.reply_to.into());
        }
        if !self.metadata.from_agent.trim().is_empty() {
            message.display_name = Some(self.metadata.from_agent);
        }
        message.tags = self.metadata.tags.into_iter().collect();
        message.custom = self.metadata.custom;

        message.validate()?;
        Ok(message)
    }
}

pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(&WireEnvelope::from(message)).map_err(|error| EncodeError {
        message_id: message.id.to_string(),
        reason: error.to_string(),
    })
}

pub fn decode(payload: &[u8]) -> Result<Message, DecodeError> {
    let envelope = serde_json::from_slice::<WireEnvelope>(payload)
        .map_err(|error| DecodeError::Malformed(error.to_string()))?;
    envelope.into_message()
}

#[cfg(test)]
mod tests {
    use parley_core::domain::message::{Message, MessageKind, ParticipantId};
    use parley_core::errors::DomainError;

    use super::{decode, encode, DecodeError};

    #[test]
    fn decodes_agent_envelope_from_external_producer() {
        let payload = br#"{
            "id": "msg-1",
            "type": "agent",
            "content": "Interesting point!",
            "agent_id": "agent-7",
            "timestamp": "2026-03-01T10:15:30.123456789Z",
            "metadata": {
                "conversation_id": "main-conversation",
                "reply_to": "user",
                "from_agent": "Socrates",
                "tags": ["debate"],
                "custom": {"relevance": "high"}
            }
        }"#;

        let message = decode(payload).expect("valid envelope");

        assert_eq!(message.id.as_str(), "msg-1");
        assert_eq!(message.kind, MessageKind::Agent);
        assert_eq!(message.sender_id.as_str(), "agent-7");
        assert_eq!(message.reply_to, Some(ParticipantId::from("user")));
        assert_eq!(message.display_name.as_deref(), Some("Socrates"));
        assert!(message.tags.contains("debate"));
        assert_eq!(message.custom.get("relevance").map(String::as_str), Some("high"));
    }

    #[test]
    fn user_envelope_without_user_id_falls_back_to_agent_id() {
        let payload = br#"{"id":"m","type":"user","content":"hi","agent_id":"web-user",
            "timestamp":"2026-03-01T10:15:30Z","metadata":{"conversation_id":"c"}}"#;

        let message = decode(payload).expect("fallback sender");
        assert_eq!(message.sender_id.as_str(), "web-user");
    }

    #[test]
    fn rejects_envelopes_without_conversation_or_sender() {
        let no_conversation =
            br#"{"id":"m-1","type":"user","content":"hi","user_id":"u","metadata":{}}"#;
        assert_eq!(
            decode(no_conversation),
            Err(DecodeError::Invalid(DomainError::MissingConversationId {
                message_id: "m-1".to_owned()
            }))
        );

        let no_sender =
            br#"{"id":"m-2","type":"user","content":"hi","metadata":{"conversation_id":"c"}}"#;
        assert_eq!(
            decode(no_sender),
            Err(DecodeError::Invalid(DomainError::MissingSenderId {
                message_id: "m-2".to_owned()
            }))
        );
    }

    #[test]
    fn garbage_and_unknown_kinds_are_malformed() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode(br#"{"id":"m","type":"shout","content":"hi"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn encoded_agent_reply_uses_agent_id_and_from_agent() {
        let message = Message::new(MessageKind::Agent, "main-conversation", "agent-1", "Sure!")
            .with_display_name("Ada");

        let payload = encode(&message).expect("encodable");
        let json: serde_json::Value = serde_json::from_slice(&payload).expect("json");

        assert_eq!(json["type"], "agent");
        assert_eq!(json["agent_id"], "agent-1");
        assert!(json.get("user_id").is_none());
        assert_eq!(json["metadata"]["from_agent"], "Ada");
        assert_eq!(json["metadata"]["conversation_id"], "main-conversation");

        let decoded = decode(&payload).expect("decodable");
        assert_eq!(decoded, message);
    }
}
