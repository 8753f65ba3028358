use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::message::{ConversationId, Message, MessageKind, ParticipantId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    User,
    Agent,
    System,
}

impl From<MessageKind> for ParticipantRole {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::User => Self::User,
            MessageKind::Agent => Self::Agent,
            MessageKind::System | MessageKind::Context => Self::System,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub role: ParticipantRole,
    pub active: bool,
    pub last_seen: DateTime<Utc>,
    pub capabilities: BTreeSet<String>,
    pub personality: Option<String>,
}

impl Participant {
    pub fn new(
        id: impl Into<ParticipantId>,
        display_name: impl Into<String>,
        role: ParticipantRole,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
            active: true,
            last_seen: Utc::now(),
            capabilities: BTreeSet::new(),
            personality: None,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_personality(mut self, personality: Option<String>) -> Self {
        self.personality = personality;
        self
    }

    /// Moves `last_seen` forward, never backward.
    pub fn touch(&mut self, seen_at: DateTime<Utc>) {
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: BTreeMap<ParticipantId, Participant>,
    pub history: Vec<Message>,
    pub topic: Option<String>,
    pub mood: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            participants: BTreeMap::new(),
            history: Vec::new(),
            topic: None,
            mood: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn mark_updated(&mut self) {
        let now = Utc::now();
        self.updated_at = now.max(self.created_at).max(self.updated_at);
    }

    pub fn stats(&self) -> ConversationStats {
        ConversationStats {
            conversation_id: self.id.clone(),
            participant_count: self.participants.len(),
            message_count: self.history.len(),
            topic: self.topic.clone(),
            mood: self.mood.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub conversation_id: ConversationId,
    pub participant_count: usize,
    pub message_count: usize,
    pub topic: Option<String>,
    pub mood: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
