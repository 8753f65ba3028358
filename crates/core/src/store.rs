//! In-memory conversation registry.
//!
//! The outer map lock is only held long enough to find or insert a conversation slot; every
//! mutation then happens under that conversation's own lock, so unrelated conversations never
//! contend with each other. Callers only ever receive clones.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::domain::conversation::{Conversation, ConversationStats, Participant};
use crate::domain::message::{ConversationId, Message, MessageId, ParticipantId};

type Slot = Arc<RwLock<Conversation>>;

#[derive(Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<ConversationId, Slot>>,
    roster: RwLock<BTreeMap<ParticipantId, Participant>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, conversation_id: &ConversationId) -> Conversation {
        let slot = self.slot(conversation_id);
        let conversation = read(&slot);
        conversation.clone()
    }

    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        read(&self.conversations).contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        read(&self.conversations).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&self, conversation_id: &ConversationId, message: Message) {
        let slot = self.slot(conversation_id);
        let mut conversation = write(&slot);
        let seen_at = Utc::now();
        if let Some(participant) = conversation.participants.get_mut(&message.sender_id) {
            participant.touch(seen_at);
        }
        conversation.history.push(message);
        conversation.mark_updated();
    }

    /// The last `limit` messages in arrival order, oldest first.
    pub fn recent(&self, conversation_id: &ConversationId, limit: usize) -> Vec<Message> {
        if limit == 0 {
            return Vec::new();
        }
        let Some(slot) = self.existing_slot(conversation_id) else {
            return Vec::new();
        };
        let conversation = read(&slot);
        let start = conversation.history.len().saturating_sub(limit);
        conversation.history[start..].to_vec()
    }

    pub fn set_topic(&self, conversation_id: &ConversationId, topic: impl Into<String>) {
        let slot = self.slot(conversation_id);
        let mut conversation = write(&slot);
        conversation.topic = Some(topic.into());
        conversation.mark_updated();
    }

    pub fn set_mood(&self, conversation_id: &ConversationId, mood: impl Into<String>) {
        let slot = self.slot(conversation_id);
        let mut conversation = write(&slot);
        conversation.mood = Some(mood.into());
        conversation.mark_updated();
    }

    pub fn active_participants(&self, conversation_id: &ConversationId) -> Vec<Participant> {
        let Some(slot) = self.existing_slot(conversation_id) else {
            return Vec::new();
        };
        let conversation = read(&slot);
        conversation
            .participants
            .values()
            .filter(|participant| participant.active)
            .cloned()
            .collect()
    }

    pub fn participant(
        &self,
        conversation_id: &ConversationId,
        participant_id: &ParticipantId,
    ) -> Option<Participant> {
        let slot = self.existing_slot(conversation_id)?;
        let conversation = read(&slot);
        conversation.participants.get(participant_id).cloned()
    }

    /// Inserts the participant only if the conversation has not seen it yet.
    /// Returns `true` when a new roster entry was created.
    pub fn ensure_participant(
        &self,
        conversation_id: &ConversationId,
        participant: Participant,
    ) -> bool {
        let slot = self.slot(conversation_id);
        let mut conversation = write(&slot);
        if conversation.participants.contains_key(&participant.id) {
            return false;
        }
        conversation.participants.insert(participant.id.clone(), participant);
        conversation.mark_updated();
        true
    }

    /// Session-wide registration: the participant joins every existing conversation and is
    /// seeded into conversations created later.
    pub fn register_participant(&self, participant: Participant) {
        write(&self.roster).insert(participant.id.clone(), participant.clone());

        let slots = read(&self.conversations).values().cloned().collect::<Vec<_>>();
        for slot in slots {
            let mut conversation = write(&slot);
            upsert_registered(&mut conversation, participant.clone());
        }
    }

    pub fn registered_participants(&self) -> Vec<Participant> {
        read(&self.roster).values().cloned().collect()
    }

    /// Deactivates or reactivates a participant. Participants are never removed.
    pub fn set_active(
        &self,
        conversation_id: &ConversationId,
        participant_id: &ParticipantId,
        active: bool,
    ) -> bool {
        let Some(slot) = self.existing_slot(conversation_id) else {
            return false;
        };
        let mut conversation = write(&slot);
        let Some(participant) = conversation.participants.get_mut(participant_id) else {
            return false;
        };
        participant.active = active;
        conversation.mark_updated();
        true
    }

    /// `None` for conversations nobody has written to; reads never create one.
    pub fn stats(&self, conversation_id: &ConversationId) -> Option<ConversationStats> {
        let slot = self.existing_slot(conversation_id)?;
        let conversation = read(&slot);
        Some(conversation.stats())
    }

    /// Searches newest first, since callers ask about messages they just published.
    pub fn contains_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> bool {
        let Some(slot) = self.existing_slot(conversation_id) else {
            return false;
        };
        let conversation = read(&slot);
        conversation.history.iter().rev().any(|message| &message.id == message_id)
    }

    /// Drops every conversation. Operations already holding a conversation slot finish against
    /// their own handle before the memory is released.
    pub fn teardown(&self) -> usize {
        let mut conversations = write(&self.conversations);
        let released = conversations.len();
        conversations.clear();
        released
    }

    fn existing_slot(&self, conversation_id: &ConversationId) -> Option<Slot> {
        read(&self.conversations).get(conversation_id).cloned()
    }

    fn slot(&self, conversation_id: &ConversationId) -> Slot {
        if let Some(slot) = self.existing_slot(conversation_id) {
            return slot;
        }

        let mut conversations = write(&self.conversations);
        conversations
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                let mut conversation = Conversation::new(conversation_id.clone());
                for participant in read(&self.roster).values() {
                    conversation.participants.insert(participant.id.clone(), participant.clone());
                }
                Arc::new(RwLock::new(conversation))
            })
            .clone()
    }
}

fn upsert_registered(conversation: &mut Conversation, mut participant: Participant) {
    if let Some(existing) = conversation.participants.get(&participant.id) {
        participant.touch(existing.last_seen);
    }
    conversation.participants.insert(participant.id.clone(), participant);
    conversation.mark_updated();
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
