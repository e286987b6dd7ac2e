use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::libs::core::errors::ChatError;
use crate::libs::core::models::{
    millis_to_datetime, system_clock, validate_body, Clock, ConversationKey, Message, UserId,
    UserProfile,
};
use crate::libs::feed::{ChangeFeed, LiveFeed, MessageListener, Subscription};
use crate::libs::storage::records::NewMessageRecord;
use crate::libs::storage::storage_traits::{MessageStore, ProfileStore, StoreError};

#[derive(Default)]
struct MemoryTables {
    messages: Vec<Message>,
    profiles: HashMap<UserId, String>,
    last_created_at: Option<i64>,
}

/// Non-durable store with the same ordering, validation and feed behaviour
/// as the SQLite backend. Rows live in commit order.
pub struct InMemoryStore {
    tables: Mutex<MemoryTables>,
    feed: LiveFeed,
    clock: Clock,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            tables: Mutex::new(MemoryTables::default()),
            feed: LiveFeed::new(),
            clock,
        }
    }

    pub fn feed(&self) -> &LiveFeed {
        &self.feed
    }

    pub fn message_count(&self) -> usize {
        self.tables().messages.len()
    }

    fn tables(&self) -> MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        body: &str,
    ) -> Result<Message, ChatError> {
        let body = validate_body(body)?.to_string();

        let mut tables = self.tables();
        let now = (self.clock)().timestamp_millis();
        let millis = tables.last_created_at.map_or(now, |last| now.max(last));
        let created_at = millis_to_datetime(millis).ok_or_else(|| {
            StoreError::Worker(format!("clock returned unusable time {}", millis))
        })?;

        let sequence = tables.messages.len() as i64 + 1;
        let message = NewMessageRecord::new(sender_id.clone(), receiver_id.clone(), body, created_at)
            .into_message(sequence);
        tables.messages.push(message.clone());
        tables.last_created_at = Some(millis);

        self.feed.publish(&message);
        debug!(message_id = %message.id, sequence, "Appended message");
        Ok(message)
    }

    async fn fetch_conversation(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<Message>, ChatError> {
        let conversation = ConversationKey::new(user_a, user_b);
        let tables = self.tables();
        // Insertion order already is (created_at, sequence) order.
        Ok(tables
            .messages
            .iter()
            .filter(|message| conversation.matches(message))
            .cloned()
            .collect())
    }

    async fn recent_conversations(&self, user: &UserId) -> Result<Vec<Message>, ChatError> {
        let tables = self.tables();
        let mut latest: HashMap<&UserId, &Message> = HashMap::new();
        for message in tables.messages.iter() {
            let peer = if &message.sender_id == user {
                &message.receiver_id
            } else if &message.receiver_id == user {
                &message.sender_id
            } else {
                continue;
            };
            latest.insert(peer, message);
        }

        let mut recent: Vec<Message> = latest.into_values().cloned().collect();
        recent.sort_by(|a, b| b.display_order(a));
        Ok(recent)
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn upsert_profile(&self, user_id: &UserId, display_name: &str) -> Result<(), ChatError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ChatError::Validation(
                "display name must not be empty".to_string(),
            ));
        }
        self.tables()
            .profiles
            .insert(user_id.clone(), display_name.to_string());
        Ok(())
    }

    async fn load_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>, ChatError> {
        Ok(self
            .tables()
            .profiles
            .get(user_id)
            .map(|display_name| UserProfile {
                user_id: user_id.clone(),
                display_name: display_name.clone(),
            }))
    }
}

#[async_trait]
impl ChangeFeed for InMemoryStore {
    async fn subscribe(
        &self,
        user_a: &UserId,
        user_b: &UserId,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Subscription, ChatError> {
        self.feed
            .subscribe_listener(ConversationKey::new(user_a, user_b), listener)
    }
}
