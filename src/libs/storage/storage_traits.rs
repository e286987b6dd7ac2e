use async_trait::async_trait;
use thiserror::Error;

use crate::libs::core::errors::ChatError;
use crate::libs::core::models::{Message, UserId, UserProfile};
use crate::libs::storage::records::{MessageRecord, NewMessageRecord, UserRecord};

pub trait Transactional {
    fn commit(self) -> Result<(), StoreError>;
}

/// Row-level access to the `messages` table inside one transaction.
pub trait MessageTable {
    fn insert_message(&mut self, record: &NewMessageRecord) -> Result<i64, StoreError>;

    fn select_conversation(
        &mut self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    fn select_latest_per_peer(&mut self, user: &UserId) -> Result<Vec<MessageRecord>, StoreError>;

    fn latest_created_at(&mut self) -> Result<Option<i64>, StoreError>;
}

pub trait UserTable {
    fn upsert_user(&mut self, record: &UserRecord) -> Result<(), StoreError>;
    fn load_user_by_id(&mut self, user_id: &UserId) -> Result<Option<UserRecord>, StoreError>;
}

pub trait SettingsTable {
    fn load_setting(&mut self, key: &str) -> Result<Option<String>, StoreError>;
    fn store_setting(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Durable append-only record of messages between user pairs.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Stores a trimmed, non-empty body and publishes the committed message
    /// on the store's live feed.
    async fn append(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        body: &str,
    ) -> Result<Message, ChatError>;

    /// Both directions of the pair, ascending by `(created_at, sequence)`.
    async fn fetch_conversation(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<Message>, ChatError>;

    /// Latest message exchanged with each peer, newest first.
    async fn recent_conversations(&self, user: &UserId) -> Result<Vec<Message>, ChatError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn upsert_profile(&self, user_id: &UserId, display_name: &str) -> Result<(), ChatError>;
    async fn load_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>, ChatError>;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sqlite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ConnectionPool Error: {0}")]
    ConnectionPool(#[from] r2d2::Error),
    #[error("Malformed Row: {0}")]
    MalformedRow(String),
    #[error("Migration Error: {0}")]
    Migration(String),
    #[error("Worker Error: {0}")]
    Worker(String),
    #[error("Store Unavailable: {0}")]
    Unavailable(String),
}
