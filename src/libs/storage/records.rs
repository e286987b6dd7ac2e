use crate::libs::core::models::{millis_to_datetime, Message, MessageId, UserId, UserProfile};
use crate::libs::storage::storage_traits::StoreError;
use chrono::{DateTime, Utc};

/// A `messages` row as read back from the database, before it has been
/// checked against the `Message` invariants.
#[derive(Debug)]
pub struct MessageRecord {
    pub sequence: i64,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: i64,
}

impl TryFrom<MessageRecord> for Message {
    type Error = StoreError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        if record.body.trim().is_empty() {
            return Err(StoreError::MalformedRow(format!(
                "message {} has an empty body",
                record.message_id
            )));
        }
        let created_at = millis_to_datetime(record.created_at).ok_or_else(|| {
            StoreError::MalformedRow(format!(
                "message {} has an invalid timestamp {}",
                record.message_id, record.created_at
            ))
        })?;

        Ok(Message {
            id: record.message_id,
            sequence: record.sequence,
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            body: record.body,
            created_at,
        })
    }
}

pub fn into_messages(records: Vec<MessageRecord>) -> Result<Vec<Message>, StoreError> {
    records.into_iter().map(Message::try_from).collect()
}

/// Values the store assigns before inserting a row.
#[derive(Debug)]
pub struct NewMessageRecord {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl NewMessageRecord {
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        body: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: MessageId::generate(),
            sender_id,
            receiver_id,
            body,
            created_at,
        }
    }

    pub fn into_message(self, sequence: i64) -> Message {
        Message {
            id: self.message_id,
            sequence,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: UserId,
    pub display_name: String,
}

impl UserRecord {
    pub fn new(user_id: UserId, display_name: String) -> Self {
        Self {
            user_id,
            display_name,
        }
    }
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        UserProfile {
            user_id: record.user_id,
            display_name: record.display_name,
        }
    }
}
