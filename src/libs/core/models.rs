use chrono::{DateTime, Local, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::libs::core::errors::ChatError;

/// Source of store-assigned timestamps. Injected so tests can pin time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Opaque identifier handed out by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ChatError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ChatError::Validation("user id must not be empty".to_string()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for UserId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for UserId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        if raw.trim().is_empty() {
            return Err(FromSqlError::Other("empty user id".into()));
        }
        Ok(UserId(raw.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub uuid: Uuid,
}

impl MessageId {
    pub fn generate() -> Self {
        Self {
            uuid: Uuid::now_v7(),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl ToSql for MessageId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.uuid.to_string()))
    }
}

impl FromSql for MessageId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let uuid_str = value.as_str()?;
        Uuid::parse_str(uuid_str)
            .map(|uuid| MessageId { uuid })
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// The unordered pair of participants that scopes a conversation.
///
/// Both orderings of the same two users produce an equal key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    pub fn new(user_a: &UserId, user_b: &UserId) -> Self {
        if user_a <= user_b {
            Self {
                low: user_a.clone(),
                high: user_b.clone(),
            }
        } else {
            Self {
                low: user_b.clone(),
                high: user_a.clone(),
            }
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        *self == message.conversation()
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

/// A committed chat message. Immutable once the store hands it out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sequence: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(&self.sender_id, &self.receiver_id)
    }

    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    /// Local wall-clock `HH:MM` shown under each bubble.
    pub fn time_label(&self) -> String {
        self.created_at.with_timezone(&Local).format("%H:%M").to_string()
    }

    /// Display order within a conversation.
    pub fn display_order(&self, other: &Message) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Trims a submitted body, rejecting text that is empty once trimmed.
pub fn validate_body(body: &str) -> Result<&str, ChatError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ChatError::Validation(
            "message body must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Display name registered for a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
}
