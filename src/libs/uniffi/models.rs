// Rust models for the types the front-end sees through the generated bindings

use crate::libs::conversation::{ConversationSnapshot, ConversationStatus};
use crate::libs::core::errors::ChatError;
use crate::libs::core::models::{Message, UserId};

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct ChatMessage {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub created_at_ms: i64,
    pub time_label: String,
    pub is_from_user: bool,
}

impl ChatMessage {
    pub fn from_message(message: &Message, viewer: &UserId) -> Self {
        Self {
            message_id: message.id.to_string(),
            sender_id: message.sender_id.to_string(),
            receiver_id: message.receiver_id.to_string(),
            body: message.body.clone(),
            created_at_ms: message.created_at.timestamp_millis(),
            time_label: message.time_label(),
            is_from_user: message.is_from(viewer),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, uniffi::Enum)]
pub enum SessionStatus {
    Opening,
    Active,
    Closed,
}

impl From<ConversationStatus> for SessionStatus {
    fn from(status: ConversationStatus) -> Self {
        match status {
            ConversationStatus::Opening => SessionStatus::Opening,
            ConversationStatus::Active => SessionStatus::Active,
            ConversationStatus::Closed => SessionStatus::Closed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct ConversationUpdate {
    pub status: SessionStatus,
    pub messages: Vec<ChatMessage>,
    pub sending: bool,
    pub error: Option<String>,
}

impl ConversationUpdate {
    pub fn from_snapshot(snapshot: &ConversationSnapshot, viewer: &UserId) -> Self {
        Self {
            status: snapshot.status.into(),
            messages: snapshot
                .messages
                .iter()
                .map(|message| ChatMessage::from_message(message, viewer))
                .collect(),
            sending: snapshot.sending,
            error: snapshot.error.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct ConversationPreview {
    pub peer_id: String,
    pub peer_name: Option<String>,
    pub last_message: ChatMessage,
}

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ChatClientError {
    #[error("{reason}")]
    Validation { reason: String },
    #[error("Chat storage failed: {reason}")]
    Store { reason: String },
    #[error("Live updates unavailable: {reason}")]
    Subscription { reason: String },
    #[error("Conversation is closed")]
    Closed,
    #[error("Could not start chat: {reason}")]
    Initialisation { reason: String },
}

impl From<ChatError> for ChatClientError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(reason) => ChatClientError::Validation { reason },
            ChatError::Store(source) => ChatClientError::Store {
                reason: source.to_string(),
            },
            ChatError::Subscription(reason) => ChatClientError::Subscription { reason },
            ChatError::ConversationClosed => ChatClientError::Closed,
        }
    }
}
