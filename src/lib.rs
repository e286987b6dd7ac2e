pub mod libs;

pub use crate::libs::config::ChatConfig;
pub use crate::libs::conversation::{Conversation, ConversationSnapshot, ConversationStatus};
pub use crate::libs::core::errors::ChatError;
pub use crate::libs::core::models::{ConversationKey, Message, MessageId, UserId, UserProfile};
pub use crate::libs::feed::{ChangeFeed, LiveFeed, MessageListener, Subscription};
pub use crate::libs::logging::init_logging;
pub use crate::libs::storage::database::storage_sqlite::SqliteStore;
pub use crate::libs::storage::memory::InMemoryStore;
pub use crate::libs::storage::storage_traits::{MessageStore, ProfileStore, StoreError};

uniffi::setup_scaffolding!("zodiac_chat_lib");
