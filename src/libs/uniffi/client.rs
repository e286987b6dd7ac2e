use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tracing::debug;

use crate::libs::config::ChatConfig;
use crate::libs::conversation::{Conversation, ConversationStatus};
use crate::libs::core::models::UserId;
use crate::libs::feed::ChangeFeed;
use crate::libs::logging::init_logging;
use crate::libs::storage::database::storage_sqlite::SqliteStore;
use crate::libs::storage::storage_traits::{MessageStore, ProfileStore};
use crate::libs::uniffi::models::{
    ChatClientError, ChatMessage, ConversationPreview, ConversationUpdate,
};

/// Implemented by the front-end; receives every state change of a session.
#[uniffi::export(with_foreign)]
pub trait ConversationListener: Send + Sync {
    fn on_update(&self, update: ConversationUpdate);
}

/// Entry point for the front-end: owns the database and the async runtime.
///
/// Every method may be called from any thread, including from inside a
/// `ConversationListener` callback.
#[derive(uniffi::Object)]
pub struct ChatClient {
    handle: Handle,
    // Only taken in `Drop`.
    runtime: Option<Runtime>,
    store: Arc<SqliteStore>,
}

impl ChatClient {
    /// Drives `future` to completion on the client's runtime. On one of the
    /// runtime's own worker threads (a listener callback) the worker is
    /// handed off first, since a plain `block_on` would panic there.
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        let on_worker = Handle::try_current()
            .map(|current| current.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if on_worker {
            tokio::task::block_in_place(|| self.handle.block_on(future))
        } else {
            self.handle.block_on(future)
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            if Handle::try_current().is_ok() {
                // The last handle went away inside a listener callback; a
                // blocking shutdown is not allowed on a worker thread.
                runtime.shutdown_background();
            } else {
                drop(runtime);
            }
        }
    }
}

#[uniffi::export]
impl ChatClient {
    #[uniffi::constructor]
    pub fn new(config: ChatConfig) -> Result<Arc<Self>, ChatClientError> {
        init_logging(&config.log_filter);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("zodiac-chat")
            .build()
            .map_err(|e| ChatClientError::Initialisation {
                reason: e.to_string(),
            })?;
        let store = SqliteStore::open(&config).map_err(|e| ChatClientError::Initialisation {
            reason: e.to_string(),
        })?;

        Ok(Arc::new(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            store: Arc::new(store),
        }))
    }

    /// Same as `new`, with the settings given as a JSON object.
    #[uniffi::constructor]
    pub fn from_config_json(json: String) -> Result<Arc<Self>, ChatClientError> {
        let config =
            ChatConfig::from_json(&json).map_err(|e| ChatClientError::Initialisation {
                reason: format!("invalid config: {}", e),
            })?;
        Self::new(config)
    }

    pub fn set_display_name(
        &self,
        user_id: String,
        display_name: String,
    ) -> Result<(), ChatClientError> {
        let user_id = UserId::new(user_id)?;
        self.block_on(self.store.upsert_profile(&user_id, &display_name))?;
        Ok(())
    }

    pub fn display_name(&self, user_id: String) -> Result<Option<String>, ChatClientError> {
        let user_id = UserId::new(user_id)?;
        let profile = self.block_on(self.store.load_profile(&user_id))?;
        Ok(profile.map(|profile| profile.display_name))
    }

    pub fn recent_conversations(
        &self,
        user_id: String,
    ) -> Result<Vec<ConversationPreview>, ChatClientError> {
        let viewer = UserId::new(user_id)?;
        self.block_on(async {
            let latest = self.store.recent_conversations(&viewer).await?;
            let mut previews = Vec::with_capacity(latest.len());
            for message in latest {
                let peer = if message.is_from(&viewer) {
                    message.receiver_id.clone()
                } else {
                    message.sender_id.clone()
                };
                let peer_name = self
                    .store
                    .load_profile(&peer)
                    .await?
                    .map(|profile| profile.display_name);
                previews.push(ConversationPreview {
                    peer_id: peer.to_string(),
                    peer_name,
                    last_message: ChatMessage::from_message(&message, &viewer),
                });
            }
            Ok::<_, ChatClientError>(previews)
        })
    }

    pub fn open_conversation(
        self: Arc<Self>,
        current_user_id: String,
        other_user_id: String,
        listener: Arc<dyn ConversationListener>,
    ) -> Result<Arc<ConversationSession>, ChatClientError> {
        let me = UserId::new(current_user_id)?;
        let peer = UserId::new(other_user_id)?;

        let store: Arc<dyn MessageStore> = self.store.clone();
        let feed: Arc<dyn ChangeFeed> = self.store.clone();
        let conversation = self.block_on(Conversation::open(me.clone(), peer, store, feed))?;

        let mut updates = conversation.watch();
        self.handle.spawn(async move {
            loop {
                let snapshot = updates.borrow_and_update().clone();
                listener.on_update(ConversationUpdate::from_snapshot(&snapshot, &me));
                if snapshot.status == ConversationStatus::Closed {
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
            debug!("Stopped forwarding conversation updates");
        });

        Ok(Arc::new(ConversationSession {
            conversation,
            client: self,
        }))
    }
}

/// An open conversation driven from the front-end.
#[derive(uniffi::Object)]
pub struct ConversationSession {
    conversation: Conversation,
    client: Arc<ChatClient>,
}

#[uniffi::export]
impl ConversationSession {
    /// `None` when the text was blank and nothing was sent.
    pub fn send(&self, text: String) -> Result<Option<ChatMessage>, ChatClientError> {
        let sent = self.client.block_on(self.conversation.send(&text))?;
        Ok(sent.map(|message| ChatMessage::from_message(&message, self.conversation.me())))
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        let viewer = self.conversation.me();
        self.conversation
            .messages()
            .iter()
            .map(|message| ChatMessage::from_message(message, viewer))
            .collect()
    }

    pub fn peer_id(&self) -> String {
        self.conversation.peer().to_string()
    }

    pub fn is_active(&self) -> bool {
        self.conversation.status() == ConversationStatus::Active
    }

    pub fn is_sending(&self) -> bool {
        self.conversation.is_sending()
    }

    pub fn last_error(&self) -> Option<String> {
        self.conversation.last_error()
    }

    pub fn close(&self) {
        self.conversation.close();
    }
}
