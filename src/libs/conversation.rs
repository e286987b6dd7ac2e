//! One open conversation as the presentation layer sees it: a time-ordered,
//! de-duplicated message list kept current by the live feed.
//!
//! The list only grows through confirmed store writes and live-feed echoes.
//! Both paths funnel through the same merge, so a message that arrives twice
//! (send result and echo, or fetch and echo) is shown once, and arrival order
//! never affects display order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::libs::core::errors::ChatError;
use crate::libs::core::models::{ConversationKey, Message, MessageId, UserId};
use crate::libs::feed::{ChangeFeed, MessageListener, Subscription};
use crate::libs::storage::storage_traits::MessageStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationStatus {
    Opening,
    Active,
    Closed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationSnapshot {
    pub status: ConversationStatus,
    pub messages: Vec<Message>,
    pub sending: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
struct ConversationState {
    status: ConversationStatus,
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    pending_sends: usize,
    error: Option<String>,
}

impl ConversationState {
    fn new() -> Self {
        Self {
            status: ConversationStatus::Opening,
            messages: Vec::new(),
            seen: HashSet::new(),
            pending_sends: 0,
            error: None,
        }
    }

    /// Returns false when the id is already present.
    fn merge(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let position = self
            .messages
            .partition_point(|existing| existing.display_order(&message) != Ordering::Greater);
        self.messages.insert(position, message);
        true
    }

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            status: self.status,
            messages: self.messages.clone(),
            sending: self.pending_sends > 0,
            error: self.error.clone(),
        }
    }
}

struct Shared {
    state: Mutex<ConversationState>,
    updates: watch::Sender<ConversationSnapshot>,
}

impl Shared {
    fn new() -> Self {
        let state = ConversationState::new();
        let (updates, _) = watch::channel(state.snapshot());
        Self {
            state: Mutex::new(state),
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change` and publishes a fresh snapshot while still holding
    /// the lock, so observers never see snapshots out of order.
    fn update<R>(&self, change: impl FnOnce(&mut ConversationState) -> R) -> R {
        let mut state = self.lock();
        let result = change(&mut state);
        self.updates.send_replace(state.snapshot());
        result
    }

    fn receive_live(&self, message: Message) {
        let mut state = self.lock();
        if state.status == ConversationStatus::Closed {
            return;
        }
        let message_id = message.id;
        if state.merge(message) {
            self.updates.send_replace(state.snapshot());
            debug!(%message_id, "Merged live message");
        }
    }

    fn fail_open(&self, err: ChatError) -> ChatError {
        self.update(|state| {
            state.status = ConversationStatus::Closed;
            state.error = Some(err.to_string());
        });
        err
    }
}

pub struct Conversation {
    me: UserId,
    peer: UserId,
    store: Arc<dyn MessageStore>,
    shared: Arc<Shared>,
    subscription: Mutex<Option<Subscription>>,
}

impl Conversation {
    /// Subscribes to the live feed, then loads the history, so a message
    /// committed while the history is in flight arrives through at least
    /// one path; the merge drops the second copy. Any failure closes the
    /// handle and is returned.
    pub async fn open(
        me: UserId,
        peer: UserId,
        store: Arc<dyn MessageStore>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Result<Self, ChatError> {
        let shared = Arc::new(Shared::new());
        let conversation = ConversationKey::new(&me, &peer);
        info!(%conversation, "Opening conversation");

        let target = Arc::downgrade(&shared);
        let listener: Arc<dyn MessageListener> = Arc::new(move |message: Message| {
            if let Some(shared) = target.upgrade() {
                shared.receive_live(message);
            }
        });

        let subscription = match feed.subscribe(&me, &peer, listener).await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(%conversation, error = %err, "Live feed subscription failed");
                return Err(shared.fail_open(err));
            }
        };

        let history = match store.fetch_conversation(&me, &peer).await {
            Ok(history) => history,
            Err(err) => {
                subscription.unsubscribe();
                warn!(%conversation, error = %err, "Initial fetch failed");
                return Err(shared.fail_open(err));
            }
        };

        let loaded = history.len();
        shared.update(|state| {
            for message in history {
                state.merge(message);
            }
            state.status = ConversationStatus::Active;
        });
        info!(%conversation, loaded, "Conversation active");

        Ok(Self {
            me,
            peer,
            store,
            shared,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    /// Sends trimmed `text` to the peer.
    ///
    /// Blank text is a no-op that returns `Ok(None)` and never reaches the
    /// store. A failed append leaves the message list untouched, records the
    /// error and keeps the handle active. No retry is attempted.
    pub async fn send(&self, text: &str) -> Result<Option<Message>, ChatError> {
        let body = text.trim();
        if body.is_empty() {
            debug!("Ignoring blank message");
            return Ok(None);
        }

        self.shared.update(|state| {
            if state.status != ConversationStatus::Active {
                return Err(ChatError::ConversationClosed);
            }
            state.pending_sends += 1;
            state.error = None;
            Ok(())
        })?;

        let outcome = self.store.append(&self.me, &self.peer, body).await;

        self.shared.update(|state| {
            state.pending_sends = state.pending_sends.saturating_sub(1);
            if state.status == ConversationStatus::Closed {
                // Closed while the append was in flight: the view is final.
                return outcome.map(Some);
            }
            match outcome {
                Ok(message) => {
                    state.merge(message.clone());
                    Ok(Some(message))
                }
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "Message not sent");
                    state.error = Some(err.to_string());
                    Err(err)
                }
            }
        })
    }

    /// Idempotent. No live message is merged after this returns.
    pub fn close(&self) {
        let was_open = self.shared.update(|state| {
            let was_open = state.status != ConversationStatus::Closed;
            state.status = ConversationStatus::Closed;
            was_open
        });

        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        if was_open {
            info!(conversation = %self.key(), "Conversation closed");
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.me, &self.peer)
    }

    pub fn status(&self) -> ConversationStatus {
        self.shared.lock().status
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().messages.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.shared.lock().pending_sends > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().error.clone()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.shared.lock().snapshot()
    }

    /// Receives a snapshot after every state change.
    pub fn watch(&self) -> watch::Receiver<ConversationSnapshot> {
        self.shared.updates.subscribe()
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.close();
    }
}
