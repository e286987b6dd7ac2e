//! Push delivery of newly committed messages to per-conversation listeners.
//!
//! The store calls [`LiveFeed::publish`] once per committed message, while it
//! still holds its writer lock, so every subscriber sees messages in commit
//! order. Each subscription owns an unbounded queue drained by its own tokio
//! task, which keeps `publish` non-blocking and never drops a message.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::libs::core::errors::ChatError;
use crate::libs::core::models::{ConversationKey, Message, UserId};

pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: Message);
}

impl<F> MessageListener for F
where
    F: Fn(Message) + Send + Sync,
{
    fn on_message(&self, message: Message) {
        self(message)
    }
}

/// Filtered INSERT notifications for one conversation.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Delivers every message committed after this call returns whose pair
    /// matches `{user_a, user_b}`, exactly once and in commit order.
    async fn subscribe(
        &self,
        user_a: &UserId,
        user_b: &UserId,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Subscription, ChatError>;
}

pub type SubscriptionId = u64;

struct Route {
    conversation: ConversationKey,
    queue: mpsc::UnboundedSender<Message>,
}

type RouteTable = DashMap<SubscriptionId, Route>;

pub struct LiveFeed {
    routes: Arc<RouteTable>,
    next_id: AtomicU64,
}

impl LiveFeed {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn publish(&self, message: &Message) {
        let conversation = message.conversation();
        let mut dead_routes = Vec::new();

        for route in self.routes.iter() {
            if route.conversation != conversation {
                continue;
            }
            if route.queue.send(message.clone()).is_err() {
                dead_routes.push(*route.key());
            }
        }

        // Removal has to wait until the iterator has released its shard locks.
        for id in dead_routes {
            self.routes.remove(&id);
            warn!(subscription = id, %conversation, "Dropped route whose delivery task has stopped");
        }
        trace!(message_id = %message.id, %conversation, "Published message");
    }

    /// Activates a route immediately; delivery runs on the current tokio runtime.
    pub fn subscribe_listener(
        &self,
        conversation: ConversationKey,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Subscription, ChatError> {
        let runtime = Handle::try_current().map_err(|err| {
            ChatError::Subscription(format!("no async runtime available for delivery: {}", err))
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, mut inbox) = mpsc::unbounded_channel::<Message>();
        let gate = Arc::new(Mutex::new(true));
        let delivery_gate = gate.clone();

        runtime.spawn(async move {
            while let Some(message) = inbox.recv().await {
                let open = lock_gate(&delivery_gate);
                if !*open {
                    break;
                }
                listener.on_message(message);
            }
        });

        self.routes.insert(
            id,
            Route {
                conversation: conversation.clone(),
                queue,
            },
        );
        debug!(subscription = id, %conversation, "Subscribed to live feed");

        Ok(Subscription {
            id,
            conversation,
            gate,
            routes: Arc::downgrade(&self.routes),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.routes.len()
    }
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for LiveFeed {
    async fn subscribe(
        &self,
        user_a: &UserId,
        user_b: &UserId,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Subscription, ChatError> {
        self.subscribe_listener(ConversationKey::new(user_a, user_b), listener)
    }
}

/// Handle to an active live-feed route. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    conversation: ConversationKey,
    gate: Arc<Mutex<bool>>,
    routes: Weak<RouteTable>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        *lock_gate(&self.gate)
    }

    /// Idempotent. Waits for an in-flight callback to finish, so no callback
    /// runs after this returns. Must not be called from inside the listener.
    pub fn unsubscribe(&self) {
        let mut open = lock_gate(&self.gate);
        if !*open {
            return;
        }
        *open = false;
        drop(open);

        if let Some(routes) = self.routes.upgrade() {
            routes.remove(&self.id);
        }
        debug!(subscription = self.id, conversation = %self.conversation, "Unsubscribed from live feed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn lock_gate(gate: &Mutex<bool>) -> MutexGuard<'_, bool> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}
