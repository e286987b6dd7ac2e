#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;
use zodiac_chat_lib::libs::core::models::{millis_to_datetime, Clock};
use zodiac_chat_lib::{
    init_logging, ChangeFeed, ChatConfig, ChatError, InMemoryStore, Message, MessageListener,
    MessageStore, SqliteStore, StoreError, Subscription, UserId,
};

static INIT: Once = Once::new();

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

pub fn init_tracing() {
    INIT.call_once(|| init_logging("zodiac_chat_lib=debug"));
}

pub fn user(raw: &str) -> UserId {
    UserId::new(raw).expect("test user ids are non-empty")
}

pub fn fixed_clock(millis: i64) -> Clock {
    Arc::new(move || millis_to_datetime(millis).expect("valid test timestamp"))
}

// The TempDir must outlive the store, so tests keep the whole struct alive.
pub struct TestDatabase {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
}

impl TestDatabase {
    pub fn config(&self) -> ChatConfig {
        config_in(&self.dir)
    }
}

pub fn config_in(dir: &TempDir) -> ChatConfig {
    let path = dir.path().join("chat.db");
    ChatConfig::new(path.to_string_lossy().to_string())
}

pub fn sqlite_store() -> TestDatabase {
    init_tracing();
    let dir = tempfile::tempdir().expect("Failed to create test directory");
    let store = SqliteStore::open(&config_in(&dir)).expect("Failed to open test database");
    TestDatabase {
        dir,
        store: Arc::new(store),
    }
}

pub fn sqlite_store_with_clock(clock: Clock) -> TestDatabase {
    init_tracing();
    let dir = tempfile::tempdir().expect("Failed to create test directory");
    let store = SqliteStore::open_with_clock(&config_in(&dir), clock)
        .expect("Failed to open test database");
    TestDatabase {
        dir,
        store: Arc::new(store),
    }
}

pub fn channel_listener() -> (Arc<dyn MessageListener>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: Arc<dyn MessageListener> = Arc::new(move |message: Message| {
        let _ = tx.send(message);
    });
    (listener, rx)
}

pub async fn next_message(received: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    timeout(DELIVERY_TIMEOUT, received.recv())
        .await
        .expect("Timed out waiting for live message")
        .expect("Live feed closed unexpectedly")
}

pub async fn assert_no_delivery(received: &mut mpsc::UnboundedReceiver<Message>) {
    match timeout(QUIET_PERIOD, received.recv()).await {
        Err(_) | Ok(None) => {}
        Ok(Some(message)) => panic!("Unexpected delivery: {:?}", message),
    }
}

/// Wraps the in-memory store, counting calls and failing on demand.
pub struct CountingStore {
    pub inner: Arc<InMemoryStore>,
    appends: AtomicUsize,
    fetches: AtomicUsize,
    fail_appends: AtomicBool,
    fail_fetches: AtomicBool,
}

impl CountingStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            appends: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            fail_appends: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
        }
    }

    pub fn append_calls(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for CountingStore {
    async fn append(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        body: &str,
    ) -> Result<Message, ChatError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("network unreachable".to_string()).into());
        }
        self.inner.append(sender_id, receiver_id, body).await
    }

    async fn fetch_conversation(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<Message>, ChatError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("session expired".to_string()).into());
        }
        self.inner.fetch_conversation(user_a, user_b).await
    }

    async fn recent_conversations(&self, user: &UserId) -> Result<Vec<Message>, ChatError> {
        self.inner.recent_conversations(user).await
    }
}

pub struct FailingFeed;

#[async_trait]
impl ChangeFeed for FailingFeed {
    async fn subscribe(
        &self,
        _user_a: &UserId,
        _user_b: &UserId,
        _listener: Arc<dyn MessageListener>,
    ) -> Result<Subscription, ChatError> {
        Err(ChatError::Subscription("realtime channel refused".to_string()))
    }
}

/// Commits one message from `sender` to `receiver` at the start of the first
/// fetch, so it lands after the live feed is subscribed but before the
/// history read.
pub struct RacingStore {
    pub inner: Arc<InMemoryStore>,
    sender: UserId,
    receiver: UserId,
    raced: AtomicBool,
}

impl RacingStore {
    pub fn new(inner: Arc<InMemoryStore>, sender: UserId, receiver: UserId) -> Self {
        Self {
            inner,
            sender,
            receiver,
            raced: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MessageStore for RacingStore {
    async fn append(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        body: &str,
    ) -> Result<Message, ChatError> {
        self.inner.append(sender_id, receiver_id, body).await
    }

    async fn fetch_conversation(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<Message>, ChatError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.inner
                .append(&self.sender, &self.receiver, "in the window")
                .await?;
        }
        self.inner.fetch_conversation(user_a, user_b).await
    }

    async fn recent_conversations(&self, user: &UserId) -> Result<Vec<Message>, ChatError> {
        self.inner.recent_conversations(user).await
    }
}
