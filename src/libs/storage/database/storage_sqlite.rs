use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::libs::config::ChatConfig;
use crate::libs::core::errors::ChatError;
use crate::libs::core::models::{
    millis_to_datetime, system_clock, validate_body, Clock, ConversationKey, Message, UserId,
    UserProfile,
};
use crate::libs::feed::{ChangeFeed, LiveFeed, MessageListener, Subscription};
use crate::libs::storage::database::migrations;
use crate::libs::storage::records::{into_messages, MessageRecord, NewMessageRecord, UserRecord};
use crate::libs::storage::storage_traits::{
    MessageStore, MessageTable, ProfileStore, SettingsTable, StoreError, Transactional, UserTable,
};

const MESSAGE_COLUMNS: &str = "seq, message_id, sender_id, receiver_id, body, created_at";

pub struct SqliteTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> SqliteTransaction<'conn> {
    pub fn new(conn: &'conn mut Connection) -> Result<Self, StoreError> {
        let trans = conn.transaction()?;
        Ok(Self { tx: trans })
    }

    pub fn inner(&self) -> &Transaction<'conn> {
        &self.tx
    }
}

impl<'conn> Transactional for SqliteTransaction<'conn> {
    fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(StoreError::from)
    }
}

impl<'conn> MessageTable for SqliteTransaction<'conn> {
    fn insert_message(&mut self, record: &NewMessageRecord) -> Result<i64, StoreError> {
        self.tx.execute(
            "INSERT INTO messages (message_id, sender_id, receiver_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.message_id,
                record.sender_id,
                record.receiver_id,
                record.body,
                record.created_at.timestamp_millis(),
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn select_conversation(
        &mut self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, seq ASC"
        ))?;
        let records = stmt
            .query_map(params![user_a, user_b], read_message_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify_row_error)?;
        Ok(records)
    }

    fn select_latest_per_peer(&mut self, user: &UserId) -> Result<Vec<MessageRecord>, StoreError> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE seq IN (
                SELECT MAX(seq)
                FROM messages
                WHERE sender_id = ?1 OR receiver_id = ?1
                GROUP BY CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
             )
             ORDER BY created_at DESC, seq DESC"
        ))?;
        let records = stmt
            .query_map(params![user], read_message_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify_row_error)?;
        Ok(records)
    }

    fn latest_created_at(&mut self) -> Result<Option<i64>, StoreError> {
        let latest = self
            .tx
            .query_row("SELECT MAX(created_at) FROM messages", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(latest)
    }
}

impl<'conn> UserTable for SqliteTransaction<'conn> {
    fn upsert_user(&mut self, record: &UserRecord) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO users (user_id, display_name) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = strftime('%s', 'now')",
            params![record.user_id, record.display_name],
        )?;
        Ok(())
    }

    fn load_user_by_id(&mut self, user_id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        let record = self
            .tx
            .query_row(
                "SELECT user_id, display_name FROM users WHERE user_id = ?1",
                params![user_id],
                |row| Ok(UserRecord::new(row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(classify_row_error)?;
        Ok(record)
    }
}

impl<'conn> SettingsTable for SqliteTransaction<'conn> {
    fn load_setting(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .tx
            .query_row(
                "SELECT value FROM app_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn store_setting(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%s', 'now')",
            params![key, value],
        )?;
        Ok(())
    }
}

fn read_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        sequence: row.get(0)?,
        message_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        body: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn classify_row_error(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(column, _, source) => {
            StoreError::MalformedRow(format!("column {}: {}", column, source))
        }
        rusqlite::Error::InvalidColumnType(column, name, kind) => {
            StoreError::MalformedRow(format!("column {} ({}) has type {}", column, name, kind))
        }
        other => StoreError::Sqlite(other),
    }
}

struct SqliteInner {
    conn_pool: Pool<SqliteConnectionManager>,
    feed: LiveFeed,
    // Serialises appends and remembers the last assigned created_at (ms).
    writer: Mutex<i64>,
    clock: Clock,
}

impl SqliteInner {
    fn new_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.conn_pool.get()?)
    }

    fn append_blocking(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: String,
    ) -> Result<Message, StoreError> {
        let mut last_created_at = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let millis = (self.clock)().timestamp_millis().max(*last_created_at);
        let created_at = millis_to_datetime(millis)
            .ok_or_else(|| StoreError::Worker(format!("clock returned unusable time {}", millis)))?;
        let record = NewMessageRecord::new(sender_id, receiver_id, body, created_at);

        let mut connection = self.new_connection()?;
        let mut sqlite_transaction = SqliteTransaction::new(&mut connection)?;
        let sequence = sqlite_transaction.insert_message(&record)?;
        sqlite_transaction.commit()?;

        *last_created_at = millis;
        let message = record.into_message(sequence);
        // Still under the writer lock: feed order is commit order.
        self.feed.publish(&message);
        Ok(message)
    }

    fn read<T>(
        &self,
        work: impl FnOnce(&mut SqliteTransaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut connection = self.new_connection()?;
        let mut sqlite_transaction = SqliteTransaction::new(&mut connection)?;
        let value = work(&mut sqlite_transaction)?;
        sqlite_transaction.commit()?;
        Ok(value)
    }
}

/// Durable message store over a pooled SQLite database, with its own live feed.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<SqliteInner>,
}

impl SqliteStore {
    pub fn open(config: &ChatConfig) -> Result<Self, StoreError> {
        Self::open_with_clock(config, system_clock())
    }

    pub fn open_with_clock(config: &ChatConfig, clock: Clock) -> Result<Self, StoreError> {
        let busy_timeout = config.busy_timeout();
        let manager = SqliteConnectionManager::file(&config.database_path)
            .with_init(move |conn| conn.busy_timeout(busy_timeout));
        let pool = Pool::builder()
            .max_size(config.pool_size())
            .build(manager)?;

        let mut connection = pool.get()?;
        migrations::db_migration(&mut connection)?;

        let latest = {
            let mut sqlite_transaction = SqliteTransaction::new(&mut connection)?;
            let latest = sqlite_transaction.latest_created_at()?;
            sqlite_transaction.commit()?;
            latest
        };
        drop(connection);

        info!(path = %config.database_path, pool_size = config.pool_size(), "Opened message store");

        Ok(Self {
            inner: Arc::new(SqliteInner {
                conn_pool: pool,
                feed: LiveFeed::new(),
                writer: Mutex::new(latest.unwrap_or(i64::MIN)),
                clock,
            }),
        })
    }

    pub fn feed(&self) -> &LiveFeed {
        &self.inner.feed
    }

    pub fn new_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        self.inner.new_connection()
    }

    pub async fn load_setting(&self, key: &str) -> Result<Option<String>, ChatError> {
        let key = key.to_string();
        self.run_blocking("load_setting", move |inner| {
            inner.read(|tx| tx.load_setting(&key))
        })
        .await
    }

    pub async fn store_setting(&self, key: &str, value: &str) -> Result<(), ChatError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.run_blocking("store_setting", move |inner| {
            inner.read(|tx| tx.store_setting(&key, &value))
        })
        .await
    }

    async fn run_blocking<T, F>(&self, stage: &'static str, work: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteInner) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = self.inner.clone();
        let outcome = tokio::task::spawn_blocking(move || work(&inner))
            .await
            .map_err(|err| StoreError::Worker(format!("{}: {}", stage, err)))?;
        outcome.map_err(|err| {
            warn!(stage, error = %err, "Store operation failed");
            ChatError::from(err)
        })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        body: &str,
    ) -> Result<Message, ChatError> {
        let body = validate_body(body)?.to_string();
        let (sender_id, receiver_id) = (sender_id.clone(), receiver_id.clone());

        let message = self
            .run_blocking("append", move |inner| {
                inner.append_blocking(sender_id, receiver_id, body)
            })
            .await?;
        debug!(message_id = %message.id, sequence = message.sequence, "Appended message");
        Ok(message)
    }

    async fn fetch_conversation(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Vec<Message>, ChatError> {
        let (user_a, user_b) = (user_a.clone(), user_b.clone());
        let messages = self
            .run_blocking("fetch_conversation", move |inner| {
                let records = inner.read(|tx| tx.select_conversation(&user_a, &user_b))?;
                into_messages(records)
            })
            .await?;
        Ok(messages)
    }

    async fn recent_conversations(&self, user: &UserId) -> Result<Vec<Message>, ChatError> {
        let user = user.clone();
        self.run_blocking("recent_conversations", move |inner| {
            let records = inner.read(|tx| tx.select_latest_per_peer(&user))?;
            into_messages(records)
        })
        .await
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn upsert_profile(&self, user_id: &UserId, display_name: &str) -> Result<(), ChatError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ChatError::Validation(
                "display name must not be empty".to_string(),
            ));
        }
        let record = UserRecord::new(user_id.clone(), display_name.to_string());
        self.run_blocking("upsert_profile", move |inner| {
            inner.read(|tx| tx.upsert_user(&record))
        })
        .await
    }

    async fn load_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>, ChatError> {
        let user_id = user_id.clone();
        let record = self
            .run_blocking("load_profile", move |inner| {
                inner.read(|tx| tx.load_user_by_id(&user_id))
            })
            .await?;
        Ok(record.map(UserProfile::from))
    }
}

#[async_trait]
impl ChangeFeed for SqliteStore {
    async fn subscribe(
        &self,
        user_a: &UserId,
        user_b: &UserId,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Subscription, ChatError> {
        self.inner
            .feed
            .subscribe_listener(ConversationKey::new(user_a, user_b), listener)
    }
}
