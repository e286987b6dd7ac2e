use rusqlite::{params, Connection};
use tracing::info;

use crate::libs::storage::database::storage_sqlite::SqliteTransaction;
use crate::libs::storage::storage_traits::{StoreError, Transactional};

pub const SCHEMA_VERSION: &str = "1";

pub fn db_migration(connection: &mut Connection) -> Result<(), StoreError> {
    let journal_mode: String =
        connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    let sqlite_transaction = SqliteTransaction::new(connection)?;

    // messages are append-only: the triggers reject any rewrite of history
    sqlite_transaction
        .inner()
        .execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                body TEXT NOT NULL CHECK (length(trim(body)) > 0),
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_pair
                ON messages (sender_id, receiver_id, created_at);

            CREATE TRIGGER IF NOT EXISTS messages_no_update
            BEFORE UPDATE ON messages
            BEGIN
                SELECT RAISE(ABORT, 'messages are immutable');
            END;

            CREATE TRIGGER IF NOT EXISTS messages_no_delete
            BEFORE DELETE ON messages
            BEGIN
                SELECT RAISE(ABORT, 'messages are immutable');
            END;
            "#,
        )
        .map_err(|e| StoreError::Migration(format!("messages: {}", e)))?;

    sqlite_transaction
        .inner()
        .execute(
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
            [],
        )
        .map_err(|e| StoreError::Migration(format!("users: {}", e)))?;

    sqlite_transaction
        .inner()
        .execute(
            "CREATE TABLE IF NOT EXISTS app_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
            [],
        )
        .map_err(|e| StoreError::Migration(format!("app_settings: {}", e)))?;

    sqlite_transaction
        .inner()
        .execute(
            "INSERT INTO app_settings (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%s', 'now');",
            params![SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::Migration(format!("schema_version: {}", e)))?;

    sqlite_transaction.commit()?;

    info!(schema_version = SCHEMA_VERSION, %journal_mode, "Database schema ready");
    Ok(())
}
