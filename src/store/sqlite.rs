//! SQLite response store

use super::record::{format_timestamp, Record, RecordContext};
use super::traits::{OpenStore, ResponseStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed response store
///
/// One `responses` table; `seq` preserves insertion order so records with
/// equal timestamps still list deterministically. Thread-safe via internal
/// mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                url TEXT NOT NULL,
                context_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_responses_timestamp
                ON responses(timestamp);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))
    }

    fn row_to_record(
        id: String,
        text: String,
        timestamp: String,
        url: String,
        context_json: String,
    ) -> StoreResult<Record> {
        let context: RecordContext = serde_json::from_str(&context_json)?;
        Ok(Record {
            id,
            text,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| StoreError::DateParse(e.to_string()))?
                .with_timezone(&Utc),
            url,
            context,
        })
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl ResponseStore for SqliteStore {
    async fn save(&self, record: Record) -> StoreResult<()> {
        let context_json = serde_json::to_string(&record.context)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO responses (id, text, timestamp, url, context_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                timestamp = excluded.timestamp,
                url = excluded.url,
                context_json = excluded.context_json
            "#,
            params![
                record.id,
                record.text,
                format_timestamp(&record.timestamp),
                record.url,
                context_json,
            ],
        )?;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Record>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, text, timestamp, url, context_json FROM responses
             ORDER BY timestamp DESC, seq DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, text, timestamp, url, context_json)| {
                Self::row_to_record(id, text, timestamp, url, context_json)
            })
            .collect()
    }

    async fn clear(&self) -> StoreResult<()> {
        self.conn()?.execute("DELETE FROM responses", [])?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let changed = self
            .conn()?
            .execute("DELETE FROM responses WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}
