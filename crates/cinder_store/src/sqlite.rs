//! SQLite backend via sqlx.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::error::ErrorKind;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use tracing::debug;

use crate::error::StoreError;
use crate::models::{
    IncidentRecord, LogSeverity, MessageRecord, SessionKeyRecord, SystemLogEntry,
};
use crate::store::Store;

/// Cheap to clone (the pool is an `Arc` internally).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run pending migrations.
    ///
    /// WAL mode is set on the connection options, not in a migration: SQLite
    /// refuses to change `journal_mode` inside the transaction sqlx wraps
    /// each migration in.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        debug!(path = %db_path.display(), "sqlite store opened");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn message_exists(&self, id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// `Ok(false)` if the message exists, `NotFound` otherwise. Used after a
    /// conditional update touched no rows.
    async fn unchanged(&self, id: &str) -> Result<bool, StoreError> {
        if self.message_exists(id).await? {
            Ok(false)
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }
}

/// Check and unique violations become `Constraint`, matching the memory
/// backend; anything else stays a database error.
fn write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.kind(), ErrorKind::CheckViolation | ErrorKind::UniqueViolation) {
            return StoreError::Constraint(db.message().to_string());
        }
    }
    StoreError::Database(e)
}

async fn insert_message_row<'e, E>(exec: E, message: &MessageRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    message.check_deadline(message.destruct_at)?;
    sqlx::query(
        "INSERT INTO messages (id, sender_id, recipient_id, ciphertext, wrapped_key, created_at, destruct_at, read_once, is_read, is_deleted, deleted_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(&message.sender_id)
    .bind(&message.recipient_id)
    .bind(message.ciphertext.as_slice())
    .bind(message.wrapped_key.as_slice())
    .bind(millis(message.created_at))
    .bind(message.destruct_at.map(millis))
    .bind(message.read_once)
    .bind(message.is_read)
    .bind(message.is_deleted)
    .bind(message.deleted_at.map(millis))
    .execute(exec)
    .await
    .map_err(write_error)?;
    Ok(())
}

async fn insert_key_row<'e, E>(exec: E, key: &SessionKeyRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO session_keys (id, wrapped_key, created_at, expires_at, is_destroyed, destroyed_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&key.id)
    .bind(key.wrapped_key.as_slice())
    .bind(millis(key.created_at))
    .bind(key.expires_at.map(millis))
    .bind(key.is_destroyed)
    .bind(key.destroyed_at.map(millis))
    .execute(exec)
    .await
    .map_err(write_error)?;
    Ok(())
}

// ── Row mapping ───────────────────────────────────────────────────────────────

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(id: &str, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("timestamp {ms} out of range"),
        })
}

fn from_millis_opt(id: &str, ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(|ms| from_millis(id, ms)).transpose()
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    recipient_id: String,
    ciphertext: Vec<u8>,
    wrapped_key: Vec<u8>,
    created_at: i64,
    destruct_at: Option<i64>,
    read_once: bool,
    is_read: bool,
    is_deleted: bool,
    deleted_at: Option<i64>,
}

impl TryFrom<MessageRow> for MessageRecord {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, StoreError> {
        Ok(Self {
            created_at: from_millis(&row.id, row.created_at)?,
            destruct_at: from_millis_opt(&row.id, row.destruct_at)?,
            deleted_at: from_millis_opt(&row.id, row.deleted_at)?,
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            ciphertext: row.ciphertext,
            wrapped_key: row.wrapped_key,
            read_once: row.read_once,
            is_read: row.is_read,
            is_deleted: row.is_deleted,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionKeyRow {
    id: String,
    wrapped_key: Vec<u8>,
    created_at: i64,
    expires_at: Option<i64>,
    is_destroyed: bool,
    destroyed_at: Option<i64>,
}

impl TryFrom<SessionKeyRow> for SessionKeyRecord {
    type Error = StoreError;

    fn try_from(row: SessionKeyRow) -> Result<Self, StoreError> {
        Ok(Self {
            created_at: from_millis(&row.id, row.created_at)?,
            expires_at: from_millis_opt(&row.id, row.expires_at)?,
            destroyed_at: from_millis_opt(&row.id, row.destroyed_at)?,
            id: row.id,
            wrapped_key: row.wrapped_key,
            is_destroyed: row.is_destroyed,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: String,
    timestamp: i64,
    event_type: String,
    severity: String,
    message_id: Option<String>,
    data: String,
}

impl TryFrom<LogRow> for SystemLogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, StoreError> {
        let severity = LogSeverity::parse(&row.severity).ok_or_else(|| StoreError::Corrupt {
            id: row.id.clone(),
            reason: format!("unknown severity {:?}", row.severity),
        })?;
        Ok(Self {
            timestamp: from_millis(&row.id, row.timestamp)?,
            data: serde_json::from_str(&row.data)?,
            id: row.id,
            event_type: row.event_type,
            severity,
            message_id: row.message_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: String,
    user_id: String,
    threat_score: f64,
    reason: String,
    timestamp: i64,
    metadata: String,
    is_resolved: bool,
    resolved_at: Option<i64>,
    resolved_by: Option<String>,
}

impl TryFrom<IncidentRow> for IncidentRecord {
    type Error = StoreError;

    fn try_from(row: IncidentRow) -> Result<Self, StoreError> {
        Ok(Self {
            timestamp: from_millis(&row.id, row.timestamp)?,
            resolved_at: from_millis_opt(&row.id, row.resolved_at)?,
            metadata: serde_json::from_str(&row.metadata)?,
            id: row.id,
            user_id: row.user_id,
            threat_score: row.threat_score,
            reason: row.reason,
            is_resolved: row.is_resolved,
            resolved_by: row.resolved_by,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ── Store impl ────────────────────────────────────────────────────────────────

#[async_trait]
impl Store for SqliteStore {
    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        insert_message_row(&self.pool, message).await
    }

    async fn insert_message_with_key(
        &self,
        message: &MessageRecord,
        key: &SessionKeyRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_message_row(&mut *tx, message).await?;
        insert_key_row(&mut *tx, key).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MessageRecord::try_from).transpose()
    }

    async fn set_destruction(
        &self,
        id: &str,
        destruct_at: Option<DateTime<Utc>>,
        read_once: bool,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE messages SET destruct_at = ?, read_once = (read_once OR ?) WHERE id = ? AND is_deleted = 0",
        )
        .bind(destruct_at.map(millis))
        .bind(read_once)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return self.unchanged(id).await;
        }
        sqlx::query("UPDATE session_keys SET expires_at = ? WHERE id = ? AND is_destroyed = 0")
            .bind(destruct_at.map(millis))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn mark_read(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE id = ? AND is_read = 0 AND is_deleted = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.unchanged(id).await
    }

    async fn mark_deleted(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET is_deleted = 1, deleted_at = ?, ciphertext = X'', wrapped_key = X'' WHERE id = ? AND is_deleted = 0",
        )
        .bind(millis(at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.unchanged(id).await
    }

    async fn expired_messages(&self, now: DateTime<Utc>) -> Result<Vec<MessageRecord>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE is_deleted = 0 AND destruct_at IS NOT NULL AND destruct_at < ?",
        )
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn scheduled_messages(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE is_deleted = 0 AND destruct_at IS NOT NULL AND destruct_at > ? ORDER BY destruct_at ASC",
        )
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn count_expired_messages(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE is_deleted = 0 AND destruct_at IS NOT NULL AND destruct_at < ?",
        )
        .bind(millis(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn insert_session_key(&self, key: &SessionKeyRecord) -> Result<(), StoreError> {
        insert_key_row(&self.pool, key).await
    }

    async fn get_session_key(&self, id: &str) -> Result<Option<SessionKeyRecord>, StoreError> {
        let row: Option<SessionKeyRow> = sqlx::query_as("SELECT * FROM session_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SessionKeyRecord::try_from).transpose()
    }

    async fn destroy_session_key(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE session_keys SET is_destroyed = 1, destroyed_at = ?, wrapped_key = X'' WHERE id = ? AND is_destroyed = 0",
        )
        .bind(millis(at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn expired_session_keys(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionKeyRecord>, StoreError> {
        let rows: Vec<SessionKeyRow> = sqlx::query_as(
            "SELECT * FROM session_keys WHERE is_destroyed = 0 AND expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn count_expired_session_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session_keys WHERE is_destroyed = 0 AND expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(millis(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn append_system_log(&self, entry: &SystemLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system_logs (id, timestamp, event_type, severity, message_id, data) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(millis(entry.timestamp))
        .bind(&entry.event_type)
        .bind(entry.severity.as_str())
        .bind(entry.message_id.as_deref())
        .bind(serde_json::to_string(&entry.data)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_system_logs(&self, limit: usize) -> Result<Vec<SystemLogEntry>, StoreError> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT id, timestamp, event_type, severity, message_id, data FROM system_logs ORDER BY timestamp DESC, rowid DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn purge_system_logs(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM system_logs WHERE timestamp < ?")
            .bind(millis(before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_incident(&self, incident: &IncidentRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO incidents (id, user_id, threat_score, reason, timestamp, metadata, is_resolved, resolved_at, resolved_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&incident.id)
        .bind(&incident.user_id)
        .bind(incident.threat_score)
        .bind(&incident.reason)
        .bind(millis(incident.timestamp))
        .bind(serde_json::to_string(&incident.metadata)?)
        .bind(incident.is_resolved)
        .bind(incident.resolved_at.map(millis))
        .bind(incident.resolved_by.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_incident(&self, id: &str) -> Result<Option<IncidentRecord>, StoreError> {
        let row: Option<IncidentRow> = sqlx::query_as("SELECT * FROM incidents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(IncidentRecord::try_from).transpose()
    }

    async fn resolve_incident(
        &self,
        id: &str,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE incidents SET is_resolved = 1, resolved_at = ?, resolved_by = ? WHERE id = ? AND is_resolved = 0",
        )
        .bind(millis(at))
        .bind(resolved_by)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_resolved_incidents(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM incidents WHERE is_resolved = 1 AND timestamp < ?")
            .bind(millis(before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
