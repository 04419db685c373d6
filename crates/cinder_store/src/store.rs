use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{IncidentRecord, MessageRecord, SessionKeyRecord, SystemLogEntry};

/// Persistence collaborator of the lifecycle engine.
///
/// Time is always passed in by the caller; implementations never read the
/// clock for filtering. Deadline comparisons are strict (`deadline < now`).
#[async_trait]
pub trait Store: Send + Sync {
    // ── Messages ─────────────────────────────────────────────────────────────

    /// Fails with `Constraint` on a duplicate id or a deadline not after
    /// `created_at`.
    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError>;

    /// Insert a message and its session-key record as one write: either both
    /// rows exist afterwards or neither does.
    async fn insert_message_with_key(
        &self,
        message: &MessageRecord,
        key: &SessionKeyRecord,
    ) -> Result<(), StoreError>;

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, StoreError>;

    /// Set or clear the destruction deadline. `read_once` can switch the
    /// flag on but never off. The expiry of the session-key record with the
    /// same id, if still live, follows the new deadline.
    ///
    /// Returns `false` without touching anything if the message is already
    /// deleted.
    async fn set_destruction(
        &self,
        id: &str,
        destruct_at: Option<DateTime<Utc>>,
        read_once: bool,
    ) -> Result<bool, StoreError>;

    /// Flip `is_read`. Returns `true` only for the call that flipped it.
    async fn mark_read(&self, id: &str) -> Result<bool, StoreError>;

    /// Flip `is_deleted` and empty the ciphertext and wrapped key. Returns
    /// `true` only for the call that flipped it.
    async fn mark_deleted(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Non-deleted messages whose deadline has passed.
    async fn expired_messages(&self, now: DateTime<Utc>) -> Result<Vec<MessageRecord>, StoreError>;

    /// Non-deleted messages with a deadline still ahead, soonest first.
    async fn scheduled_messages(&self, now: DateTime<Utc>)
        -> Result<Vec<MessageRecord>, StoreError>;

    async fn count_expired_messages(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    // ── Session keys ─────────────────────────────────────────────────────────

    async fn insert_session_key(&self, key: &SessionKeyRecord) -> Result<(), StoreError>;

    async fn get_session_key(&self, id: &str) -> Result<Option<SessionKeyRecord>, StoreError>;

    /// Flip `is_destroyed` and empty the wrapped key. Returns `true` only for
    /// the call that flipped it; absent ids return `false`.
    async fn destroy_session_key(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn expired_session_keys(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionKeyRecord>, StoreError>;

    async fn count_expired_session_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    // ── Logs ─────────────────────────────────────────────────────────────────

    async fn append_system_log(&self, entry: &SystemLogEntry) -> Result<(), StoreError>;

    /// Newest first.
    async fn recent_system_logs(&self, limit: usize) -> Result<Vec<SystemLogEntry>, StoreError>;

    /// Delete entries older than `before`. Returns how many went.
    async fn purge_system_logs(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn insert_incident(&self, incident: &IncidentRecord) -> Result<(), StoreError>;

    async fn get_incident(&self, id: &str) -> Result<Option<IncidentRecord>, StoreError>;

    /// Returns `false` if the incident is absent or already resolved.
    async fn resolve_incident(
        &self,
        id: &str,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Delete resolved incidents recorded before `before`.
    async fn purge_resolved_incidents(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
