//! In-process store. Same semantics as the SQLite backend, minus durability.
//!
//! Switches for exercising failure paths:
//! - `set_available(false)`: every call fails with `Unavailable`.
//! - `set_read_only(true)`: reads succeed, every write fails with
//!   `Unavailable`, like a database whose disk filled up mid-request.
//! - `corrupt_message(id)`: `get_message` for that id fails with `Corrupt`
//!   while listings still return it, like a row that matches a query but
//!   cannot be loaded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::models::{IncidentRecord, MessageRecord, SessionKeyRecord, SystemLogEntry};
use crate::store::Store;

#[derive(Default)]
struct Tables {
    messages: HashMap<String, MessageRecord>,
    session_keys: HashMap<String, SessionKeyRecord>,
    system_logs: Vec<SystemLogEntry>,
    incidents: HashMap<String, IncidentRecord>,
    corrupt: HashSet<String>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
    read_only: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn corrupt_message(&self, id: &str) {
        self.tables.lock().corrupt.insert(id.to_string());
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is read-only".into()));
        }
        Ok(())
    }
}

fn check_new_message(tables: &Tables, message: &MessageRecord) -> Result<(), StoreError> {
    if tables.messages.contains_key(&message.id) {
        return Err(StoreError::Constraint(format!("duplicate message id {}", message.id)));
    }
    message.check_deadline(message.destruct_at)
}

fn check_new_key(tables: &Tables, key: &SessionKeyRecord) -> Result<(), StoreError> {
    if tables.session_keys.contains_key(&key.id) {
        return Err(StoreError::Constraint(format!("duplicate session key id {}", key.id)));
    }
    Ok(())
}

fn read_message(tables: &Tables, msg: &MessageRecord) -> Result<MessageRecord, StoreError> {
    if tables.corrupt.contains(&msg.id) {
        return Err(StoreError::Corrupt {
            id: msg.id.clone(),
            reason: "injected fault".into(),
        });
    }
    Ok(msg.clone())
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        check_new_message(&tables, message)?;
        tables.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn insert_message_with_key(
        &self,
        message: &MessageRecord,
        key: &SessionKeyRecord,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        check_new_message(&tables, message)?;
        check_new_key(&tables, key)?;
        tables.messages.insert(message.id.clone(), message.clone());
        tables.session_keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, StoreError> {
        self.check()?;
        let tables = self.tables.lock();
        tables
            .messages
            .get(id)
            .map(|msg| read_message(&tables, msg))
            .transpose()
    }

    async fn set_destruction(
        &self,
        id: &str,
        destruct_at: Option<DateTime<Utc>>,
        read_once: bool,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        let msg = tables
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if msg.is_deleted {
            return Ok(false);
        }
        msg.check_deadline(destruct_at)?;
        msg.destruct_at = destruct_at;
        msg.read_once |= read_once;
        if let Some(key) = tables.session_keys.get_mut(id) {
            if !key.is_destroyed {
                key.expires_at = destruct_at;
            }
        }
        Ok(true)
    }

    async fn mark_read(&self, id: &str) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        let msg = tables
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if msg.is_read || msg.is_deleted {
            return Ok(false);
        }
        msg.is_read = true;
        Ok(true)
    }

    async fn mark_deleted(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        let msg = tables
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if msg.is_deleted {
            return Ok(false);
        }
        msg.is_deleted = true;
        msg.deleted_at = Some(at);
        msg.ciphertext = Vec::new();
        msg.wrapped_key = Vec::new();
        Ok(true)
    }

    async fn expired_messages(&self, now: DateTime<Utc>) -> Result<Vec<MessageRecord>, StoreError> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .messages
            .values()
            .filter(|msg| msg.is_expired(now))
            .cloned()
            .collect())
    }

    async fn scheduled_messages(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.check()?;
        let mut pending: Vec<MessageRecord> = self
            .tables
            .lock()
            .messages
            .values()
            .filter(|msg| !msg.is_deleted && msg.destruct_at.is_some_and(|at| at > now))
            .cloned()
            .collect();
        pending.sort_by_key(|msg| msg.destruct_at);
        Ok(pending)
    }

    async fn count_expired_messages(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        let tables = self.tables.lock();
        Ok(tables.messages.values().filter(|msg| msg.is_expired(now)).count() as u64)
    }

    async fn insert_session_key(&self, key: &SessionKeyRecord) -> Result<(), StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        check_new_key(&tables, key)?;
        tables.session_keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    async fn get_session_key(&self, id: &str) -> Result<Option<SessionKeyRecord>, StoreError> {
        self.check()?;
        Ok(self.tables.lock().session_keys.get(id).cloned())
    }

    async fn destroy_session_key(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        match tables.session_keys.get_mut(id) {
            Some(key) if !key.is_destroyed => {
                key.is_destroyed = true;
                key.destroyed_at = Some(at);
                key.wrapped_key = Vec::new();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expired_session_keys(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionKeyRecord>, StoreError> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .session_keys
            .values()
            .filter(|key| key.is_expired(now))
            .cloned()
            .collect())
    }

    async fn count_expired_session_keys(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self
            .tables
            .lock()
            .session_keys
            .values()
            .filter(|key| key.is_expired(now))
            .count() as u64)
    }

    async fn append_system_log(&self, entry: &SystemLogEntry) -> Result<(), StoreError> {
        self.check_write()?;
        self.tables.lock().system_logs.push(entry.clone());
        Ok(())
    }

    async fn recent_system_logs(&self, limit: usize) -> Result<Vec<SystemLogEntry>, StoreError> {
        self.check()?;
        let tables = self.tables.lock();
        let mut logs = tables.system_logs.clone();
        // Stable sort keeps insertion order for equal timestamps; reversed
        // afterwards so the latest append comes first.
        logs.sort_by_key(|entry| entry.timestamp);
        logs.reverse();
        logs.truncate(limit);
        Ok(logs)
    }

    async fn purge_system_logs(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        let len = tables.system_logs.len();
        tables.system_logs.retain(|entry| entry.timestamp >= before);
        Ok((len - tables.system_logs.len()) as u64)
    }

    async fn insert_incident(&self, incident: &IncidentRecord) -> Result<(), StoreError> {
        self.check_write()?;
        self.tables
            .lock()
            .incidents
            .insert(incident.id.clone(), incident.clone());
        Ok(())
    }

    async fn get_incident(&self, id: &str) -> Result<Option<IncidentRecord>, StoreError> {
        self.check()?;
        Ok(self.tables.lock().incidents.get(id).cloned())
    }

    async fn resolve_incident(
        &self,
        id: &str,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        match tables.incidents.get_mut(id) {
            Some(incident) if !incident.is_resolved => {
                incident.is_resolved = true;
                incident.resolved_at = Some(at);
                incident.resolved_by = Some(resolved_by.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_resolved_incidents(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.lock();
        let len = tables.incidents.len();
        tables
            .incidents
            .retain(|_, incident| !(incident.is_resolved && incident.timestamp < before));
        Ok((len - tables.incidents.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now, LogSeverity};
    use chrono::Duration;

    fn message_due_in(secs: i64) -> MessageRecord {
        let mut msg = MessageRecord::new("alice", "bob", vec![7; 40], vec![9; 512]);
        msg.created_at = msg.created_at - Duration::hours(1);
        msg.destruct_at = Some(now() + Duration::seconds(secs));
        msg
    }

    #[tokio::test]
    async fn mark_deleted_flips_once_and_wipes_blobs() {
        let store = MemoryStore::new();
        let msg = message_due_in(60);
        store.insert_message(&msg).await.unwrap();

        assert!(store.mark_deleted(&msg.id, now()).await.unwrap());
        assert!(!store.mark_deleted(&msg.id, now()).await.unwrap());

        let stored = store.get_message(&msg.id).await.unwrap().unwrap();
        assert!(stored.is_deleted);
        assert!(stored.ciphertext.is_empty());
        assert!(stored.wrapped_key.is_empty());

        assert!(!store.set_destruction(&msg.id, None, false).await.unwrap());
        assert!(!store.mark_read(&msg.id).await.unwrap());
    }

    #[tokio::test]
    async fn set_destruction_keeps_read_once_and_moves_key_expiry() {
        let store = MemoryStore::new();
        let mut msg = message_due_in(60);
        msg.read_once = true;
        let key = SessionKeyRecord::new(&msg.id, vec![9; 512]).with_expiry(msg.destruct_at.unwrap());
        store.insert_message_with_key(&msg, &key).await.unwrap();

        let later = now() + Duration::hours(2);
        assert!(store.set_destruction(&msg.id, Some(later), false).await.unwrap());
        let stored = store.get_message(&msg.id).await.unwrap().unwrap();
        assert!(stored.read_once);
        assert_eq!(stored.destruct_at, Some(later));
        let key = store.get_session_key(&msg.id).await.unwrap().unwrap();
        assert_eq!(key.expires_at, Some(later));

        assert!(store.set_destruction(&msg.id, None, false).await.unwrap());
        assert_eq!(store.get_session_key(&msg.id).await.unwrap().unwrap().expires_at, None);
        assert!(store.get_message(&msg.id).await.unwrap().unwrap().read_once);
    }

    #[tokio::test]
    async fn backdated_or_duplicate_writes_are_rejected() {
        let store = MemoryStore::new();
        let mut msg = MessageRecord::new("alice", "bob", vec![7; 40], vec![9; 512]);
        msg.destruct_at = Some(msg.created_at - Duration::seconds(1));
        assert!(matches!(
            store.insert_message(&msg).await,
            Err(StoreError::Constraint(_))
        ));
        assert!(store.get_message(&msg.id).await.unwrap().is_none());

        msg.destruct_at = None;
        store.insert_message(&msg).await.unwrap();
        assert!(matches!(
            store.insert_message(&msg).await,
            Err(StoreError::Constraint(_))
        ));
        assert!(matches!(
            store.set_destruction(&msg.id, Some(msg.created_at), false).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn combined_insert_writes_both_rows_or_neither() {
        let store = MemoryStore::new();
        let taken = SessionKeyRecord::new("shared-id", vec![1; 512]);
        store.insert_session_key(&taken).await.unwrap();

        let mut msg = message_due_in(60);
        msg.id = "shared-id".into();
        let key = SessionKeyRecord::new("shared-id", vec![2; 512]);
        assert!(matches!(
            store.insert_message_with_key(&msg, &key).await,
            Err(StoreError::Constraint(_))
        ));
        assert!(store.get_message("shared-id").await.unwrap().is_none());
        assert_eq!(
            store.get_session_key("shared-id").await.unwrap().unwrap().wrapped_key,
            vec![1; 512]
        );
    }

    #[tokio::test]
    async fn read_only_switch_fails_writes_only() {
        let store = MemoryStore::new();
        let msg = message_due_in(60);
        store.insert_message(&msg).await.unwrap();

        store.set_read_only(true);
        assert!(store.get_message(&msg.id).await.unwrap().is_some());
        assert!(matches!(
            store.mark_deleted(&msg.id, now()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.insert_message(&message_due_in(5)).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_read_only(false);
        assert!(store.mark_deleted(&msg.id, now()).await.unwrap());
    }

    #[tokio::test]
    async fn missing_message_is_not_found() {
        let store = MemoryStore::new();
        assert!(store.get_message("nope").await.unwrap().is_none());
        assert!(matches!(
            store.mark_deleted("nope", now()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_and_scheduled_partition_pending_messages() {
        let store = MemoryStore::new();
        let past = message_due_in(-10);
        let soon = message_due_in(10);
        let later = message_due_in(9999);
        for msg in [&later, &past, &soon] {
            store.insert_message(msg).await.unwrap();
        }
        let t = now();

        let expired = store.expired_messages(t).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, past.id);
        assert_eq!(store.count_expired_messages(t).await.unwrap(), 1);

        let scheduled: Vec<String> = store
            .scheduled_messages(t)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(scheduled, vec![soon.id, later.id]);
    }

    #[tokio::test]
    async fn outage_switch_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.expired_messages(now()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.expired_messages(now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_message_fails_loads_only() {
        let store = MemoryStore::new();
        let msg = message_due_in(-5);
        store.insert_message(&msg).await.unwrap();
        store.corrupt_message(&msg.id);

        assert!(matches!(
            store.get_message(&msg.id).await,
            Err(StoreError::Corrupt { .. })
        ));
        assert_eq!(store.count_expired_messages(now()).await.unwrap(), 1);
        assert_eq!(store.expired_messages(now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_key_destroyed_once() {
        let store = MemoryStore::new();
        let key = SessionKeyRecord::new("k1", vec![1; 512]).with_expiry(now() - Duration::minutes(1));
        store.insert_session_key(&key).await.unwrap();
        assert_eq!(store.expired_session_keys(now()).await.unwrap().len(), 1);

        assert!(store.destroy_session_key("k1", now()).await.unwrap());
        assert!(!store.destroy_session_key("k1", now()).await.unwrap());
        assert!(!store.destroy_session_key("absent", now()).await.unwrap());
        assert_eq!(store.count_expired_session_keys(now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn log_and_incident_retention() {
        let store = MemoryStore::new();
        let t = now();
        let old = SystemLogEntry::new("OLD", LogSeverity::Info, serde_json::json!({}))
            .at(t - Duration::days(8));
        let fresh = SystemLogEntry::new("FRESH", LogSeverity::Info, serde_json::json!({}));
        store.append_system_log(&old).await.unwrap();
        store.append_system_log(&fresh).await.unwrap();
        assert_eq!(store.purge_system_logs(t - Duration::days(7)).await.unwrap(), 1);
        assert_eq!(store.recent_system_logs(10).await.unwrap()[0].event_type, "FRESH");

        let resolved = IncidentRecord::new("mallory", 0.92, "burst").at(t - Duration::days(31));
        let open = IncidentRecord::new("mallory", 0.80, "burst").at(t - Duration::days(31));
        store.insert_incident(&resolved).await.unwrap();
        store.insert_incident(&open).await.unwrap();
        assert!(store.resolve_incident(&resolved.id, "ops", t).await.unwrap());
        assert!(!store.resolve_incident(&resolved.id, "ops", t).await.unwrap());

        assert_eq!(store.purge_resolved_incidents(t - Duration::days(30)).await.unwrap(), 1);
        assert!(store.get_incident(&resolved.id).await.unwrap().is_none());
        assert!(store.get_incident(&open.id).await.unwrap().is_some());
    }
}
