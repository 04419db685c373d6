//! Destruction scheduling.
//!
//! The message's `destruct_at` column is the only durable record of a pending
//! destruction. The in-memory cache here is an index over it for near-term
//! firing and may be dropped at any time; `sweep_expired` rebuilds every
//! obligation from storage.
//!
//! Every trigger (cache fire, sweep, read-once, explicit delete) funnels into
//! [`DestructionScheduler::destroy_now`]. Its `mark_deleted` step is a
//! conditional update in the store, so when two triggers race only one of
//! them records the destruction and writes the audit entry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use cinder_crypto::{KeyDestroyer, KeyHandle};
use cinder_store::{MessageRecord, Store};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audit::{self, DestructionReason};
use crate::config::SweepConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    deadline: DateTime<Utc>,
    read_once: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyOutcome {
    Destroyed,
    AlreadyDestroyed,
    /// No such message. Treated as effectively destroyed.
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub destroyed: usize,
    pub already_destroyed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub deadline: DateTime<Utc>,
    #[serde(serialize_with = "serialize_secs")]
    pub time_remaining: Duration,
    pub read_once: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupStats {
    pub expired_messages: u64,
    pub expired_keys: u64,
    /// Entries in the in-memory schedule.
    pub cached_schedules: usize,
    /// Pending deadlines in durable storage.
    pub queued_messages: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub fired: usize,
    pub messages: SweepReport,
    pub keys_destroyed: usize,
    pub incidents_purged: u64,
    pub logs_purged: u64,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.num_milliseconds() as f64 / 1000.0)
}

pub struct DestructionScheduler {
    store: Arc<dyn Store>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    destroyer: KeyDestroyer,
    incident_retention: Duration,
    log_retention: Duration,
}

impl DestructionScheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, &SweepConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: &SweepConfig) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            destroyer: KeyDestroyer::new(),
            incident_retention: config.incident_retention(),
            log_retention: config.log_retention(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// `now + delta_secs`, at storage precision. Fails for non-positive or
    /// out-of-range deltas.
    pub fn compute_deadline(now: DateTime<Utc>, delta_secs: i64) -> Result<DateTime<Utc>, EngineError> {
        if delta_secs <= 0 {
            return Err(EngineError::Scheduling(format!(
                "destruction delay must be positive, got {delta_secs}s"
            )));
        }
        Duration::try_seconds(delta_secs)
            .and_then(|delta| now.checked_add_signed(delta))
            .map(|deadline| deadline.trunc_subsecs(3))
            .ok_or_else(|| {
                EngineError::Scheduling(format!("destruction delay {delta_secs}s out of range"))
            })
    }

    // ── Scheduling ───────────────────────────────────────────────────────────

    /// Persist `deadline = now + delta_secs` on the message and cache it.
    /// `read_once = true` marks the message read-once; `false` leaves its
    /// existing flag alone.
    pub async fn schedule_destruction(
        &self,
        message_id: &str,
        delta_secs: i64,
        read_once: bool,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, EngineError> {
        let deadline = Self::compute_deadline(now, delta_secs)?;
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(message_id.to_string()))?;
        if message.is_deleted {
            return Err(EngineError::State(format!("message {message_id} already destroyed")));
        }
        if deadline <= message.created_at {
            return Err(EngineError::Scheduling(format!(
                "deadline {deadline} does not follow creation at {}",
                message.created_at
            )));
        }
        let read_once = message.read_once || read_once;
        if !self
            .store
            .set_destruction(message_id, Some(deadline), read_once)
            .await?
        {
            return Err(EngineError::State(format!("message {message_id} already destroyed")));
        }
        self.remember(message_id, deadline, read_once);
        info!(message_id, %deadline, read_once, "destruction scheduled");
        Ok(deadline)
    }

    /// Schedule each id with the same delay, each keeping its own read-once
    /// flag. Per-id failures are logged and skipped; returns how many were
    /// scheduled.
    pub async fn schedule_bulk_destruction(
        &self,
        message_ids: &[String],
        delta_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        Self::compute_deadline(now, delta_secs)?;
        let mut scheduled = 0;
        for id in message_ids {
            match self.schedule_destruction(id, delta_secs, false, now).await {
                Ok(_) => scheduled += 1,
                Err(e) => warn!(message_id = %id, error = %e, "bulk scheduling skipped message"),
            }
        }
        info!(requested = message_ids.len(), scheduled, "bulk destruction scheduled");
        Ok(scheduled)
    }

    /// Clear the persisted deadline. Does not stop a destroy already in
    /// flight. Returns `false` if the message was already destroyed.
    pub async fn cancel_destruction(&self, message_id: &str) -> Result<bool, EngineError> {
        self.forget(message_id);
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(message_id.to_string()))?;
        if message.is_deleted {
            return Ok(false);
        }
        let cleared = self
            .store
            .set_destruction(message_id, None, message.read_once)
            .await?;
        if cleared {
            info!(message_id, "destruction cancelled");
        }
        Ok(cleared)
    }

    pub(crate) fn remember(&self, message_id: &str, deadline: DateTime<Utc>, read_once: bool) {
        self.cache.lock().insert(
            message_id.to_string(),
            CacheEntry {
                deadline,
                read_once,
            },
        );
    }

    fn forget(&self, message_id: &str) {
        self.cache.lock().remove(message_id);
    }

    // ── Destruction ──────────────────────────────────────────────────────────

    /// The single destroy routine. Idempotent; a missing message is reported
    /// as [`DestroyOutcome::NotFound`], not as an error.
    pub async fn destroy_now(
        &self,
        message_id: &str,
        reason: DestructionReason,
        now: DateTime<Utc>,
    ) -> Result<DestroyOutcome, EngineError> {
        let Some(mut message) = self.store.get_message(message_id).await? else {
            self.forget(message_id);
            warn!(message_id, "message not found for destruction");
            return Ok(DestroyOutcome::NotFound);
        };
        if message.is_deleted {
            self.forget(message_id);
            self.retire_session_key(message_id, now).await;
            debug!(message_id, "message already destroyed");
            return Ok(DestroyOutcome::AlreadyDestroyed);
        }

        let mut handle = KeyHandle::wrapped(std::mem::take(&mut message.wrapped_key));
        let defect = self.destroyer.destroy(&mut handle).err().map(|e| e.to_string());

        if !self.store.mark_deleted(message_id, now).await? {
            self.forget(message_id);
            debug!(message_id, "lost destruction race");
            return Ok(DestroyOutcome::AlreadyDestroyed);
        }
        self.retire_session_key(message_id, now).await;
        self.forget(message_id);

        match &defect {
            Some(defect) => error!(
                message_id,
                reason = reason.as_str(),
                defect = %defect,
                "PARTIAL_DESTRUCTION: message flagged deleted but key handle was malformed"
            ),
            None => info!(message_id, reason = reason.as_str(), "message destroyed"),
        }
        self.audit(&message, reason, now, defect.as_deref()).await;
        Ok(DestroyOutcome::Destroyed)
    }

    async fn retire_session_key(&self, message_id: &str, now: DateTime<Utc>) {
        match self.store.destroy_session_key(message_id, now).await {
            Ok(true) => debug!(message_id, "session key record destroyed"),
            Ok(false) => {}
            Err(e) => warn!(message_id, error = %e, "session key record not updated"),
        }
    }

    async fn audit(
        &self,
        message: &MessageRecord,
        reason: DestructionReason,
        now: DateTime<Utc>,
        defect: Option<&str>,
    ) {
        let entry = audit::destruction_entry(message, reason, now, defect);
        if let Err(e) = self.store.append_system_log(&entry).await {
            warn!(message_id = %message.id, error = %e, "destruction audit entry not written");
        }
    }

    // ── Sweeps ───────────────────────────────────────────────────────────────

    /// Fast path: destroy cached entries whose deadline has passed. Failures
    /// stay in the cache and are retried; the durable sweep covers them too.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<String> = self
            .cache
            .lock()
            .iter()
            .filter(|(_, entry)| entry.deadline < now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut destroyed = 0;
        for id in due {
            match self
                .destroy_now(&id, DestructionReason::ScheduledSelfDestruct, now)
                .await
            {
                Ok(DestroyOutcome::Destroyed) => destroyed += 1,
                Ok(_) => {}
                Err(e) => warn!(message_id = %id, error = %e, "scheduled destruction failed"),
            }
        }
        destroyed
    }

    /// Durable reconciliation: destroy every non-deleted message past its
    /// deadline. One bad record never stops the rest; failing to list at all
    /// is returned to the caller.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let expired = self.store.expired_messages(now).await?;
        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };
        for message in expired {
            match self
                .destroy_now(&message.id, DestructionReason::SweepExpired, now)
                .await
            {
                Ok(DestroyOutcome::Destroyed) => report.destroyed += 1,
                Ok(_) => report.already_destroyed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(message_id = %message.id, error = %e, "sweep skipped message");
                }
            }
        }
        if report.destroyed > 0 || report.failed > 0 {
            info!(
                destroyed = report.destroyed,
                failed = report.failed,
                "expired message sweep"
            );
        }
        Ok(report)
    }

    /// Destroy session-key records past their expiry.
    pub async fn sweep_expired_keys(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let expired = self.store.expired_session_keys(now).await?;
        let mut destroyed = 0;
        for key in expired {
            let mut handle = KeyHandle::wrapped(key.wrapped_key);
            if let Err(e) = self.destroyer.destroy(&mut handle) {
                warn!(key_id = %key.id, error = %e, "expired session key handle malformed");
            }
            match self.store.destroy_session_key(&key.id, now).await {
                Ok(true) => destroyed += 1,
                Ok(false) => {}
                Err(e) => warn!(key_id = %key.id, error = %e, "expired session key not destroyed"),
            }
        }
        if destroyed > 0 {
            info!(destroyed, "expired session keys destroyed");
        }
        Ok(destroyed)
    }

    pub async fn purge_resolved_incidents(&self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let purged = self
            .store
            .purge_resolved_incidents(now - self.incident_retention)
            .await?;
        if purged > 0 {
            info!(purged, "old resolved incidents purged");
        }
        Ok(purged)
    }

    pub async fn purge_system_logs(&self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let purged = self.store.purge_system_logs(now - self.log_retention).await?;
        if purged > 0 {
            info!(purged, "old system logs purged");
        }
        Ok(purged)
    }

    /// Every sweep once, in order.
    pub async fn force_cleanup(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, EngineError> {
        info!("forced cleanup started");
        let report = MaintenanceReport {
            fired: self.fire_due(now).await,
            messages: self.sweep_expired(now).await?,
            keys_destroyed: self.sweep_expired_keys(now).await?,
            incidents_purged: self.purge_resolved_incidents(now).await?,
            logs_purged: self.purge_system_logs(now).await?,
        };
        info!(?report, "forced cleanup completed");
        Ok(report)
    }

    // ── Observability ────────────────────────────────────────────────────────

    /// Pending destructions from durable storage, soonest first.
    pub async fn destruction_queue(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>, EngineError> {
        let pending = self.store.scheduled_messages(now).await?;
        Ok(pending
            .into_iter()
            .filter_map(|message| {
                let deadline = message.destruct_at?;
                Some(QueueEntry {
                    time_remaining: deadline - now,
                    message_id: message.id,
                    sender_id: message.sender_id,
                    recipient_id: message.recipient_id,
                    deadline,
                    read_once: message.read_once,
                })
            })
            .collect())
    }

    pub async fn statistics(&self, now: DateTime<Utc>) -> Result<CleanupStats, EngineError> {
        Ok(CleanupStats {
            expired_messages: self.store.count_expired_messages(now).await?,
            expired_keys: self.store.count_expired_session_keys(now).await?,
            cached_schedules: self.cached_len(),
            queued_messages: self.store.scheduled_messages(now).await?.len(),
            computed_at: now,
        })
    }

    /// Rebuild the cache from storage, e.g. after a restart.
    pub async fn warm_cache(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let pending = self.store.scheduled_messages(now).await?;
        let mut cache = self.cache.lock();
        for message in &pending {
            if let Some(deadline) = message.destruct_at {
                cache.insert(
                    message.id.clone(),
                    CacheEntry {
                        deadline,
                        read_once: message.read_once,
                    },
                );
            }
        }
        debug!(entries = cache.len(), "destruction cache warmed");
        Ok(pending.len())
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cached_deadline(&self, message_id: &str) -> Option<(DateTime<Utc>, bool)> {
        self.cache
            .lock()
            .get(message_id)
            .map(|entry| (entry.deadline, entry.read_once))
    }
}
