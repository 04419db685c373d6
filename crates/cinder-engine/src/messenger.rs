//! API-facing facade over the cipher, the store and the scheduler.
//!
//! Message creation is encrypt-then-persist: the message row (with its
//! deadline) and its session-key record go to the store in one write, and the
//! id is returned only after that write lands. A failed creation leaves
//! nothing behind for the sweeps to miss.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use cinder_crypto::{
    CryptoError, EphemeralSessionStore, HybridCipher, RecipientKeyPair, RecipientPublicKey,
    SealedMessage,
};
use cinder_store::models::now;
use cinder_store::{MessageRecord, SessionKeyRecord, Store};
use serde::Serialize;
use tracing::info;
use zeroize::Zeroizing;

use crate::audit::DestructionReason;
use crate::error::EngineError;
use crate::scheduler::{DestroyOutcome, DestructionScheduler, QueueEntry};

pub struct NewMessage<'a> {
    pub sender_id: &'a str,
    pub recipient_id: &'a str,
    pub plaintext: &'a str,
    pub recipient_key: &'a RecipientPublicKey,
    /// `None` for no deadline; `Some` must be positive.
    pub self_destruct_secs: Option<i64>,
    pub read_once: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedMessage {
    pub message_id: String,
    pub ciphertext_b64: String,
    pub wrapped_key_b64: String,
    pub deadline: Option<DateTime<Utc>>,
}

pub struct SecureMessenger {
    scheduler: Arc<DestructionScheduler>,
    sessions: EphemeralSessionStore,
}

impl SecureMessenger {
    pub fn new(scheduler: Arc<DestructionScheduler>) -> Self {
        Self {
            scheduler,
            sessions: EphemeralSessionStore::new(),
        }
    }

    pub fn scheduler(&self) -> &Arc<DestructionScheduler> {
        &self.scheduler
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.scheduler.store()
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    pub async fn create_secure_message(
        &self,
        new: NewMessage<'_>,
    ) -> Result<CreatedMessage, EngineError> {
        let created_at = now();
        let deadline = new
            .self_destruct_secs
            .map(|secs| DestructionScheduler::compute_deadline(created_at, secs))
            .transpose()?;

        let sealed = HybridCipher::encrypt(new.plaintext.as_bytes(), new.recipient_key)?;
        let created = CreatedMessage {
            message_id: String::new(),
            ciphertext_b64: sealed.ciphertext_b64(),
            wrapped_key_b64: sealed.wrapped_key_b64(),
            deadline,
        };

        let mut record = MessageRecord::new(
            new.sender_id,
            new.recipient_id,
            sealed.ciphertext,
            sealed.wrapped_key,
        );
        record.created_at = created_at;
        record.destruct_at = deadline;
        record.read_once = new.read_once;

        let mut key_record = SessionKeyRecord::new(&record.id, record.wrapped_key.clone());
        key_record.created_at = created_at;
        key_record.expires_at = deadline;

        self.store()
            .insert_message_with_key(&record, &key_record)
            .await?;
        if let Some(deadline) = deadline {
            self.scheduler.remember(&record.id, deadline, record.read_once);
        }

        info!(
            message_id = %record.id,
            sender_id = new.sender_id,
            recipient_id = new.recipient_id,
            read_once = new.read_once,
            deadline = ?deadline,
            "secure message created"
        );
        Ok(CreatedMessage {
            message_id: record.id,
            ..created
        })
    }

    /// Decrypt a stored message for its recipient.
    ///
    /// Destroyed and expired messages are `State` errors. A read-once message
    /// is consumed by destroying it: the plaintext is handed out only to the
    /// open whose destroy wins, and a concurrent second open gets `State`. If
    /// the destroy fails the message stays intact and unread.
    pub async fn open_secure_message(
        &self,
        message_id: &str,
        recipient: &RecipientKeyPair,
    ) -> Result<Zeroizing<String>, EngineError> {
        let now = now();
        let message = self
            .store()
            .get_message(message_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(message_id.to_string()))?;
        if message.is_deleted {
            return Err(EngineError::State(format!("message {message_id} destroyed")));
        }
        if message.is_expired(now) {
            self.scheduler
                .destroy_now(message_id, DestructionReason::SweepExpired, now)
                .await?;
            return Err(EngineError::State(format!("message {message_id} expired")));
        }

        let plaintext =
            HybridCipher::decrypt_to_string(&message.ciphertext, &message.wrapped_key, recipient)?;

        if message.read_once {
            return match self
                .scheduler
                .destroy_now(message_id, DestructionReason::ReadOnce, now)
                .await?
            {
                DestroyOutcome::Destroyed => Ok(plaintext),
                DestroyOutcome::AlreadyDestroyed | DestroyOutcome::NotFound => Err(
                    EngineError::State(format!("message {message_id} already consumed")),
                ),
            };
        }
        self.store().mark_read(message_id).await?;
        Ok(plaintext)
    }

    /// Decrypt transport strings without touching storage.
    pub fn open_sealed(
        &self,
        ciphertext_b64: &str,
        wrapped_key_b64: &str,
        recipient: &RecipientKeyPair,
    ) -> Result<Zeroizing<String>, EngineError> {
        let sealed = SealedMessage::from_b64(ciphertext_b64, wrapped_key_b64)?;
        Ok(HybridCipher::decrypt_to_string(
            &sealed.ciphertext,
            &sealed.wrapped_key,
            recipient,
        )?)
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<DestroyOutcome, EngineError> {
        self.scheduler
            .destroy_now(message_id, DestructionReason::Explicit, now())
            .await
    }

    // ── Scheduling pass-through ──────────────────────────────────────────────

    pub async fn schedule_destruction(
        &self,
        message_id: &str,
        delta_secs: i64,
        read_once: bool,
    ) -> Result<DateTime<Utc>, EngineError> {
        self.scheduler
            .schedule_destruction(message_id, delta_secs, read_once, now())
            .await
    }

    pub async fn cancel_destruction(&self, message_id: &str) -> Result<bool, EngineError> {
        self.scheduler.cancel_destruction(message_id).await
    }

    pub async fn destruction_queue(&self) -> Result<Vec<QueueEntry>, EngineError> {
        self.scheduler.destruction_queue(now()).await
    }

    // ── Ephemeral sessions ───────────────────────────────────────────────────

    pub fn sessions(&self) -> &EphemeralSessionStore {
        &self.sessions
    }

    /// Encrypt under an active ephemeral session; base64 output.
    pub fn encrypt_with_session(
        &self,
        plaintext: &str,
        session_id: &str,
    ) -> Result<String, EngineError> {
        let sealed = self
            .sessions
            .encrypt_with_session(plaintext.as_bytes(), session_id)?;
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt_with_session(
        &self,
        ciphertext_b64: &str,
        session_id: &str,
    ) -> Result<Zeroizing<String>, EngineError> {
        let data = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| EngineError::Crypto(CryptoError::from(e)))?;
        let mut bytes = self.sessions.decrypt_with_session(&data, session_id)?;
        match String::from_utf8(std::mem::take(&mut *bytes)) {
            Ok(text) => Ok(Zeroizing::new(text)),
            Err(e) => {
                drop(Zeroizing::new(e.into_bytes()));
                Err(EngineError::Crypto(CryptoError::InvalidUtf8))
            }
        }
    }

    /// Destroy every ephemeral session, e.g. on shutdown.
    pub fn end_all_sessions(&self) -> usize {
        let ended = self.sessions.destroy_all();
        if ended > 0 {
            info!(ended, "ephemeral sessions destroyed");
        }
        ended
    }
}
