//! Ephemeral sessions (forward secrecy)
//!
//! A session id maps to a symmetric key that exists only in this process.
//! Nothing here is ever persisted: a restart destroys every session, which is
//! the point. Lifecycle per id:
//!
//! ```text
//! absent ──create/open──▶ active ──destroy──▶ destroyed (terminal)
//! ```
//!
//! Unlike the per-message keys in `hybrid`, a session key is reused for many
//! messages, so every `encrypt_with_session` call draws a new random nonce
//! (`aead::seal` always does).
//!
//! Creation is explicit. `create_session` insists the id is new;
//! `open_session` is the get-or-create variant for callers that want it.
//! Encrypt and decrypt never create.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::aead;
use crate::destroy::{KeyDestroyer, KeyHandle};
use crate::error::CryptoError;
use crate::keys::SymmetricKey;

struct EphemeralSession {
    key: SymmetricKey,
    created_at: DateTime<Utc>,
}

enum Slot {
    Active(EphemeralSession),
    Destroyed,
}

#[derive(Default)]
pub struct EphemeralSessionStore {
    sessions: Mutex<HashMap<String, Slot>>,
    destroyer: KeyDestroyer,
}

impl EphemeralSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `absent → active`. Fails if the id is active or was destroyed.
    pub fn create_session(&self, session_id: &str) -> Result<DateTime<Utc>, CryptoError> {
        let mut sessions = self.sessions.lock();
        match sessions.get(session_id) {
            Some(Slot::Active(_)) => Err(CryptoError::SessionExists(session_id.to_string())),
            Some(Slot::Destroyed) => Err(CryptoError::SessionDestroyed(session_id.to_string())),
            None => {
                let created_at = Utc::now();
                sessions.insert(
                    session_id.to_string(),
                    Slot::Active(EphemeralSession {
                        key: SymmetricKey::generate(),
                        created_at,
                    }),
                );
                debug!(session_id, "ephemeral session created");
                Ok(created_at)
            }
        }
    }

    /// Get-or-create. Returns `true` if this call created the session.
    /// A destroyed id stays destroyed.
    pub fn open_session(&self, session_id: &str) -> Result<bool, CryptoError> {
        match self.create_session(session_id) {
            Ok(_) => Ok(true),
            Err(CryptoError::SessionExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        matches!(self.sessions.lock().get(session_id), Some(Slot::Active(_)))
    }

    pub fn created_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        match self.sessions.lock().get(session_id) {
            Some(Slot::Active(session)) => Some(session.created_at),
            _ => None,
        }
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encrypt_with_session(
        &self,
        plaintext: &[u8],
        session_id: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let sessions = self.sessions.lock();
        let session = active(&sessions, session_id)?;
        aead::seal(&session.key, plaintext)
    }

    pub fn decrypt_with_session(
        &self,
        data: &[u8],
        session_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let sessions = self.sessions.lock();
        let session = active(&sessions, session_id)?;
        aead::open(&session.key, data)
    }

    /// `active → destroyed`. Returns `true` if a live key was destroyed;
    /// absent or already-destroyed ids are a no-op.
    pub fn destroy_session(&self, session_id: &str) -> bool {
        let previous = {
            let mut sessions = self.sessions.lock();
            match sessions.get(session_id) {
                Some(Slot::Active(_)) => sessions.insert(session_id.to_string(), Slot::Destroyed),
                _ => None,
            }
        };
        match previous {
            Some(Slot::Active(session)) => {
                self.destroy_key(session_id, session.key);
                true
            }
            _ => false,
        }
    }

    /// Destroy every active session. Returns how many were destroyed.
    pub fn destroy_all(&self) -> usize {
        let drained: Vec<(String, EphemeralSession)> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| match sessions.insert(id.clone(), Slot::Destroyed) {
                    Some(Slot::Active(session)) => Some((id, session)),
                    _ => None,
                })
                .collect()
        };
        let count = drained.len();
        for (id, session) in drained {
            self.destroy_key(&id, session.key);
        }
        count
    }

    fn destroy_key(&self, session_id: &str, key: SymmetricKey) {
        let mut handle = KeyHandle::symmetric(key);
        match self.destroyer.destroy(&mut handle) {
            Ok(()) => debug!(session_id, "ephemeral session destroyed"),
            Err(e) => error!(session_id, error = %e, "ephemeral session key destruction failed"),
        }
    }
}

fn active<'a>(
    sessions: &'a HashMap<String, Slot>,
    session_id: &str,
) -> Result<&'a EphemeralSession, CryptoError> {
    match sessions.get(session_id) {
        Some(Slot::Active(session)) => Ok(session),
        Some(Slot::Destroyed) => Err(CryptoError::SessionDestroyed(session_id.to_string())),
        None => Err(CryptoError::SessionNotFound(session_id.to_string())),
    }
}
