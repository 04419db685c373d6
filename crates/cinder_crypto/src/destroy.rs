//! Key destruction
//!
//! Destroying a key means: overwrite its buffer once with fresh random bytes,
//! zero it, free it. One pass is enough because the buffer types here are
//! exclusively owned, never `Clone`, and live behind a box that does not move,
//! so the overwritten allocation is the only copy this crate ever held.
//!
//! Destruction is idempotent. The only failure is a malformed handle (a buffer
//! that cannot be the key it claims to be); its bytes are wiped regardless.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::trace;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::{SymmetricKey, SYMMETRIC_KEY_LEN, WRAPPED_KEY_LEN};

// ── Secret buffers ────────────────────────────────────────────────────────────

/// Exclusively owned secret bytes. `None` once destroyed.
pub struct SecretBuffer {
    bytes: Option<Box<[u8]>>,
}

impl SecretBuffer {
    pub fn random(len: usize) -> Self {
        let mut bytes = vec![0u8; len].into_boxed_slice();
        OsRng.fill_bytes(&mut bytes);
        Self { bytes: Some(bytes) }
    }

    pub fn copy_from(src: &[u8]) -> Self {
        Self {
            bytes: Some(Box::from(src)),
        }
    }

    /// Take ownership of `v`. Spare capacity would make `into_boxed_slice`
    /// reallocate and leave a stale copy behind, so copy and wipe instead.
    pub fn from_vec(mut v: Vec<u8>) -> Self {
        if v.len() == v.capacity() {
            return Self {
                bytes: Some(v.into_boxed_slice()),
            };
        }
        let buf = Self::copy_from(&v);
        v.zeroize();
        buf
    }

    /// Borrow the bytes; empty after destruction.
    pub fn expose(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.expose().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.bytes.is_none()
    }

    /// Overwrite, zero and free. Returns `false` if already destroyed.
    pub fn destroy(&mut self) -> bool {
        match self.bytes.take() {
            Some(mut bytes) => {
                OsRng.fill_bytes(&mut bytes);
                bytes.zeroize();
                drop(bytes);
                true
            }
            None => false,
        }
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBuffer")
            .field("len", &self.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// ── Key handles ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Raw AEAD key (per-message or ephemeral session key).
    Symmetric,
    /// RSA-OAEP wrapped AEAD key as persisted next to a message.
    Wrapped,
}

/// A key-bearing object handed to the destroyer.
#[derive(Debug)]
pub struct KeyHandle {
    kind: KeyKind,
    buffer: SecretBuffer,
}

impl KeyHandle {
    pub fn symmetric(key: SymmetricKey) -> Self {
        Self {
            kind: KeyKind::Symmetric,
            buffer: key.0,
        }
    }

    pub fn wrapped(bytes: Vec<u8>) -> Self {
        Self {
            kind: KeyKind::Wrapped,
            buffer: SecretBuffer::from_vec(bytes),
        }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn is_destroyed(&self) -> bool {
        self.buffer.is_destroyed()
    }

    fn validate(&self) -> Result<(), CryptoError> {
        let (expected, what) = match self.kind {
            KeyKind::Symmetric => (SYMMETRIC_KEY_LEN, "symmetric key"),
            KeyKind::Wrapped => (WRAPPED_KEY_LEN, "wrapped key"),
        };
        if self.buffer.len() != expected {
            return Err(CryptoError::MalformedHandle(format!(
                "{what} must be {expected} bytes, got {}",
                self.buffer.len()
            )));
        }
        Ok(())
    }
}

// ── Destroyer ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct KeyDestroyer;

impl KeyDestroyer {
    pub fn new() -> Self {
        Self
    }

    /// Render the handle's key material unrecoverable.
    ///
    /// Already-destroyed handles are a no-op. A malformed handle is still
    /// wiped, then reported.
    pub fn destroy(&self, handle: &mut KeyHandle) -> Result<(), CryptoError> {
        if handle.is_destroyed() {
            trace!(kind = ?handle.kind, "key already destroyed");
            return Ok(());
        }
        let verdict = handle.validate();
        handle.buffer.destroy();
        trace!(kind = ?handle.kind, ok = verdict.is_ok(), "key destroyed");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_is_idempotent() {
        let destroyer = KeyDestroyer::new();
        let mut handle = KeyHandle::symmetric(SymmetricKey::generate());
        assert!(!handle.is_destroyed());

        destroyer.destroy(&mut handle).unwrap();
        assert!(handle.is_destroyed());
        destroyer.destroy(&mut handle).unwrap();
        assert!(handle.is_destroyed());
    }

    #[test]
    fn wrapped_handle_of_wrong_length_is_malformed_but_wiped() {
        let destroyer = KeyDestroyer::new();
        let mut handle = KeyHandle::wrapped(vec![1u8; 17]);
        let err = destroyer.destroy(&mut handle).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedHandle(_)));
        assert!(handle.is_destroyed());

        // Second call sees a destroyed handle, not a malformed one.
        destroyer.destroy(&mut handle).unwrap();
    }

    #[test]
    fn wrapped_handle_of_modulus_length_is_accepted() {
        let destroyer = KeyDestroyer::new();
        let mut handle = KeyHandle::wrapped(vec![3u8; WRAPPED_KEY_LEN]);
        assert_eq!(handle.kind(), KeyKind::Wrapped);
        destroyer.destroy(&mut handle).unwrap();
        assert!(handle.is_destroyed());
    }

    #[test]
    fn secret_buffer_empties_on_destroy() {
        let mut buf = SecretBuffer::copy_from(b"top secret");
        assert_eq!(buf.expose(), b"top secret");
        assert!(buf.destroy());
        assert!(buf.expose().is_empty());
        assert!(!buf.destroy());
    }

    #[test]
    fn from_vec_with_spare_capacity_keeps_contents() {
        let mut v = Vec::with_capacity(64);
        v.extend_from_slice(&[5u8; 10]);
        let buf = SecretBuffer::from_vec(v);
        assert_eq!(buf.expose(), &[5u8; 10]);
    }
}
