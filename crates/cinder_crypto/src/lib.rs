//! cinder_crypto: cryptographic core of the Cinder message lifecycle engine
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Secret material lives in exclusively owned buffers that are overwritten
//!   and zeroized when destroyed or dropped.
//! - Per-message symmetric keys are single-use; session keys are reused and
//!   therefore always paired with a fresh random nonce.
//!
//! # Module layout
//! - `keys`    : RSA-4096 recipient keypairs, symmetric keys, secure random
//! - `aead`    : AES-256-GCM seal/open (`nonce ‖ tag ‖ ciphertext`)
//! - `hybrid`  : AEAD body + RSA-OAEP wrapped key
//! - `destroy` : deterministic, idempotent key destruction
//! - `session` : in-memory ephemeral sessions (forward secrecy)
//! - `kdf`     : Argon2id password-derived keys
//! - `hash`    : SHA-256 integrity helpers
//! - `error`   : unified error type

pub mod aead;
pub mod destroy;
pub mod error;
pub mod hash;
pub mod hybrid;
pub mod kdf;
pub mod keys;
pub mod session;

pub use destroy::{KeyDestroyer, KeyHandle, SecretBuffer};
pub use error::CryptoError;
pub use hybrid::{HybridCipher, SealedMessage};
pub use keys::{RecipientKeyPair, RecipientPublicKey, SymmetricKey};
pub use session::EphemeralSessionStore;
