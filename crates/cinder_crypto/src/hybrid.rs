//! Hybrid encryption
//!
//! Each message gets a fresh 256-bit key that encrypts the body with
//! AES-256-GCM (`aead`) and is then wrapped with RSA-OAEP (SHA-256 for both
//! the hash and MGF1, no label) under the recipient's public key. The key is
//! used exactly once, so nonce reuse under one key cannot happen.
//!
//! Outputs are two independent byte strings; text transports carry them as
//! standard base64.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rsa::Oaep;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::aead;
use crate::error::CryptoError;
use crate::keys::{RecipientKeyPair, RecipientPublicKey, SymmetricKey, WRAPPED_KEY_LEN};

/// Output of [`HybridCipher::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// `nonce ‖ tag ‖ ciphertext`
    pub ciphertext: Vec<u8>,
    /// RSA-OAEP ciphertext of the message key.
    pub wrapped_key: Vec<u8>,
}

impl SealedMessage {
    pub fn ciphertext_b64(&self) -> String {
        STANDARD.encode(&self.ciphertext)
    }

    pub fn wrapped_key_b64(&self) -> String {
        STANDARD.encode(&self.wrapped_key)
    }

    pub fn from_b64(ciphertext: &str, wrapped_key: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            ciphertext: STANDARD.decode(ciphertext)?,
            wrapped_key: STANDARD.decode(wrapped_key)?,
        })
    }
}

pub struct HybridCipher;

impl HybridCipher {
    pub fn encrypt(
        plaintext: &[u8],
        recipient: &RecipientPublicKey,
    ) -> Result<SealedMessage, CryptoError> {
        let key = SymmetricKey::generate();
        let ciphertext = aead::seal(&key, plaintext)?;
        let wrapped_key = wrap_key(&key, recipient)?;
        Ok(SealedMessage {
            ciphertext,
            wrapped_key,
        })
    }

    pub fn decrypt(
        ciphertext: &[u8],
        wrapped_key: &[u8],
        recipient: &RecipientKeyPair,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let key = unwrap_key(wrapped_key, recipient)?;
        aead::open(&key, ciphertext)
    }

    /// `decrypt` for text bodies.
    pub fn decrypt_to_string(
        ciphertext: &[u8],
        wrapped_key: &[u8],
        recipient: &RecipientKeyPair,
    ) -> Result<Zeroizing<String>, CryptoError> {
        let mut bytes = Self::decrypt(ciphertext, wrapped_key, recipient)?;
        match String::from_utf8(std::mem::take(&mut *bytes)) {
            Ok(text) => Ok(Zeroizing::new(text)),
            Err(e) => {
                e.into_bytes().zeroize();
                Err(CryptoError::InvalidUtf8)
            }
        }
    }
}

/// RSA-OAEP(SHA-256) encrypt the raw key bytes.
pub fn wrap_key(key: &SymmetricKey, recipient: &RecipientPublicKey) -> Result<Vec<u8>, CryptoError> {
    recipient
        .inner()
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.expose())
        .map_err(|e| CryptoError::KeyWrap(e.to_string()))
}

/// Inverse of [`wrap_key`]. Any failure, including a length mismatch, is
/// reported as the same opaque error.
pub fn unwrap_key(wrapped: &[u8], recipient: &RecipientKeyPair) -> Result<SymmetricKey, CryptoError> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::KeyUnwrap);
    }
    let mut raw = Zeroizing::new(
        recipient
            .private()
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CryptoError::KeyUnwrap)?,
    );
    SymmetricKey::from_slice(raw.as_mut_slice()).map_err(|_| CryptoError::KeyUnwrap)
}
