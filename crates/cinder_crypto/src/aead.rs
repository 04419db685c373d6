//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM (96-bit nonce).
//! Key size: 32 bytes.  Nonce: 12 bytes (random).  Tag: 16 bytes.
//!
//! Ciphertext wire format:
//!   [ nonce (12 bytes) | tag (16 bytes) | ciphertext ]

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::SymmetricKey;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

/// Encrypt `plaintext` under `key` with a freshly drawn nonce.
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.expose()).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // Encrypted in place, so the copy never holds plaintext once this returns.
    let mut body = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, b"", &mut body)
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypt wire-format bytes, verifying the tag before anything is returned.
pub fn open(key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < HEADER_LEN {
        return Err(CryptoError::Truncated {
            len: data.len(),
            min: HEADER_LEN,
        });
    }
    let (nonce, rest) = data.split_at(NONCE_LEN);
    let (tag, body) = rest.split_at(TAG_LEN);

    let cipher = Aes256Gcm::new_from_slice(key.expose()).map_err(|_| CryptoError::AeadDecrypt)?;

    let mut plaintext = Zeroizing::new(body.to_vec());
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            plaintext.as_mut_slice(),
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(plaintext)
}
