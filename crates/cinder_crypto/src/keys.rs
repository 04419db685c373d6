//! Key material
//!
//! - `SymmetricKey`: 256-bit AEAD key in an exclusively owned heap buffer.
//!   Never `Clone`; the buffer is overwritten and zeroized when destroyed or
//!   dropped (see `destroy`).
//! - `RecipientKeyPair`: long-lived RSA-4096 keypair bound to one identity.
//!   Used only to wrap/unwrap per-message keys, never for bulk content.
//!
//! Text transport of keys: base64 of the PEM document (PKCS#8 for private,
//! SPKI for public).

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::destroy::SecretBuffer;
use crate::error::CryptoError;

pub const SYMMETRIC_KEY_LEN: usize = 32;
pub const RSA_KEY_BITS: usize = 4096;
/// An RSA-OAEP ciphertext is exactly one modulus long.
pub const WRAPPED_KEY_LEN: usize = RSA_KEY_BITS / 8;

// ── Symmetric keys ────────────────────────────────────────────────────────────

/// 256-bit AEAD key. Moves never relocate the key bytes (they live behind a
/// box), and dropping the key destroys them.
pub struct SymmetricKey(pub(crate) SecretBuffer);

impl SymmetricKey {
    pub fn generate() -> Self {
        Self(SecretBuffer::random(SYMMETRIC_KEY_LEN))
    }

    /// Take a copy of `bytes` and zeroize the source.
    pub fn from_slice(bytes: &mut [u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SYMMETRIC_KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "Symmetric key must be {SYMMETRIC_KEY_LEN} bytes, got {len}"
            )));
        }
        let key = SecretBuffer::copy_from(bytes);
        bytes.zeroize();
        Ok(Self(key))
    }

    pub(crate) fn expose(&self) -> &[u8] {
        self.0.expose()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

// ── Recipient keypairs ────────────────────────────────────────────────────────

/// Public half of a recipient's keypair. Freely shareable.
#[derive(Clone, PartialEq, Eq)]
pub struct RecipientPublicKey(RsaPublicKey);

impl RecipientPublicKey {
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        check_modulus(key.size())?;
        Ok(Self(key))
    }

    pub fn to_pem(&self) -> Result<String, CryptoError> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Pem(e.to_string()))
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let pem = STANDARD.decode(s)?;
        let pem = std::str::from_utf8(&pem)
            .map_err(|_| CryptoError::InvalidKey("Public key PEM is not UTF-8".into()))?;
        Self::from_pem(pem)
    }

    pub fn to_b64(&self) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.to_pem()?))
    }

    /// SHA-256 over the SPKI DER encoding, hex-encoded.
    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| CryptoError::Pem(e.to_string()))?;
        Ok(hex::encode(Sha256::digest(der.as_bytes())))
    }

    pub(crate) fn inner(&self) -> &RsaPublicKey {
        &self.0
    }
}

impl fmt::Debug for RecipientPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecipientPublicKey({} bits)", self.0.size() * 8)
    }
}

/// Full keypair. The private half stays inside this value; `rsa` zeroizes it
/// on drop.
pub struct RecipientKeyPair {
    private: RsaPrivateKey,
    public: RecipientPublicKey,
}

impl RecipientKeyPair {
    /// Generate a fresh RSA-4096 keypair (public exponent 65537). This is the
    /// most expensive operation in the crate; run it off async executors.
    pub fn generate() -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RecipientPublicKey(private.to_public_key());
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &RecipientPublicKey {
        &self.public
    }

    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        check_modulus(private.size())?;
        private
            .validate()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = RecipientPublicKey(private.to_public_key());
        Ok(Self { private, public })
    }

    pub fn to_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Pem(e.to_string()))
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let pem = Zeroizing::new(STANDARD.decode(s)?);
        let pem = std::str::from_utf8(&pem)
            .map_err(|_| CryptoError::InvalidKey("Private key PEM is not UTF-8".into()))?;
        Self::from_pem(pem)
    }

    pub fn to_b64(&self) -> Result<Zeroizing<String>, CryptoError> {
        let pem = self.to_pem()?;
        Ok(Zeroizing::new(STANDARD.encode(pem.as_bytes())))
    }

    pub(crate) fn private(&self) -> &RsaPrivateKey {
        &self.private
    }
}

impl fmt::Debug for RecipientKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipientKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

fn check_modulus(size_bytes: usize) -> Result<(), CryptoError> {
    if size_bytes * 8 != RSA_KEY_BITS {
        return Err(CryptoError::InvalidKey(format!(
            "RSA modulus must be {RSA_KEY_BITS} bits, got {}",
            size_bytes * 8
        )));
    }
    Ok(())
}

// ── Secure random ─────────────────────────────────────────────────────────────

pub fn secure_random(len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut out);
    out
}

/// Random token for text transports (base64 of `len` random bytes).
pub fn secure_random_b64(len: usize) -> String {
    STANDARD.encode(secure_random(len).as_slice())
}
