use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key wrap failed: {0}")]
    KeyWrap(String),

    #[error("Key unwrap failed (wrong private key or corrupted wrapped key)")]
    KeyUnwrap,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch, possible tampering)")]
    AeadDecrypt,

    #[error("Ciphertext too short: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Malformed key handle: {0}")]
    MalformedHandle(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already destroyed: {0}")]
    SessionDestroyed(String),

    #[error("Session already active: {0}")]
    SessionExists(String),

    #[error("Plaintext is not valid UTF-8")]
    InvalidUtf8,

    #[error("PEM encoding error: {0}")]
    Pem(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
