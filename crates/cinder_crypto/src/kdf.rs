//! Password-derived keys
//!
//! Argon2id, producing a 32-byte `SymmetricKey` usable with `aead`. The salt
//! is not secret; store it next to whatever the derived key protects.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{SymmetricKey, SYMMETRIC_KEY_LEN};

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 64 * 1024; // 64 MiB
pub const KDF_PARALLELISM: u32 = 1;
pub const SALT_LEN: usize = 16;

pub fn derive_key(password: &[u8], salt: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let params = Params::new(
        KDF_MEMORY_COST,
        KDF_TIME_COST,
        KDF_PARALLELISM,
        Some(SYMMETRIC_KEY_LEN),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
    argon
        .hash_password_into(password, salt, output.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    SymmetricKey::from_slice(output.as_mut_slice())
}

/// Fresh random salt (call once per protected item; store it).
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead;

    #[test]
    fn same_password_and_salt_derive_same_key() {
        let salt = generate_salt();
        let k1 = derive_key(b"correct horse battery staple", &salt).unwrap();
        let k2 = derive_key(b"correct horse battery staple", &salt).unwrap();
        let sealed = aead::seal(&k1, b"payload").unwrap();
        assert_eq!(aead::open(&k2, &sealed).unwrap().as_slice(), b"payload");
    }

    #[test]
    fn different_salt_derives_different_key() {
        let k1 = derive_key(b"pw", &generate_salt()).unwrap();
        let k2 = derive_key(b"pw", &generate_salt()).unwrap();
        let sealed = aead::seal(&k1, b"payload").unwrap();
        assert!(aead::open(&k2, &sealed).is_err());
    }

    #[test]
    fn short_salt_rejected() {
        assert!(matches!(
            derive_key(b"pw", b"abc"),
            Err(CryptoError::KeyDerivation(_))
        ));
    }
}
