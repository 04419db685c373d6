//! SHA-256 integrity helpers

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `data`.
pub fn secure_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Check `data` against a hex digest produced by [`secure_hash`].
/// Malformed digests simply fail to match.
pub fn verify_integrity(data: &[u8], expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let actual = Sha256::digest(data);
    if expected.len() != actual.len() {
        return false;
    }
    // Constant-time comparison
    let mut diff = 0u8;
    for (a, b) in actual.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            secure_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_accepts_match_and_rejects_others() {
        let digest = secure_hash(b"ledger");
        assert!(verify_integrity(b"ledger", &digest));
        assert!(verify_integrity(b"ledger", &digest.to_uppercase()));
        assert!(!verify_integrity(b"ledger!", &digest));
        assert!(!verify_integrity(b"ledger", "zz"));
        assert!(!verify_integrity(b"ledger", &digest[..32]));
    }
}
