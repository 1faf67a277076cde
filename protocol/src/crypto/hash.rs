//! # Hashing & Identity Derivation
//!
//! Nhz identity is SHA-256 all the way down. A transaction's `hash` is the
//! full 32-byte digest of its signed bytes; its `id` is the first 8 bytes
//! of that digest read little-endian as a signed 64-bit integer. The id is
//! therefore a lossy projection of the hash: two distinct transactions may
//! share an id but never a hash. Account ids are derived the same way from
//! the account's public key.
//!
//! Ids travel as unsigned decimal strings in the JSON wire form, because
//! the values routinely exceed what JSON consumers handle as numbers.

use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of `data` as a fixed 32-byte array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Projects a 32-byte hash onto its 64-bit id: the first 8 bytes,
/// little-endian, reinterpreted as i64.
pub fn id_from_hash(hash: &[u8; 32]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    i64::from_le_bytes(bytes)
}

/// Derives an account id from a 32-byte public key.
pub fn account_id_from_public_key(public_key: &[u8; 32]) -> i64 {
    id_from_hash(&sha256(public_key))
}

/// Renders an id in its canonical wire form: the unsigned decimal of the
/// raw 64 bits.
pub fn unsigned_string(id: i64) -> String {
    (id as u64).to_string()
}

/// Parses an id from its unsigned decimal wire form.
pub fn parse_unsigned(s: &str) -> Option<i64> {
    s.parse::<u64>().ok().map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_empty_string_vector() {
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn id_is_first_eight_bytes_little_endian() {
        let mut hash = [0u8; 32];
        hash[0] = 0x01;
        hash[7] = 0x80; // sign bit of the i64
        let id = id_from_hash(&hash);
        assert_eq!(id, i64::from_le_bytes([0x01, 0, 0, 0, 0, 0, 0, 0x80]));
        assert!(id < 0, "high bit set means a negative i64");
    }

    #[test]
    fn unsigned_string_of_negative_id() {
        // -1 as raw bits is u64::MAX.
        assert_eq!(unsigned_string(-1), "18446744073709551615");
        assert_eq!(unsigned_string(1), "1");
    }

    #[test]
    fn unsigned_string_roundtrip() {
        for id in [0i64, 1, -1, i64::MIN, i64::MAX, 0x1234_5678_9abc_def0] {
            assert_eq!(parse_unsigned(&unsigned_string(id)), Some(id));
        }
        assert_eq!(parse_unsigned("not a number"), None);
        assert_eq!(parse_unsigned("-5"), None);
    }

    #[test]
    fn account_id_is_stable() {
        let pk = [7u8; 32];
        assert_eq!(
            account_id_from_public_key(&pk),
            account_id_from_public_key(&pk)
        );
    }
}
