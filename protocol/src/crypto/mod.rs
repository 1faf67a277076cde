//! # Cryptographic Primitives
//!
//! The signature scheme is treated as a black box by the rest of the
//! codebase: everything above this module works with 32-byte public keys,
//! 64-byte signatures, and the verify/sign operations in [`keys`].
//! Transaction identity is SHA-256 based and lives in [`hash`].

pub mod hash;
pub mod keys;

pub use hash::{account_id_from_public_key, id_from_hash, parse_unsigned, sha256, unsigned_string};
pub use keys::{verify, NhzKeypair, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
