//! # Key Management
//!
//! Ed25519 keypair wrapper used for transaction and hallmark signatures.
//! The rest of the codebase treats signing as a black box: 32-byte public
//! keys in, 64-byte signatures out, and a boolean verify. Secret key bytes
//! never appear in logs or serialized structures.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Length of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Errors from key material handling.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key encoding")]
    InvalidSecretKey,
}

/// An Ed25519 keypair identifying an account on the network.
pub struct NhzKeypair {
    signing_key: SigningKey,
}

impl NhzKeypair {
    /// Generates a fresh keypair from the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Derives a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Loads a keypair from a hex-encoded 32-byte secret key.
    pub fn from_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The raw secret key bytes. Callers persisting these own the
    /// consequences.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Signs `message`, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verifies `signature` over `message` under `public_key`.
///
/// Any malformed input (non-canonical key, wrong-length signature) simply
/// fails verification. No panics, no error taxonomy: a bad signature from
/// the network is routine, not exceptional.
pub fn verify(
    signature: &[u8; SIGNATURE_LENGTH],
    message: &[u8],
    public_key: &[u8; PUBLIC_KEY_LENGTH],
) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = DalekSignature::from_bytes(signature);
    key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = NhzKeypair::generate();
        let msg = b"send 100 NHZ to the hub";
        let sig = kp.sign(msg);
        assert!(verify(&sig, msg, &kp.public_key()));
    }

    #[test]
    fn tampered_message_fails() {
        let kp = NhzKeypair::generate();
        let sig = kp.sign(b"original");
        assert!(!verify(&sig, b"tampered", &kp.public_key()));
    }

    #[test]
    fn wrong_key_fails() {
        let kp = NhzKeypair::generate();
        let other = NhzKeypair::generate();
        let sig = kp.sign(b"message");
        assert!(!verify(&sig, b"message", &other.public_key()));
    }

    #[test]
    fn garbage_public_key_fails_quietly() {
        let sig = [0u8; 64];
        // Not every 32-byte string is a curve point; this must not panic.
        assert!(!verify(&sig, b"message", &[0xFFu8; 32]));
    }

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = NhzKeypair::from_seed(&[9u8; 32]);
        let b = NhzKeypair::from_seed(&[9u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn hex_loading_matches_seed() {
        let seed = [3u8; 32];
        let kp = NhzKeypair::from_hex(&hex::encode(seed)).expect("valid hex");
        assert_eq!(kp.public_key(), NhzKeypair::from_seed(&seed).public_key());

        assert!(NhzKeypair::from_hex("zz").is_err());
        assert!(NhzKeypair::from_hex("abcd").is_err()); // wrong length
    }
}
