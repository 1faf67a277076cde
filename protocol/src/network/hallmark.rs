//! # Hallmark
//!
//! A hallmark is a signed credential binding a network host to an account
//! and a weight factor. Peers presenting one are weighted by the bound
//! account's stake during selection, which lets operators with skin in
//! the game carry more of the gossip traffic and starves weightless
//! spam peers when hallmark protection is enabled.
//!
//! ## Encoding
//!
//! A hallmark travels as the hex encoding of:
//!
//! ```text
//! public_key(32) | host_len(u16 LE) | host | weight(i32 LE) |
//! date(i32 LE, yyyymmdd) | signature(64)
//! ```
//!
//! The signature covers everything before it. A hallmark is only honored
//! for a peer whose actual host equals the hallmark host; anything else
//! is an impersonation attempt and the hallmark is dropped.

use thiserror::Error;

use crate::account::Ledger;
use crate::config::{MAX_BALANCE_NHZ, MIN_HUB_EFFECTIVE_BALANCE};
use crate::crypto::keys::SIGNATURE_LENGTH;
use crate::crypto::{account_id_from_public_key, NhzKeypair};

/// Maximum host string length inside a hallmark.
const MAX_HOST_LENGTH: usize = 100;

/// Errors from hallmark decoding.
#[derive(Debug, Error)]
pub enum HallmarkError {
    #[error("hallmark is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("hallmark is truncated")]
    Truncated,

    #[error("hallmark host is not valid UTF-8")]
    HostEncoding,
}

/// A parsed hallmark. `is_valid` reflects the structural and signature
/// checks; host binding is checked separately against the peer's actual
/// host via [`Hallmark::verify_for_host`].
#[derive(Debug, Clone)]
pub struct Hallmark {
    public_key: [u8; 32],
    account_id: i64,
    host: String,
    weight_factor: i32,
    date: i32,
    valid: bool,
}

impl Hallmark {
    /// Decodes and checks a hallmark string.
    ///
    /// Decoding failures are errors; a well-formed hallmark with a bad
    /// signature or out-of-range weight parses fine but reports
    /// `is_valid() == false`, mirroring how such hallmarks are carried
    /// but never honored.
    pub fn parse(hallmark_hex: &str) -> Result<Self, HallmarkError> {
        let bytes = hex::decode(hallmark_hex.trim())?;
        let mut pos = 0usize;

        let public_key: [u8; 32] = take_array(&bytes, &mut pos)?;
        let host_len = u16::from_le_bytes(take_array(&bytes, &mut pos)?) as usize;
        let host_bytes = take(&bytes, &mut pos, host_len)?.to_vec();
        let host = String::from_utf8(host_bytes).map_err(|_| HallmarkError::HostEncoding)?;

        let weight_factor = i32::from_le_bytes(take_array(&bytes, &mut pos)?);
        let date = i32::from_le_bytes(take_array(&bytes, &mut pos)?);

        let signed_len = pos;
        let signature: [u8; SIGNATURE_LENGTH] = take_array(&bytes, &mut pos)?;

        let structurally_sound = !host.is_empty()
            && host.len() <= MAX_HOST_LENGTH
            && weight_factor > 0
            && i64::from(weight_factor) <= MAX_BALANCE_NHZ;
        let valid = structurally_sound
            && crate::crypto::verify(&signature, &bytes[..signed_len], &public_key);

        Ok(Self {
            public_key,
            account_id: account_id_from_public_key(&public_key),
            host,
            weight_factor,
            date,
            valid,
        })
    }

    /// Generates a hallmark string for `host` signed by `keypair`.
    pub fn generate(keypair: &NhzKeypair, host: &str, weight_factor: i32, date: i32) -> String {
        let host_bytes = host.as_bytes();
        let mut data = Vec::with_capacity(42 + host_bytes.len() + SIGNATURE_LENGTH);
        data.extend_from_slice(&keypair.public_key());
        data.extend_from_slice(&(host_bytes.len() as u16).to_le_bytes());
        data.extend_from_slice(host_bytes);
        data.extend_from_slice(&weight_factor.to_le_bytes());
        data.extend_from_slice(&date.to_le_bytes());
        let signature = keypair.sign(&data);
        data.extend_from_slice(&signature);
        hex::encode(data)
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn weight_factor(&self) -> i32 {
        self.weight_factor
    }

    pub fn date(&self) -> i32 {
        self.date
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether this hallmark is valid and bound to `host`.
    pub fn verify_for_host(&self, host: &str) -> bool {
        self.valid && self.host.eq_ignore_ascii_case(host)
    }

    /// The weight this hallmark confers, given the bound account's stake:
    /// `min(effective_balance, weight_factor)` in whole NHZ, or 0 when
    /// the hallmark is invalid or the account is below the hub minimum.
    pub fn weight(&self, ledger: &Ledger) -> i64 {
        if !self.valid {
            return 0;
        }
        let effective = ledger.effective_balance(self.account_id);
        if effective < MIN_HUB_EFFECTIVE_BALANCE {
            return 0;
        }
        effective.min(i64::from(self.weight_factor))
    }
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], HallmarkError> {
    let end = pos.checked_add(len).ok_or(HallmarkError::Truncated)?;
    if end > bytes.len() {
        return Err(HallmarkError::Truncated);
    }
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn take_array<const N: usize>(bytes: &[u8], pos: &mut usize) -> Result<[u8; N], HallmarkError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(bytes, pos, N)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ONE_NHZ;

    fn funded_ledger(keypair: &NhzKeypair, whole_nhz: i64) -> Ledger {
        let ledger = Ledger::new();
        let id = ledger.associate_public_key(&keypair.public_key());
        ledger.add_to_balance(id, whole_nhz * ONE_NHZ);
        ledger
    }

    #[test]
    fn generate_parse_roundtrip() {
        let kp = NhzKeypair::generate();
        let encoded = Hallmark::generate(&kp, "hub.example", 500_000, 20140322);
        let hallmark = Hallmark::parse(&encoded).expect("parse");

        assert!(hallmark.is_valid());
        assert_eq!(hallmark.host(), "hub.example");
        assert_eq!(hallmark.weight_factor(), 500_000);
        assert_eq!(hallmark.date(), 20140322);
        assert_eq!(
            hallmark.account_id(),
            account_id_from_public_key(&kp.public_key())
        );
    }

    #[test]
    fn tampered_hallmark_is_invalid() {
        let kp = NhzKeypair::generate();
        let encoded = Hallmark::generate(&kp, "hub.example", 1000, 20140322);
        let mut bytes = hex::decode(&encoded).unwrap();
        bytes[34] ^= 0xFF; // first host byte
        let hallmark = Hallmark::parse(&hex::encode(bytes)).expect("still parses");
        assert!(!hallmark.is_valid());
    }

    #[test]
    fn truncated_hallmark_fails_to_parse() {
        let kp = NhzKeypair::generate();
        let encoded = Hallmark::generate(&kp, "hub.example", 1000, 20140322);
        assert!(matches!(
            Hallmark::parse(&encoded[..encoded.len() - 40]),
            Err(HallmarkError::Truncated)
        ));
        assert!(Hallmark::parse("zz").is_err());
    }

    #[test]
    fn host_binding_is_case_insensitive_but_exact() {
        let kp = NhzKeypair::generate();
        let hallmark =
            Hallmark::parse(&Hallmark::generate(&kp, "Hub.Example", 1000, 20140322)).unwrap();
        assert!(hallmark.verify_for_host("hub.example"));
        assert!(!hallmark.verify_for_host("other.example"));
    }

    #[test]
    fn weight_is_min_of_stake_and_factor() {
        let kp = NhzKeypair::generate();
        let hallmark =
            Hallmark::parse(&Hallmark::generate(&kp, "hub.example", 150_000, 20140322)).unwrap();

        // Stake above the factor: the factor caps the weight.
        let rich = funded_ledger(&kp, 400_000);
        assert_eq!(hallmark.weight(&rich), 150_000);

        // Stake below the factor but above the hub minimum.
        let moderate = funded_ledger(&kp, 120_000);
        assert_eq!(hallmark.weight(&moderate), 120_000);

        // Stake below the hub minimum confers nothing.
        let poor = funded_ledger(&kp, MIN_HUB_EFFECTIVE_BALANCE - 1);
        assert_eq!(hallmark.weight(&poor), 0);
    }

    #[test]
    fn zero_or_excessive_weight_factor_is_invalid() {
        let kp = NhzKeypair::generate();
        let zero = Hallmark::parse(&Hallmark::generate(&kp, "h.example", 0, 20140322)).unwrap();
        assert!(!zero.is_valid());
    }
}
