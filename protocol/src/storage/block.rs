//! # Block Record
//!
//! A block as the pool and the peer protocol see it: height, timestamp,
//! and the ordered transaction list. Forging, signatures over blocks, and
//! base-target math belong to the block assembler, which is outside the
//! core; the pool only needs the fields its hooks read and the JSON form
//! `processBlock` carries.

use serde_json::{json, Map, Value};

use crate::config::{MAX_NUMBER_OF_TRANSACTIONS, MAX_PAYLOAD_LENGTH};
use crate::crypto::{id_from_hash, sha256};
use crate::transaction::{codec, Transaction, ValidationError};

/// A block: the atomic unit the pool's apply/undo hooks operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    height: u32,
    /// Epoch second at which the block was forged. Drives replay-index
    /// pruning: hash entries expiring before this are purged on apply.
    timestamp: u32,
    transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(height: u32, timestamp: u32, transactions: Vec<Transaction>) -> Self {
        Self {
            height,
            timestamp,
            transactions,
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Block id: the 64-bit projection of the SHA-256 over height,
    /// timestamp, and the contained transaction hashes.
    pub fn id(&self) -> i64 {
        let mut preimage = Vec::with_capacity(8 + 32 * self.transactions.len());
        preimage.extend_from_slice(&self.height.to_le_bytes());
        preimage.extend_from_slice(&self.timestamp.to_le_bytes());
        for tx in &self.transactions {
            preimage.extend_from_slice(tx.hash());
        }
        id_from_hash(&sha256(&preimage))
    }

    /// The JSON object carried by a `processBlock` request.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("height".into(), json!(self.height));
        object.insert("timestamp".into(), json!(self.timestamp));
        object.insert(
            "transactions".into(),
            Value::Array(self.transactions.iter().map(codec::to_json).collect()),
        );
        Value::Object(object)
    }

    /// Parses a block from its JSON form, enforcing the block-level
    /// transaction-count and payload limits.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::MalformedJson("block is not an object".into()))?;
        let height = object
            .get("height")
            .and_then(Value::as_u64)
            .ok_or_else(|| ValidationError::MalformedJson("missing block height".into()))?
            as u32;
        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_u64)
            .ok_or_else(|| ValidationError::MalformedJson("missing block timestamp".into()))?
            as u32;
        let tx_values = object
            .get("transactions")
            .and_then(Value::as_array)
            .ok_or_else(|| ValidationError::MalformedJson("missing transactions".into()))?;

        if tx_values.len() > MAX_NUMBER_OF_TRANSACTIONS {
            return Err(ValidationError::MalformedJson(format!(
                "too many transactions: {}",
                tx_values.len()
            )));
        }

        let mut transactions = Vec::with_capacity(tx_values.len());
        let mut payload_length = 0usize;
        for tx_value in tx_values {
            let tx = codec::from_json(tx_value)?;
            payload_length += codec::to_bytes(&tx, height)?.len();
            transactions.push(tx);
        }
        if payload_length > MAX_PAYLOAD_LENGTH {
            return Err(ValidationError::MalformedJson(format!(
                "payload too large: {}",
                payload_length
            )));
        }

        Ok(Self::new(height, timestamp, transactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NhzKeypair;
    use crate::transaction::TransactionBuilder;

    fn make_tx(keypair: &NhzKeypair, amount: i64) -> Transaction {
        TransactionBuilder::new(1440, amount, 1)
            .recipient(9)
            .timestamp(500)
            .sign(keypair)
            .unwrap()
    }

    #[test]
    fn json_roundtrip() {
        let kp = NhzKeypair::generate();
        let block = Block::new(100, 7200, vec![make_tx(&kp, 10), make_tx(&kp, 20)]);
        let parsed = Block::from_json(&block.to_json()).expect("parse");
        assert_eq!(parsed, block);
    }

    #[test]
    fn id_depends_on_contents() {
        let kp = NhzKeypair::generate();
        let a = Block::new(100, 7200, vec![make_tx(&kp, 10)]);
        let b = Block::new(100, 7200, vec![make_tx(&kp, 11)]);
        let c = Block::new(101, 7200, vec![make_tx(&kp, 10)]);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn oversized_block_rejected() {
        let kp = NhzKeypair::generate();
        let txs: Vec<Value> = (0..=MAX_NUMBER_OF_TRANSACTIONS)
            .map(|i| codec::to_json(&make_tx(&kp, i as i64 + 1)))
            .collect();
        let value = json!({ "height": 1, "timestamp": 60, "transactions": txs });
        assert!(Block::from_json(&value).is_err());
    }

    #[test]
    fn missing_fields_rejected() {
        assert!(Block::from_json(&json!({})).is_err());
        assert!(Block::from_json(&json!({ "height": 1, "timestamp": 60 })).is_err());
    }
}
