//! # Wire Codecs
//!
//! The two network forms of a transaction: the little-endian binary
//! layout used in blocks and the JSON object used by the peer protocol.
//!
//! The binary layout is height-gated. Amounts and fees are 4 bytes before
//! [`FRACTIONAL_BLOCK`] and 8 bytes after; the referenced-transaction
//! field is an 8-byte id before [`REFERENCED_TRANSACTION_FULL_HASH_BLOCK`]
//! and a 32-byte full hash after. In the full-hash field, an id-form
//! reference occupies the first 8 bytes with the remainder zeroed, so
//! both forms survive a parse/serialize round trip.
//!
//! JSON ids travel as unsigned decimal strings and byte fields as hex.
//! Any parse failure of either form is a [`ValidationError`].

use serde_json::{json, Map, Value};

use crate::config::{FRACTIONAL_BLOCK, REFERENCED_TRANSACTION_FULL_HASH_BLOCK};
use crate::crypto::keys::SIGNATURE_LENGTH;
use crate::crypto::{parse_unsigned, unsigned_string};
use crate::transaction::{Attachment, Transaction, TransactionRef, TransactionType, ValidationError};

// ---------------------------------------------------------------------------
// Binary form
// ---------------------------------------------------------------------------

/// Serializes a transaction in the binary layout active at `height`.
pub fn to_bytes(tx: &Transaction, height: u32) -> Result<Vec<u8>, ValidationError> {
    let wide_amounts = height >= FRACTIONAL_BLOCK;
    let full_hash_ref = height >= REFERENCED_TRANSACTION_FULL_HASH_BLOCK;

    let attachment = attachment_bytes(tx.attachment());
    let mut bytes = Vec::with_capacity(160 + attachment.len());
    bytes.push(tx.transaction_type().type_byte());
    bytes.push(tx.transaction_type().subtype_byte());
    bytes.extend_from_slice(&tx.timestamp().to_le_bytes());
    bytes.extend_from_slice(&tx.deadline().to_le_bytes());
    bytes.extend_from_slice(tx.sender_public_key());
    bytes.extend_from_slice(&tx.recipient_id().to_le_bytes());

    if wide_amounts {
        bytes.extend_from_slice(&tx.amount().to_le_bytes());
        bytes.extend_from_slice(&tx.fee().to_le_bytes());
    } else {
        let amount = i32::try_from(tx.amount())
            .map_err(|_| ValidationError::InvalidAmount(tx.amount()))?;
        let fee = i32::try_from(tx.fee()).map_err(|_| ValidationError::InvalidFee(tx.fee()))?;
        bytes.extend_from_slice(&amount.to_le_bytes());
        bytes.extend_from_slice(&fee.to_le_bytes());
    }

    if full_hash_ref {
        let mut field = [0u8; 32];
        match tx.referenced_transaction() {
            Some(TransactionRef::FullHash(hash)) => field.copy_from_slice(hash),
            Some(TransactionRef::Id(id)) => field[..8].copy_from_slice(&id.to_le_bytes()),
            None => {}
        }
        bytes.extend_from_slice(&field);
    } else {
        let ref_id = tx.referenced_transaction().map(|r| r.id()).unwrap_or(0);
        bytes.extend_from_slice(&ref_id.to_le_bytes());
    }

    bytes.extend_from_slice(tx.signature());
    bytes.extend_from_slice(&attachment);
    Ok(bytes)
}

/// Parses a transaction from the binary layout active at `height`.
pub fn from_bytes(bytes: &[u8], height: u32) -> Result<Transaction, ValidationError> {
    let mut cursor = Cursor::new(bytes);
    let wide_amounts = height >= FRACTIONAL_BLOCK;
    let full_hash_ref = height >= REFERENCED_TRANSACTION_FULL_HASH_BLOCK;

    let type_byte = cursor.u8()?;
    let subtype_byte = cursor.u8()?;
    let tx_type = TransactionType::from_bytes(type_byte, subtype_byte)?;
    let timestamp = cursor.u32()?;
    let deadline = cursor.u16()?;
    let sender_public_key = cursor.array::<32>()?;
    let recipient_id = cursor.i64()?;

    let (amount, fee) = if wide_amounts {
        (cursor.i64()?, cursor.i64()?)
    } else {
        (i64::from(cursor.i32()?), i64::from(cursor.i32()?))
    };

    let referenced_transaction = if full_hash_ref {
        let field = cursor.array::<32>()?;
        if field == [0u8; 32] {
            None
        } else if field[8..] == [0u8; 24] {
            let mut id = [0u8; 8];
            id.copy_from_slice(&field[..8]);
            Some(TransactionRef::Id(i64::from_le_bytes(id)))
        } else {
            Some(TransactionRef::FullHash(field))
        }
    } else {
        match cursor.i64()? {
            0 => None,
            id => Some(TransactionRef::Id(id)),
        }
    };

    let signature = cursor.array::<SIGNATURE_LENGTH>()?;
    let attachment = parse_attachment(&mut cursor, tx_type)?;

    Transaction::new(
        tx_type,
        timestamp,
        deadline,
        sender_public_key,
        recipient_id,
        amount,
        fee,
        referenced_transaction,
        signature,
        attachment,
    )
}

/// Serializes an attachment in its binary form. Also feeds the canonical
/// identity bytes, so this layout is fork-independent.
pub(crate) fn attachment_bytes(attachment: &Attachment) -> Vec<u8> {
    match attachment {
        Attachment::None => Vec::new(),
        Attachment::Message { message } => {
            let mut bytes = Vec::with_capacity(2 + message.len());
            bytes.extend_from_slice(&(message.len() as u16).to_le_bytes());
            bytes.extend_from_slice(message);
            bytes
        }
        Attachment::AliasAssignment { alias, uri } => {
            let mut bytes = Vec::with_capacity(3 + alias.len() + uri.len());
            bytes.push(alias.len() as u8);
            bytes.extend_from_slice(alias.as_bytes());
            bytes.extend_from_slice(&(uri.len() as u16).to_le_bytes());
            bytes.extend_from_slice(uri.as_bytes());
            bytes
        }
    }
}

fn parse_attachment(
    cursor: &mut Cursor<'_>,
    tx_type: TransactionType,
) -> Result<Attachment, ValidationError> {
    match tx_type {
        TransactionType::Payment => Ok(Attachment::None),
        TransactionType::ArbitraryMessage => {
            let len = cursor.u16()? as usize;
            let message = cursor.slice(len)?.to_vec();
            Ok(Attachment::Message { message })
        }
        TransactionType::AliasAssignment => {
            let alias_len = cursor.u8()? as usize;
            let alias = String::from_utf8(cursor.slice(alias_len)?.to_vec())
                .map_err(|e| ValidationError::MalformedBytes(e.to_string()))?;
            let uri_len = cursor.u16()? as usize;
            let uri = String::from_utf8(cursor.slice(uri_len)?.to_vec())
                .map_err(|e| ValidationError::MalformedBytes(e.to_string()))?;
            Ok(Attachment::AliasAssignment { alias, uri })
        }
    }
}

// ---------------------------------------------------------------------------
// JSON form
// ---------------------------------------------------------------------------

/// Renders the JSON wire object for a transaction.
pub fn to_json(tx: &Transaction) -> Value {
    let mut object = Map::new();
    object.insert("type".into(), json!(tx.transaction_type().type_byte()));
    object.insert(
        "subtype".into(),
        json!(tx.transaction_type().subtype_byte()),
    );
    object.insert("timestamp".into(), json!(tx.timestamp()));
    object.insert("deadline".into(), json!(tx.deadline()));
    object.insert(
        "senderPublicKey".into(),
        json!(hex::encode(tx.sender_public_key())),
    );
    object.insert(
        "recipient".into(),
        json!(unsigned_string(tx.recipient_id())),
    );
    object.insert("amount".into(), json!(tx.amount()));
    object.insert("fee".into(), json!(tx.fee()));
    match tx.referenced_transaction() {
        Some(TransactionRef::Id(id)) => {
            object.insert("referencedTransaction".into(), json!(unsigned_string(*id)));
        }
        Some(TransactionRef::FullHash(hash)) => {
            object.insert(
                "referencedTransactionFullHash".into(),
                json!(hex::encode(hash)),
            );
        }
        None => {}
    }
    object.insert("signature".into(), json!(hex::encode(tx.signature())));

    match tx.attachment() {
        Attachment::None => {}
        Attachment::Message { message } => {
            object.insert("attachment".into(), json!({ "message": hex::encode(message) }));
        }
        Attachment::AliasAssignment { alias, uri } => {
            object.insert("attachment".into(), json!({ "alias": alias, "uri": uri }));
        }
    }

    Value::Object(object)
}

/// Parses a transaction from its JSON wire object.
pub fn from_json(value: &Value) -> Result<Transaction, ValidationError> {
    let object = value
        .as_object()
        .ok_or_else(|| malformed("transaction is not an object"))?;

    let type_byte = get_u8(object, "type")?;
    let subtype_byte = get_u8(object, "subtype")?;
    let tx_type = TransactionType::from_bytes(type_byte, subtype_byte)?;
    let timestamp = get_u64(object, "timestamp")? as u32;
    let deadline = get_u64(object, "deadline")? as u16;
    let sender_public_key = get_hex_array::<32>(object, "senderPublicKey")?;

    // A missing or unparseable recipient normalizes to 0, "none".
    let recipient_id = object
        .get("recipient")
        .and_then(Value::as_str)
        .and_then(parse_unsigned)
        .unwrap_or(0);

    let amount = get_i64(object, "amount")?;
    let fee = get_i64(object, "fee")?;

    let referenced_transaction = if let Some(hash_hex) =
        object.get("referencedTransactionFullHash").and_then(Value::as_str)
    {
        Some(TransactionRef::FullHash(decode_hex_array::<32>(hash_hex)?))
    } else {
        object
            .get("referencedTransaction")
            .and_then(Value::as_str)
            .and_then(parse_unsigned)
            .filter(|id| *id != 0)
            .map(TransactionRef::Id)
    };

    let signature = get_hex_array::<SIGNATURE_LENGTH>(object, "signature")?;
    let attachment = attachment_from_json(object.get("attachment"), tx_type)?;

    Transaction::new(
        tx_type,
        timestamp,
        deadline,
        sender_public_key,
        recipient_id,
        amount,
        fee,
        referenced_transaction,
        signature,
        attachment,
    )
}

fn attachment_from_json(
    value: Option<&Value>,
    tx_type: TransactionType,
) -> Result<Attachment, ValidationError> {
    match tx_type {
        TransactionType::Payment => Ok(Attachment::None),
        TransactionType::ArbitraryMessage => {
            let object = value
                .and_then(Value::as_object)
                .ok_or_else(|| malformed("missing message attachment"))?;
            let message_hex = object
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing message field"))?;
            let message =
                hex::decode(message_hex).map_err(|e| malformed(&format!("message: {}", e)))?;
            Ok(Attachment::Message { message })
        }
        TransactionType::AliasAssignment => {
            let object = value
                .and_then(Value::as_object)
                .ok_or_else(|| malformed("missing alias attachment"))?;
            let alias = object
                .get("alias")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing alias field"))?
                .to_string();
            let uri = object
                .get("uri")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Attachment::AliasAssignment { alias, uri })
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn malformed(message: &str) -> ValidationError {
    ValidationError::MalformedJson(message.to_string())
}

fn get_u8(object: &Map<String, Value>, key: &str) -> Result<u8, ValidationError> {
    get_u64(object, key)?
        .try_into()
        .map_err(|_| malformed(&format!("{} out of range", key)))
}

fn get_u64(object: &Map<String, Value>, key: &str) -> Result<u64, ValidationError> {
    object
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(&format!("missing numeric field '{}'", key)))
}

fn get_i64(object: &Map<String, Value>, key: &str) -> Result<i64, ValidationError> {
    object
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed(&format!("missing numeric field '{}'", key)))
}

fn get_hex_array<const N: usize>(
    object: &Map<String, Value>,
    key: &str,
) -> Result<[u8; N], ValidationError> {
    let hex_str = object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(&format!("missing hex field '{}'", key)))?;
    decode_hex_array(hex_str)
}

fn decode_hex_array<const N: usize>(hex_str: &str) -> Result<[u8; N], ValidationError> {
    let bytes = hex::decode(hex_str).map_err(|e| malformed(&e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| malformed(&format!("expected {} bytes", N)))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn slice(&mut self, len: usize) -> Result<&'a [u8], ValidationError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ValidationError::MalformedBytes("truncated".to_string()))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ValidationError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ValidationError> {
        Ok(self.slice(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ValidationError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ValidationError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, ValidationError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, ValidationError> {
        Ok(i64::from_le_bytes(self.array()?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FRACTIONAL_BLOCK, REFERENCED_TRANSACTION_FULL_HASH_BLOCK};
    use crate::crypto::NhzKeypair;
    use crate::transaction::TransactionBuilder;

    fn sample_transactions(keypair: &NhzKeypair) -> Vec<Transaction> {
        vec![
            TransactionBuilder::new(1440, 250, 3)
                .recipient(-77)
                .timestamp(1000)
                .sign(keypair)
                .unwrap(),
            TransactionBuilder::new(60, 100, 1)
                .recipient(42)
                .referenced(TransactionRef::Id(0x0123_4567_89ab_cdef))
                .timestamp(2000)
                .sign(keypair)
                .unwrap(),
            TransactionBuilder::new(10, 0, 1)
                .attachment(Attachment::Message {
                    message: vec![0xde, 0xad, 0xbe, 0xef],
                })
                .timestamp(3000)
                .sign(keypair)
                .unwrap(),
            TransactionBuilder::new(10, 0, 1)
                .attachment(Attachment::AliasAssignment {
                    alias: "nhzhub".to_string(),
                    uri: "http://hub.example:7774".to_string(),
                })
                .timestamp(4000)
                .sign(keypair)
                .unwrap(),
        ]
    }

    // Heights on each side of every format fork.
    const HEIGHTS: &[u32] = &[
        0,
        FRACTIONAL_BLOCK - 1,
        FRACTIONAL_BLOCK,
        REFERENCED_TRANSACTION_FULL_HASH_BLOCK - 1,
        REFERENCED_TRANSACTION_FULL_HASH_BLOCK,
        200_000,
    ];

    #[test]
    fn binary_roundtrip_at_every_fork_height() {
        let kp = NhzKeypair::generate();
        for tx in sample_transactions(&kp) {
            for &height in HEIGHTS {
                let bytes = to_bytes(&tx, height).expect("serialize");
                let parsed = from_bytes(&bytes, height).expect("parse");
                assert_eq!(parsed, tx, "height {}", height);
                // And bit-for-bit stability of the re-serialization.
                assert_eq!(to_bytes(&parsed, height).unwrap(), bytes);
            }
        }
    }

    #[test]
    fn full_hash_reference_survives_post_fork() {
        let kp = NhzKeypair::generate();
        let tx = TransactionBuilder::new(60, 100, 1)
            .recipient(42)
            .referenced(TransactionRef::FullHash([7u8; 32]))
            .timestamp(2000)
            .sign(&kp)
            .unwrap();

        let height = REFERENCED_TRANSACTION_FULL_HASH_BLOCK;
        let parsed = from_bytes(&to_bytes(&tx, height).unwrap(), height).unwrap();
        assert_eq!(
            parsed.referenced_transaction(),
            Some(&TransactionRef::FullHash([7u8; 32]))
        );
    }

    #[test]
    fn narrow_amounts_reject_wide_values() {
        let kp = NhzKeypair::generate();
        let tx = TransactionBuilder::new(60, i64::from(i32::MAX) + 1, 1)
            .recipient(42)
            .timestamp(2000)
            .sign(&kp)
            .unwrap();

        assert!(to_bytes(&tx, 0).is_err());
        assert!(to_bytes(&tx, FRACTIONAL_BLOCK).is_ok());
    }

    #[test]
    fn json_roundtrip() {
        let kp = NhzKeypair::generate();
        for tx in sample_transactions(&kp) {
            let value = to_json(&tx);
            let parsed = from_json(&value).expect("parse JSON");
            assert_eq!(parsed, tx);
        }
    }

    #[test]
    fn json_ids_are_unsigned_decimal_strings() {
        let kp = NhzKeypair::generate();
        let tx = TransactionBuilder::new(60, 100, 1)
            .recipient(-1) // raw bits = u64::MAX
            .timestamp(2000)
            .sign(&kp)
            .unwrap();

        let value = to_json(&tx);
        assert_eq!(
            value.get("recipient").and_then(Value::as_str),
            Some("18446744073709551615")
        );
    }

    #[test]
    fn json_missing_recipient_normalizes_to_zero() {
        let kp = NhzKeypair::generate();
        let tx = TransactionBuilder::new(10, 0, 1)
            .attachment(Attachment::Message { message: vec![1] })
            .timestamp(3000)
            .sign(&kp)
            .unwrap();

        let mut value = to_json(&tx);
        value.as_object_mut().unwrap().remove("recipient");
        let parsed = from_json(&value).expect("parse");
        assert_eq!(parsed.recipient_id(), 0);
    }

    #[test]
    fn truncated_bytes_are_malformed() {
        let kp = NhzKeypair::generate();
        let tx = sample_transactions(&kp).remove(0);
        let bytes = to_bytes(&tx, 0).unwrap();
        for len in [0, 1, 10, bytes.len() - 1] {
            assert!(
                matches!(
                    from_bytes(&bytes[..len], 0),
                    Err(ValidationError::MalformedBytes(_))
                ),
                "prefix of length {} must not parse",
                len
            );
        }
    }

    #[test]
    fn garbage_json_is_malformed() {
        assert!(from_json(&json!("not an object")).is_err());
        assert!(from_json(&json!({ "type": 0 })).is_err());
        assert!(from_json(&json!({
            "type": 0, "subtype": 0, "timestamp": 1, "deadline": 60,
            "senderPublicKey": "zz", "amount": 1, "fee": 1, "signature": "00"
        }))
        .is_err());
    }
}
