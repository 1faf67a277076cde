//! # Transaction Record
//!
//! An immutable signed transaction together with its derived identity.
//! The `hash` is the SHA-256 of the transaction's canonical bytes; the
//! `id` is the first 8 bytes of that hash, little-endian, as i64. The id
//! is a deliberately lossy 64-bit projection driven by bandwidth: the
//! pool keys its maps on `id`, while replay prevention keys on the full
//! `hash`. Two distinct transactions may share an id; the pool silently
//! overwrites on such a collision, matching long-standing network
//! behavior, and the hash index keeps replay protection intact.
//!
//! Locally originated transactions are assembled with
//! [`TransactionBuilder`] and signed with an [`NhzKeypair`]; transactions
//! from the network arrive through the codec (`codec::from_bytes` /
//! `codec::from_json`) which ends at the same constructor, so every
//! `Transaction` in the process has passed structural validation.

pub mod codec;
pub mod types;

use thiserror::Error;

use crate::account::Ledger;
use crate::config::MAX_BALANCE_NQT;
use crate::crypto::keys::SIGNATURE_LENGTH;
use crate::crypto::{account_id_from_public_key, id_from_hash, sha256, unsigned_string};
use crate::epoch;

pub use types::{Attachment, TransactionType};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Well-formed-but-invalid input: bad schema, bad ranges, bad signature.
/// These are dropped with a debug log; they never terminate anything.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown transaction type ({type_byte}, {subtype_byte})")]
    InvalidType { type_byte: u8, subtype_byte: u8 },

    #[error("transaction type {0} not yet enabled at this height")]
    NotYetEnabled(TransactionType),

    #[error("attachment does not match transaction type {0}")]
    AttachmentMismatch(TransactionType),

    #[error("invalid deadline {0}")]
    InvalidDeadline(u16),

    #[error("invalid amount {0}")]
    InvalidAmount(i64),

    #[error("invalid fee {0}")]
    InvalidFee(i64),

    #[error("transaction requires a recipient")]
    MissingRecipient,

    #[error("invalid alias '{0}'")]
    InvalidAlias(String),

    #[error("attachment too large: {actual} > {limit}")]
    AttachmentTooLarge { actual: usize, limit: usize },

    #[error("malformed transaction bytes: {0}")]
    MalformedBytes(String),

    #[error("malformed transaction JSON: {0}")]
    MalformedJson(String),
}

/// Block undo hit a transaction whose effects cannot be rolled back; the
/// chain must rescan instead.
#[derive(Debug, Error)]
#[error("cannot undo transaction {transaction_id}: {reason}")]
pub struct UndoNotSupportedError {
    pub transaction_id: i64,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Referenced transaction
// ---------------------------------------------------------------------------

/// Reference to an earlier transaction this one depends on. The 64-bit id
/// form is the live format; the full-hash form belongs to a scheduled
/// fork and is carried by the codec but not produced by live paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRef {
    Id(i64),
    FullHash([u8; 32]),
}

impl TransactionRef {
    /// The 64-bit projection of the reference, whichever form it is in.
    pub fn id(&self) -> i64 {
        match self {
            Self::Id(id) => *id,
            Self::FullHash(hash) => id_from_hash(hash),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// An immutable signed transaction. Construct via [`TransactionBuilder`]
/// or the codec; all fields are fixed and the identity precomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    tx_type: TransactionType,
    timestamp: u32,
    deadline: u16,
    sender_public_key: [u8; 32],
    recipient_id: i64,
    amount: i64,
    fee: i64,
    referenced_transaction: Option<TransactionRef>,
    signature: [u8; SIGNATURE_LENGTH],
    attachment: Attachment,
    hash: [u8; 32],
    id: i64,
}

impl Transaction {
    /// Constructs a signed transaction, enforcing the structural field
    /// invariants that hold for every type.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx_type: TransactionType,
        timestamp: u32,
        deadline: u16,
        sender_public_key: [u8; 32],
        recipient_id: i64,
        amount: i64,
        fee: i64,
        referenced_transaction: Option<TransactionRef>,
        signature: [u8; SIGNATURE_LENGTH],
        attachment: Attachment,
    ) -> Result<Self, ValidationError> {
        if deadline < 1 {
            return Err(ValidationError::InvalidDeadline(deadline));
        }
        if amount < 0 || amount > MAX_BALANCE_NQT {
            return Err(ValidationError::InvalidAmount(amount));
        }
        if fee < 1 || fee > MAX_BALANCE_NQT {
            return Err(ValidationError::InvalidFee(fee));
        }

        let mut tx = Self {
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
            hash: [0u8; 32],
            id: 0,
        };
        tx.hash = sha256(&tx.canonical_bytes(true));
        tx.id = id_from_hash(&tx.hash);
        Ok(tx)
    }

    // -- Field accessors ----------------------------------------------------

    pub fn transaction_type(&self) -> TransactionType {
        self.tx_type
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn deadline(&self) -> u16 {
        self.deadline
    }

    pub fn sender_public_key(&self) -> &[u8; 32] {
        &self.sender_public_key
    }

    pub fn recipient_id(&self) -> i64 {
        self.recipient_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn fee(&self) -> i64 {
        self.fee
    }

    pub fn referenced_transaction(&self) -> Option<&TransactionRef> {
        self.referenced_transaction.as_ref()
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.signature
    }

    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    // -- Derived identity ---------------------------------------------------

    /// The lossy 64-bit id; pool map key.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The full 32-byte hash; replay index key.
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// The id in its canonical unsigned-decimal form.
    pub fn string_id(&self) -> String {
        unsigned_string(self.id)
    }

    /// Sender account id derived from the public key.
    pub fn sender_id(&self) -> i64 {
        account_id_from_public_key(&self.sender_public_key)
    }

    /// Epoch second at which this transaction expires.
    pub fn expiration(&self) -> u32 {
        self.timestamp
            .saturating_add(u32::from(self.deadline) * 60)
    }

    /// Whether the transaction has expired at `now` (epoch seconds).
    pub fn is_expired(&self, now: u32) -> bool {
        self.expiration() < now
    }

    /// Amount plus fee: what admission reserves from the sender.
    pub fn total_cost(&self) -> i64 {
        self.amount.saturating_add(self.fee)
    }

    // -- Verification -------------------------------------------------------

    /// Verifies the signature over the canonical bytes with the signature
    /// field zeroed.
    pub fn verify(&self) -> bool {
        crate::crypto::verify(
            &self.signature,
            &self.canonical_bytes(false),
            &self.sender_public_key,
        )
    }

    /// Validates the type-specific attachment rules at `height`.
    pub fn validate_attachment(&self, height: u32) -> Result<(), ValidationError> {
        types::validate_attachment(self, height)
    }

    // -- Ledger hooks -------------------------------------------------------

    /// Reserves `total_cost` from the sender's unconfirmed balance.
    /// Returns `false` on insufficient funds: the double-spend signal.
    /// Caller holds the chain lock.
    pub fn apply_unconfirmed(&self, ledger: &Ledger) -> bool {
        ledger.associate_public_key(&self.sender_public_key);
        ledger.reserve_unconfirmed(self.sender_id(), self.total_cost())
    }

    /// Releases a reservation made by [`apply_unconfirmed`].
    pub fn undo_unconfirmed(&self, ledger: &Ledger) {
        ledger.add_to_unconfirmed_balance(self.sender_id(), self.total_cost());
    }

    /// Confirmed ledger effects on block apply. The unconfirmed
    /// reservation is already in place when this runs.
    pub fn apply(&self, ledger: &Ledger) {
        ledger.add_to_balance(self.sender_id(), -self.total_cost());
        if self.recipient_id != 0 {
            ledger.add_to_balance_and_unconfirmed(self.recipient_id, self.amount);
        }
        types::apply_attachment(self, ledger);
    }

    /// Reverses [`apply`] on block undo.
    pub fn undo(&self, ledger: &Ledger) -> Result<(), UndoNotSupportedError> {
        types::undo_attachment(self, ledger)?;
        ledger.add_to_balance(self.sender_id(), self.total_cost());
        if self.recipient_id != 0 {
            ledger.add_to_balance_and_unconfirmed(self.recipient_id, -self.amount);
        }
        Ok(())
    }

    // -- Canonical bytes ----------------------------------------------------

    /// Canonical serialization underlying `hash`, `id`, and signature
    /// verification. Fixed 8-byte amounts and the 8-byte reference
    /// projection, independent of the height-gated wire layouts in the
    /// codec, so a transaction's identity never changes as forks
    /// activate.
    fn canonical_bytes(&self, with_signature: bool) -> Vec<u8> {
        let attachment_bytes = codec::attachment_bytes(&self.attachment);
        let mut bytes = Vec::with_capacity(128 + attachment_bytes.len());
        bytes.push(self.tx_type.type_byte());
        bytes.push(self.tx_type.subtype_byte());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.deadline.to_le_bytes());
        bytes.extend_from_slice(&self.sender_public_key);
        bytes.extend_from_slice(&self.recipient_id.to_le_bytes());
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes.extend_from_slice(&self.fee.to_le_bytes());
        let ref_id = self.referenced_transaction.map(|r| r.id()).unwrap_or(0);
        bytes.extend_from_slice(&ref_id.to_le_bytes());
        if with_signature {
            bytes.extend_from_slice(&self.signature);
        } else {
            bytes.extend_from_slice(&[0u8; SIGNATURE_LENGTH]);
        }
        bytes.extend_from_slice(&attachment_bytes);
        bytes
    }

    pub(crate) fn signable_bytes(&self) -> Vec<u8> {
        self.canonical_bytes(false)
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Assembles a locally originated transaction and signs it.
///
/// The timestamp defaults to the current epoch second; override it only
/// in tests. `sign` consumes the builder and yields the immutable record.
pub struct TransactionBuilder {
    deadline: u16,
    recipient_id: i64,
    amount: i64,
    fee: i64,
    referenced_transaction: Option<TransactionRef>,
    attachment: Attachment,
    timestamp: Option<u32>,
}

impl TransactionBuilder {
    pub fn new(deadline: u16, amount: i64, fee: i64) -> Self {
        Self {
            deadline,
            recipient_id: 0,
            amount,
            fee,
            referenced_transaction: None,
            attachment: Attachment::None,
            timestamp: None,
        }
    }

    pub fn recipient(mut self, recipient_id: i64) -> Self {
        self.recipient_id = recipient_id;
        self
    }

    pub fn referenced(mut self, reference: TransactionRef) -> Self {
        self.referenced_transaction = Some(reference);
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = attachment;
        self
    }

    /// Overrides the origin timestamp (epoch seconds).
    pub fn timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Signs with the sender's keypair and produces the final record.
    pub fn sign(self, keypair: &crate::crypto::NhzKeypair) -> Result<Transaction, ValidationError> {
        let timestamp = self.timestamp.unwrap_or_else(epoch::epoch_time);
        let tx_type = self.attachment.transaction_type();

        // Build once with a zero signature to obtain the signable bytes,
        // then rebuild with the real signature so identity is computed
        // over the final content.
        let unsigned = Transaction::new(
            tx_type,
            timestamp,
            self.deadline,
            keypair.public_key(),
            self.recipient_id,
            self.amount,
            self.fee,
            self.referenced_transaction,
            [0u8; SIGNATURE_LENGTH],
            self.attachment.clone(),
        )?;
        let signature = keypair.sign(&unsigned.signable_bytes());

        Transaction::new(
            tx_type,
            timestamp,
            self.deadline,
            keypair.public_key(),
            self.recipient_id,
            self.amount,
            self.fee,
            self.referenced_transaction,
            signature,
            self.attachment,
        )
    }
}
