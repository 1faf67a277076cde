//! # Transaction Types & Attachments
//!
//! A transaction's `(type, subtype)` byte pair selects its attachment
//! schema, its validation rules, and its ledger effects. Each type also
//! carries the fork height at which it became legal: a transaction of a
//! type scheduled for a future height is dropped with `NotYetEnabled`
//! rather than rejected as malformed, because it may be perfectly valid
//! to a newer node.

use std::fmt;

use crate::account::{Alias, Ledger};
use crate::config::{
    ALIAS_SYSTEM_BLOCK, ARBITRARY_MESSAGES_BLOCK, MAX_ALIAS_LENGTH, MAX_ALIAS_URI_LENGTH,
    MAX_ARBITRARY_MESSAGE_LENGTH,
};
use crate::transaction::{Transaction, UndoNotSupportedError, ValidationError};

// ---------------------------------------------------------------------------
// TransactionType
// ---------------------------------------------------------------------------

/// The operation a transaction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    /// Ordinary payment: moves `amount` from sender to recipient. (0, 0)
    Payment,
    /// Arbitrary message: a byte payload anchored on chain. (1, 0)
    ArbitraryMessage,
    /// Alias assignment: binds a name to a URI for the sender. (1, 1)
    AliasAssignment,
}

impl TransactionType {
    /// Resolves a wire `(type, subtype)` pair.
    pub fn from_bytes(type_byte: u8, subtype_byte: u8) -> Result<Self, ValidationError> {
        match (type_byte, subtype_byte) {
            (0, 0) => Ok(Self::Payment),
            (1, 0) => Ok(Self::ArbitraryMessage),
            (1, 1) => Ok(Self::AliasAssignment),
            _ => Err(ValidationError::InvalidType {
                type_byte,
                subtype_byte,
            }),
        }
    }

    pub fn type_byte(self) -> u8 {
        match self {
            Self::Payment => 0,
            Self::ArbitraryMessage | Self::AliasAssignment => 1,
        }
    }

    pub fn subtype_byte(self) -> u8 {
        match self {
            Self::Payment | Self::ArbitraryMessage => 0,
            Self::AliasAssignment => 1,
        }
    }

    /// The block height from which this type is legal.
    pub fn enabled_at_height(self) -> u32 {
        match self {
            Self::Payment => 0,
            Self::ArbitraryMessage => ARBITRARY_MESSAGES_BLOCK,
            Self::AliasAssignment => ALIAS_SYSTEM_BLOCK,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payment => write!(f, "Payment"),
            Self::ArbitraryMessage => write!(f, "ArbitraryMessage"),
            Self::AliasAssignment => write!(f, "AliasAssignment"),
        }
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Type-specific transaction payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Payments carry no attachment.
    None,
    /// Raw message bytes, at most [`MAX_ARBITRARY_MESSAGE_LENGTH`].
    Message { message: Vec<u8> },
    /// Alias name and target URI.
    AliasAssignment { alias: String, uri: String },
}

impl Attachment {
    /// The transaction type this attachment belongs to.
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::None => TransactionType::Payment,
            Self::Message { .. } => TransactionType::ArbitraryMessage,
            Self::AliasAssignment { .. } => TransactionType::AliasAssignment,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validates the type-specific parts of a transaction at the given chain
/// height. Structural field checks (deadline, fee, ranges) happen at
/// construction; this covers attachment schema, per-type amount rules,
/// and fork gating.
pub fn validate_attachment(tx: &Transaction, height: u32) -> Result<(), ValidationError> {
    let tx_type = tx.transaction_type();
    if height < tx_type.enabled_at_height() {
        return Err(ValidationError::NotYetEnabled(tx_type));
    }
    if tx.attachment().transaction_type() != tx_type {
        return Err(ValidationError::AttachmentMismatch(tx_type));
    }

    match tx.attachment() {
        Attachment::None => {
            if tx.amount() <= 0 {
                return Err(ValidationError::InvalidAmount(tx.amount()));
            }
            if tx.recipient_id() == 0 {
                return Err(ValidationError::MissingRecipient);
            }
        }
        Attachment::Message { message } => {
            if tx.amount() != 0 {
                return Err(ValidationError::InvalidAmount(tx.amount()));
            }
            if message.len() > MAX_ARBITRARY_MESSAGE_LENGTH {
                return Err(ValidationError::AttachmentTooLarge {
                    actual: message.len(),
                    limit: MAX_ARBITRARY_MESSAGE_LENGTH,
                });
            }
        }
        Attachment::AliasAssignment { alias, uri } => {
            if tx.amount() != 0 {
                return Err(ValidationError::InvalidAmount(tx.amount()));
            }
            if alias.is_empty() || alias.len() > MAX_ALIAS_LENGTH {
                return Err(ValidationError::InvalidAlias(alias.clone()));
            }
            if !alias
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            {
                return Err(ValidationError::InvalidAlias(alias.clone()));
            }
            if uri.len() > MAX_ALIAS_URI_LENGTH {
                return Err(ValidationError::AttachmentTooLarge {
                    actual: uri.len(),
                    limit: MAX_ALIAS_URI_LENGTH,
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Ledger Effects
// ---------------------------------------------------------------------------

/// Applies the attachment's side effects after the balance moves.
pub fn apply_attachment(tx: &Transaction, ledger: &Ledger) {
    if let Attachment::AliasAssignment { alias, uri } = tx.attachment() {
        ledger.set_alias(Alias {
            name: alias.clone(),
            uri: uri.clone(),
            account_id: tx.sender_id(),
            transaction_id: tx.id(),
        });
    }
}

/// Reverses the attachment's side effects.
///
/// An alias that has since been reassigned cannot be restored to its
/// previous binding; the chain must rescan instead of rolling back.
pub fn undo_attachment(tx: &Transaction, ledger: &Ledger) -> Result<(), UndoNotSupportedError> {
    if let Attachment::AliasAssignment { alias, .. } = tx.attachment() {
        if !ledger.remove_alias_if_assigned_by(alias, tx.id()) {
            return Err(UndoNotSupportedError {
                transaction_id: tx.id(),
                reason: format!("alias '{}' reassigned since", alias),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_byte_roundtrip() {
        for tx_type in [
            TransactionType::Payment,
            TransactionType::ArbitraryMessage,
            TransactionType::AliasAssignment,
        ] {
            let resolved =
                TransactionType::from_bytes(tx_type.type_byte(), tx_type.subtype_byte())
                    .expect("known pair");
            assert_eq!(resolved, tx_type);
        }
    }

    #[test]
    fn unknown_type_pair_rejected() {
        assert!(matches!(
            TransactionType::from_bytes(9, 0),
            Err(ValidationError::InvalidType { .. })
        ));
        assert!(matches!(
            TransactionType::from_bytes(1, 7),
            Err(ValidationError::InvalidType { .. })
        ));
    }

    #[test]
    fn attachment_maps_to_type() {
        assert_eq!(Attachment::None.transaction_type(), TransactionType::Payment);
        assert_eq!(
            Attachment::Message { message: vec![] }.transaction_type(),
            TransactionType::ArbitraryMessage
        );
        assert_eq!(
            Attachment::AliasAssignment {
                alias: "a".into(),
                uri: String::new()
            }
            .transaction_type(),
            TransactionType::AliasAssignment
        );
    }

    #[test]
    fn enablement_heights() {
        assert_eq!(TransactionType::Payment.enabled_at_height(), 0);
        assert_eq!(
            TransactionType::ArbitraryMessage.enabled_at_height(),
            ARBITRARY_MESSAGES_BLOCK
        );
        assert_eq!(
            TransactionType::AliasAssignment.enabled_at_height(),
            ALIAS_SYSTEM_BLOCK
        );
    }
}
