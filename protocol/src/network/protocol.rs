//! # Peer Protocol Vocabulary
//!
//! Peers speak JSON over HTTP POST. Every request carries a `requestType`
//! field naming the operation; responses are plain objects, with an
//! `error` field marking failures. This module centralizes the request
//! builders so the exact field names live in one place.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::storage::Block;
use crate::transaction::{codec, Transaction};

/// The request-type discriminator field.
pub const REQUEST_TYPE: &str = "requestType";

/// Builds a `getInfo` request from this node's info object.
pub fn get_info_request(my_info: &Value) -> Value {
    let mut request = my_info.clone();
    if let Some(object) = request.as_object_mut() {
        object.insert(REQUEST_TYPE.into(), json!("getInfo"));
    }
    request
}

/// Builds a `getPeers` request.
pub fn get_peers_request() -> Value {
    json!({ REQUEST_TYPE: "getPeers" })
}

/// Builds a `getUnconfirmedTransactions` request.
pub fn get_unconfirmed_transactions_request() -> Value {
    json!({ REQUEST_TYPE: "getUnconfirmedTransactions" })
}

/// Builds a `processTransactions` request from already-rendered
/// transaction objects.
pub fn process_transactions_request(transactions: Vec<Value>) -> Value {
    json!({
        REQUEST_TYPE: "processTransactions",
        "transactions": transactions,
    })
}

/// Renders transactions for a `processTransactions` request.
pub fn render_transactions(transactions: &[Arc<Transaction>]) -> Vec<Value> {
    transactions.iter().map(|tx| codec::to_json(tx)).collect()
}

/// Builds a `processBlock` request.
pub fn process_block_request(block: &Block) -> Value {
    let mut request = block.to_json();
    if let Some(object) = request.as_object_mut() {
        object.insert(REQUEST_TYPE.into(), json!("processBlock"));
    }
    request
}

/// Whether a peer response denotes success: present and without an
/// `error` field.
pub fn is_success(response: &Value) -> bool {
    response.get("error").is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_types_are_set() {
        assert_eq!(
            get_peers_request().get(REQUEST_TYPE),
            Some(&json!("getPeers"))
        );
        assert_eq!(
            get_unconfirmed_transactions_request().get(REQUEST_TYPE),
            Some(&json!("getUnconfirmedTransactions"))
        );
        assert_eq!(
            process_transactions_request(vec![]).get(REQUEST_TYPE),
            Some(&json!("processTransactions"))
        );
    }

    #[test]
    fn get_info_merges_identity() {
        let info = json!({ "application": "Nhz", "version": "0.4.2" });
        let request = get_info_request(&info);
        assert_eq!(request.get(REQUEST_TYPE), Some(&json!("getInfo")));
        assert_eq!(request.get("application"), Some(&json!("Nhz")));
    }

    #[test]
    fn error_field_marks_failure() {
        assert!(is_success(&json!({ "peers": [] })));
        assert!(!is_success(&json!({ "error": "busy" })));
    }
}
