//! # Network Module
//!
//! The peer overlay and the transaction pool: everything that moves state
//! between this node and the rest of the network.
//!
//! - [`protocol`] — the JSON request/response vocabulary peers exchange.
//! - [`hallmark`] — the signed credential that rates peer trustworthiness.
//! - [`peer`] — per-remote state and the outbound HTTP client.
//! - [`peers`] — the registry, weighted selection, gossip workers, and
//!   the broadcast fan-out.
//! - [`pool`] — the unconfirmed-transaction pool, its admission pipeline,
//!   block hooks, and maintenance workers.
//! - [`node`] — the root value that owns and wires the above.

pub mod hallmark;
pub mod node;
pub mod peer;
pub mod peers;
pub mod pool;
pub mod protocol;

pub use hallmark::Hallmark;
pub use node::NhzNode;
pub use peer::{NetworkError, Peer, PeerState};
pub use peers::{PeerEvent, Peers, PeersConfig};
pub use pool::{TransactionEvent, TransactionPool};
