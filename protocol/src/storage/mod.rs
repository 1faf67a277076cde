//! # Storage
//!
//! The persistence-facing edge of the core. [`chain`] holds the canonical
//! chain view and the process-wide chain lock that serializes the pool
//! against block processing. [`peer_db`] persists the peer set across
//! restarts. Block assembly and full chain persistence live outside the
//! core; only the interfaces consumed here are modeled.

pub mod block;
pub mod chain;
pub mod peer_db;

pub use block::Block;
pub use chain::Blockchain;
pub use peer_db::{PeerDb, PeerDbError};
