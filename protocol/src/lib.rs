// Copyright (c) 2026 Nhz Developers. MIT License.
// See LICENSE for details.

//! # Nhz Protocol — Core Library
//!
//! The consensus-adjacent data plane of an Nhz full node: the
//! unconfirmed-transaction pool with its admission pipeline and block
//! hooks, and the peer overlay with hallmark weighting, gossip workers,
//! and the broadcast fan-out.
//!
//! ## Architecture
//!
//! - **config** — genesis-critical constants: fork heights, balance
//!   units, ports. Disagreeing on any of these is a self-inflicted fork.
//! - **epoch** — the network clock: u32 seconds since the genesis
//!   instant.
//! - **crypto** — SHA-256 identity derivation and the Ed25519 black box.
//! - **events** — typed listener registries; every component emits
//!   through one.
//! - **account** — balances, unconfirmed balances, effective stake, the
//!   alias registry.
//! - **transaction** — the immutable transaction record, its type
//!   system, and the height-gated wire codecs.
//! - **storage** — the chain view with the process-wide chain lock, and
//!   the persistent peer set.
//! - **network** — peers, pool, gossip workers, and the node root.
//! - **scheduler** — fixed-delay workers behind a two-phase start and a
//!   fail-loud panic fence.
//!
//! ## Concurrency
//!
//! The core is synchronous and thread-based. Registry and pool indices
//! are concurrent maps; every pool mutation serializes on the single
//! chain lock; listener notification happens outside locks. Workers run
//! one per thread at fixed delays, and an unexpected panic in any of
//! them terminates the process rather than risking divergent chain
//! state.

pub mod account;
pub mod config;
pub mod crypto;
pub mod epoch;
pub mod events;
pub mod network;
pub mod scheduler;
pub mod storage;
pub mod transaction;
