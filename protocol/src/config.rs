//! # Protocol Constants
//!
//! Every genesis-critical number in Nhz lives here. Fork heights, balance
//! units, payload limits, peer ports. Several of these gate wire-format or
//! validation changes at exact block heights and must never drift: a node
//! that disagrees on any of them forks itself off the network.

// ---------------------------------------------------------------------------
// Balance Units
// ---------------------------------------------------------------------------

/// Atomic units per whole NHZ. All ledger arithmetic happens in atomic
/// units (NQT); one NHZ is 10^8 of them.
pub const ONE_NHZ: i64 = 100_000_000;

/// Total money supply in whole NHZ.
pub const MAX_BALANCE_NHZ: i64 = 1_000_000_000;

/// Total money supply in atomic units.
pub const MAX_BALANCE_NQT: i64 = MAX_BALANCE_NHZ * ONE_NHZ;

/// Minimum effective balance, in whole NHZ, for a hallmarked account to
/// contribute a non-zero peer weight.
pub const MIN_HUB_EFFECTIVE_BALANCE: i64 = 100_000;

// ---------------------------------------------------------------------------
// Block & Transaction Limits
// ---------------------------------------------------------------------------

/// Maximum number of transactions in a single block.
pub const MAX_NUMBER_OF_TRANSACTIONS: usize = 255;

/// Maximum total transaction payload per block, in bytes.
pub const MAX_PAYLOAD_LENGTH: usize = MAX_NUMBER_OF_TRANSACTIONS * 160;

/// Maximum transaction deadline, in minutes. A deadline above this is
/// rejected at admission.
pub const MAX_DEADLINE_MINUTES: u16 = 1440;

/// How far into the future (seconds) a transaction timestamp may sit
/// before the clock gate drops it.
pub const MAX_TIMESTAMP_DRIFT_SECONDS: u32 = 15;

/// Maximum arbitrary message payload, in bytes.
pub const MAX_ARBITRARY_MESSAGE_LENGTH: usize = 1000;

/// Alias name and URI limits.
pub const MAX_ALIAS_LENGTH: usize = 100;
pub const MAX_ALIAS_URI_LENGTH: usize = 1000;

// ---------------------------------------------------------------------------
// Fork Heights
// ---------------------------------------------------------------------------
//
// Each height gates a specific schema or validation change. The scheduled
// ones sit at i32::MAX until a release activates them.

pub const ALIAS_SYSTEM_BLOCK: u32 = 22;
pub const TRANSPARENT_FORGING_BLOCK: u32 = 30;
pub const ARBITRARY_MESSAGES_BLOCK: u32 = 40;
pub const TRANSPARENT_FORGING_BLOCK_2: u32 = 47;
pub const TRANSPARENT_FORGING_BLOCK_3: u32 = 51;
pub const TRANSPARENT_FORGING_BLOCK_4: u32 = 64;
pub const TRANSPARENT_FORGING_BLOCK_5: u32 = 67;
pub const TRANSPARENT_FORGING_BLOCK_6: u32 = 65_000;
pub const TRANSPARENT_FORGING_BLOCK_7: u32 = i32::MAX as u32;
pub const NQT_BLOCK: u32 = 67_000;
pub const FRACTIONAL_BLOCK: u32 = 69_000;
pub const ASSET_EXCHANGE_BLOCK: u32 = 70_000;
pub const REFERENCED_TRANSACTION_FULL_HASH_BLOCK: u32 = 75_000;
pub const REFERENCED_TRANSACTION_FULL_HASH_BLOCK_TIMESTAMP: u32 = i32::MAX as u32;

/// Height at which `check_transaction_hashes` ignores the first hash
/// collision. A historical block contains one; generalizing this breaks
/// chain replay.
pub const GRANDFATHERED_COLLISION_HEIGHT: u32 = 58_294;

// ---------------------------------------------------------------------------
// Peer Networking
// ---------------------------------------------------------------------------

/// Default inbound peer port on mainnet.
pub const DEFAULT_PEER_PORT: u16 = 7774;

/// Inbound peer port on testnet. Using it on mainnet is a startup error.
pub const TESTNET_PEER_PORT: u16 = 6874;

/// Size of the outbound broadcast thread pool.
pub const SEND_TO_PEERS_THREADS: usize = 10;

// ---------------------------------------------------------------------------
// Epoch
// ---------------------------------------------------------------------------

/// The network's genesis instant, 2014-03-22T22:22:22Z, as Unix millis.
/// All protocol timestamps are u32 seconds counted from here.
pub const EPOCH_BEGINNING_MS: i64 = 1_395_526_942_000;

/// Alphabet used for the base-36 encoding of ids in human-readable form.
pub const ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Returns the inbound peer port for the given network flavor.
pub fn peer_port(is_testnet: bool) -> u16 {
    if is_testnet {
        TESTNET_PEER_PORT
    } else {
        DEFAULT_PEER_PORT
    }
}
