//! # Epoch Time
//!
//! Protocol timestamps are u32 seconds counted from the genesis instant
//! (2014-03-22T22:22:22Z), not Unix time. Every transaction timestamp,
//! deadline expiration, and block timestamp is expressed on this clock.
//! Blacklisting deadlines are the one exception: they use wall-clock
//! millis, because they are local policy rather than consensus data.

use chrono::Utc;

use crate::config::EPOCH_BEGINNING_MS;

/// Current epoch time: whole seconds elapsed since the genesis instant.
///
/// Saturates at zero if the host clock is set before genesis, which only
/// happens on badly misconfigured machines. Callers compare these values
/// against transaction timestamps and expirations.
pub fn epoch_time() -> u32 {
    millis_to_epoch(Utc::now().timestamp_millis())
}

/// Current wall-clock time in Unix millis. Used for blacklist deadlines.
pub fn system_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts Unix millis to epoch seconds, saturating below genesis.
pub fn millis_to_epoch(unix_millis: i64) -> u32 {
    let delta = unix_millis - EPOCH_BEGINNING_MS;
    if delta <= 0 {
        0
    } else {
        (delta / 1000) as u32
    }
}

/// Converts an epoch-seconds value back to Unix millis.
pub fn epoch_to_millis(epoch_seconds: u32) -> i64 {
    EPOCH_BEGINNING_MS + i64::from(epoch_seconds) * 1000
}
