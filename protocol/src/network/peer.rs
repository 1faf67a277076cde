//! # Peer Record
//!
//! Per-remote state: address, connection state, blacklist deadline,
//! traffic counters, reported metadata, and the hallmark credential.
//! The registry holds one `Arc<Peer>` per normalized address; interior
//! state lives behind a short per-peer mutex so concurrent workers can
//! touch different peers freely.
//!
//! Outbound requests go over HTTP POST with JSON bodies. A transport
//! failure demotes the peer's state; a garbage response (non-JSON body)
//! is a protocol violation and blacklists it. Individual send failures
//! are routine and never propagate beyond a debug log and a `None`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::account::Ledger;
use crate::config::peer_port;
use crate::epoch::system_millis;
use crate::events::Listeners;
use crate::network::hallmark::Hallmark;
use crate::network::peers::{PeerEvent, PeersConfig};

// Bits of `communication_logging_mask`.
pub const LOGGING_MASK_EXCEPTIONS: u32 = 1;
pub const LOGGING_MASK_NON200_RESPONSES: u32 = 2;
pub const LOGGING_MASK_200_RESPONSES: u32 = 4;

/// An outbound request failed. These are routine under adversarial
/// network conditions: they adjust peer state and counters, never more.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http status {0}")]
    NonSuccessStatus(u16),

    #[error("unparseable response: {0}")]
    UnparseableResponse(String),
}

/// Connection state of a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Never successfully connected in this process lifetime.
    NonConnected,
    /// Handshake (`getInfo`) completed.
    Connected,
    /// Previously connected, then failed or was deactivated.
    Disconnected,
}

#[derive(Debug, Default)]
struct PeerInner {
    announced_address: Option<String>,
    state: Option<PeerState>,
    blacklisted_until: Option<i64>,
    downloaded_volume: i64,
    uploaded_volume: i64,
    application: Option<String>,
    version: Option<String>,
    platform: Option<String>,
    share_address: bool,
    hallmark: Option<Hallmark>,
}

/// One remote peer.
pub struct Peer {
    peer_address: String,
    config: Arc<PeersConfig>,
    ledger: Arc<Ledger>,
    listeners: Arc<Listeners<Arc<Peer>, PeerEvent>>,
    http: reqwest::blocking::Client,
    inner: Mutex<PeerInner>,
}

impl Peer {
    pub(crate) fn new(
        peer_address: String,
        announced_address: Option<String>,
        config: Arc<PeersConfig>,
        ledger: Arc<Ledger>,
        listeners: Arc<Listeners<Arc<Peer>, PeerEvent>>,
        http: reqwest::blocking::Client,
    ) -> Self {
        Self {
            peer_address,
            config,
            ledger,
            listeners,
            http,
            inner: Mutex::new(PeerInner {
                announced_address,
                state: Some(PeerState::NonConnected),
                share_address: true,
                ..PeerInner::default()
            }),
        }
    }

    // -- Identity -----------------------------------------------------------

    /// Registry key: the normalized, resolved address.
    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    /// The address the peer asks to be shared as, if any. Peers without
    /// one are private and never re-gossiped or counted as public.
    pub fn announced_address(&self) -> Option<String> {
        self.inner.lock().announced_address.clone()
    }

    pub(crate) fn set_announced_address(&self, announced: Option<String>) {
        self.inner.lock().announced_address = announced;
    }

    /// The host the peer is reached at: the announced host when present,
    /// otherwise the resolved address. Hallmarks must be bound to this.
    pub fn declared_host(&self) -> String {
        let inner = self.inner.lock();
        let base = inner
            .announced_address
            .as_deref()
            .unwrap_or(&self.peer_address);
        split_host_port(base).0.to_string()
    }

    /// The explicit port from the announced address, if one was given.
    pub fn port(&self) -> Option<u16> {
        let inner = self.inner.lock();
        let base = inner
            .announced_address
            .as_deref()
            .unwrap_or(&self.peer_address);
        split_host_port(base).1
    }

    fn connect_address(&self) -> String {
        let inner = self.inner.lock();
        let base = inner
            .announced_address
            .as_deref()
            .unwrap_or(&self.peer_address);
        let (host, port) = split_host_port(base);
        format!(
            "{}:{}",
            host,
            port.unwrap_or_else(|| peer_port(self.config.is_testnet))
        )
    }

    // -- State --------------------------------------------------------------

    pub fn state(&self) -> PeerState {
        self.inner.lock().state.unwrap_or(PeerState::NonConnected)
    }

    pub fn set_state(self: &Arc<Self>, new_state: PeerState) {
        let old_state = {
            let mut inner = self.inner.lock();
            let old = inner.state.unwrap_or(PeerState::NonConnected);
            inner.state = Some(new_state);
            old
        };
        if old_state == new_state {
            return;
        }
        if new_state == PeerState::Connected {
            self.listeners.notify(PeerEvent::AddedActivePeer, self);
        } else if old_state == PeerState::Connected {
            self.listeners.notify(PeerEvent::ChangedActivePeer, self);
        }
    }

    /// Demotes the peer after a failure: a connected peer becomes
    /// disconnected, anything else stays non-connected.
    pub fn deactivate(self: &Arc<Self>) {
        let next = if self.state() == PeerState::Connected {
            PeerState::Disconnected
        } else {
            PeerState::NonConnected
        };
        self.set_state(next);
        self.listeners.notify(PeerEvent::Deactivate, self);
    }

    // -- Blacklisting -------------------------------------------------------

    pub fn is_blacklisted(&self) -> bool {
        if self.config.known_blacklisted_peers.contains(&self.peer_address) {
            return true;
        }
        match self.inner.lock().blacklisted_until {
            Some(until) => system_millis() < until,
            None => false,
        }
    }

    /// Blacklists the peer for the configured period and deactivates it.
    pub fn blacklist(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            inner.blacklisted_until =
                Some(system_millis() + self.config.blacklisting_period_ms as i64);
        }
        self.deactivate();
        self.listeners.notify(PeerEvent::Blacklist, self);
        debug!(peer = %self.peer_address, "peer blacklisted");
    }

    /// Clears an elapsed blacklist deadline. Called by the un-blacklist
    /// sweep with the current wall-clock millis.
    pub fn update_blacklisted_status(self: &Arc<Self>, current_millis: i64) {
        let cleared = {
            let mut inner = self.inner.lock();
            match inner.blacklisted_until {
                Some(until) if until <= current_millis => {
                    inner.blacklisted_until = None;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            self.listeners.notify(PeerEvent::Unblacklist, self);
        }
    }

    // -- Weight & hallmark --------------------------------------------------

    pub fn hallmark(&self) -> Option<Hallmark> {
        self.inner.lock().hallmark.clone()
    }

    /// Weight derived from the hallmark and its account's stake; 0 for
    /// peers without a valid, host-bound hallmark.
    pub fn weight(&self) -> i64 {
        let hallmark = self.inner.lock().hallmark.clone();
        hallmark.map(|h| h.weight(&self.ledger)).unwrap_or(0)
    }

    /// Parses and binds a presented hallmark. Returns `false` when the
    /// hallmark is unusable (malformed, bad signature, or bound to a
    /// different host); the hallmark is dropped in that case and the
    /// caller decides whether the violation warrants a blacklist.
    pub fn analyze_hallmark(self: &Arc<Self>, hallmark_hex: &str) -> bool {
        let host = self.declared_host();
        match Hallmark::parse(hallmark_hex) {
            Ok(hallmark) if hallmark.verify_for_host(&host) => {
                self.inner.lock().hallmark = Some(hallmark);
                self.listeners.notify(PeerEvent::Weight, self);
                true
            }
            Ok(_) => {
                debug!(peer = %self.peer_address, "hallmark host mismatch, dropping");
                self.inner.lock().hallmark = None;
                false
            }
            Err(e) => {
                debug!(peer = %self.peer_address, error = %e, "unparseable hallmark");
                self.inner.lock().hallmark = None;
                false
            }
        }
    }

    // -- Metadata -----------------------------------------------------------

    pub fn application(&self) -> Option<String> {
        self.inner.lock().application.clone()
    }

    pub fn version(&self) -> Option<String> {
        self.inner.lock().version.clone()
    }

    pub fn platform(&self) -> Option<String> {
        self.inner.lock().platform.clone()
    }

    pub fn share_address(&self) -> bool {
        self.inner.lock().share_address
    }

    /// Applies the identity fields of a `getInfo` payload.
    pub(crate) fn update_info(&self, info: &Value) {
        let mut inner = self.inner.lock();
        if let Some(application) = info.get("application").and_then(Value::as_str) {
            inner.application = Some(application.to_string());
        }
        if let Some(version) = info.get("version").and_then(Value::as_str) {
            inner.version = Some(version.to_string());
        }
        if let Some(platform) = info.get("platform").and_then(Value::as_str) {
            inner.platform = Some(platform.to_string());
        }
        inner.share_address = info
            .get("shareAddress")
            .and_then(Value::as_bool)
            .unwrap_or(false);
    }

    // -- Traffic counters ---------------------------------------------------

    pub fn downloaded_volume(&self) -> i64 {
        self.inner.lock().downloaded_volume
    }

    pub fn uploaded_volume(&self) -> i64 {
        self.inner.lock().uploaded_volume
    }

    pub(crate) fn update_downloaded_volume(self: &Arc<Self>, bytes: i64) {
        {
            let mut inner = self.inner.lock();
            inner.downloaded_volume = inner.downloaded_volume.saturating_add(bytes);
        }
        self.listeners.notify(PeerEvent::DownloadedVolume, self);
    }

    pub(crate) fn update_uploaded_volume(self: &Arc<Self>, bytes: i64) {
        {
            let mut inner = self.inner.lock();
            inner.uploaded_volume = inner.uploaded_volume.saturating_add(bytes);
        }
        self.listeners.notify(PeerEvent::UploadedVolume, self);
    }

    // -- Outbound requests --------------------------------------------------

    /// POSTs a JSON request to the peer and returns the parsed response,
    /// or `None` on any failure. Transport and HTTP-level failures
    /// deactivate the peer; an unparseable response body is a protocol
    /// violation and blacklists it.
    pub fn send(self: &Arc<Self>, request: &Value) -> Option<Value> {
        match self.send_inner(request) {
            Ok(value) => Some(value),
            Err(error) => {
                let mask = self.config.communication_logging_mask;
                let log_bit = match &error {
                    NetworkError::NonSuccessStatus(_) => LOGGING_MASK_NON200_RESPONSES,
                    _ => LOGGING_MASK_EXCEPTIONS,
                };
                if mask & log_bit != 0 {
                    debug!(peer = %self.peer_address, error = %error, "peer request failed");
                }
                if matches!(error, NetworkError::UnparseableResponse(_)) {
                    self.blacklist();
                } else {
                    self.deactivate();
                }
                None
            }
        }
    }

    fn send_inner(self: &Arc<Self>, request: &Value) -> Result<Value, NetworkError> {
        let body = request.to_string();
        let url = format!("http://{}/nhz", self.connect_address());
        let mask = self.config.communication_logging_mask;

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.clone())
            .send()?;

        self.update_uploaded_volume(body.len() as i64);

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::NonSuccessStatus(status.as_u16()));
        }

        let text = response.text()?;
        self.update_downloaded_volume(text.len() as i64);

        if mask & LOGGING_MASK_200_RESPONSES != 0 {
            debug!(peer = %self.peer_address, response = %text, "peer response");
        }

        serde_json::from_str::<Value>(&text)
            .map_err(|e| NetworkError::UnparseableResponse(e.to_string()))
    }

    /// Attempts the `getInfo` handshake. Success applies the peer's
    /// reported identity and marks it connected; failure marks it
    /// disconnected. A rejected hallmark blacklists.
    pub fn connect(self: &Arc<Self>, my_info_request: &Value) {
        match self.send(my_info_request) {
            Some(response) => {
                self.update_info(&response);
                if let Some(announced) = response.get("announcedAddress").and_then(Value::as_str) {
                    if let Some(normalized) = super::peers::normalize_host_and_port(announced) {
                        self.set_announced_address(Some(normalized));
                    }
                }
                match response.get("hallmark").and_then(Value::as_str) {
                    Some(hallmark_hex) => {
                        if !self.analyze_hallmark(hallmark_hex) {
                            self.blacklist();
                            return;
                        }
                    }
                    None => self.inner.lock().hallmark = None,
                }
                self.set_state(PeerState::Connected);
            }
            None => self.set_state(PeerState::Disconnected),
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("peer_address", &self.peer_address)
            .field("state", &self.state())
            .field("weight", &self.weight())
            .finish()
    }
}

/// Splits `host[:port]`. IPv6 literals use the bracketed form
/// `[addr]:port`; a bare IPv6 literal (containing multiple colons) is
/// treated as having no port.
pub(crate) fn split_host_port(address: &str) -> (&str, Option<u16>) {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &rest[..end];
            let port = rest[end + 1..]
                .strip_prefix(':')
                .and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match address.rfind(':') {
        Some(i) if !address[..i].contains(':') => {
            let port = address[i + 1..].parse().ok();
            (&address[..i], port)
        }
        _ => (address, None),
    }
}
