//! # Peer Registry & Gossip
//!
//! The concurrent peer registry keyed by normalized address, weighted
//! random selection, the three gossip workers, and the broadcast fan-out.
//!
//! ## Addressing
//!
//! An announced address (`host[:port]`) is resolved to an IP; the
//! resolved address is the registry key, so one physical remote maps to
//! one record no matter how many names point at it. Loopback, link-local,
//! and unspecified addresses never enter the registry.
//!
//! ## Selection
//!
//! [`Peers::get_any_peer`] rolls over the cumulative hallmark weights of
//! eligible peers, treating weightless peers as weight 1 so unhallmarked
//! nodes still get picked occasionally. When hallmark protection is on,
//! the pull threshold filters who we pull state from and the push
//! threshold filters who we broadcast to.

use std::collections::HashSet;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::account::{AccountEvent, Ledger};
use crate::config::{DEFAULT_PEER_PORT, SEND_TO_PEERS_THREADS, TESTNET_PEER_PORT};
use crate::epoch::system_millis;
use crate::events::Listeners;
use crate::network::hallmark::Hallmark;
use crate::network::peer::{split_host_port, Peer, PeerState};
use crate::network::protocol;
use crate::scheduler::Scheduler;
use crate::storage::{PeerDb, PeerDbError};
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event kinds emitted by the registry and its peers. Payload is the
/// affected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerEvent {
    Blacklist,
    Unblacklist,
    Deactivate,
    Remove,
    DownloadedVolume,
    UploadedVolume,
    Weight,
    AddedActivePeer,
    ChangedActivePeer,
    NewPeer,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs for the peer overlay.
#[derive(Debug, Clone)]
pub struct PeersConfig {
    /// Address advertised to other peers, `host[:port]`.
    pub my_address: Option<String>,
    /// Platform string advertised in `getInfo`.
    pub my_platform: String,
    /// This node's own hallmark, validated at startup.
    pub my_hallmark: Option<String>,
    /// Whether to advertise `my_address` at all.
    pub share_my_address: bool,
    /// Inbound peer port.
    pub peer_server_port: u16,
    /// Testnet flavor: different port, different peer list.
    pub is_testnet: bool,
    /// Seed peers contacted at startup.
    pub well_known_peers: Vec<String>,
    /// Addresses that are blacklisted unconditionally.
    pub known_blacklisted_peers: HashSet<String>,
    /// Target for the connect worker.
    pub max_connected_public_peers: usize,
    /// Outbound connection establishment timeout, millis.
    pub connect_timeout_ms: u64,
    /// Outbound per-read timeout, millis.
    pub read_timeout_ms: u64,
    /// How long a blacklisted peer stays blacklisted, millis.
    pub blacklisting_period_ms: u64,
    /// Enables the push/pull weight gates.
    pub enable_hallmark_protection: bool,
    /// Minimum weight to be broadcast to.
    pub push_threshold: i64,
    /// Minimum weight to be pulled from.
    pub pull_threshold: i64,
    /// Broadcast fan-out success target.
    pub send_to_peers_limit: usize,
    /// Location of the persistent peer set; `None` disables persistence.
    pub peer_db_path: Option<PathBuf>,
    /// Whether the discovery worker writes back to the peer database.
    pub save_peers: bool,
    /// Bitmask: 1 = exceptions, 2 = non-200 responses, 4 = 200 responses.
    pub communication_logging_mask: u32,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            my_address: None,
            my_platform: "PC".to_string(),
            my_hallmark: None,
            share_my_address: true,
            peer_server_port: DEFAULT_PEER_PORT,
            is_testnet: false,
            well_known_peers: Vec::new(),
            known_blacklisted_peers: HashSet::new(),
            max_connected_public_peers: 20,
            connect_timeout_ms: 2000,
            read_timeout_ms: 5000,
            blacklisting_period_ms: 300_000,
            enable_hallmark_protection: true,
            push_threshold: 0,
            pull_threshold: 0,
            send_to_peers_limit: 10,
            peer_db_path: None,
            save_peers: false,
            communication_logging_mask: 0,
        }
    }
}

/// Fatal startup misconfiguration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("port {0} may only be used on testnet")]
    TestnetPortOnMainnet(u16),

    #[error("invalid hallmark for address {address:?}: {reason}")]
    InvalidHallmark {
        address: Option<String>,
        reason: String,
    },

    #[error("peer database: {0}")]
    PeerDb(#[from] PeerDbError),

    #[error("http client: {0}")]
    HttpClient(String),
}

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

/// The peer registry and gossip driver.
pub struct Peers {
    config: Arc<PeersConfig>,
    ledger: Arc<Ledger>,
    peers: DashMap<String, Arc<Peer>>,
    listeners: Arc<Listeners<Arc<Peer>, PeerEvent>>,
    http: reqwest::blocking::Client,
    send_pool: SendPool,
    peer_db: Option<PeerDb>,
    my_peer_info_response: Value,
    my_peer_info_request: Value,
}

impl Peers {
    /// Validates the configuration, builds this node's `getInfo`
    /// identity, seeds the registry, and wires the weight listener.
    pub fn new(config: PeersConfig, ledger: Arc<Ledger>) -> Result<Arc<Self>, ConfigError> {
        // Testnet port discipline is enforced before anything dials out.
        if let Some(my_address) = &config.my_address {
            if let (_, Some(port)) = split_host_port(my_address.trim()) {
                if port == TESTNET_PEER_PORT && !config.is_testnet {
                    return Err(ConfigError::TestnetPortOnMainnet(port));
                }
            }
        }
        if config.peer_server_port == TESTNET_PEER_PORT && !config.is_testnet {
            return Err(ConfigError::TestnetPortOnMainnet(config.peer_server_port));
        }

        if let Some(my_hallmark) = &config.my_hallmark {
            validate_own_hallmark(my_hallmark, config.my_address.as_deref()).map_err(|reason| {
                ConfigError::InvalidHallmark {
                    address: config.my_address.clone(),
                    reason,
                }
            })?;
        }

        let my_peer_info_response = build_my_info(&config);
        let my_peer_info_request = protocol::get_info_request(&my_peer_info_response);
        debug!(info = %my_peer_info_response, "my peer info");

        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let peer_db = config
            .peer_db_path
            .as_ref()
            .map(PeerDb::open)
            .transpose()?;

        let peers = Arc::new(Self {
            config: Arc::new(config),
            ledger,
            peers: DashMap::new(),
            listeners: Arc::new(Listeners::new()),
            http,
            send_pool: SendPool::new(SEND_TO_PEERS_THREADS),
            peer_db,
            my_peer_info_response,
            my_peer_info_request,
        });

        for address in peers.config.well_known_peers.clone() {
            if peers.add_peer(&address).is_none() {
                warn!(address = %address, "invalid well known peer address");
            }
        }
        if let Some(db) = &peers.peer_db {
            for address in db.load_peers()? {
                peers.add_peer(&address);
            }
        }
        info!(known = peers.peers.len(), "peer registry initialized");

        // Balance changes re-derive the weight of every peer whose
        // hallmark binds the changed account.
        let weak = Arc::downgrade(&peers);
        peers.ledger.listeners().add_listener(
            AccountEvent::Balance,
            Box::new(move |account_id| {
                let Some(peers) = weak.upgrade() else {
                    return;
                };
                for peer in peers.snapshot() {
                    let matches = peer
                        .hallmark()
                        .map(|h| h.account_id() == *account_id)
                        .unwrap_or(false);
                    if matches {
                        peers.listeners.notify(PeerEvent::Weight, &peer);
                    }
                }
            }),
        );

        Ok(peers)
    }

    /// The registry's event bus.
    pub fn listeners(&self) -> &Arc<Listeners<Arc<Peer>, PeerEvent>> {
        &self.listeners
    }

    pub fn config(&self) -> &PeersConfig {
        &self.config
    }

    /// This node's identity as sent in a `getInfo` request.
    pub fn my_peer_info_request(&self) -> &Value {
        &self.my_peer_info_request
    }

    // -- Registry operations ------------------------------------------------

    /// Resolves and admits a peer by its announced address. Returns the
    /// (possibly pre-existing) record, or `None` for unroutable
    /// addresses, self, or a testnet-port violation.
    pub fn add_peer(&self, announced_address: &str) -> Option<Arc<Peer>> {
        let trimmed = announced_address.trim();
        let (host, _) = split_host_port(trimmed);
        let ip = resolve_host(host)?;
        self.add_peer_resolved(&ip.to_string(), Some(trimmed))
    }

    /// Admits a peer by its resolved address, as the inbound server does
    /// for connecting remotes.
    pub fn add_peer_resolved(
        &self,
        address: &str,
        announced_address: Option<&str>,
    ) -> Option<Arc<Peer>> {
        let peer_address = normalize_host_and_port(address)?;
        let announced = announced_address.and_then(normalize_host_and_port);

        if let (Some(my_address), Some(announced)) = (&self.config.my_address, &announced) {
            if my_address.trim().eq_ignore_ascii_case(announced) {
                return None;
            }
        }

        if let Some(existing) = self.peers.get(&peer_address) {
            return Some(Arc::clone(&existing));
        }

        let peer = Arc::new(Peer::new(
            peer_address.clone(),
            announced,
            Arc::clone(&self.config),
            Arc::clone(&self.ledger),
            Arc::clone(&self.listeners),
            self.http.clone(),
        ));
        if self.config.is_testnet {
            if let Some(port) = peer.port() {
                if port != TESTNET_PEER_PORT {
                    debug!(peer = %peer_address, port, "testnet peer on wrong port, ignoring");
                    return None;
                }
            }
        }

        self.peers.insert(peer_address, Arc::clone(&peer));
        self.listeners.notify(PeerEvent::NewPeer, &peer);
        Some(peer)
    }

    /// Hash lookup by normalized address.
    pub fn get_peer(&self, peer_address: &str) -> Option<Arc<Peer>> {
        self.peers.get(peer_address).map(|p| Arc::clone(&p))
    }

    /// Atomic removal; emits `Remove`.
    pub fn remove_peer(&self, peer: &Arc<Peer>) -> Option<Arc<Peer>> {
        let removed = self.peers.remove(peer.peer_address()).map(|(_, p)| p);
        if let Some(removed) = &removed {
            self.listeners.notify(PeerEvent::Remove, removed);
        }
        removed
    }

    /// A point-in-time copy of all records.
    pub fn get_all_peers(&self) -> Vec<Arc<Peer>> {
        self.snapshot()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Peers counted against `max_connected_public_peers`: connected and
    /// publicly addressable.
    pub fn connected_public_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|r| {
                r.value().state() == PeerState::Connected
                    && r.value().announced_address().is_some()
            })
            .count()
    }

    // -- Weighted selection -------------------------------------------------

    /// Weighted-random selection over peers in `state` that share their
    /// address and are not blacklisted. With `apply_pull_threshold` and
    /// hallmark protection on, peers under the pull threshold are
    /// excluded. Weightless peers roll as weight 1.
    pub fn get_any_peer(&self, state: PeerState, apply_pull_threshold: bool) -> Option<Arc<Peer>> {
        let mut selected = Vec::new();
        for peer in self.snapshot() {
            if !peer.is_blacklisted()
                && peer.state() == state
                && peer.share_address()
                && (!apply_pull_threshold
                    || !self.config.enable_hallmark_protection
                    || peer.weight() >= self.config.pull_threshold)
            {
                selected.push(peer);
            }
        }
        if selected.is_empty() {
            return None;
        }

        let total_weight: i64 = selected.iter().map(|p| p.weight().max(1)).sum();
        let mut hit = rand::thread_rng().gen_range(0..total_weight);
        for peer in selected {
            hit -= peer.weight().max(1);
            if hit < 0 {
                return Some(peer);
            }
        }
        None
    }

    // -- Broadcast fan-out --------------------------------------------------

    /// Broadcasts a `processTransactions` request.
    pub fn send_transactions_to_some_peers(&self, transactions: &[Arc<Transaction>]) {
        self.send_to_some_peers(protocol::process_transactions_request(
            protocol::render_transactions(transactions),
        ));
    }

    /// Broadcasts a `processBlock` request.
    pub fn send_block_to_some_peers(&self, block: &crate::storage::Block) {
        self.send_to_some_peers(protocol::process_block_request(block));
    }

    /// Best-effort parallel send to at least `send_to_peers_limit`
    /// eligible peers. The request is serialized once; sends run on the
    /// fixed pool; batches are drained as soon as enough are in flight to
    /// reach the target, and the walk stops once enough responses came
    /// back without an error field. Failures are logged and swallowed.
    pub fn send_to_some_peers(&self, request: Value) {
        let request = Arc::new(request);
        let limit = self.config.send_to_peers_limit;
        let mut successful = 0usize;
        let mut in_flight: Vec<mpsc::Receiver<bool>> = Vec::new();

        for peer in self.snapshot() {
            if self.config.enable_hallmark_protection
                && peer.weight() < self.config.push_threshold
            {
                continue;
            }
            if !peer.is_blacklisted()
                && peer.state() == PeerState::Connected
                && peer.announced_address().is_some()
            {
                let (reply_tx, reply_rx) = mpsc::channel();
                let request = Arc::clone(&request);
                self.send_pool.submit(Box::new(move || {
                    let ok = peer
                        .send(&request)
                        .map(|response| protocol::is_success(&response))
                        .unwrap_or(false);
                    let _ = reply_tx.send(ok);
                }));
                in_flight.push(reply_rx);
            }

            if in_flight.len() >= limit.saturating_sub(successful) {
                for reply in in_flight.drain(..) {
                    if reply.recv().unwrap_or(false) {
                        successful += 1;
                    }
                }
            }
            if successful >= limit {
                return;
            }
        }
    }

    // -- Inbound protocol handlers ------------------------------------------

    /// Handles an inbound `getInfo`: records or updates the remote peer
    /// and answers with this node's identity.
    pub fn process_get_info(&self, remote_address: &str, request: &Value) -> Value {
        let announced = request.get("announcedAddress").and_then(Value::as_str);
        if let Some(peer) = self.add_peer_resolved(remote_address, announced) {
            if let Some(announced) = announced.and_then(normalize_host_and_port) {
                peer.set_announced_address(Some(announced));
            }
            peer.update_info(request);
            match request.get("hallmark").and_then(Value::as_str) {
                Some(hallmark_hex) => {
                    if !peer.analyze_hallmark(hallmark_hex) {
                        peer.blacklist();
                    }
                }
                None => {}
            }
        }
        self.my_peer_info_response.clone()
    }

    /// Handles an inbound `getPeers`: the announced addresses of public,
    /// connected, non-blacklisted peers.
    pub fn get_peers_response(&self) -> Value {
        let addresses: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|p| {
                !p.is_blacklisted() && p.state() == PeerState::Connected && p.share_address()
            })
            .filter_map(|p| p.announced_address())
            .collect();
        json!({ "peers": addresses })
    }

    // -- Workers ------------------------------------------------------------

    /// Registers the three gossip workers with the scheduler.
    pub fn spawn_workers(self: &Arc<Self>, scheduler: &Scheduler) {
        // Un-blacklist sweep.
        let peers = Arc::clone(self);
        scheduler.schedule(
            "peer-unblacklist",
            Duration::from_secs(1),
            Box::new(move || {
                let now = system_millis();
                for peer in peers.snapshot() {
                    peer.update_blacklisted_status(now);
                }
                Ok(())
            }),
        );

        // Opportunistic connect.
        let peers = Arc::clone(self);
        scheduler.schedule(
            "peer-connect",
            Duration::from_secs(5),
            Box::new(move || {
                if peers.connected_public_count() < peers.config.max_connected_public_peers {
                    let state = if rand::thread_rng().gen_bool(0.5) {
                        PeerState::NonConnected
                    } else {
                        PeerState::Disconnected
                    };
                    if let Some(peer) = peers.get_any_peer(state, false) {
                        peer.connect(&peers.my_peer_info_request);
                    }
                }
                Ok(())
            }),
        );

        // Peer discovery and peer-set persistence.
        let peers = Arc::clone(self);
        scheduler.schedule(
            "peer-discovery",
            Duration::from_secs(5),
            Box::new(move || {
                let Some(peer) = peers.get_any_peer(PeerState::Connected, true) else {
                    return Ok(());
                };
                let Some(response) = peer.send(&protocol::get_peers_request()) else {
                    return Ok(());
                };
                let Some(addresses) = response.get("peers").and_then(Value::as_array) else {
                    return Ok(());
                };
                for address in addresses.iter().filter_map(Value::as_str) {
                    peers.add_peer(address);
                }
                if peers.config.save_peers {
                    peers.update_saved_peers()?;
                }
                Ok(())
            }),
        );
    }

    /// Diffs the live registry against the persisted set and applies
    /// inserts and deletes.
    fn update_saved_peers(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(db) = &self.peer_db else {
            return Ok(());
        };
        let current: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|p| !p.is_blacklisted())
            .filter_map(|p| p.announced_address())
            .collect();
        db.sync(&current)?;
        Ok(())
    }

    /// Drains the send pool. Called once at process shutdown.
    pub fn shutdown(&self) {
        self.send_pool.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Identity & startup helpers
// ---------------------------------------------------------------------------

/// Builds this node's `getInfo` identity object.
fn build_my_info(config: &PeersConfig) -> Value {
    let mut info = serde_json::Map::new();
    if config.share_my_address {
        if let Some(my_address) = &config.my_address {
            let trimmed = my_address.trim();
            let (host, port) = split_host_port(trimmed);
            let announced = if config.is_testnet {
                host.to_string()
            } else if port.is_some() {
                trimmed.to_string()
            } else if config.peer_server_port != DEFAULT_PEER_PORT {
                format!("{}:{}", host, config.peer_server_port)
            } else {
                host.to_string()
            };
            info.insert("announcedAddress".into(), json!(announced));
        }
    }
    if let Some(hallmark) = &config.my_hallmark {
        info.insert("hallmark".into(), json!(hallmark));
    }
    info.insert("application".into(), json!("Nhz"));
    info.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
    info.insert("platform".into(), json!(config.my_platform));
    info.insert("shareAddress".into(), json!(config.share_my_address));
    Value::Object(info)
}

/// Startup check of this node's own hallmark: must parse, verify, and be
/// bound to the host of `my_address`.
fn validate_own_hallmark(hallmark_hex: &str, my_address: Option<&str>) -> Result<(), String> {
    let hallmark = Hallmark::parse(hallmark_hex).map_err(|e| e.to_string())?;
    if !hallmark.is_valid() {
        return Err("hallmark signature or fields invalid".to_string());
    }
    let my_address = my_address.ok_or("myAddress must be set when a hallmark is configured")?;
    let (host, _) = split_host_port(my_address.trim());
    if !hallmark.verify_for_host(host) {
        return Err(format!(
            "hallmark host {:?} does not match address host {:?}",
            hallmark.host(),
            host
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Address normalization
// ---------------------------------------------------------------------------

/// Normalizes `host[:port]`, rejecting empty, loopback, link-local, and
/// unspecified addresses. The host keeps its given spelling; only its
/// routability is checked.
pub fn normalize_host_and_port(address: &str) -> Option<String> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (host, port) = split_host_port(trimmed);
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return None;
    }

    let ip = resolve_host(host)?;
    if ip.is_loopback() || ip.is_unspecified() || is_link_local(&ip) {
        return None;
    }

    Some(match port {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn resolve_host(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    (host, 0u16)
        .to_socket_addrs()
        .ok()?
        .next()
        .map(|addr| addr.ip())
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

// ---------------------------------------------------------------------------
// Send pool
// ---------------------------------------------------------------------------

type SendJob = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of sender threads feeding [`Peers::send_to_some_peers`].
/// Outbound sends block on socket I/O, so they run off the caller's
/// thread with bounded parallelism.
struct SendPool {
    sender: Mutex<Option<mpsc::Sender<SendJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SendPool {
    fn new(size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<SendJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("nhz-send-{}", i))
                .spawn(move || loop {
                    // Take the receiver lock only for the receive itself;
                    // jobs run unlocked so sends proceed in parallel.
                    let job = { receiver.lock().recv() };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
                .expect("spawn send pool thread");
            handles.push(handle);
        }
        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
        }
    }

    fn submit(&self, job: SendJob) {
        if let Some(sender) = &*self.sender.lock() {
            let _ = sender.send(job);
        }
    }

    /// Closes the queue and joins the workers. Queued jobs finish first.
    fn shutdown(&self) {
        self.sender.lock().take();
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
