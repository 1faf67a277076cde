//! # CLI Interface
//!
//! Argument structure for `nhz-node` using `clap` derive. Three
//! subcommands: `run`, `hallmark`, and `version`. Every run-time knob
//! has an environment-variable fallback for container deployments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nhz_protocol::config::DEFAULT_PEER_PORT;

/// Nhz full node.
///
/// Maintains the replicated chain, gossips blocks and transactions with
/// peers, and serves the peer networking endpoint.
#[derive(Parser, Debug)]
#[command(name = "nhz-node", about = "Nhz full node", version, propagate_version = true)]
pub struct NhzNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Generate a hallmark binding a host to an account key.
    Hallmark(HallmarkArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Data directory for the peer database.
    #[arg(long, short = 'd', env = "NHZ_DATA_DIR", default_value = ".nhz")]
    pub data_dir: PathBuf,

    /// Address to advertise to other peers, host[:port].
    #[arg(long, env = "NHZ_MY_ADDRESS")]
    pub my_address: Option<String>,

    /// Platform string advertised in getInfo.
    #[arg(long, env = "NHZ_PLATFORM", default_value = "PC")]
    pub platform: String,

    /// This node's hallmark, hex-encoded. Validated at startup.
    #[arg(long, env = "NHZ_HALLMARK")]
    pub hallmark: Option<String>,

    /// Inbound peer port.
    #[arg(long, env = "NHZ_PEER_PORT", default_value_t = DEFAULT_PEER_PORT)]
    pub peer_port: u16,

    /// Run against the testnet: testnet port and peer list.
    #[arg(long, env = "NHZ_TESTNET")]
    pub testnet: bool,

    /// Do not advertise this node's address or serve the peer endpoint.
    #[arg(long)]
    pub no_share_address: bool,

    /// Well-known peer to contact at startup. Repeatable.
    #[arg(long = "peer", env = "NHZ_PEERS", value_delimiter = ';')]
    pub peers: Vec<String>,

    /// Known bad peer, blacklisted unconditionally. Repeatable.
    #[arg(long = "blacklist", value_delimiter = ';')]
    pub blacklisted_peers: Vec<String>,

    /// Target number of connected public peers.
    #[arg(long, env = "NHZ_MAX_PEERS", default_value_t = 20)]
    pub max_connected_public_peers: usize,

    /// Outbound connect timeout, milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub connect_timeout_ms: u64,

    /// Outbound read timeout, milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub read_timeout_ms: u64,

    /// How long a misbehaving peer stays blacklisted, milliseconds.
    #[arg(long, default_value_t = 300_000)]
    pub blacklisting_period_ms: u64,

    /// Disable the hallmark push/pull weight gates.
    #[arg(long)]
    pub disable_hallmark_protection: bool,

    /// Minimum peer weight to broadcast to.
    #[arg(long, default_value_t = 0)]
    pub push_threshold: i64,

    /// Minimum peer weight to pull state from.
    #[arg(long, default_value_t = 0)]
    pub pull_threshold: i64,

    /// Broadcast fan-out success target.
    #[arg(long, default_value_t = 10)]
    pub send_to_peers_limit: usize,

    /// Persist the peer set across restarts.
    #[arg(long, env = "NHZ_SAVE_PEERS")]
    pub save_peers: bool,

    /// Communication logging bitmask: 1 exceptions, 2 non-200, 4 all.
    #[arg(long, default_value_t = 0)]
    pub communication_logging_mask: u32,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, env = "NHZ_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: pretty or json.
    #[arg(long, env = "NHZ_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `hallmark` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct HallmarkArgs {
    /// Hex-encoded 32-byte secret key of the account to bind.
    #[arg(long, env = "NHZ_SECRET_KEY")]
    pub secret_key: String,

    /// Host the hallmark is bound to.
    #[arg(long)]
    pub host: String,

    /// Weight factor, in whole NHZ.
    #[arg(long, default_value_t = 100)]
    pub weight: i32,

    /// Issue date as yyyymmdd.
    #[arg(long)]
    pub date: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_structure_is_valid() {
        NhzNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = NhzNodeCli::parse_from(["nhz-node", "run"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.peer_port, DEFAULT_PEER_PORT);
                assert!(!args.testnet);
                assert!(!args.no_share_address);
                assert_eq!(args.send_to_peers_limit, 10);
                assert_eq!(args.log_level, "info");
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn repeated_peers_accumulate() {
        let cli = NhzNodeCli::parse_from([
            "nhz-node",
            "run",
            "--peer",
            "192.0.2.1:7774",
            "--peer",
            "192.0.2.2",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.peers, vec!["192.0.2.1:7774", "192.0.2.2"]);
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn hallmark_subcommand_parses() {
        let cli = NhzNodeCli::parse_from([
            "nhz-node",
            "hallmark",
            "--secret-key",
            "00ff",
            "--host",
            "hub.example",
            "--date",
            "20140322",
        ]);
        match cli.command {
            Commands::Hallmark(args) => {
                assert_eq!(args.host, "hub.example");
                assert_eq!(args.weight, 100);
                assert_eq!(args.date, 20140322);
            }
            _ => panic!("expected hallmark subcommand"),
        }
    }
}
