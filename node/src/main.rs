// Copyright (c) 2026 Nhz Developers. MIT License.
// See LICENSE for details.

//! # Nhz Node
//!
//! Entry point for the `nhz-node` binary. Parses CLI arguments,
//! initializes logging, assembles the node core, binds the peer
//! networking endpoint, and runs until a shutdown signal.
//!
//! Subcommands:
//!
//! - `run`      — start the node
//! - `hallmark` — generate a hallmark for an account key
//! - `version`  — print build version information

mod cli;
mod logging;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use nhz_protocol::config::{peer_port, TESTNET_PEER_PORT};
use nhz_protocol::crypto::{account_id_from_public_key, unsigned_string, NhzKeypair};
use nhz_protocol::network::hallmark::Hallmark;
use nhz_protocol::network::{NhzNode, PeersConfig};

use cli::{Commands, NhzNodeCli};
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NhzNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Hallmark(args) => generate_hallmark(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node: core workers plus the peer networking server.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    let serve_peers = !args.no_share_address;
    let listen_port = if args.testnet {
        TESTNET_PEER_PORT
    } else {
        args.peer_port
    };

    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory {}", args.data_dir.display())
    })?;

    let config = PeersConfig {
        my_address: args.my_address.clone(),
        my_platform: args.platform.clone(),
        my_hallmark: args.hallmark.clone(),
        share_my_address: serve_peers,
        peer_server_port: listen_port,
        is_testnet: args.testnet,
        well_known_peers: args.peers.clone(),
        known_blacklisted_peers: args.blacklisted_peers.iter().cloned().collect(),
        max_connected_public_peers: args.max_connected_public_peers,
        connect_timeout_ms: args.connect_timeout_ms,
        read_timeout_ms: args.read_timeout_ms,
        blacklisting_period_ms: args.blacklisting_period_ms,
        enable_hallmark_protection: !args.disable_hallmark_protection,
        push_threshold: args.push_threshold,
        pull_threshold: args.pull_threshold,
        send_to_peers_limit: args.send_to_peers_limit,
        peer_db_path: Some(args.data_dir.join("peers")),
        save_peers: args.save_peers,
        communication_logging_mask: args.communication_logging_mask,
    };

    // The core uses a blocking HTTP client; assemble it off the async
    // runtime.
    let node = tokio::task::spawn_blocking(move || NhzNode::new(config))
        .await
        .context("node assembly task failed")?
        .context("node configuration rejected")?;
    let node = Arc::new(node);

    tracing::info!(
        testnet = args.testnet,
        peers = node.peers().peer_count(),
        "nhz-node assembled"
    );

    if serve_peers {
        let addr = format!("0.0.0.0:{}", listen_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind peer listener on {}", addr))?;
        tracing::info!("peer networking server listening on {}", addr);

        // Workers start only after the listener is bound, so the first
        // connected peer can immediately query us back.
        node.start()
            .map_err(|e| anyhow::anyhow!("failed to start node core: {}", e))?;

        let router = server::create_router(Arc::clone(&node));
        let serve = async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .await
        };
        tokio::select! {
            result = serve => {
                if let Err(e) = result {
                    tracing::error!("peer server error: {}", e);
                }
            }
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received");
            }
        }
    } else {
        tracing::info!("address sharing disabled, not starting peer networking server");
        node.start()
            .map_err(|e| anyhow::anyhow!("failed to start node core: {}", e))?;
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
    }

    // Shutdown joins worker threads; keep that off the async runtime too.
    let core = Arc::clone(&node);
    let _ = tokio::task::spawn_blocking(move || core.shutdown()).await;
    tracing::info!("nhz-node stopped");
    Ok(())
}

/// Generates and prints a hallmark for the given account key.
fn generate_hallmark(args: cli::HallmarkArgs) -> Result<()> {
    let keypair =
        NhzKeypair::from_hex(&args.secret_key).context("invalid secret key")?;
    let hallmark = Hallmark::generate(&keypair, &args.host, args.weight, args.date);

    let account = account_id_from_public_key(&keypair.public_key());
    println!("hallmark : {}", hallmark);
    println!("host     : {}", args.host);
    println!("weight   : {}", args.weight);
    println!("account  : {}", unsigned_string(account));
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("nhz-node {}", env!("CARGO_PKG_VERSION"));
    println!(
        "peer ports: mainnet {}, testnet {}",
        peer_port(false),
        peer_port(true)
    );
}

/// Waits for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
