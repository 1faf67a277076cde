//! # Peer Networking Server
//!
//! The inbound half of the peer protocol: a single POST endpoint at
//! `/nhz` accepting JSON requests and dispatching them to the node core.
//! The core is synchronous and may itself perform blocking network I/O
//! (admission can fan a batch out to peers), so every request is handed
//! to the blocking thread pool rather than run on the async runtime.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::debug;

use nhz_protocol::network::NhzNode;

/// Builds the peer endpoint router.
pub fn create_router(node: Arc<NhzNode>) -> Router {
    Router::new()
        .route("/nhz", post(handle_peer_post))
        .with_state(node)
}

async fn handle_peer_post(
    State(node): State<Arc<NhzNode>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(request): Json<Value>,
) -> Json<Value> {
    let remote_address = remote.ip().to_string();
    let response = tokio::task::spawn_blocking(move || {
        node.handle_peer_request(&remote_address, &request)
    })
    .await
    .unwrap_or_else(|e| {
        debug!(error = %e, "peer request handler panicked or was cancelled");
        json!({ "error": "internal error" })
    });
    Json(response)
}
