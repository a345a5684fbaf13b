//! JSON-RPC server for scriptbridge-host.

use anyhow::{Context, Result};
use jsonrpsee::server::{Server, ServerHandle};
use std::net::SocketAddr;
use tracing::info;

use super::handlers::{ApiImpl, BridgeApiServer};

/// Start the JSON-RPC server on `bind_address`.
///
/// # Returns
///
/// A tuple of (ServerHandle, SocketAddr) - the handle keeps the server running,
/// and the address shows where it's listening (useful with port 0)
pub async fn start_server(bind_address: &str, api: ApiImpl) -> Result<(ServerHandle, SocketAddr)> {
    info!("Starting JSON-RPC server on {}", bind_address);

    let server = Server::builder()
        .build(bind_address)
        .await
        .with_context(|| format!("Failed to bind JSON-RPC server to {bind_address}"))?;

    let addr = server
        .local_addr()
        .context("Failed to get server address")?;
    info!("JSON-RPC server listening on {}", addr);

    let handle = server.start(api.into_rpc());
    Ok((handle, addr))
}
