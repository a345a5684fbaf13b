//! JSON-RPC API module for scriptbridge-host.
//!
//! Exposes the bridge to script runtimes over a dedicated request/response
//! channel instead of a repurposed transport.

pub mod handlers;
pub mod server;

pub use handlers::{ApiImpl, BridgeApiServer};
pub use server::start_server;
