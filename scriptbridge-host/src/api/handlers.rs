//! JSON-RPC API handlers for scriptbridge-host.
//!
//! The dedicated request/response channel between a script runtime and the
//! host. `bridge.call` takes the same payload the transport interceptor
//! recognizes and answers with the same response shapes.

use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use scriptbridge_core::{CallDispatcher, CallResponse};
use std::sync::Arc;
use tracing::error;

use crate::loader::{BootPayload, ScriptLoader};
use crate::updater::{UpdateManager, UpdateState};

/// The bridge's JSON-RPC interface.
#[rpc(server)]
pub trait BridgeApi {
    /// Dispatch one `{m, f, a}` payload and wait for its response.
    #[method(name = "bridge.call")]
    async fn call(&self, payload: String) -> RpcResult<CallResponse>;

    /// The boot payload for a script load.
    #[method(name = "bridge.boot")]
    async fn boot(&self) -> RpcResult<BootPayload>;

    /// Updater state snapshot.
    #[method(name = "updater.status")]
    async fn updater_status(&self) -> RpcResult<UpdateState>;
}

/// Implementation of the bridge API.
pub struct ApiImpl {
    dispatcher: Arc<CallDispatcher>,
    loader: Arc<ScriptLoader>,
    updater: UpdateManager,
}

impl ApiImpl {
    pub fn new(
        dispatcher: Arc<CallDispatcher>,
        loader: Arc<ScriptLoader>,
        updater: UpdateManager,
    ) -> Self {
        Self {
            dispatcher,
            loader,
            updater,
        }
    }
}

#[jsonrpsee::core::async_trait]
impl BridgeApiServer for ApiImpl {
    async fn call(&self, payload: String) -> RpcResult<CallResponse> {
        // Dispatch failures are part of the response, never RPC errors.
        Ok(self.dispatcher.call(&payload).await)
    }

    async fn boot(&self) -> RpcResult<BootPayload> {
        self.loader.boot_payload().await.map_err(|e| {
            error!("Failed to build boot payload: {:#}", e);
            ErrorObjectOwned::owned(
                -32000,
                format!("Failed to build boot payload: {e:#}"),
                None::<()>,
            )
        })
    }

    async fn updater_status(&self) -> RpcResult<UpdateState> {
        Ok(self.updater.state().await)
    }
}
