//! The call dispatcher.
//!
//! A dispatch runs five steps: parse the payload, resolve the target in the
//! registry, check arity, decode each argument, invoke the handler. Any
//! failure before invocation short-circuits into an error response without
//! touching the handler. Faults raised by the handler itself, including
//! panics, are caught here and never escape to the thread driving the
//! transport.

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::codec::decode_args;
use crate::error::HostError;
use crate::marshal::{deliver, CallHandle, Resolver};
use crate::module::{panic_message, Outcome};
use crate::registry::ModuleRegistry;
use crate::request::CallRequest;
use crate::response::CallResponse;

/// First element of a transport array that marks it as a bridge call.
pub const BRIDGE_SENTINEL: &str = "__scriptbridge";

/// Result of offering a transport call to the dispatcher.
#[derive(Debug)]
pub enum Interception {
    /// The call was a bridge call and has been dispatched. The transport must
    /// suppress whatever the original call would have returned.
    Handled(CallHandle),
    /// Not a bridge call; the resolver is handed back untouched.
    PassThrough(Resolver),
}

/// Routes bridge calls to registered host functions.
pub struct CallDispatcher {
    registry: Arc<ModuleRegistry>,
    runtime: Handle,
}

impl CallDispatcher {
    /// Create a dispatcher. Eventually-resolved results are awaited on
    /// `runtime`, never on the dispatching thread.
    pub fn new(registry: Arc<ModuleRegistry>, runtime: Handle) -> Self {
        Self { registry, runtime }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Offer a call from a shared transport channel.
    ///
    /// Only arrays whose first element is [`BRIDGE_SENTINEL`] and that carry
    /// a second element are treated as bridge calls.
    pub fn intercept(&self, values: &[Value], resolver: Resolver) -> Interception {
        match values {
            [Value::String(sentinel), payload, ..] if sentinel == BRIDGE_SENTINEL => {
                let handle = match payload {
                    Value::String(payload) => self.dispatch(payload, resolver),
                    other => {
                        resolver.resolve(CallResponse::Error(format!(
                            "decode failure: bridge payload must be a string, got {other}"
                        )));
                        CallHandle::settled()
                    }
                };
                Interception::Handled(handle)
            }
            _ => Interception::PassThrough(resolver),
        }
    }

    /// Dispatch one request payload; the response goes to `resolver` exactly
    /// once.
    pub fn dispatch(&self, payload: &str, resolver: Resolver) -> CallHandle {
        match self.invoke(payload) {
            Ok(outcome) => deliver(outcome, resolver, &self.runtime),
            Err(response) => {
                resolver.resolve(response);
                CallHandle::settled()
            }
        }
    }

    /// Dispatch and wait for the response.
    pub async fn call(&self, payload: &str) -> CallResponse {
        let (resolver, rx) = Resolver::channel();
        let _handle = self.dispatch(payload, resolver);
        rx.await.unwrap_or_else(|_| {
            CallResponse::Cancelled("call was dropped before it resolved".to_string())
        })
    }

    fn invoke(&self, payload: &str) -> Result<Outcome, CallResponse> {
        let request = CallRequest::parse(payload)?;
        debug!(module = %request.module, function = %request.function, "Bridge call");

        let function = self
            .registry
            .function(&request.module, &request.function)
            .inspect_err(|e| warn!("Rejecting bridge call: {}", e))?;
        let args = decode_args(function.params(), &request.args)
            .inspect_err(|e| warn!("Rejecting bridge call: {}", e))?;

        let _runtime = self.runtime.enter();
        match catch_unwind(AssertUnwindSafe(|| function.invoke(args))) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => {
                if let HostError::Failed(ref description) = err {
                    warn!(
                        module = %request.module,
                        function = %request.function,
                        "Host function failed: {}",
                        description
                    );
                }
                Err(err.into())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(
                    module = %request.module,
                    function = %request.function,
                    "Host function panicked: {}",
                    message
                );
                Err(CallResponse::Error(format!("host function panicked: {message}")))
            }
        }
    }
}
