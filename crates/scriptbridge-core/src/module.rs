//! Capability modules and their registration tables.
//!
//! A module is a named unit exposing versioned functions and constant data.
//! Each module supplies an ordered list of [`FunctionSpec`]s built when the
//! module is constructed; every spec owns a typed handler closure along with
//! the parameter list the codec decodes against.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::codec::{Args, Param};
use crate::error::HostError;
use crate::response::CallResponse;

/// A host-side module callable from scripts.
pub trait HostModule: Send + Sync {
    /// Unique module name used in the `m` field of requests.
    fn name(&self) -> &'static str;

    /// The module's functions, in declaration order.
    fn functions(&self) -> Vec<FunctionSpec>;

    /// Constant data exposed to scripts in the boot payload.
    fn constants(&self) -> Map<String, Value> {
        Map::new()
    }
}

type Handler = Arc<dyn Fn(Args) -> Result<Outcome, HostError> + Send + Sync>;

/// A registered function: name, version, declared parameters and handler.
#[derive(Clone)]
pub struct FunctionSpec {
    name: &'static str,
    version: u32,
    params: Vec<Param>,
    handler: Handler,
}

impl FunctionSpec {
    pub fn new<F>(name: &'static str, version: u32, params: impl Into<Vec<Param>>, handler: F) -> Self
    where
        F: Fn(Args) -> Result<Outcome, HostError> + Send + Sync + 'static,
    {
        Self {
            name,
            version,
            params: params.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Version number scripts use for feature negotiation.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Run the handler with already-decoded arguments.
    pub fn invoke(&self, args: Args) -> Result<Outcome, HostError> {
        (self.handler)(args)
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// What a handler returns.
#[derive(Debug)]
pub enum Outcome {
    /// The value is available now.
    Ready(Value),
    /// The value will be available later.
    Pending(Deferred),
}

impl Outcome {
    /// An immediate result. Fails when the value cannot be represented as
    /// JSON.
    pub fn ready<T: Serialize>(value: T) -> Result<Self, HostError> {
        serde_json::to_value(value)
            .map(Outcome::Ready)
            .map_err(|e| HostError::Failed(format!("failed to serialize result: {e}")))
    }

    /// An immediate `null` result.
    pub fn unit() -> Result<Self, HostError> {
        Ok(Outcome::Ready(Value::Null))
    }

    /// An eventually-resolved result computed by `future` on the runtime.
    pub fn pending<F, T>(future: F) -> Result<Self, HostError>
    where
        F: Future<Output = Result<T, HostError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        Ok(Outcome::Pending(Deferred::spawn(future)))
    }
}

/// An eventually-resolved result running as its own task.
///
/// Must be created inside a tokio runtime context; the dispatcher enters its
/// runtime before invoking handlers.
#[derive(Debug)]
pub struct Deferred {
    task: JoinHandle<Result<Value, HostError>>,
}

impl Deferred {
    pub fn spawn<F, T>(future: F) -> Self
    where
        F: Future<Output = Result<T, HostError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let value = future.await?;
            serde_json::to_value(value)
                .map_err(|e| HostError::Failed(format!("failed to serialize result: {e}")))
        });
        Self { task }
    }

    /// Handle that cancels the underlying task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the result and turn it into a response.
    pub async fn settle(self) -> CallResponse {
        settle_join(self.task.await)
    }

    pub(crate) fn into_task(self) -> JoinHandle<Result<Value, HostError>> {
        self.task
    }
}

pub(crate) fn settle_join(joined: Result<Result<Value, HostError>, JoinError>) -> CallResponse {
    match joined {
        Ok(Ok(value)) => CallResponse::ok(&value),
        Ok(Err(err)) => err.into(),
        Err(e) if e.is_cancelled() => {
            CallResponse::Cancelled("call was aborted before completion".to_string())
        }
        Err(e) => CallResponse::Error(format!(
            "host function panicked: {}",
            panic_message(e.into_panic().as_ref())
        )),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
