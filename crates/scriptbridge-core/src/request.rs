//! Bridge call requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};

/// A single call from the script side, decoded from `{m, f, a}`.
///
/// The long field names (`module`, `function`, `args`) are accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    #[serde(rename = "m", alias = "module")]
    pub module: String,
    #[serde(rename = "f", alias = "function")]
    pub function: String,
    #[serde(rename = "a", alias = "args")]
    pub args: Vec<Value>,
}

impl CallRequest {
    pub fn new(module: impl Into<String>, function: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            args,
        }
    }

    /// Parse a request payload.
    pub fn parse(payload: &str) -> BridgeResult<Self> {
        serde_json::from_str(payload).map_err(|e| BridgeError::Decode(e.to_string()))
    }

    /// Encode the request in its wire form.
    pub fn to_payload(&self) -> String {
        // A struct of strings and JSON values always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}
