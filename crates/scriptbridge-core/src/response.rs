//! Bridge call responses.
//!
//! On the wire a response is one of three maps:
//!
//! ```text
//! {"ret": "<JSON text of the value>"}
//! {"err": "<description>"}
//! {"cancelled": true, "reason": "<reason>"}
//! ```

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{BridgeError, HostError};

/// The single response produced for every bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResponse {
    /// JSON text of the returned value.
    Ok(String),
    /// Description of a decode, lookup or execution failure.
    Error(String),
    /// The eventually-resolved result was cancelled before completion.
    Cancelled(String),
}

impl CallResponse {
    /// Serialize a returned value. Serialization failures degrade to
    /// [`CallResponse::Error`].
    pub fn ok<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(text) => CallResponse::Ok(text),
            Err(e) => CallResponse::Error(format!("failed to serialize result: {e}")),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CallResponse::Ok(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CallResponse::Error(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallResponse::Cancelled(_))
    }

    /// Decode the value carried by an `Ok` response.
    pub fn value(&self) -> Option<Value> {
        match self {
            CallResponse::Ok(text) => serde_json::from_str(text).ok(),
            _ => None,
        }
    }
}

impl From<BridgeError> for CallResponse {
    fn from(err: BridgeError) -> Self {
        CallResponse::Error(err.to_string())
    }
}

impl From<HostError> for CallResponse {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Failed(description) => CallResponse::Error(description),
            HostError::Cancelled(reason) => CallResponse::Cancelled(reason),
        }
    }
}

impl Serialize for CallResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CallResponse::Ok(text) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ret", text)?;
                map.end()
            }
            CallResponse::Error(description) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("err", description)?;
                map.end()
            }
            CallResponse::Cancelled(reason) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("cancelled", &true)?;
                map.serialize_entry("reason", reason)?;
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    ret: Option<String>,
    err: Option<String>,
    #[serde(default)]
    cancelled: bool,
    reason: Option<String>,
}

impl<'de> Deserialize<'de> for CallResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireResponse::deserialize(deserializer)?;
        match wire {
            WireResponse { cancelled: true, reason, .. } => {
                Ok(CallResponse::Cancelled(reason.unwrap_or_default()))
            }
            WireResponse { err: Some(err), .. } => Ok(CallResponse::Error(err)),
            WireResponse { ret: Some(ret), .. } => Ok(CallResponse::Ok(ret)),
            _ => Err(D::Error::custom("response has none of ret, err or cancelled")),
        }
    }
}
