//! # scriptbridge-core
//!
//! The call bridge between an embedded script runtime and host capability
//! modules.
//!
//! This crate provides:
//! - Request decoding (`{m, f, a}` JSON payloads)
//! - A closed argument codec for primitive wire values
//! - An immutable registry of capability modules and their versioned functions
//! - The dispatcher that routes a request to its handler and marshals the
//!   outcome into exactly one [`CallResponse`]
//!
//! ## Call Flow
//!
//! ```text
//! script ──► transport ──► CallDispatcher ──► codec ──► FunctionSpec handler
//!                                                              │
//! script ◄── Resolver ◄── CallResponse ◄── marshal ◄── Outcome ┘
//! ```
//!
//! Handlers return either a value available immediately or a [`Deferred`]
//! result that settles later and may be cancelled before it does.

pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod marshal;
pub mod module;
pub mod registry;
pub mod request;
pub mod response;

pub use codec::{ArgValue, Args, Param, ParamKind};
pub use dispatcher::{CallDispatcher, Interception, BRIDGE_SENTINEL};
pub use error::{BridgeError, BridgeResult, HostError};
pub use marshal::{CallHandle, Resolver};
pub use module::{Deferred, FunctionSpec, HostModule, Outcome};
pub use registry::{ModuleDescriptor, ModuleRegistry, ModuleSnapshot, RegistrySnapshot};
pub use request::CallRequest;
pub use response::CallResponse;
