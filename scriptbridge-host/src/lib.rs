//! scriptbridge host library
//!
//! Configuration, the bundle updater, built-in capability modules, the script
//! loader and the JSON-RPC channel. The binary wires these together; they are
//! exported here so integration tests and embedding applications can use them
//! directly.

pub mod api;
pub mod config;
pub mod loader;
pub mod modules;
pub mod updater;
