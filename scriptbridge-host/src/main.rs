//! # scriptbridge-host
//!
//! The scriptbridge host daemon.
//!
//! This daemon is responsible for:
//! - Registering the host capability modules scripts can call
//! - Keeping the script bundle up to date from the remote origin
//! - Preparing script loads (preload scripts, kv globals, boot payload)
//! - Serving bridge calls over a JSON-RPC request/response channel
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    scriptbridge-host                     │
//! │                                                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐    │
//! │  │    Module    │  │     Call     │  │    Update    │    │
//! │  │   Registry   │─▶│  Dispatcher  │  │   Manager    │    │
//! │  └──────────────┘  └──────────────┘  └──────────────┘    │
//! │                           │                 │            │
//! │  ┌────────────────────────┴─────────────────┴─────────┐  │
//! │  │            JSON-RPC channel / ScriptLoader          │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//!                     ┌───────────────┐
//!                     │ script runtime│
//!                     └───────────────┘
//! ```
//!
//! ## Configuration
//!
//! The daemon reads configuration from `$XDG_CONFIG_HOME/scriptbridge/config.toml`.
//!
//! ## Running
//!
//! ```bash
//! cargo run --bin scriptbridge-host
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin scriptbridge-host
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scriptbridge_core::{CallDispatcher, ModuleRegistry};
use scriptbridge_host::api::{self, ApiImpl};
use scriptbridge_host::config::{Config, DataPaths};
use scriptbridge_host::loader::ScriptLoader;
use scriptbridge_host::modules;
use scriptbridge_host::updater::{build_client, UpdateManager, UpdaterSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration comes first so the log level can be taken from it.
    let (config, config_error) = match Config::load_default() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting scriptbridge-host v{}", env!("CARGO_PKG_VERSION"));
    match config_error {
        None => info!("Loaded configuration from default path"),
        Some(e) => warn!("Failed to load config, using defaults: {:#}", e),
    }

    let data_dir = config.data_dir()?;
    info!("Data directory: {}", data_dir.display());
    let paths = DataPaths::new(data_dir);

    let client = build_client(&config.loader).context("Failed to build HTTP client")?;
    let updater = UpdateManager::new(
        client,
        UpdaterSettings::from(&config.loader),
        paths.bundle(),
    );

    // Registry is fixed from here on.
    let mut registry = ModuleRegistry::new();
    modules::register_builtin(&mut registry, &updater, &paths);
    let registry = Arc::new(registry);

    let mut module_names = registry.list();
    module_names.sort();
    info!(
        "Registered {} module(s): {:?}",
        module_names.len(),
        module_names
    );

    let dispatcher = Arc::new(CallDispatcher::new(Arc::clone(&registry), Handle::current()));
    let loader = Arc::new(ScriptLoader::new(
        config.loader.clone(),
        paths,
        updater.clone(),
        Arc::clone(&registry),
    ));

    // Warm the cache so the first script load doesn't wait on the network.
    match loader.prepare().await {
        Ok(plan) => info!(
            "Initial load prepared: bundle={}, preload_scripts={}",
            plan.bundle.is_some(),
            plan.preload_scripts.len()
        ),
        Err(e) => warn!("Initial load preparation failed: {:#}", e),
    }

    let api = ApiImpl::new(dispatcher, loader, updater);
    let (server_handle, addr) = api::start_server(&config.daemon.bind_address, api).await?;

    info!("Host startup complete");
    info!("Listening on: {}", addr);
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    server_handle.stop()?;
    server_handle.stopped().await;

    info!("Host stopped");
    Ok(())
}
