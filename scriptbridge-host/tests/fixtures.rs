//! Test fixtures for integration tests.
//!
//! Helpers for building a host against a temporary data directory and a mock
//! update origin.

#![allow(dead_code)]

use anyhow::Result;
use scriptbridge_core::ModuleRegistry;
use scriptbridge_host::config::{DataPaths, LoaderConfig};
use scriptbridge_host::loader::{ScriptLoader, ScriptRuntime};
use scriptbridge_host::modules;
use scriptbridge_host::updater::{build_client, UpdateManager, UpdaterSettings};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Loader settings pointing at `server`.
pub fn loader_config(server: &MockServer) -> LoaderConfig {
    LoaderConfig {
        base_url: format!("{}/", server.uri()),
        request_timeout_secs: 5,
        connect_timeout_secs: 1,
        ..LoaderConfig::default()
    }
}

/// An updater writing into `temp`.
pub fn create_test_updater(config: &LoaderConfig, temp: &TempDir) -> UpdateManager {
    let paths = DataPaths::new(temp.path());
    UpdateManager::new(
        build_client(config).expect("client builds"),
        UpdaterSettings::from(config),
        paths.bundle(),
    )
}

/// Loader, updater and registry over the same data directory.
pub fn create_test_loader(config: LoaderConfig, temp: &TempDir) -> (ScriptLoader, UpdateManager) {
    let paths = DataPaths::new(temp.path());
    let updater = create_test_updater(&config, temp);

    let mut registry = ModuleRegistry::new();
    modules::register_builtin(&mut registry, &updater, &paths);

    let loader = ScriptLoader::new(config, paths, updater.clone(), Arc::new(registry));
    (loader, updater)
}

/// `info.json` body.
pub fn descriptor(paths: &[&str], hash: Option<&str>, version: &str) -> Value {
    json!({
        "paths": paths,
        "hash": hash,
        "version": version,
    })
}

/// Serve `info.json` with the given descriptor.
pub async fn mount_descriptor(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/info.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve a bundle at `bundle_path`.
pub async fn mount_bundle(server: &MockServer, bundle_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(bundle_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Put a bundle and revision marker into the cache directly.
pub fn seed_cache(temp: &TempDir, contents: &str, revision: &str) -> Result<()> {
    let bundle = DataPaths::new(temp.path()).bundle();
    std::fs::create_dir_all(bundle.parent().expect("bundle has a parent"))?;
    std::fs::write(&bundle, contents)?;
    std::fs::write(bundle.with_file_name("bundle.revision"), revision)?;
    Ok(())
}

/// Bundle bytes and marker contents currently on disk.
pub fn read_cache(temp: &TempDir) -> (Option<Vec<u8>>, Option<String>) {
    let bundle = DataPaths::new(temp.path()).bundle();
    (
        std::fs::read(&bundle).ok(),
        std::fs::read_to_string(bundle.with_file_name("bundle.revision")).ok(),
    )
}

/// Script runtime that records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    pub globals: Vec<(String, String)>,
    pub scripts: Vec<(String, String)>,
}

impl ScriptRuntime for RecordingRuntime {
    fn set_global(&mut self, key: &str, json: &str) -> Result<()> {
        self.globals.push((key.to_string(), json.to_string()));
        Ok(())
    }

    fn load_script(&mut self, path: &Path, source_url: &str) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        self.scripts.push((source_url.to_string(), contents));
        Ok(())
    }
}
