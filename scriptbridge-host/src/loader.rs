//! Script loading.
//!
//! The `ScriptLoader` decides whether the load waits on a bundle update,
//! collects everything the script runtime needs from the data directory and
//! returns a [`LoadPlan`]. The plan is applied to a [`ScriptRuntime`], which
//! the embedding application implements on top of its script engine.

use anyhow::{Context, Result};
use scriptbridge_core::{ModuleRegistry, RegistrySnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DataPaths, LoaderConfig, RevisionScheme, DEFAULT_BASE_URL};
use crate::modules::KvStore;
use crate::updater::UpdateManager;

/// Global holding the boot payload.
pub const LOADER_GLOBAL: &str = "__SCRIPTBRIDGE_LOADER__";

/// Prefix of the globals carrying kv entries.
pub const KV_GLOBAL_PREFIX: &str = "__sb_kv/";

/// Source URL the bundle is evaluated under.
pub const BUNDLE_SOURCE_URL: &str = "scriptbridge";

/// The script engine, as seen by the loader.
pub trait ScriptRuntime {
    /// Define a global from JSON text.
    fn set_global(&mut self, key: &str, json: &str) -> Result<()>;

    /// Evaluate the script at `path`, reporting it as `source_url`.
    fn load_script(&mut self, path: &Path, source_url: &str) -> Result<()>;
}

/// How a load relates to the bundle update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// No cached bundle: wait for the download, failure is fatal.
    Blocking,
    /// Wait for the download, fall back to the cached bundle on failure.
    BlockingWithFallback,
    /// Load the cached bundle now, update for the next load.
    Background,
    /// Safe mode: no update, nothing loaded.
    Skipped,
}

impl UpdatePolicy {
    pub fn decide(cache_exists: bool, config: &LoaderConfig) -> Self {
        if config.safe_mode {
            return UpdatePolicy::Skipped;
        }
        match (cache_exists, config.skip_update, config.force_update) {
            (false, _, _) => UpdatePolicy::Blocking,
            (true, true, _) => UpdatePolicy::Background,
            (true, false, true) => UpdatePolicy::BlockingWithFallback,
            (true, false, false) => UpdatePolicy::Background,
        }
    }
}

/// Delivered to scripts as [`LOADER_GLOBAL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootPayload {
    pub loader: LoaderInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderInfo {
    pub name: String,
    pub version: String,
    pub init_config: InitConfig,
    pub constants: Map<String, Value>,
    pub modules: RegistrySnapshot,
    /// File name → contents of every file in the preload directory
    pub preload: BTreeMap<String, String>,
}

/// The loader settings scripts can see. Host-only settings such as network
/// timeouts stay out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConfig {
    pub base_url: String,
    pub force_update: bool,
    pub skip_update: bool,
    pub bundle_path: Option<String>,
    pub safe_mode: bool,
    pub revision_scheme: RevisionScheme,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bytecode_version: Option<u32>,
}

impl From<&LoaderConfig> for InitConfig {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            force_update: config.force_update,
            skip_update: config.skip_update,
            bundle_path: config.bundle_path.clone(),
            safe_mode: config.safe_mode,
            revision_scheme: config.revision_scheme,
            bytecode_version: config.bytecode_version,
        }
    }
}

/// Everything to hand the script runtime, in order.
#[derive(Debug, Default)]
pub struct LoadPlan {
    pub preload_scripts: Vec<PathBuf>,
    pub kv: BTreeMap<String, String>,
    /// Staged copy of the bundle
    pub bundle: Option<PathBuf>,
    pub boot: Option<BootPayload>,
    /// Update running behind this load, if any
    pub background_fetch: Option<JoinHandle<()>>,
}

impl LoadPlan {
    pub fn is_empty(&self) -> bool {
        self.preload_scripts.is_empty() && self.kv.is_empty() && self.bundle.is_none()
    }

    /// Preload scripts, then kv globals, then the boot payload and bundle.
    pub fn apply(&self, runtime: &mut dyn ScriptRuntime) -> Result<()> {
        for script in &self.preload_scripts {
            let name = script
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            runtime
                .load_script(script, &format!("preload:{name}"))
                .with_context(|| format!("Failed to load preload script: {}", script.display()))?;
        }

        for (key, value) in &self.kv {
            let json = serde_json::to_string(value)?;
            runtime.set_global(&format!("{KV_GLOBAL_PREFIX}{key}"), &json)?;
        }

        if let Some(bundle) = &self.bundle {
            if let Some(boot) = &self.boot {
                let json = serde_json::to_string(boot).context("Failed to serialize boot payload")?;
                runtime.set_global(LOADER_GLOBAL, &json)?;
            }
            runtime
                .load_script(bundle, BUNDLE_SOURCE_URL)
                .context("Failed to load bundle")?;
        }

        Ok(())
    }
}

/// Prepares script loads from the data directory and the updater.
pub struct ScriptLoader {
    config: LoaderConfig,
    paths: DataPaths,
    updater: UpdateManager,
    registry: Arc<ModuleRegistry>,
    kv: KvStore,
}

impl ScriptLoader {
    pub fn new(
        config: LoaderConfig,
        paths: DataPaths,
        updater: UpdateManager,
        registry: Arc<ModuleRegistry>,
    ) -> Self {
        let kv = KvStore::new(paths.kv_dir());
        Self {
            config,
            paths,
            updater,
            registry,
            kv,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Bring the bundle up to date as far as the policy requires and build
    /// the load plan.
    pub async fn prepare(&self) -> Result<LoadPlan> {
        let policy = UpdatePolicy::decide(self.updater.has_bundle().await, &self.config);
        debug!(?policy, "Preparing script load");

        let mut plan = LoadPlan::default();
        match policy {
            UpdatePolicy::Skipped => {
                info!("Safe mode enabled, not loading any scripts");
                return Ok(plan);
            }
            UpdatePolicy::Blocking => {
                self.updater
                    .fetch_bundle(None)
                    .await
                    .context("Failed to fetch bundle, script may not load")?;
            }
            UpdatePolicy::BlockingWithFallback => {
                if let Err(e) = self.updater.fetch_bundle(None).await {
                    warn!("Failed to fetch bundle, using cached version: {}", e);
                }
            }
            UpdatePolicy::Background => {
                plan.background_fetch = Some(self.spawn_fetch());
            }
        }

        plan.preload_scripts = list_files(&self.paths.preload_scripts_dir())
            .await
            .context("Failed to list preload scripts")?
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "js"))
            .collect();

        plan.kv = self.kv.entries().await.context("Failed to read kv entries")?;

        let staged = self
            .updater
            .stage_bundle(&self.paths.staged_bundle())
            .await
            .context("Failed to stage bundle")?;
        if let Some(staged) = staged {
            debug!(revision = ?staged.revision, "Staged bundle");
            plan.bundle = Some(staged.path);
            plan.boot = Some(self.boot_payload().await?);
        } else {
            warn!("No bundle available, script may not load");
        }

        info!(
            preload_scripts = plan.preload_scripts.len(),
            kv_entries = plan.kv.len(),
            bundle = plan.bundle.is_some(),
            "Script load prepared"
        );
        Ok(plan)
    }

    /// Start an update that never blocks the current load.
    fn spawn_fetch(&self) -> JoinHandle<()> {
        let updater = self.updater.clone();
        tokio::spawn(async move {
            match updater.fetch_bundle(None).await {
                Ok(true) => info!("Bundle updated in the background, applies on next load"),
                Ok(false) => debug!("Background check found no update"),
                Err(e) => warn!("Failed to fetch bundle, using cached version: {}", e),
            }
        })
    }

    /// The payload handed to scripts at boot.
    pub async fn boot_payload(&self) -> Result<BootPayload> {
        let mut preload = BTreeMap::new();
        for path in list_files(&self.paths.preload_dir())
            .await
            .context("Failed to list preload directory")?
        {
            let contents = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read preload file: {}", path.display()))?;
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                preload.insert(name.to_string(), contents);
            }
        }

        let mut constants = Map::new();
        constants.insert(
            "DATA_DIR".to_string(),
            Value::String(self.paths.root().display().to_string()),
        );
        constants.insert(
            "DEFAULT_BASE_URL".to_string(),
            Value::String(DEFAULT_BASE_URL.to_string()),
        );

        Ok(BootPayload {
            loader: LoaderInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                init_config: InitConfig::from(&self.config),
                constants,
                modules: self.registry.snapshot(),
                preload,
            },
        })
    }
}

/// Regular files directly under `dir`, sorted. A missing directory is empty.
async fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
