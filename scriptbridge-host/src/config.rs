//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/scriptbridge/config.toml`. If the configuration file
//! doesn't exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4040/";

/// Main host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Daemon-specific configuration
    pub daemon: DaemonConfig,
    /// Bundle loading and update configuration
    pub loader: LoaderConfig,
    /// On-disk locations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Daemon server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Bind address for the JSON-RPC bridge channel
    /// Default: "127.0.0.1:4041"
    pub bind_address: String,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
}

/// How a remote descriptor is turned into a revision string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevisionScheme {
    /// `<version>#<hash>`
    #[default]
    VersionAndHash,
    /// `<hash>`
    HashOnly,
}

/// Bundle loading configuration, the `[loader]` table of the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct LoaderConfig {
    /// Origin serving `info.json` and the bundle files
    pub base_url: String,
    /// Block the load on a fresh download even when a cache exists
    pub force_update: bool,
    /// Never block the load when a cache exists; update in the background
    pub skip_update: bool,
    /// Bundle path relative to `base_url`; overrides the descriptor's paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<String>,
    /// Load nothing at all
    pub safe_mode: bool,
    /// Revision format compared against the local marker
    pub revision_scheme: RevisionScheme,
    /// Bytecode version of the embedded runtime, if it accepts precompiled
    /// bundles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytecode_version: Option<u32>,
    /// Whole-request timeout for update traffic
    pub request_timeout_secs: u64,
    /// Connection timeout for update traffic
    pub connect_timeout_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    /// Application-private data directory
    /// If None, uses XDG_DATA_HOME/scriptbridge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:4041".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            force_update: false,
            skip_update: false,
            bundle_path: None,
            safe_mode: false,
            revision_scheme: RevisionScheme::default(),
            bytecode_version: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 3,
        }
    }
}

impl LoaderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/scriptbridge/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "scriptbridge")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        format!(
            r#"# scriptbridge host configuration

[daemon]
# Bind address for the JSON-RPC bridge channel
# Default: "127.0.0.1:4041"
bind_address = "127.0.0.1:4041"

# Log level: trace, debug, info, warn, error
# Default: "info"
log_level = "info"

[loader]
# Origin serving info.json and the bundle
base_url = "{DEFAULT_BASE_URL}"

# Wait for a fresh download before loading, even when a cached bundle exists
force_update = false

# With a cached bundle, never wait on the network (takes precedence over
# force_update); the update still runs in the background
skip_update = false

# Fetch this path instead of picking one from info.json
# bundle_path = "bundle.js"

# Load nothing (no bundle, preload scripts or kv globals)
safe_mode = false

# Revision format: "version_and_hash" or "hash_only"
revision_scheme = "version_and_hash"

# Bytecode version of the script runtime; enables bundle.<version>.hbc
# bytecode_version = 96

request_timeout_secs = 30
connect_timeout_secs = 3

[storage]
# Application-private data directory
# If not specified, defaults to $XDG_DATA_HOME/scriptbridge
# data_dir = "/path/to/data"
"#
        )
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are valid and within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        self.daemon
            .bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid bind_address: {}", self.daemon.bind_address))?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.daemon.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.daemon.log_level,
                valid_log_levels.join(", ")
            );
        }

        let base_url = reqwest::Url::parse(&self.loader.base_url)
            .with_context(|| format!("Invalid loader.base_url: {}", self.loader.base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "loader.base_url must use http or https, got: {}",
                base_url.scheme()
            );
        }

        if self.loader.request_timeout_secs == 0 {
            anyhow::bail!("loader.request_timeout_secs must be greater than 0");
        }
        if self.loader.connect_timeout_secs == 0 {
            anyhow::bail!("loader.connect_timeout_secs must be greater than 0");
        }

        Ok(())
    }

    /// Get the application data directory
    ///
    /// Returns the configured directory or the default XDG data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.storage.data_dir {
            return Ok(path.clone());
        }

        let dirs = directories::ProjectDirs::from("", "", "scriptbridge")
            .context("Failed to determine project directories")?;

        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Fixed layout under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The cached bundle. Its revision marker sits beside it.
    pub fn bundle(&self) -> PathBuf {
        self.root.join("caches").join("bundle")
    }

    /// Copy of the bundle handed to the script runtime.
    pub fn staged_bundle(&self) -> PathBuf {
        self.root.join("caches").join("bundle.staged")
    }

    /// Files exposed verbatim in the boot payload.
    pub fn preload_dir(&self) -> PathBuf {
        self.root.join("preload")
    }

    /// Scripts evaluated before the bundle.
    pub fn preload_scripts_dir(&self) -> PathBuf {
        self.root.join("preload_scripts")
    }

    /// Key/value entries backing the `Kv` module.
    pub fn kv_dir(&self) -> PathBuf {
        self.root.join("kv")
    }
}
