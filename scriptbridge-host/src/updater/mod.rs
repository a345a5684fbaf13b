//! Bundle updates.
//!
//! The `UpdateManager` checks the remote origin for a newer bundle and
//! downloads it into the local [`BundleCache`]. It is the only writer of the
//! cache. Downloads are single-flight per cache target, across every manager
//! on that path: a second trigger while a fetch is running waits for that
//! fetch and observes its result.
//!
//! # State machine
//!
//! ```text
//!            check: update available
//!   Fresh ─────────────────────────────▶ Stale
//!     ▲                                    │ fetch
//!     │ download committed                 ▼
//!     └─────────────────────────────── Fetching
//!                                          │ failure
//!                                          ▼
//!                                        Error ── next check/fetch ──▶ ...
//! ```

mod cache;
mod endpoint;
mod target;

pub use cache::{BundleCache, PendingBundle, StagedBundle};
pub use endpoint::{join_url, EndpointInfo, UpdateInfo, FALLBACK_BUNDLE_PATH};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{LoaderConfig, RevisionScheme};
use target::CacheTarget;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while checking for or downloading a bundle.
///
/// Cloneable so every waiter on a shared fetch sees the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("invalid update descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("cache I/O error: {0}")]
    Io(String),

    #[error("fetch aborted: {0}")]
    Aborted(String),
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        UpdateError::Network(message)
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(err: std::io::Error) -> Self {
        UpdateError::Io(err.to_string())
    }
}

// ============================================================================
// State Types
// ============================================================================

/// Where the cache stands relative to the remote origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    /// The cached bundle matches the remote revision
    Fresh,
    /// A newer bundle is available, or the cache was never checked
    Stale,
    /// A download is running
    Fetching,
    /// The last check or download failed
    Error(String),
}

/// Snapshot of the updater's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateState {
    pub status: UpdateStatus,
    /// Revision of the cached bundle
    pub revision: Option<String>,
    /// Last completed check
    pub last_checked: Option<DateTime<Utc>>,
    /// Last committed download
    pub last_fetched: Option<DateTime<Utc>>,
    /// Number of consecutive failures
    pub error_count: u32,
}

impl Default for UpdateState {
    fn default() -> Self {
        Self {
            status: UpdateStatus::Stale,
            revision: None,
            last_checked: None,
            last_fetched: None,
            error_count: 0,
        }
    }
}

// ============================================================================
// UpdateManager
// ============================================================================

/// Remote origin settings used by the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterSettings {
    pub base_url: String,
    pub bundle_path: Option<String>,
    pub revision_scheme: RevisionScheme,
    pub bytecode_version: Option<u32>,
}

impl From<&LoaderConfig> for UpdaterSettings {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            bundle_path: config.bundle_path.clone(),
            revision_scheme: config.revision_scheme,
            bytecode_version: config.bytecode_version,
        }
    }
}

/// Build the HTTP client used for update traffic.
pub fn build_client(config: &LoaderConfig) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!("scriptbridge/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .build()
}

type SharedFetch = Shared<BoxFuture<'static, Result<bool, UpdateError>>>;

struct Inner {
    client: Client,
    settings: UpdaterSettings,
    cache: BundleCache,
    state: RwLock<UpdateState>,
}

/// Checks for and downloads bundle updates.
///
/// Cheap to clone; clones share the cache and state. In-flight fetches are
/// shared with every manager on the same bundle path.
#[derive(Clone)]
pub struct UpdateManager {
    inner: Arc<Inner>,
}

impl UpdateManager {
    /// Create an updater writing the bundle to `bundle_path`.
    pub fn new(client: Client, settings: UpdaterSettings, bundle_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                settings,
                cache: BundleCache::new(bundle_path),
                state: RwLock::new(UpdateState::default()),
            }),
        }
    }

    pub fn settings(&self) -> &UpdaterSettings {
        &self.inner.settings
    }

    /// Path of the cached bundle.
    pub fn bundle_path(&self) -> &Path {
        self.inner.cache.bundle_path()
    }

    /// Whether a bundle has been downloaded before.
    pub async fn has_bundle(&self) -> bool {
        self.inner.cache.exists().await
    }

    /// Revision of the cached bundle, if any.
    pub async fn cached_revision(&self) -> Result<Option<String>, UpdateError> {
        self.inner.cache.revision().await
    }

    /// Copy the cached bundle to `dest` without racing a commit.
    pub async fn stage_bundle(&self, dest: &Path) -> Result<Option<StagedBundle>, UpdateError> {
        self.inner.cache.stage(dest).await
    }

    /// Current state snapshot.
    pub async fn state(&self) -> UpdateState {
        let mut state = self.inner.state.read().await.clone();
        if state.revision.is_none() {
            state.revision = self.inner.cache.revision().await.ok().flatten();
        }
        state
    }

    /// Ask the remote origin whether a different bundle is available.
    ///
    /// Returns `None` when the cached bundle already has the remote revision.
    /// An origin that publishes no hash always reports an update.
    pub async fn check_for_updates(&self) -> Result<Option<UpdateInfo>, UpdateError> {
        let url = join_url(&self.inner.settings.base_url, "info.json");
        debug!("Checking for updates at {}", url);

        let result = self.fetch_update_info(&url).await;
        match &result {
            Ok(Some(update)) => {
                info!(revision = %update.revision, "Update available");
                let mut state = self.inner.state.write().await;
                state.status = UpdateStatus::Stale;
                state.last_checked = Some(Utc::now());
            }
            Ok(None) => {
                debug!("Bundle is up to date");
                let mut state = self.inner.state.write().await;
                state.status = UpdateStatus::Fresh;
                state.last_checked = Some(Utc::now());
                state.error_count = 0;
            }
            Err(e) => {
                warn!("Update check failed: {}", e);
                self.record_error(e).await;
            }
        }
        result
    }

    async fn fetch_update_info(&self, url: &str) -> Result<Option<UpdateInfo>, UpdateError> {
        let settings = &self.inner.settings;

        let response = self.inner.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(UpdateError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?;
        let remote: EndpointInfo = serde_json::from_slice(&body)
            .map_err(|e| UpdateError::InvalidDescriptor(e.to_string()))?;

        let revision = remote.revision(settings.revision_scheme);
        let path = remote.resolve_path(settings.bundle_path.as_deref(), settings.bytecode_version);
        let bundle_url = join_url(&settings.base_url, &path);

        let cached = self.inner.cache.revision().await?;
        let up_to_date = remote.hash.is_some()
            && cached.as_deref() == Some(revision.as_str())
            && self.inner.cache.exists().await;

        if up_to_date {
            Ok(None)
        } else {
            Ok(Some(UpdateInfo::new(bundle_url, revision)))
        }
    }

    /// Download and commit a bundle.
    ///
    /// Without `update` a check runs first; `Ok(false)` means there was
    /// nothing to download and the cache was not touched. Concurrent calls
    /// share one download.
    pub async fn fetch_bundle(&self, update: Option<UpdateInfo>) -> Result<bool, UpdateError> {
        let target = Arc::clone(self.inner.cache.target());

        let fetch = {
            let mut slot = target.slot();
            match slot.clone() {
                Some(fetch) => {
                    debug!("Joining in-flight fetch for {}", self.bundle_path().display());
                    fetch
                }
                None => {
                    let manager = self.clone();
                    let guard = InflightGuard {
                        target: Arc::clone(&target),
                    };
                    let task = tokio::spawn(async move {
                        let _guard = guard;
                        manager.run_fetch(update).await
                    });

                    let fetch = async move {
                        task.await
                            .unwrap_or_else(|e| Err(UpdateError::Aborted(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    async fn run_fetch(&self, update: Option<UpdateInfo>) -> Result<bool, UpdateError> {
        let update = match update {
            Some(update) => update,
            None => match self.check_for_updates().await? {
                Some(update) => update,
                None => {
                    info!("No update available");
                    return Ok(false);
                }
            },
        };

        self.inner.state.write().await.status = UpdateStatus::Fetching;

        match self.download(&update).await {
            Ok(bytes) => {
                info!(
                    revision = %update.revision,
                    bytes,
                    "Bundle updated"
                );
                let mut state = self.inner.state.write().await;
                state.status = UpdateStatus::Fresh;
                state.revision = Some(update.revision);
                state.last_fetched = Some(Utc::now());
                state.error_count = 0;
                Ok(true)
            }
            Err(e) => {
                error!(url = %update.url, "Bundle download failed: {}", e);
                self.record_error(&e).await;
                Err(e)
            }
        }
    }

    async fn download(&self, update: &UpdateInfo) -> Result<u64, UpdateError> {
        info!("Downloading bundle from {}", update.url);

        let mut response = self.inner.client.get(&update.url).send().await?;
        if !response.status().is_success() {
            return Err(UpdateError::HttpStatus {
                url: update.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let mut pending = self.inner.cache.begin_write().await?;
        while let Some(chunk) = response.chunk().await? {
            pending.write(&chunk).await?;
        }

        let bytes = pending.written();
        self.inner.cache.commit(pending, &update.revision).await?;
        Ok(bytes)
    }

    async fn record_error(&self, err: &UpdateError) {
        let mut state = self.inner.state.write().await;
        state.status = UpdateStatus::Error(err.to_string());
        state.error_count += 1;
    }
}

/// Clears the in-flight entry when the fetch task ends, however it ends.
struct InflightGuard {
    target: Arc<CacheTarget>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.target.slot().take();
    }
}
