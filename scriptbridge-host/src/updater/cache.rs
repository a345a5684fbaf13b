//! On-disk bundle cache.
//!
//! The cache is a bundle file plus a sibling `<bundle name>.revision` marker.
//! Downloads stream into a temporary file in the same directory and are only
//! moved into place by [`BundleCache::commit`], so a failed download never
//! touches the previous bundle or marker.
//!
//! The lock guarding the pair is shared by every cache on the same path.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::target::CacheTarget;
use super::UpdateError;

static DOWNLOAD_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Bundle file, revision marker and the lock guarding them.
#[derive(Debug)]
pub struct BundleCache {
    bundle: PathBuf,
    marker: PathBuf,
    target: Arc<CacheTarget>,
}

/// A bundle copied out of the cache, with the revision it was committed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBundle {
    pub path: PathBuf,
    pub revision: Option<String>,
}

impl BundleCache {
    pub fn new(bundle: impl Into<PathBuf>) -> Self {
        let bundle = bundle.into();
        let marker = sibling(&bundle, ".revision");
        let target = CacheTarget::for_path(&bundle);
        Self {
            bundle,
            marker,
            target,
        }
    }

    pub(super) fn target(&self) -> &Arc<CacheTarget> {
        &self.target
    }

    pub fn bundle_path(&self) -> &Path {
        &self.bundle
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    /// Whether a bundle has been committed.
    pub async fn exists(&self) -> bool {
        let _guard = self.target.lock.read().await;
        fs::try_exists(&self.bundle).await.unwrap_or(false)
    }

    /// The last applied revision, or `None` if never fetched.
    pub async fn revision(&self) -> Result<Option<String>, UpdateError> {
        let _guard = self.target.lock.read().await;
        read_marker(&self.marker).await
    }

    /// Open a fresh temporary file for a download.
    pub async fn begin_write(&self) -> Result<PendingBundle, UpdateError> {
        if let Some(parent) = self.bundle.parent() {
            fs::create_dir_all(parent).await?;
        }

        let sequence = DOWNLOAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let path = sibling(
            &self.bundle,
            &format!(".download-{}-{sequence}", std::process::id()),
        );
        let file = fs::File::create(&path).await?;
        debug!("Downloading into {}", path.display());

        Ok(PendingBundle {
            path,
            file,
            written: 0,
            committed: false,
        })
    }

    /// Make a finished download the current bundle and record `revision`.
    ///
    /// The marker is removed before the bundle is replaced and written again
    /// afterwards, so a crash in between reads as "never fetched".
    pub async fn commit(&self, mut pending: PendingBundle, revision: &str) -> Result<(), UpdateError> {
        pending.file.flush().await?;
        pending.file.sync_all().await?;

        let _guard = self.target.lock.write().await;

        match fs::remove_file(&self.marker).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::rename(&pending.path, &self.bundle).await?;
        pending.committed = true;

        let sequence = DOWNLOAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let marker_tmp = sibling(
            &self.marker,
            &format!(".tmp-{}-{sequence}", std::process::id()),
        );
        fs::write(&marker_tmp, revision.as_bytes()).await?;
        if let Err(e) = fs::rename(&marker_tmp, &self.marker).await {
            let _ = fs::remove_file(&marker_tmp).await;
            return Err(e.into());
        }

        debug!(
            revision = %revision,
            bytes = pending.written,
            "Committed bundle to {}",
            self.bundle.display()
        );
        Ok(())
    }

    /// Copy the current bundle to `dest` and read its revision while no
    /// commit can run.
    ///
    /// Returns `None` when there is no bundle to copy.
    pub async fn stage(&self, dest: &Path) -> Result<Option<StagedBundle>, UpdateError> {
        let _guard = self.target.lock.read().await;

        if !fs::try_exists(&self.bundle).await? {
            return Ok(None);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&self.bundle, dest).await?;
        let revision = read_marker(&self.marker).await?;

        Ok(Some(StagedBundle {
            path: dest.to_path_buf(),
            revision,
        }))
    }
}

/// A download in progress. Dropping it without committing deletes the
/// temporary file.
#[derive(Debug)]
pub struct PendingBundle {
    path: PathBuf,
    file: fs::File,
    written: u64,
    committed: bool,
}

impl PendingBundle {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), UpdateError> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Drop for PendingBundle {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn read_marker(path: &Path) -> Result<Option<String>, UpdateError> {
    match fs::read_to_string(path).await {
        Ok(revision) => Ok(Some(revision)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
