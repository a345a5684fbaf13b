//! Process-wide coordination per cache target.
//!
//! Every [`BundleCache`](super::BundleCache) built on the same bundle path
//! shares one [`CacheTarget`], so updaters that were created independently
//! still see one writer lock and one in-flight fetch for that path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, Weak};
use tokio::sync::RwLock;

use super::SharedFetch;

static TARGETS: LazyLock<Mutex<HashMap<PathBuf, Weak<CacheTarget>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Lock and single-flight slot for one bundle path.
#[derive(Default)]
pub(super) struct CacheTarget {
    /// Held for reading by anything that reads the bundle or marker, and for
    /// writing while a commit swaps them.
    pub(super) lock: RwLock<()>,
    inflight: Mutex<Option<SharedFetch>>,
}

impl CacheTarget {
    /// The shared target for `path`, created on first use.
    pub(super) fn for_path(path: &Path) -> Arc<CacheTarget> {
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut targets = TARGETS.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(target) = targets.get(&key).and_then(Weak::upgrade) {
            return target;
        }

        targets.retain(|_, target| target.strong_count() > 0);
        let target = Arc::new(CacheTarget::default());
        targets.insert(key, Arc::downgrade(&target));
        target
    }

    /// The in-flight fetch slot.
    pub(super) fn slot(&self) -> std::sync::MutexGuard<'_, Option<SharedFetch>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CacheTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTarget")
            .field("fetching", &self.slot().is_some())
            .finish()
    }
}
