//! `Kv` module: small string values persisted as one file per key.
//!
//! The same entries are handed to scripts as globals when a bundle loads.

use scriptbridge_core::{FunctionSpec, HostError, HostModule, Outcome, Param, ParamKind};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

static WRITE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Directory-backed key/value store.
#[derive(Debug, Clone)]
pub struct KvStore {
    dir: PathBuf,
}

impl KvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, HostError> {
        let path = self.entry_path(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HostError::Failed(format!("failed to read {key}: {e}"))),
        }
    }

    /// Store `value` under `key`; `None` deletes the entry.
    pub async fn set(&self, key: &str, value: Option<&str>) -> Result<(), HostError> {
        let path = self.entry_path(key)?;

        let Some(value) = value else {
            return match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(HostError::Failed(format!("failed to delete {key}: {e}"))),
            };
        };

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| HostError::Failed(format!("failed to create kv directory: {e}")))?;

        let sequence = WRITE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{key}.tmp-{}-{sequence}", std::process::id()));
        let written = async {
            fs::write(&tmp, value.as_bytes()).await?;
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(HostError::Failed(format!("failed to write {key}: {e}")));
        }
        debug!(key = %key, "Stored kv entry");
        Ok(())
    }

    /// Every stored entry, sorted by key. A missing directory is empty.
    pub async fn entries(&self) -> std::io::Result<BTreeMap<String, String>> {
        let mut entries = BTreeMap::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(key) = entry.file_name().into_string() else {
                continue;
            };
            // In-progress writes.
            if key.starts_with('.') {
                continue;
            }
            entries.insert(key, fs::read_to_string(entry.path()).await?);
        }
        Ok(entries)
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, HostError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

/// Keys name a single file directly inside the store directory.
fn validate_key(key: &str) -> Result<(), HostError> {
    let invalid = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0']);

    if invalid {
        Err(HostError::Failed(format!("invalid kv key: {key:?}")))
    } else {
        Ok(())
    }
}

pub struct KvModule {
    store: Arc<KvStore>,
}

impl KvModule {
    pub fn new(store: KvStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

impl HostModule for KvModule {
    fn name(&self) -> &'static str {
        "Kv"
    }

    fn functions(&self) -> Vec<FunctionSpec> {
        let get = Arc::clone(&self.store);
        let set = Arc::clone(&self.store);

        vec![
            FunctionSpec::new(
                "get",
                0,
                [Param::required("key", ParamKind::Str)],
                move |args| {
                    let key = args.str(0)?.to_string();
                    let store = Arc::clone(&get);
                    Outcome::pending(async move { store.get(&key).await })
                },
            ),
            FunctionSpec::new(
                "set",
                1,
                [
                    Param::required("key", ParamKind::Str),
                    Param::nullable("value", ParamKind::Str),
                ],
                move |args| {
                    let key = args.str(0)?.to_string();
                    validate_key(&key)?;
                    let value = args.opt_str(1)?.map(str::to_string);
                    let store = Arc::clone(&set);
                    Outcome::pending(async move { store.set(&key, value.as_deref()).await })
                },
            ),
        ]
    }
}
