//! Built-in capability modules.

pub mod kv;
pub mod updater;

pub use kv::{KvModule, KvStore};
pub use updater::UpdaterModule;

use scriptbridge_core::ModuleRegistry;

use crate::config::DataPaths;
use crate::updater::UpdateManager;

/// Register every built-in module.
pub fn register_builtin(registry: &mut ModuleRegistry, updater: &UpdateManager, paths: &DataPaths) {
    registry.register(UpdaterModule::new(updater.clone()));
    registry.register(KvModule::new(KvStore::new(paths.kv_dir())));
}
