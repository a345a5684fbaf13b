//! # Module Registry
//!
//! Static table of capability modules, built once at startup.
//!
//! Modules are registered through `&mut self` before the registry is shared;
//! afterwards it is wrapped in an `Arc` and only read, so lookups need no
//! locking.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::module::{FunctionSpec, HostModule};

/// A registered module: its functions, in declaration order, and constants.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    name: String,
    functions: Vec<FunctionSpec>,
    index: HashMap<&'static str, usize>,
    constants: Map<String, Value>,
}

impl ModuleDescriptor {
    /// Build a descriptor from a module's registration table.
    ///
    /// When a function name appears twice the later entry wins.
    pub fn from_module<M: HostModule + ?Sized>(module: &M) -> Self {
        Self::new(module.name(), module.functions(), module.constants())
    }

    pub fn new(
        name: impl Into<String>,
        functions: Vec<FunctionSpec>,
        constants: Map<String, Value>,
    ) -> Self {
        let name = name.into();
        let mut deduped: Vec<FunctionSpec> = Vec::with_capacity(functions.len());
        let mut index = HashMap::with_capacity(functions.len());

        for function in functions {
            match index.get(function.name()) {
                Some(&slot) => {
                    warn!(module = %name, function = function.name(), "Duplicate function registration, replacing");
                    deduped[slot] = function;
                }
                None => {
                    index.insert(function.name(), deduped.len());
                    deduped.push(function);
                }
            }
        }

        Self {
            name,
            functions: deduped,
            index,
            constants,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.index.get(name).map(|&slot| &self.functions[slot])
    }

    pub fn functions(&self) -> &[FunctionSpec] {
        &self.functions
    }

    pub fn constants(&self) -> &Map<String, Value> {
        &self.constants
    }

    /// Function name → version.
    pub fn function_versions(&self) -> BTreeMap<String, u32> {
        self.functions
            .iter()
            .map(|f| (f.name().to_string(), f.version()))
            .collect()
    }
}

/// Registry of capability modules.
///
/// # Example
///
/// ```
/// use scriptbridge_core::{FunctionSpec, HostModule, ModuleRegistry, Outcome};
///
/// struct Clock;
///
/// impl HostModule for Clock {
///     fn name(&self) -> &'static str {
///         "Clock"
///     }
///
///     fn functions(&self) -> Vec<FunctionSpec> {
///         vec![FunctionSpec::new("now", 1, Vec::new(), |_args| Outcome::ready(0))]
///     }
/// }
///
/// let mut registry = ModuleRegistry::new();
/// registry.register(Clock);
///
/// assert_eq!(registry.function_version("Clock", "now").unwrap(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleDescriptor>,
}

impl ModuleRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Register a module.
    ///
    /// The module's name is the key. If a module with the same name already
    /// exists, it is replaced.
    pub fn register<M: HostModule>(&mut self, module: M) {
        self.register_descriptor(ModuleDescriptor::from_module(&module));
    }

    /// Register a prebuilt descriptor.
    pub fn register_descriptor(&mut self, descriptor: ModuleDescriptor) {
        debug!(
            module = %descriptor.name(),
            functions = descriptor.functions().len(),
            "Registering module"
        );
        if let Some(previous) = self.modules.insert(descriptor.name().to_string(), descriptor) {
            warn!(module = %previous.name(), "Module registered twice, replacing");
        }
    }

    /// Look up a module by name.
    pub fn lookup(&self, module: &str) -> BridgeResult<&ModuleDescriptor> {
        self.modules
            .get(module)
            .ok_or_else(|| BridgeError::UnknownModule(module.to_string()))
    }

    /// Look up a function within a module.
    pub fn function(&self, module: &str, function: &str) -> BridgeResult<&FunctionSpec> {
        self.lookup(module)?
            .function(function)
            .ok_or_else(|| BridgeError::UnknownFunction {
                module: module.to_string(),
                function: function.to_string(),
            })
    }

    /// Version of a function, used for capability negotiation.
    pub fn function_version(&self, module: &str, function: &str) -> BridgeResult<u32> {
        self.function(module, function).map(FunctionSpec::version)
    }

    /// Constants exposed by a module.
    pub fn constants(&self, module: &str) -> BridgeResult<&Map<String, Value>> {
        self.lookup(module).map(ModuleDescriptor::constants)
    }

    /// List all registered module names.
    pub fn list(&self) -> Vec<&str> {
        self.modules.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of registered modules.
    pub fn count(&self) -> usize {
        self.modules.len()
    }

    /// Check if a module with the given name is registered.
    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Serializable view of every module, for the boot payload.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.modules
            .values()
            .map(|descriptor| {
                (
                    descriptor.name().to_string(),
                    ModuleSnapshot {
                        functions: descriptor.function_versions(),
                        constants: descriptor.constants().clone(),
                    },
                )
            })
            .collect()
    }
}

/// Module name → snapshot.
pub type RegistrySnapshot = BTreeMap<String, ModuleSnapshot>;

/// What scripts see of a module at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    pub functions: BTreeMap<String, u32>,
    pub constants: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Param, ParamKind};
    use crate::module::Outcome;
    use serde_json::json;

    struct MockModule {
        name: &'static str,
    }

    impl MockModule {
        fn new(name: &'static str) -> Self {
            Self { name }
        }
    }

    impl HostModule for MockModule {
        fn name(&self) -> &'static str {
            self.name
        }

        fn functions(&self) -> Vec<FunctionSpec> {
            vec![
                FunctionSpec::new("ping", 0, Vec::new(), |_args| Outcome::ready("pong")),
                FunctionSpec::new(
                    "echo",
                    3,
                    [Param::required("text", ParamKind::Str)],
                    |args| Outcome::ready(args.str(0)?),
                ),
            ]
        }

        fn constants(&self) -> Map<String, Value> {
            let mut constants = Map::new();
            constants.insert("MAX".to_string(), json!(10));
            constants
        }
    }

    #[test]
    fn test_new_registry() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_register_module() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::new("Mock"));

        assert_eq!(registry.count(), 1);
        assert!(registry.contains("Mock"));
        assert_eq!(registry.lookup("Mock").unwrap().functions().len(), 2);
    }

    #[test]
    fn test_lookup_unknown() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::new("Mock"));

        assert_eq!(
            registry.lookup("Nope").unwrap_err(),
            BridgeError::UnknownModule("Nope".to_string())
        );
        assert!(matches!(
            registry.function("Mock", "nope").unwrap_err(),
            BridgeError::UnknownFunction { .. }
        ));
    }

    #[test]
    fn test_function_version_and_constants() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::new("Mock"));

        assert_eq!(registry.function_version("Mock", "ping").unwrap(), 0);
        assert_eq!(registry.function_version("Mock", "echo").unwrap(), 3);
        assert_eq!(registry.constants("Mock").unwrap()["MAX"], json!(10));
    }

    #[test]
    fn test_list_modules() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::new("A"));
        registry.register(MockModule::new("B"));

        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_replace_module() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::new("Mock"));
        registry.register(MockModule::new("Mock"));

        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_duplicate_function_keeps_order() {
        let descriptor = ModuleDescriptor::new(
            "Dup",
            vec![
                FunctionSpec::new("a", 0, Vec::new(), |_args| Outcome::unit()),
                FunctionSpec::new("b", 0, Vec::new(), |_args| Outcome::unit()),
                FunctionSpec::new("a", 5, Vec::new(), |_args| Outcome::unit()),
            ],
            Map::new(),
        );

        let names: Vec<_> = descriptor.functions().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(descriptor.function("a").unwrap().version(), 5);
    }

    #[test]
    fn test_snapshot() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::new("Mock"));

        let snapshot = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(
            snapshot,
            json!({
                "Mock": {
                    "functions": {"echo": 3, "ping": 0},
                    "constants": {"MAX": 10}
                }
            })
        );
    }
}
