//! Executor implementations shipped with the toolchain: an in-memory
//! executor for tests and a filesystem-backed executor for the CLI. Real
//! deployments implement [`HostExecutor`] against their device registry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use crate::analyzer::types::Type;
use crate::value::{json, Value};

use super::{AnalyzerImport, HostError, HostExecutor, TemplateSpec};

/// In-memory executor used by the test suite: modules are a name→source
/// map, `println` output is captured, singleton values and templates are
/// seeded directly.
#[derive(Default)]
pub struct TestExecutor {
    modules: HashMap<String, String>,
    templates: HashMap<(String, String), TemplateSpec>,
    builtin_values: HashMap<(String, String), (Type, Value)>,
    singletons: HashMap<String, Value>,
    output: RefCell<String>,
    user: Option<String>,
}

impl TestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: &str, source: &str) -> Self {
        self.modules.insert(name.to_string(), source.to_string());
        self
    }

    pub fn with_template(mut self, module: &str, name: &str, spec: TemplateSpec) -> Self {
        self.templates
            .insert((module.to_string(), name.to_string()), spec);
        self
    }

    pub fn with_builtin_value(
        mut self,
        module: &str,
        symbol: &str,
        type_id: Type,
        value: Value,
    ) -> Self {
        self.builtin_values
            .insert((module.to_string(), symbol.to_string()), (type_id, value));
        self
    }

    pub fn with_singleton(mut self, ident: &str, value: Value) -> Self {
        self.singletons.insert(ident.to_string(), value);
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    /// Everything written through the stdout sink so far.
    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }
}

impl HostExecutor for TestExecutor {
    fn resolve_module(&self, name: &str) -> Result<Option<String>, HostError> {
        Ok(self.modules.get(name).cloned())
    }

    fn get_builtin_import(&self, module: &str, symbol: &str) -> AnalyzerImport {
        let key = (module.to_string(), symbol.to_string());
        if let Some(spec) = self.templates.get(&key) {
            return AnalyzerImport::Template(spec.clone());
        }
        if let Some((type_id, _)) = self.builtin_values.get(&key) {
            return AnalyzerImport::Value(type_id.clone());
        }

        let module_known = self
            .templates
            .keys()
            .chain(self.builtin_values.keys())
            .any(|(m, _)| m == module);
        if module_known {
            AnalyzerImport::SymbolNotFound
        } else {
            AnalyzerImport::ModuleNotFound
        }
    }

    fn get_builtin_value(&self, module: &str, symbol: &str) -> Option<Value> {
        self.builtin_values
            .get(&(module.to_string(), symbol.to_string()))
            .map(|(_, value)| value.clone())
    }

    fn load_singleton(&self, ident: &str, _type_id: &Type) -> Result<Option<Value>, HostError> {
        Ok(self.singletons.get(ident).cloned())
    }

    fn write_string(&self, output: &str) {
        self.output.borrow_mut().push_str(output);
    }

    fn get_user(&self) -> String {
        self.user.clone().unwrap_or_else(|| "test".to_string())
    }
}

/// Filesystem-backed executor for the CLI: modules are sibling `.hms`
/// files, singleton values may be seeded from a `singletons.json` next to
/// the entry file.
pub struct FsExecutor {
    root: PathBuf,
    singletons: HashMap<String, Value>,
}

impl FsExecutor {
    pub fn new(root: PathBuf) -> Self {
        let singletons = Self::load_singleton_seed(&root);
        Self { root, singletons }
    }

    fn load_singleton_seed(root: &std::path::Path) -> HashMap<String, Value> {
        let path = root.join("singletons.json");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return HashMap::new();
        };
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&content) else {
            log::warn!("ignoring malformed {}", path.display());
            return HashMap::new();
        };
        match parsed {
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(name, value)| (name, json::unmarshal(&value)))
                .collect(),
            _ => {
                log::warn!("{} must contain a JSON object", path.display());
                HashMap::new()
            }
        }
    }
}

impl HostExecutor for FsExecutor {
    fn resolve_module(&self, name: &str) -> Result<Option<String>, HostError> {
        let path = self.root.join(format!("{name}.hms"));
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|err| HostError::new(format!("could not read '{}': {err}", path.display())))
    }

    fn get_builtin_import(&self, _module: &str, _symbol: &str) -> AnalyzerImport {
        AnalyzerImport::ModuleNotFound
    }

    fn get_builtin_value(&self, _module: &str, _symbol: &str) -> Option<Value> {
        None
    }

    fn load_singleton(&self, ident: &str, _type_id: &Type) -> Result<Option<Value>, HostError> {
        Ok(self.singletons.get(ident).cloned())
    }

    fn write_string(&self, output: &str) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = lock.write_all(output.as_bytes());
        let _ = lock.flush();
    }

    fn get_user(&self) -> String {
        std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
    }
}
