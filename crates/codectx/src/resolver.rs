//! Source-text and module resolution.
//!
//! A [`ModuleResolver`] maps a module path to its source text and to live
//! symbols. The compiler uses it to load predefined source named by a
//! store's module pointer; the runtime uses it for store injections and the
//! interpreter for `use` statements.

use crate::config::{DEFAULT_PROLOGUE, starts_with_prologue};
use crate::error::{ContextError, Result};
use crate::reflect::TypeSpec;
use crate::script::{Interpreter, NativeFunction, Value};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::path::Path;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// File extension of module sources loaded by [`ModuleRegistry::from_dir`].
pub const MODULE_EXTENSION: &str = "ctx";

pub trait ModuleResolver {
    /// Literal source text of the module at `path`.
    fn resolve(&self, path: &str) -> Result<String>;

    /// The live value `symbol` exported by the module at `path`.
    fn resolve_symbol(&self, path: &str, symbol: &str) -> Result<Value>;
}

#[derive(Default)]
struct Module {
    source: Option<String>,
    symbols: IndexMap<String, Value>,
}

#[derive(Default)]
struct Modules {
    modules: RefCell<IndexMap<String, Module>>,
    loaded: RefCell<IndexMap<String, Interpreter>>,
    /// Modules whose source is running, outermost first.
    loading: RefCell<Vec<String>>,
}

impl Modules {
    fn resolve(&self, path: &str) -> Result<String> {
        self.modules
            .borrow()
            .get(path)
            .and_then(|m| m.source.clone())
            .ok_or_else(|| ContextError::ModuleResolution(path.to_string()))
    }

    fn resolve_symbol(self: &Rc<Self>, path: &str, symbol: &str) -> Result<Value> {
        let source = {
            let modules = self.modules.borrow();
            let module = modules
                .get(path)
                .ok_or_else(|| ContextError::ModuleResolution(path.to_string()))?;
            if let Some(value) = module.symbols.get(symbol) {
                return Ok(value.clone());
            }
            module.source.clone()
        };
        let not_found = || ContextError::SymbolNotFound {
            module: path.to_string(),
            symbol: symbol.to_string(),
        };
        let source = source.ok_or_else(not_found)?;
        self.evaluate(path, &source)?;
        self.loaded
            .borrow()
            .get(path)
            .and_then(|interp| interp.globals().get_local(symbol))
            .ok_or_else(not_found)
    }

    /// Run a module's source once. Its own `use` statements resolve
    /// through this registry; an import cycle fails resolution.
    fn evaluate(self: &Rc<Self>, path: &str, source: &str) -> Result<()> {
        if self.loaded.borrow().contains_key(path) {
            return Ok(());
        }
        if self.loading.borrow().iter().any(|p| p == path) {
            warn!("[resolver] module {path} imports itself");
            return Err(ContextError::ModuleResolution(path.to_string()));
        }
        let link: Rc<dyn ModuleResolver> = Rc::new(ModuleLink(Rc::downgrade(self)));
        let mut interp = Interpreter::new(path).with_resolver(link);
        interp.set_deferred_annotations(starts_with_prologue(source, DEFAULT_PROLOGUE));

        self.loading.borrow_mut().push(path.to_string());
        let outcome = interp.run(source);
        self.loading.borrow_mut().retain(|p| p != path);

        if let Err(e) = outcome {
            warn!("[resolver] module {path} failed to load: {e}");
            interp.teardown();
            return Err(ContextError::ModuleResolution(path.to_string()));
        }
        debug!("[resolver] module {path} loaded");
        self.loaded.borrow_mut().insert(path.to_string(), interp);
        Ok(())
    }
}

/// The resolver handed to module interpreters. Holds the registry weakly
/// so cached namespaces don't keep it alive.
struct ModuleLink(Weak<Modules>);

impl ModuleResolver for ModuleLink {
    fn resolve(&self, path: &str) -> Result<String> {
        match self.0.upgrade() {
            Some(modules) => modules.resolve(path),
            None => Err(ContextError::ModuleResolution(path.to_string())),
        }
    }

    fn resolve_symbol(&self, path: &str, symbol: &str) -> Result<Value> {
        match self.0.upgrade() {
            Some(modules) => modules.resolve_symbol(path, symbol),
            None => Err(ContextError::ModuleResolution(path.to_string())),
        }
    }
}

/// In-memory modules holding source text, host symbols, or both.
///
/// Module source is evaluated the first time one of its symbols is
/// resolved and the namespace is cached. Module sources may `use` other
/// modules of the same registry. Cached namespaces are torn down when the
/// registry is dropped.
#[derive(Default)]
pub struct ModuleRegistry {
    inner: Rc<Modules>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every `*.ctx` file in `dir` as a module named after its
    /// file stem.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let registry = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MODULE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let source = std::fs::read_to_string(&path)?;
            debug!("[resolver] module {name} from {}", path.display());
            registry.add_source(name, source);
        }
        Ok(registry)
    }

    pub fn with_source(self, path: &str, source: impl Into<String>) -> Self {
        self.add_source(path, source);
        self
    }

    pub fn with_symbol(self, path: &str, name: &str, value: Value) -> Self {
        self.add_symbol(path, name, value);
        self
    }

    /// Export a host function; its spec's module defaults to `path`.
    pub fn with_function(self, path: &str, mut function: NativeFunction) -> Self {
        if function.spec.module.is_none() {
            function.spec.module = Some(path.to_string());
        }
        let name = function.spec.name.clone();
        self.add_symbol(path, &name, Value::native(function));
        self
    }

    /// Export a host type; its spec's module defaults to `path`.
    pub fn with_type(self, path: &str, mut spec: TypeSpec) -> Self {
        if spec.module.is_none() {
            spec.module = Some(path.to_string());
        }
        let name = spec.name.clone();
        self.add_symbol(path, &name, Value::HostType(Rc::new(spec)));
        self
    }

    pub fn add_source(&self, path: &str, source: impl Into<String>) {
        self.inner
            .modules
            .borrow_mut()
            .entry(path.to_string())
            .or_default()
            .source = Some(source.into());
        if let Some(mut stale) = self.inner.loaded.borrow_mut().shift_remove(path) {
            stale.teardown();
        }
    }

    pub fn add_symbol(&self, path: &str, name: &str, value: Value) {
        self.inner
            .modules
            .borrow_mut()
            .entry(path.to_string())
            .or_default()
            .symbols
            .insert(name.to_string(), value);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.modules.borrow().contains_key(path)
    }

    /// Number of module sources evaluated and cached so far.
    pub fn loaded_count(&self) -> usize {
        self.inner.loaded.borrow().len()
    }
}

impl ModuleResolver for ModuleRegistry {
    fn resolve(&self, path: &str) -> Result<String> {
        self.inner.resolve(path)
    }

    fn resolve_symbol(&self, path: &str, symbol: &str) -> Result<Value> {
        self.inner.resolve_symbol(path, symbol)
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        let loaded: Vec<Interpreter> = self
            .inner
            .loaded
            .borrow_mut()
            .drain(..)
            .map(|(_, interp)| interp)
            .collect();
        for mut interp in loaded {
            interp.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::FunctionSpec;

    #[test]
    fn resolves_source_and_host_symbols() {
        let registry = ModuleRegistry::new()
            .with_source("math", "fn double(x) { return x * 2; }")
            .with_function(
                "net",
                NativeFunction::new(FunctionSpec::new("ping"), |_, _| Ok(Value::str("pong"))),
            );
        assert!(registry.resolve("math").unwrap().contains("double"));
        assert!(matches!(
            registry.resolve("net"),
            Err(ContextError::ModuleResolution(_))
        ));
        let Value::Native(ping) = registry.resolve_symbol("net", "ping").unwrap() else {
            panic!("expected native");
        };
        assert_eq!(ping.spec.module.as_deref(), Some("net"));
    }

    #[test]
    fn module_source_is_evaluated_once_and_callable() {
        let registry = Rc::new(
            ModuleRegistry::new().with_source("math", "fn double(x) { return x * 2; }"),
        );
        let mut interp = Interpreter::new("main").with_resolver(registry.clone());
        let result = interp.eval("use math::double as twice;\ntwice(21)").unwrap();
        assert_eq!(result, Value::Int(42));
        assert_eq!(registry.loaded_count(), 1);
        registry.resolve_symbol("math", "double").unwrap();
        assert_eq!(registry.loaded_count(), 1);
    }

    #[test]
    fn missing_modules_and_symbols() {
        let registry = ModuleRegistry::new().with_source("math", "x = 1;");
        assert!(matches!(
            registry.resolve_symbol("nope", "x"),
            Err(ContextError::ModuleResolution(_))
        ));
        assert!(matches!(
            registry.resolve_symbol("math", "y"),
            Err(ContextError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn module_sources_import_other_modules() {
        let registry = ModuleRegistry::new()
            .with_source("math", "fn double(x) { return x * 2; }")
            .with_source(
                "geo",
                "\n\n//! deferred-annotations\nuse math::double;\nfn quad(x: Num) { return double(double(x)); }",
            );
        let Value::Function(_) = registry.resolve_symbol("geo", "quad").unwrap() else {
            panic!("expected a script function");
        };
        let mut interp = Interpreter::new("main").with_resolver(Rc::new(registry));
        assert_eq!(interp.eval("use geo::quad;\nquad(3)").unwrap(), Value::Int(12));
    }

    #[test]
    fn import_cycles_fail_resolution() {
        let registry = ModuleRegistry::new()
            .with_source("a", "use b::y;\nx = 1;")
            .with_source("b", "use a::x;\ny = 2;");
        assert!(matches!(
            registry.resolve_symbol("a", "x"),
            Err(ContextError::ModuleResolution(_))
        ));
        assert_eq!(registry.loaded_count(), 0);
    }

    #[test]
    fn broken_module_source_fails_resolution() {
        let registry = ModuleRegistry::new().with_source("bad", "fn (");
        assert!(matches!(
            registry.resolve_symbol("bad", "x"),
            Err(ContextError::ModuleResolution(_))
        ));
    }

    #[test]
    fn loads_modules_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tools.ctx"), "fn hi() { return 1; }").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let registry = ModuleRegistry::from_dir(dir.path()).unwrap();
        assert!(registry.contains("tools"));
        assert!(!registry.contains("notes"));
    }
}
