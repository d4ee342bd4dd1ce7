//! Namespace compiler: turns a context store and predefined source into an
//! [`ExecutionRuntime`].
//!
//! A compiler is single-use. [`NamespaceCompiler::compile`] resolves the
//! predefined source, loads it into a fresh namespace, binds bootstrap
//! values and host functions, then gives the namespace's completion hook
//! (`on_compile` by default) one chance to adjust the dependency container
//! and bootstrap values through a [`CompilerHandle`]. Whatever the outcome,
//! the compiler's inputs are released and a second `compile` fails with
//! [`ContextError::AlreadyCompiled`].

use crate::config::RuntimeConfig;
use crate::container::{Container, DependencyContainer};
use crate::error::{ContextError, Result, ScriptError};
use crate::reflect::{FunctionSpec, Reflection, Scope};
use crate::resolver::ModuleResolver;
use crate::runtime::{ExecutionRuntime, RuntimeParts};
use crate::script::{
    CallArgs, HostObject, Interpreter, NativeFunction, OutputChannel, ScriptFunction, Value,
};
use crate::store::ContextStore;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Compiling,
    Compiled,
}

type Bootstrap = Rc<RefCell<IndexMap<String, Value>>>;

/// Builds one [`ExecutionRuntime`].
///
/// # Example
///
/// ```
/// use codectx::{ContextStore, Execution, NamespaceCompiler, RuntimeConfig};
///
/// let compiler = NamespaceCompiler::new(RuntimeConfig::default())
///     .with_store(ContextStore::new())
///     .with_source("fn plus(a, b) { return a + b; }");
/// let runtime = compiler.compile("demo").unwrap();
/// let result = runtime
///     .execute(Execution::call("fn main() { return plus(1, 2); }", "main"))
///     .unwrap();
/// assert_eq!(result.return_value().and_then(|v| v.as_int()), Some(3));
/// runtime.destroy().unwrap();
/// ```
pub struct NamespaceCompiler {
    config: RuntimeConfig,
    phase: Rc<Cell<Phase>>,
    store: RefCell<ContextStore>,
    source: RefCell<Option<String>>,
    resolver: RefCell<Option<Rc<dyn ModuleResolver>>>,
    container: RefCell<Option<Rc<dyn DependencyContainer>>>,
    bootstrap: Bootstrap,
    functions: RefCell<Vec<NativeFunction>>,
    symbols: RefCell<Vec<Reflection>>,
}

impl NamespaceCompiler {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            phase: Rc::new(Cell::new(Phase::Ready)),
            store: RefCell::new(ContextStore::new()),
            source: RefCell::new(None),
            resolver: RefCell::new(None),
            container: RefCell::new(None),
            bootstrap: Rc::new(RefCell::new(IndexMap::new())),
            functions: RefCell::new(Vec::new()),
            symbols: RefCell::new(Vec::new()),
        }
    }

    pub fn with_store(self, store: ContextStore) -> Self {
        *self.store.borrow_mut() = store;
        self
    }

    /// Inline predefined source. Takes precedence over the store's module
    /// pointer.
    pub fn with_source(self, source: impl Into<String>) -> Self {
        *self.source.borrow_mut() = Some(source.into());
        self
    }

    /// Resolver for the store's module pointer, its injections, and `use`
    /// statements.
    pub fn with_resolver(self, resolver: Rc<dyn ModuleResolver>) -> Self {
        *self.resolver.borrow_mut() = Some(resolver);
        self
    }

    /// Parent dependency container. The runtime works in a child scope of
    /// it, so registrations made during compilation stay local.
    pub fn with_container(self, container: Rc<dyn DependencyContainer>) -> Self {
        *self.container.borrow_mut() = Some(container);
        self
    }

    /// A value bound in the namespace and on the facade.
    pub fn with_bootstrap(self, name: &str, value: impl Into<Value>) -> Self {
        self.bootstrap
            .borrow_mut()
            .insert(name.to_string(), value.into());
        self
    }

    /// A host function bound in the namespace and described in the prompt.
    pub fn with_function(self, function: NativeFunction) -> Self {
        self.functions.borrow_mut().push(function);
        self
    }

    /// An extra symbol description for the prompt.
    pub fn with_symbol(self, reflection: Reflection) -> Self {
        self.symbols.borrow_mut().push(reflection);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_compiled(&self) -> bool {
        self.phase.get() == Phase::Compiled
    }

    /// Build the runtime for `target`, the display name of the namespace
    /// and of its facade.
    pub fn compile(&self, target: &str) -> Result<ExecutionRuntime> {
        match self.phase.get() {
            Phase::Compiling => return Err(ContextError::RecursiveCompile),
            Phase::Compiled => return Err(ContextError::AlreadyCompiled),
            Phase::Ready => {}
        }
        self.phase.set(Phase::Compiling);
        let result = self.build(target);
        self.phase.set(Phase::Compiled);
        self.release();
        match &result {
            Ok(_) => info!("[compile] {target}: namespace ready"),
            Err(e) => warn!("[compile] {target}: failed: {e}"),
        }
        result
    }

    fn release(&self) {
        self.store.take();
        self.source.take();
        self.resolver.take();
        self.container.take();
        self.bootstrap.borrow_mut().clear();
        self.functions.borrow_mut().clear();
        self.symbols.borrow_mut().clear();
    }

    fn build(&self, target: &str) -> Result<ExecutionRuntime> {
        let store = self.store.take();
        let resolver = self.resolver.take();
        let source = self.predefined_source(&store, resolver.as_deref())?;

        let mut symbols = Scope::new();
        for reflection in self.symbols.take() {
            symbols.insert(reflection)?;
        }

        let output = OutputChannel::new();
        let mut interp = Interpreter::new(target)
            .with_output(output)
            .with_max_depth(self.config.max_call_depth);
        if let Some(resolver) = &resolver {
            interp = interp.with_resolver(resolver.clone());
        }

        let container: Rc<dyn DependencyContainer> = match self.container.take() {
            Some(parent) => parent.child(),
            None => Container::new(),
        };

        match self.load(&mut interp, target, &source, &container) {
            Ok(natives) => {
                let bootstrap = std::mem::take(&mut *self.bootstrap.borrow_mut());
                Ok(ExecutionRuntime::new(RuntimeParts {
                    config: self.config.clone(),
                    name: target.to_string(),
                    interp,
                    container,
                    store,
                    bootstrap,
                    natives,
                    symbols: symbols.into_vec(),
                    source,
                    resolver,
                }))
            }
            Err(e) => {
                interp.teardown();
                container.clear();
                Err(e)
            }
        }
    }

    /// Inline source, else the store's module resolved as text with the
    /// deferred-annotation prologue prefixed. Neither yields an empty
    /// namespace.
    fn predefined_source(
        &self,
        store: &ContextStore,
        resolver: Option<&dyn ModuleResolver>,
    ) -> Result<String> {
        if let Some(source) = self.source.take() {
            return Ok(source);
        }
        let Some(module) = store.module() else {
            return Ok(String::new());
        };
        let resolver = resolver.ok_or_else(|| ContextError::ModuleResolution(module.to_string()))?;
        let text = resolver.resolve(module)?;
        if self.config.is_deferred(&text) {
            return Ok(text);
        }
        Ok(format!("{}\n{text}", self.config.prologue))
    }

    /// Load everything into `interp` and run the completion hook. Returns
    /// the bound host functions.
    fn load(
        &self,
        interp: &mut Interpreter,
        target: &str,
        source: &str,
        container: &Rc<dyn DependencyContainer>,
    ) -> Result<Vec<Value>> {
        for name in self.bootstrap.borrow().keys() {
            if self.config.is_reserved(name) {
                return Err(ContextError::ReservedName(name.clone()));
            }
        }
        for (name, value) in self.bootstrap.borrow().iter() {
            interp.define(name, value.clone());
        }

        let mut natives = Vec::new();
        for function in self.functions.take() {
            let name = function.spec.name.clone();
            if self.config.is_reserved(&name) {
                return Err(ContextError::ReservedName(name));
            }
            let value = Value::native(function);
            interp.define(&name, value.clone());
            natives.push(value);
        }

        interp.set_deferred_annotations(self.config.is_deferred(source));
        interp.run(source).map_err(ScriptError::into_context)?;
        debug!("[compile] {target}: predefined source loaded");

        if let Some(hook) = interp.get(&self.config.compile_hook) {
            if hook.is_callable() {
                let handle = CompilerHandle::new(
                    target,
                    self.phase.clone(),
                    container.clone(),
                    self.bootstrap.clone(),
                    self.config.clone(),
                );
                debug!("[compile] {target}: running {}", self.config.compile_hook);
                interp
                    .call(&hook, CallArgs::positional(vec![Value::object(handle)]))
                    .map_err(ScriptError::into_context)?;
            }
        }
        Ok(natives)
    }
}

// ── Completion hook handle ─────────────────────────────────────────

/// The compiler as seen by the completion hook.
///
/// Exposes `set(key, value)` and `get(key)` on the runtime's dependency
/// container, `bootstrap(name, value)`, `name()`, and `compile()`, which
/// always fails: calling it from the hook raises
/// [`ContextError::RecursiveCompile`].
pub struct CompilerHandle {
    attrs: IndexMap<String, Value>,
}

impl CompilerHandle {
    fn new(
        target: &str,
        phase: Rc<Cell<Phase>>,
        container: Rc<dyn DependencyContainer>,
        bootstrap: Bootstrap,
        config: RuntimeConfig,
    ) -> Self {
        let mut attrs = IndexMap::new();

        let set_container = container.clone();
        attrs.insert(
            "set".to_string(),
            Value::native(NativeFunction::new(
                FunctionSpec::new("set").param("key", Some("str")).param("value", None),
                move |_, args| {
                    let key = args.require(0, "key", "set")?.to_string();
                    let value = args.require(1, "value", "set")?.clone();
                    set_container.set(&key, value);
                    Ok(Value::Nil)
                },
            )),
        );

        attrs.insert(
            "get".to_string(),
            Value::native(NativeFunction::new(
                FunctionSpec::new("get").param("key", Some("str")),
                move |_, args| {
                    let key = args.require(0, "key", "get")?.to_string();
                    Ok(container.get(&key).unwrap_or(Value::Nil))
                },
            )),
        );

        attrs.insert(
            "bootstrap".to_string(),
            Value::native(NativeFunction::new(
                FunctionSpec::new("bootstrap")
                    .param("name", Some("str"))
                    .param("value", None),
                move |interp, args| {
                    let name = args.require(0, "name", "bootstrap")?.to_string();
                    let value = args.require(1, "value", "bootstrap")?.clone();
                    if config.is_reserved(&name) {
                        return Err(ContextError::ReservedName(name).into());
                    }
                    interp.define(&name, value.clone());
                    bootstrap.borrow_mut().insert(name, value);
                    Ok(Value::Nil)
                },
            )),
        );

        let name = target.to_string();
        attrs.insert(
            "name".to_string(),
            Value::native(NativeFunction::new(
                FunctionSpec::new("name").returns("str"),
                move |_, _| Ok(Value::str(&name)),
            )),
        );

        attrs.insert(
            "compile".to_string(),
            Value::native(NativeFunction::new(
                FunctionSpec::new("compile"),
                move |_, _| {
                    let err = match phase.get() {
                        Phase::Compiled => ContextError::AlreadyCompiled,
                        Phase::Ready | Phase::Compiling => ContextError::RecursiveCompile,
                    };
                    Err(err.into())
                },
            )),
        );

        Self { attrs }
    }
}

impl HostObject for CompilerHandle {
    fn type_name(&self) -> String {
        "NamespaceCompiler".to_string()
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.attrs.get(name).cloned()
    }

    fn method(&self, _name: &str) -> Option<Rc<ScriptFunction>> {
        None
    }

    fn attr_names(&self) -> Vec<String> {
        self.attrs.keys().cloned().collect()
    }
}
