//! Execution runtime: the compiled namespace plus its facade.
//!
//! The facade is the object generated code reaches through the facade
//! variable (`os` by default). It is built on first use by layering, from
//! lowest to highest precedence:
//!
//! 1. dependency-container instances for typed facade fields without a
//!    default,
//! 2. the facade struct's field defaults,
//! 3. symbols injected by the context store,
//! 4. bootstrap values,
//! 5. persisted properties.
//!
//! [`ExecutionRuntime::execute`] runs one turn under an output capture and
//! returns the turn's value, the captured output, and a snapshot of the
//! persisted properties. Turns never nest.

use crate::config::RuntimeConfig;
use crate::container::DependencyContainer;
use crate::error::{ContextError, Result, ScriptError};
use crate::prompt::{PromptCompiler, Sections, describe, substitute_struct_name};
use crate::reflect::{Reflection, reflect, reflect_with};
use crate::resolver::ModuleResolver;
use crate::result::ExecutionResult;
use crate::script::{
    CallArgs, HostObject, Interpreter, ScriptFunction, StructType, Value,
};
use crate::store::{ContextStore, Injection, PersistedProperty};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ── Execution request ──────────────────────────────────────────────

/// One turn of generated code.
///
/// The code runs in the namespace, then `target` is either read back as a
/// value or called with the namespace values named by
/// [`arg`](Self::arg) and [`kwarg`](Self::kwarg).
#[derive(Debug, Clone)]
pub struct Execution {
    code: String,
    target: String,
    args: Vec<String>,
    kwargs: Vec<String>,
    call: bool,
}

impl Execution {
    /// Run `code`, then return the value bound to `target`.
    pub fn read(code: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            target: target.into(),
            args: Vec::new(),
            kwargs: Vec::new(),
            call: false,
        }
    }

    /// Run `code`, then call `target`.
    pub fn call(code: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            call: true,
            ..Self::read(code, target)
        }
    }

    /// Pass the namespace value `name` positionally.
    pub fn arg(mut self, name: impl Into<String>) -> Self {
        self.args.push(name.into());
        self.call = true;
        self
    }

    /// Pass the namespace value `name` as the keyword argument `name`.
    pub fn kwarg(mut self, name: impl Into<String>) -> Self {
        self.kwargs.push(name.into());
        self.call = true;
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_call(&self) -> bool {
        self.call
    }
}

// ── Facade ─────────────────────────────────────────────────────────

/// The object generated code reaches through the facade variable.
///
/// Attributes are writable, so turns can update persisted properties with
/// `os.name = value;`. Methods come from the facade struct, if the
/// predefined source declares one.
pub struct Facade {
    name: String,
    ty: Option<Rc<StructType>>,
    attrs: RefCell<IndexMap<String, Value>>,
}

impl Facade {
    /// Display name: the runtime's compile target.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }
}

impl HostObject for Facade {
    fn type_name(&self) -> String {
        self.name.clone()
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn set_attr(&self, name: &str, value: Value) -> std::result::Result<(), ScriptError> {
        self.attrs.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    fn method(&self, name: &str) -> Option<Rc<ScriptFunction>> {
        self.ty.as_ref().and_then(|ty| ty.method(name))
    }

    fn attr_names(&self) -> Vec<String> {
        self.attrs.borrow().keys().cloned().collect()
    }
}

// ── Runtime ────────────────────────────────────────────────────────

/// Everything a compiler hands to the runtime it produces.
pub(crate) struct RuntimeParts {
    pub config: RuntimeConfig,
    pub name: String,
    pub interp: Interpreter,
    pub container: Rc<dyn DependencyContainer>,
    pub store: ContextStore,
    pub bootstrap: IndexMap<String, Value>,
    pub natives: Vec<Value>,
    pub symbols: Vec<Reflection>,
    pub source: String,
    pub resolver: Option<Rc<dyn ModuleResolver>>,
}

/// Namespace state released by [`ExecutionRuntime::destroy`].
struct Live {
    interp: Interpreter,
    resolver: Option<Rc<dyn ModuleResolver>>,
    bootstrap: IndexMap<String, Value>,
    natives: Vec<Value>,
}

/// Resets the executing flag when a turn ends, however it ends.
struct Turn<'a>(&'a Cell<bool>);

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct ExecutionRuntime {
    config: RuntimeConfig,
    name: String,
    source: String,
    store: ContextStore,
    symbols: Vec<Reflection>,
    live: RefCell<Option<Live>>,
    container: RefCell<Option<Rc<dyn DependencyContainer>>>,
    facade: RefCell<Option<Rc<Facade>>>,
    /// Persisted properties that could not be rebuilt and were restored
    /// as nil.
    degraded: RefCell<HashSet<String>>,
    executing: Cell<bool>,
    destroyed: Cell<bool>,
}

impl ExecutionRuntime {
    pub(crate) fn new(parts: RuntimeParts) -> Self {
        Self {
            config: parts.config,
            name: parts.name,
            source: parts.source,
            store: parts.store,
            symbols: parts.symbols,
            live: RefCell::new(Some(Live {
                interp: parts.interp,
                resolver: parts.resolver,
                bootstrap: parts.bootstrap,
                natives: parts.natives,
            })),
            container: RefCell::new(Some(parts.container)),
            facade: RefCell::new(None),
            degraded: RefCell::new(HashSet::new()),
            executing: Cell::new(false),
            destroyed: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Full predefined source, hidden regions included.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The store the runtime was compiled from.
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.get()
    }

    /// The runtime's dependency scope, until the runtime is destroyed.
    pub fn container(&self) -> Option<Rc<dyn DependencyContainer>> {
        self.container.borrow().clone()
    }

    /// A namespace global. `None` while a turn is running.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let live = self.live.try_borrow().ok()?;
        live.as_ref()?.interp.get(name)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.get() {
            return Err(ContextError::Destroyed(self.name.clone()));
        }
        Ok(())
    }

    fn with_live<R>(&self, f: impl FnOnce(&mut Live) -> Result<R>) -> Result<R> {
        let mut slot = self
            .live
            .try_borrow_mut()
            .map_err(|_| ContextError::AlreadyExecuting)?;
        let live = slot
            .as_mut()
            .ok_or_else(|| ContextError::Destroyed(self.name.clone()))?;
        f(live)
    }

    // ── Facade ─────────────────────────────────────────────────────

    /// The facade object, built on first access and bound to the facade
    /// variable.
    pub fn facade(&self) -> Result<Value> {
        let facade: Rc<dyn HostObject> = self.facade_handle()?;
        Ok(Value::Object(facade))
    }

    fn facade_handle(&self) -> Result<Rc<Facade>> {
        self.ensure_alive()?;
        if let Some(facade) = self.facade.borrow().as_ref() {
            return Ok(facade.clone());
        }
        let facade = self.with_live(|live| self.build_facade(live))?;
        *self.facade.borrow_mut() = Some(facade.clone());
        Ok(facade)
    }

    fn build_facade(&self, live: &mut Live) -> Result<Rc<Facade>> {
        let interp = &mut live.interp;
        let ty = match interp.get(&self.config.facade_type) {
            Some(Value::Type(ty)) => Some(ty),
            _ => None,
        };
        let mut attrs = IndexMap::new();

        if let Some(ty) = &ty {
            let container = self.container.borrow().clone();
            for field in ty.fields() {
                let default = interp
                    .field_default(ty, &field)
                    .map_err(ScriptError::into_context)?;
                let value = match default {
                    Some(value) => value,
                    None => field
                        .ty
                        .as_ref()
                        .and_then(|t| container.as_ref()?.get(&t.name))
                        .unwrap_or_else(|| {
                            debug!("[facade] {}: field `{}` left unset", self.name, field.name);
                            Value::Nil
                        }),
                };
                attrs.insert(field.name.clone(), value);
            }
        }

        for injection in self.store.injections() {
            let value = resolve_injection(live.resolver.as_deref(), injection)?;
            interp.define(injection.name(), value.clone());
            attrs.insert(injection.name().to_string(), value);
        }

        for (name, value) in &live.bootstrap {
            attrs.insert(name.clone(), value.clone());
        }

        for property in self.store.properties() {
            let value = self.restore(interp, property);
            attrs.insert(property.name.clone(), value);
        }

        debug!("[facade] {}: {} attribute(s)", self.name, attrs.len());
        let facade = Rc::new(Facade {
            name: self.name.clone(),
            ty,
            attrs: RefCell::new(attrs),
        });
        let object: Rc<dyn HostObject> = facade.clone();
        interp.define(&self.config.facade_var, Value::Object(object));
        Ok(facade)
    }

    /// Rebuild a persisted property. A model tag that names no persistable
    /// struct, or data the struct rejects, degrades to nil.
    fn restore(&self, interp: &mut Interpreter, property: &PersistedProperty) -> Value {
        let Some(model) = &property.model else {
            return Value::from_json(&property.value);
        };
        if property.value.is_null() {
            return Value::Nil;
        }
        let ty = match interp.get(model) {
            Some(Value::Type(ty)) if is_persistable(&Value::Type(ty.clone()), model) => ty,
            _ => {
                return self.degrade(property, &format!("model `{model}` not found"));
            }
        };
        let serde_json::Value::Object(entries) = &property.value else {
            return self.degrade(property, &format!("data for `{model}` is not an object"));
        };
        let args = CallArgs {
            positional: Vec::new(),
            keyword: entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        };
        match interp.construct(&ty, args) {
            Ok(value) => value,
            Err(e) => self.degrade(property, &e.to_string()),
        }
    }

    fn degrade(&self, property: &PersistedProperty, reason: &str) -> Value {
        warn!(
            "[facade] {}: property `{}` restored as nil: {reason}",
            self.name, property.name
        );
        self.degraded.borrow_mut().insert(property.name.clone());
        Value::Nil
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Run one turn.
    ///
    /// Fails with [`ContextError::AlreadyExecuting`] when called while
    /// another turn is running, and with [`ContextError::Execution`] when
    /// the code fails; that error carries the output captured so far.
    pub fn execute(&self, request: Execution) -> Result<ExecutionResult> {
        self.ensure_alive()?;
        if self.executing.replace(true) {
            return Err(ContextError::AlreadyExecuting);
        }
        let _turn = Turn(&self.executing);
        let facade = self.facade_handle()?;
        debug!("[execute] {}: running `{}`", self.name, request.target);

        self.with_live(|live| {
            let guard = live.interp.output().capture()?;
            let started = Instant::now();
            let outcome = run_turn(&mut live.interp, &request);
            let output = guard.finish();
            let elapsed = started.elapsed();
            let context = self.snapshot(&facade);
            match outcome {
                Ok(value) => {
                    info!(
                        "[execute] {}: `{}` finished in {elapsed:?}",
                        self.name, request.target
                    );
                    Ok(ExecutionResult::new(value, output, context?, elapsed))
                }
                Err(source) => {
                    warn!("[execute] {}: `{}` failed: {source}", self.name, request.target);
                    Err(ContextError::Execution {
                        target: request.target.clone(),
                        source,
                        output,
                        context: context.ok().map(Box::new),
                    })
                }
            }
        })
    }

    /// The input store with every persisted property replaced by the
    /// facade's current value. Values that can no longer be serialized
    /// keep their previous data. A record tags the property with its own
    /// type; any other value keeps the property's recorded model, so plain
    /// data assigned to a modeled property is rebuilt as that model.
    fn snapshot(&self, facade: &Facade) -> Result<ContextStore> {
        let mut snapshot = self.store.clone();
        let degraded = self.degraded.borrow();
        for property in self.store.properties() {
            let current = facade.get(&property.name).unwrap_or(Value::Nil);
            if current.is_nil() && degraded.contains(&property.name) {
                continue;
            }
            let value = match current.to_json() {
                Ok(value) => value,
                Err(reason) => {
                    warn!(
                        "[execute] {}: property `{}` kept its previous value: {reason}",
                        self.name, property.name
                    );
                    continue;
                }
            };
            let model = match &current {
                Value::Record(record) => Some(record.borrow().ty.name().to_string()),
                _ => property.model.clone(),
            };
            snapshot.define_property(PersistedProperty {
                name: property.name.clone(),
                value,
                doc: property.doc.clone(),
                model,
            })?;
        }
        Ok(snapshot)
    }

    // ── Prompt ─────────────────────────────────────────────────────

    /// The prompt for this namespace: visible predefined source, symbol
    /// descriptions, and the facade. Each part can be replaced by a
    /// namespace hook (`prompt_source`, `prompt_symbols`, `prompt_facade`
    /// by default) that receives the generated text.
    pub fn prompt(&self) -> Result<String> {
        let facade = self.facade_handle()?;
        let compiler = PromptCompiler::from_config(&self.config);
        self.with_live(|live| {
            let source = compiler.visible_source(&self.source);
            let symbols = compiler.escape(&describe(&self.symbol_reflections(live)?));
            let facade_text = compiler.escape(&self.facade_prompt(live, &facade));

            let interp = &mut live.interp;
            let mut sections = Sections::new();
            sections.push(apply_hook(interp, &self.config.source_prompt_hook, source)?);
            sections.push(apply_hook(interp, &self.config.symbols_prompt_hook, symbols)?);
            sections.push(apply_hook(interp, &self.config.facade_prompt_hook, facade_text)?);
            Ok(sections.build())
        })
    }

    /// Injected symbols, then host functions, then extra symbols.
    fn symbol_reflections(&self, live: &Live) -> Result<Vec<Reflection>> {
        let mut out = Vec::new();
        for injection in self.store.injections() {
            let value = resolve_injection(live.resolver.as_deref(), injection)?;
            let reflection =
                reflect_with(&value, Some(injection.name()), self.config.show_values)?;
            if let Some(reflection) = reflection {
                out.push(reflection.with_origin(injection.module(), injection.symbol()));
            }
        }
        for native in &live.natives {
            if let Some(reflection) = reflect_with(native, None, self.config.show_values)? {
                out.push(reflection);
            }
        }
        out.extend(self.symbols.iter().cloned());
        Ok(out)
    }

    /// The facade struct under the runtime's name, followed by an `impl`
    /// block listing bootstrap values and persisted properties.
    fn facade_prompt(&self, live: &Live, facade: &Facade) -> String {
        let mut sections = Sections::new();
        match &facade.ty {
            Some(ty) => sections.push(
                substitute_struct_name(&ty.decl.source, ty.name(), &self.name)
                    .unwrap_or_else(|| ty.decl.source.clone()),
            ),
            None => sections.push(format!("struct {} {{}}", self.name)),
        }

        let names = live
            .bootstrap
            .keys()
            .chain(self.store.properties().iter().map(|p| &p.name));
        let mut seen = HashSet::new();
        let mut lines = Vec::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let value = facade.get(name).unwrap_or(Value::Nil);
            let reflection = self.facade_attribute(&live.interp, name, &value);
            for line in reflection.prompt().lines() {
                lines.push(format!("    {line}"));
            }
        }
        if !lines.is_empty() {
            sections.push(format!("impl {} {{\n{}\n}}", self.name, lines.join("\n")));
        }
        sections.build()
    }

    fn facade_attribute(&self, interp: &Interpreter, name: &str, value: &Value) -> Reflection {
        let property = self.store.property(name);
        let missing_model = property
            .and_then(|p| p.model.as_deref())
            .filter(|model| !matches!(interp.get(model), Some(Value::Type(_))));
        let hint = match missing_model {
            Some(model) => format!("{model:?}"),
            None => value.type_name(),
        };
        let shown = (self.config.show_values || value.is_scalar()).then(|| value.repr());
        let reflection = Reflection::attribute(name, Some(&hint), shown);
        match property.and_then(|p| p.doc.as_deref()) {
            Some(doc) => reflection.with_doc(doc),
            None => reflection,
        }
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Release the namespace, the facade, and the dependency scope. Every
    /// later call fails with [`ContextError::Destroyed`]; destroying twice
    /// is a no-op.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.get() {
            return Ok(());
        }
        if self.executing.get() {
            return Err(ContextError::AlreadyExecuting);
        }
        self.teardown();
        info!("[runtime] {}: destroyed", self.name);
        Ok(())
    }

    fn teardown(&self) {
        self.destroyed.set(true);
        if let Some(facade) = self.facade.borrow_mut().take() {
            facade.attrs.borrow_mut().clear();
        }
        if let Ok(mut slot) = self.live.try_borrow_mut() {
            if let Some(mut live) = slot.take() {
                live.interp.teardown();
                live.bootstrap.clear();
                live.natives.clear();
            }
        }
        if let Some(container) = self.container.borrow_mut().take() {
            container.clear();
        }
        self.degraded.borrow_mut().clear();
    }
}

impl Drop for ExecutionRuntime {
    fn drop(&mut self) {
        if !self.destroyed.get() {
            warn!("[runtime] {}: dropped without destroy()", self.name);
            self.teardown();
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn resolve_injection(
    resolver: Option<&dyn ModuleResolver>,
    injection: &Injection,
) -> Result<Value> {
    let resolver =
        resolver.ok_or_else(|| ContextError::ModuleResolution(injection.module().to_string()))?;
    resolver.resolve_symbol(injection.module(), injection.symbol())
}

fn is_persistable(candidate: &Value, model: &str) -> bool {
    matches!(reflect(candidate, Some(model)), Ok(Some(r)) if r.is_persistable())
}

fn run_turn(interp: &mut Interpreter, request: &Execution) -> std::result::Result<Value, ScriptError> {
    interp.run(&request.code)?;
    let target = lookup(interp, &request.target)?;
    if !request.call {
        return Ok(target);
    }
    let mut args = CallArgs::default();
    for name in &request.args {
        args.positional.push(lookup(interp, name)?);
    }
    for name in &request.kwargs {
        args.keyword.push((name.clone(), lookup(interp, name)?));
    }
    interp.call(&target, args)
}

fn lookup(interp: &Interpreter, name: &str) -> std::result::Result<Value, ScriptError> {
    interp
        .get(name)
        .ok_or_else(|| ScriptError::Undefined(name.to_string()))
}

/// Pass `default` through the namespace function `hook`, if one is
/// defined. A hook returning nil keeps the default.
fn apply_hook(interp: &mut Interpreter, hook: &str, default: String) -> Result<String> {
    let Some(callee) = interp.get(hook).filter(Value::is_callable) else {
        return Ok(default);
    };
    let args = match &callee {
        Value::Function(function) if function.decl.params.is_empty() => CallArgs::default(),
        _ => CallArgs::positional(vec![Value::str(&default)]),
    };
    debug!("[prompt] {}: applying {hook}", interp.name());
    let value = interp
        .call(&callee, args)
        .map_err(ScriptError::into_context)?;
    Ok(if value.is_nil() {
        default
    } else {
        value.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::NamespaceCompiler;
    use crate::container::Container;
    use crate::reflect::FunctionSpec;
    use crate::resolver::ModuleRegistry;
    use crate::script::NativeFunction;
    use serde_json::json;

    fn compile(source: &str) -> ExecutionRuntime {
        NamespaceCompiler::new(RuntimeConfig::default())
            .with_source(source)
            .compile("kernel")
            .unwrap()
    }

    #[test]
    fn read_returns_the_named_value() {
        let runtime = compile("");
        let result = runtime
            .execute(Execution::read("answer = 6 * 7;", "answer"))
            .unwrap();
        assert_eq!(result.return_value(), Some(&Value::Int(42)));
        runtime.destroy().unwrap();
    }

    #[test]
    fn call_passes_namespace_values() {
        let runtime = compile("");
        let result = runtime
            .execute(
                Execution::call("let value = 42;\nfn f(x) { return x + 1; }", "f").arg("value"),
            )
            .unwrap();
        assert_eq!(result.return_value(), Some(&Value::Int(43)));
        runtime.destroy().unwrap();
    }

    #[test]
    fn output_is_captured_per_turn() {
        let runtime = compile("");
        let result = runtime
            .execute(Execution::read("print(\"hi\");\nx = 1;", "x"))
            .unwrap();
        assert_eq!(result.output(), "hi\n");
        let result = runtime.execute(Execution::read("x = 2;", "x")).unwrap();
        assert_eq!(result.output(), "");
        runtime.destroy().unwrap();
    }

    #[test]
    fn failures_carry_output_and_context() {
        let runtime = compile("");
        let err = runtime
            .execute(Execution::call("print(\"before\");\nfn f() { return 1 / 0; }", "f"))
            .unwrap_err();
        let ContextError::Execution {
            output, context, ..
        } = err
        else {
            panic!("expected an execution error");
        };
        assert_eq!(output, "before\n");
        assert!(context.is_some());
        assert!(!runtime.is_executing());
        runtime.destroy().unwrap();
    }

    #[test]
    fn facade_layers_by_precedence() {
        let source = "//! deferred-annotations\nstruct Facade {\n    clock: Clock,\n    limit: int = 1,\n    label: str = \"default\",\n    base: int = 0,\n}";
        let parent = Container::new();
        parent.set("Clock", Value::Int(99));
        let mut store = ContextStore::new();
        store.define("base", json!(5), None).unwrap();
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_source(source)
            .with_container(parent)
            .with_store(store)
            .with_bootstrap("label", Value::str("boot"))
            .with_bootstrap("base", Value::Int(2))
            .compile("kernel")
            .unwrap();
        let Value::Object(facade) = runtime.facade().unwrap() else {
            panic!("expected facade object");
        };
        assert_eq!(facade.type_name(), "kernel");
        assert_eq!(facade.get_attr("clock"), Some(Value::Int(99)));
        assert_eq!(facade.get_attr("limit"), Some(Value::Int(1)));
        assert_eq!(facade.get_attr("label"), Some(Value::str("boot")));
        assert_eq!(facade.get_attr("base"), Some(Value::Int(5)));
        runtime.destroy().unwrap();
    }

    #[test]
    fn facade_methods_bind_self() {
        let source = "struct Facade {\n    base: int = 10,\n    fn bump(self, by) { self.base = self.base + by; return self.base; }\n}";
        let runtime = compile(source);
        let result = runtime
            .execute(Execution::read("r = os.bump(5);", "r"))
            .unwrap();
        assert_eq!(result.return_value(), Some(&Value::Int(15)));
        runtime.destroy().unwrap();
    }

    #[test]
    fn snapshot_tracks_property_updates() {
        let mut store = ContextStore::new();
        store.define("count", json!(1), Some("Turns so far.")).unwrap();
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_store(store)
            .compile("kernel")
            .unwrap();
        let result = runtime
            .execute(Execution::read("os.count = os.count + 1;\nc = os.count;", "c"))
            .unwrap();
        let property = result.context().property("count").unwrap();
        assert_eq!(property.value, json!(2));
        assert_eq!(property.doc.as_deref(), Some("Turns so far."));
        runtime.destroy().unwrap();
    }

    #[test]
    fn unserializable_updates_keep_the_previous_value() {
        let mut store = ContextStore::new();
        store.define("count", json!(1), None).unwrap();
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_store(store)
            .compile("kernel")
            .unwrap();
        let result = runtime
            .execute(Execution::read("fn f() {}\nos.count = f;", "f"))
            .unwrap();
        assert_eq!(result.context().property("count").unwrap().value, json!(1));
        runtime.destroy().unwrap();
    }

    #[test]
    fn records_round_trip_through_their_model() {
        let source = "struct Point { x: int = 0, y: int = 0 }";
        let mut store = ContextStore::new();
        store
            .define_property(PersistedProperty {
                name: "origin".into(),
                value: json!({"x": 1, "y": 2}),
                doc: None,
                model: Some("Point".into()),
            })
            .unwrap();
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_source(source)
            .with_store(store)
            .compile("kernel")
            .unwrap();
        let result = runtime
            .execute(Execution::read("os.origin.x = 10;\ny = os.origin.y;", "y"))
            .unwrap();
        assert_eq!(result.return_value(), Some(&Value::Int(2)));
        let property = result.context().property("origin").unwrap();
        assert_eq!(property.value, json!({"x": 10, "y": 2}));
        assert_eq!(property.model.as_deref(), Some("Point"));
        runtime.destroy().unwrap();
    }

    #[test]
    fn self_building_facade_defaults_fail_cleanly() {
        let runtime = NamespaceCompiler::new(RuntimeConfig::default().with_max_call_depth(16))
            .with_source("struct Facade { inner: Facade? = Facade() }")
            .compile("kernel")
            .unwrap();
        let err = runtime.facade().unwrap_err();
        assert!(err.to_string().contains("maximum call depth"), "{err}");
        runtime.destroy().unwrap();
    }

    #[test]
    fn plain_data_keeps_the_recorded_model() {
        let source = "struct Point { x: int = 0, y: int = 0, fn sum(self) -> int { return self.x + self.y; } }";
        let mut store = ContextStore::new();
        store
            .define_property(PersistedProperty {
                name: "origin".into(),
                value: json!({"x": 1, "y": 2}),
                doc: None,
                model: Some("Point".into()),
            })
            .unwrap();
        let first = NamespaceCompiler::new(RuntimeConfig::default())
            .with_source(source)
            .with_store(store.clone())
            .compile("kernel")
            .unwrap();
        let result = first
            .execute(Execution::read("os.origin = {\"x\": 3, \"y\": 4};\ndone = true;", "done"))
            .unwrap();
        let property = result.context().property("origin").unwrap();
        assert_eq!(property.value, json!({"x": 3, "y": 4}));
        assert_eq!(property.model.as_deref(), Some("Point"));
        first.destroy().unwrap();

        let second = NamespaceCompiler::new(RuntimeConfig::default())
            .with_source(source)
            .with_store(store.join(result.context()))
            .compile("kernel")
            .unwrap();
        let result = second
            .execute(Execution::read("s = os.origin.sum();", "s"))
            .unwrap();
        assert_eq!(result.return_value(), Some(&Value::Int(7)));
        second.destroy().unwrap();
    }

    #[test]
    fn cleared_models_restore_as_nil() {
        let mut store = ContextStore::new();
        store
            .define_property(PersistedProperty {
                name: "origin".into(),
                value: serde_json::Value::Null,
                doc: None,
                model: Some("Point".into()),
            })
            .unwrap();
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_source("struct Point { x: int = 0 }")
            .with_store(store)
            .compile("kernel")
            .unwrap();
        let result = runtime
            .execute(Execution::read("o = os.origin;", "o"))
            .unwrap();
        assert_eq!(result.return_value(), None);
        assert!(runtime.degraded.borrow().is_empty());
        runtime.destroy().unwrap();
    }

    #[test]
    fn cyclic_values_print_and_keep_the_previous_snapshot() {
        let mut store = ContextStore::new();
        store.define("items", json!([1]), None).unwrap();
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_store(store)
            .compile("kernel")
            .unwrap();
        let result = runtime
            .execute(Execution::read(
                "xs = [1];\nxs.push(xs);\nprint(xs);\nos.items = xs;",
                "xs",
            ))
            .unwrap();
        assert_eq!(result.output(), "[1, [...]]\n");
        assert_eq!(result.context().property("items").unwrap().value, json!([1]));
        assert!(matches!(
            result.return_json(),
            Err(ContextError::NotSerializable { .. })
        ));
        runtime.destroy().unwrap();
    }

    #[test]
    fn missing_model_degrades_to_nil() {
        let mut store = ContextStore::new();
        store
            .define_property(PersistedProperty {
                name: "origin".into(),
                value: json!({"x": 1}),
                doc: None,
                model: Some("Point".into()),
            })
            .unwrap();
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_store(store)
            .compile("kernel")
            .unwrap();
        let result = runtime
            .execute(Execution::read("o = os.origin;", "o"))
            .unwrap();
        assert_eq!(result.return_value(), None);
        assert_eq!(
            result.context().property("origin").unwrap().value,
            json!({"x": 1})
        );
        assert!(runtime.prompt().unwrap().contains("let origin: \"Point\" = nil;"));
        runtime.destroy().unwrap();
    }

    #[test]
    fn reentrant_execute_is_rejected() {
        let slot: Rc<RefCell<Option<Rc<ExecutionRuntime>>>> = Rc::new(RefCell::new(None));
        let seen: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
        let (inner_slot, inner_seen) = (slot.clone(), seen.clone());
        let reenter = NativeFunction::new(FunctionSpec::new("reenter"), move |_, _| {
            let runtime = inner_slot.borrow().clone();
            if let Some(runtime) = runtime {
                let err = runtime.execute(Execution::read("y = 1;", "y")).err();
                *inner_seen.borrow_mut() = err.map(|e| e.to_string());
            }
            Ok(Value::Nil)
        });
        let runtime = Rc::new(
            NamespaceCompiler::new(RuntimeConfig::default())
                .with_function(reenter)
                .compile("kernel")
                .unwrap(),
        );
        *slot.borrow_mut() = Some(runtime.clone());
        runtime
            .execute(Execution::call("fn go() { reenter(); }", "go"))
            .unwrap();
        assert_eq!(
            seen.borrow().as_deref(),
            Some(ContextError::AlreadyExecuting.to_string().as_str())
        );
        assert!(!runtime.is_executing());
        slot.borrow_mut().take();
        runtime.destroy().unwrap();
    }

    #[test]
    fn injections_resolve_on_the_facade_and_in_the_prompt() {
        let registry = Rc::new(
            ModuleRegistry::new()
                .with_source("tools", "/// Double it.\nfn double(x: int) -> int { return x * 2; }"),
        );
        let mut store = ContextStore::new();
        store.inject("tools:double", Some("twice"));
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_store(store)
            .with_resolver(registry)
            .compile("kernel")
            .unwrap();
        let result = runtime
            .execute(Execution::read("r = twice(4);", "r"))
            .unwrap();
        assert_eq!(result.return_value(), Some(&Value::Int(8)));
        let prompt = runtime.prompt().unwrap();
        assert!(prompt.contains("// use tools::double as twice"));
        assert!(prompt.contains("fn twice(\n    x: int,\n) -> int;"));
        runtime.destroy().unwrap();
    }

    #[test]
    fn unresolvable_injection_fails_the_facade() {
        let mut store = ContextStore::new();
        store.inject("nowhere:thing", None);
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_store(store)
            .with_resolver(Rc::new(ModuleRegistry::new()))
            .compile("kernel")
            .unwrap();
        assert!(matches!(
            runtime.facade(),
            Err(ContextError::ModuleResolution(m)) if m == "nowhere"
        ));
        runtime.destroy().unwrap();
    }

    #[test]
    fn prompt_renders_facade_under_the_runtime_name() {
        let source = "fn plus(a, b) { return a + b; }\n// <hidden>\n/// The kernel.\nstruct Facade {\n    base: int = 0,\n}\n// </hidden>\n";
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_source(source)
            .with_bootstrap("base", Value::Int(1))
            .compile("Kernel")
            .unwrap();
        let prompt = runtime.prompt().unwrap();
        assert_eq!(
            prompt,
            "fn plus(a, b) { return a + b; }\n\n/// The kernel.\nstruct Kernel {\n    base: int = 0,\n}\n\nimpl Kernel {\n    let base: int = 1;\n}"
        );
        runtime.destroy().unwrap();
    }

    #[test]
    fn prompt_hooks_override_parts() {
        let source = "fn prompt_source(text) { return \"// custom\"; }\nfn prompt_facade() { return \"\"; }";
        let runtime = compile(source);
        assert_eq!(runtime.prompt().unwrap(), "// custom");
        runtime.destroy().unwrap();
    }

    #[test]
    fn destroyed_runtimes_reject_calls() {
        let runtime = compile("x = 1;");
        runtime.destroy().unwrap();
        assert!(runtime.is_destroyed());
        assert!(runtime.container().is_none());
        assert!(matches!(
            runtime.execute(Execution::read("", "x")),
            Err(ContextError::Destroyed(_))
        ));
        assert!(matches!(runtime.prompt(), Err(ContextError::Destroyed(_))));
        runtime.destroy().unwrap();
    }
}
