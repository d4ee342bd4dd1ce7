//! Integration tests for the compile → prompt → execute → snapshot cycle.
//!
//! Each test compiles a real namespace from script source and drives it
//! through the public API only.

use std::cell::RefCell;
use std::rc::Rc;

use codectx::{
    Container, ContextError, ContextStore, DependencyContainer, Execution, ExecutionRuntime,
    FunctionSpec, ModuleRegistry, NamespaceCompiler, NativeFunction, PersistedProperty,
    PromptCompiler, RuntimeConfig, TypeSpec, Value, reflect,
};
use serde_json::json;

fn compiler(source: &str) -> NamespaceCompiler {
    NamespaceCompiler::new(RuntimeConfig::default()).with_source(source)
}

// ── Reflection ───────────────────────────────────────────────────────

#[test]
fn reflecting_twice_yields_identical_text() {
    let runtime = compiler("/// Sum.\nfn plus(a: int, b: int = 0) -> int { return a + b; }\nstruct Point { x: int = 0, y: int = 0 }")
        .compile("ns")
        .unwrap();
    for name in ["plus", "Point"] {
        let value = runtime.lookup(name).unwrap();
        let first = reflect(&value, Some(name)).unwrap().unwrap().prompt();
        let second = reflect(&value, Some(name)).unwrap().unwrap().prompt();
        assert_eq!(first, second);
    }
    runtime.destroy().unwrap();
}

#[test]
fn host_capabilities_render_from_their_descriptors() {
    let registry = Rc::new(
        ModuleRegistry::new()
            .with_function(
                "net",
                NativeFunction::new(
                    FunctionSpec::new("fetch")
                        .param("url", Some("str"))
                        .returns("str")
                        .doc("Fetch a page."),
                    |_, args| Ok(args.positional.first().cloned().unwrap_or(Value::Nil)),
                ),
            )
            .with_type(
                "net",
                TypeSpec::new("Client")
                    .doc("HTTP client.")
                    .field("timeout", "int")
                    .method(FunctionSpec::new("close")),
            ),
    );
    let mut store = ContextStore::new();
    store.inject("net:fetch", None).inject("net:Client", None);
    let runtime = NamespaceCompiler::new(RuntimeConfig::default())
        .with_store(store)
        .with_resolver(registry)
        .compile("ns")
        .unwrap();
    let prompt = runtime.prompt().unwrap();
    assert!(prompt.contains("// use net::fetch\n/// Fetch a page.\nfn fetch(\n    url: str,\n) -> str;"));
    assert!(prompt.contains("/// HTTP client.\nstruct Client {\n    timeout: int,\n    fn close();\n}"));
    runtime.destroy().unwrap();
}

// ── Context store ────────────────────────────────────────────────────

#[test]
fn join_with_empty_is_identity_and_later_wins() {
    let mut a = ContextStore::for_module("kernel");
    a.define("x", json!(1), None).unwrap();
    a.define("y", json!(2), None).unwrap();
    a.inject("tools:grep", None);
    assert_eq!(a.join(&ContextStore::new()), a);

    let mut b = ContextStore::new();
    b.define("y", json!(20), None).unwrap();
    b.define("z", json!(30), None).unwrap();
    let joined = a.join(&b);
    let keys: Vec<&str> = joined.properties().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(keys, ["x", "y", "z"]);
    assert_eq!(joined.property("y").unwrap().value, json!(20));
    assert_eq!(joined.module(), Some("kernel"));
    assert_eq!(a.property("y").unwrap().value, json!(2));
}

#[test]
fn store_survives_a_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("context.json");
    let mut store = ContextStore::for_module("kernel");
    store.define("base", json!(1), Some("Base offset.")).unwrap();
    store.save(&path).unwrap();
    assert_eq!(ContextStore::load(&path).unwrap(), store);
}

// ── Hidden regions ───────────────────────────────────────────────────

#[test]
fn hidden_regions_are_omitted_but_loaded() {
    let source = "fn visible() { return secret() + 1; }\n// <hidden>\nfn secret() { return 41; }\n// </hidden>\n";
    let runtime = compiler(source).compile("ns").unwrap();
    let prompt = runtime.prompt().unwrap();
    assert!(!prompt.contains("// <hidden>"));
    assert!(!prompt.contains("return 41"));
    let rendered = PromptCompiler::default().visible_source(source);
    assert_eq!(rendered, "fn visible() { return secret() + 1; }\n");

    let result = runtime
        .execute(Execution::call("", "visible"))
        .unwrap();
    assert_eq!(result.return_value(), Some(&Value::Int(42)));
    runtime.destroy().unwrap();
}

// ── Compiler ─────────────────────────────────────────────────────────

#[test]
fn compile_is_single_use() {
    let compiler = compiler("x = 1;");
    let runtime = compiler.compile("ns").unwrap();
    let err = compiler.compile("ns").err().unwrap();
    assert!(matches!(err, ContextError::AlreadyCompiled));
    assert!(err.is_usage());
    runtime.destroy().unwrap();
}

#[test]
fn completion_hook_cannot_recompile() {
    let compiler = compiler("fn on_compile(compiler) { compiler.compile(); }");
    assert!(matches!(
        compiler.compile("ns"),
        Err(ContextError::RecursiveCompile)
    ));
}

#[test]
fn completion_hook_registers_dependencies_for_the_facade() {
    let source = "//! deferred-annotations\nstruct Facade { clock: Clock }\nstruct Clock { now: int = 0 }\nfn on_compile(compiler) { compiler.set(\"Clock\", Clock(now: 12)); }";
    let parent = Container::new();
    let runtime = compiler(source)
        .with_container(parent.clone())
        .compile("ns")
        .unwrap();
    let result = runtime
        .execute(Execution::read("t = os.clock.now;", "t"))
        .unwrap();
    assert_eq!(result.return_value(), Some(&Value::Int(12)));
    assert!(parent.get("Clock").is_none());
    runtime.destroy().unwrap();
}

// ── Execution ────────────────────────────────────────────────────────

#[test]
fn execute_resolves_argument_names_in_the_namespace() {
    let runtime = compiler("value = 42;\nfn f(x) { return x + 1; }")
        .compile("ns")
        .unwrap();
    let result = runtime
        .execute(Execution::call("", "f").arg("value"))
        .unwrap();
    assert_eq!(result.return_value(), Some(&Value::Int(43)));
    runtime.destroy().unwrap();
}

#[test]
fn keyword_arguments_bind_by_name() {
    let runtime = compiler("fn scale(x, by = 2) { return x * by; }\nx = 5;\nby = 10;")
        .compile("ns")
        .unwrap();
    let result = runtime
        .execute(Execution::call("", "scale").arg("x").kwarg("by"))
        .unwrap();
    assert_eq!(result.return_value(), Some(&Value::Int(50)));
    runtime.destroy().unwrap();
}

#[test]
fn reentrant_execute_is_rejected() {
    let slot: Rc<RefCell<Option<Rc<ExecutionRuntime>>>> = Rc::new(RefCell::new(None));
    let inner = slot.clone();
    let nested = NativeFunction::new(FunctionSpec::new("nested").returns("bool"), move |_, _| {
        let runtime = inner.borrow().clone();
        let rejected = runtime.is_some_and(|runtime| {
            matches!(
                runtime.execute(Execution::read("", "x")),
                Err(ContextError::AlreadyExecuting)
            )
        });
        Ok(Value::Bool(rejected))
    });
    let runtime = Rc::new(compiler("x = 1;").with_function(nested).compile("ns").unwrap());
    *slot.borrow_mut() = Some(runtime.clone());

    let result = runtime
        .execute(Execution::read("r = nested();", "r"))
        .unwrap();
    assert_eq!(result.return_value(), Some(&Value::Bool(true)));

    let again = runtime.execute(Execution::read("", "x")).unwrap();
    assert_eq!(again.return_value(), Some(&Value::Int(1)));
    slot.borrow_mut().take();
    runtime.destroy().unwrap();
}

#[test]
fn execution_errors_keep_output_and_the_namespace_usable() {
    let runtime = compiler("").compile("ns").unwrap();
    let err = runtime
        .execute(Execution::read("print(\"step 1\");\nboom();", "x"))
        .unwrap_err();
    match err {
        ContextError::Execution { output, target, .. } => {
            assert_eq!(output, "step 1\n");
            assert_eq!(target, "x");
        }
        other => panic!("unexpected error: {other}"),
    }
    let result = runtime
        .execute(Execution::read("print(\"step 2\");\nx = 2;", "x"))
        .unwrap();
    assert_eq!(result.output(), "step 2\n");
    runtime.destroy().unwrap();
}

#[test]
fn self_referencing_records_print_and_compare() {
    let runtime = compiler("struct Node { next: Node? = nil }").compile("ns").unwrap();
    let result = runtime
        .execute(Execution::read(
            "n = Node();\nn.next = n;\nprint(n);\nsame = n == n.next;",
            "same",
        ))
        .unwrap();
    assert_eq!(result.output(), "Node(next: Node(...))\n");
    assert_eq!(result.return_value(), Some(&Value::Bool(true)));
    runtime.destroy().unwrap();
}

#[test]
fn runaway_recursion_and_nesting_are_script_errors() {
    let runtime = NamespaceCompiler::new(RuntimeConfig::default().with_max_call_depth(32))
        .compile("ns")
        .unwrap();
    let nested = format!("x = {}1{};", "(".repeat(10_000), ")".repeat(10_000));
    for code in [
        "struct Node { next: Node? = Node() }\nn = Node();".to_string(),
        nested,
    ] {
        let err = runtime.execute(Execution::read(code, "x")).unwrap_err();
        assert!(matches!(err, ContextError::Execution { .. }), "{err}");
    }
    let result = runtime.execute(Execution::read("x = 1;", "x")).unwrap();
    assert_eq!(result.return_value(), Some(&Value::Int(1)));
    runtime.destroy().unwrap();
}

// ── Persisted properties ─────────────────────────────────────────────

#[test]
fn missing_model_restores_as_nil() {
    let mut store = ContextStore::new();
    store
        .define_property(PersistedProperty {
            name: "cursor".into(),
            value: json!({"line": 3}),
            doc: None,
            model: Some("Cursor".into()),
        })
        .unwrap();
    let runtime = NamespaceCompiler::new(RuntimeConfig::default())
        .with_store(store)
        .compile("ns")
        .unwrap();
    let result = runtime
        .execute(Execution::read("c = os.cursor;", "c"))
        .unwrap();
    assert!(result.return_value().is_none());
    runtime.destroy().unwrap();
}

#[test]
fn abstract_models_are_not_rebuilt() {
    let mut store = ContextStore::new();
    store
        .define_property(PersistedProperty {
            name: "shape".into(),
            value: json!({}),
            doc: None,
            model: Some("Shape".into()),
        })
        .unwrap();
    let runtime = NamespaceCompiler::new(RuntimeConfig::default())
        .with_source("abstract struct Shape { fn area(self) -> float; }")
        .with_store(store)
        .compile("ns")
        .unwrap();
    let result = runtime
        .execute(Execution::read("s = os.shape;", "s"))
        .unwrap();
    assert!(result.return_value().is_none());
    runtime.destroy().unwrap();
}

// ── End to end ───────────────────────────────────────────────────────

#[test]
fn end_to_end_plus_main() {
    // Only store properties are snapshotted, so `base` is stored as well as
    // bootstrapped.
    let mut store = ContextStore::new();
    store.define("base", json!(1), None).unwrap();
    let runtime = NamespaceCompiler::new(RuntimeConfig::default())
        .with_source("fn plus(a, b) { return a + b; }")
        .with_store(store.clone())
        .with_bootstrap("base", Value::Int(1))
        .compile("Kernel")
        .unwrap();
    let result = runtime
        .execute(Execution::call("fn main(os) { return plus(os.base, 2); }", "main").arg("os"))
        .unwrap();
    assert_eq!(result.return_value(), Some(&Value::Int(3)));
    assert_eq!(result.return_json().unwrap(), Some(json!(3)));
    assert_eq!(result.context().property("base").unwrap().value, json!(1));
    assert_eq!(result.context(), &store);
    runtime.destroy().unwrap();
}

#[test]
fn bootstrap_values_are_not_persisted() {
    let runtime = NamespaceCompiler::new(RuntimeConfig::default())
        .with_bootstrap("mode", Value::str("fast"))
        .compile("Kernel")
        .unwrap();
    let result = runtime
        .execute(Execution::read("m = os.mode;", "m"))
        .unwrap();
    assert_eq!(result.return_value(), Some(&Value::str("fast")));
    assert!(result.context().property("mode").is_none());
    runtime.destroy().unwrap();
}

#[test]
fn snapshots_feed_the_next_turn() {
    let mut store = ContextStore::new();
    store.define("visits", json!(0), None).unwrap();
    let mut context = store;
    for expected in 1..=3 {
        let runtime = NamespaceCompiler::new(RuntimeConfig::default())
            .with_store(context.clone())
            .compile("ns")
            .unwrap();
        let result = runtime
            .execute(Execution::read("os.visits = os.visits + 1;\nv = os.visits;", "v"))
            .unwrap();
        assert_eq!(result.return_value(), Some(&Value::Int(expected)));
        context = context.join(result.context());
        runtime.destroy().unwrap();
    }
    assert_eq!(context.property("visits").unwrap().value, json!(3));
}

#[test]
fn destroy_releases_the_dependency_scope() {
    let runtime = compiler("").compile("ns").unwrap();
    let scope = runtime.container().unwrap();
    scope.set("Clock", Value::Int(1));
    runtime.destroy().unwrap();
    assert!(scope.get("Clock").is_none());
    assert!(matches!(
        runtime.facade(),
        Err(ContextError::Destroyed(name)) if name == "ns"
    ));
}
