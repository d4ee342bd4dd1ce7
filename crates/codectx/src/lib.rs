//! Code-context execution runtime.
//!
//! `codectx` prepares a namespace for model-generated code and runs that
//! code against it. Live symbols (functions, struct types, host
//! capabilities, plain values) are reflected into a compact, source-like
//! description that goes into the model's prompt; the code the model writes
//! back is executed in the same namespace, with a facade object that hands
//! it injected dependencies and the state persisted from earlier turns.
//!
//! # Getting started
//!
//! ```
//! use codectx::{ContextStore, Execution, NamespaceCompiler, RuntimeConfig, Value};
//! use serde_json::json;
//!
//! let mut store = ContextStore::new();
//! store.define("base", json!(1), Some("Added to every sum.")).unwrap();
//!
//! let runtime = NamespaceCompiler::new(RuntimeConfig::default())
//!     .with_store(store)
//!     .with_source("/// Sum two numbers.\nfn plus(a: int, b: int) -> int { return a + b; }")
//!     .compile("Kernel")
//!     .unwrap();
//!
//! // The prompt shows `plus` and the facade's persisted `base`.
//! let prompt = runtime.prompt().unwrap();
//! assert!(prompt.contains("let base: int = 1;"));
//!
//! // The model's reply runs against the same namespace.
//! let result = runtime
//!     .execute(Execution::call("fn main(os) { return plus(os.base, 2); }", "main").arg("os"))
//!     .unwrap();
//! assert_eq!(result.return_value(), Some(&Value::Int(3)));
//!
//! // The snapshot feeds the next turn's store.
//! let next = result.into_context();
//! assert_eq!(next.property("base").unwrap().value, json!(1));
//! runtime.destroy().unwrap();
//! ```
//!
//! # Where to find things
//!
//! - **Describe a value for a prompt:** [`reflect()`] and the structural
//!   constructors on [`Reflection`]. Host capabilities are described with
//!   [`FunctionSpec`] and [`TypeSpec`].
//! - **Render a prompt from source and reflections:** [`PromptCompiler`],
//!   which also strips hidden regions from predefined source.
//! - **Carry state across turns:** [`ContextStore`] with
//!   [`inject`](ContextStore::inject), [`define`](ContextStore::define), and
//!   [`join`](ContextStore::join).
//! - **Build and run a namespace:** [`NamespaceCompiler`] produces an
//!   [`ExecutionRuntime`]; [`ExecutionRuntime::execute`] returns an
//!   [`ExecutionResult`].
//! - **Supply dependencies and modules:** [`DependencyContainer`] /
//!   [`Container`] and [`ModuleResolver`] / [`ModuleRegistry`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`script`] | Lexer, parser, and interpreter of the embedded language |
//! | [`reflect`] | Reflections, capability descriptors, scopes |
//! | [`prompt`] | Hidden regions, escaping, prompt sections |
//! | [`store`] | Serializable context store |
//! | [`compiler`] | Single-use namespace compiler and its completion hook |
//! | [`runtime`] | Facade, execution, prompt assembly, teardown |
//! | [`container`] | Dependency container |
//! | [`resolver`] | Module source and symbol resolution |

pub mod compiler;
pub mod config;
pub mod container;
pub mod error;
pub mod prompt;
pub mod reflect;
pub mod resolver;
pub mod result;
pub mod runtime;
pub mod script;
pub mod store;

pub use compiler::{CompilerHandle, NamespaceCompiler};
pub use config::RuntimeConfig;
pub use container::{Container, DependencyContainer, FnProvider, Provider};
pub use error::{ContextError, Result, ScriptError};
pub use prompt::PromptCompiler;
pub use reflect::{
    FunctionSpec, Reflection, ReflectionKind, Scope, TypeSpec, reflect, reflect_with,
};
pub use resolver::{ModuleRegistry, ModuleResolver};
pub use result::ExecutionResult;
pub use runtime::{Execution, ExecutionRuntime, Facade};
pub use script::{NativeFunction, Value};
pub use store::{ContextStore, Injection, PersistedProperty};

use schemars::JsonSchema;

// ── Schema generation ──────────────────────────────────────────────

/// JSON Schema of a `schemars::JsonSchema` type as a `serde_json::Value`.
///
/// # Example
///
/// ```
/// use codectx::{ContextStore, json_schema_for};
///
/// let schema = json_schema_for::<ContextStore>();
/// assert_eq!(schema["type"], "object");
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
