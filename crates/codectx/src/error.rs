//! Error types for the script interpreter and the execution runtime.
//!
//! Two layers:
//!
//! - [`ScriptError`] is raised while lexing, parsing, or evaluating script
//!   code. Host callbacks that fail with a runtime-level error wrap it in
//!   [`ScriptError::Host`] so it survives the trip through the interpreter.
//! - [`ContextError`] is what the public runtime API returns. Usage errors
//!   (calling `compile()` twice, re-entering `execute()`) are caller bugs;
//!   resolution errors can be retried; [`ContextError::Execution`] carries
//!   whatever output and context could be captured before the failure.

use crate::store::ContextStore;

/// Convenience alias used by the runtime-facing API.
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors raised by the embedded script interpreter.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("name `{0}` is not defined")]
    Undefined(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("`{owner}` has no attribute `{name}`")]
    Attribute { owner: String, name: String },

    #[error("`{name}` expects {expected}, got {got} argument(s)")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("{0}")]
    Runtime(String),

    #[error(transparent)]
    Host(Box<ContextError>),
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Unwrap a host error that travelled through the interpreter, so callers
    /// see the original [`ContextError`] instead of a script wrapper.
    pub fn into_context(self) -> ContextError {
        match self {
            Self::Host(inner) => *inner,
            other => ContextError::Script(other),
        }
    }
}

impl From<ContextError> for ScriptError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Script(inner) => inner,
            other => Self::Host(Box::new(other)),
        }
    }
}

/// Errors returned by the compiler, runtime, store, and resolvers.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    // ── Usage errors ───────────────────────────────────────────────
    #[error("namespace compiler has already been used")]
    AlreadyCompiled,

    #[error("compile() was re-entered from the completion hook")]
    RecursiveCompile,

    #[error("runtime is already executing generated code")]
    AlreadyExecuting,

    #[error("name `{0}` is already declared in this scope")]
    NameConflict(String),

    #[error("name `{0}` is reserved")]
    ReservedName(String),

    #[error("a name is required to reflect {0}")]
    NameRequired(String),

    #[error("output capture is already active on this channel")]
    CaptureInProgress,

    #[error("runtime `{0}` has been destroyed")]
    Destroyed(String),

    // ── Resolution errors ──────────────────────────────────────────
    #[error("cannot resolve module `{0}`")]
    ModuleResolution(String),

    #[error("symbol `{symbol}` not found in module `{module}`")]
    SymbolNotFound { module: String, symbol: String },

    #[error("no dependency registered for `{0}`")]
    DependencyNotFound(String),

    // ── Data errors ────────────────────────────────────────────────
    #[error("value of `{name}` is not serializable: {reason}")]
    NotSerializable { name: String, reason: String },

    #[error("invalid context store: {0}")]
    InvalidStore(String),

    // ── Execution errors ───────────────────────────────────────────
    #[error("execution of `{target}` failed: {source}")]
    Execution {
        target: String,
        #[source]
        source: ScriptError,
        /// Console output captured before the failure.
        output: String,
        /// Context snapshot taken after the failure, when one could be built.
        context: Option<Box<ContextStore>>,
    },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ContextError {
    /// Whether retrying the same turn (after fixing inputs) can succeed.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::ModuleResolution(_) | Self::SymbolNotFound { .. } | Self::DependencyNotFound(_)
        )
    }

    /// Whether this error is a caller bug rather than a runtime condition.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCompiled
                | Self::RecursiveCompile
                | Self::AlreadyExecuting
                | Self::NameConflict(_)
                | Self::ReservedName(_)
                | Self::NameRequired(_)
                | Self::CaptureInProgress
                | Self::Destroyed(_)
        )
    }
}
