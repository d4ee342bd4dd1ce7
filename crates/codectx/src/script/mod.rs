//! Embedded scripting language that predefined and generated code run in.
//!
//! A small brace-delimited, dynamically typed language:
//!
//! ```text
//! //! deferred-annotations
//! use geometry::Point as P;
//!
//! /// Sum two numbers.
//! fn plus(a: int, b: int = 0) -> int {
//!     return a + b;
//! }
//!
//! struct Facade {
//!     base: int = 1,
//!     fn next(self) -> int { return plus(self.base, 1); }
//! }
//! ```
//!
//! Source is tokenized by [`lexer`], parsed into an [`ast`] by [`parser`],
//! and evaluated by an [`Interpreter`] that owns one namespace.

pub mod ast;
pub mod builtins;
pub mod interp;
pub mod lexer;
pub mod output;
pub mod parser;
pub mod value;

pub use builtins::{BUILTIN_MODULE, BUILTIN_NAMES};
pub use interp::Interpreter;
pub use output::{CaptureGuard, OutputChannel};
pub use parser::parse;
pub use value::{
    CallArgs, Env, HostObject, Kind, NativeFunction, Record, ScriptFunction, StructType, Value,
};
