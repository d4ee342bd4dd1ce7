//! Runtime configuration with sensible defaults.
//!
//! [`RuntimeConfig`] names the conventions shared by the compiler, runtime,
//! and prompt compiler: which namespace variable holds the facade, which
//! struct declares its type, how hidden regions are marked, and which
//! namespace functions act as hooks. Every field has a default, so a JSON
//! config file only needs to list what it overrides.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Line that opens a hidden region of predefined source.
pub const DEFAULT_HIDDEN_BEGIN: &str = "// <hidden>";
/// Line that closes a hidden region of predefined source.
pub const DEFAULT_HIDDEN_END: &str = "// </hidden>";
/// Prologue that switches annotation checking to deferred mode.
pub const DEFAULT_PROLOGUE: &str = "//! deferred-annotations";
/// Default maximum script call depth.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Configuration for a namespace compiler and the runtime it produces.
///
/// # Example
///
/// ```
/// use codectx::RuntimeConfig;
///
/// let config = RuntimeConfig::default()
///     .with_facade_var("kernel")
///     .with_show_values(true);
/// assert_eq!(config.facade_var, "kernel");
/// assert_eq!(config.facade_type, "Facade");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Namespace variable that holds the facade object. Default: `"os"`.
    pub facade_var: String,
    /// Struct name the predefined source uses to declare the facade type.
    /// Default: `"Facade"`.
    pub facade_type: String,
    /// Marker line opening a hidden region.
    pub hidden_begin: String,
    /// Marker line closing a hidden region.
    pub hidden_end: String,
    /// Deferred-annotation prologue prefixed to module-resolved source.
    pub prologue: String,
    /// Prefix marking implementation-private names. Default: `"_"`.
    pub private_prefix: String,
    /// Namespace function invoked after the predefined source loads.
    pub compile_hook: String,
    /// Namespace function overriding the visible-source prompt part.
    pub source_prompt_hook: String,
    /// Namespace function overriding the symbol-description prompt part.
    pub symbols_prompt_hook: String,
    /// Namespace function overriding the facade prompt part.
    pub facade_prompt_hook: String,
    /// Maximum nested script calls before execution aborts.
    pub max_call_depth: usize,
    /// Print non-scalar values in attribute prompts.
    pub show_values: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            facade_var: "os".to_string(),
            facade_type: "Facade".to_string(),
            hidden_begin: DEFAULT_HIDDEN_BEGIN.to_string(),
            hidden_end: DEFAULT_HIDDEN_END.to_string(),
            prologue: DEFAULT_PROLOGUE.to_string(),
            private_prefix: "_".to_string(),
            compile_hook: "on_compile".to_string(),
            source_prompt_hook: "prompt_source".to_string(),
            symbols_prompt_hook: "prompt_symbols".to_string(),
            facade_prompt_hook: "prompt_facade".to_string(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            show_values: false,
        }
    }
}

impl RuntimeConfig {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_facade_var(mut self, name: impl Into<String>) -> Self {
        self.facade_var = name.into();
        self
    }

    pub fn with_facade_type(mut self, name: impl Into<String>) -> Self {
        self.facade_type = name.into();
        self
    }

    /// Replace both hidden-region markers.
    pub fn with_hidden_markers(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.hidden_begin = begin.into();
        self.hidden_end = end.into();
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_show_values(mut self, show: bool) -> Self {
        self.show_values = show;
        self
    }

    /// Names a namespace may not bind through bootstrap values or
    /// persisted properties.
    pub fn is_reserved(&self, name: &str) -> bool {
        name == self.facade_var
            || name == self.compile_hook
            || name.starts_with("__")
            || crate::script::BUILTIN_NAMES.contains(&name)
    }

    /// Whether `source` opts into deferred annotations.
    pub fn is_deferred(&self, source: &str) -> bool {
        starts_with_prologue(source, &self.prologue)
    }
}

/// Whether the first non-blank line of `source` is `prologue`.
pub fn starts_with_prologue(source: &str, prologue: &str) -> bool {
    source
        .lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| line.trim() == prologue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.facade_var, "os");
        assert_eq!(config.hidden_begin, "// <hidden>");
        assert_eq!(config.max_call_depth, 200);
        assert!(!config.show_values);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"facade_var": "kernel", "max_call_depth": 50}"#).unwrap();
        assert_eq!(config.facade_var, "kernel");
        assert_eq!(config.max_call_depth, 50);
        assert_eq!(config.facade_type, "Facade");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(&path, r#"{"show_values": true}"#).unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        assert!(config.show_values);
    }

    #[test]
    fn reserved_names() {
        let config = RuntimeConfig::default();
        assert!(config.is_reserved("os"));
        assert!(config.is_reserved("print"));
        assert!(config.is_reserved("__secret"));
        assert!(!config.is_reserved("base"));
    }

    #[test]
    fn prologue_may_follow_blank_lines() {
        let config = RuntimeConfig::default();
        assert!(config.is_deferred("//! deferred-annotations\nx = 1;"));
        assert!(config.is_deferred("\n  \n  //! deferred-annotations\nx = 1;"));
        assert!(!config.is_deferred("x = 1;\n//! deferred-annotations"));
        assert!(!config.is_deferred(""));
    }
}
