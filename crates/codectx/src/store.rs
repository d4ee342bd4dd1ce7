//! Context store: the serializable slice of namespace state that survives
//! across turns.
//!
//! A store records a module pointer (where predefined source comes from),
//! symbol injections keyed by `module:symbol` path, and persisted
//! properties keyed by name. Stores are built with [`ContextStore::inject`]
//! and [`ContextStore::define`], snapshotted at the end of a turn, and
//! merged at the start of the next with [`ContextStore::join`].
//!
//! The JSON form is a plain nested structure. Untrusted JSON is validated
//! against the schemars-derived schema before it is deserialized.

use crate::error::{ContextError, Result};
use crate::script::Value;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// "Load `alias` from `path`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Injection {
    /// `module:symbol`, or `module.symbol` split at the last dot.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Injection {
    fn split(&self) -> (&str, &str) {
        if let Some((module, symbol)) = self.path.split_once(':') {
            return (module, symbol);
        }
        match self.path.rsplit_once('.') {
            Some((module, symbol)) => (module, symbol),
            None => ("", self.path.as_str()),
        }
    }

    pub fn module(&self) -> &str {
        self.split().0
    }

    pub fn symbol(&self) -> &str {
        self.split().1
    }

    /// Name the symbol is bound to in the namespace.
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.symbol())
    }
}

/// A named value carried across turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersistedProperty {
    pub name: String,
    /// Plain data: scalars, lists, and mappings.
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Struct type the value is rebuilt as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContextStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module: Option<String>,
    #[serde(default)]
    injections: Vec<Injection>,
    #[serde(default)]
    properties: Vec<PersistedProperty>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose predefined source is the module at `module`.
    pub fn for_module(module: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            ..Self::default()
        }
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn set_module(&mut self, module: impl Into<String>) {
        self.module = Some(module.into());
    }

    pub fn injections(&self) -> &[Injection] {
        &self.injections
    }

    pub fn properties(&self) -> &[PersistedProperty] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PersistedProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.module.is_none() && self.injections.is_empty() && self.properties.is_empty()
    }

    /// Record "load `alias` from `path`". A path injected before is
    /// replaced in place.
    pub fn inject(&mut self, path: impl Into<String>, alias: Option<&str>) -> &mut Self {
        let injection = Injection {
            path: path.into(),
            alias: alias.map(str::to_string),
        };
        debug!("[store] inject {} as {}", injection.path, injection.name());
        upsert(&mut self.injections, injection, |a, b| a.path == b.path);
        self
    }

    /// Record a persisted property. A property defined before is replaced
    /// in place.
    pub fn define(
        &mut self,
        name: &str,
        value: serde_json::Value,
        doc: Option<&str>,
    ) -> Result<&mut Self> {
        self.define_property(PersistedProperty {
            name: name.to_string(),
            value,
            doc: doc.map(str::to_string),
            model: None,
        })
    }

    /// Record a persisted property from a script value. Records are reduced
    /// to their fields and tagged with their struct name.
    pub fn define_value(&mut self, name: &str, value: &Value, doc: Option<&str>) -> Result<&mut Self> {
        let json = value.to_json().map_err(|reason| ContextError::NotSerializable {
            name: name.to_string(),
            reason,
        })?;
        let model = match value {
            Value::Record(record) => Some(record.borrow().ty.name().to_string()),
            _ => None,
        };
        self.define_property(PersistedProperty {
            name: name.to_string(),
            value: json,
            doc: doc.map(str::to_string),
            model,
        })
    }

    pub fn define_property(&mut self, property: PersistedProperty) -> Result<&mut Self> {
        check_name(&property.name)?;
        debug!("[store] define {}", property.name);
        upsert(&mut self.properties, property, |a, b| a.name == b.name);
        Ok(self)
    }

    /// A new store: a copy of `self` overlaid with `other`. `other`'s
    /// module pointer wins if set; its injections and properties replace
    /// same-keyed entries in place and are appended otherwise. Neither
    /// operand changes.
    pub fn join(&self, other: &ContextStore) -> ContextStore {
        let mut joined = self.clone();
        if let Some(module) = &other.module {
            joined.module = Some(module.clone());
        }
        for injection in &other.injections {
            upsert(&mut joined.injections, injection.clone(), |a, b| a.path == b.path);
        }
        for property in &other.properties {
            upsert(&mut joined.properties, property.clone(), |a, b| a.name == b.name);
        }
        joined
    }

    // ── JSON ───────────────────────────────────────────────────────

    /// JSON schema of the serialized form.
    pub fn schema() -> serde_json::Value {
        crate::json_schema_for::<ContextStore>()
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate untrusted store JSON.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        let schema = Self::schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| ContextError::InvalidStore(format!("bad store schema: {e}")))?;
        let errors: Vec<String> = validator
            .iter_errors(&json)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(ContextError::InvalidStore(errors.join("; ")));
        }
        let store: Self = serde_json::from_value(json)?;
        for property in &store.properties {
            check_name(&property.name)?;
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) {
    match items.iter_mut().find(|existing| same(existing, &item)) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

/// Property names must be identifiers and must not use the `__` prefix.
fn check_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if !valid || name.starts_with("__") {
        return Err(ContextError::ReservedName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Interpreter;
    use serde_json::json;

    fn store(props: &[(&str, serde_json::Value)]) -> ContextStore {
        let mut store = ContextStore::new();
        for (name, value) in props {
            store.define(name, value.clone(), None).unwrap();
        }
        store
    }

    #[test]
    fn join_with_empty_is_identity() {
        let mut a = store(&[("x", json!(1))]);
        a.inject("tools:search", None).set_module("agent.base");
        assert_eq!(a.join(&ContextStore::new()), a);
    }

    #[test]
    fn join_unions_keys_and_later_wins() {
        let a = store(&[("x", json!(1)), ("y", json!(2))]);
        let b = store(&[("y", json!(20)), ("z", json!(30))]);
        let joined = a.join(&b);
        let names: Vec<&str> = joined.properties().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
        assert_eq!(joined.property("y").unwrap().value, json!(20));
        // Operands are untouched.
        assert_eq!(a.property("y").unwrap().value, json!(2));
        assert!(b.property("x").is_none());
    }

    #[test]
    fn join_overlays_module_only_when_set() {
        let a = ContextStore::for_module("base");
        assert_eq!(a.join(&ContextStore::new()).module(), Some("base"));
        assert_eq!(a.join(&ContextStore::for_module("other")).module(), Some("other"));
    }

    #[test]
    fn inject_dedupes_by_path() {
        let mut store = ContextStore::new();
        store.inject("tools:search", None);
        store.inject("tools.fetch", Some("get"));
        store.inject("tools:search", Some("find"));
        assert_eq!(store.injections().len(), 2);
        assert_eq!(store.injections()[0].name(), "find");
        assert_eq!(store.injections()[1].module(), "tools");
        assert_eq!(store.injections()[1].symbol(), "fetch");
    }

    #[test]
    fn injection_path_splitting() {
        let colon = Injection {
            path: "pkg.mod:sym".into(),
            alias: None,
        };
        assert_eq!((colon.module(), colon.symbol()), ("pkg.mod", "sym"));
        let dotted = Injection {
            path: "pkg.mod.sym".into(),
            alias: None,
        };
        assert_eq!((dotted.module(), dotted.symbol()), ("pkg.mod", "sym"));
    }

    #[test]
    fn reserved_and_invalid_names_are_rejected() {
        let mut store = ContextStore::new();
        assert!(matches!(
            store.define("__dunder", json!(1), None),
            Err(ContextError::ReservedName(_))
        ));
        assert!(matches!(
            store.define("not a name", json!(1), None),
            Err(ContextError::ReservedName(_))
        ));
        assert!(store.define("_private", json!(1), None).is_ok());
    }

    #[test]
    fn define_value_tags_records() {
        let mut interp = Interpreter::new("test");
        interp.run("struct Point { x: int = 1, y: int = 2 }").unwrap();
        let point = interp.eval("Point(y: 5)").unwrap();
        let mut store = ContextStore::new();
        store.define_value("origin", &point, Some("Start.")).unwrap();
        let prop = store.property("origin").unwrap();
        assert_eq!(prop.value, json!({"x": 1, "y": 5}));
        assert_eq!(prop.model.as_deref(), Some("Point"));
        assert_eq!(prop.doc.as_deref(), Some("Start."));
    }

    #[test]
    fn define_value_rejects_functions() {
        let mut interp = Interpreter::new("test");
        let f = interp.eval("fn f() {}\nf").unwrap();
        let mut store = ContextStore::new();
        assert!(matches!(
            store.define_value("f", &f, None),
            Err(ContextError::NotSerializable { .. })
        ));
    }

    #[test]
    fn json_validation_rejects_malformed_stores() {
        let err = ContextStore::from_json_str(r#"{"properties": "nope"}"#).unwrap_err();
        assert!(matches!(err, ContextError::InvalidStore(_)));
        let err = ContextStore::from_json_str(r#"{"properties": [{"name": "__x", "value": 1}]}"#)
            .unwrap_err();
        assert!(matches!(err, ContextError::ReservedName(_)));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let mut original = store(&[("base", json!(1)), ("tags", json!(["a", {"k": null}]))]);
        original.inject("tools:search", Some("find")).set_module("agent");
        original.save(&path).unwrap();
        assert_eq!(ContextStore::load(&path).unwrap(), original);
    }
}
