//! Symbol reflection: live values to renderable descriptions.
//!
//! [`reflect`] classifies a value and captures what a model needs to code
//! against it: a bare import for builtins, the literal source of script
//! structs, a signature for callables, and `name: type = value` for plain
//! attributes. The explicit constructors on [`Reflection`] build the
//! structural variants the compiler uses for curated class stubs,
//! public-method interfaces, and class signs.
//!
//! Host functions and types are described through the capability registry
//! in [`spec`] instead of runtime introspection.

pub mod spec;

pub use spec::{FieldSpec, FunctionSpec, ParamSpec, TypeSpec};

use crate::error::{ContextError, Result, ScriptError};
use crate::prompt::substitute_struct_name;
use crate::script::{BUILTIN_MODULE, StructType, Value};

/// Broad classification of a reflected symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionKind {
    Value,
    Type,
    Callable,
    Import,
}

/// Where a symbol was loaded from: module path plus its original name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub module: String,
    pub name: String,
}

/// Renderable body of a reflection.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Rendered as a `use` line, no body.
    Import,
    /// `let name: type = value;`; the value is omitted when not shown.
    Attribute { value: Option<String> },
    /// Literal defining source of a script struct.
    Source(String),
    /// One-parameter-per-line signature.
    Signature(FunctionSpec),
    /// Class stub with the given fields and methods.
    Stub {
        fields: Vec<FieldSpec>,
        methods: Vec<FunctionSpec>,
    },
    /// Doc plus `struct Name;`.
    Sign,
}

/// A structured, renderable description of a live value.
#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    kind: ReflectionKind,
    name: String,
    doc: Option<String>,
    type_hint: Option<String>,
    origin: Option<Origin>,
    extends: Vec<String>,
    prompt_override: Option<String>,
    body: Body,
    persistable: bool,
}

/// Anything [`reflect`] accepts.
pub enum Subject {
    Reflection(Reflection),
    Value(Value),
}

impl From<Reflection> for Subject {
    fn from(reflection: Reflection) -> Self {
        Self::Reflection(reflection)
    }
}

impl From<Value> for Subject {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&Value> for Subject {
    fn from(value: &Value) -> Self {
        Self::Value(value.clone())
    }
}

/// Reflect a value, optionally under a display name.
///
/// Returns `Ok(None)` for nil without a name. Meta-type references and
/// plain values have no intrinsic name and fail with
/// [`ContextError::NameRequired`] when `name` is omitted.
pub fn reflect(subject: impl Into<Subject>, name: Option<&str>) -> Result<Option<Reflection>> {
    reflect_with(subject, name, false)
}

/// Like [`reflect`]; `show_values` prints non-scalar attribute values too.
pub fn reflect_with(
    subject: impl Into<Subject>,
    name: Option<&str>,
    show_values: bool,
) -> Result<Option<Reflection>> {
    let value = match subject.into() {
        Subject::Reflection(reflection) => {
            return Ok(Some(match name {
                Some(name) => reflection.renamed(name),
                None => reflection,
            }));
        }
        Subject::Value(value) => value,
    };
    let reflection = match &value {
        Value::Nil if name.is_none() => return Ok(None),
        Value::Native(native) if native.builtin => {
            let module = native.spec.module.as_deref().unwrap_or(BUILTIN_MODULE);
            Reflection::import(module, &native.spec.name, name)
        }
        Value::Kind(kind) => {
            let name = name.ok_or_else(|| ContextError::NameRequired(kind.name().to_string()))?;
            Reflection::attribute(name, Some("type"), Some(kind.name().to_string()))
        }
        Value::Type(ty) => Reflection::script_type(ty, name),
        Value::HostType(spec) => {
            let mut reflection = Reflection::stub_of(TypeInfo::from(&**spec), name);
            reflection.persistable = false;
            reflection
        }
        Value::Function(function) => {
            Reflection::function(FunctionSpec::from(&*function.decl), name)
        }
        Value::Native(native) => Reflection::function(native.spec.clone(), name),
        other => {
            let name = name.ok_or_else(|| ContextError::NameRequired(other.repr()))?;
            let shown = (show_values || other.is_scalar()).then(|| other.repr());
            Reflection::attribute(name, Some(&other.type_name()), shown)
        }
    };
    Ok(Some(reflection))
}

// ── Type descriptions ──────────────────────────────────────────────

/// Unified view of a script struct or a host type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub name: String,
    pub doc: Option<String>,
    pub module: Option<String>,
    /// Base chain, nearest first.
    pub extends: Vec<String>,
    pub fields: Vec<FieldSpec>,
    pub methods: Vec<FunctionSpec>,
    pub instantiable: bool,
    /// Literal defining source, for script structs.
    pub source: Option<String>,
}

impl TypeInfo {
    /// Describe a type value; anything else is a type error.
    pub fn of(value: &Value) -> Result<Self> {
        match value {
            Value::Type(ty) => Ok(Self::from(&**ty)),
            Value::HostType(spec) => Ok(Self::from(&**spec)),
            other => Err(ScriptError::type_error(format!("{} is not a type", other.repr())).into()),
        }
    }
}

impl From<&StructType> for TypeInfo {
    fn from(ty: &StructType) -> Self {
        Self {
            name: ty.name().to_string(),
            doc: ty.decl.doc.clone(),
            module: None,
            extends: ty.ancestors(),
            fields: ty.decl.fields.iter().map(FieldSpec::from).collect(),
            methods: ty
                .decl
                .methods
                .iter()
                .map(|m| FunctionSpec::from(&**m))
                .collect(),
            instantiable: !ty.is_abstract(),
            source: Some(ty.decl.source.clone()),
        }
    }
}

impl From<&TypeSpec> for TypeInfo {
    fn from(spec: &TypeSpec) -> Self {
        Self {
            name: spec.name.clone(),
            doc: spec.doc.clone(),
            module: spec.module.clone(),
            extends: spec.extends.clone(),
            fields: spec.fields.clone(),
            methods: spec.methods.clone(),
            instantiable: spec.instantiable,
            source: None,
        }
    }
}

// ── Reflection ─────────────────────────────────────────────────────

impl Reflection {
    fn base(kind: ReflectionKind, name: &str, body: Body) -> Self {
        Self {
            kind,
            name: name.to_string(),
            doc: None,
            type_hint: None,
            origin: None,
            extends: Vec::new(),
            prompt_override: None,
            body,
            persistable: false,
        }
    }

    /// A bare import of `symbol` from `module`, shown under `alias`.
    pub fn import(module: &str, symbol: &str, alias: Option<&str>) -> Self {
        let mut reflection = Self::base(
            ReflectionKind::Import,
            alias.unwrap_or(symbol),
            Body::Import,
        );
        reflection.origin = Some(Origin {
            module: module.to_string(),
            name: symbol.to_string(),
        });
        reflection
    }

    /// A plain attribute; `value` is the rendered value, if shown.
    pub fn attribute(name: &str, type_hint: Option<&str>, value: Option<String>) -> Self {
        let mut reflection = Self::base(ReflectionKind::Value, name, Body::Attribute { value });
        reflection.type_hint = type_hint.map(str::to_string);
        reflection
    }

    /// A callable's signature.
    pub fn function(spec: FunctionSpec, name: Option<&str>) -> Self {
        let display = name.unwrap_or(&spec.name).to_string();
        let mut reflection = Self::base(ReflectionKind::Callable, &display, Body::Signature(spec.clone()));
        reflection.doc = spec.doc.clone();
        reflection.type_hint = spec.returns.clone();
        if let Some(module) = &spec.module {
            reflection.origin = Some(Origin {
                module: module.clone(),
                name: spec.name.clone(),
            });
        }
        reflection
    }

    /// A script struct with its full literal source.
    fn script_type(ty: &StructType, name: Option<&str>) -> Self {
        let info = TypeInfo::from(ty);
        let mut reflection = Self::type_base(&info, name, Body::Source(ty.decl.source.clone()));
        reflection.persistable = ty.is_persistable();
        reflection
    }

    fn type_base(info: &TypeInfo, name: Option<&str>, body: Body) -> Self {
        let mut reflection = Self::base(ReflectionKind::Type, name.unwrap_or(&info.name), body);
        reflection.doc = info.doc.clone();
        reflection.extends = info.extends.clone();
        if let Some(module) = &info.module {
            reflection.origin = Some(Origin {
                module: module.clone(),
                name: info.name.clone(),
            });
        }
        reflection
    }

    fn stub_of(info: TypeInfo, name: Option<&str>) -> Self {
        let body = Body::Stub {
            fields: info.fields.clone(),
            methods: info.methods.clone(),
        };
        Self::type_base(&info, name, body)
    }

    /// A class stub listing exactly `methods`, in order, after the type's
    /// fields. Duplicate method names raise [`ContextError::NameConflict`].
    pub fn curated(value: &Value, name: Option<&str>, methods: Vec<FunctionSpec>) -> Result<Self> {
        let info = TypeInfo::of(value)?;
        let mut seen = Scope::new();
        for method in &methods {
            seen.insert(Reflection::function(method.clone(), None))?;
        }
        let body = Body::Stub {
            fields: info.fields.clone(),
            methods,
        };
        Ok(Self::type_base(&info, name, body))
    }

    /// A class stub with public methods only. Names starting with
    /// `private_prefix` are dropped unless listed in `allow`.
    pub fn interface(
        value: &Value,
        name: Option<&str>,
        private_prefix: &str,
        allow: &[&str],
    ) -> Result<Self> {
        let mut info = TypeInfo::of(value)?;
        info.methods.retain(|m| {
            private_prefix.is_empty()
                || !m.name.starts_with(private_prefix)
                || allow.contains(&m.name.as_str())
        });
        Ok(Self::stub_of(info, name))
    }

    /// Doc and name only: `struct Name;`.
    pub fn class_sign(value: &Value, name: Option<&str>) -> Result<Self> {
        let info = TypeInfo::of(value)?;
        Ok(Self::type_base(&info, name, Body::Sign))
    }

    // ── Adjustments ────────────────────────────────────────────────

    /// Same symbol under a new display name.
    pub fn renamed(mut self, name: &str) -> Self {
        if let Body::Source(source) = &self.body {
            if let Some(rewritten) = substitute_struct_name(source, &self.name, name) {
                self.body = Body::Source(rewritten);
            }
        }
        self.name = name.to_string();
        self
    }

    /// Same symbol attributed to another module.
    pub fn relocated(mut self, module: &str) -> Self {
        let original = match &self.origin {
            Some(origin) => origin.name.clone(),
            None => self.name.clone(),
        };
        self.origin = Some(Origin {
            module: module.to_string(),
            name: original,
        });
        self
    }

    /// Attribute the symbol to `name` in `module`.
    pub fn with_origin(mut self, module: &str, name: &str) -> Self {
        self.origin = Some(Origin {
            module: module.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Replace the generated prompt text.
    pub fn with_prompt(mut self, text: impl Into<String>) -> Self {
        self.prompt_override = Some(text.into());
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn kind(&self) -> ReflectionKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn type_hint(&self) -> Option<&str> {
        self.type_hint.as_deref()
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn extends(&self) -> &[String] {
        &self.extends
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Whether values of this type can be rebuilt from persisted data.
    /// Only concrete script structs qualify.
    pub fn is_persistable(&self) -> bool {
        self.persistable
    }

    // ── Rendering ──────────────────────────────────────────────────

    /// Comment lines placed above the prompt: import provenance, then
    /// the base chain.
    pub fn header(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let (Some(origin), false) = (&self.origin, self.body == Body::Import) {
            let mut line = format!("// use {}::{}", origin.module, origin.name);
            if origin.name != self.name {
                line.push_str(&format!(" as {}", self.name));
            }
            lines.push(line);
        }
        if !self.extends.is_empty() {
            lines.push(format!("// extends {}", self.extends.join(", ")));
        }
        lines
    }

    /// The prompt text: the override if one was set, else generated.
    pub fn prompt(&self) -> String {
        if let Some(text) = &self.prompt_override {
            return text.clone();
        }
        match &self.body {
            Body::Import => {
                let Some(origin) = &self.origin else {
                    return format!("use {};", self.name);
                };
                let mut line = format!("use {}::{}", origin.module, origin.name);
                if origin.name != self.name {
                    line.push_str(&format!(" as {}", self.name));
                }
                line.push(';');
                line
            }
            Body::Attribute { value } => {
                let mut out = doc_lines(self.doc.as_deref(), "");
                out.push_str("let ");
                out.push_str(&self.name);
                if let Some(hint) = &self.type_hint {
                    out.push_str(": ");
                    out.push_str(hint);
                }
                if let Some(value) = value {
                    out.push_str(" = ");
                    out.push_str(value);
                }
                out.push(';');
                out
            }
            Body::Source(source) => source.clone(),
            Body::Signature(spec) => signature(spec, &self.name, ""),
            Body::Stub { fields, methods } => {
                let mut out = doc_lines(self.doc.as_deref(), "");
                out.push_str(&format!("struct {} {{\n", self.name));
                for field in fields {
                    out.push_str(&doc_lines(field.doc.as_deref(), "    "));
                    out.push_str(&format!("    {}", field.name));
                    if let Some(ty) = &field.ty {
                        out.push_str(&format!(": {ty}"));
                    }
                    if let Some(default) = &field.default {
                        out.push_str(&format!(" = {default}"));
                    }
                    out.push_str(",\n");
                }
                for method in methods {
                    out.push_str(&signature(method, &method.name, "    "));
                    out.push('\n');
                }
                out.push('}');
                out
            }
            Body::Sign => {
                let mut out = doc_lines(self.doc.as_deref(), "");
                out.push_str(&format!("struct {};", self.name));
                out
            }
        }
    }
}

fn doc_lines(doc: Option<&str>, indent: &str) -> String {
    let Some(doc) = doc else {
        return String::new();
    };
    doc.lines()
        .map(|line| {
            if line.is_empty() {
                format!("{indent}///\n")
            } else {
                format!("{indent}/// {line}\n")
            }
        })
        .collect()
}

/// Render a signature, one parameter per line:
///
/// ```text
/// /// Sum two numbers.
/// fn plus(
///     a: int,
///     b: int = 0,
/// ) -> int;
/// ```
pub fn signature(spec: &FunctionSpec, name: &str, indent: &str) -> String {
    let mut out = doc_lines(spec.doc.as_deref(), indent);
    out.push_str(&format!("{indent}fn {name}("));
    if !spec.params.is_empty() {
        out.push('\n');
        for param in &spec.params {
            out.push_str(&format!("{indent}    {}", param.name));
            if let Some(ty) = &param.ty {
                out.push_str(&format!(": {ty}"));
            }
            if let Some(default) = &param.default {
                out.push_str(&format!(" = {default}"));
            }
            out.push_str(",\n");
        }
        out.push_str(indent);
    }
    out.push(')');
    if let Some(returns) = &spec.returns {
        out.push_str(&format!(" -> {returns}"));
    }
    out.push(';');
    out
}

// ── Scope ──────────────────────────────────────────────────────────

/// Reflections of one containing scope, unique by display name.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    entries: Vec<Reflection>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reflection. A name already present raises
    /// [`ContextError::NameConflict`].
    pub fn insert(&mut self, reflection: Reflection) -> Result<()> {
        if self.get(reflection.name()).is_some() {
            return Err(ContextError::NameConflict(reflection.name().to_string()));
        }
        self.entries.push(reflection);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Reflection> {
        self.entries.iter().find(|r| r.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reflection> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Reflection> {
        self.entries
    }
}
