//! Runtime values of the namespace script language.
//!
//! Values are reference-counted and single-threaded: a namespace and every
//! value loaded into it belong to one runtime on one thread. Functions hold
//! strong references to the scope they were declared in, so scopes and
//! functions form cycles that only [`Env::clear`] breaks.

use super::ast::{FieldDecl, FnDecl, StructDecl};
use super::interp::Interpreter;
use crate::error::ScriptError;
use crate::reflect::{FunctionSpec, TypeSpec};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Signature of a host-provided function.
pub type NativeFn = dyn Fn(&mut Interpreter, CallArgs) -> Result<Value, ScriptError>;

// ── Value ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<IndexMap<String, Value>>>),
    Function(Rc<ScriptFunction>),
    Native(Rc<NativeFunction>),
    /// A struct type declared in script source.
    Type(Rc<StructType>),
    /// An instance of a script struct.
    Record(Rc<RefCell<Record>>),
    /// A host type described by a registry descriptor.
    HostType(Rc<TypeSpec>),
    Object(Rc<dyn HostObject>),
    /// A meta-type reference such as `int` or `str`.
    Kind(Kind),
}

/// Meta-type references. The data kinds double as conversion functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Function,
    Type,
    Object,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Map => "map",
            Self::Function => "fn",
            Self::Type => "type",
            Self::Object => "object",
        }
    }

    /// Kinds bound as globals in every namespace.
    pub const GLOBAL: [Kind; 6] = [
        Kind::Bool,
        Kind::Int,
        Kind::Float,
        Kind::Str,
        Kind::List,
        Kind::Map,
    ];
}

impl Value {
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Self::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn object(object: impl HostObject + 'static) -> Self {
        Self::Object(Rc::new(object))
    }

    pub fn native(function: NativeFunction) -> Self {
        Self::Native(Rc::new(function))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is a scalar (printed in attribute prompts).
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Nil | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Str(_)
        )
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Self::Function(_) | Self::Native(_) | Self::Type(_) | Self::Kind(_)
        )
    }

    /// The meta-type of this value, as returned by `type_of`.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Nil => Kind::Nil,
            Self::Bool(_) => Kind::Bool,
            Self::Int(_) => Kind::Int,
            Self::Float(_) => Kind::Float,
            Self::Str(_) => Kind::Str,
            Self::List(_) => Kind::List,
            Self::Map(_) => Kind::Map,
            Self::Function(_) | Self::Native(_) => Kind::Function,
            Self::Type(_) | Self::HostType(_) | Self::Kind(_) => Kind::Type,
            Self::Record(_) | Self::Object(_) => Kind::Object,
        }
    }

    /// Name used in type annotations of rendered prompts.
    pub fn type_name(&self) -> String {
        match self {
            Self::Record(record) => record.borrow().ty.name().to_string(),
            Self::Object(object) => object.type_name(),
            other => other.kind().name().to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Map(entries) => !entries.borrow().is_empty(),
            _ => true,
        }
    }

    /// Source-like representation, used in prompts and error messages.
    /// A container that contains itself prints as `[...]`, `{...}`, or
    /// `Name(...)` at the point of recursion.
    pub fn repr(&self) -> String {
        self.repr_in(&mut Path::default())
    }

    fn repr_in(&self, path: &mut Path) -> String {
        match self {
            Self::Nil => "nil".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => format_float(*v),
            Self::Str(s) => format!("{:?}", &**s),
            Self::List(items) => {
                if !path.enter(Rc::as_ptr(items).cast()) {
                    return "[...]".to_string();
                }
                let parts: Vec<String> = items.borrow().iter().map(|v| v.repr_in(path)).collect();
                path.leave();
                format!("[{}]", parts.join(", "))
            }
            Self::Map(entries) => {
                if !path.enter(Rc::as_ptr(entries).cast()) {
                    return "{...}".to_string();
                }
                let parts: Vec<String> = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{k:?}: {}", v.repr_in(path)))
                    .collect();
                path.leave();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Function(f) => format!("<fn {}>", f.name()),
            Self::Native(f) => format!("<native fn {}>", f.spec.name),
            Self::Type(t) => format!("<struct {}>", t.name()),
            Self::Record(cell) => {
                let record = cell.borrow();
                if !path.enter(Rc::as_ptr(cell).cast()) {
                    return format!("{}(...)", record.ty.name());
                }
                let parts: Vec<String> = record
                    .fields
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.repr_in(path)))
                    .collect();
                path.leave();
                format!("{}({})", record.ty.name(), parts.join(", "))
            }
            Self::HostType(spec) => format!("<type {}>", spec.name),
            Self::Object(object) => format!("<{} object>", object.type_name()),
            Self::Kind(kind) => kind.name().to_string(),
        }
    }

    /// Structural equality for data; identity for functions and objects.
    /// Two cyclic values are equal when their shapes agree up to the point
    /// where a pair of containers is compared again.
    pub fn equals(&self, other: &Value) -> bool {
        self.equals_in(other, &mut Vec::new())
    }

    fn equals_in(&self, other: &Value, pairs: &mut Vec<(usize, usize)>) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let depth = match enter_pair(pairs, Rc::as_ptr(a).cast(), Rc::as_ptr(b).cast()) {
                    Ok(depth) => depth,
                    Err(verdict) => return verdict,
                };
                let equal = {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|(x, y)| x.equals_in(y, pairs))
                };
                pairs.truncate(depth);
                equal
            }
            (Self::Map(a), Self::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let depth = match enter_pair(pairs, Rc::as_ptr(a).cast(), Rc::as_ptr(b).cast()) {
                    Ok(depth) => depth,
                    Err(verdict) => return verdict,
                };
                let equal = {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len()
                        && a.iter().all(|(k, v)| {
                            b.get(k).is_some_and(|other| v.equals_in(other, pairs))
                        })
                };
                pairs.truncate(depth);
                equal
            }
            (Self::Record(a), Self::Record(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let depth = match enter_pair(pairs, Rc::as_ptr(a).cast(), Rc::as_ptr(b).cast()) {
                    Ok(depth) => depth,
                    Err(verdict) => return verdict,
                };
                let equal = {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.ty.name() == b.ty.name()
                        && a.fields.len() == b.fields.len()
                        && a.fields.iter().all(|(k, v)| {
                            b.fields.get(k).is_some_and(|other| v.equals_in(other, pairs))
                        })
                };
                pairs.truncate(depth);
                equal
            }
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => Rc::ptr_eq(a, b),
            (Self::Type(a), Self::Type(b)) => Rc::ptr_eq(a, b),
            (Self::HostType(a), Self::HostType(b)) => a.name == b.name,
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Kind(a), Self::Kind(b)) => a == b,
            _ => false,
        }
    }

    /// Reduce the value to plain nested data. Records become objects of
    /// their fields; callables, host objects, and cyclic values are
    /// rejected.
    pub fn to_json(&self) -> Result<serde_json::Value, String> {
        self.to_json_in(&mut Path::default())
    }

    fn to_json_in(&self, path: &mut Path) -> Result<serde_json::Value, String> {
        use serde_json::Value as Json;
        Ok(match self {
            Self::Nil => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(v) => Json::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .ok_or_else(|| format!("float {v} has no JSON form"))?,
            Self::Str(s) => Json::String(s.to_string()),
            Self::List(items) => {
                path.require(Rc::as_ptr(items).cast())?;
                let items = items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json_in(path))
                    .collect::<Result<_, _>>()?;
                path.leave();
                Json::Array(items)
            }
            Self::Map(entries) => {
                path.require(Rc::as_ptr(entries).cast())?;
                let entries = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json_in(path)?)))
                    .collect::<Result<_, String>>()?;
                path.leave();
                Json::Object(entries)
            }
            Self::Record(record) => {
                path.require(Rc::as_ptr(record).cast())?;
                let fields = record
                    .borrow()
                    .fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json_in(path)?)))
                    .collect::<Result<_, String>>()?;
                path.leave();
                Json::Object(fields)
            }
            other => return Err(format!("{} values cannot be persisted", other.type_name())),
        })
    }

    /// Build a value from plain nested data.
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Nil,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(v) => Self::Int(v),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Self::str(s),
            Json::Array(items) => Self::list(items.iter().map(Value::from_json).collect()),
            Json::Object(entries) => Self::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Deepest container nesting walked by `repr`, `equals`, and `to_json`.
const MAX_NESTING: usize = 256;

/// Containers on the path from the root of a traversal to the current node.
#[derive(Default)]
struct Path(Vec<*const ()>);

impl Path {
    /// Push `node`; `false` when it is already on the path or the path is
    /// too deep.
    fn enter(&mut self, node: *const ()) -> bool {
        if self.0.len() >= MAX_NESTING || self.0.contains(&node) {
            return false;
        }
        self.0.push(node);
        true
    }

    fn require(&mut self, node: *const ()) -> Result<(), String> {
        if self.0.contains(&node) {
            return Err("cyclic value".to_string());
        }
        if !self.enter(node) {
            return Err(format!("value nested deeper than {MAX_NESTING} levels"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.0.pop();
    }
}

/// Record that the pair `(a, b)` is being compared and return the stack
/// depth to restore afterwards. `Err` carries the verdict when the walk
/// stops: `true` for a pair already being compared further up, `false`
/// past the nesting limit.
fn enter_pair(pairs: &mut Vec<(usize, usize)>, a: *const (), b: *const ()) -> Result<usize, bool> {
    let pair = (a as usize, b as usize);
    if pairs.contains(&pair) {
        return Err(true);
    }
    if pairs.len() >= MAX_NESTING {
        return Err(false);
    }
    let depth = pairs.len();
    pairs.push(pair);
    Ok(depth)
}

fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(Rc::from(v))
    }
}

// ── Scopes ─────────────────────────────────────────────────────────

/// A lexical scope. The root scope of a namespace holds its symbols.
#[derive(Default)]
pub struct Env {
    vars: RefCell<IndexMap<String, Value>>,
    parent: Option<Rc<Env>>,
}

impl Env {
    pub fn root() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn child(parent: &Rc<Env>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(IndexMap::new()),
            parent: Some(parent.clone()),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Look up a name in this scope only.
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn define(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    /// Rebind an existing name in the nearest scope that declares it.
    /// Returns `false` when no scope declares it.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    /// Names declared in this scope, in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }

    /// Drop every binding, breaking function/scope reference cycles.
    pub fn clear(&self) {
        let drained: Vec<Value> = self.vars.borrow_mut().drain(..).map(|(_, v)| v).collect();
        drop(drained);
    }
}

// ── Functions and types ────────────────────────────────────────────

/// A function declared in script source, closed over its defining scope.
pub struct ScriptFunction {
    pub decl: Rc<FnDecl>,
    pub closure: Rc<Env>,
}

impl ScriptFunction {
    pub fn name(&self) -> &str {
        &self.decl.name
    }
}

/// A struct type declared in script source.
pub struct StructType {
    pub decl: Rc<StructDecl>,
    pub base: Option<Rc<StructType>>,
    pub closure: Rc<Env>,
    pub methods: IndexMap<String, Rc<ScriptFunction>>,
}

impl StructType {
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn is_abstract(&self) -> bool {
        self.decl.is_abstract
    }

    /// Only concrete structs can be rebuilt from persisted data.
    pub fn is_persistable(&self) -> bool {
        !self.is_abstract()
    }

    /// Every field, base fields first; a derived field replaces a base
    /// field of the same name in place.
    pub fn fields(&self) -> Vec<FieldDecl> {
        let mut fields: Vec<FieldDecl> = match &self.base {
            Some(base) => base.fields(),
            None => Vec::new(),
        };
        for field in &self.decl.fields {
            match fields.iter_mut().find(|f| f.name == field.name) {
                Some(slot) => *slot = field.clone(),
                None => fields.push(field.clone()),
            }
        }
        fields
    }

    pub fn method(&self, name: &str) -> Option<Rc<ScriptFunction>> {
        self.methods
            .get(name)
            .cloned()
            .or_else(|| self.base.as_ref().and_then(|b| b.method(name)))
    }

    /// Names of the base chain, nearest first.
    pub fn ancestors(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = self.base.clone();
        while let Some(ty) = current {
            out.push(ty.name().to_string());
            current = ty.base.clone();
        }
        out
    }
}

/// An instance of a [`StructType`].
pub struct Record {
    pub ty: Rc<StructType>,
    pub fields: IndexMap<String, Value>,
}

// ── Host functions and objects ─────────────────────────────────────

/// A host function exposed to scripts, described by its [`FunctionSpec`].
pub struct NativeFunction {
    pub spec: FunctionSpec,
    /// Builtins reflect as bare imports rather than signatures.
    pub builtin: bool,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        spec: FunctionSpec,
        func: impl Fn(&mut Interpreter, CallArgs) -> Result<Value, ScriptError> + 'static,
    ) -> Self {
        Self {
            spec,
            builtin: false,
            func: Box::new(func),
        }
    }

    pub fn builtin(
        spec: FunctionSpec,
        func: impl Fn(&mut Interpreter, CallArgs) -> Result<Value, ScriptError> + 'static,
    ) -> Self {
        Self {
            spec,
            builtin: true,
            func: Box::new(func),
        }
    }

    pub fn invoke(&self, interp: &mut Interpreter, args: CallArgs) -> Result<Value, ScriptError> {
        (self.func)(interp, args)
    }
}

/// Arguments of a call, split into positional and keyword parts.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keyword: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The argument at `index`, or the keyword argument called `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| {
            self.keyword
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
        })
    }

    pub fn require(&self, index: usize, name: &str, function: &str) -> Result<&Value, ScriptError> {
        self.get(index, name).ok_or_else(|| ScriptError::Arity {
            name: function.to_string(),
            expected: format!("argument `{name}`"),
            got: self.len(),
        })
    }
}

/// A host-provided object exposed to scripts.
///
/// Attribute reads fall back to [`HostObject::method`], whose functions are
/// called with the object bound as `self`.
pub trait HostObject {
    fn type_name(&self) -> String;

    fn get_attr(&self, name: &str) -> Option<Value>;

    fn set_attr(&self, name: &str, _value: Value) -> Result<(), ScriptError> {
        Err(ScriptError::type_error(format!(
            "cannot set `{name}` on read-only {} object",
            self.type_name()
        )))
    }

    fn method(&self, _name: &str) -> Option<Rc<ScriptFunction>> {
        None
    }

    fn attr_names(&self) -> Vec<String> {
        Vec::new()
    }
}
