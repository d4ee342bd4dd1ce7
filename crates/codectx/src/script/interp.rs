//! Tree-walking evaluator for the namespace script language.
//!
//! An [`Interpreter`] owns one namespace: a root [`Env`] holding builtins
//! and every top-level declaration loaded into it. Blocks share the scope of
//! their enclosing function; only calls open a new scope. Assigning to an
//! unknown name defines it in the current scope.

use super::ast::{BinaryOp, Expr, FieldDecl, FnDecl, ParamDecl, Stmt, StructDecl, TypeExpr, UnaryOp};
use super::builtins;
use super::output::OutputChannel;
use super::parser::parse;
use super::value::{CallArgs, Env, Record, ScriptFunction, StructType, Value};
use crate::config::DEFAULT_MAX_CALL_DEPTH;
use crate::error::{ContextError, ScriptError};
use crate::resolver::ModuleResolver;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use tracing::debug;

/// Type names accepted in annotations without a declaration.
const BUILTIN_TYPES: &[&str] = &[
    "any", "nil", "bool", "int", "float", "str", "list", "map", "fn", "type", "object",
];

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter {
    name: String,
    globals: Rc<Env>,
    output: OutputChannel,
    resolver: Option<Rc<dyn ModuleResolver>>,
    depth: usize,
    max_depth: usize,
    deferred_annotations: bool,
}

impl Interpreter {
    /// Create a namespace tagged `name` with the builtins bound.
    pub fn new(name: impl Into<String>) -> Self {
        let interp = Self {
            name: name.into(),
            globals: Env::root(),
            output: OutputChannel::new(),
            resolver: None,
            depth: 0,
            max_depth: DEFAULT_MAX_CALL_DEPTH,
            deferred_annotations: false,
        };
        builtins::install(&interp);
        interp
    }

    pub fn with_output(mut self, output: OutputChannel) -> Self {
        self.output = output;
        self
    }

    /// Resolver consulted by `use` statements.
    pub fn with_resolver(mut self, resolver: Rc<dyn ModuleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// When set, type annotations are never checked, so declarations may
    /// reference types declared later in the source.
    pub fn set_deferred_annotations(&mut self, deferred: bool) {
        self.deferred_annotations = deferred;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn globals(&self) -> &Rc<Env> {
        &self.globals
    }

    pub fn output(&self) -> &OutputChannel {
        &self.output
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    pub fn define(&self, name: &str, value: Value) {
        self.globals.define(name, value);
    }

    /// Parse `source` and execute it in the namespace's root scope.
    pub fn run(&mut self, source: &str) -> Result<(), ScriptError> {
        let program = parse(source)?;
        debug!(
            "[script] {}: running {} statement(s)",
            self.name,
            program.stmts.len()
        );
        let globals = self.globals.clone();
        self.exec_top(&program.stmts, &globals)
    }

    /// Like [`run`](Self::run), but a trailing expression statement is
    /// evaluated and returned.
    pub fn eval(&mut self, source: &str) -> Result<Value, ScriptError> {
        let mut program = parse(source)?;
        let last = match program.stmts.last() {
            Some(Stmt::Expr(_)) => program.stmts.pop(),
            _ => None,
        };
        let globals = self.globals.clone();
        self.exec_top(&program.stmts, &globals)?;
        match last {
            Some(Stmt::Expr(expr)) => self.eval_expr(&expr, &globals),
            _ => Ok(Value::Nil),
        }
    }

    /// Break every function/scope cycle rooted in this namespace.
    pub fn teardown(&mut self) {
        debug!("[script] {}: teardown", self.name);
        self.globals.clear();
        self.resolver = None;
    }

    fn exec_top(&mut self, stmts: &[Stmt], env: &Rc<Env>) -> Result<(), ScriptError> {
        match self.exec_block(stmts, env)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break | Flow::Continue => Err(loose_jump()),
        }
    }

    // ── Calls ──────────────────────────────────────────────────────

    /// Call any callable value.
    pub fn call(&mut self, callee: &Value, args: CallArgs) -> Result<Value, ScriptError> {
        match callee {
            Value::Function(function) => self.call_function(function, None, args),
            Value::Native(native) => {
                self.enter(&native.spec.name)?;
                let result = native.invoke(self, args);
                self.depth -= 1;
                result
            }
            Value::Type(ty) => self.construct(ty, args),
            Value::Kind(kind) => builtins::convert(*kind, &args),
            Value::HostType(spec) => Err(ScriptError::type_error(format!(
                "host type `{}` cannot be constructed from script code",
                spec.name
            ))),
            other => Err(ScriptError::type_error(format!(
                "{} is not callable",
                other.repr()
            ))),
        }
    }

    /// Call a script function, binding `receiver` to its first parameter.
    pub fn call_function(
        &mut self,
        function: &Rc<ScriptFunction>,
        receiver: Option<Value>,
        args: CallArgs,
    ) -> Result<Value, ScriptError> {
        let Some(body) = &function.decl.body else {
            return Err(ScriptError::runtime(format!(
                "`{}` is abstract and has no body",
                function.name()
            )));
        };
        self.enter(function.name())?;
        let result = self.invoke(function, body, receiver, args);
        self.depth -= 1;
        result
    }

    /// Call `name` on `receiver`: attributes first, then methods.
    pub fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: CallArgs,
    ) -> Result<Value, ScriptError> {
        match receiver {
            Value::Record(record) => {
                let (field, method) = {
                    let record = record.borrow();
                    (record.fields.get(name).cloned(), record.ty.method(name))
                };
                match (field, method) {
                    (Some(field), _) => self.call(&field, args),
                    (None, Some(method)) => self.call_function(&method, Some(receiver.clone()), args),
                    (None, None) => Err(no_attribute(receiver, name)),
                }
            }
            Value::Object(object) => {
                if let Some(attr) = object.get_attr(name) {
                    return self.call(&attr, args);
                }
                match object.method(name) {
                    Some(method) => self.call_function(&method, Some(receiver.clone()), args),
                    None => Err(no_attribute(receiver, name)),
                }
            }
            Value::List(_) | Value::Map(_) | Value::Str(_) => {
                builtins::call_method(self, receiver, name, args)
            }
            other => {
                let attr = self.get_attr(other, name)?;
                self.call(&attr, args)
            }
        }
    }

    fn enter(&mut self, name: &str) -> Result<(), ScriptError> {
        if self.depth >= self.max_depth {
            return Err(ScriptError::runtime(format!(
                "maximum call depth of {} exceeded in `{name}`",
                self.max_depth
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn invoke(
        &mut self,
        function: &ScriptFunction,
        body: &[Stmt],
        receiver: Option<Value>,
        args: CallArgs,
    ) -> Result<Value, ScriptError> {
        let decl = &function.decl;
        let env = Env::child(&function.closure);
        let mut params = decl.params.iter();
        if let Some(receiver) = receiver {
            let Some(first) = params.next() else {
                return Err(ScriptError::Arity {
                    name: decl.name.clone(),
                    expected: "a `self` parameter".to_string(),
                    got: 0,
                });
            };
            env.define(&first.name, receiver);
        }
        let params: Vec<&ParamDecl> = params.collect();
        let slots = bind_args(&decl.name, &params, args)?;
        for (param, slot) in params.iter().zip(slots) {
            let value = match (slot, &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => self.eval_expr(default, &env)?,
                (None, None) => {
                    return Err(ScriptError::Arity {
                        name: decl.name.clone(),
                        expected: format!("argument `{}`", param.name),
                        got: 0,
                    });
                }
            };
            env.define(&param.name, value);
        }
        match self.exec_block(body, &env)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
            Flow::Break | Flow::Continue => Err(loose_jump()),
        }
    }

    /// Build a record of `ty`. Missing fields take their declared default,
    /// evaluated per construction, or nil. Counts against the call depth,
    /// since a default may construct its own type.
    pub fn construct(&mut self, ty: &Rc<StructType>, args: CallArgs) -> Result<Value, ScriptError> {
        self.enter(ty.name())?;
        let result = self.build_record(ty, args);
        self.depth -= 1;
        result
    }

    fn build_record(&mut self, ty: &Rc<StructType>, args: CallArgs) -> Result<Value, ScriptError> {
        if ty.is_abstract() {
            return Err(ScriptError::type_error(format!(
                "abstract struct `{}` cannot be instantiated",
                ty.name()
            )));
        }
        let fields = ty.fields();
        let got = args.len();
        if args.positional.len() > fields.len() {
            return Err(ScriptError::Arity {
                name: ty.name().to_string(),
                expected: format!("at most {} field(s)", fields.len()),
                got,
            });
        }
        let CallArgs {
            positional,
            keyword,
        } = args;
        let mut given: IndexMap<String, Value> = fields
            .iter()
            .zip(positional)
            .map(|(field, value)| (field.name.clone(), value))
            .collect();
        for (name, value) in keyword {
            if !fields.iter().any(|f| f.name == name) {
                return Err(ScriptError::Attribute {
                    owner: ty.name().to_string(),
                    name,
                });
            }
            if given.insert(name.clone(), value).is_some() {
                return Err(ScriptError::type_error(format!(
                    "`{}` got multiple values for field `{name}`",
                    ty.name()
                )));
            }
        }
        let mut values = IndexMap::new();
        for field in &fields {
            let value = match given.shift_remove(&field.name) {
                Some(value) => value,
                None => self.field_default(ty, field)?.unwrap_or(Value::Nil),
            };
            values.insert(field.name.clone(), value);
        }
        Ok(Value::Record(Rc::new(RefCell::new(Record {
            ty: ty.clone(),
            fields: values,
        }))))
    }

    /// Evaluate a field's declared default in the scope of its struct.
    pub fn field_default(
        &mut self,
        ty: &StructType,
        field: &FieldDecl,
    ) -> Result<Option<Value>, ScriptError> {
        match &field.default {
            Some(expr) => {
                let closure = ty.closure.clone();
                self.eval_expr(expr, &closure).map(Some)
            }
            None => Ok(None),
        }
    }

    // ── Attributes and indexing ────────────────────────────────────

    pub fn get_attr(&self, target: &Value, name: &str) -> Result<Value, ScriptError> {
        let found = match target {
            Value::Record(record) => {
                let record = record.borrow();
                record
                    .fields
                    .get(name)
                    .cloned()
                    .or_else(|| record.ty.method(name).map(Value::Function))
            }
            Value::Object(object) => object
                .get_attr(name)
                .or_else(|| object.method(name).map(Value::Function)),
            Value::Map(entries) => entries.borrow().get(name).cloned(),
            Value::Type(ty) => ty.method(name).map(Value::Function),
            _ => None,
        };
        found.ok_or_else(|| no_attribute(target, name))
    }

    pub fn set_attr(&self, target: &Value, name: &str, value: Value) -> Result<(), ScriptError> {
        match target {
            Value::Record(record) => {
                record.borrow_mut().fields.insert(name.to_string(), value);
                Ok(())
            }
            Value::Object(object) => object.set_attr(name, value),
            Value::Map(entries) => {
                entries.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(ScriptError::type_error(format!(
                "cannot set attribute `{name}` on {}",
                other.type_name()
            ))),
        }
    }

    pub fn index(&self, target: &Value, index: &Value) -> Result<Value, ScriptError> {
        match (target, index) {
            (Value::List(items), Value::Int(i)) => {
                let items = items.borrow();
                let pos = position(*i, items.len())?;
                Ok(items[pos].clone())
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let pos = position(*i, chars.len())?;
                Ok(Value::from(chars[pos].to_string()))
            }
            (Value::Map(entries), Value::Str(key)) => entries
                .borrow()
                .get(&**key)
                .cloned()
                .ok_or_else(|| ScriptError::runtime(format!("key {key:?} not found"))),
            (Value::Record(_) | Value::Object(_), Value::Str(key)) => self.get_attr(target, key),
            (target, index) => Err(ScriptError::type_error(format!(
                "cannot index {} with {}",
                target.type_name(),
                index.type_name()
            ))),
        }
    }

    fn set_index(&self, target: &Value, index: &Value, value: Value) -> Result<(), ScriptError> {
        match (target, index) {
            (Value::List(items), Value::Int(i)) => {
                let mut items = items.borrow_mut();
                let pos = position(*i, items.len())?;
                items[pos] = value;
                Ok(())
            }
            (Value::Map(entries), Value::Str(key)) => {
                entries.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            (Value::Record(_) | Value::Object(_), Value::Str(key)) => {
                self.set_attr(target, key, value)
            }
            (target, index) => Err(ScriptError::type_error(format!(
                "cannot assign into {} with {}",
                target.type_name(),
                index.type_name()
            ))),
        }
    }

    // ── Statements ─────────────────────────────────────────────────

    fn exec_block(&mut self, stmts: &[Stmt], env: &Rc<Env>) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Rc<Env>) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Let { name, ty, value } => {
                if let Some(ty) = ty {
                    self.check_annotation(ty, env, None, name)?;
                }
                let value = self.eval_expr(value, env)?;
                env.define(name, value);
            }
            Stmt::Assign { target, value } => {
                let value = self.eval_expr(value, env)?;
                self.assign(target, value, env)?;
            }
            Stmt::Expr(expr) => {
                self.eval_expr(expr, env)?;
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_expr(cond, env)?.is_truthy() {
                    return self.exec_block(then, env);
                }
                if let Some(otherwise) = otherwise {
                    return self.exec_block(otherwise, env);
                }
            }
            Stmt::While { cond, body } => {
                while self.eval_expr(cond, env)?.is_truthy() {
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::For { var, iter, body } => {
                let iterable = self.eval_expr(iter, env)?;
                for item in iterate(&iterable)? {
                    env.define(var, item);
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Fn(decl) => {
                self.check_signature(decl, env, None)?;
                let function = ScriptFunction {
                    decl: decl.clone(),
                    closure: env.clone(),
                };
                env.define(&decl.name, Value::Function(Rc::new(function)));
            }
            Stmt::Struct(decl) => self.declare_struct(decl, env)?,
            Stmt::Use {
                module,
                symbol,
                alias,
            } => {
                let value = self.import(module, symbol)?;
                env.define(alias.as_deref().unwrap_or(symbol), value);
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Expr, value: Value, env: &Rc<Env>) -> Result<(), ScriptError> {
        match target {
            Expr::Ident(name) => {
                if env.get(name).is_some() {
                    env.assign(name, value);
                } else {
                    env.define(name, value);
                }
                Ok(())
            }
            Expr::Attr(object, name) => {
                let object = self.eval_expr(object, env)?;
                self.set_attr(&object, name, value)
            }
            Expr::Index(object, index) => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                self.set_index(&object, &index, value)
            }
            _ => Err(ScriptError::runtime("invalid assignment target")),
        }
    }

    fn declare_struct(&mut self, decl: &Rc<StructDecl>, env: &Rc<Env>) -> Result<(), ScriptError> {
        let base = match &decl.base {
            Some(name) => match env.get(name) {
                Some(Value::Type(ty)) => Some(ty),
                Some(other) => {
                    return Err(ScriptError::type_error(format!(
                        "`{}` cannot extend {}",
                        decl.name,
                        other.repr()
                    )));
                }
                None => return Err(ScriptError::Undefined(name.clone())),
            },
            None => None,
        };
        for field in &decl.fields {
            if let Some(ty) = &field.ty {
                let owner = format!("{}.{}", decl.name, field.name);
                self.check_annotation(ty, env, Some(&decl.name), &owner)?;
            }
        }
        let mut methods = IndexMap::new();
        for method in &decl.methods {
            self.check_signature(method, env, Some(&decl.name))?;
            let function = ScriptFunction {
                decl: method.clone(),
                closure: env.clone(),
            };
            methods.insert(method.name.clone(), Rc::new(function));
        }
        let ty = StructType {
            decl: decl.clone(),
            base,
            closure: env.clone(),
            methods,
        };
        env.define(&decl.name, Value::Type(Rc::new(ty)));
        Ok(())
    }

    fn import(&self, module: &str, symbol: &str) -> Result<Value, ScriptError> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| ContextError::ModuleResolution(module.to_string()))?;
        Ok(resolver.resolve_symbol(module, symbol)?)
    }

    fn check_signature(
        &self,
        decl: &FnDecl,
        env: &Env,
        own: Option<&str>,
    ) -> Result<(), ScriptError> {
        let annotations = decl
            .params
            .iter()
            .filter_map(|p| p.ty.as_ref())
            .chain(decl.ret.as_ref());
        for ty in annotations {
            self.check_annotation(ty, env, own, &decl.name)?;
        }
        Ok(())
    }

    /// Every name in the annotation must be a builtin type, a declared
    /// type, or the struct being declared.
    fn check_annotation(
        &self,
        ty: &TypeExpr,
        env: &Env,
        own: Option<&str>,
        owner: &str,
    ) -> Result<(), ScriptError> {
        if self.deferred_annotations {
            return Ok(());
        }
        for name in ty.names() {
            if BUILTIN_TYPES.contains(&name) || own == Some(name) {
                continue;
            }
            match env.get(name) {
                Some(Value::Type(_) | Value::HostType(_) | Value::Kind(_)) => {}
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "unknown type `{name}` in annotation of `{owner}`"
                    )));
                }
            }
        }
        Ok(())
    }

    // ── Expressions ────────────────────────────────────────────────

    fn eval_expr(&mut self, expr: &Expr, env: &Rc<Env>) -> Result<Value, ScriptError> {
        Ok(match expr {
            Expr::Nil => Value::Nil,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(v) => Value::Int(*v),
            Expr::Float(v) => Value::Float(*v),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Ident(name) => env
                .get(name)
                .ok_or_else(|| ScriptError::Undefined(name.clone()))?,
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env)?);
                }
                Value::list(values)
            }
            Expr::Map(entries) => {
                let mut values = IndexMap::new();
                for (key, value) in entries {
                    let key = match self.eval_expr(key, env)? {
                        Value::Str(s) => s.to_string(),
                        other => {
                            return Err(ScriptError::type_error(format!(
                                "map keys must be str, got {}",
                                other.type_name()
                            )));
                        }
                    };
                    values.insert(key, self.eval_expr(value, env)?);
                }
                Value::map(values)
            }
            Expr::Unary(op, operand) => unary(*op, self.eval_expr(operand, env)?)?,
            Expr::Binary(BinaryOp::And, left, right) => Value::Bool(
                self.eval_expr(left, env)?.is_truthy() && self.eval_expr(right, env)?.is_truthy(),
            ),
            Expr::Binary(BinaryOp::Or, left, right) => Value::Bool(
                self.eval_expr(left, env)?.is_truthy() || self.eval_expr(right, env)?.is_truthy(),
            ),
            Expr::Binary(op, left, right) => {
                let left = self.eval_expr(left, env)?;
                let right = self.eval_expr(right, env)?;
                binary(*op, &left, &right)?
            }
            Expr::Attr(object, name) => {
                let object = self.eval_expr(object, env)?;
                self.get_attr(&object, name)?
            }
            Expr::Index(object, index) => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                self.index(&object, &index)?
            }
            Expr::Call { callee, args } => match &**callee {
                Expr::Attr(receiver, name) => {
                    let receiver = self.eval_expr(receiver, env)?;
                    let args = self.eval_args(args, env)?;
                    self.call_method(&receiver, name, args)?
                }
                callee => {
                    let callee = self.eval_expr(callee, env)?;
                    let args = self.eval_args(args, env)?;
                    self.call(&callee, args)?
                }
            },
        })
    }

    fn eval_args(&mut self, args: &[super::ast::Arg], env: &Rc<Env>) -> Result<CallArgs, ScriptError> {
        let mut out = CallArgs::default();
        for arg in args {
            let value = self.eval_expr(&arg.value, env)?;
            match &arg.name {
                Some(name) => out.keyword.push((name.clone(), value)),
                None if out.keyword.is_empty() => out.positional.push(value),
                None => {
                    return Err(ScriptError::type_error(
                        "positional argument follows keyword argument",
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// Match call arguments to parameters. Returns one slot per parameter.
fn bind_args(
    function: &str,
    params: &[&ParamDecl],
    args: CallArgs,
) -> Result<Vec<Option<Value>>, ScriptError> {
    let got = args.len();
    if args.positional.len() > params.len() {
        return Err(ScriptError::Arity {
            name: function.to_string(),
            expected: format!("at most {} argument(s)", params.len()),
            got,
        });
    }
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in slots.iter_mut().zip(args.positional) {
        *slot = Some(value);
    }
    for (name, value) in args.keyword {
        let Some(i) = params.iter().position(|p| p.name == name) else {
            return Err(ScriptError::type_error(format!(
                "`{function}` got an unexpected keyword argument `{name}`"
            )));
        };
        if slots[i].replace(value).is_some() {
            return Err(ScriptError::type_error(format!(
                "`{function}` got multiple values for `{name}`"
            )));
        }
    }
    Ok(slots)
}

fn loose_jump() -> ScriptError {
    ScriptError::runtime("`break` or `continue` outside of a loop")
}

fn no_attribute(target: &Value, name: &str) -> ScriptError {
    ScriptError::Attribute {
        owner: target.type_name(),
        name: name.to_string(),
    }
}

fn position(index: i64, len: usize) -> Result<usize, ScriptError> {
    let signed_len = len as i64;
    let pos = if index < 0 { index + signed_len } else { index };
    if pos < 0 || pos >= signed_len {
        return Err(ScriptError::runtime(format!(
            "index {index} out of range for length {len}"
        )));
    }
    Ok(pos as usize)
}

fn iterate(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Map(entries) => Ok(entries.borrow().keys().map(|k| Value::str(k)).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
        other => Err(ScriptError::type_error(format!(
            "{} is not iterable",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, ScriptError> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(v)) => v
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::runtime("integer overflow in negation")),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Neg, other) => Err(ScriptError::type_error(format!(
            "cannot negate {}",
            other.type_name()
        ))),
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        _ => None,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (a, b) => as_float(a)?.partial_cmp(&as_float(b)?),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    use BinaryOp::{Add, And, Div, Eq, Gt, GtEq, Lt, LtEq, Mul, NotEq, Or, Rem, Sub};
    Ok(match (op, left, right) {
        (Eq, l, r) => Value::Bool(l.equals(r)),
        (NotEq, l, r) => Value::Bool(!l.equals(r)),
        (And, l, r) => Value::Bool(l.is_truthy() && r.is_truthy()),
        (Or, l, r) => Value::Bool(l.is_truthy() || r.is_truthy()),
        (Lt | LtEq | Gt | GtEq, l, r) => {
            let ordering = compare(l, r).ok_or_else(|| {
                ScriptError::type_error(format!(
                    "cannot compare {} with {}",
                    l.type_name(),
                    r.type_name()
                ))
            })?;
            Value::Bool(match op {
                Lt => ordering.is_lt(),
                LtEq => ordering.is_le(),
                Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        (Add, Value::Str(a), Value::Str(b)) => Value::from(format!("{a}{b}")),
        (Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Value::list(items)
        }
        (Div | Rem, Value::Int(_), Value::Int(0)) => {
            return Err(ScriptError::runtime("division by zero"));
        }
        (_, Value::Int(a), Value::Int(b)) => {
            let result = match op {
                Add => a.checked_add(*b),
                Sub => a.checked_sub(*b),
                Mul => a.checked_mul(*b),
                Div => a.checked_div(*b),
                _ => a.checked_rem(*b),
            };
            Value::Int(result.ok_or_else(|| {
                ScriptError::runtime(format!("integer overflow in `{a} {op} {b}`"))
            })?)
        }
        (_, l, r) => {
            let (Some(a), Some(b)) = (as_float(l), as_float(r)) else {
                return Err(ScriptError::type_error(format!(
                    "unsupported operands for `{op}`: {} and {}",
                    l.type_name(),
                    r.type_name()
                )));
            };
            if matches!(op, Div | Rem) && b == 0.0 {
                return Err(ScriptError::runtime("division by zero"));
            }
            Value::Float(match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                _ => a % b,
            })
        }
    })
}
