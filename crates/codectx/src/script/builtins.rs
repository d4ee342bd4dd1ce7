//! Builtin functions, meta-type conversions, and methods on lists, maps,
//! and strings.

use super::interp::Interpreter;
use super::value::{CallArgs, Kind, NativeFunction, Value};
use crate::error::ScriptError;
use crate::reflect::FunctionSpec;
use indexmap::IndexMap;

/// Module name builtins report as their origin.
pub const BUILTIN_MODULE: &str = "builtins";

/// Every name bound by [`install`].
pub const BUILTIN_NAMES: &[&str] = &[
    "print", "len", "range", "type_of", "error", "bool", "int", "float", "str", "list", "map",
];

/// Bind the builtins into the interpreter's root scope.
pub fn install(interp: &Interpreter) {
    let spec = |name: &str| FunctionSpec::new(name).module(BUILTIN_MODULE);

    let functions = [
        NativeFunction::builtin(
            spec("print")
                .param("values", None)
                .doc("Write the values, separated by spaces, to the console."),
            |interp, args| {
                let line: Vec<String> = args
                    .positional
                    .iter()
                    .chain(args.keyword.iter().map(|(_, v)| v))
                    .map(Value::to_string)
                    .collect();
                interp.output().write_line(&line.join(" "));
                Ok(Value::Nil)
            },
        ),
        NativeFunction::builtin(
            spec("len")
                .param("value", None)
                .returns("int")
                .doc("Number of items in a list or map, or characters in a string."),
            |_, args| length(args.require(0, "value", "len")?).map(Value::Int),
        ),
        NativeFunction::builtin(
            spec("range")
                .param("start", Some("int"))
                .param("stop", Some("int?"))
                .returns("list[int]")
                .doc("Integers from `start` up to `stop`; `range(n)` counts from zero."),
            |_, args| {
                let first = int_arg(args.require(0, "start", "range")?, "range")?;
                let (start, stop) = match args.get(1, "stop") {
                    Some(stop) => (first, int_arg(stop, "range")?),
                    None => (0, first),
                };
                Ok(Value::list((start..stop).map(Value::Int).collect()))
            },
        ),
        NativeFunction::builtin(
            spec("type_of")
                .param("value", None)
                .returns("type")
                .doc("The type of a value."),
            |_, args| {
                let value = args.require(0, "value", "type_of")?;
                Ok(match value {
                    Value::Record(record) => Value::Type(record.borrow().ty.clone()),
                    other => Value::Kind(other.kind()),
                })
            },
        ),
        NativeFunction::builtin(
            spec("error")
                .param("message", Some("str"))
                .doc("Abort execution with an error message."),
            |_, args| {
                let message = args
                    .get(0, "message")
                    .map(Value::to_string)
                    .unwrap_or_else(|| "error".to_string());
                Err(ScriptError::Runtime(message))
            },
        ),
    ];

    let globals = interp.globals();
    for function in functions {
        let name = function.spec.name.clone();
        globals.define(&name, Value::native(function));
    }
    for kind in Kind::GLOBAL {
        globals.define(kind.name(), Value::Kind(kind));
    }
}

fn length(value: &Value) -> Result<i64, ScriptError> {
    let len = match value {
        Value::List(items) => items.borrow().len(),
        Value::Map(entries) => entries.borrow().len(),
        Value::Str(s) => s.chars().count(),
        other => {
            return Err(ScriptError::type_error(format!(
                "{} has no length",
                other.type_name()
            )));
        }
    };
    Ok(len as i64)
}

fn int_arg(value: &Value, function: &str) -> Result<i64, ScriptError> {
    value.as_int().ok_or_else(|| {
        ScriptError::type_error(format!(
            "`{function}` expects an int, got {}",
            value.type_name()
        ))
    })
}

fn str_arg<'a>(args: &'a CallArgs, index: usize, name: &str, method: &str) -> Result<&'a str, ScriptError> {
    args.require(index, name, method)?.as_str().ok_or_else(|| {
        ScriptError::type_error(format!("`{method}` expects a str for `{name}`"))
    })
}

/// Call a meta-type as a conversion function: `int("3")`, `str(5)`.
pub fn convert(kind: Kind, args: &CallArgs) -> Result<Value, ScriptError> {
    let value = args.get(0, "value");
    let fail = |v: &Value| {
        ScriptError::type_error(format!("cannot convert {} to {}", v.repr(), kind.name()))
    };
    Ok(match (kind, value) {
        (Kind::Int, None) => Value::Int(0),
        (Kind::Int, Some(v)) => match v {
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
            Value::Bool(b) => Value::Int(i64::from(*b)),
            Value::Str(s) => Value::Int(s.trim().parse().map_err(|_| fail(v))?),
            other => return Err(fail(other)),
        },
        (Kind::Float, None) => Value::Float(0.0),
        (Kind::Float, Some(v)) => match v {
            Value::Int(i) => Value::Float(*i as f64),
            Value::Float(f) => Value::Float(*f),
            Value::Bool(b) => Value::Float(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => Value::Float(s.trim().parse().map_err(|_| fail(v))?),
            other => return Err(fail(other)),
        },
        (Kind::Str, None) => Value::str(""),
        (Kind::Str, Some(v)) => Value::from(v.to_string()),
        (Kind::Bool, None) => Value::Bool(false),
        (Kind::Bool, Some(v)) => Value::Bool(v.is_truthy()),
        (Kind::List, None) => Value::list(Vec::new()),
        (Kind::List, Some(v)) => match v {
            Value::List(items) => Value::list(items.borrow().clone()),
            Value::Map(entries) => Value::list(entries.borrow().keys().map(|k| Value::str(k)).collect()),
            Value::Str(s) => Value::list(s.chars().map(|c| Value::from(c.to_string())).collect()),
            other => return Err(fail(other)),
        },
        (Kind::Map, None) => Value::map(IndexMap::new()),
        (Kind::Map, Some(v)) => match v {
            Value::Map(entries) => Value::map(entries.borrow().clone()),
            Value::Record(record) => Value::map(record.borrow().fields.clone()),
            other => return Err(fail(other)),
        },
        (other, _) => {
            return Err(ScriptError::type_error(format!(
                "`{}` cannot be called",
                other.name()
            )));
        }
    })
}

/// Dispatch a builtin method on a list, map, or string receiver.
pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: CallArgs,
) -> Result<Value, ScriptError> {
    match receiver {
        Value::List(items) => match name {
            "push" => {
                let value = args.require(0, "value", "push")?.clone();
                items.borrow_mut().push(value);
                Ok(Value::Nil)
            }
            "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Nil)),
            "len" => length(receiver).map(Value::Int),
            "contains" => {
                let needle = args.require(0, "value", "contains")?;
                Ok(Value::Bool(items.borrow().iter().any(|v| v.equals(needle))))
            }
            "join" => {
                let sep = str_arg(&args, 0, "sep", "join")?;
                let parts: Vec<String> = items.borrow().iter().map(Value::to_string).collect();
                Ok(Value::from(parts.join(sep)))
            }
            _ => Err(no_method(receiver, name)),
        },
        Value::Map(entries) => match name {
            "keys" => Ok(Value::list(
                entries.borrow().keys().map(|k| Value::str(k)).collect(),
            )),
            "values" => Ok(Value::list(entries.borrow().values().cloned().collect())),
            "get" => {
                let key = str_arg(&args, 0, "key", "get")?;
                let fallback = args.get(1, "default").cloned().unwrap_or(Value::Nil);
                Ok(entries.borrow().get(key).cloned().unwrap_or(fallback))
            }
            "contains" => {
                let key = str_arg(&args, 0, "key", "contains")?;
                Ok(Value::Bool(entries.borrow().contains_key(key)))
            }
            "insert" => {
                let key = str_arg(&args, 0, "key", "insert")?.to_string();
                let value = args.require(1, "value", "insert")?.clone();
                Ok(entries
                    .borrow_mut()
                    .insert(key, value)
                    .unwrap_or(Value::Nil))
            }
            "remove" => {
                let key = str_arg(&args, 0, "key", "remove")?;
                Ok(entries.borrow_mut().shift_remove(key).unwrap_or(Value::Nil))
            }
            "len" => length(receiver).map(Value::Int),
            _ => {
                let entry = entries.borrow().get(name).cloned();
                match entry {
                    Some(callee) => interp.call(&callee, args),
                    None => Err(no_method(receiver, name)),
                }
            }
        },
        Value::Str(s) => match name {
            "len" => length(receiver).map(Value::Int),
            "upper" => Ok(Value::from(s.to_uppercase())),
            "lower" => Ok(Value::from(s.to_lowercase())),
            "trim" => Ok(Value::str(s.trim())),
            "split" => {
                let sep = str_arg(&args, 0, "sep", "split")?;
                Ok(Value::list(s.split(sep).map(Value::str).collect()))
            }
            "contains" => Ok(Value::Bool(s.contains(str_arg(&args, 0, "needle", "contains")?))),
            "starts_with" => Ok(Value::Bool(
                s.starts_with(str_arg(&args, 0, "prefix", "starts_with")?),
            )),
            "ends_with" => Ok(Value::Bool(
                s.ends_with(str_arg(&args, 0, "suffix", "ends_with")?),
            )),
            _ => Err(no_method(receiver, name)),
        },
        other => Err(no_method(other, name)),
    }
}

fn no_method(receiver: &Value, name: &str) -> ScriptError {
    ScriptError::Attribute {
        owner: receiver.type_name(),
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(value: Value) -> CallArgs {
        CallArgs::positional(vec![value])
    }

    #[test]
    fn conversions() {
        assert_eq!(convert(Kind::Int, &one(Value::str(" 42 "))).unwrap(), Value::Int(42));
        assert_eq!(convert(Kind::Float, &one(Value::Int(2))).unwrap(), Value::Float(2.0));
        assert_eq!(convert(Kind::Str, &one(Value::Int(5))).unwrap(), Value::str("5"));
        assert_eq!(convert(Kind::Bool, &one(Value::str(""))).unwrap(), Value::Bool(false));
        assert!(convert(Kind::Int, &one(Value::str("x"))).is_err());
        assert!(convert(Kind::Function, &CallArgs::default()).is_err());
    }

    #[test]
    fn list_and_string_methods() {
        let mut interp = Interpreter::new("test");
        let list = Value::list(vec![Value::Int(1)]);
        call_method(&mut interp, &list, "push", one(Value::Int(2))).unwrap();
        assert_eq!(
            call_method(&mut interp, &list, "len", CallArgs::default()).unwrap(),
            Value::Int(2)
        );
        let words = call_method(&mut interp, &Value::str("a,b"), "split", one(Value::str(",")))
            .unwrap();
        assert_eq!(words, Value::list(vec![Value::str("a"), Value::str("b")]));
    }

    #[test]
    fn map_get_with_default() {
        let mut interp = Interpreter::new("test");
        let map = Value::map(IndexMap::from([("a".to_string(), Value::Int(1))]));
        let args = CallArgs::positional(vec![Value::str("missing"), Value::Int(0)]);
        assert_eq!(call_method(&mut interp, &map, "get", args).unwrap(), Value::Int(0));
        assert!(call_method(&mut interp, &map, "nope", CallArgs::default()).is_err());
    }
}
