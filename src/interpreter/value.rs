use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use super::exception::Unwind;
use super::ir::{Block, FunctionDef};
use super::runtime::InterpreterHost;

/// Runtime value of the script language.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Immutable list.
    List(Vec<Value>),
    /// User-defined function bound to the namespace it was defined in.
    Function(Closure),
    /// Builtin or module-provided native function.
    Native(NativeFunction),
    /// Imported module.
    Module(Arc<ModuleObject>),
    /// Deferred computation created by `(async …)`.
    Deferred(Arc<Deferred>),
}

/// A function definition paired with its defining namespace.
#[derive(Debug, Clone)]
pub struct Closure {
    /// Compiled definition.
    pub def: Arc<FunctionDef>,
    /// Index of the namespace whose globals the body sees.
    pub namespace: usize,
}

/// Signature shared by every native function.
pub type NativeFn = fn(&mut dyn InterpreterHost, Vec<Value>) -> Result<Value, Unwind>;

/// Native function value.
#[derive(Clone, Copy)]
pub struct NativeFunction {
    /// Name shown in error messages and `repr`.
    pub name: &'static str,
    /// Implementation.
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin {}>", self.name)
    }
}

/// Loaded module: a name and its exported members.
#[derive(Debug)]
pub struct ModuleObject {
    /// Module name.
    pub name: String,
    /// Exported members.
    pub members: BTreeMap<String, Value>,
}

/// Body captured by `(async …)`, evaluated when awaited.
#[derive(Debug)]
pub struct Deferred {
    /// Statements to run.
    pub body: Arc<Block>,
    /// Snapshot of the enclosing frame's locals.
    pub locals: HashMap<String, Value>,
    /// Namespace the body resolves globals in.
    pub namespace: usize,
    /// File the body was written in.
    pub filename: Arc<str>,
}

impl Value {
    /// Type name reported by `type` and in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin",
            Value::Module(_) => "module",
            Value::Deferred(_) => "async",
        }
    }

    /// Truthiness used by `if`, `while`, `and`, `or` and `not`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(flag) => *flag,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Convenience accessor for string references.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric view used by arithmetic; booleans are not numbers here.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Quoted representation, as printed inside lists.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(text) => {
                let escaped = text
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n")
                    .replace('\t', "\\t");
                format!("\"{escaped}\"")
            }
            other => other.to_string(),
        }
    }

    /// JSON rendering used in `end` messages and run outcomes.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(format_float(*n))),
            Value::Str(text) => serde_json::Value::String(text.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(&a.def, &b.def),
            (Value::Native(a), Value::Native(b)) => a.name == b.name,
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Deferred(a), Value::Deferred(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::Str(text) => write!(f, "{text}"),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Value::Function(closure) => write!(f, "<function {}>", closure.def.name),
            Value::Native(native) => write!(f, "<builtin {}>", native.name),
            Value::Module(module) => write!(f, "<module {}>", module.name),
            Value::Deferred(_) => write!(f, "<async>"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(flag) => serializer.serialize_bool(*flag),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::Str(text) => serializer.serialize_str(text),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

/// Render floats the way novices expect: `3.0`, not `3`.
fn format_float(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{n:.1}")
    } else {
        format!("{n}")
    }
}
