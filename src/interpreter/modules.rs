//! Importable modules: native ones shipped with the interpreter and script
//! modules installed at runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::CompileError;
use super::builder::compile;
use super::builtins::{arity, number};
use super::event::{RuntimeEvent, StreamKind, content_type};
use super::exception::{Unwind, names, raise};
use super::ir::CompiledProgram;
use super::runtime::InterpreterHost;
use super::value::{NativeFn, NativeFunction, Value};

/// How a module's members come into existence.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// Members provided directly by Rust code.
    Native(BTreeMap<String, Value>),
    /// Script evaluated in its own namespace on first import; its globals
    /// become the members.
    Script(Arc<CompiledProgram>),
}

/// An installable module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Name used in `(import …)`.
    pub name: String,
    /// Member provider.
    pub source: ModuleSource,
}

impl Module {
    /// Native module from a member table.
    pub fn native(name: impl Into<String>, members: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            source: ModuleSource::Native(members),
        }
    }

    /// Compile a script module. Frames inside it report `filename`.
    pub fn script(
        name: impl Into<String>,
        filename: &str,
        source: &str,
        max_depth: usize,
    ) -> Result<Self, CompileError> {
        let program = compile(source, filename, max_depth)?;
        Ok(Self {
            name: name.into(),
            source: ModuleSource::Script(Arc::new(program)),
        })
    }
}

/// Set of modules a run may import.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Module>,
}

impl ModuleRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the standard modules (`math`, `image`).
    pub fn with_std() -> Self {
        let mut registry = Self::new();
        registry.install(math_module());
        registry.install(image_module());
        registry
    }

    /// Add or replace a module.
    pub fn install(&mut self, module: Module) {
        self.modules.insert(module.name.clone(), module);
    }

    /// Look up a module by name.
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Whether a module is installed.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Installed module names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}

fn members(table: &[(&'static str, NativeFn)]) -> BTreeMap<String, Value> {
    table
        .iter()
        .map(|(name, func)| {
            (
                name.to_string(),
                Value::Native(NativeFunction { name: *name, func: *func }),
            )
        })
        .collect()
}

const MATH: &[(&str, NativeFn)] = &[
    ("sqrt", math_sqrt),
    ("floor", math_floor),
    ("ceil", math_ceil),
    ("pow", math_pow),
];

const IMAGE: &[(&str, NativeFn)] = &[("show", image_show)];

fn math_module() -> Module {
    let mut table = members(MATH);
    table.insert("pi".to_string(), Value::Float(std::f64::consts::PI));
    Module::native("math", table)
}

fn math_sqrt(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("sqrt", &args, 1)?;
    let x = number("sqrt", &args[0])?;
    if x < 0.0 {
        return raise(names::VALUE_ERROR, "math domain error");
    }
    Ok(Value::Float(x.sqrt()))
}

fn rounded(name: &str, args: &[Value], op: fn(f64) -> f64) -> Result<Value, Unwind> {
    arity(name, args, 1)?;
    if let Value::Int(n) = args[0] {
        return Ok(Value::Int(n));
    }
    let x = op(number(name, &args[0])?);
    if !x.is_finite() {
        return raise(names::OVERFLOW_ERROR, "cannot convert float infinity to integer");
    }
    if x.abs() >= i64::MAX as f64 {
        return raise(names::OVERFLOW_ERROR, "integer overflow");
    }
    Ok(Value::Int(x as i64))
}

fn math_floor(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    rounded("floor", &args, f64::floor)
}

fn math_ceil(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    rounded("ceil", &args, f64::ceil)
}

fn math_pow(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("pow", &args, 2)?;
    let base = number("pow", &args[0])?;
    let exponent = number("pow", &args[1])?;
    if base == 0.0 && exponent < 0.0 {
        return raise(names::VALUE_ERROR, "math domain error");
    }
    Ok(Value::Float(base.powf(exponent)))
}

fn image_module() -> Module {
    Module::native("image", members(IMAGE))
}

/// `(image.show format base64-data)`: emit an image without decoding it.
fn image_show(host: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("show", &args, 2)?;
    let (Some(format), Some(data)) = (args[0].as_str(), args[1].as_str()) else {
        return raise(names::TYPE_ERROR, "show() expects a format and base64 data as strings");
    };
    if format.is_empty() || !format.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return raise(names::VALUE_ERROR, format!("unsupported image format '{format}'"));
    }
    host.emit(RuntimeEvent::Output {
        stream: StreamKind::Image,
        text: data.to_string(),
        content_type: content_type::image(format),
    })?;
    Ok(Value::Nil)
}
