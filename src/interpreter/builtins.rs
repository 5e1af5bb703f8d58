//! Builtin functions available to every script without an import.

use std::cmp::Ordering;

use super::event::{RuntimeEvent, StreamKind, content_type};
use super::exception::{Unwind, names, raise};
use super::runtime::InterpreterHost;
use super::value::{NativeFn, NativeFunction, Value};

/// Longest list (in items) or string (in bytes) a builtin will build.
const MAX_SEQUENCE_LEN: usize = 10_000_000;

const BUILTINS: &[(&str, NativeFn)] = &[
    ("print", print),
    ("input", input),
    ("sleep", sleep),
    ("str", to_str),
    ("repr", repr),
    ("int", to_int),
    ("float", to_float),
    ("len", len),
    ("list", list),
    ("nth", nth),
    ("append", append),
    ("range", range),
    ("type", type_of),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("not", not),
    ("read-file", read_file),
    ("+", add),
    ("-", sub),
    ("*", mul),
    ("/", div),
    ("//", floor_div),
    ("%", modulo),
    ("=", eq),
    ("!=", ne),
    ("<", lt),
    (">", gt),
    ("<=", le),
    (">=", ge),
];

/// Resolve a builtin by name.
pub fn lookup(name: &str) -> Option<Value> {
    BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(builtin, func)| Value::Native(NativeFunction { name: *builtin, func: *func }))
}

/// Raise `TypeError` unless exactly `expected` arguments were passed.
pub(crate) fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), Unwind> {
    if args.len() == expected {
        return Ok(());
    }
    let plural = if expected == 1 { "" } else { "s" };
    let verb = if args.len() == 1 { "was" } else { "were" };
    raise(
        names::TYPE_ERROR,
        format!(
            "{name}() takes {expected} argument{plural} but {} {verb} given",
            args.len()
        ),
    )
}

fn at_least(name: &str, args: &[Value], minimum: usize) -> Result<(), Unwind> {
    if args.len() >= minimum {
        Ok(())
    } else {
        raise(
            names::TYPE_ERROR,
            format!("{name}() expected at least {minimum} arguments, got {}", args.len()),
        )
    }
}

pub(crate) fn number(name: &str, value: &Value) -> Result<f64, Unwind> {
    value.as_f64().map_or_else(
        || {
            raise(
                names::TYPE_ERROR,
                format!("{name}() expected a number, not '{}'", value.type_name()),
            )
        },
        Ok,
    )
}

fn overflow<T>() -> Result<T, Unwind> {
    raise(names::OVERFLOW_ERROR, "integer overflow")
}

fn print(host: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    let parts: Vec<String> = args.iter().map(Value::to_string).collect();
    host.emit(RuntimeEvent::Output {
        stream: StreamKind::Stdout,
        text: format!("{}\n", parts.join(" ")),
        content_type: content_type::TEXT_PLAIN.to_string(),
    })?;
    Ok(Value::Nil)
}

fn input(host: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    let prompt = match args.as_slice() {
        [] => String::new(),
        [prompt] => prompt.to_string(),
        _ => return arity("input", &args, 1).map(|_| Value::Nil),
    };
    if !prompt.is_empty() {
        host.emit(RuntimeEvent::Output {
            stream: StreamKind::InputPrompt,
            text: prompt.clone(),
            content_type: content_type::TEXT_PLAIN.to_string(),
        })?;
    }
    let line = host.request_input(&prompt)?;
    host.emit(RuntimeEvent::Output {
        stream: StreamKind::Input,
        text: format!("{line}\n"),
        content_type: content_type::TEXT_PLAIN.to_string(),
    })?;
    Ok(Value::Str(line))
}

fn sleep(host: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("sleep", &args, 1)?;
    let seconds = number("sleep", &args[0])?;
    if !seconds.is_finite() || seconds < 0.0 {
        return raise(names::VALUE_ERROR, "sleep length must be non-negative");
    }
    host.sleep((seconds * 1000.0).round() as u64)?;
    Ok(Value::Nil)
}

fn to_str(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("str", &args, 1)?;
    Ok(Value::Str(args[0].to_string()))
}

fn repr(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("repr", &args, 1)?;
    Ok(Value::Str(args[0].repr()))
}

fn to_int(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("int", &args, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Bool(flag) => Ok(Value::Int(i64::from(*flag))),
        Value::Float(n) if n.is_finite() => {
            let truncated = n.trunc();
            if truncated.abs() >= i64::MAX as f64 {
                overflow()
            } else {
                Ok(Value::Int(truncated as i64))
            }
        }
        Value::Float(n) => raise(
            names::VALUE_ERROR,
            format!("cannot convert float {} to integer", Value::Float(*n)),
        ),
        Value::Str(text) => text.trim().parse::<i64>().map(Value::Int).or_else(|_| {
            raise(
                names::VALUE_ERROR,
                format!("invalid literal for int() with base 10: {}", Value::Str(text.clone()).repr()),
            )
        }),
        other => raise(
            names::TYPE_ERROR,
            format!("int() argument must be a string or a number, not '{}'", other.type_name()),
        ),
    }
}

fn to_float(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("float", &args, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::Bool(flag) => Ok(Value::Float(if *flag { 1.0 } else { 0.0 })),
        Value::Str(text) => text.trim().parse::<f64>().map(Value::Float).or_else(|_| {
            raise(
                names::VALUE_ERROR,
                format!("could not convert string to float: {}", Value::Str(text.clone()).repr()),
            )
        }),
        other => raise(
            names::TYPE_ERROR,
            format!("float() argument must be a string or a number, not '{}'", other.type_name()),
        ),
    }
}

fn len(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("len", &args, 1)?;
    match &args[0] {
        Value::Str(text) => Ok(Value::Int(text.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        other => raise(
            names::TYPE_ERROR,
            format!("object of type '{}' has no len()", other.type_name()),
        ),
    }
}

fn list(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    Ok(Value::List(args))
}

fn nth(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("nth", &args, 2)?;
    let Value::Int(index) = args[1] else {
        return raise(
            names::TYPE_ERROR,
            format!("indices must be integers, not '{}'", args[1].type_name()),
        );
    };
    match &args[0] {
        Value::List(items) => normalize_index(index, items.len())
            .map(|i| items[i].clone())
            .map_or_else(|| raise(names::INDEX_ERROR, "list index out of range"), Ok),
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            normalize_index(index, chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .map_or_else(|| raise(names::INDEX_ERROR, "string index out of range"), Ok)
        }
        other => raise(
            names::TYPE_ERROR,
            format!("'{}' object is not subscriptable", other.type_name()),
        ),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn append(_: &mut dyn InterpreterHost, mut args: Vec<Value>) -> Result<Value, Unwind> {
    at_least("append", &args, 1)?;
    let rest = args.split_off(1);
    match args.pop() {
        Some(Value::List(mut items)) => {
            joined_len(items.len(), rest.len())?;
            items.extend(rest);
            Ok(Value::List(items))
        }
        Some(other) => raise(
            names::TYPE_ERROR,
            format!("append() expected a list, not '{}'", other.type_name()),
        ),
        None => Ok(Value::Nil),
    }
}

fn range(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    let mut bounds = Vec::with_capacity(args.len());
    for arg in &args {
        match arg {
            Value::Int(n) => bounds.push(*n),
            other => {
                return raise(
                    names::TYPE_ERROR,
                    format!("'{}' object cannot be interpreted as an integer", other.type_name()),
                );
            }
        }
    }
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return raise(
                names::TYPE_ERROR,
                format!("range expected 1 to 3 arguments, got {}", args.len()),
            );
        }
    };
    if step == 0 {
        return raise(names::VALUE_ERROR, "range() arg 3 must not be zero");
    }
    let span = if step > 0 { stop.saturating_sub(start) } else { start.saturating_sub(stop) };
    let count = if span <= 0 { 0 } else { (span - 1) / step.saturating_abs() + 1 };
    if count > MAX_SEQUENCE_LEN as i64 {
        return raise(names::VALUE_ERROR, "range() result is too large");
    }
    let items = (0..count).map(|i| Value::Int(start + i * step)).collect();
    Ok(Value::List(items))
}

fn type_of(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("type", &args, 1)?;
    Ok(Value::Str(args[0].type_name().to_string()))
}

fn abs(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("abs", &args, 1)?;
    match &args[0] {
        Value::Int(n) => n.checked_abs().map_or_else(overflow, |n| Ok(Value::Int(n))),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => raise(
            names::TYPE_ERROR,
            format!("bad operand type for abs(): '{}'", other.type_name()),
        ),
    }
}

fn extremum(name: &str, mut args: Vec<Value>, wanted: Ordering) -> Result<Value, Unwind> {
    if let [Value::List(_)] = args.as_slice() {
        if let Some(Value::List(items)) = args.pop() {
            args = items;
        }
    }
    let mut iter = args.into_iter();
    let Some(mut best) = iter.next() else {
        return raise(names::VALUE_ERROR, format!("{name}() arg is an empty sequence"));
    };
    for candidate in iter {
        if compare(name, &candidate, &best)? == Some(wanted) {
            best = candidate;
        }
    }
    Ok(best)
}

fn min(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    extremum("min", args, Ordering::Less)
}

fn max(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    extremum("max", args, Ordering::Greater)
}

fn not(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("not", &args, 1)?;
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn read_file(host: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("read-file", &args, 1)?;
    let Some(name) = args[0].as_str() else {
        return raise(
            names::TYPE_ERROR,
            format!("read-file() expected a file name, not '{}'", args[0].type_name()),
        );
    };
    host.read_file(name).map(Value::Str).map_or_else(
        || {
            raise(
                names::FILE_NOT_FOUND_ERROR,
                format!("[Errno 2] No such file or directory: '{name}'"),
            )
        },
        Ok,
    )
}

fn operands(op: &str, a: &Value, b: &Value) -> Result<(f64, f64), Unwind> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => raise(
            names::TYPE_ERROR,
            format!(
                "unsupported operand type(s) for {op}: '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ),
        ),
    }
}

fn fold(
    args: Vec<Value>,
    empty: Value,
    step: impl Fn(Value, Value) -> Result<Value, Unwind>,
) -> Result<Value, Unwind> {
    let mut iter = args.into_iter();
    let Some(mut acc) = iter.next() else {
        return Ok(empty);
    };
    for value in iter {
        acc = step(acc, value)?;
    }
    Ok(acc)
}

fn add(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    fold(args, Value::Int(0), |a, b| match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.checked_add(y).map_or_else(overflow, |n| Ok(Value::Int(n))),
        (Value::Str(x), Value::Str(y)) => {
            joined_len(x.len(), y.len())?;
            Ok(Value::Str(x + &y))
        }
        (Value::List(mut x), Value::List(y)) => {
            joined_len(x.len(), y.len())?;
            x.extend(y);
            Ok(Value::List(x))
        }
        (a, b) => operands("+", &a, &b).map(|(x, y)| Value::Float(x + y)),
    })
}

fn sub(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    if let [only] = args.as_slice() {
        return match only {
            Value::Int(n) => n.checked_neg().map_or_else(overflow, |n| Ok(Value::Int(n))),
            Value::Float(n) => Ok(Value::Float(-n)),
            other => raise(
                names::TYPE_ERROR,
                format!("bad operand type for unary -: '{}'", other.type_name()),
            ),
        };
    }
    at_least("-", &args, 1)?;
    fold(args, Value::Int(0), |a, b| match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.checked_sub(y).map_or_else(overflow, |n| Ok(Value::Int(n))),
        (a, b) => operands("-", &a, &b).map(|(x, y)| Value::Float(x - y)),
    })
}

/// Length of a sequence of `len` elements repeated `count` times, or
/// `OverflowError` when it would exceed [`MAX_SEQUENCE_LEN`].
fn repeated_len(len: usize, count: i64) -> Result<(usize, usize), Unwind> {
    let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    match len.checked_mul(count) {
        Some(total) if total <= MAX_SEQUENCE_LEN => Ok((count, total)),
        _ => raise(names::OVERFLOW_ERROR, "repeated sequence is too long"),
    }
}

fn joined_len(a: usize, b: usize) -> Result<(), Unwind> {
    match a.checked_add(b) {
        Some(total) if total <= MAX_SEQUENCE_LEN => Ok(()),
        _ => raise(names::OVERFLOW_ERROR, "sequence is too long"),
    }
}

fn mul(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    fold(args, Value::Int(1), |a, b| match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.checked_mul(y).map_or_else(overflow, |n| Ok(Value::Int(n))),
        (Value::Str(text), Value::Int(n)) | (Value::Int(n), Value::Str(text)) => {
            let (count, _) = repeated_len(text.len(), n)?;
            Ok(Value::Str(text.repeat(count)))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            let (count, total) = repeated_len(items.len(), n)?;
            let mut out = Vec::with_capacity(total);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::List(out))
        }
        (a, b) => operands("*", &a, &b).map(|(x, y)| Value::Float(x * y)),
    })
}

fn div(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    at_least("/", &args, 2)?;
    fold(args, Value::Nil, |a, b| {
        let (x, y) = operands("/", &a, &b)?;
        if y == 0.0 {
            return raise(names::ZERO_DIVISION_ERROR, "division by zero");
        }
        Ok(Value::Float(x / y))
    })
}

fn floor_div(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("//", &args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => {
            raise(names::ZERO_DIVISION_ERROR, "integer division or modulo by zero")
        }
        (Value::Int(x), Value::Int(y)) => {
            let quotient = x.checked_div(*y).map_or_else(overflow, Ok)?;
            let adjust = x % y != 0 && ((*x < 0) != (*y < 0));
            Ok(Value::Int(if adjust { quotient - 1 } else { quotient }))
        }
        (a, b) => {
            let (x, y) = operands("//", a, b)?;
            if y == 0.0 {
                return raise(names::ZERO_DIVISION_ERROR, "float floor division by zero");
            }
            Ok(Value::Float((x / y).floor()))
        }
    }
}

fn modulo(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("%", &args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => {
            raise(names::ZERO_DIVISION_ERROR, "integer division or modulo by zero")
        }
        (Value::Int(x), Value::Int(y)) => {
            let rem = x.checked_rem(*y).unwrap_or(0);
            let adjust = rem != 0 && ((rem < 0) != (*y < 0));
            Ok(Value::Int(if adjust { rem + y } else { rem }))
        }
        (a, b) => {
            let (x, y) = operands("%", a, b)?;
            if y == 0.0 {
                return raise(names::ZERO_DIVISION_ERROR, "float modulo");
            }
            let rem = x % y;
            let adjust = rem != 0.0 && ((rem < 0.0) != (y < 0.0));
            Ok(Value::Float(if adjust { rem + y } else { rem }))
        }
    }
}

/// Ordering between two values; `None` when they are unordered (NaN).
pub(crate) fn compare(op: &str, a: &Value, b: &Value) -> Result<Option<Ordering>, Unwind> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::Int(x), Value::Int(y)) => Ok(Some(x.cmp(y))),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            _ => raise(
                names::TYPE_ERROR,
                format!(
                    "'{op}' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ),
            ),
        },
    }
}

fn chain(op: &str, args: &[Value], accept: impl Fn(Ordering) -> bool) -> Result<Value, Unwind> {
    at_least(op, args, 2)?;
    for pair in args.windows(2) {
        match compare(op, &pair[0], &pair[1])? {
            Some(ordering) if accept(ordering) => {}
            _ => return Ok(Value::Bool(false)),
        }
    }
    Ok(Value::Bool(true))
}

fn eq(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    at_least("=", &args, 2)?;
    Ok(Value::Bool(args.windows(2).all(|pair| pair[0] == pair[1])))
}

fn ne(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    arity("!=", &args, 2)?;
    Ok(Value::Bool(args[0] != args[1]))
}

fn lt(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    chain("<", &args, |o| o == Ordering::Less)
}

fn gt(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    chain(">", &args, |o| o == Ordering::Greater)
}

fn le(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    chain("<=", &args, |o| o != Ordering::Greater)
}

fn ge(_: &mut dyn InterpreterHost, args: Vec<Value>) -> Result<Value, Unwind> {
    chain(">=", &args, |o| o != Ordering::Less)
}
