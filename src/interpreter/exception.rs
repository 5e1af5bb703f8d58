//! Exceptions raised by script code and the non-local exits that travel
//! alongside them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::Value;

/// Builtin exception names raised by the interpreter.
pub mod names {
    /// Unknown variable.
    pub const NAME_ERROR: &str = "NameError";
    /// Operation applied to a value of the wrong type.
    pub const TYPE_ERROR: &str = "TypeError";
    /// Right type, inappropriate value.
    pub const VALUE_ERROR: &str = "ValueError";
    /// Division or modulo by zero.
    pub const ZERO_DIVISION_ERROR: &str = "ZeroDivisionError";
    /// Sequence index out of range.
    pub const INDEX_ERROR: &str = "IndexError";
    /// Unknown module member or attribute.
    pub const ATTRIBUTE_ERROR: &str = "AttributeError";
    /// Import of a module that is not installed.
    pub const MODULE_NOT_FOUND_ERROR: &str = "ModuleNotFoundError";
    /// Call depth exceeded the configured ceiling.
    pub const RECURSION_ERROR: &str = "RecursionError";
    /// `read-file` on a file that was not provided.
    pub const FILE_NOT_FOUND_ERROR: &str = "FileNotFoundError";
    /// Integer arithmetic overflow, or a sequence grown past its limit.
    pub const OVERFLOW_ERROR: &str = "OverflowError";
    /// The interpreter itself failed while running the program.
    pub const SYSTEM_ERROR: &str = "SystemError";
}

const MAX_REPEATED_FRAMES: usize = 3;

/// One entry of a traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFrame {
    /// File the frame executes.
    pub filename: String,
    /// Line being executed when the exception passed through.
    pub line: u32,
    /// Function name, or `<module>` for top-level code.
    pub function: String,
    /// Trimmed text of that line, when the source is known.
    pub source_line: Option<String>,
}

/// An exception raised while executing script code.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", self.summary())]
pub struct Exception {
    /// Exception type name, e.g. `ZeroDivisionError`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Frames active when the exception was raised, outermost first.
    pub frames: Vec<TraceFrame>,
    /// Module that could not be imported, for `ModuleNotFoundError`.
    pub missing_module: Option<String>,
}

impl Exception {
    /// Create an exception with no frames attached yet.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            frames: Vec::new(),
            missing_module: None,
        }
    }

    /// `ModuleNotFoundError` for the given module.
    pub fn module_not_found(module: &str) -> Self {
        let mut exc = Self::new(names::MODULE_NOT_FOUND_ERROR, format!("No module named '{module}'"));
        exc.missing_module = Some(module.to_string());
        exc
    }

    /// Final `Name: message` line of the traceback.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, self.message)
        }
    }

    /// Render the full traceback text, most recent call last.
    ///
    /// Runs of identical frames (deep recursion) are folded after three
    /// repetitions.
    pub fn render_traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        let mut index = 0;
        while index < self.frames.len() {
            let frame = &self.frames[index];
            let mut run = 1;
            while self.frames.get(index + run) == Some(frame) {
                run += 1;
            }
            let shown = run.min(MAX_REPEATED_FRAMES);
            for _ in 0..shown {
                out.push_str(&format!(
                    "  File \"{}\", line {}, in {}\n",
                    frame.filename, frame.line, frame.function
                ));
                if let Some(text) = frame.source_line.as_deref().filter(|text| !text.is_empty()) {
                    out.push_str(&format!("    {text}\n"));
                }
            }
            if run > shown {
                out.push_str(&format!("  [Previous line repeated {} more times]\n", run - shown));
            }
            index += run;
        }
        out.push_str(&self.summary());
        out
    }
}

/// Non-local exit from evaluation.
#[derive(Debug, Clone)]
pub enum Unwind {
    /// An exception is propagating.
    Raise(Exception),
    /// `(return …)` is leaving the current function.
    Return(Value),
    /// The host delivered an interrupt; not catchable by `try`.
    Interrupt,
    /// The debugger asked to stop the program; not catchable by `try`.
    Quit,
}

impl From<Exception> for Unwind {
    fn from(exc: Exception) -> Self {
        Unwind::Raise(exc)
    }
}

/// Signals a host can deliver from any of its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    /// Stop execution as if the user pressed Ctrl-C.
    Interrupt,
    /// Stop execution because the debugger quit.
    Quit,
}

impl From<HostSignal> for Unwind {
    fn from(signal: HostSignal) -> Self {
        match signal {
            HostSignal::Interrupt => Unwind::Interrupt,
            HostSignal::Quit => Unwind::Quit,
        }
    }
}

/// Shorthand for raising an exception from native code.
pub fn raise<T>(name: &str, message: impl Into<String>) -> Result<T, Unwind> {
    Err(Unwind::Raise(Exception::new(name, message)))
}
