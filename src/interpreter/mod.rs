//! The restricted scripting language executed by sandboxed runs.
//!
//! Source text is parsed into S-expressions, lowered into a line-annotated
//! IR and evaluated by a tree-walking [`Interpreter`]. The interpreter never
//! touches the outside world directly: output, input, sleeping, debugging
//! and file access all go through an [`InterpreterHost`].

/// Abstract syntax tree definitions for the script language.
pub mod ast;
/// Builders that translate parsed programs into the IR.
pub mod builder;
/// Functions available without an import.
pub mod builtins;
/// Low-level events produced while a program runs.
pub mod event;
/// Exceptions, tracebacks and non-local exits.
pub mod exception;
/// Typed intermediate representation structures.
pub mod ir;
/// Importable modules and the registry that holds them.
pub mod modules;
/// Parser for the script language.
pub mod parser;
/// Evaluator and the host trait it runs against.
pub mod runtime;
/// Runtime values.
pub mod value;

pub use ast::{Expr, Program};
pub use builder::{build_ir, compile, imported_modules};
pub use event::{RuntimeEvent, StreamKind, content_type};
pub use exception::{Exception, HostSignal, TraceFrame};
pub use ir::CompiledProgram;
pub use modules::{Module, ModuleRegistry, ModuleSource};
pub use parser::parse_program;
pub use runtime::{Interpreter, InterpreterHost, RuntimeError};
pub use value::Value;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Syntax or form-shape error found before execution starts.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("  File \"{filename}\", line {line}\n    {}\nSyntaxError: {message}", .source_line.trim())]
pub struct CompileError {
    /// File being compiled.
    pub filename: String,
    /// 1-based line of the offending token.
    pub line: u32,
    /// 1-based column of the offending token.
    pub column: u32,
    /// What went wrong.
    pub message: String,
    /// Text of the offending line.
    pub source_line: String,
}

impl CompileError {
    /// Create a compile error at the given position.
    pub fn new(
        filename: impl Into<String>,
        line: u32,
        column: u32,
        message: impl Into<String>,
        source_line: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            line,
            column,
            message: message.into(),
            source_line: source_line.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_errors_render_like_tracebacks() {
        let err = compile("(print 1)\n  (print (+ 1 2)", "main.scm", 100).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(
            err.to_string(),
            "  File \"main.scm\", line 2\n    (print (+ 1 2)\nSyntaxError: '(' was never closed"
        );
    }
}
