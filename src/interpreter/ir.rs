use std::sync::Arc;

use super::value::Value;

/// A lowered program ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    /// File name reported in tracebacks and line events.
    pub filename: Arc<str>,
    /// Source text, kept for rendering traceback lines.
    pub source: Arc<str>,
    /// Top-level statements.
    pub body: Block,
}

/// Sequence of statements. Every node in a block is a statement and
/// produces a line event when it starts executing.
pub type Block = Vec<Node>;

/// A single IR node annotated with the line where it starts.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node payload.
    pub kind: NodeKind,
    /// 1-based source line.
    pub line: u32,
}

impl Node {
    /// Construct a node.
    pub fn new(kind: NodeKind, line: u32) -> Self {
        Self { kind, line }
    }
}

/// Node payloads produced by the builder.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Constant value.
    Literal(Value),
    /// Variable lookup.
    Var(String),
    /// `module.member` lookup.
    Member {
        /// Name bound to the module object.
        object: String,
        /// Attribute read from it.
        member: String,
    },
    /// `(let name value)`.
    Let {
        /// Bound name.
        name: String,
        /// Value expression.
        value: Box<Node>,
    },
    /// `(set name value)`.
    Set {
        /// Existing binding to update.
        name: String,
        /// Value expression.
        value: Box<Node>,
    },
    /// `(def name (params…) body…)`.
    Def(Arc<FunctionDef>),
    /// `(if cond then [else])`.
    If {
        /// Condition.
        cond: Box<Node>,
        /// Taken branch.
        then: Block,
        /// Fallback branch (may be empty).
        otherwise: Block,
    },
    /// `(while cond body…)`.
    While {
        /// Loop condition, re-checked before every iteration.
        cond: Box<Node>,
        /// Loop body.
        body: Block,
    },
    /// `(do body…)`.
    Do(Block),
    /// `(return [value])`.
    Return(Option<Box<Node>>),
    /// `(import name)`.
    Import(String),
    /// `(async body…)`.
    Async(Arc<Block>),
    /// `(await value)`.
    Await(Box<Node>),
    /// Short-circuit conjunction.
    And(Vec<Node>),
    /// Short-circuit disjunction.
    Or(Vec<Node>),
    /// `(raise Name [message])`.
    Raise {
        /// Exception type name.
        name: String,
        /// Optional message expression.
        message: Option<Box<Node>>,
    },
    /// `(try body… (except …)…)`.
    Try {
        /// Protected statements.
        body: Block,
        /// Handlers, checked in order.
        handlers: Vec<Handler>,
    },
    /// Function application.
    Call {
        /// Callee expression.
        callee: Box<Node>,
        /// Argument expressions.
        args: Vec<Node>,
    },
}

/// User-defined function.
#[derive(Debug)]
pub struct FunctionDef {
    /// Function name.
    pub name: String,
    /// Parameter names.
    pub params: Vec<String>,
    /// Function body.
    pub body: Block,
    /// File the function was defined in.
    pub filename: Arc<str>,
    /// Line of the `def` form.
    pub line: u32,
}

/// `except` clause of a `try` form.
#[derive(Debug, Clone)]
pub struct Handler {
    /// Exception name to match; `None` catches every exception.
    pub name: Option<String>,
    /// Variable bound to the exception message.
    pub binding: Option<String>,
    /// Handler statements.
    pub body: Block,
}

impl Handler {
    /// Whether this handler catches an exception with the given name.
    pub fn matches(&self, exception: &str) -> bool {
        match &self.name {
            None => true,
            Some(name) => name == exception || name == "Exception",
        }
    }
}
