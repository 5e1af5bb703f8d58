use serde::{Deserialize, Serialize};

/// Generic S-expression node kinds used by the script language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ExprKind {
    /// A bare symbol (may contain a `.` for module member access).
    Symbol(String),
    /// Keyword tokens (leading colon).
    Keyword(String),
    /// String literal.
    String(String),
    /// Signed integer literal.
    Integer(i64),
    /// Floating-point literal.
    Float(f64),
    /// Boolean literal.
    Boolean(bool),
    /// The `nil` literal.
    Nil,
    /// Nested list.
    List(Vec<Expr>),
}

/// An S-expression annotated with the position where it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// Node payload.
    pub kind: ExprKind,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub column: u32,
}

impl Expr {
    /// Construct an expression at the given position.
    pub fn new(kind: ExprKind, line: u32, column: u32) -> Self {
        Self { kind, line, column }
    }

    /// Symbol text, if this node is a symbol.
    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Symbol(sym) => Some(sym),
            _ => None,
        }
    }

    /// List items, if this node is a list.
    pub fn as_list(&self) -> Option<&[Expr]> {
        match &self.kind {
            ExprKind::List(items) => Some(items),
            _ => None,
        }
    }

    /// Whether this node is a list whose head is the given symbol.
    pub fn is_form(&self, head: &str) -> bool {
        self.as_list()
            .and_then(|items| items.first())
            .and_then(Expr::as_symbol)
            == Some(head)
    }
}

/// Parsed source file: the raw forms plus the text they came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// File name used in tracebacks and compile errors.
    pub filename: String,
    /// Parsed top-level forms.
    pub forms: Vec<Expr>,
    /// Original source text, retained for traceback rendering.
    pub source: String,
}

impl Program {
    /// Construct a program from its parts.
    pub fn new(filename: impl Into<String>, source: impl Into<String>, forms: Vec<Expr>) -> Self {
        Self {
            filename: filename.into(),
            source: source.into(),
            forms,
        }
    }
}
