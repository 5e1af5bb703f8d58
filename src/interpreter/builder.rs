use std::collections::HashSet;
use std::sync::Arc;

use super::CompileError;
use super::ast::{Expr, ExprKind, Program};
use super::ir::{Block, CompiledProgram, FunctionDef, Handler, Node, NodeKind};
use super::parser::{line_text, parse_program};
use super::value::Value;

/// Parse and lower source text in one step.
pub fn compile(source: &str, filename: &str, max_depth: usize) -> Result<CompiledProgram, CompileError> {
    let program = parse_program(source, filename, max_depth)?;
    build_ir(&program)
}

/// Build the evaluable IR from a parsed program, validating special forms.
pub fn build_ir(program: &Program) -> Result<CompiledProgram, CompileError> {
    let filename: Arc<str> = Arc::from(program.filename.as_str());
    let builder = Builder {
        filename: filename.clone(),
        source: &program.source,
    };
    let body = builder.block(&program.forms)?;
    Ok(CompiledProgram {
        filename,
        source: Arc::from(program.source.as_str()),
        body,
    })
}

/// Module names imported anywhere in the program, in first-seen order.
pub fn imported_modules(program: &CompiledProgram) -> Vec<String> {
    let mut found = Vec::new();
    collect_imports(&program.body, &mut found);
    found
}

fn collect_imports(block: &[Node], found: &mut Vec<String>) {
    for node in block {
        collect_node(node, found);
    }
}

fn collect_node(node: &Node, found: &mut Vec<String>) {
    match &node.kind {
        NodeKind::Import(name) => {
            if !found.contains(name) {
                found.push(name.clone());
            }
        }
        NodeKind::Let { value, .. } | NodeKind::Set { value, .. } | NodeKind::Await(value) => {
            collect_node(value, found)
        }
        NodeKind::Def(def) => collect_imports(&def.body, found),
        NodeKind::If {
            cond,
            then,
            otherwise,
        } => {
            collect_node(cond, found);
            collect_imports(then, found);
            collect_imports(otherwise, found);
        }
        NodeKind::While { cond, body } => {
            collect_node(cond, found);
            collect_imports(body, found);
        }
        NodeKind::Do(body) | NodeKind::And(body) | NodeKind::Or(body) => collect_imports(body, found),
        NodeKind::Async(body) => collect_imports(body, found),
        NodeKind::Return(Some(value)) => collect_node(value, found),
        NodeKind::Raise {
            message: Some(message),
            ..
        } => collect_node(message, found),
        NodeKind::Try { body, handlers } => {
            collect_imports(body, found);
            for handler in handlers {
                collect_imports(&handler.body, found);
            }
        }
        NodeKind::Call { callee, args } => {
            collect_node(callee, found);
            collect_imports(args, found);
        }
        _ => {}
    }
}

const SPECIAL_FORMS: &[&str] = &[
    "let", "set", "def", "if", "while", "do", "return", "import", "async", "await", "and", "or",
    "raise", "try", "except",
];

struct Builder<'a> {
    filename: Arc<str>,
    source: &'a str,
}

impl Builder<'_> {
    fn block(&self, forms: &[Expr]) -> Result<Block, CompileError> {
        forms.iter().map(|form| self.node(form)).collect()
    }

    fn node(&self, expr: &Expr) -> Result<Node, CompileError> {
        let kind = match &expr.kind {
            ExprKind::Integer(n) => NodeKind::Literal(Value::Int(*n)),
            ExprKind::Float(n) => NodeKind::Literal(Value::Float(*n)),
            ExprKind::String(s) => NodeKind::Literal(Value::Str(s.clone())),
            ExprKind::Keyword(k) => NodeKind::Literal(Value::Str(k.clone())),
            ExprKind::Boolean(b) => NodeKind::Literal(Value::Bool(*b)),
            ExprKind::Nil => NodeKind::Literal(Value::Nil),
            ExprKind::Symbol(sym) => self.symbol(expr, sym)?,
            ExprKind::List(items) => self.form(expr, items)?,
        };
        Ok(Node::new(kind, expr.line))
    }

    fn symbol(&self, expr: &Expr, sym: &str) -> Result<NodeKind, CompileError> {
        match sym.split_once('.') {
            Some((object, member)) if !object.is_empty() && !member.is_empty() => {
                if member.contains('.') {
                    return Err(self.error(expr, "nested attribute access is not supported"));
                }
                Ok(NodeKind::Member {
                    object: object.to_string(),
                    member: member.to_string(),
                })
            }
            _ => Ok(NodeKind::Var(sym.to_string())),
        }
    }

    fn form(&self, expr: &Expr, items: &[Expr]) -> Result<NodeKind, CompileError> {
        let Some(head) = items.first() else {
            return Err(self.error(expr, "empty expression '()'"));
        };
        let args = &items[1..];
        let kind = match head.as_symbol() {
            Some("let") => {
                let (name, value) = self.binding(expr, "let", args)?;
                NodeKind::Let { name, value }
            }
            Some("set") => {
                let (name, value) = self.binding(expr, "set", args)?;
                NodeKind::Set { name, value }
            }
            Some("def") => NodeKind::Def(Arc::new(self.function(expr, args)?)),
            Some("if") => {
                if args.len() < 2 || args.len() > 3 {
                    return Err(self.error(expr, "'if' expects a condition, a branch and an optional else branch"));
                }
                NodeKind::If {
                    cond: Box::new(self.node(&args[0])?),
                    then: vec![self.node(&args[1])?],
                    otherwise: match args.get(2) {
                        Some(other) => vec![self.node(other)?],
                        None => Vec::new(),
                    },
                }
            }
            Some("while") => {
                let Some(cond) = args.first() else {
                    return Err(self.error(expr, "'while' expects a condition"));
                };
                NodeKind::While {
                    cond: Box::new(self.node(cond)?),
                    body: self.block(&args[1..])?,
                }
            }
            Some("do") => NodeKind::Do(self.block(args)?),
            Some("return") => match args {
                [] => NodeKind::Return(None),
                [value] => NodeKind::Return(Some(Box::new(self.node(value)?))),
                _ => return Err(self.error(expr, "'return' expects at most one value")),
            },
            Some("import") => match args {
                [name] => NodeKind::Import(self.module_name(name)?),
                _ => return Err(self.error(expr, "'import' expects a single module name")),
            },
            Some("async") => NodeKind::Async(Arc::new(self.block(args)?)),
            Some("await") => match args {
                [value] => NodeKind::Await(Box::new(self.node(value)?)),
                _ => return Err(self.error(expr, "'await' expects a single value")),
            },
            Some("and") => NodeKind::And(self.block(args)?),
            Some("or") => NodeKind::Or(self.block(args)?),
            Some("raise") => match args {
                [name] => NodeKind::Raise {
                    name: self.exception_name(name)?,
                    message: None,
                },
                [name, message] => NodeKind::Raise {
                    name: self.exception_name(name)?,
                    message: Some(Box::new(self.node(message)?)),
                },
                _ => return Err(self.error(expr, "'raise' expects an exception name and an optional message")),
            },
            Some("try") => self.try_form(expr, args)?,
            Some("except") => return Err(self.error(expr, "'except' outside 'try'")),
            _ => NodeKind::Call {
                callee: Box::new(self.node(head)?),
                args: self.block(args)?,
            },
        };
        Ok(kind)
    }

    fn binding(&self, expr: &Expr, form: &str, args: &[Expr]) -> Result<(String, Box<Node>), CompileError> {
        match args {
            [name, value] => Ok((self.plain_name(name)?, Box::new(self.node(value)?))),
            _ => Err(self.error(expr, &format!("'{form}' expects a name and a value"))),
        }
    }

    fn function(&self, expr: &Expr, args: &[Expr]) -> Result<FunctionDef, CompileError> {
        if args.len() < 2 {
            return Err(self.error(expr, "'def' expects a name and a parameter list"));
        }
        let name = self.plain_name(&args[0])?;
        let Some(param_forms) = args[1].as_list() else {
            return Err(self.error(&args[1], "function parameters must be a list"));
        };
        let mut seen = HashSet::new();
        let mut params = Vec::new();
        for param in param_forms {
            let param_name = self.plain_name(param)?;
            if !seen.insert(param_name.clone()) {
                return Err(self.error(param, &format!("duplicate argument '{param_name}' in function definition")));
            }
            params.push(param_name);
        }
        Ok(FunctionDef {
            name,
            params,
            body: self.block(&args[2..])?,
            filename: self.filename.clone(),
            line: expr.line,
        })
    }

    fn try_form(&self, expr: &Expr, args: &[Expr]) -> Result<NodeKind, CompileError> {
        let split = args
            .iter()
            .position(|form| form.is_form("except"))
            .ok_or_else(|| self.error(expr, "'try' expects at least one 'except' clause"))?;
        let body = self.block(&args[..split])?;
        let mut handlers = Vec::new();
        for clause in &args[split..] {
            let Some(items) = clause.as_list().filter(|_| clause.is_form("except")) else {
                return Err(self.error(clause, "only 'except' clauses may follow them in 'try'"));
            };
            let mut rest = &items[1..];
            let mut name = None;
            let mut binding = None;
            if let Some(sym) = rest.first().and_then(Expr::as_symbol) {
                name = Some(sym.to_string());
                rest = &rest[1..];
                if rest.first().and_then(Expr::as_symbol).is_some() {
                    binding = Some(self.plain_name(&rest[0])?);
                    rest = &rest[1..];
                }
            }
            handlers.push(Handler {
                name,
                binding,
                body: self.block(rest)?,
            });
        }
        Ok(NodeKind::Try { body, handlers })
    }

    fn plain_name(&self, expr: &Expr) -> Result<String, CompileError> {
        match expr.as_symbol() {
            Some(sym) if !sym.contains('.') && !SPECIAL_FORMS.contains(&sym) => Ok(sym.to_string()),
            Some(sym) => Err(self.error(expr, &format!("cannot assign to '{sym}'"))),
            None => Err(self.error(expr, "expected a name")),
        }
    }

    fn module_name(&self, expr: &Expr) -> Result<String, CompileError> {
        let name = match &expr.kind {
            ExprKind::Symbol(sym) => sym.clone(),
            ExprKind::String(text) => text.clone(),
            _ => return Err(self.error(expr, "module name must be a symbol or string")),
        };
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(self.error(expr, &format!("invalid module name '{name}'")));
        }
        Ok(name)
    }

    fn exception_name(&self, expr: &Expr) -> Result<String, CompileError> {
        expr.as_symbol()
            .map(str::to_string)
            .ok_or_else(|| self.error(expr, "exception name must be a symbol"))
    }

    fn error(&self, expr: &Expr, message: &str) -> CompileError {
        CompileError::new(
            &*self.filename,
            expr.line,
            expr.column,
            message,
            line_text(self.source, expr.line),
        )
    }
}
