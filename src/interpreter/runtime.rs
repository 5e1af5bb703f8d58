use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use super::builtins;
use super::event::RuntimeEvent;
use super::exception::{Exception, HostSignal, TraceFrame, Unwind, names};
use super::ir::{Block, CompiledProgram, Handler, Node, NodeKind};
use super::modules::{ModuleRegistry, ModuleSource};
use super::parser::line_text;
use super::value::{Closure, Deferred, ModuleObject, Value};

/// Host trait implemented by environments that execute scripts.
///
/// Every interaction the script has with the outside world goes through
/// here. Each callback may answer with a [`HostSignal`] to stop execution.
pub trait InterpreterHost {
    /// Deliver an event produced by the script.
    fn emit(&mut self, event: RuntimeEvent) -> Result<(), HostSignal>;
    /// Block until a line of input is available.
    fn request_input(&mut self, prompt: &str) -> Result<String, HostSignal>;
    /// Pause execution.
    fn sleep(&mut self, duration_ms: u64) -> Result<(), HostSignal>;
    /// A statement is about to execute on `line` of `filename`.
    fn on_line(&mut self, filename: &str, line: u32) -> Result<(), HostSignal>;
    /// Called before every node evaluation.
    fn poll(&mut self) -> Result<(), HostSignal>;
    /// Contents of a read-only virtual file, if one was provided.
    fn read_file(&self, name: &str) -> Option<String>;
}

/// Ways a run can stop without producing a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// An exception escaped the program.
    #[error("{0}")]
    Exception(Exception),
    /// The host delivered an interrupt.
    #[error("interrupted")]
    Interrupted,
    /// The debugger quit the program.
    #[error("quit by debugger")]
    Quit,
}

struct Frame {
    function: String,
    filename: Arc<str>,
    line: u32,
    last_event_line: Option<u32>,
    /// `None` for module-level code, which binds into its namespace.
    locals: Option<HashMap<String, Value>>,
    namespace: usize,
}

impl Frame {
    fn new(
        function: impl Into<String>,
        filename: Arc<str>,
        line: u32,
        locals: Option<HashMap<String, Value>>,
        namespace: usize,
    ) -> Self {
        Self {
            function: function.into(),
            filename,
            line,
            last_event_line: None,
            locals,
            namespace,
        }
    }
}

/// Tree-walking evaluator for compiled programs.
pub struct Interpreter<H> {
    host: H,
    registry: ModuleRegistry,
    namespaces: Vec<HashMap<String, Value>>,
    frames: Vec<Frame>,
    loaded: HashMap<String, Value>,
    sources: HashMap<Arc<str>, Arc<str>>,
    recursion_limit: usize,
}

impl<H: InterpreterHost> Interpreter<H> {
    /// Create an interpreter over `host` that can import from `registry`.
    pub fn new(host: H, registry: ModuleRegistry, recursion_limit: usize) -> Self {
        Self {
            host,
            registry,
            namespaces: Vec::new(),
            frames: Vec::new(),
            loaded: HashMap::new(),
            sources: HashMap::new(),
            recursion_limit: recursion_limit.max(1),
        }
    }

    /// Execute a program from the beginning with fresh globals.
    ///
    /// Returns the value of the last top-level statement (or of a top-level
    /// `return`), awaiting it while it is still deferred.
    pub fn run(&mut self, program: &CompiledProgram) -> Result<Value, RuntimeError> {
        self.namespaces = vec![HashMap::new()];
        self.frames.clear();
        self.loaded.clear();
        self.sources.clear();
        self.sources
            .insert(program.filename.clone(), program.source.clone());

        let frame = Frame::new("<module>", program.filename.clone(), 1, None, 0);
        let result = self.in_frame(frame, |this| {
            let value = match this.block(&program.body) {
                Err(Unwind::Return(value)) => value,
                other => other?,
            };
            this.settle(value)
        });

        match result {
            Ok(value) | Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Raise(exc)) => Err(RuntimeError::Exception(exc)),
            Err(Unwind::Interrupt) => Err(RuntimeError::Interrupted),
            Err(Unwind::Quit) => Err(RuntimeError::Quit),
        }
    }

    /// Borrow the host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutably borrow the host.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Consume the interpreter, returning its host.
    pub fn into_host(self) -> H {
        self.host
    }

    /// Globals of the main program after (or during) a run.
    pub fn globals(&self) -> BTreeMap<String, Value> {
        self.namespaces
            .first()
            .map(|globals| {
                globals
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn in_frame<T>(
        &mut self,
        frame: Frame,
        body: impl FnOnce(&mut Self) -> Result<T, Unwind>,
    ) -> Result<T, Unwind> {
        if self.frames.len() >= self.recursion_limit {
            return Err(Exception::new(
                names::RECURSION_ERROR,
                "maximum recursion depth exceeded",
            )
            .into());
        }
        self.frames.push(frame);
        let result = body(self);
        self.frames.pop();
        result
    }

    fn block(&mut self, block: &[Node]) -> Result<Value, Unwind> {
        let mut last = Value::Nil;
        for node in block {
            self.line_event(node.line, false)?;
            last = self.eval(node)?;
        }
        Ok(last)
    }

    /// Report a line to the host when it differs from the frame's previous
    /// report, or unconditionally when `force` is set.
    fn line_event(&mut self, line: u32, force: bool) -> Result<(), Unwind> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        frame.line = line;
        if !force && frame.last_event_line == Some(line) {
            return Ok(());
        }
        frame.last_event_line = Some(line);
        let filename = frame.filename.clone();
        self.host.on_line(&filename, line)?;
        Ok(())
    }

    fn set_line(&mut self, line: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    fn eval(&mut self, node: &Node) -> Result<Value, Unwind> {
        match self.eval_node(node) {
            Err(Unwind::Raise(mut exc)) if exc.frames.is_empty() => {
                exc.frames = self.traceback();
                Err(Unwind::Raise(exc))
            }
            other => other,
        }
    }

    fn eval_node(&mut self, node: &Node) -> Result<Value, Unwind> {
        self.host.poll()?;
        match &node.kind {
            NodeKind::Literal(value) => Ok(value.clone()),
            NodeKind::Var(name) => self.lookup(name),
            NodeKind::Member { object, member } => self.member(object, member),
            NodeKind::Let { name, value } => {
                let value = self.eval(value)?;
                self.bind(name, value);
                Ok(Value::Nil)
            }
            NodeKind::Set { name, value } => {
                let value = self.eval(value)?;
                self.assign(name, value)?;
                Ok(Value::Nil)
            }
            NodeKind::Def(def) => {
                let closure = Closure {
                    def: def.clone(),
                    namespace: self.namespace(),
                };
                self.bind(&def.name, Value::Function(closure));
                Ok(Value::Nil)
            }
            NodeKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.block(then)
                } else {
                    self.block(otherwise)
                }
            }
            NodeKind::While { cond, body } => {
                let mut first = true;
                loop {
                    if !first {
                        self.line_event(node.line, true)?;
                    }
                    first = false;
                    if !self.eval(cond)?.is_truthy() {
                        break;
                    }
                    self.block(body)?;
                }
                Ok(Value::Nil)
            }
            NodeKind::Do(body) => self.block(body),
            NodeKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Nil,
                };
                Err(Unwind::Return(value))
            }
            NodeKind::Import(name) => {
                let module = self.import(name)?;
                self.bind(name, module);
                Ok(Value::Nil)
            }
            NodeKind::Async(body) => Ok(Value::Deferred(Arc::new(Deferred {
                body: body.clone(),
                locals: self.capture(),
                namespace: self.namespace(),
                filename: self.filename(),
            }))),
            NodeKind::Await(value) => {
                let value = self.eval(value)?;
                self.settle(value)
            }
            NodeKind::And(items) => {
                let mut last = Value::Bool(true);
                for item in items {
                    last = self.eval(item)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            NodeKind::Or(items) => {
                let mut last = Value::Bool(false);
                for item in items {
                    last = self.eval(item)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            NodeKind::Raise { name, message } => {
                let message = match message {
                    Some(message) => self.eval(message)?.to_string(),
                    None => String::new(),
                };
                Err(Exception::new(name.as_str(), message).into())
            }
            NodeKind::Try { body, handlers } => self.try_block(body, handlers),
            NodeKind::Call { callee, args } => {
                self.set_line(node.line);
                let callee = self.eval(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.set_line(node.line);
                self.call(callee, values)
            }
        }
    }

    fn call(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, Unwind> {
        match callee {
            Value::Function(closure) => self.call_closure(&closure, args),
            Value::Native(native) => (native.func)(&mut self.host, args),
            other => Err(Exception::new(
                names::TYPE_ERROR,
                format!("'{}' object is not callable", other.type_name()),
            )
            .into()),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value, Unwind> {
        let def = &closure.def;
        if args.len() != def.params.len() {
            let expected = def.params.len();
            let plural = if expected == 1 { "" } else { "s" };
            let verb = if args.len() == 1 { "was" } else { "were" };
            return Err(Exception::new(
                names::TYPE_ERROR,
                format!(
                    "{}() takes {expected} positional argument{plural} but {} {verb} given",
                    def.name,
                    args.len()
                ),
            )
            .into());
        }
        let locals = def.params.iter().cloned().zip(args).collect();
        let frame = Frame::new(
            def.name.clone(),
            def.filename.clone(),
            def.line,
            Some(locals),
            closure.namespace,
        );
        self.in_frame(frame, |this| match this.block(&def.body) {
            Err(Unwind::Return(value)) => Ok(value),
            other => other,
        })
    }

    fn try_block(&mut self, body: &Block, handlers: &[Handler]) -> Result<Value, Unwind> {
        match self.block(body) {
            Err(Unwind::Raise(exc)) => {
                let Some(handler) = handlers.iter().find(|handler| handler.matches(&exc.name)) else {
                    return Err(Unwind::Raise(exc));
                };
                if let Some(binding) = &handler.binding {
                    self.bind(binding, Value::Str(exc.message.clone()));
                }
                self.block(&handler.body)
            }
            other => other,
        }
    }

    /// Evaluate deferred values until a concrete value remains.
    fn settle(&mut self, mut value: Value) -> Result<Value, Unwind> {
        loop {
            match value {
                Value::Deferred(deferred) => value = self.run_deferred(&deferred)?,
                other => return Ok(other),
            }
        }
    }

    fn run_deferred(&mut self, deferred: &Deferred) -> Result<Value, Unwind> {
        let frame = Frame::new(
            "<async>",
            deferred.filename.clone(),
            deferred.body.first().map_or(1, |node| node.line),
            Some(deferred.locals.clone()),
            deferred.namespace,
        );
        self.in_frame(frame, |this| match this.block(&deferred.body) {
            Err(Unwind::Return(value)) => Ok(value),
            other => other,
        })
    }

    fn import(&mut self, name: &str) -> Result<Value, Unwind> {
        if let Some(module) = self.loaded.get(name) {
            return Ok(module.clone());
        }
        let Some(module) = self.registry.get(name).cloned() else {
            return Err(Exception::module_not_found(name).into());
        };
        let members = match module.source {
            ModuleSource::Native(members) => members,
            ModuleSource::Script(program) => {
                let namespace = self.namespaces.len();
                self.namespaces.push(HashMap::new());
                self.sources
                    .insert(program.filename.clone(), program.source.clone());
                let frame = Frame::new("<module>", program.filename.clone(), 1, None, namespace);
                self.in_frame(frame, |this| match this.block(&program.body) {
                    Err(Unwind::Return(_)) => Ok(Value::Nil),
                    other => other,
                })?;
                self.namespaces[namespace]
                    .iter()
                    .map(|(member, value)| (member.clone(), value.clone()))
                    .collect()
            }
        };
        let value = Value::Module(Arc::new(ModuleObject {
            name: name.to_string(),
            members,
        }));
        self.loaded.insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn member(&self, object: &str, member: &str) -> Result<Value, Unwind> {
        match self.lookup(object)? {
            Value::Module(module) => module.members.get(member).cloned().ok_or_else(|| {
                Exception::new(
                    names::ATTRIBUTE_ERROR,
                    format!("module '{}' has no attribute '{member}'", module.name),
                )
                .into()
            }),
            other => Err(Exception::new(
                names::ATTRIBUTE_ERROR,
                format!("'{}' object has no attribute '{member}'", other.type_name()),
            )
            .into()),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, Unwind> {
        if let Some(frame) = self.frames.last() {
            if let Some(value) = frame.locals.as_ref().and_then(|locals| locals.get(name)) {
                return Ok(value.clone());
            }
            if let Some(value) = self
                .namespaces
                .get(frame.namespace)
                .and_then(|globals| globals.get(name))
            {
                return Ok(value.clone());
            }
        }
        builtins::lookup(name).ok_or_else(|| {
            Exception::new(names::NAME_ERROR, format!("name '{name}' is not defined")).into()
        })
    }

    fn bind(&mut self, name: &str, value: Value) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        match &mut frame.locals {
            Some(locals) => {
                locals.insert(name.to_string(), value);
            }
            None => {
                if let Some(globals) = self.namespaces.get_mut(frame.namespace) {
                    globals.insert(name.to_string(), value);
                }
            }
        }
    }

    /// Update the nearest existing binding of `name`.
    fn assign(&mut self, name: &str, value: Value) -> Result<(), Unwind> {
        if let Some(frame) = self.frames.last_mut() {
            if let Some(slot) = frame.locals.as_mut().and_then(|locals| locals.get_mut(name)) {
                *slot = value;
                return Ok(());
            }
            if let Some(slot) = self
                .namespaces
                .get_mut(frame.namespace)
                .and_then(|globals| globals.get_mut(name))
            {
                *slot = value;
                return Ok(());
            }
        }
        Err(Exception::new(
            names::NAME_ERROR,
            format!("name '{name}' is not defined"),
        )
        .into())
    }

    fn namespace(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.namespace)
    }

    fn filename(&self) -> Arc<str> {
        self.frames
            .last()
            .map_or_else(|| Arc::from("<unknown>"), |frame| frame.filename.clone())
    }

    fn capture(&self) -> HashMap<String, Value> {
        self.frames
            .last()
            .and_then(|frame| frame.locals.clone())
            .unwrap_or_default()
    }

    fn traceback(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .map(|frame| TraceFrame {
                filename: frame.filename.to_string(),
                line: frame.line,
                function: frame.function.clone(),
                source_line: self
                    .sources
                    .get(&frame.filename)
                    .map(|source| line_text(source, frame.line).trim().to_string()),
            })
            .collect()
    }
}
