//! Runs the interpreter on its own thread and bridges its blocking host
//! calls to the async controller.

use std::collections::BTreeMap;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use super::debug::{DebugCommand, DebugSession, Resume};
use super::source::SourceUnit;
use crate::interpreter::exception::names;
use crate::interpreter::{
    CompileError, Exception, HostSignal, Interpreter, InterpreterHost, ModuleRegistry, RuntimeError,
    RuntimeEvent, Value, compile, imported_modules,
};

/// Messages from the worker thread to the controller, in production order.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// Compilation succeeded; the worker waits for `reply` before running.
    Compiled {
        imports: Vec<String>,
        reply: oneshot::Sender<()>,
    },
    /// An event produced by the script.
    Event(RuntimeEvent),
    /// The script wants a line of input.
    Input {
        prompt: String,
        reply: oneshot::Sender<String>,
    },
    /// The script wants to sleep.
    Sleep {
        duration_ms: u64,
        reply: oneshot::Sender<()>,
    },
    /// The debugger paused before `line`.
    Pause {
        line: u32,
        reply: oneshot::Sender<DebugCommand>,
    },
    /// Always the last message.
    Finished(WorkerOutcome),
}

/// How one execution attempt ended.
#[derive(Debug)]
pub(crate) enum WorkerOutcome {
    CompileFailed(CompileError),
    Completed(Value),
    Raised(Exception),
    Interrupted,
    Quit,
}

/// [`InterpreterHost`] that forwards everything to the controller.
pub(crate) struct ChannelHost {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    interrupt: Arc<AtomicBool>,
    debug: Option<Arc<Mutex<DebugSession>>>,
    files: Arc<BTreeMap<String, String>>,
}

impl ChannelHost {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<WorkerMessage>,
        interrupt: Arc<AtomicBool>,
        debug: Option<Arc<Mutex<DebugSession>>>,
        files: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            tx,
            interrupt,
            debug,
            files,
        }
    }

    fn send(&self, message: WorkerMessage) -> Result<(), HostSignal> {
        self.tx.send(message).map_err(|_| HostSignal::Interrupt)
    }

    fn ask<T>(&mut self, build: impl FnOnce(oneshot::Sender<T>) -> WorkerMessage) -> Result<T, HostSignal> {
        self.poll()?;
        let (reply, answer) = oneshot::channel();
        self.send(build(reply))?;
        // A dropped reply means the controller gave up on this run.
        answer.blocking_recv().map_err(|_| HostSignal::Interrupt)
    }
}

impl InterpreterHost for ChannelHost {
    fn emit(&mut self, event: RuntimeEvent) -> Result<(), HostSignal> {
        self.poll()?;
        self.send(WorkerMessage::Event(event))
    }

    fn request_input(&mut self, prompt: &str) -> Result<String, HostSignal> {
        let prompt = prompt.to_string();
        self.ask(|reply| WorkerMessage::Input { prompt, reply })
    }

    fn sleep(&mut self, duration_ms: u64) -> Result<(), HostSignal> {
        self.ask(|reply| WorkerMessage::Sleep { duration_ms, reply })
    }

    fn on_line(&mut self, filename: &str, line: u32) -> Result<(), HostSignal> {
        self.poll()?;
        let Some(debug) = self.debug.clone() else {
            return Ok(());
        };
        if !debug.lock().on_line(filename, line) {
            return Ok(());
        }
        let command = self.ask(|reply| WorkerMessage::Pause { line, reply })?;
        match debug.lock().resume(command) {
            Resume::Run => Ok(()),
            Resume::Quit => Err(HostSignal::Quit),
        }
    }

    fn poll(&mut self) -> Result<(), HostSignal> {
        if self.interrupt.load(Ordering::SeqCst) {
            Err(HostSignal::Interrupt)
        } else {
            Ok(())
        }
    }

    fn read_file(&self, name: &str) -> Option<String> {
        self.files.get(name).cloned()
    }
}

/// Everything one execution attempt needs.
pub(crate) struct WorkerJob {
    pub(crate) source: SourceUnit,
    pub(crate) registry: Arc<RwLock<ModuleRegistry>>,
    pub(crate) recursion_limit: usize,
    pub(crate) host: ChannelHost,
}

impl WorkerJob {
    fn run(self) {
        let tx = self.host.tx.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute())).unwrap_or_else(|payload| {
            let reason = panic_reason(payload.as_ref());
            tracing::error!(%reason, "interpreter worker panicked");
            WorkerOutcome::Raised(Exception::new(
                names::SYSTEM_ERROR,
                format!("internal interpreter error: {reason}"),
            ))
        });
        let _ = tx.send(WorkerMessage::Finished(outcome));
    }

    fn execute(self) -> WorkerOutcome {
        let program = match compile(&self.source.text, &self.source.filename, self.recursion_limit) {
            Ok(program) => program,
            Err(err) => return WorkerOutcome::CompileFailed(err),
        };
        let (reply, ready) = oneshot::channel();
        let compiled = WorkerMessage::Compiled {
            imports: imported_modules(&program),
            reply,
        };
        if self.host.send(compiled).is_err() || ready.blocking_recv().is_err() {
            return WorkerOutcome::Interrupted;
        }

        let registry = self.registry.read().clone();
        let mut interpreter = Interpreter::new(self.host, registry, self.recursion_limit);
        match interpreter.run(&program) {
            Ok(value) => WorkerOutcome::Completed(value),
            Err(RuntimeError::Exception(exc)) => WorkerOutcome::Raised(exc),
            Err(RuntimeError::Interrupted) => WorkerOutcome::Interrupted,
            Err(RuntimeError::Quit) => WorkerOutcome::Quit,
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Start `job` on a dedicated thread with the given stack size.
pub(crate) fn spawn(job: WorkerJob, stack_bytes: usize) -> io::Result<()> {
    thread::Builder::new()
        .name("sandpit-worker".to_string())
        .stack_size(stack_bytes)
        .spawn(move || job.run())
        .map(|_| ())
}
