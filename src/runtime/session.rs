use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::debug::{DebugCommand, DebugGuard, DebugSession};
use super::error::{Result, SessionError};
use super::message::ExternalMessage;
use super::resolver::{ImportResolver, NoopResolver};
use super::source::{SourceBuffer, SourceUnit};
use super::traceback::{BuiltinExplainer, Explainer, FriendlyError, explain};
use super::translator::{EventTranslator, LoadingStatus, TranslateError};
use super::worker::{self, ChannelHost, WorkerJob, WorkerMessage, WorkerOutcome};
use super::{ExecutionState, RunMode, SessionConfig};
use crate::interpreter::{CompileError, ModuleRegistry, RuntimeEvent, Value};

const INTERRUPT_REASON: &str = "KeyboardInterrupt";

/// Receiver of the messages a session publishes.
pub trait MessageSink: Send {
    /// Deliver one message. Called in production order.
    fn send(&mut self, message: ExternalMessage);
}

impl MessageSink for mpsc::UnboundedSender<ExternalMessage> {
    fn send(&mut self, message: ExternalMessage) {
        if mpsc::UnboundedSender::send(self, message).is_err() {
            tracing::debug!("message receiver dropped");
        }
    }
}

struct CallbackSink<F>(F);

impl<F: FnMut(ExternalMessage) + Send> MessageSink for CallbackSink<F> {
    fn send(&mut self, message: ExternalMessage) {
        (self.0)(message)
    }
}

/// Parameters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    /// New source text; `None` runs the current source buffer.
    pub source: Option<String>,
    /// Filename for the new source; `None` keeps the buffer's (or the
    /// configured default).
    pub filename: Option<String>,
    /// Plain or debug execution.
    pub mode: RunMode,
    /// 1-based breakpoint lines, used in debug mode.
    pub breakpoints: BTreeSet<u32>,
    /// Input lines answered before asking the front end.
    pub stdin: Vec<String>,
}

impl RunRequest {
    /// Run `source` with default settings.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    /// Set the filename.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Run under the debugger with the given breakpoints.
    pub fn debug(mut self, breakpoints: impl IntoIterator<Item = u32>) -> Self {
        self.mode = RunMode::Debug;
        self.breakpoints = breakpoints.into_iter().collect();
        self
    }

    /// Pre-supply input lines.
    pub fn stdin<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stdin = lines.into_iter().map(Into::into).collect();
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The script returned a value (`nil` after a debugger quit).
    Completed(Value),
    /// The source did not compile.
    CompileFailed(CompileError),
    /// An exception escaped the script.
    Failed(FriendlyError),
    /// The run was interrupted.
    Interrupted,
}

impl RunOutcome {
    /// Short name of the outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::CompileFailed(_) => "compile_failed",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug)]
enum Command {
    Input(String),
    Debug(DebugCommand),
    Interrupt,
}

/// Cloneable remote control for a session, usable while a run is in flight.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    interrupt: Arc<AtomicBool>,
    state: Arc<Mutex<ExecutionState>>,
    debug: Arc<Mutex<DebugSession>>,
}

impl SessionHandle {
    /// Answer a pending input request.
    pub fn provide_input(&self, text: impl Into<String>) {
        self.command(Command::Input(text.into()));
    }

    /// Send a debugger command to a paused run.
    pub fn debug(&self, command: DebugCommand) {
        self.command(Command::Debug(command));
    }

    /// Interrupt the current run. Observed at the next evaluation step or
    /// immediately when the run is waiting.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.command(Command::Interrupt);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutionState {
        *self.state.lock()
    }

    /// Whether a debug run is active.
    pub fn is_debugging(&self) -> bool {
        self.debug.lock().is_debugging()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("session dropped; command ignored");
        }
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    sink: Option<Box<dyn MessageSink>>,
    resolver: Arc<dyn ImportResolver>,
    explainer: Arc<dyn Explainer>,
    registry: ModuleRegistry,
}

impl SessionBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Deliver messages to a closure.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(ExternalMessage) + Send + 'static,
    {
        self.sink = Some(Box::new(CallbackSink(callback)));
        self
    }

    /// Deliver messages to a sink.
    pub fn sink(mut self, sink: impl MessageSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Resolve missing modules with `resolver`.
    pub fn resolver(mut self, resolver: impl ImportResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Explain runtime errors with `explainer`.
    pub fn explainer(mut self, explainer: impl Explainer + 'static) -> Self {
        self.explainer = Arc::new(explainer);
        self
    }

    /// Start from `registry` instead of the standard modules.
    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Build the session. Fails without a sink or with invalid config.
    pub fn build(self) -> Result<Session> {
        let sink = self.sink.ok_or(SessionError::MissingCallback)?;
        self.config.validate()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, "session created");
        Ok(Session {
            id,
            source: Mutex::new(SourceBuffer::new(&self.config.default_filename)),
            config: self.config,
            sink: Mutex::new(sink),
            resolver: self.resolver,
            explainer: self.explainer,
            translator: EventTranslator,
            registry: Arc::new(RwLock::new(self.registry)),
            files: Mutex::new(Arc::new(BTreeMap::new())),
            state: Arc::new(Mutex::new(ExecutionState::Idle)),
            debug: Arc::new(Mutex::new(DebugSession::new())),
            interrupt: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            commands_tx,
            commands_rx: tokio::sync::Mutex::new(commands_rx),
        })
    }
}

enum Pending {
    Input(oneshot::Sender<String>),
    Sleep {
        reply: oneshot::Sender<()>,
        deadline: Instant,
    },
    Debug(oneshot::Sender<DebugCommand>),
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Execution controller for one source buffer.
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    sink: Mutex<Box<dyn MessageSink>>,
    resolver: Arc<dyn ImportResolver>,
    explainer: Arc<dyn Explainer>,
    translator: EventTranslator,
    registry: Arc<RwLock<ModuleRegistry>>,
    source: Mutex<SourceBuffer>,
    files: Mutex<Arc<BTreeMap<String, String>>>,
    state: Arc<Mutex<ExecutionState>>,
    debug: Arc<Mutex<DebugSession>>,
    interrupt: Arc<AtomicBool>,
    running: AtomicBool,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Command>>,
}

impl Session {
    /// Start building a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder {
            config: SessionConfig::default(),
            sink: None,
            resolver: Arc::new(NoopResolver),
            explainer: Arc::new(BuiltinExplainer),
            registry: ModuleRegistry::with_std(),
        }
    }

    /// Unique id of this session, used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Remote control usable from other tasks.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.commands_tx.clone(),
            interrupt: self.interrupt.clone(),
            state: self.state.clone(),
            debug: self.debug.clone(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutionState {
        *self.state.lock()
    }

    /// Whether a debug run is active.
    pub fn is_debugging(&self) -> bool {
        self.debug.lock().is_debugging()
    }

    /// The current source unit.
    pub fn source(&self) -> SourceUnit {
        self.source.lock().current().clone()
    }

    /// Replace the source buffer. Rejected while a run is in flight.
    pub fn set_source(&self, text: &str, filename: Option<&str>) -> Result<SourceUnit> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SessionError::Busy);
        }
        let mut buffer = self.source.lock();
        let filename = filename.map_or_else(|| buffer.current().filename.to_string(), str::to_string);
        let unit = buffer.replace(text, &filename);
        tracing::debug!(revision = unit.revision, filename = %unit.filename, "source replaced");
        Ok(unit)
    }

    /// Replace the read-only files visible to `read-file`. Takes effect on
    /// the next run.
    pub fn provide_files(&self, files: BTreeMap<String, String>) {
        *self.files.lock() = Arc::new(files);
    }

    /// Names of the modules scripts can import right now.
    pub fn modules(&self) -> Vec<String> {
        self.registry.read().names()
    }

    /// Compile and execute the source, streaming messages to the sink.
    ///
    /// Emits `start`, the translated events and exactly one terminal
    /// message. A second concurrent call fails with [`SessionError::Busy`].
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy);
        }
        let _running = RunningGuard(&self.running);

        let unit = {
            let mut buffer = self.source.lock();
            match request.source.as_deref() {
                Some(text) => {
                    let filename = request
                        .filename
                        .clone()
                        .unwrap_or_else(|| buffer.current().filename.to_string());
                    buffer.replace(text, &filename)
                }
                None => buffer.current().clone(),
            }
        };
        let span = tracing::info_span!(
            "run",
            session = %self.id,
            revision = unit.revision,
            mode = request.mode.as_str()
        );
        self.execute(unit, request).instrument(span).await
    }

    async fn execute(&self, unit: SourceUnit, request: RunRequest) -> Result<RunOutcome> {
        let mut commands = self.commands_rx.lock().await;
        while let Ok(stale) = commands.try_recv() {
            tracing::debug!(?stale, "discarding command from a previous run");
        }
        self.interrupt.store(false, Ordering::SeqCst);

        tracing::info!(filename = %unit.filename, "run started");
        self.set_state(ExecutionState::Compiling);
        self.emit(self.translator.start(request.mode));

        let _debug_guard = DebugGuard::new(self.debug.clone());
        let debugging = request.mode == RunMode::Debug;
        if debugging {
            let dropped = self.debug.lock().start(&unit, &request.breakpoints);
            if !dropped.is_empty() {
                tracing::warn!(?dropped, "breakpoints ignored");
            }
        }
        let mut retried = false;
        let outcome = loop {
            // Every attempt starts from the beginning, with all of its input.
            let mut stdin: VecDeque<String> = request.stdin.iter().cloned().collect();
            let outcome = match self.attempt(&unit, debugging, &mut commands, &mut stdin).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.set_state(ExecutionState::Errored);
                    return Err(err);
                }
            };
            if let WorkerOutcome::Raised(exc) = &outcome {
                if let Some(module) = exc.missing_module.as_deref() {
                    if !retried {
                        retried = true;
                        if self.install_missing(module).await {
                            tracing::info!(module, "retrying run after installing module");
                            if debugging {
                                self.debug.lock().start(&unit, &request.breakpoints);
                            }
                            continue;
                        }
                    }
                }
            }
            break outcome;
        };
        Ok(self.finish(&unit, outcome))
    }

    async fn attempt(
        &self,
        unit: &SourceUnit,
        debugging: bool,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        stdin: &mut VecDeque<String>,
    ) -> Result<WorkerOutcome> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = ChannelHost::new(
            tx,
            self.interrupt.clone(),
            debugging.then(|| self.debug.clone()),
            self.files.lock().clone(),
        );
        let job = WorkerJob {
            source: unit.clone(),
            registry: self.registry.clone(),
            recursion_limit: self.config.recursion_limit,
            host,
        };
        worker::spawn(job, self.config.worker_stack_bytes).map_err(SessionError::WorkerSpawn)?;

        let mut pending: Option<Pending> = None;
        let mut interrupted = false;
        loop {
            let deadline = match &pending {
                Some(Pending::Sleep { deadline, .. }) => Some(*deadline),
                _ => None,
            };
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else {
                        return Err(SessionError::WorkerLost);
                    };
                    match message {
                        WorkerMessage::Finished(outcome) => {
                            return Ok(if interrupted { WorkerOutcome::Interrupted } else { outcome });
                        }
                        WorkerMessage::Compiled { imports, reply } => {
                            if !interrupted {
                                self.prefetch(&imports).await;
                                self.set_state(ExecutionState::Running);
                                let _ = reply.send(());
                            }
                        }
                        WorkerMessage::Event(event) => {
                            if !interrupted {
                                self.deliver(event)?;
                            }
                        }
                        WorkerMessage::Input { prompt, reply } => {
                            if !interrupted {
                                self.deliver(RuntimeEvent::InputRequest { prompt })?;
                                match stdin.pop_front() {
                                    Some(line) => {
                                        let _ = reply.send(line);
                                    }
                                    None => {
                                        self.set_state(ExecutionState::Suspended);
                                        pending = Some(Pending::Input(reply));
                                    }
                                }
                            }
                        }
                        WorkerMessage::Sleep { duration_ms, reply } => {
                            if !interrupted {
                                self.deliver(RuntimeEvent::Sleep { duration_ms })?;
                                if self.config.honor_sleep && duration_ms > 0 {
                                    let deadline = Instant::now() + Duration::from_millis(duration_ms);
                                    pending = Some(Pending::Sleep { reply, deadline });
                                } else {
                                    let _ = reply.send(());
                                }
                            }
                        }
                        WorkerMessage::Pause { line, reply } => {
                            if !interrupted {
                                self.deliver(RuntimeEvent::DebugPause { line })?;
                                self.set_state(ExecutionState::DebugPaused);
                                pending = Some(Pending::Debug(reply));
                            }
                        }
                    }
                }
                Some(command) = commands.recv() => {
                    match (command, pending.take()) {
                        (Command::Interrupt, _) => {
                            tracing::debug!("interrupt received");
                            interrupted = true;
                        }
                        (Command::Input(text), Some(Pending::Input(reply))) => {
                            self.set_state(ExecutionState::Running);
                            let _ = reply.send(text);
                        }
                        (Command::Debug(command), Some(Pending::Debug(reply))) => {
                            tracing::debug!(?command, "debug command");
                            self.set_state(ExecutionState::Running);
                            let _ = reply.send(command);
                        }
                        (command, unchanged) => {
                            tracing::warn!(?command, "command does not match what the run is waiting for");
                            pending = unchanged;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(Pending::Sleep { reply, .. }) = pending.take() {
                        let _ = reply.send(());
                    }
                }
            }
        }
    }

    /// Translate and publish one event. Unknown kinds abort the run.
    fn deliver(&self, event: RuntimeEvent) -> Result<()> {
        tracing::trace!(?event, "runtime event");
        match self.translator.translate(event) {
            Ok(Some(message)) => {
                self.emit(message);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                self.interrupt.store(true, Ordering::SeqCst);
                self.emit(self.translator.protocol_error(&err));
                let TranslateError::UnknownEventKind(kind) = err;
                tracing::error!(kind = %kind, "aborting run on unknown event kind");
                Err(SessionError::UnknownEventKind(kind))
            }
        }
    }

    async fn prefetch(&self, imports: &[String]) {
        let missing: Vec<String> = {
            let registry = self.registry.read();
            imports
                .iter()
                .filter(|module| !registry.contains(module))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return;
        }
        let modules = self.resolver.prefetch(&missing).await;
        if modules.is_empty() {
            return;
        }
        let names: Vec<String> = modules.iter().map(|module| module.name.clone()).collect();
        {
            let mut registry = self.registry.write();
            for module in modules {
                registry.install(module);
            }
        }
        tracing::info!(?names, "prefetched modules");
        self.emit(self.translator.loading(&names, LoadingStatus::Loaded));
    }

    async fn install_missing(&self, module: &str) -> bool {
        let names = vec![module.to_string()];
        self.emit(self.translator.loading(&names, LoadingStatus::Loading));
        match self.resolver.resolve(module).await {
            Ok(resolved) => {
                tracing::info!(module = %resolved.name, "installed module");
                self.registry.write().install(resolved);
                self.emit(self.translator.loading(&names, LoadingStatus::Loaded));
                true
            }
            Err(err) => {
                tracing::warn!(module, error = %err, "module resolution failed");
                self.emit(self.translator.loading(&names, LoadingStatus::Failed));
                false
            }
        }
    }

    fn finish(&self, unit: &SourceUnit, outcome: WorkerOutcome) -> RunOutcome {
        let (state, message, outcome) = match outcome {
            WorkerOutcome::Completed(value) => (
                ExecutionState::Finished,
                self.translator.end(&value),
                RunOutcome::Completed(value),
            ),
            WorkerOutcome::Quit => (
                ExecutionState::Finished,
                self.translator.end(&Value::Nil),
                RunOutcome::Completed(Value::Nil),
            ),
            WorkerOutcome::CompileFailed(err) => (
                ExecutionState::Errored,
                self.translator.compile_error(&err),
                RunOutcome::CompileFailed(err),
            ),
            WorkerOutcome::Raised(exc) => {
                let friendly = explain(&exc, &unit.filename, self.explainer.as_ref());
                (
                    ExecutionState::Errored,
                    self.translator.friendly_error(&friendly),
                    RunOutcome::Failed(friendly),
                )
            }
            WorkerOutcome::Interrupted => {
                let event = RuntimeEvent::Interrupt {
                    reason: INTERRUPT_REASON.to_string(),
                };
                let message = match self.translator.translate(event) {
                    Ok(Some(message)) => message,
                    _ => self.translator.interrupt(INTERRUPT_REASON),
                };
                (ExecutionState::Interrupted, message, RunOutcome::Interrupted)
            }
        };
        self.emit(message);
        self.set_state(state);
        tracing::info!(outcome = outcome.kind(), "run finished");
        outcome
    }

    fn emit(&self, message: ExternalMessage) {
        tracing::debug!(kind = ?message.kind, "message");
        self.sink.lock().send(message);
    }

    fn set_state(&self, state: ExecutionState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "state transition");
            *current = state;
        }
    }
}
