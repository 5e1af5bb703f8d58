//! NDJSON front-end protocol for sandboxed runs.
//!
//! Each request line is `{"id", "command", "params"}`. Every request gets
//! exactly one response line; messages published by runs are interleaved as
//! `{"event": ...}` lines in the order they were produced. A `run` request is
//! answered when the run ends, so `input`, `debug` and `interrupt` requests
//! can be handled while it is in flight.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::PROTOCOL_VERSION;
use crate::runtime::{
    DebugCommand, ExecutionState, ImportResolver, NoopResolver, RunOutcome, RunRequest, Session,
    SessionConfig, SessionError, SessionHandle,
};

/// Service entry point: owns the session configuration shared by connections.
pub struct Service {
    config: SessionConfig,
    resolver: Arc<dyn ImportResolver>,
}

impl Service {
    /// Create a service whose sessions use `config`.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            resolver: Arc::new(NoopResolver),
        }
    }

    /// Resolve missing modules with `resolver`.
    pub fn with_resolver(mut self, resolver: impl ImportResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Serve one connection until the reader is exhausted and every run it
    /// started has ended.
    pub async fn handle<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
        let writer_task = tokio::spawn(write_lines(writer, out_rx));

        let events = out_tx.clone();
        let session = Session::builder()
            .config(self.config.clone())
            .resolver(self.resolver.clone())
            .callback(move |message| {
                let _ = events.send(json!({ "event": message }));
            })
            .build()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        let mut connection = Connection {
            handle: session.handle(),
            session: Arc::new(session),
            out: out_tx,
            runs: Vec::new(),
        };
        connection.serve(reader).await?;
        connection.drain().await;
        drop(connection);

        writer_task
            .await
            .map_err(io::Error::other)?
    }
}

async fn write_lines<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut lines: mpsc::UnboundedReceiver<Value>,
) -> io::Result<()> {
    while let Some(line) = lines.recv().await {
        let mut bytes = serde_json::to_vec(&line)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    Ok(())
}

struct Connection {
    session: Arc<Session>,
    handle: SessionHandle,
    out: mpsc::UnboundedSender<Value>,
    runs: Vec<JoinHandle<()>>,
}

impl Connection {
    async fn serve<R: AsyncBufRead + Unpin>(&mut self, reader: R) -> io::Result<()> {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RequestEnvelope>(&line) {
                Ok(request) => self.handle_request(request),
                Err(err) => self.respond(ResponseEnvelope::from_error(
                    Value::Null,
                    ServiceError::Parse(err.to_string()),
                )),
            }
        }
        Ok(())
    }

    /// Wait for in-flight runs. A run still waiting on the (now silent)
    /// client is interrupted.
    async fn drain(&mut self) {
        for mut run in std::mem::take(&mut self.runs) {
            loop {
                tokio::select! {
                    _ = &mut run => break,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {
                        if matches!(
                            self.handle.state(),
                            ExecutionState::Suspended | ExecutionState::DebugPaused
                        ) {
                            tracing::debug!("client gone; interrupting waiting run");
                            self.handle.interrupt();
                        }
                    }
                }
            }
        }
    }

    fn respond(&self, envelope: ResponseEnvelope) {
        if let Ok(line) = serde_json::to_value(&envelope) {
            let _ = self.out.send(line);
        }
    }

    fn handle_request(&mut self, request: RequestEnvelope) {
        tracing::debug!(command = %request.command, "request");
        if request.command == "run" {
            let params = match request.params {
                Value::Null => json!({}),
                params => params,
            };
            match serde_json::from_value::<RunRequest>(params) {
                Ok(run) => self.spawn_run(request.id, run),
                Err(err) => self.respond(ResponseEnvelope::from_error(
                    request.id,
                    ServiceError::InvalidParams(err.to_string()),
                )),
            }
            return;
        }
        let response = match self.dispatch(&request.command, &request.params) {
            Ok(value) => ResponseEnvelope::success(request.id, value),
            Err(err) => ResponseEnvelope::from_error(request.id, err),
        };
        self.respond(response);
    }

    fn spawn_run(&mut self, id: Value, request: RunRequest) {
        let session = self.session.clone();
        let out = self.out.clone();
        self.runs.retain(|run| !run.is_finished());
        self.runs.push(tokio::spawn(async move {
            let envelope = match session.run(request).await {
                Ok(outcome) => ResponseEnvelope::success(id, outcome_json(&outcome)),
                Err(err) => ResponseEnvelope::from_error(id, ServiceError::Session(err)),
            };
            if let Ok(line) = serde_json::to_value(&envelope) {
                let _ = out.send(line);
            }
        }));
    }

    fn dispatch(&self, command: &str, params: &Value) -> Result<Value, ServiceError> {
        match command {
            "handshake" => self.cmd_handshake(params),
            "status" => Ok(self.status()),
            "set_source" => self.cmd_set_source(params),
            "input" => self.cmd_input(params),
            "debug" => self.cmd_debug(params),
            "interrupt" => {
                self.handle.interrupt();
                Ok(json!({ "interrupted": self.handle.state().is_active() }))
            }
            "files" => self.cmd_files(params),
            other => Err(ServiceError::Unsupported(other.to_string())),
        }
    }

    fn cmd_handshake(&self, params: &Value) -> Result<Value, ServiceError> {
        let client = params
            .get("client")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::invalid_param("client"))?;
        let requested = params
            .get("protocol_version")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::invalid_param("protocol_version"))?;
        if requested != PROTOCOL_VERSION {
            return Err(ServiceError::Protocol(format!(
                "unsupported protocol version: expected {PROTOCOL_VERSION}, got {requested}"
            )));
        }
        Ok(json!({
            "protocol_version": PROTOCOL_VERSION,
            "session": {
                "id": self.session.id().to_string(),
                "version": crate::VERSION,
                "client": client,
                "modules": self.session.modules(),
            }
        }))
    }

    fn status(&self) -> Value {
        let source = self.session.source();
        json!({
            "state": self.session.state(),
            "debugging": self.session.is_debugging(),
            "revision": source.revision,
            "filename": &*source.filename,
            "modules": self.session.modules(),
        })
    }

    fn cmd_set_source(&self, params: &Value) -> Result<Value, ServiceError> {
        let text = params
            .get("source")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::invalid_param("source"))?;
        let filename = params.get("filename").and_then(Value::as_str);
        let unit = self.session.set_source(text, filename)?;
        Ok(json!({ "revision": unit.revision, "filename": &*unit.filename }))
    }

    fn cmd_input(&self, params: &Value) -> Result<Value, ServiceError> {
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::invalid_param("text"))?;
        self.handle.provide_input(text);
        Ok(json!({ "accepted": true }))
    }

    fn cmd_debug(&self, params: &Value) -> Result<Value, ServiceError> {
        let command: DebugCommand = params
            .get("command")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| ServiceError::invalid_param("command"))?;
        self.handle.debug(command);
        Ok(json!({ "accepted": true }))
    }

    fn cmd_files(&self, params: &Value) -> Result<Value, ServiceError> {
        let files: BTreeMap<String, String> = params
            .get("files")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| ServiceError::invalid_param("files"))?;
        let names: Vec<String> = files.keys().cloned().collect();
        self.session.provide_files(files);
        Ok(json!({ "files": names }))
    }
}

fn outcome_json(outcome: &RunOutcome) -> Value {
    match outcome {
        RunOutcome::Completed(value) => json!({ "outcome": outcome.kind(), "value": value.to_json() }),
        RunOutcome::CompileFailed(err) => json!({ "outcome": outcome.kind(), "error": err }),
        RunOutcome::Failed(err) => json!({ "outcome": outcome.kind(), "error": err }),
        RunOutcome::Interrupted => json!({ "outcome": outcome.kind() }),
    }
}

#[derive(Debug)]
enum ServiceError {
    Parse(String),
    InvalidParams(String),
    Unsupported(String),
    Protocol(String),
    Session(SessionError),
}

impl ServiceError {
    fn invalid_param(name: &str) -> Self {
        ServiceError::InvalidParams(format!("missing or invalid parameter: {name}"))
    }
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        ServiceError::Session(err)
    }
}

#[derive(Deserialize)]
struct RequestEnvelope {
    id: Value,
    command: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct ResponseEnvelope {
    id: Value,
    ok: bool,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorEnvelope>,
}

impl ResponseEnvelope {
    fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            ok: true,
            timestamp: Utc::now(),
            result: Some(result),
            error: None,
        }
    }

    fn from_error(id: Value, error: ServiceError) -> Self {
        Self {
            id,
            ok: false,
            timestamp: Utc::now(),
            result: None,
            error: Some(ErrorEnvelope::from(error)),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    code: String,
    message: String,
}

impl From<ServiceError> for ErrorEnvelope {
    fn from(error: ServiceError) -> Self {
        let (code, message) = match error {
            ServiceError::Parse(message) => ("parse_error", message),
            ServiceError::InvalidParams(message) => ("invalid_params", message),
            ServiceError::Unsupported(command) => (
                "unsupported_command",
                format!("Command '{command}' is not supported"),
            ),
            ServiceError::Protocol(message) => ("protocol_error", message),
            ServiceError::Session(err) => {
                let code = match err {
                    SessionError::Busy => "busy",
                    SessionError::UnknownEventKind(_) => "unknown_event_kind",
                    _ => "session_error",
                };
                (code, err.to_string())
            }
        };
        ErrorEnvelope {
            code: code.to_string(),
            message,
        }
    }
}
