//! Line debugger state.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::source::SourceUnit;

/// Command sent by the front end while a debug run is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugCommand {
    /// Run until the next breakpoint.
    Continue,
    /// Pause at the next line.
    Step,
    /// Stop the program.
    Quit,
}

/// Stepping state of a [`DebugSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugState {
    /// No debug run is active.
    Inactive,
    /// Just started; runs to the first breakpoint without pausing on entry.
    AutoContinue,
    /// Waiting for a command at `line`.
    Paused {
        /// Line the program stopped before.
        line: u32,
    },
    /// Running to the next breakpoint.
    Continuing,
    /// Pausing at the next line event.
    Stepping,
}

/// What the program should do after a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Keep executing.
    Run,
    /// Terminate.
    Quit,
}

/// Breakpoints and stepping state for the active source unit.
#[derive(Debug)]
pub struct DebugSession {
    breakpoints: BTreeSet<u32>,
    state: DebugState,
    filename: Option<Arc<str>>,
}

impl Default for DebugSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugSession {
    /// Inactive session with no breakpoints.
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeSet::new(),
            state: DebugState::Inactive,
            filename: None,
        }
    }

    /// Begin debugging `unit`. Breakpoints on lines that do not exist or hold
    /// no code are dropped; the dropped lines are returned.
    pub fn start(&mut self, unit: &SourceUnit, requested: &BTreeSet<u32>) -> Vec<u32> {
        let (valid, dropped): (BTreeSet<u32>, BTreeSet<u32>) = requested
            .iter()
            .copied()
            .partition(|line| unit.is_code_line(*line));
        for line in &dropped {
            tracing::warn!(line, filename = %unit.filename, "dropping breakpoint on a line without code");
        }
        self.breakpoints = valid;
        self.state = DebugState::AutoContinue;
        self.filename = Some(unit.filename.clone());
        tracing::debug!(breakpoints = ?self.breakpoints, "debug session started");
        dropped.into_iter().collect()
    }

    /// Clear breakpoints and leave debugging mode.
    pub fn stop(&mut self) {
        if self.state != DebugState::Inactive {
            tracing::debug!("debug session stopped");
        }
        self.breakpoints.clear();
        self.state = DebugState::Inactive;
        self.filename = None;
    }

    /// Whether a debug run is active.
    pub fn is_debugging(&self) -> bool {
        self.state != DebugState::Inactive
    }

    /// Current stepping state.
    pub fn state(&self) -> DebugState {
        self.state
    }

    /// Installed breakpoints.
    pub fn breakpoints(&self) -> &BTreeSet<u32> {
        &self.breakpoints
    }

    /// Decide whether a line event should pause, entering the paused state
    /// when it does. Lines in other files never pause.
    pub fn on_line(&mut self, filename: &str, line: u32) -> bool {
        if self.filename.as_deref() != Some(filename) {
            return false;
        }
        let pause = match self.state {
            DebugState::Inactive | DebugState::Paused { .. } => false,
            DebugState::AutoContinue | DebugState::Continuing => self.breakpoints.contains(&line),
            DebugState::Stepping => true,
        };
        if pause {
            self.state = DebugState::Paused { line };
        }
        pause
    }

    /// Apply a command received while paused.
    pub fn resume(&mut self, command: DebugCommand) -> Resume {
        match command {
            DebugCommand::Continue => {
                self.state = DebugState::Continuing;
                Resume::Run
            }
            DebugCommand::Step => {
                self.state = DebugState::Stepping;
                Resume::Run
            }
            DebugCommand::Quit => {
                self.stop();
                Resume::Quit
            }
        }
    }
}

/// Stops the shared session when dropped, however the run ended.
pub struct DebugGuard {
    session: Arc<Mutex<DebugSession>>,
}

impl DebugGuard {
    /// Guard `session` for the lifetime of a run.
    pub fn new(session: Arc<Mutex<DebugSession>>) -> Self {
        Self { session }
    }
}

impl Drop for DebugGuard {
    fn drop(&mut self) {
        self.session.lock().stop();
    }
}
