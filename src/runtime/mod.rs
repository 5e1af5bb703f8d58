//! Session orchestration and public API
//!
//! A [`Session`] owns one source buffer, one debugger and one message sink.
//! Each call to [`Session::run`] compiles and executes the current source on
//! a worker thread and republishes everything the script does as an ordered
//! stream of [`ExternalMessage`]s.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub mod debug;
pub mod error;
pub mod message;
pub mod resolver;
pub mod session;
pub mod source;
pub mod traceback;
pub mod translator;
mod worker;

use error::ConfigError;

/// Smallest worker stack accepted by [`SessionConfig::validate`].
pub const MIN_WORKER_STACK_BYTES: usize = 256 * 1024;

/// Configuration for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum call depth, also used as the parser nesting limit.
    pub recursion_limit: usize,

    /// Filename used when a run does not name one.
    pub default_filename: String,

    /// Stack size of the interpreter thread.
    pub worker_stack_bytes: usize,

    /// Actually wait when a script sleeps. When false, sleeps are reported
    /// but return immediately.
    pub honor_sleep: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 500,
            default_filename: "main.scm".to_string(),
            worker_stack_bytes: 64 * 1024 * 1024,
            honor_sleep: true,
        }
    }
}

impl SessionConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SessionConfig = serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recursion_limit == 0 {
            return Err(ConfigError::Invalid("recursion_limit must be at least 1".into()));
        }
        if self.worker_stack_bytes < MIN_WORKER_STACK_BYTES {
            return Err(ConfigError::Invalid(format!(
                "worker_stack_bytes must be at least {MIN_WORKER_STACK_BYTES}"
            )));
        }
        if self.default_filename.trim().is_empty() {
            return Err(ConfigError::Invalid("default_filename must not be empty".into()));
        }
        Ok(())
    }
}

/// How a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Plain execution.
    #[default]
    Run,
    /// Execution under the line debugger.
    Debug,
}

impl RunMode {
    /// Wire name, as carried by `start` messages.
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Run => "run",
            RunMode::Debug => "debug",
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// No run has happened yet.
    Idle,
    /// Source is being compiled.
    Compiling,
    /// The script is executing.
    Running,
    /// Paused by the debugger.
    DebugPaused,
    /// Waiting for input.
    Suspended,
    /// The last run returned normally.
    Finished,
    /// The last run was interrupted.
    Interrupted,
    /// The last run failed.
    Errored,
}

impl ExecutionState {
    /// Whether a run is in progress.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ExecutionState::Compiling
                | ExecutionState::Running
                | ExecutionState::DebugPaused
                | ExecutionState::Suspended
        )
    }
}

// Re-export commonly used types
pub use debug::{DebugCommand, DebugSession, DebugState};
pub use error::SessionError;
pub use message::{ExternalMessage, MessageData, MessageKind};
pub use resolver::{ImportResolver, NoopResolver, PackageIndex, ResolveError};
pub use session::{MessageSink, RunOutcome, RunRequest, Session, SessionBuilder, SessionHandle};
pub use source::{SourceBuffer, SourceUnit};
pub use traceback::{BuiltinExplainer, Explainer, FriendlyError};
pub use translator::{EventTranslator, LoadingStatus, TranslateError};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sandpit.json");
        std::fs::write(&path, r#"{"recursion_limit": 200}"#).unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.recursion_limit, 200);
        assert_eq!(config.default_filename, "main.scm");
        assert!(config.honor_sleep);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SessionConfig {
            recursion_limit: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(SessionConfig::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            SessionConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
