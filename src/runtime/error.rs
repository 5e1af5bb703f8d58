//! Error types for sessions and their collaborators.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`crate::runtime::Session`] operations.
///
/// Script failures are not errors at this level; they are reported as a
/// [`crate::runtime::RunOutcome`]. These are failures of the session itself.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A run is already in flight on this session.
    #[error("a run is already in progress")]
    Busy,

    /// The session was built without a message callback.
    #[error("an event callback must be registered before building a session")]
    MissingCallback,

    /// The interpreter produced an event with no message mapping.
    #[error("unknown event kind '{0}'")]
    UnknownEventKind(String),

    /// The worker thread stopped without reporting an outcome.
    #[error("interpreter worker exited unexpectedly")]
    WorkerLost,

    /// The worker thread could not be started.
    #[error("failed to spawn interpreter worker: {0}")]
    WorkerSpawn(#[source] io::Error),

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The config file is not valid JSON for the config shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Convenience result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
