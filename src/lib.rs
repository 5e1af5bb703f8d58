//! Sandpit – a sandboxed script runner with a typed event stream
//!
//! This crate runs untrusted scripts in a small tree-walking interpreter and
//! republishes everything they do as an ordered stream of messages:
//! - Printed output, input requests and timed waits, in production order
//! - A line debugger with breakpoints and single stepping
//! - Asynchronous interruption, observable mid-expression
//! - Runtime errors explained down to the user-authored lines responsible
//! - Best-effort installation of missing modules with a single retry
//! - An NDJSON service so any front end can drive sessions over a pipe

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Boundary types for editor collaborators (completion and lint)
pub mod collab;

/// Script language: parser, compiler and evaluator
pub mod interpreter;

/// Sessions, event translation, debugging and error explanation
pub mod runtime;

/// NDJSON front-end protocol
pub mod service;

// Re-export key types for convenience
pub use runtime::{ExternalMessage, RunOutcome, RunRequest, Session, SessionConfig};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for the NDJSON service
pub const PROTOCOL_VERSION: &str = "1.0.0";
