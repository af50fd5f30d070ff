//! dbvisor supervises a fixed set of local database servers (MySQL, MongoDB and Redis). It starts
//! and stops them on request, tracks each one through a pid file so state survives restarts of the
//! supervisor itself, and falls back to the process table when that file is stale or missing.

/// CLI interface.
pub mod cli;

/// Descriptor and settings loading.
pub mod config;

/// Timing defaults and file names.
pub mod constants;

/// Error handling.
pub mod error;

/// Daily operator log.
pub mod logs;

/// Native config file generation.
pub mod materialize;

/// Pid records.
pub mod pid;

/// Process liveness and termination.
pub mod probe;

/// Per-service state machine and command surface.
pub mod registry;

/// Install root layout.
pub mod runtime;

/// Start/stop/status of a single server.
pub mod supervisor;

#[doc(hidden)]
pub mod test_utils;
