//! Constants and default values for the database supervisor.
//!
//! Timing defaults live here so the supervisor settings, the probe and the tests agree on them.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Application name used in the daily log file name.
pub const APP_NAME: &str = "dbvisor";

/// Directory (relative to the install root) holding JSON service descriptors.
pub const CONFIG_DIR_NAME: &str = "config";

/// Directory (relative to the install root) holding one pid file per engine.
pub const PID_DIR_NAME: &str = "pids";

/// Directory (relative to the install root) holding the daily operator log.
pub const LOG_DIR_NAME: &str = "logs";

/// Optional YAML file, inside the config directory, overriding timing defaults.
pub const SETTINGS_FILE_NAME: &str = "supervisor.yaml";

/// Extension of pid files.
pub const PID_EXTENSION: &str = "pid";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Wait after spawning before trusting that a server survived startup.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Upper bound for the one-time relational data directory initialization.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for pid-based and name-based forceful termination.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay granted to in-flight stops during `shutdown_all`.
pub const DEFAULT_SHUTDOWN_DELAY: Duration = Duration::from_secs(1);

/// Interval between liveness checks while waiting on a process.
pub const PROCESS_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Linux truncates process names to this many bytes (`TASK_COMM_LEN - 1`).
pub const COMM_NAME_LIMIT: usize = 15;
