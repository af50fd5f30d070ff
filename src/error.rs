//! Error handling for dbvisor.
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading descriptors or supervisor settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a JSON service descriptor.
    #[error("Invalid descriptor {path}: {source}")]
    DescriptorParse {
        /// The descriptor file.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Error parsing YAML supervisor settings.
    #[error("Invalid YAML format: {0}")]
    SettingsParse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference that is not set in the environment.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A duration string that could not be parsed.
    #[error("Invalid duration value: '{0}'")]
    InvalidDuration(String),

    /// Error creating a directory required by the install layout.
    #[error("Failed to prepare directory {path}: {source}")]
    Prepare {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised inside a single lifecycle operation. These never cross the
/// supervisor boundary: `start`/`stop` log them and report a failure instead.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The configured executable is not on disk.
    #[error("Executable for '{service}' not found at {path}")]
    MissingExecutable {
        /// The service being started.
        service: String,
        /// The resolved executable path.
        path: PathBuf,
    },

    /// The native config file is not on disk.
    #[error("Config file for '{service}' not found at {path}")]
    MissingConfig {
        /// The service being started.
        service: String,
        /// The resolved config path.
        path: PathBuf,
    },

    /// A directory required before launch could not be created.
    #[error("Failed to prepare directories for '{service}': {source}")]
    Prepare {
        /// The service being started.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The one-time data directory initialization failed to launch.
    #[error("Failed to initialize data directory for '{service}': {source}")]
    Initialize {
        /// The service being initialized.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error spawning a service process.
    #[error("Failed to start service '{service}': {source}")]
    Spawn {
        /// The service name that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The process exited inside the grace period.
    #[error("Service '{service}' exited during startup ({status})")]
    EarlyExit {
        /// The service that exited.
        service: String,
        /// Human-readable exit status.
        status: String,
    },

    /// Error recording the pid of a started service.
    #[error("Failed to record pid for '{service}': {source}")]
    PidWrite {
        /// The service whose pid could not be recorded.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Neither pid-based nor name-based termination succeeded.
    #[error("Failed to stop service '{service}': no matching process could be terminated")]
    Terminate {
        /// The service that could not be stopped.
        service: String,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `SupervisorError`.
impl<T> From<std::sync::PoisonError<T>> for SupervisorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SupervisorError::MutexPoisonError(err.to_string())
    }
}

/// Errors returned by the registry command surface.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested service was never registered.
    #[error("Unknown service '{0}'")]
    UnknownService(String),

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),

    /// Error spawning the background worker thread.
    #[error("Failed to spawn worker for '{service}': {source}")]
    Worker {
        /// The service whose operation could not be dispatched.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

impl<T> From<std::sync::PoisonError<T>> for RegistryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RegistryError::MutexPoisonError(err.to_string())
    }
}
