//! Command-line interface for dbvisor.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for dbvisor.
#[derive(Parser, Debug)]
#[command(name = "dbv", version, author)]
#[command(about = "Start, stop and inspect local database servers", long_about = None)]
pub struct Cli {
    /// Install root holding `config/`, `pids/` and `logs/` (defaults to the executable's directory).
    #[arg(long, value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for dbv.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the install layout and generate missing native config files.
    Init,

    /// Show whether each configured server is running.
    Status {
        /// Only show this service.
        #[arg(short, long)]
        service: Option<String>,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Start a stopped server.
    Start {
        /// Name of the service to start.
        #[arg(short, long)]
        service: String,
    },

    /// Stop a running server.
    Stop {
        /// Name of the service to stop.
        #[arg(short, long)]
        service: String,
    },

    /// Start the server if it is stopped, stop it if it is running.
    Toggle {
        /// Name of the service to toggle.
        #[arg(short, long)]
        service: String,
    },

    /// Start every stopped server and keep them up until Ctrl-C.
    Run,
}

/// Parses command-line arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
