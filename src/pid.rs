//! One-line pid records, one file per engine.
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

/// Reads and writes the pid record at a single path.
///
/// A record is only a hint: the pid may have exited or been reused, so callers corroborate it
/// with a [`crate::probe::ProcessProbe`] before trusting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidStore {
    path: PathBuf,
}

impl PidStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `pid` as decimal text, creating the parent directory and replacing prior content.
    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, pid.to_string())
    }

    /// Returns the recorded pid, or `None` when the file is missing or not a positive integer.
    pub fn read(&self) -> Option<u32> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!("Unable to read pid file {}: {err}", self.path.display());
                }
                return None;
            }
        };
        parse_pid(&content)
    }

    /// Removes the record. A missing file is fine; other errors are logged and ignored.
    pub fn delete(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed pid file {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove pid file {}: {err}", self.path.display()),
        }
    }
}

/// Pids must be positive and fit a `pid_t`; 0 and negatives would address process groups.
fn parse_pid(content: &str) -> Option<u32> {
    content
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
        .map(|pid| pid as u32)
}
