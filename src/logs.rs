//! Operator log: one append-only file per day.
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{Local, NaiveDate};
use fs2::FileExt;
use tracing::debug;

use crate::constants::APP_NAME;

/// Appends timestamped lines to `<dir>/<app>_<yyyyMMdd>.log`.
///
/// Every write is a self-contained open/lock/append, so several threads and several `dbv`
/// processes can share the same file. Failures are swallowed.
#[derive(Debug)]
pub struct LogSink {
    dir: PathBuf,
    app: String,
    guard: Mutex<()>,
}

impl LogSink {
    /// Creates a sink writing under `dir` with the default application name.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_app_name(dir, APP_NAME)
    }

    /// Creates a sink writing under `dir` as `<app>_<yyyyMMdd>.log`.
    pub fn with_app_name(dir: impl Into<PathBuf>, app: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            app: app.into(),
            guard: Mutex::new(()),
        }
    }

    /// Directory the daily files are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that receives lines written on `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.log", self.app, date.format("%Y%m%d")))
    }

    /// File that receives lines written today.
    pub fn current_path(&self) -> PathBuf {
        self.path_for(Local::now().date_naive())
    }

    /// Appends `[HH:mm:ss] message` to today's file.
    pub fn append(&self, message: impl AsRef<str>) {
        if let Err(err) = self.try_append(message.as_ref()) {
            debug!("Dropping log line, write failed: {err}");
        }
    }

    fn try_append(&self, message: &str) -> std::io::Result<()> {
        let now = Local::now();
        let line = format!("[{}] {}\n", now.format("%H:%M:%S"), message);

        let _guard = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(now.date_naive()))?;
        file.lock_exclusive()?;
        let result = file.write_all(line.as_bytes());
        let _ = FileExt::unlock(&file);
        result
    }
}
