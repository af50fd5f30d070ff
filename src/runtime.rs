//! Install root and the directory layout derived from it.
use std::{
    env, fs,
    path::{Component, Path, PathBuf},
};

use tracing::debug;

use crate::{
    config::ServiceDescriptor,
    constants::{CONFIG_DIR_NAME, LOG_DIR_NAME, PID_DIR_NAME, SETTINGS_FILE_NAME},
    error::ConfigError,
};

/// Directory every descriptor path is resolved against.
///
/// The root is always passed explicitly so fixture directories can stand in for a real install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoot {
    root: PathBuf,
}

impl InstallRoot {
    /// Creates an install root, making `root` absolute against the current directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            env::current_dir()
                .map(|cwd| cwd.join(root))
                .unwrap_or_else(|_| root.to_path_buf())
        };
        Self {
            root: normalize(&absolute),
        }
    }

    /// Install root next to the running executable, falling back to the current directory.
    pub fn from_current_exe() -> Self {
        let dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir)
    }

    /// The absolute root directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves a descriptor path to an absolute, lexically normalized path.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        normalize(&self.root.join(relative))
    }

    /// Directory holding per-engine JSON descriptors.
    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR_NAME)
    }

    /// Directory holding pid files.
    pub fn pid_dir(&self) -> PathBuf {
        self.root.join(PID_DIR_NAME)
    }

    /// Directory holding the daily operator log.
    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR_NAME)
    }

    /// Location of the optional supervisor settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Creates every directory the given services expect to exist.
    pub fn prepare(&self, descriptors: &[ServiceDescriptor]) -> Result<(), ConfigError> {
        let mut dirs = vec![self.config_dir(), self.pid_dir(), self.log_dir()];
        for descriptor in descriptors {
            dirs.push(self.resolve(&descriptor.home_dir));
            dirs.push(self.resolve(&descriptor.bin_dir));
            dirs.push(self.resolve(&descriptor.data_dir));
            dirs.push(self.resolve(&descriptor.log_dir));
            for file in [&descriptor.executable_path, &descriptor.config_file_path] {
                if let Some(parent) = self.resolve(file).parent() {
                    dirs.push(parent.to_path_buf());
                }
            }
            if let Some(parent) = self.resolve(descriptor.pid_file_path()).parent() {
                dirs.push(parent.to_path_buf());
            }
        }

        for dir in dirs {
            if dir.as_os_str().is_empty() || dir.is_dir() {
                continue;
            }
            debug!("Creating directory {}", dir.display());
            fs::create_dir_all(&dir).map_err(|source| ConfigError::Prepare {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Removes `.` components and folds `..` into its parent without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
