//! Configuration management for dbvisor.
//!
//! Each engine kind has one JSON descriptor under `config/` in the install root. A missing descriptor
//! means that engine is simply not managed. Timing defaults can be overridden through an optional
//! `config/supervisor.yaml`.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, info};

use crate::{
    constants::{
        DEFAULT_GRACE_PERIOD, DEFAULT_INIT_TIMEOUT, DEFAULT_KILL_TIMEOUT,
        DEFAULT_SHUTDOWN_DELAY, PID_DIR_NAME, PID_EXTENSION,
    },
    error::ConfigError,
    runtime::InstallRoot,
};

/// The database engines the supervisor knows how to launch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum EngineKind {
    /// Relational engine.
    MySql,
    /// Document engine.
    MongoDb,
    /// Key-value engine.
    Redis,
}

impl EngineKind {
    /// Descriptor file name under the config directory.
    pub fn descriptor_file(&self) -> String {
        format!("{}.json", self.as_ref())
    }

    /// Bare executable name of the server process, used by name-based fallbacks.
    pub fn default_process_name(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysqld",
            EngineKind::MongoDb => "mongod",
            EngineKind::Redis => "redis-server",
        }
    }
}

/// Credentials only used when generating native config files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Identity and launch parameters for one managed service.
///
/// Paths are kept as written in the descriptor and resolved against an [`InstallRoot`] when used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Display name and registry key.
    pub name: String,
    /// Engine kind, fixed by the descriptor file it was loaded from.
    pub kind: EngineKind,
    pub home_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub executable_path: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_file_path: PathBuf,
    pub port: u16,
    pub credentials: Credentials,
    /// Overrides [`EngineKind::default_process_name`].
    pub process_name: Option<String>,
}

impl ServiceDescriptor {
    /// Pid file location relative to the install root: `pids/<kind>.pid`.
    pub fn pid_file_path(&self) -> PathBuf {
        Path::new(PID_DIR_NAME).join(format!("{}.{PID_EXTENSION}", self.kind.as_ref()))
    }

    /// Name matched against the process table when no trustworthy pid exists.
    pub fn process_name(&self) -> &str {
        self.process_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.kind.default_process_name())
    }
}

/// On-disk shape of a descriptor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    name: String,
    #[serde(default)]
    home: String,
    #[serde(default)]
    bin: String,
    exe_path: String,
    #[serde(default)]
    data_path: String,
    #[serde(default)]
    log_path: String,
    config_path: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    process_name: Option<String>,
}

impl RawDescriptor {
    fn into_descriptor(self, kind: EngineKind) -> ServiceDescriptor {
        ServiceDescriptor {
            name: self.name,
            kind,
            home_dir: PathBuf::from(self.home),
            bin_dir: PathBuf::from(self.bin),
            executable_path: PathBuf::from(self.exe_path),
            data_dir: PathBuf::from(self.data_path),
            log_dir: PathBuf::from(self.log_path),
            config_file_path: PathBuf::from(self.config_path),
            port: self.port,
            credentials: Credentials {
                user: self.user,
                password: self.password,
            },
            process_name: self.process_name,
        }
    }
}

/// Expands `$VAR` and `${VAR}` references within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("valid env var pattern")
    });

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnvVar(var)),
        None => Ok(result.into_owned()),
    }
}

/// Loads a single descriptor file, returning `None` when it does not exist.
pub fn load_descriptor(
    path: &Path,
    kind: EngineKind,
) -> Result<Option<ServiceDescriptor>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("No descriptor for {kind} at {}", path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let expanded = expand_env_vars(&content)?;
    let raw: RawDescriptor =
        serde_json::from_str(&expanded).map_err(|source| ConfigError::DescriptorParse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Some(raw.into_descriptor(kind)))
}

/// Loads every present descriptor under `root`'s config directory, in engine order.
pub fn load_descriptors(root: &InstallRoot) -> Result<Vec<ServiceDescriptor>, ConfigError> {
    let config_dir = root.config_dir();
    let mut descriptors = Vec::new();
    for kind in EngineKind::iter() {
        if let Some(descriptor) =
            load_descriptor(&config_dir.join(kind.descriptor_file()), kind)?
        {
            info!("Registered {} service '{}'", kind, descriptor.name);
            descriptors.push(descriptor);
        }
    }
    Ok(descriptors)
}

/// Timing parameters of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Wait after spawning before checking the server survived.
    pub grace_period: Duration,
    /// Bound on the one-time relational data directory initialization.
    pub init_timeout: Duration,
    /// Bound on each forceful termination attempt.
    pub kill_timeout: Duration,
    /// Delay `shutdown_all` grants to in-flight stops.
    pub shutdown_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            shutdown_delay: DEFAULT_SHUTDOWN_DELAY,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    grace_period: Option<String>,
    init_timeout: Option<String>,
    kill_timeout: Option<String>,
    shutdown_delay: Option<String>,
}

/// Loads `config/supervisor.yaml`, falling back to defaults for the file or any missing key.
pub fn load_settings(root: &InstallRoot) -> Result<SupervisorSettings, ConfigError> {
    let path = root.settings_path();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(SupervisorSettings::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let raw: Option<RawSettings> = serde_yaml::from_str(&content)?;
    let raw = raw.unwrap_or_default();
    let defaults = SupervisorSettings::default();
    let pick = |value: Option<String>, default: Duration| -> Result<Duration, ConfigError> {
        value.map(|v| parse_duration(&v)).unwrap_or(Ok(default))
    };

    Ok(SupervisorSettings {
        grace_period: pick(raw.grace_period, defaults.grace_period)?,
        init_timeout: pick(raw.init_timeout, defaults.init_timeout)?,
        kill_timeout: pick(raw.kill_timeout, defaults.kill_timeout)?,
        shutdown_delay: pick(raw.shutdown_delay, defaults.shutdown_delay)?,
    })
}

/// Parses a duration string in the format `<number>[ms|s|m|h]`; a bare number means seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let (amount_str, millis_per_unit) = if let Some(stripped) = value.strip_suffix("ms") {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1_000)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60_000)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3_600_000)
    } else {
        (value, 1_000)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;

    Ok(Duration::from_millis(amount.saturating_mul(millis_per_unit)))
}
