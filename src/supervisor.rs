//! Start, stop and status of a single database server.
//!
//! The supervisor holds no belief about which services run: the pid file and the OS process table
//! are the only sources of truth, so a restarted supervisor reconciles by asking [`is_running`].
//!
//! [`is_running`]: ServiceSupervisor::is_running
use std::{
    collections::HashMap,
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    config::{EngineKind, ServiceDescriptor, SupervisorSettings},
    constants::PROCESS_CHECK_INTERVAL,
    error::SupervisorError,
    logs::LogSink,
    materialize::ConfigMaterializer,
    pid::PidStore,
    probe::{ProcessProbe, SystemProbe},
    runtime::InstallRoot,
};

/// Subdirectory a relational data directory only contains once initialized.
const MYSQL_SYSTEM_SCHEMA_DIR: &str = "mysql";

/// Wait for a child process with a timeout, returning `Ok(None)` on timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(PROCESS_CHECK_INTERVAL);
            }
        }
    }
}

/// Arguments passing the native config file in each engine's convention.
fn launch_args(kind: EngineKind, config_file: &Path) -> Vec<OsString> {
    match kind {
        EngineKind::MySql => {
            let mut flag = OsString::from("--defaults-file=");
            flag.push(config_file);
            vec![flag]
        }
        EngineKind::MongoDb => vec!["--config".into(), config_file.into()],
        EngineKind::Redis => vec![config_file.into()],
    }
}

/// Opens `<log_dir>/<kind>.<stream>.log` for appending engine console output.
fn capture_file(log_dir: &Path, kind: EngineKind, stream: &str) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{}.{stream}.log", kind.as_ref())))
}

/// Runs lifecycle operations for the services of one install root.
pub struct ServiceSupervisor<P: ProcessProbe = SystemProbe> {
    root: InstallRoot,
    settings: SupervisorSettings,
    probe: P,
    materializer: ConfigMaterializer,
    log: Arc<LogSink>,
    /// Handles of servers spawned by this supervisor, kept so they can be reaped after a stop.
    children: Mutex<HashMap<String, Child>>,
}

impl ServiceSupervisor<SystemProbe> {
    /// Supervisor using the host's process table.
    pub fn system(root: InstallRoot, settings: SupervisorSettings, log: Arc<LogSink>) -> Self {
        Self::new(root, settings, SystemProbe::new(), log)
    }
}

impl<P: ProcessProbe> ServiceSupervisor<P> {
    pub fn new(
        root: InstallRoot,
        settings: SupervisorSettings,
        probe: P,
        log: Arc<LogSink>,
    ) -> Self {
        let materializer = ConfigMaterializer::new(root.clone(), Arc::clone(&log));
        Self {
            root,
            settings,
            probe,
            materializer,
            log,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &InstallRoot {
        &self.root
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn log(&self) -> &Arc<LogSink> {
        &self.log
    }

    pub fn materializer(&self) -> &ConfigMaterializer {
        &self.materializer
    }

    /// Pid record of `descriptor` inside this install root.
    pub fn pid_store(&self, descriptor: &ServiceDescriptor) -> PidStore {
        PidStore::new(self.root.resolve(descriptor.pid_file_path()))
    }

    /// Starts the server. Never fails loudly: errors are logged and reported as `false`.
    pub fn start(&self, descriptor: &ServiceDescriptor) -> bool {
        self.start_checked(descriptor).is_ok()
    }

    /// Like [`start`](Self::start) but hands the already-logged error back for status display.
    pub fn start_checked(&self, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError> {
        self.try_start(descriptor).inspect_err(|err| {
            error!("Failed to start '{}': {err}", descriptor.name);
            self.log
                .append(format!("Error starting {}: {err}", descriptor.name));
        })
    }

    /// Stops the server. Never fails loudly: errors are logged and reported as `false`.
    pub fn stop(&self, descriptor: &ServiceDescriptor) -> bool {
        self.stop_checked(descriptor).is_ok()
    }

    /// Like [`stop`](Self::stop) but hands the already-logged error back for status display.
    pub fn stop_checked(&self, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError> {
        self.try_stop(descriptor).inspect_err(|err| {
            error!("Failed to stop '{}': {err}", descriptor.name);
            self.log
                .append(format!("Error stopping {}: {err}", descriptor.name));
        })
    }

    /// Whether the server is running, trusting the pid record only when the probe confirms it.
    pub fn is_running(&self, descriptor: &ServiceDescriptor) -> bool {
        if let Some(pid) = self.pid_store(descriptor).read() {
            if self.probe.is_alive(pid) {
                return true;
            }
            debug!(
                "Pid record for '{}' points at dead PID {pid}; checking by name",
                descriptor.name
            );
        }
        self.probe.is_alive_by_name(descriptor.process_name())
    }

    fn try_start(&self, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError> {
        let service = descriptor.name.as_str();
        let executable = self.root.resolve(&descriptor.executable_path);
        let config_file = self.root.resolve(&descriptor.config_file_path);

        if !executable.is_file() {
            return Err(SupervisorError::MissingExecutable {
                service: service.to_string(),
                path: executable,
            });
        }
        if !config_file.is_file() {
            return Err(SupervisorError::MissingConfig {
                service: service.to_string(),
                path: config_file,
            });
        }

        let pid_store = self.pid_store(descriptor);
        let data_dir = self.root.resolve(&descriptor.data_dir);
        let log_dir = self.root.resolve(&descriptor.log_dir);
        let working_dir = self.working_dir(descriptor);

        let prepare = |source| SupervisorError::Prepare {
            service: service.to_string(),
            source,
        };
        if let Some(parent) = pid_store.path().parent() {
            fs::create_dir_all(parent).map_err(prepare)?;
        }
        fs::create_dir_all(&data_dir).map_err(prepare)?;
        fs::create_dir_all(&log_dir).map_err(prepare)?;

        match descriptor.kind {
            EngineKind::MySql => {
                self.initialize_data_dir(descriptor, &executable, &data_dir, &log_dir)?
            }
            EngineKind::Redis => {
                // Redis manages its own pid semantics; a leftover record would be misread.
                pid_store.delete();
            }
            EngineKind::MongoDb => {}
        }

        let spawn_error = |source| SupervisorError::Spawn {
            service: service.to_string(),
            source,
        };

        let mut command = Command::new(&executable);
        command
            .args(launch_args(descriptor.kind, &config_file))
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(capture_file(&log_dir, descriptor.kind, "stdout").map_err(spawn_error)?)
            .stderr(capture_file(&log_dir, descriptor.kind, "stderr").map_err(spawn_error)?);

        // Own process group, so the whole tree can be signalled without touching ours.
        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Executing command: {command:?}");
        let mut child = command.spawn().map_err(spawn_error)?;
        let pid = child.id();
        info!("Service '{service}' spawned with PID {pid}; waiting {:?}", self.settings.grace_period);

        thread::sleep(self.settings.grace_period);

        if let Some(status) = child.try_wait().map_err(spawn_error)? {
            return Err(SupervisorError::EarlyExit {
                service: service.to_string(),
                status: status.to_string(),
            });
        }

        if let Err(source) = pid_store.write(pid) {
            warn!("Terminating '{service}' (PID {pid}): its pid could not be recorded");
            self.probe.kill_tree(pid, self.settings.kill_timeout);
            let _ = child.kill();
            let _ = child.wait();
            return Err(SupervisorError::PidWrite {
                service: service.to_string(),
                source,
            });
        }

        if let Some(mut previous) = self.children.lock()?.insert(service.to_string(), child) {
            let _ = previous.try_wait();
        }

        info!("Service '{service}' running with PID {pid}");
        self.log.append(format!("Started {service} (PID {pid})"));
        Ok(())
    }

    /// First launch against an empty relational data directory must be preceded by a blocking
    /// `--initialize-insecure` run. A failed or timed-out run is logged and the launch proceeds.
    fn initialize_data_dir(
        &self,
        descriptor: &ServiceDescriptor,
        executable: &Path,
        data_dir: &Path,
        log_dir: &Path,
    ) -> Result<(), SupervisorError> {
        if data_dir.join(MYSQL_SYSTEM_SCHEMA_DIR).is_dir() {
            return Ok(());
        }

        let service = descriptor.name.as_str();
        let init_error = |source| SupervisorError::Initialize {
            service: service.to_string(),
            source,
        };

        info!("Initializing data directory for '{service}' at {}", data_dir.display());
        self.log
            .append(format!("Initializing data directory for {service}"));

        let mut datadir_arg = OsString::from("--datadir=");
        datadir_arg.push(data_dir);
        let mut child = Command::new(executable)
            .arg("--initialize-insecure")
            .arg(datadir_arg)
            .current_dir(self.working_dir(descriptor))
            .stdin(Stdio::null())
            .stdout(capture_file(log_dir, descriptor.kind, "stdout").map_err(init_error)?)
            .stderr(capture_file(log_dir, descriptor.kind, "stderr").map_err(init_error)?)
            .spawn()
            .map_err(init_error)?;

        match wait_with_timeout(&mut child, self.settings.init_timeout).map_err(init_error)? {
            Some(status) if status.success() => {
                debug!("Data directory for '{service}' initialized");
            }
            Some(status) => {
                warn!("Initialization for '{service}' exited with {status}");
            }
            None => {
                warn!(
                    "Initialization for '{service}' did not finish within {:?}; terminating it",
                    self.settings.init_timeout
                );
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        Ok(())
    }

    fn try_stop(&self, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError> {
        let service = descriptor.name.as_str();
        let pid_store = self.pid_store(descriptor);
        let process_name = descriptor.process_name();
        let timeout = self.settings.kill_timeout;

        // A record is only acted on when the probe confirms it, same as `is_running`.
        let live_pid = pid_store.read().filter(|&pid| {
            let alive = self.probe.is_alive(pid);
            if !alive {
                debug!("Pid record for '{service}' points at dead PID {pid}");
            }
            alive
        });

        let terminated = match live_pid {
            Some(pid) => {
                debug!("Stopping '{service}' via PID {pid}");
                if self.probe.kill_tree(pid, timeout) {
                    true
                } else {
                    warn!(
                        "Could not terminate PID {pid} for '{service}'; falling back to name '{process_name}'"
                    );
                    self.probe.kill_by_name(process_name, timeout)
                }
            }
            None => {
                debug!("No live pid record for '{service}'; terminating by name '{process_name}'");
                self.probe.kill_by_name(process_name, timeout)
            }
        };

        if !terminated {
            return Err(SupervisorError::Terminate {
                service: service.to_string(),
            });
        }

        pid_store.delete();
        self.reap(service)?;
        info!("Service '{service}' stopped");
        self.log.append(format!("Stopped {service}"));
        Ok(())
    }

    /// Collects the exit status of a server this supervisor spawned, if it has exited.
    fn reap(&self, service: &str) -> Result<(), SupervisorError> {
        let Some(mut child) = self.children.lock()?.remove(service) else {
            return Ok(());
        };
        match wait_with_timeout(&mut child, PROCESS_CHECK_INTERVAL * 20) {
            Ok(Some(status)) => debug!("Reaped '{service}' ({status})"),
            Ok(None) => {
                debug!("'{service}' has not exited yet; keeping its handle");
                self.children.lock()?.insert(service.to_string(), child);
            }
            Err(err) => debug!("Failed to reap '{service}': {err}"),
        }
        Ok(())
    }

    fn working_dir(&self, descriptor: &ServiceDescriptor) -> PathBuf {
        if descriptor.bin_dir.as_os_str().is_empty() {
            self.root.path().to_path_buf()
        } else {
            self.root.resolve(&descriptor.bin_dir)
        }
    }
}
