//! Fixtures shared by unit and integration tests.
use std::{
    collections::HashSet,
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use crate::{
    config::{Credentials, EngineKind, ServiceDescriptor, SupervisorSettings},
    probe::ProcessProbe,
};

/// One call observed by [`FakeProbe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCall {
    IsAlive(u32),
    IsAliveByName(String),
    KillTree(u32),
    KillByName(String),
}

/// In-memory [`ProcessProbe`] with a scripted process table.
#[derive(Debug, Default)]
pub struct FakeProbe {
    alive: Mutex<HashSet<u32>>,
    names: Mutex<HashSet<String>>,
    unkillable: HashSet<u32>,
    calls: Mutex<Vec<ProbeCall>>,
}

impl FakeProbe {
    pub fn with_alive_pid(self, pid: u32) -> Self {
        lock(&self.alive).insert(pid);
        self
    }

    /// A pid that is alive and refuses to die.
    pub fn with_unkillable_pid(mut self, pid: u32) -> Self {
        lock(&self.alive).insert(pid);
        self.unkillable.insert(pid);
        self
    }

    pub fn with_named_process(self, name: &str) -> Self {
        lock(&self.names).insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: ProbeCall) {
        lock(&self.calls).push(call);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProcessProbe for FakeProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.record(ProbeCall::IsAlive(pid));
        lock(&self.alive).contains(&pid)
    }

    fn is_alive_by_name(&self, name: &str) -> bool {
        self.record(ProbeCall::IsAliveByName(name.to_string()));
        lock(&self.names).contains(name)
    }

    fn kill_tree(&self, pid: u32, _timeout: Duration) -> bool {
        self.record(ProbeCall::KillTree(pid));
        if self.unkillable.contains(&pid) {
            return false;
        }
        lock(&self.alive).remove(&pid);
        true
    }

    fn kill_by_name(&self, name: &str, _timeout: Duration) -> bool {
        self.record(ProbeCall::KillByName(name.to_string()));
        lock(&self.names).remove(name)
    }
}

/// Timings short enough for tests while leaving shell scripts time to crash.
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        grace_period: Duration::from_millis(400),
        init_timeout: Duration::from_secs(5),
        kill_timeout: Duration::from_secs(5),
        shutdown_delay: Duration::from_millis(200),
    }
}

/// Writes an executable `/bin/sh` script.
pub fn write_script(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create script dir");
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut permissions = fs::metadata(path).expect("script metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).expect("chmod script");
}

/// Lays out a fake engine under `<root>/<kind>/` and returns its descriptor.
///
/// The executable is a shell script called `exe_name`; keep it at most 15 bytes so the
/// process table reports the full name. A config file is written so `start` can proceed.
pub fn install_engine(
    root: &Path,
    kind: EngineKind,
    exe_name: &str,
    script_body: &str,
) -> ServiceDescriptor {
    let dir = PathBuf::from(kind.as_ref());
    let descriptor = ServiceDescriptor {
        name: format!("{kind}-fixture"),
        kind,
        home_dir: dir.clone(),
        bin_dir: dir.join("bin"),
        executable_path: dir.join("bin").join(exe_name),
        data_dir: dir.join("data"),
        log_dir: dir.join("logs"),
        config_file_path: dir.join("etc").join(format!("{kind}.conf")),
        port: 0,
        credentials: Credentials::default(),
        process_name: Some(exe_name.to_string()),
    };

    write_script(&root.join(&descriptor.executable_path), script_body);
    let config = root.join(&descriptor.config_file_path);
    fs::create_dir_all(config.parent().expect("config parent")).expect("create etc");
    fs::write(&config, "# fixture\n").expect("write config");
    descriptor
}
