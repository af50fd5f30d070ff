#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    process::{Child, Command},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use dbvisor::{
    logs::LogSink,
    probe::SystemProbe,
    runtime::InstallRoot,
    supervisor::ServiceSupervisor,
    test_utils::fast_settings,
};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Script body that stays up until killed, keeping its own name in the process table.
pub const LONG_RUNNING: &str = "while :; do sleep 1; done";

pub fn system_supervisor(root: &Path) -> ServiceSupervisor {
    let root = InstallRoot::new(root);
    let log = Arc::new(LogSink::new(root.log_dir()));
    ServiceSupervisor::system(root, fast_settings(), log)
}

/// A pid that belonged to a process which has already exited and been reaped.
pub fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().expect("spawn true");
    let pid = child.id();
    child.wait().expect("wait for true");
    pid
}

pub fn spawn_sleep(seconds: u32) -> Child {
    Command::new("sleep")
        .arg(seconds.to_string())
        .spawn()
        .expect("spawn sleep")
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for PID {pid} to exit");
}

pub fn read_pid(path: &Path) -> u32 {
    fs::read_to_string(path)
        .expect("read pid file")
        .trim()
        .parse()
        .expect("pid file holds a number")
}

pub fn line_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|content| content.lines().count())
        .unwrap_or(0)
}

/// Waits until a live process named `name` shows up in the process table.
pub fn wait_for_name(name: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        if system.processes().values().any(|process| process.name() == name) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for a process named '{name}'");
}

/// Reaps a child that the code under test was expected to kill. If it is still running after
/// `timeout`, it is killed here and the test fails instead of hanging.
pub fn reap_within(child: &mut Child, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Ok(None) => {
                let pid = child.id();
                let _ = child.kill();
                let _ = child.wait();
                panic!("PID {pid} was still running after {timeout:?}");
            }
            Err(err) => panic!("Failed to poll PID {}: {err}", child.id()),
        }
    }
}
