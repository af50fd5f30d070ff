//! Process liveness checks and forceful termination.
//!
//! Termination by name matches every process on the host with that executable name, including
//! instances this supervisor never launched. It only runs after pid-based handling failed.
use std::{
    collections::{HashMap, HashSet, VecDeque},
    ffi::OsStr,
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{self, Pid},
};
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::constants::{COMM_NAME_LIMIT, PROCESS_CHECK_INTERVAL};

/// Platform operations the supervisor needs on foreign processes.
pub trait ProcessProbe: Send + Sync {
    /// True iff a process with this id exists and has not exited.
    fn is_alive(&self, pid: u32) -> bool;

    /// True iff at least one live process carries this bare executable name.
    fn is_alive_by_name(&self, name: &str) -> bool;

    /// Forcefully terminates `pid` and its descendants. True when the process is gone within
    /// `timeout` and every signal to it was accepted; an already missing process counts as success.
    fn kill_tree(&self, pid: u32, timeout: Duration) -> bool;

    /// Forcefully terminates every process with this bare executable name. False when nothing
    /// matched or any match survived `timeout`.
    fn kill_by_name(&self, name: &str, timeout: Duration) -> bool;
}

/// [`ProcessProbe`] backed by POSIX signals and the OS process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }

    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }

    /// Exited-but-unreaped children still answer signal 0, so the table has the final say.
    fn is_defunct(pid: u32) -> bool {
        let target = sysinfo::Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        matches!(
            system.process(target).map(|process| process.status()),
            Some(ProcessStatus::Zombie | ProcessStatus::Dead)
        )
    }

    /// Live processes whose name matches `name`, excluding this process.
    fn pids_named(system: &System, name: &str) -> Vec<u32> {
        let own = std::process::id();
        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                pid.as_u32() != own
                    && !matches!(
                        process.status(),
                        ProcessStatus::Zombie | ProcessStatus::Dead
                    )
                    && name_matches(process.name(), name)
            })
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Every transitive child of `root`, parents before children. This process and everything
    /// below it are left out, so a reused pid naming one of our ancestors cannot take us down.
    fn descendants(system: &System, root: u32) -> Vec<u32> {
        let own = std::process::id();
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, process) in system.processes() {
            if let Some(parent) = process.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .push(pid.as_u32());
            }
        }

        let mut seen = HashSet::from([root, own]);
        let mut ordered = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            for &child in children.get(&current).into_iter().flatten() {
                if seen.insert(child) {
                    ordered.push(child);
                    queue.push_back(child);
                }
            }
        }
        ordered
    }

    /// Sends SIGKILL to `pid`, its process group when it leads a foreign one, and its
    /// descendants. False when the OS refused the signal to `pid` itself.
    fn signal_tree(pid: u32) -> bool {
        let Some(target) = to_nix_pid(pid) else {
            return false;
        };

        let descendants = Self::descendants(&Self::snapshot(), pid);

        // Servers are launched as their own group leader; sweep the group first so
        // children forked between the snapshot and now are included.
        let own_group = unistd::getpgid(None).ok();
        if let Ok(group) = unistd::getpgid(Some(target))
            && group == target
            && Some(group) != own_group
        {
            match signal::killpg(group, Signal::SIGKILL) {
                Ok(()) => debug!("Sent SIGKILL to process group {group}"),
                Err(Errno::ESRCH) => {}
                Err(err) => warn!(
                    "Failed to signal process group {group}: {err}. Falling back to direct signals"
                ),
            }
        }

        for &child in descendants.iter().rev() {
            if let Some(child_pid) = to_nix_pid(child) {
                match signal::kill(child_pid, Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(err) => warn!("Failed to kill PID {child} (child of {pid}): {err}"),
                }
            }
        }

        match signal::kill(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => true,
            Err(err) => {
                warn!("Failed to kill PID {pid}: {err}");
                false
            }
        }
    }

    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(PROCESS_CHECK_INTERVAL);
        }
    }
}

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(target) = to_nix_pid(pid) else {
            return false;
        };

        match signal::kill(target, None) {
            Ok(()) | Err(Errno::EPERM) => !Self::is_defunct(pid),
            Err(Errno::ESRCH) => false,
            Err(err) => {
                debug!("Liveness probe for PID {pid} failed: {err}");
                false
            }
        }
    }

    fn is_alive_by_name(&self, name: &str) -> bool {
        !Self::pids_named(&Self::snapshot(), name).is_empty()
    }

    fn kill_tree(&self, pid: u32, timeout: Duration) -> bool {
        if is_protected(pid) {
            warn!("Refusing to terminate protected PID {pid}");
            return false;
        }

        if !self.is_alive(pid) {
            debug!("PID {pid} already gone");
            return true;
        }

        if !Self::signal_tree(pid) {
            return false;
        }

        let exited = self.wait_for_exit(pid, timeout);
        if !exited {
            warn!("PID {pid} still alive {timeout:?} after SIGKILL");
        }
        exited
    }

    fn kill_by_name(&self, name: &str, timeout: Duration) -> bool {
        let pids: Vec<u32> = Self::pids_named(&Self::snapshot(), name)
            .into_iter()
            .filter(|pid| !is_protected(*pid))
            .collect();
        if pids.is_empty() {
            debug!("No process named '{name}' to terminate");
            return false;
        }

        // Signal every match before waiting so they die together.
        let mut all_terminated = true;
        for &pid in &pids {
            debug!("Terminating '{name}' instance PID {pid}");
            if !Self::signal_tree(pid) {
                all_terminated = false;
            }
        }

        let deadline = Instant::now() + timeout;
        for pid in pids {
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(PROCESS_CHECK_INTERVAL * 4);
            if !self.wait_for_exit(pid, remaining) {
                warn!("'{name}' instance PID {pid} survived SIGKILL");
                all_terminated = false;
            }
        }
        all_terminated
    }
}

/// Our own process and init are never valid targets.
fn is_protected(pid: u32) -> bool {
    pid <= 1 || pid == std::process::id()
}

fn to_nix_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

fn strip_exe_suffix(name: &str) -> &str {
    name.strip_suffix(".exe").unwrap_or(name)
}

/// Compares a process-table name with a bare executable name. Linux reports at most
/// [`COMM_NAME_LIMIT`] bytes, so a name of exactly that length matches as a prefix.
fn name_matches(process_name: &OsStr, target: &str) -> bool {
    let target = strip_exe_suffix(target.trim());
    if target.is_empty() {
        return false;
    }
    let process_name = process_name.to_string_lossy();
    let process_name = strip_exe_suffix(&process_name);
    process_name == target
        || (process_name.len() == COMM_NAME_LIMIT && target.starts_with(process_name))
}
