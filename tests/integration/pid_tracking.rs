//! Pid record handling when the record and the process table disagree.

#[path = "common/mod.rs"]
mod common;

use std::{fs, process::Command, time::Duration};

use common::{
    LONG_RUNNING, dead_pid, is_process_alive, reap_within, spawn_sleep, system_supervisor,
    wait_for_name,
};
use dbvisor::{config::EngineKind, test_utils::install_engine};
use tempfile::tempdir;

#[test]
fn recorded_pid_is_trusted_even_if_reused() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(root, EngineKind::MongoDb, "dbv-it-reuse", LONG_RUNNING);
    let supervisor = system_supervisor(root);

    // An unrelated process now owns the recorded pid.
    let mut impostor = spawn_sleep(30);
    let pid_path = root.join("pids/mongodb.pid");
    fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
    fs::write(&pid_path, impostor.id().to_string()).unwrap();

    assert!(supervisor.is_running(&descriptor));
    assert!(supervisor.stop(&descriptor));
    assert!(!pid_path.exists());

    reap_within(&mut impostor, Duration::from_secs(5));
    assert!(!supervisor.is_running(&descriptor));
}

#[test]
fn stale_record_falls_back_to_process_name() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(root, EngineKind::MongoDb, "dbv-it-orphan", LONG_RUNNING);
    let supervisor = system_supervisor(root);

    let pid_path = root.join("pids/mongodb.pid");
    fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
    fs::write(&pid_path, dead_pid().to_string()).unwrap();

    // Launched outside the supervisor, so only its name identifies it.
    let mut orphan = Command::new(root.join(&descriptor.executable_path))
        .spawn()
        .expect("spawn orphan");
    wait_for_name(descriptor.process_name());

    assert!(supervisor.is_running(&descriptor));
    let stopped = supervisor.stop(&descriptor);
    reap_within(&mut orphan, Duration::from_secs(5));
    assert!(stopped);
    assert!(!pid_path.exists());
    assert!(!supervisor.is_running(&descriptor));
}

#[test]
fn unparsable_record_is_ignored() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(root, EngineKind::Redis, "dbv-it-junk", LONG_RUNNING);
    let supervisor = system_supervisor(root);

    let pid_path = root.join("pids/redis.pid");
    fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
    fs::write(&pid_path, "not-a-pid\n").unwrap();
    assert!(!supervisor.is_running(&descriptor));

    assert!(supervisor.start(&descriptor));
    let pid: u32 = fs::read_to_string(&pid_path).unwrap().trim().parse().unwrap();
    assert!(is_process_alive(pid));
    assert!(supervisor.stop(&descriptor));
    assert!(!is_process_alive(pid));
}
