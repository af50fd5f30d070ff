//! End-to-end lifecycle tests against real processes.

#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{LONG_RUNNING, dead_pid, is_process_alive, line_count, read_pid, system_supervisor};
use dbvisor::{config::EngineKind, error::SupervisorError, test_utils::install_engine};
use tempfile::tempdir;

const FAKE_MYSQLD: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --initialize-insecure) init=1 ;;
    --datadir=*) datadir="${arg#--datadir=}" ;;
  esac
done
if [ -n "$init" ]; then
  mkdir -p "$datadir/mysql"
  echo run >> "$datadir/../init.count"
  exit 0
fi
echo "$@" > ../launch.args
while :; do sleep 1; done
"#;

#[test]
fn key_value_start_replaces_stale_pid_and_stop_cleans_up() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(root, EngineKind::Redis, "dbv-it-kv", LONG_RUNNING);
    let supervisor = system_supervisor(root);

    let pid_path = root.join("pids").join("redis.pid");
    fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
    let stale = dead_pid();
    fs::write(&pid_path, stale.to_string()).unwrap();
    assert!(!supervisor.is_running(&descriptor));

    assert!(supervisor.start(&descriptor));
    let pid = read_pid(&pid_path);
    assert_ne!(pid, stale);
    assert!(is_process_alive(pid));
    assert!(supervisor.is_running(&descriptor));

    assert!(supervisor.stop(&descriptor));
    assert!(!pid_path.exists());
    assert!(!is_process_alive(pid));
    assert!(!supervisor.is_running(&descriptor));

    let log = fs::read_to_string(supervisor.log().current_path()).unwrap();
    assert!(log.contains(&format!("Started {} (PID {pid})", descriptor.name)));
    assert!(log.contains(&format!("Stopped {}", descriptor.name)));
}

#[test]
fn relational_data_dir_is_initialized_once() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(root, EngineKind::MySql, "dbv-it-rel", FAKE_MYSQLD);
    let supervisor = system_supervisor(root);
    let init_count = root.join("mysql").join("init.count");

    assert!(supervisor.start(&descriptor));
    assert_eq!(line_count(&init_count), 1);
    assert!(root.join("mysql/data/mysql").is_dir());

    let args = fs::read_to_string(root.join("mysql/launch.args")).unwrap();
    let expected = root.join("mysql/etc/mysql.conf");
    assert_eq!(args.trim(), format!("--defaults-file={}", expected.display()));

    assert!(supervisor.stop(&descriptor));
    assert!(supervisor.start(&descriptor));
    assert_eq!(line_count(&init_count), 1);
    assert!(supervisor.stop(&descriptor));
}

#[test]
fn document_store_receives_config_flag() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(
        root,
        EngineKind::MongoDb,
        "dbv-it-doc",
        "echo \"$@\" > ../launch.args\nwhile :; do sleep 1; done",
    );
    let supervisor = system_supervisor(root);

    assert!(supervisor.start(&descriptor));
    let args = fs::read_to_string(root.join("mongodb/launch.args")).unwrap();
    let expected = root.join("mongodb/etc/mongodb.conf");
    assert_eq!(args.trim(), format!("--config {}", expected.display()));
    assert!(supervisor.stop(&descriptor));
}

#[test]
fn process_dying_during_grace_period_is_a_failed_start() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(
        root,
        EngineKind::MongoDb,
        "dbv-it-crash",
        "echo boom >&2\nexit 3",
    );
    let supervisor = system_supervisor(root);

    let err = supervisor.start_checked(&descriptor).unwrap_err();
    assert!(matches!(err, SupervisorError::EarlyExit { .. }), "{err}");
    assert!(!root.join("pids/mongodb.pid").exists());
    assert!(!supervisor.is_running(&descriptor));

    let stderr = fs::read_to_string(root.join("mongodb/logs/mongodb.stderr.log")).unwrap();
    assert!(stderr.contains("boom"));
    let log = fs::read_to_string(supervisor.log().current_path()).unwrap();
    assert!(log.contains(&format!("Error starting {}", descriptor.name)));
}

#[test]
fn missing_executable_fails_without_side_effects() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(root, EngineKind::Redis, "dbv-it-gone", LONG_RUNNING);
    fs::remove_file(root.join(&descriptor.executable_path)).unwrap();
    let supervisor = system_supervisor(root);

    let err = supervisor.start_checked(&descriptor).unwrap_err();
    assert!(matches!(err, SupervisorError::MissingExecutable { .. }));
    assert!(!root.join("pids/redis.pid").exists());
}

#[test]
fn stopping_a_service_that_is_not_running_fails() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(root, EngineKind::Redis, "dbv-it-idle", LONG_RUNNING);
    let supervisor = system_supervisor(root);

    let err = supervisor.stop_checked(&descriptor).unwrap_err();
    assert!(matches!(err, SupervisorError::Terminate { .. }));
}
