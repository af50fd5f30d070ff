//! Registry behaviour with real processes behind it.

#[path = "common/mod.rs"]
mod common;

use std::{fs, time::Duration};

use common::{LONG_RUNNING, line_count, system_supervisor};
use dbvisor::{
    config::EngineKind,
    registry::{Direction, ServiceRegistry, ServiceState, Toggle},
    test_utils::install_engine,
};
use tempfile::tempdir;

#[test]
fn double_toggle_launches_a_single_process() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(
        root,
        EngineKind::Redis,
        "dbv-it-dbl",
        "echo launch >> ../launches\nwhile :; do sleep 1; done",
    );
    let name = descriptor.name.clone();
    let registry = ServiceRegistry::new(system_supervisor(root), vec![descriptor]);
    assert_eq!(registry.query_state(&name).unwrap(), ServiceState::Stopped);

    let Toggle::Dispatched(operation) = registry.toggle(&name).unwrap() else {
        panic!("first toggle should dispatch");
    };
    assert!(matches!(registry.toggle(&name).unwrap(), Toggle::Ignored));
    assert_eq!(
        registry.query_state(&name).unwrap(),
        ServiceState::Transitioning(Direction::Starting)
    );

    assert!(operation.wait());
    assert_eq!(registry.query_state(&name).unwrap(), ServiceState::Running);
    assert_eq!(line_count(&root.join("redis/launches")), 1);

    let Toggle::Dispatched(operation) = registry.toggle(&name).unwrap() else {
        panic!("stop toggle should dispatch");
    };
    assert_eq!(operation.direction(), Direction::Stopping);
    assert!(operation.wait());
    assert_eq!(registry.query_state(&name).unwrap(), ServiceState::Stopped);
}

#[test]
fn services_transition_independently() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let slow = install_engine(root, EngineKind::MySql, "dbv-it-slow", LONG_RUNNING);
    let fast = install_engine(root, EngineKind::Redis, "dbv-it-fast", LONG_RUNNING);
    // Initialization only runs against an empty data dir.
    fs::create_dir_all(root.join("mysql/data/mysql")).unwrap();
    let registry = ServiceRegistry::new(
        system_supervisor(root),
        vec![slow.clone(), fast.clone()],
    );

    let Toggle::Dispatched(first) = registry.toggle(&slow.name).unwrap() else {
        panic!("toggle should dispatch");
    };
    let Toggle::Dispatched(second) = registry.toggle(&fast.name).unwrap() else {
        panic!("a second service must not be blocked by the first");
    };
    assert!(first.wait());
    assert!(second.wait());

    let statuses = registry.statuses().unwrap();
    assert!(statuses.iter().all(|status| status.state == ServiceState::Running));

    let operations = registry.shutdown_all();
    assert_eq!(operations.len(), 2);
    for operation in operations {
        assert!(operation.wait());
    }
    assert_eq!(registry.query_state(&slow.name).unwrap(), ServiceState::Stopped);
    assert_eq!(registry.query_state(&fast.name).unwrap(), ServiceState::Stopped);
}

#[test]
fn registry_reconciles_with_processes_started_earlier() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let descriptor = install_engine(root, EngineKind::MongoDb, "dbv-it-recon", LONG_RUNNING);
    let name = descriptor.name.clone();

    {
        let registry = ServiceRegistry::new(system_supervisor(root), vec![descriptor.clone()]);
        let Toggle::Dispatched(operation) = registry.toggle(&name).unwrap() else {
            panic!("toggle should dispatch");
        };
        assert!(operation.wait());
    }

    let events_registry = ServiceRegistry::new(system_supervisor(root), vec![descriptor]);
    assert_eq!(events_registry.query_state(&name).unwrap(), ServiceState::Running);

    let events = events_registry.subscribe().unwrap();
    let Toggle::Dispatched(operation) = events_registry.toggle(&name).unwrap() else {
        panic!("toggle should dispatch");
    };
    assert!(operation.wait());

    let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.state, ServiceState::Transitioning(Direction::Stopping));
    let second = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(second.state, ServiceState::Stopped);
}
