//! `SystemProbe` against the live process table.

#[path = "common/mod.rs"]
mod common;

use std::{
    os::unix::process::CommandExt,
    process::{Child, Command},
    time::Duration,
};

use common::{LONG_RUNNING, is_process_alive, reap_within, wait_for_name};
use dbvisor::{
    probe::{ProcessProbe, SystemProbe},
    test_utils::write_script,
};
use tempfile::tempdir;

fn spawn_script(path: &std::path::Path, own_group: bool) -> Child {
    let mut command = Command::new(path);
    if own_group {
        command.process_group(0);
    }
    command.spawn().expect("spawn script")
}

#[test]
fn own_process_is_alive() {
    let probe = SystemProbe::new();
    assert!(probe.is_alive(std::process::id()));
}

#[test]
fn kill_by_name_terminates_every_instance() {
    let temp = tempdir().expect("failed to create tempdir");
    let script = temp.path().join("dbv-it-multi");
    write_script(&script, LONG_RUNNING);

    let mut first = spawn_script(&script, false);
    let mut second = spawn_script(&script, true);
    wait_for_name("dbv-it-multi");

    let probe = SystemProbe::new();
    assert!(probe.is_alive_by_name("dbv-it-multi"));
    assert!(probe.kill_by_name("dbv-it-multi", Duration::from_secs(5)));

    let first_pid = first.id();
    let second_pid = second.id();
    reap_within(&mut first, Duration::from_secs(5));
    reap_within(&mut second, Duration::from_secs(5));
    assert!(!is_process_alive(first_pid));
    assert!(!is_process_alive(second_pid));
    assert!(!probe.is_alive_by_name("dbv-it-multi"));
}

#[test]
fn exhausted_timeout_still_waits_on_each_instance() {
    let temp = tempdir().expect("failed to create tempdir");
    let script = temp.path().join("dbv-it-budget");
    write_script(&script, LONG_RUNNING);

    let mut children: Vec<Child> = (0..3).map(|_| spawn_script(&script, true)).collect();
    wait_for_name("dbv-it-budget");

    // No shared budget left: each instance still gets a short wait of its own.
    let probe = SystemProbe::new();
    assert!(probe.kill_by_name("dbv-it-budget", Duration::ZERO));

    for child in &mut children {
        let pid = child.id();
        reap_within(child, Duration::from_secs(5));
        assert!(!is_process_alive(pid));
    }
    assert!(!probe.is_alive_by_name("dbv-it-budget"));
}

#[test]
fn kill_tree_sweeps_a_foreign_process_group() {
    let temp = tempdir().expect("failed to create tempdir");
    let script = temp.path().join("dbv-it-group");
    write_script(&script, "sleep 30 &\nsleep 30 &\nwait");

    let mut leader = spawn_script(&script, true);
    wait_for_name("dbv-it-group");
    let pid = leader.id();

    let probe = SystemProbe::new();
    assert!(probe.kill_tree(pid, Duration::from_secs(5)));
    reap_within(&mut leader, Duration::from_secs(5));
    assert!(!probe.is_alive(pid));
    assert!(!probe.is_alive_by_name("dbv-it-group"));
}

#[test]
fn name_lookup_does_not_match_prefixes() {
    let temp = tempdir().expect("failed to create tempdir");
    let script = temp.path().join("dbv-it-pfxlong");
    write_script(&script, LONG_RUNNING);

    let mut child = spawn_script(&script, false);
    wait_for_name("dbv-it-pfxlong");

    let probe = SystemProbe::new();
    assert!(!probe.is_alive_by_name("dbv-it-pfx"));
    assert!(!probe.kill_by_name("dbv-it-pfx", Duration::from_millis(200)));
    assert!(probe.is_alive(child.id()));

    assert!(probe.kill_tree(child.id(), Duration::from_secs(5)));
    reap_within(&mut child, Duration::from_secs(5));
}
