use std::time::Duration;

use super::*;
use crate::support::{entries, journal, FakeSpawner, Script, SIGTERM};
use crate::supervisor::Backoff;

fn backoff() -> Backoff {
    Backoff::new(Duration::from_secs(1), Duration::from_secs(8))
}

fn spawn(spawner: &FakeSpawner, role: Role) -> (LaunchSpec, Spawned) {
    let spec = LaunchSpec::new("server").arg("--port").arg("8080");
    let spawned = spawner.spawn(role, &spec).unwrap();
    (spec, spawned)
}

/// Stands in for the observer task.
fn reap(attached: Attached) {
    let Attached {
        mut waiter,
        exit_tx,
        ..
    } = attached;
    tokio::spawn(async move {
        let status = waiter.wait().await.unwrap_or_else(|_| ExitStatus::unknown());
        let _ = exit_tx.send(Some(status));
    });
}

#[tokio::test(start_paused = true)]
async fn attach_bumps_generation_and_starts() {
    let spawner = FakeSpawner::new(journal());
    let mut process = ManagedProcess::new(Role::Application, backoff());
    assert_eq!(process.generation(), 0);
    assert!(!process.is_alive());

    let (spec, spawned) = spawn(&spawner, Role::Application);
    let attached = process.attach(spec, spawned).unwrap();

    assert_eq!(attached.generation, 1);
    assert_eq!(process.generation(), 1);
    assert_eq!(process.state(), ProcessState::Starting);
    assert_eq!(process.spec().map(|s| s.program.as_str()), Some("server"));
    assert!(process.pid().is_some());
    assert!(process.is_alive());
    assert_eq!(process.exit_status(), None);
    reap(attached);
}

#[tokio::test(start_paused = true)]
async fn second_live_handle_is_refused() {
    let spawner = FakeSpawner::new(journal());
    let mut process = ManagedProcess::new(Role::Daemon, backoff());

    let (spec, spawned) = spawn(&spawner, Role::Daemon);
    let first = process.attach(spec, spawned).unwrap();

    let (spec, spawned) = spawn(&spawner, Role::Daemon);
    let err = match process.attach(spec, spawned) {
        Ok(_) => panic!("second attach succeeded"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    assert_eq!(process.generation(), 1);
    reap(first);
}

#[tokio::test(start_paused = true)]
async fn terminate_is_observed_through_wait_exit() {
    let journal = journal();
    let spawner = FakeSpawner::new(journal.clone());
    let mut process = ManagedProcess::new(Role::Application, backoff());

    let (spec, spawned) = spawn(&spawner, Role::Application);
    reap(process.attach(spec, spawned).unwrap());

    process.signal_terminate().unwrap();
    let status = process.wait_exit(Duration::from_secs(2)).await;

    assert_eq!(status, Some(ExitStatus::signalled(SIGTERM)));
    assert!(!process.is_alive());
    // visible before any exit event is handled
    assert_eq!(process.exit_status(), Some(ExitStatus::signalled(SIGTERM)));
    assert_eq!(process.last_exit(), None);
    assert_eq!(entries(&journal), vec!["spawn application", "terminate application"]);

    // no signals for a reaped child
    process.signal_kill().unwrap();
    assert_eq!(entries(&journal).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn wait_exit_gives_up_after_grace() {
    let spawner = FakeSpawner::new(journal());
    spawner.script(Role::Application, Script::IgnoreTerm);
    let mut process = ManagedProcess::new(Role::Application, backoff());

    let (spec, spawned) = spawn(&spawner, Role::Application);
    reap(process.attach(spec, spawned).unwrap());

    process.signal_terminate().unwrap();
    let started = tokio::time::Instant::now();
    assert_eq!(process.wait_exit(Duration::from_secs(2)).await, None);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(process.is_alive());

    process.signal_kill().unwrap();
    assert!(process.wait_exit(Duration::from_secs(2)).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn reattach_after_exit_uses_next_generation() {
    let spawner = FakeSpawner::new(journal());
    spawner.script(
        Role::Application,
        Script::ExitAfter(Duration::ZERO, ExitStatus::exited(1)),
    );
    let mut process = ManagedProcess::new(Role::Application, backoff());

    let (spec, spawned) = spawn(&spawner, Role::Application);
    reap(process.attach(spec, spawned).unwrap());
    process.transition(ProcessState::Running);
    let status = process.wait_exit(Duration::from_secs(1)).await.unwrap();
    process.record_exit(status);
    assert!(process.transition(ProcessState::ExitedFailed));

    process.schedule_restart(Duration::from_secs(1));
    assert_eq!(process.state(), ProcessState::Pending);
    assert_eq!(process.restarts(), 1);
    assert!(process.restart_at().is_some());
    process.clear_restart();

    let (spec, spawned) = spawn(&spawner, Role::Application);
    let attached = process.attach(spec, spawned).unwrap();
    assert_eq!(attached.generation, 2);
    assert_eq!(process.last_exit(), Some(ExitStatus::exited(1)));
    reap(attached);
}

#[test]
fn illegal_transition_leaves_state() {
    let mut process = ManagedProcess::new(Role::Application, backoff());
    assert!(!process.transition(ProcessState::Running));
    assert_eq!(process.state(), ProcessState::Pending);
    assert!(process.transition(ProcessState::Starting));
    assert!(!process.transition(ProcessState::ReadyWait));
    assert_eq!(process.state(), ProcessState::Starting);
}

#[test]
fn reset_restarts_rewinds_backoff() {
    let mut process = ManagedProcess::new(Role::Application, backoff());
    process.backoff_mut().next_delay();
    process.backoff_mut().next_delay();
    process.schedule_restart(Duration::from_secs(2));
    assert_eq!(process.restarts(), 1);
    process.reset_restarts();

    assert_eq!(process.restarts(), 0);
    assert_eq!(process.backoff_mut().peek(), Duration::from_secs(1));
}
