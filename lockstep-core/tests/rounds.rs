mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lockstep_core::{
    ActorCall, ActorError, CallKind, Coordinator, Discovery, DiscoveryError, RecordingActor,
    StaticRegistry, WorkerState,
};
use lockstep_types::{Command, Firing, Schedule, WorkerKey};

#[test]
fn test_initialize_fire_exit_with_one_failing_service() {
    let (handles, actors) = common::named_fleet(&["A", "B", "C"]);
    actors[1].fail_on(CallKind::Fire);
    let mut coordinator = Coordinator::with_handles(handles, &common::dispatch_settings()).unwrap();

    let summary = coordinator.run_round(Command::Initialize).unwrap();
    assert!(summary.is_clean());
    for actor in &actors {
        assert_eq!(actor.count(|c| *c == ActorCall::Initialize), 1);
    }

    // B's failure is logged and reported, but the round still completes.
    let summary = coordinator.run_round(Command::Fire).unwrap();
    assert_eq!(summary.assigned, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].service.as_str(), "B");
    assert!(matches!(summary.failures[0].error, ActorError::Remote(_)));
    for actor in &actors {
        assert_eq!(actor.count(|c| *c == ActorCall::Fire), 1);
    }

    coordinator.run_round(Command::Exit).unwrap();
    assert!(coordinator
        .workers()
        .iter()
        .all(|w| w.state() == WorkerState::Stopped));
    assert_eq!(coordinator.round(), 3);
}

#[test]
fn test_workers_execute_in_parallel() {
    let (handles, actors) = common::fleet(4);
    for actor in &actors {
        actor.set_latency(Duration::from_millis(200));
    }
    let mut coordinator = Coordinator::with_handles(handles, &common::dispatch_settings()).unwrap();

    let start = Instant::now();
    let summary = coordinator.run_round(Command::Fire).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(summary.succeeded, 4);
    assert!(elapsed < Duration::from_millis(600), "round took {:?}", elapsed);
    assert!(summary.slowest >= Duration::from_millis(200));
}

#[test]
fn test_round_never_completes_early() {
    let (handles, actors) = common::fleet(2);
    actors[1].set_latency(Duration::from_millis(150));
    let mut coordinator = Coordinator::with_handles(handles, &common::dispatch_settings()).unwrap();

    coordinator.start_round(Command::Fire).unwrap();
    coordinator.wait_for_round();
    // Both calls happened before wait returned.
    assert_eq!(actors[0].calls(), vec![ActorCall::Fire]);
    assert_eq!(actors[1].calls(), vec![ActorCall::Fire]);
}

#[test]
fn test_iterate_round_respects_counts() {
    let (handles, actors) = common::fleet(3);
    let mut coordinator = Coordinator::with_handles(handles, &common::dispatch_settings()).unwrap();

    let summary = coordinator
        .iterate_round([(WorkerKey::new(0), 1), (WorkerKey::new(2), 9)])
        .unwrap();
    assert_eq!(summary.assigned, 2);
    assert_eq!(actors[0].calls(), vec![ActorCall::Iterate(1)]);
    assert!(actors[1].calls().is_empty());
    assert_eq!(actors[2].calls(), vec![ActorCall::Iterate(9)]);
}

#[test]
fn test_start_from_discovery_skips_dead_services() {
    let (handles, actors) = common::fleet(3);
    actors[1].set_alive(false);
    let registry = StaticRegistry::new(handles);
    let discovery = Discovery::new(registry).with_poll_interval(Duration::from_millis(10));

    let coordinator = Coordinator::start(&discovery, 2, &common::dispatch_settings()).unwrap();
    let services: Vec<&str> = coordinator
        .workers()
        .iter()
        .map(|w| w.service().as_str())
        .collect();
    assert_eq!(services, vec!["svc-0", "svc-2"]);
}

#[test]
fn test_discovery_waits_for_late_service() {
    let (handles, _actors) = common::fleet(1);
    let registry = Arc::new(StaticRegistry::new(handles));
    let discovery = Discovery::new(registry.clone()).with_poll_interval(Duration::from_millis(10));

    let late = Arc::new(RecordingActor::new("svc-late"));
    let adder = {
        let registry = registry.clone();
        let handle = common::handle(&late);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            registry.add(handle);
        })
    };

    let coordinator = Coordinator::start(&discovery, 2, &common::dispatch_settings()).unwrap();
    adder.join().unwrap();
    assert_eq!(coordinator.worker_count(), 2);
}

#[test]
fn test_quorum_timeout() {
    let (handles, _actors) = common::fleet(1);
    let discovery = Discovery::new(StaticRegistry::new(handles))
        .with_poll_interval(Duration::from_millis(10))
        .with_quorum_timeout(Some(Duration::from_millis(50)));

    match Coordinator::start(&discovery, 3, &common::dispatch_settings()) {
        Err(lockstep_core::CoordinatorError::Discovery(DiscoveryError::QuorumTimeout {
            required,
            found,
        })) => {
            assert_eq!(required, 3);
            assert_eq!(found, 1);
        }
        Err(other) => panic!("Expected quorum timeout, got {}", other),
        Ok(_) => panic!("Expected quorum timeout"),
    }
}

#[test]
fn test_call_timeout_fails_the_call_not_the_round() {
    let (handles, actors) = common::fleet(2);
    actors[0].set_latency(Duration::from_millis(500));
    let mut settings = common::dispatch_settings();
    settings.call_timeout = Some(Duration::from_millis(50));
    let mut coordinator = Coordinator::with_handles(handles, &settings).unwrap();

    let summary = coordinator.run_round(Command::Fire).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(matches!(summary.failures[0].error, ActorError::Timeout(_)));

    // The worker keeps serving later rounds.
    actors[0].set_latency(Duration::ZERO);
    let summary = coordinator.run_round(Command::Fire).unwrap();
    assert!(summary.is_clean());
}

#[test]
fn test_parallel_fire_runs_levels_in_order() {
    let (handles, actors) = common::fleet(3);
    let mut coordinator = Coordinator::with_handles(handles, &common::dispatch_settings()).unwrap();
    coordinator.map_actors(["source", "left", "right"]).unwrap();

    let schedule = Schedule::new()
        .with_level(vec![Firing::new("source", 2)])
        .with_level(vec![Firing::new("left", 1), Firing::new("right", 3)]);

    let summaries = coordinator.parallel_fire(&schedule).unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].assigned, 1);
    assert_eq!(summaries[1].assigned, 2);
    assert_eq!(actors[0].calls(), vec![ActorCall::Iterate(2)]);
    assert_eq!(actors[1].calls(), vec![ActorCall::Iterate(1)]);
    assert_eq!(actors[2].calls(), vec![ActorCall::Iterate(3)]);
}

#[test]
fn test_parallel_fire_rejects_unmapped_actor() {
    let (handles, _actors) = common::fleet(1);
    let mut coordinator = Coordinator::with_handles(handles, &common::dispatch_settings()).unwrap();
    coordinator.map_actors(["a"]).unwrap();

    let schedule = Schedule::sequential(vec![Firing::new("b", 1)]);
    assert!(matches!(
        coordinator.parallel_fire(&schedule),
        Err(lockstep_core::CoordinatorError::UnknownActor(name)) if name == "b"
    ));
}

#[test]
fn test_pipelined_run_fires_each_level_n_times() {
    let (handles, actors) = common::fleet(3);
    let mut coordinator = Coordinator::with_handles(handles, &common::dispatch_settings()).unwrap();
    coordinator.map_actors(["a", "b", "c"]).unwrap();

    let schedule = Schedule::sequential(vec![
        Firing::new("a", 1),
        Firing::new("b", 1),
        Firing::new("c", 1),
    ]);
    let summaries = coordinator.run_pipelined(&schedule, 5).unwrap();

    assert_eq!(summaries.len(), 7);
    assert!(summaries.iter().all(|s| s.is_clean()));
    for actor in &actors {
        assert_eq!(actor.count(|c| *c == ActorCall::Iterate(1)), 5);
    }
}

#[test]
fn test_drop_shuts_down_workers() {
    let (handles, actors) = common::fleet(2);
    {
        let mut coordinator =
            Coordinator::with_handles(handles, &common::dispatch_settings()).unwrap();
        coordinator.run_round(Command::Fire).unwrap();
    }
    // Exit is never forwarded to the remote actor.
    for actor in &actors {
        assert_eq!(actor.calls(), vec![ActorCall::Fire]);
    }
}
