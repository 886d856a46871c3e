use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;

use lockstep_core::{ActorCall, CallKind, RecordingActor};
use lockstep_net::ActorServer;

fn lockstep() -> Command {
    Command::new(env!("CARGO_BIN_EXE_lockstep"))
}

fn service(name: &str) -> (ActorServer, Arc<RecordingActor>) {
    let actor = Arc::new(RecordingActor::new(name));
    let server = ActorServer::bind("127.0.0.1:0", name, actor.clone()).unwrap();
    (server, actor)
}

#[test]
fn test_help_prints_usage() {
    let out = lockstep().arg("--help").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("--serve"));
}

#[test]
fn test_missing_mode_is_usage_error() {
    let out = lockstep().output().unwrap();
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_run_drives_every_round() {
    let (a, actor_a) = service("a");
    let (b, actor_b) = service("b");
    let connect = format!("{},{}", a.local_addr(), b.local_addr());

    let out = lockstep()
        .args(["--run", "--connect", &connect, "--rounds", "2", "--iterations", "3"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success(), "stdout: {}", stdout);

    // initialize + 2 fire + iterate + exit
    assert!(stdout.contains("round 5:"), "stdout: {}", stdout);
    for actor in [&actor_a, &actor_b] {
        assert_eq!(
            actor.calls(),
            vec![
                ActorCall::Initialize,
                ActorCall::Fire,
                ActorCall::Fire,
                ActorCall::Iterate(3)
            ]
        );
    }
}

#[test]
fn test_failures_set_exit_status() {
    let (a, _actor_a) = service("a");
    let (b, actor_b) = service("b");
    actor_b.fail_on(CallKind::Fire);

    let out = lockstep()
        .args(["--run", "--connect", &format!("{},{}", a.local_addr(), b.local_addr())])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("1 failed"));
}

#[test]
fn test_pipelining_from_config_file() {
    let (a, actor_a) = service("a");
    let (b, actor_b) = service("b");

    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[dispatch]\npipelining = true\niterations = 4").unwrap();

    let out = lockstep()
        .args(["--run", "--connect", &format!("{},{}", a.local_addr(), b.local_addr())])
        .arg("--config")
        .arg(config.path())
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    for actor in [&actor_a, &actor_b] {
        assert_eq!(actor.count(|c| *c == ActorCall::Iterate(1)), 4);
    }
}

#[test]
fn test_zero_iterations_pipelines_until_killed() {
    let (a, actor_a) = service("a");
    let (b, actor_b) = service("b");

    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[dispatch]\npipelining = true\niterations = 0").unwrap();

    let mut child = lockstep()
        .args(["--run", "--connect", &format!("{},{}", a.local_addr(), b.local_addr())])
        .arg("--config")
        .arg(config.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // initialize, one buffering round, then the pipeline stays full
    let stdout = child.stdout.take().unwrap();
    let reached = BufReader::new(stdout)
        .lines()
        .map_while(Result::ok)
        .any(|line| line.starts_with("round 8:"));
    child.kill().unwrap();
    child.wait().unwrap();

    assert!(reached, "pipeline stopped before round 8");
    assert!(actor_a.count(|c| *c == ActorCall::Iterate(1)) >= 7);
    assert!(actor_b.count(|c| *c == ActorCall::Iterate(1)) >= 6);
    assert!(!actor_a.calls().contains(&ActorCall::Iterate(0)));
}

#[test]
fn test_zero_iterations_without_pipelining_is_usage_error() {
    let (a, actor_a) = service("a");

    let out = lockstep()
        .args(["--run", "--connect", &a.local_addr().to_string(), "--iterations", "0"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(2));
    assert!(actor_a.calls().is_empty());
}
