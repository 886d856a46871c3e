mod common;

use std::sync::Arc;
use std::time::Duration;

use lockstep_core::{ActorCall, ActorError, RecordingActor, RemoteActor};
use lockstep_net::{ActorServer, TcpActor};

#[test]
fn test_connection_is_lazy() {
    let (server, _actor) = common::spawn_service("lazy");
    let client = TcpActor::new(common::addr(&server));
    assert!(!client.is_connected());
    client.ping().unwrap();
    assert!(client.is_connected());
    common::wait_until(|| server.connection_count() == 1, Duration::from_secs(2), "connection");
}

#[test]
fn test_reconnects_after_server_restart() {
    let (mut server, _first) = common::spawn_service("svc");
    let addr = common::addr(&server);
    let client = TcpActor::from_settings(addr.clone(), &common::net_settings());
    client.fire().unwrap();

    server.shutdown();
    assert!(matches!(client.fire(), Err(ActorError::Communication(_))));
    assert!(!client.is_connected());

    // Same port, new process.
    let second = Arc::new(RecordingActor::new("svc"));
    let _restarted = ActorServer::bind(&addr, "svc", second.clone()).unwrap();
    client.fire().unwrap();
    assert_eq!(second.calls(), vec![ActorCall::Fire]);
}

#[test]
fn test_io_timeout_surfaces_as_timeout() {
    let (server, actor) = common::spawn_service("slow");
    actor.set_latency(Duration::from_millis(500));
    let client = TcpActor::new(common::addr(&server)).with_io_timeout(Some(Duration::from_millis(50)));

    assert!(matches!(client.fire(), Err(ActorError::Timeout(_))));
    // The half-read stream was dropped; the next call starts clean.
    actor.set_latency(Duration::ZERO);
    client.ping().unwrap();
}

#[test]
fn test_disconnect_sends_goodbye() {
    let (server, _actor) = common::spawn_service("svc");
    let client = TcpActor::new(common::addr(&server));
    client.ping().unwrap();
    common::wait_until(|| server.connection_count() == 1, Duration::from_secs(2), "connection");

    client.disconnect();
    common::wait_until(|| server.connection_count() == 0, Duration::from_secs(2), "goodbye");
}
