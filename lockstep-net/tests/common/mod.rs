#![allow(dead_code)]
//! Test harness utilities for lockstep-net integration tests.

use std::io::{self, BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lockstep_core::{Config, NetSettings, RecordingActor};
use lockstep_net::framing::{read_message, write_message};
use lockstep_net::protocol::{ActorRequest, ActorResponse};
use lockstep_net::ActorServer;

/// A raw protocol client for driving a server directly.
pub struct RawClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl RawClient {
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(Self { reader, writer })
    }

    pub fn send(&mut self, msg: &ActorRequest) -> io::Result<()> {
        write_message(&mut self.writer, msg)
    }

    pub fn recv(&mut self) -> io::Result<ActorResponse> {
        read_message(&mut self.reader)
    }

    pub fn call(&mut self, msg: &ActorRequest) -> io::Result<ActorResponse> {
        self.send(msg)?;
        self.recv()
    }
}

/// Host a fresh `RecordingActor` on an ephemeral port.
pub fn spawn_service(name: &str) -> (ActorServer, Arc<RecordingActor>) {
    let actor = Arc::new(RecordingActor::new(name));
    let server = ActorServer::bind("127.0.0.1:0", name, actor.clone()).unwrap();
    (server, actor)
}

pub fn addr(server: &ActorServer) -> String {
    server.local_addr().to_string()
}

pub fn net_settings() -> NetSettings {
    let mut settings = Config::default().net();
    settings.io_timeout = Some(Duration::from_secs(5));
    settings
}

/// Poll `cond` until it holds, or panic after `timeout`.
pub fn wait_until<F: FnMut() -> bool>(mut cond: F, timeout: Duration, what: &str) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("Timed out waiting for {}", what);
}
