//! Actor server: hosts one `RemoteActor` behind a TCP listener.
//!
//! The accept loop runs on its own thread with a non-blocking listener; each
//! connection gets a thread that answers requests in order until the peer
//! says goodbye or the stream closes.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use lockstep_core::{ActorError, ActorResult, RemoteActor};

use crate::framing::{read_message, write_message};
use crate::protocol::{ActorRequest, ActorResponse, ServiceInfo};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

type Connections = Arc<Mutex<HashMap<u64, TcpStream>>>;

fn lock(connections: &Connections) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ActorServer {
    local_addr: SocketAddr,
    info: ServiceInfo,
    running: Arc<AtomicBool>,
    connections: Connections,
    accept_thread: Option<JoinHandle<()>>,
}

impl ActorServer {
    /// Bind `addr` and start serving `actor`. Port 0 picks a free port.
    pub fn bind(addr: &str, name: &str, actor: Arc<dyn RemoteActor>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let info = ServiceInfo::new(name);

        let running = Arc::new(AtomicBool::new(true));
        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));

        let accept_thread = {
            let running = running.clone();
            let connections = connections.clone();
            let info = info.clone();
            thread::Builder::new()
                .name(format!("lockstep-server-{}", local_addr.port()))
                .spawn(move || accept_loop(listener, actor, info, running, connections))?
        };

        info!(target: "net", "actor server '{}' listening on {}", name, local_addr);

        Ok(Self {
            local_addr,
            info,
            running,
            connections,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    /// Open client connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting, close every connection and release the port.
    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                error!(target: "net", "accept thread panicked");
            }
        }
        for (_, stream) in lock(&self.connections).drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        info!(target: "net", "actor server on {} shut down", self.local_addr);
    }
}

impl Drop for ActorServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    actor: Arc<dyn RemoteActor>,
    info: ServiceInfo,
    running: Arc<AtomicBool>,
    connections: Connections,
) {
    let next_id = AtomicU64::new(0);
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = start_connection(id, stream, peer, &actor, &info, &connections) {
                    error!(target: "net", "failed to start connection from {}: {}", peer, e);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                error!(target: "net", "accept error: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!(target: "net", "accept loop exiting");
}

fn start_connection(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    actor: &Arc<dyn RemoteActor>,
    info: &ServiceInfo,
    connections: &Connections,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    let writer = BufWriter::new(stream.try_clone()?);
    lock(connections).insert(id, stream);

    let actor = actor.clone();
    let info = info.clone();
    let conns = connections.clone();
    let spawned = thread::Builder::new()
        .name(format!("lockstep-conn-{}", id))
        .spawn(move || {
            info!(target: "net", "connection {} from {}", id, peer);
            serve_connection(reader, writer, actor.as_ref(), &info);
            lock(&conns).remove(&id);
            info!(target: "net", "connection {} from {} closed", id, peer);
        });
    if let Err(e) = spawned {
        lock(connections).remove(&id);
        return Err(e);
    }
    Ok(())
}

fn serve_connection(
    mut reader: BufReader<TcpStream>,
    mut writer: BufWriter<TcpStream>,
    actor: &dyn RemoteActor,
    info: &ServiceInfo,
) {
    loop {
        let request: ActorRequest = match read_message(&mut reader) {
            Ok(request) => request,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                warn!(target: "net", "read error: {}", e);
                return;
            }
        };
        debug!(target: "net", "request {:?}", request);

        let response = match request {
            ActorRequest::Goodbye => return,
            ActorRequest::Ping => respond(actor.ping(), ActorResponse::Pong),
            ActorRequest::Describe => ActorResponse::Info(info.clone()),
            ActorRequest::Initialize => respond(actor.initialize(), ActorResponse::Done),
            ActorRequest::Fire => respond(actor.fire(), ActorResponse::Done),
            ActorRequest::Iterate { count } => respond(actor.iterate(count), ActorResponse::Done),
        };

        if let Err(e) = write_message(&mut writer, &response) {
            warn!(target: "net", "write error: {}", e);
            return;
        }
    }
}

fn respond(result: ActorResult, ok: ActorResponse) -> ActorResponse {
    match result {
        Ok(()) => ok,
        Err(ActorError::Remote(message)) => ActorResponse::Failed { message },
        Err(e) => ActorResponse::Failed {
            message: e.to_string(),
        },
    }
}
