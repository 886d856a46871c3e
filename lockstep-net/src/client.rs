//! `TcpActor`: the remote actor capability over one TCP connection.
//!
//! The connection is opened on first use. Any I/O failure drops it, and the
//! next call reconnects, so a restarted service is picked up transparently.

use std::io::{self, BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use lockstep_core::{ActorError, ActorResult, NetSettings, RemoteActor};

use crate::framing::{read_message, write_message};
use crate::protocol::{ActorRequest, ActorResponse, ServiceInfo};

struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn call(&mut self, request: &ActorRequest) -> io::Result<ActorResponse> {
        write_message(&mut self.writer, request)?;
        read_message(&mut self.reader)
    }
}

pub struct TcpActor {
    addr: String,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
    conn: Mutex<Option<Connection>>,
}

impl TcpActor {
    /// No connection is made until the first call.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: None,
            io_timeout: None,
            conn: Mutex::new(None),
        }
    }

    pub fn from_settings(addr: impl Into<String>, settings: &NetSettings) -> Self {
        Self::new(addr)
            .with_connect_timeout(settings.connect_timeout)
            .with_io_timeout(settings.io_timeout)
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Ask the service for its name and protocol version.
    pub fn describe(&self) -> Result<ServiceInfo, ActorError> {
        match self.request(&ActorRequest::Describe)? {
            ActorResponse::Info(info) => Ok(info),
            other => Err(unexpected(&other)),
        }
    }

    /// Send `Goodbye` and drop the connection, if one is open.
    pub fn disconnect(&self) {
        if let Some(mut conn) = self.lock().take() {
            let _ = write_message(&mut conn.writer, &ActorRequest::Goodbye);
            debug!(target: "net", "disconnected from {}", self.addr);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(&self) -> io::Result<Connection> {
        let stream = match self.connect_timeout {
            Some(timeout) => {
                let addr = resolve(&self.addr)?;
                TcpStream::connect_timeout(&addr, timeout)?
            }
            None => TcpStream::connect(self.addr.as_str())?,
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        info!(target: "net", "connected to {}", self.addr);
        Ok(Connection {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }

    fn request(&self, request: &ActorRequest) -> Result<ActorResponse, ActorError> {
        let mut guard = self.lock();
        if guard.is_none() {
            let conn = self.connect().map_err(|e| {
                ActorError::Communication(format!("connect to {}: {}", self.addr, e))
            })?;
            *guard = Some(conn);
        }

        let result = match guard.as_mut() {
            Some(conn) => conn.call(request),
            None => return Err(ActorError::Communication("not connected".into())),
        };
        result.map_err(|e| {
            // The stream may hold half a frame; start over on the next call.
            *guard = None;
            warn!(target: "net", "{} failed on {}: {}", describe_request(request), self.addr, e);
            match (e.kind(), self.io_timeout) {
                (io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut, Some(timeout)) => {
                    ActorError::Timeout(timeout)
                }
                _ => ActorError::Communication(format!("{}: {}", self.addr, e)),
            }
        })
    }

    fn call(&self, request: ActorRequest) -> ActorResult {
        match self.request(&request)? {
            ActorResponse::Done | ActorResponse::Pong => Ok(()),
            ActorResponse::Failed { message } => Err(ActorError::Remote(message)),
            other => Err(unexpected(&other)),
        }
    }
}

impl RemoteActor for TcpActor {
    fn initialize(&self) -> ActorResult {
        self.call(ActorRequest::Initialize)
    }

    fn fire(&self) -> ActorResult {
        self.call(ActorRequest::Fire)
    }

    fn iterate(&self, count: u32) -> ActorResult {
        self.call(ActorRequest::Iterate { count })
    }

    fn ping(&self) -> ActorResult {
        self.call(ActorRequest::Ping)
    }
}

impl Drop for TcpActor {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no address for {}", addr))
    })
}

fn unexpected(response: &ActorResponse) -> ActorError {
    ActorError::Communication(format!("unexpected response: {:?}", response))
}

fn describe_request(request: &ActorRequest) -> &'static str {
    match request {
        ActorRequest::Ping => "ping",
        ActorRequest::Describe => "describe",
        ActorRequest::Initialize => "initialize",
        ActorRequest::Fire => "fire",
        ActorRequest::Iterate { .. } => "iterate",
        ActorRequest::Goodbye => "goodbye",
    }
}
