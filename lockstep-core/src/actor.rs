//! Remote actor capability: the operations a worker drives on its service.
//!
//! `RemoteActor` captures what the dispatcher *means* to do (initialize,
//! fire, iterate, probe) independently of how the call reaches the node.
//! `RecordingActor` implements it in-process for tests and for hosting.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use lockstep_types::ServiceId;

use crate::lock_unpoisoned;

/// Result type for remote actor operations.
pub type ActorResult<T = ()> = Result<T, ActorError>;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorError {
    /// The node could not be reached or the connection broke.
    Communication(String),
    /// The node was reached but reported a failure.
    Remote(String),
    /// The call did not finish within the configured bound.
    Timeout(Duration),
}

impl fmt::Display for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Communication(msg) => write!(f, "communication failure: {}", msg),
            Self::Remote(msg) => write!(f, "remote failure: {}", msg),
            Self::Timeout(d) => write!(f, "call timed out after {} ms", d.as_millis()),
        }
    }
}

impl std::error::Error for ActorError {}

impl From<std::io::Error> for ActorError {
    fn from(e: std::io::Error) -> Self {
        Self::Communication(e.to_string())
    }
}

/// The distributed actor capability exposed by every worker service.
pub trait RemoteActor: Send + Sync {
    fn initialize(&self) -> ActorResult;

    fn fire(&self) -> ActorResult;

    /// Run `count` prefire/fire/postfire cycles.
    fn iterate(&self, count: u32) -> ActorResult;

    /// Lightweight liveness probe. Returns normally iff the node is reachable.
    fn ping(&self) -> ActorResult;
}

/// A discovered remote actor plus its identity.
///
/// Handles are produced by a registry; the dispatcher only reads and
/// filters them.
#[derive(Clone)]
pub struct ServiceHandle {
    id: ServiceId,
    actor: Arc<dyn RemoteActor>,
}

impl ServiceHandle {
    pub fn new(id: impl Into<ServiceId>, actor: Arc<dyn RemoteActor>) -> Self {
        Self {
            id: id.into(),
            actor,
        }
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    pub fn actor(&self) -> &Arc<dyn RemoteActor> {
        &self.actor
    }

    /// Liveness probe.
    pub fn probe(&self) -> ActorResult {
        self.actor.ping()
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle").field("id", &self.id).finish()
    }
}

/// Kind of actor operation, used to configure injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Initialize,
    Fire,
    Iterate,
}

impl CallKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "initialize" | "init" => Some(Self::Initialize),
            "fire" => Some(Self::Fire),
            "iterate" => Some(Self::Iterate),
            _ => None,
        }
    }
}

/// A call recorded by `RecordingActor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorCall {
    Initialize,
    Fire,
    Iterate(u32),
}

impl ActorCall {
    pub fn kind(self) -> CallKind {
        match self {
            Self::Initialize => CallKind::Initialize,
            Self::Fire => CallKind::Fire,
            Self::Iterate(_) => CallKind::Iterate,
        }
    }
}

/// In-process actor that records every call it receives.
///
/// Failures can be injected per call kind, the probe can be made to fail
/// (a dead node), and every call can be slowed by a fixed latency.
/// Interior mutability keeps it `Send + Sync` for `Arc` sharing.
pub struct RecordingActor {
    name: String,
    calls: Mutex<Vec<ActorCall>>,
    failures: Mutex<usize>,
    failing: Mutex<HashSet<CallKind>>,
    latency: Mutex<Duration>,
    alive: AtomicBool,
}

impl RecordingActor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(0),
            failing: Mutex::new(HashSet::new()),
            latency: Mutex::new(Duration::ZERO),
            alive: AtomicBool::new(true),
        }
    }

    /// Make every call of `kind` fail with a remote error.
    pub fn failing_on(self, kind: CallKind) -> Self {
        self.fail_on(kind);
        self
    }

    /// Sleep `latency` inside every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn fail_on(&self, kind: CallKind) {
        lock_unpoisoned(&self.failing).insert(kind);
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock_unpoisoned(&self.latency) = latency;
    }

    /// Toggle the liveness probe.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All calls received, including the ones that failed.
    pub fn calls(&self) -> Vec<ActorCall> {
        lock_unpoisoned(&self.calls).clone()
    }

    /// Count calls matching a predicate.
    pub fn count<F: Fn(&ActorCall) -> bool>(&self, f: F) -> usize {
        lock_unpoisoned(&self.calls).iter().filter(|c| f(c)).count()
    }

    /// Number of calls that returned an error.
    pub fn failures(&self) -> usize {
        *lock_unpoisoned(&self.failures)
    }

    fn record(&self, call: ActorCall) -> ActorResult {
        let latency = *lock_unpoisoned(&self.latency);
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        lock_unpoisoned(&self.calls).push(call);

        if !self.alive.load(Ordering::SeqCst) {
            *lock_unpoisoned(&self.failures) += 1;
            return Err(ActorError::Communication(format!("{} is unreachable", self.name)));
        }
        if lock_unpoisoned(&self.failing).contains(&call.kind()) {
            *lock_unpoisoned(&self.failures) += 1;
            return Err(ActorError::Remote(format!(
                "{} rejected {:?}",
                self.name, call
            )));
        }
        log::debug!(target: "actor", "{} handled {:?}", self.name, call);
        Ok(())
    }
}

impl RemoteActor for RecordingActor {
    fn initialize(&self) -> ActorResult {
        self.record(ActorCall::Initialize)
    }

    fn fire(&self) -> ActorResult {
        self.record(ActorCall::Fire)
    }

    fn iterate(&self, count: u32) -> ActorResult {
        self.record(ActorCall::Iterate(count))
    }

    fn ping(&self) -> ActorResult {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ActorError::Communication(format!("{} is unreachable", self.name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let actor = RecordingActor::new("a");
        actor.initialize().unwrap();
        actor.fire().unwrap();
        actor.iterate(3).unwrap();
        assert_eq!(
            actor.calls(),
            vec![ActorCall::Initialize, ActorCall::Fire, ActorCall::Iterate(3)]
        );
        assert_eq!(actor.failures(), 0);
    }

    #[test]
    fn injected_failure_is_recorded_and_returned() {
        let actor = RecordingActor::new("b").failing_on(CallKind::Fire);
        assert!(actor.initialize().is_ok());
        assert!(matches!(actor.fire(), Err(ActorError::Remote(_))));
        assert_eq!(actor.count(|c| *c == ActorCall::Fire), 1);
        assert_eq!(actor.failures(), 1);
    }

    #[test]
    fn dead_actor_fails_probe() {
        let actor = Arc::new(RecordingActor::new("c"));
        let handle = ServiceHandle::new("c:1", actor.clone());
        assert!(handle.probe().is_ok());
        actor.set_alive(false);
        assert!(matches!(handle.probe(), Err(ActorError::Communication(_))));
        assert!(actor.fire().is_err());
    }

    #[test]
    fn call_kind_parse() {
        assert_eq!(CallKind::parse("FIRE"), Some(CallKind::Fire));
        assert_eq!(CallKind::parse("init"), Some(CallKind::Initialize));
        assert_eq!(CallKind::parse("bogus"), None);
    }
}
