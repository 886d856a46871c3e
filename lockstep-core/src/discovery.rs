//! Liveness-filtered service discovery.
//!
//! A `ServiceRegistry` yields candidate handles (a snapshot that may change
//! between calls). `Discovery` probes each candidate, drops the ones whose
//! probe fails, and blocks until a required quorum of live services is
//! found. Dropped candidates stay in the registry and may reappear.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use lockstep_types::ServiceId;

use crate::actor::ServiceHandle;
use crate::config::DiscoverySettings;
use crate::lock_unpoisoned;

/// Source of candidate service handles.
pub trait ServiceRegistry: Send + Sync {
    /// Current candidates, before liveness filtering.
    fn candidates(&self) -> Vec<ServiceHandle>;
}

impl<R: ServiceRegistry + ?Sized> ServiceRegistry for Arc<R> {
    fn candidates(&self) -> Vec<ServiceHandle> {
        (**self).candidates()
    }
}

/// A registry backed by an explicit, mutable list of handles.
#[derive(Default)]
pub struct StaticRegistry {
    handles: Mutex<Vec<ServiceHandle>>,
}

impl StaticRegistry {
    pub fn new(handles: Vec<ServiceHandle>) -> Self {
        Self {
            handles: Mutex::new(handles),
        }
    }

    pub fn add(&self, handle: ServiceHandle) {
        lock_unpoisoned(&self.handles).push(handle);
    }

    /// Remove every handle with `id`. Returns how many were removed.
    pub fn remove(&self, id: &ServiceId) -> usize {
        let mut handles = lock_unpoisoned(&self.handles);
        let before = handles.len();
        handles.retain(|h| h.id() != id);
        before - handles.len()
    }
}

impl ServiceRegistry for StaticRegistry {
    fn candidates(&self) -> Vec<ServiceHandle> {
        lock_unpoisoned(&self.handles).clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The quorum was not reached before the configured timeout.
    QuorumTimeout { required: usize, found: usize },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuorumTimeout { required, found } => write!(
                f,
                "timed out waiting for {} live service(s), found {}",
                required, found
            ),
        }
    }
}

impl std::error::Error for DiscoveryError {}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Blocking quorum discovery over a registry.
pub struct Discovery<R> {
    registry: R,
    poll_interval: Duration,
    quorum_timeout: Option<Duration>,
}

impl<R: ServiceRegistry> Discovery<R> {
    /// Wait-forever discovery with the default poll interval.
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            poll_interval: DEFAULT_POLL_INTERVAL,
            quorum_timeout: None,
        }
    }

    pub fn from_settings(registry: R, settings: &DiscoverySettings) -> Self {
        Self {
            registry,
            poll_interval: settings.poll_interval,
            quorum_timeout: settings.quorum_timeout,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `None` waits indefinitely.
    pub fn with_quorum_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.quorum_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// One query: candidates whose probe succeeds, sorted and deduplicated by id.
    pub fn alive_services(&self) -> Vec<ServiceHandle> {
        let candidates = self.registry.candidates();
        let seen = candidates.len();
        let mut alive: BTreeMap<ServiceId, ServiceHandle> = BTreeMap::new();

        for handle in candidates {
            if alive.contains_key(handle.id()) {
                continue;
            }
            match handle.probe() {
                Ok(()) => {
                    alive.insert(handle.id().clone(), handle);
                }
                Err(e) => {
                    warn!(target: "discovery", "dropping {}: probe failed: {}", handle.id(), e);
                }
            }
        }

        debug!(
            target: "discovery",
            "{} candidate(s), {} alive",
            seen,
            alive.len()
        );
        alive.into_values().collect()
    }

    /// Block until at least `required` live services are found.
    ///
    /// Retries every poll interval. Without a quorum timeout this never
    /// returns an error.
    pub fn find_alive_services(&self, required: usize) -> Result<Vec<ServiceHandle>, DiscoveryError> {
        let started = Instant::now();
        loop {
            let alive = self.alive_services();
            if alive.len() >= required {
                info!(
                    target: "discovery",
                    "found {} live service(s) (required {})",
                    alive.len(),
                    required
                );
                return Ok(alive);
            }

            let mut wait = self.poll_interval;
            if let Some(timeout) = self.quorum_timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Err(DiscoveryError::QuorumTimeout {
                        required,
                        found: alive.len(),
                    });
                }
                wait = wait.min(timeout - elapsed);
            }

            debug!(
                target: "discovery",
                "have {} of {} live service(s), retrying in {:?}",
                alive.len(),
                required,
                wait
            );
            thread::sleep(wait);
        }
    }
}
