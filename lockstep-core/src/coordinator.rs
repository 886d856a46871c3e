//! Coordinator: spawns one worker per live service and drives rounds.
//!
//! The coordinator is the only writer of the round barrier. It issues a
//! batch, waits for the round to drain, and builds a `RoundSummary` from
//! the workers' side-channel reports. A new round is refused while the
//! previous one still has outstanding workers.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use lockstep_types::{Command, CommandBatch, ServiceId, WorkerKey};

use crate::actor::{ActorError, ServiceHandle};
use crate::barrier::{BarrierError, RoundBarrier};
use crate::config::DispatchSettings;
use crate::discovery::{Discovery, DiscoveryError, ServiceRegistry};
use crate::worker::{Worker, WorkerReport};

#[derive(Debug)]
pub enum CoordinatorError {
    Discovery(DiscoveryError),
    Barrier(BarrierError),
    /// A worker thread could not be spawned.
    Spawn(io::Error),
    /// More model actors than live services.
    NotEnoughServices { actors: usize, services: usize },
    /// A schedule referenced an actor that was never mapped.
    UnknownActor(String),
    UnknownWorker(WorkerKey),
    /// The worker already processed `Exit`.
    WorkerStopped(WorkerKey),
    ShutDown,
}

impl From<DiscoveryError> for CoordinatorError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

impl From<BarrierError> for CoordinatorError {
    fn from(e: BarrierError) -> Self {
        Self::Barrier(e)
    }
}

impl From<io::Error> for CoordinatorError {
    fn from(e: io::Error) -> Self {
        Self::Spawn(e)
    }
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(e) => write!(f, "discovery: {}", e),
            Self::Barrier(e) => write!(f, "barrier: {}", e),
            Self::Spawn(e) => write!(f, "failed to spawn worker: {}", e),
            Self::NotEnoughServices { actors, services } => write!(
                f,
                "not enough services: {} actor(s) but {} service(s)",
                actors, services
            ),
            Self::UnknownActor(name) => write!(f, "actor '{}' is not mapped to a worker", name),
            Self::UnknownWorker(key) => write!(f, "no such worker: {}", key),
            Self::WorkerStopped(key) => write!(f, "{} has already stopped", key),
            Self::ShutDown => write!(f, "coordinator is shut down"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

/// A failed remote call within a round.
#[derive(Debug, Clone)]
pub struct RoundFailure {
    pub key: WorkerKey,
    pub service: ServiceId,
    pub command: Command,
    pub error: ActorError,
}

/// What the coordinator learned about a finished round.
#[derive(Debug, Clone, Default)]
pub struct RoundSummary {
    /// 1-based round number; 0 when no round was in flight.
    pub round: u64,
    pub assigned: usize,
    pub succeeded: usize,
    pub failures: Vec<RoundFailure>,
    /// Slowest remote call of the round.
    pub slowest: Duration,
}

impl RoundSummary {
    /// True if every assigned call succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {}: {}/{} ok, {} failed, slowest {:?}",
            self.round,
            self.succeeded,
            self.assigned,
            self.failures.len(),
            self.slowest
        )
    }
}

struct InFlight {
    round: u64,
    keys: HashSet<WorkerKey>,
    /// Workers told to exit. They stop without reporting.
    exits: usize,
}

pub struct Coordinator {
    barrier: Arc<RoundBarrier>,
    workers: Vec<Worker>,
    reports_rx: Receiver<WorkerReport>,
    round: u64,
    in_flight: Option<InFlight>,
    actor_map: BTreeMap<String, WorkerKey>,
    shut_down: bool,
}

impl Coordinator {
    /// Spawn one worker per handle, keyed by position.
    pub fn with_handles(
        handles: Vec<ServiceHandle>,
        settings: &DispatchSettings,
    ) -> Result<Self, CoordinatorError> {
        let barrier = Arc::new(RoundBarrier::new());
        let (reports_tx, reports_rx): (Sender<WorkerReport>, _) = crossbeam_channel::unbounded();

        let mut coordinator = Self {
            barrier: barrier.clone(),
            workers: Vec::with_capacity(handles.len()),
            reports_rx,
            round: 0,
            in_flight: None,
            actor_map: BTreeMap::new(),
            shut_down: false,
        };

        for (i, handle) in handles.into_iter().enumerate() {
            let key = WorkerKey::new(i as u32);
            // On failure the coordinator drops here and exits the workers already started.
            let worker = Worker::spawn(
                key,
                handle,
                barrier.clone(),
                reports_tx.clone(),
                settings.call_timeout,
            )?;
            coordinator.workers.push(worker);
        }

        if coordinator.workers.is_empty() {
            warn!(target: "coordinator", "started with no workers");
        } else {
            info!(target: "coordinator", "started {} worker(s)", coordinator.workers.len());
        }
        Ok(coordinator)
    }

    /// Block on discovery until `required` live services exist, then spawn workers.
    pub fn start<R: ServiceRegistry>(
        discovery: &Discovery<R>,
        required: usize,
        settings: &DispatchSettings,
    ) -> Result<Self, CoordinatorError> {
        let handles = discovery.find_alive_services(required)?;
        Self::with_handles(handles, settings)
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn keys(&self) -> Vec<WorkerKey> {
        self.workers.iter().map(Worker::key).collect()
    }

    /// Number of rounds issued so far.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn worker(&self, key: WorkerKey) -> Option<&Worker> {
        self.workers.iter().find(|w| w.key() == key)
    }

    /// Issue `command` to every running worker.
    pub fn start_round(&mut self, command: Command) -> Result<(), CoordinatorError> {
        let keys: Vec<WorkerKey> = self
            .workers
            .iter()
            .filter(|w| !w.is_stopped())
            .map(Worker::key)
            .collect();
        self.start_batch(CommandBatch::uniform(keys, command))
    }

    /// Issue an explicit batch. An empty batch is skipped.
    pub fn start_batch(&mut self, batch: CommandBatch) -> Result<(), CoordinatorError> {
        if self.shut_down {
            return Err(CoordinatorError::ShutDown);
        }
        for key in batch.keys() {
            match self.worker(key) {
                None => return Err(CoordinatorError::UnknownWorker(key)),
                Some(w) if w.is_stopped() => return Err(CoordinatorError::WorkerStopped(key)),
                Some(_) => {}
            }
        }

        if self.in_flight.is_some() {
            let outstanding = self.barrier.outstanding();
            if !outstanding.is_empty() {
                return Err(BarrierError::RoundInProgress { outstanding }.into());
            }
            let skipped = self.collect_summary();
            debug!(target: "coordinator", "collected un-awaited {}", skipped);
        }

        if batch.is_empty() {
            debug!(target: "coordinator", "skipping empty round");
            return Ok(());
        }

        let keys: HashSet<WorkerKey> = batch.keys().collect();
        let exits = batch.iter().filter(|(_, c)| c.is_exit()).count();
        self.barrier.issue_batch(batch)?;
        self.round += 1;
        debug!(target: "coordinator", "round {} issued to {} worker(s)", self.round, keys.len());
        self.in_flight = Some(InFlight {
            round: self.round,
            keys,
            exits,
        });
        Ok(())
    }

    /// Block until the in-flight round drains. Returns an empty summary if none is in flight.
    pub fn wait_for_round(&mut self) -> RoundSummary {
        if self.in_flight.is_none() {
            return RoundSummary::default();
        }
        self.barrier.await_round_complete();
        let summary = self.collect_summary();
        if summary.is_clean() {
            debug!(target: "coordinator", "{}", summary);
        } else {
            warn!(target: "coordinator", "{}", summary);
        }
        summary
    }

    fn collect_summary(&mut self) -> RoundSummary {
        let Some(in_flight) = self.in_flight.take() else {
            return RoundSummary::default();
        };

        let mut summary = RoundSummary {
            round: in_flight.round,
            assigned: in_flight.keys.len(),
            succeeded: in_flight.exits,
            ..RoundSummary::default()
        };

        for report in self.reports_rx.try_iter() {
            if !in_flight.keys.contains(&report.key) {
                debug!(target: "coordinator", "stale report from {}", report.key);
                continue;
            }
            summary.slowest = summary.slowest.max(report.elapsed);
            match report.outcome {
                Ok(()) => summary.succeeded += 1,
                Err(error) => summary.failures.push(RoundFailure {
                    key: report.key,
                    service: report.service,
                    command: report.command,
                    error,
                }),
            }
        }
        summary
    }

    /// Start a round and wait for it.
    pub fn run_round(&mut self, command: Command) -> Result<RoundSummary, CoordinatorError> {
        self.start_round(command)?;
        Ok(self.wait_for_round())
    }

    pub fn run_batch(&mut self, batch: CommandBatch) -> Result<RoundSummary, CoordinatorError> {
        self.start_batch(batch)?;
        Ok(self.wait_for_round())
    }

    /// One round of `Iterate` with a count per worker.
    pub fn iterate_round<I>(&mut self, counts: I) -> Result<RoundSummary, CoordinatorError>
    where
        I: IntoIterator<Item = (WorkerKey, u32)>,
    {
        self.run_batch(CommandBatch::iterate(counts))
    }

    /// Assign each model actor to one worker, in discovery order.
    pub fn map_actors<I, S>(&mut self, actors: I) -> Result<(), CoordinatorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let actors: Vec<String> = actors.into_iter().map(Into::into).collect();
        if actors.len() > self.workers.len() {
            return Err(CoordinatorError::NotEnoughServices {
                actors: actors.len(),
                services: self.workers.len(),
            });
        }

        self.actor_map.clear();
        for (actor, worker) in actors.into_iter().zip(&self.workers) {
            info!(target: "coordinator", "{}\t<--- {}", worker.service(), actor);
            self.actor_map.insert(actor, worker.key());
        }
        Ok(())
    }

    /// Worker mapped to a model actor.
    pub fn worker_for(&self, actor: &str) -> Option<WorkerKey> {
        self.actor_map.get(actor).copied()
    }

    pub(crate) fn resolve(&self, actor: &str) -> Result<WorkerKey, CoordinatorError> {
        self.worker_for(actor)
            .ok_or_else(|| CoordinatorError::UnknownActor(actor.to_string()))
    }

    /// Exit every running worker and join the threads. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if self.in_flight.is_some() {
            self.wait_for_round();
        }

        let running: Vec<WorkerKey> = self
            .workers
            .iter()
            .filter(|w| !w.is_stopped())
            .map(Worker::key)
            .collect();
        if !running.is_empty() {
            match self.barrier.issue_batch(CommandBatch::uniform(running, Command::Exit)) {
                Ok(()) => self.barrier.await_round_complete(),
                Err(e) => warn!(target: "coordinator", "could not issue exit round: {}", e),
            }
        }

        for worker in &mut self.workers {
            worker.join();
        }
        self.shut_down = true;
        info!(target: "coordinator", "shut down after {} round(s)", self.round);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
