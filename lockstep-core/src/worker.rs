//! Worker threads: one per remote service, driven through the round barrier.
//!
//! Each worker loops: take its command, invoke the remote operation, report
//! the outcome on the side channel, mark itself complete. Remote failures
//! are logged and reported but never abort the loop, and completion is
//! marked by a drop guard so a round cannot stall on a failed or panicking
//! call. Only `Command::Exit` stops the loop.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, info, warn};

use lockstep_types::{Command, ServiceId, WorkerKey};

use crate::actor::{ActorError, ActorResult, RemoteActor, ServiceHandle};
use crate::barrier::RoundBarrier;

/// Lifecycle of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    WaitingForCommand,
    Executing,
    Reporting,
    Stopped,
}

impl WorkerState {
    fn to_u8(self) -> u8 {
        match self {
            Self::WaitingForCommand => 0,
            Self::Executing => 1,
            Self::Reporting => 2,
            Self::Stopped => 3,
        }
    }

    /// Legal moves of the state machine. `Stopped` is only entered from `Executing`.
    pub fn can_enter(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (WaitingForCommand, WaitingForCommand)
                | (WaitingForCommand, Executing)
                | (Executing, Reporting)
                | (Executing, Stopped)
                | (Reporting, WaitingForCommand)
        )
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::WaitingForCommand,
            1 => Self::Executing,
            2 => Self::Reporting,
            _ => Self::Stopped,
        }
    }
}

/// Outcome of one command, sent to the coordinator before completion is marked.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub key: WorkerKey,
    pub service: ServiceId,
    pub command: Command,
    pub outcome: ActorResult,
    pub elapsed: Duration,
}

/// Coordinator-side handle to a running worker thread.
pub struct Worker {
    key: WorkerKey,
    service: ServiceId,
    state: Arc<AtomicU8>,
    join_handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread for `handle`.
    ///
    /// `call_timeout` bounds each remote call; an expired call is treated
    /// like a failed one.
    pub fn spawn(
        key: WorkerKey,
        handle: ServiceHandle,
        barrier: Arc<RoundBarrier>,
        reports: Sender<WorkerReport>,
        call_timeout: Option<Duration>,
    ) -> io::Result<Self> {
        let state = Arc::new(AtomicU8::new(WorkerState::WaitingForCommand.to_u8()));
        let service = handle.id().clone();

        let worker_loop = WorkerLoop {
            key,
            handle,
            barrier,
            reports,
            state: state.clone(),
            call_timeout,
        };
        let join_handle = thread::Builder::new()
            .name(format!("lockstep-{}", key))
            .spawn(move || worker_loop.run())?;

        info!(target: "worker", "{} started for service {}", key, service);

        Ok(Self {
            key,
            service,
            state,
            join_handle: Some(join_handle),
        })
    }

    pub fn key(&self) -> WorkerKey {
        self.key
    }

    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == WorkerState::Stopped
    }

    /// Wait for the thread to finish. Returns false if it panicked.
    /// Calling it again after a join is a no-op.
    pub fn join(&mut self) -> bool {
        match self.join_handle.take() {
            Some(handle) => match handle.join() {
                Ok(()) => true,
                Err(_) => {
                    warn!(target: "worker", "{} thread panicked", self.key);
                    false
                }
            },
            None => true,
        }
    }
}

/// State owned by the worker thread.
struct WorkerLoop {
    key: WorkerKey,
    handle: ServiceHandle,
    barrier: Arc<RoundBarrier>,
    reports: Sender<WorkerReport>,
    state: Arc<AtomicU8>,
    call_timeout: Option<Duration>,
}

/// Marks the key complete when dropped, on every exit path.
struct CompletionGuard<'a> {
    barrier: &'a RoundBarrier,
    key: WorkerKey,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.barrier.mark_complete(self.key);
    }
}

impl WorkerLoop {
    fn set_state(&self, state: WorkerState) {
        let previous = WorkerState::from_u8(self.state.swap(state.to_u8(), Ordering::SeqCst));
        debug_assert!(
            previous.can_enter(state),
            "{} moved from {:?} to {:?}",
            self.key,
            previous,
            state
        );
    }

    fn run(self) {
        loop {
            self.set_state(WorkerState::WaitingForCommand);
            let command = self.barrier.take_command(self.key);

            self.set_state(WorkerState::Executing);
            if command.is_exit() {
                self.set_state(WorkerState::Stopped);
                self.barrier.mark_complete(self.key);
                info!(target: "worker", "{} stopped", self.key);
                break;
            }

            let _completion = CompletionGuard {
                barrier: &self.barrier,
                key: self.key,
            };

            let started = Instant::now();
            let outcome = self.execute(command);
            let elapsed = started.elapsed();

            self.set_state(WorkerState::Reporting);
            match &outcome {
                Ok(()) => debug!(
                    target: "worker",
                    "{} {} on {} ok in {:?}",
                    self.key,
                    command,
                    self.handle.id(),
                    elapsed
                ),
                Err(e) => warn!(
                    target: "worker",
                    "{} {} on {} failed: {}",
                    self.key,
                    command,
                    self.handle.id(),
                    e
                ),
            }

            let report = WorkerReport {
                key: self.key,
                service: self.handle.id().clone(),
                command,
                outcome,
                elapsed,
            };
            if self.reports.send(report).is_err() {
                debug!(target: "worker", "{} report dropped, coordinator gone", self.key);
            }
        }
    }

    /// Run the remote call, turning panics and expired timeouts into errors.
    fn execute(&self, command: Command) -> ActorResult {
        match self.call_timeout {
            None => panic::catch_unwind(AssertUnwindSafe(|| {
                invoke(self.handle.actor().as_ref(), command)
            }))
            .unwrap_or_else(|_| Err(ActorError::Remote(format!("{} call panicked", command)))),
            Some(limit) => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                let actor = self.handle.actor().clone();
                thread::Builder::new()
                    .name(format!("lockstep-{}-call", self.key))
                    .spawn(move || {
                        let _ = tx.send(invoke(actor.as_ref(), command));
                    })?;

                match rx.recv_timeout(limit) {
                    Ok(result) => result,
                    Err(RecvTimeoutError::Timeout) => Err(ActorError::Timeout(limit)),
                    Err(RecvTimeoutError::Disconnected) => {
                        Err(ActorError::Remote(format!("{} call panicked", command)))
                    }
                }
            }
        }
    }
}

impl Drop for WorkerLoop {
    fn drop(&mut self) {
        // Also reached by unwinding, so skip the transition check.
        self.state.store(WorkerState::Stopped.to_u8(), Ordering::SeqCst);
    }
}

fn invoke(actor: &dyn RemoteActor, command: Command) -> ActorResult {
    match command {
        Command::Initialize => actor.initialize(),
        Command::Fire => actor.fire(),
        Command::Iterate(count) => actor.iterate(count),
        Command::Exit => Ok(()),
    }
}
