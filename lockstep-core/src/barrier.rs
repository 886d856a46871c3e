//! Round barrier: one coordinator and N workers moving through rounds.
//!
//! The coordinator issues a batch of per-worker commands, each worker takes
//! its own command exactly once and marks it complete, and the coordinator
//! waits until every key in the batch has completed. A single mutex guards
//! both the pending commands and the outstanding set; every state change
//! wakes all waiters so each re-checks its own condition.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, trace};

use lockstep_types::{Command, CommandBatch, WorkerKey};

/// Misuse of the barrier by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierError {
    /// A batch was issued while the previous round still had outstanding workers.
    RoundInProgress { outstanding: Vec<WorkerKey> },
}

impl fmt::Display for BarrierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundInProgress { outstanding } => write!(
                f,
                "cannot issue a new round while {} worker(s) are still outstanding",
                outstanding.len()
            ),
        }
    }
}

impl std::error::Error for BarrierError {}

#[derive(Default)]
struct RoundState {
    /// Commands issued but not yet taken.
    commands: HashMap<WorkerKey, Command>,
    /// Keys issued in the current round that have not completed.
    outstanding: HashSet<WorkerKey>,
}

/// Reusable multi-party barrier shared by the coordinator and its workers.
#[derive(Default)]
pub struct RoundBarrier {
    state: Mutex<RoundState>,
    changed: Condvar,
}

impl RoundBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RoundState> {
        // Waiters never leave the state half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a new round.
    ///
    /// Rejected while any key from the previous round is still outstanding.
    /// An empty batch is accepted and leaves the barrier untouched.
    pub fn issue_batch(&self, batch: CommandBatch) -> Result<(), BarrierError> {
        let mut state = self.lock();
        if !state.outstanding.is_empty() {
            let mut outstanding: Vec<WorkerKey> = state.outstanding.iter().copied().collect();
            outstanding.sort();
            return Err(BarrierError::RoundInProgress { outstanding });
        }
        if batch.is_empty() {
            return Ok(());
        }

        debug!(target: "barrier", "issuing round for {} worker(s)", batch.len());
        for (key, command) in batch {
            state.commands.insert(key, command);
            state.outstanding.insert(key);
        }
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// Block until a command for `key` is published, then consume it.
    pub fn take_command(&self, key: WorkerKey) -> Command {
        let mut state = self.lock();
        let command = loop {
            if let Some(command) = state.commands.remove(&key) {
                break command;
            }
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        };
        drop(state);
        self.changed.notify_all();
        trace!(target: "barrier", "{} took {}", key, command);
        command
    }

    /// Consume the command for `key` if one is pending, without blocking.
    pub fn try_take_command(&self, key: WorkerKey) -> Option<Command> {
        let command = self.lock().commands.remove(&key);
        if command.is_some() {
            self.changed.notify_all();
        }
        command
    }

    /// Record that `key` finished its command for the current round.
    ///
    /// Returns false if `key` was not outstanding.
    pub fn mark_complete(&self, key: WorkerKey) -> bool {
        let removed = self.lock().outstanding.remove(&key);
        self.changed.notify_all();
        if !removed {
            trace!(target: "barrier", "{} completed but was not outstanding", key);
        }
        removed
    }

    /// Block until every key of the current round has completed.
    pub fn await_round_complete(&self) {
        let state = self.lock();
        let _state = self
            .changed
            .wait_while(state, |s| !s.outstanding.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like `await_round_complete`, bounded by `timeout`. Returns true if the round completed.
    pub fn await_round_complete_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.outstanding.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.outstanding.is_empty()
    }

    /// Keys still outstanding in the current round, sorted.
    pub fn outstanding(&self) -> Vec<WorkerKey> {
        let mut keys: Vec<WorkerKey> = self.lock().outstanding.iter().copied().collect();
        keys.sort();
        keys
    }

    /// Number of issued commands not yet taken.
    pub fn pending_commands(&self) -> usize {
        self.lock().commands.len()
    }
}
