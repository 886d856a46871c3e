//! Commands issued to workers and the per-round batch that carries them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::WorkerKey;

/// A command a worker executes against its remote actor.
///
/// `Iterate` carries its iteration count so the count travels with the
/// command through the barrier instead of living on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Stop the worker loop.
    Exit,
    Initialize,
    Fire,
    Iterate(u32),
}

impl Command {
    pub fn is_exit(self) -> bool {
        matches!(self, Command::Exit)
    }

    /// Short lowercase name, used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            Command::Exit => "exit",
            Command::Initialize => "initialize",
            Command::Fire => "fire",
            Command::Iterate(_) => "iterate",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Iterate(count) => write!(f, "iterate({})", count),
            other => f.write_str(other.name()),
        }
    }
}

/// One synchronization round: the command assigned to each participating worker.
///
/// Workers absent from the batch sit the round out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBatch {
    commands: BTreeMap<WorkerKey, Command>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the same command to every key.
    pub fn uniform<I>(keys: I, command: Command) -> Self
    where
        I: IntoIterator<Item = WorkerKey>,
    {
        keys.into_iter().map(|key| (key, command)).collect()
    }

    /// Assign `Iterate(count)` per worker.
    pub fn iterate<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (WorkerKey, u32)>,
    {
        counts
            .into_iter()
            .map(|(key, count)| (key, Command::Iterate(count)))
            .collect()
    }

    /// Insert or replace the command for `key`, returning the previous one.
    pub fn insert(&mut self, key: WorkerKey, command: Command) -> Option<Command> {
        self.commands.insert(key, command)
    }

    pub fn remove(&mut self, key: WorkerKey) -> Option<Command> {
        self.commands.remove(&key)
    }

    pub fn get(&self, key: WorkerKey) -> Option<Command> {
        self.commands.get(&key).copied()
    }

    pub fn contains(&self, key: WorkerKey) -> bool {
        self.commands.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = WorkerKey> + '_ {
        self.commands.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkerKey, Command)> + '_ {
        self.commands.iter().map(|(&k, &c)| (k, c))
    }
}

impl FromIterator<(WorkerKey, Command)> for CommandBatch {
    fn from_iter<T: IntoIterator<Item = (WorkerKey, Command)>>(iter: T) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CommandBatch {
    type Item = (WorkerKey, Command);
    type IntoIter = std::collections::btree_map::IntoIter<WorkerKey, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}
