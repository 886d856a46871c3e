//! # lockstep-types
//!
//! Shared type definitions for the lockstep round dispatcher.
//! This crate contains the plain data passed between lockstep-core,
//! lockstep-net and the `lockstep` binary.

pub mod command;
pub mod schedule;

pub use command::{Command, CommandBatch};
pub use schedule::{Firing, Schedule};

/// Stable identifier of a worker within the command and outstanding maps.
///
/// Assigned once by the coordinator when the worker is spawned and never
/// reused while the worker is alive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct WorkerKey(u32);

impl WorkerKey {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Identifier of a discovered remote actor service (e.g. `host:port` or an
/// mDNS instance name).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
