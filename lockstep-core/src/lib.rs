//! # lockstep-core
//!
//! Round-synchronized command dispatch to a fleet of remote actor services.
//! Independent of any transport: remote services are reached through the
//! [`RemoteActor`] capability, which `lockstep-net` implements over TCP.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lockstep_core::{Config, Coordinator, Discovery, StaticRegistry};
//! use lockstep_types::Command;
//!
//! let config = Config::load();
//! let discovery = Discovery::from_settings(StaticRegistry::new(handles), &config.discovery());
//! let mut coordinator = Coordinator::start(&discovery, 3, &config.dispatch())?;
//!
//! coordinator.run_round(Command::Initialize)?;
//! let summary = coordinator.run_round(Command::Fire)?;
//! println!("{}", summary);
//! coordinator.shutdown();
//! ```
//!
//! ## Module Overview
//!
//! - [`actor`]: `RemoteActor` trait, `ServiceHandle`, `ActorError`, and the
//!   in-process `RecordingActor`
//! - [`discovery`]: `ServiceRegistry` snapshots filtered by a liveness probe
//!   until a quorum of services is alive
//! - [`barrier`]: `RoundBarrier`: per-round command hand-off and completion tracking
//! - [`worker`]: one thread per service, driven by the barrier
//! - [`coordinator`]: `Coordinator`: spawns workers, issues rounds, collects `RoundSummary`
//! - [`schedule`]: level-parallel and pipelined execution of a `Schedule`
//! - [`config`]: TOML configuration (embedded defaults + user override)

pub mod actor;
pub mod barrier;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod schedule;
pub mod worker;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use actor::{ActorCall, ActorError, ActorResult, CallKind, RecordingActor, RemoteActor, ServiceHandle};
pub use barrier::{BarrierError, RoundBarrier};
pub use config::{Config, ConfigError, DiscoverySettings, DispatchSettings, NetSettings};
pub use coordinator::{Coordinator, CoordinatorError, RoundFailure, RoundSummary};
pub use discovery::{Discovery, DiscoveryError, ServiceRegistry, StaticRegistry};
pub use schedule::Pipeline;
pub use worker::{Worker, WorkerReport, WorkerState};

/// Lock a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
