#![allow(dead_code)]
//! Test harness utilities for lockstep-core integration tests.

use std::sync::Arc;

use lockstep_core::{Config, DispatchSettings, RecordingActor, RemoteActor, ServiceHandle};

/// In-process services named `svc-0`, `svc-1`, ...
pub fn fleet(count: usize) -> (Vec<ServiceHandle>, Vec<Arc<RecordingActor>>) {
    named_fleet(&(0..count).map(|i| format!("svc-{}", i)).collect::<Vec<_>>())
}

pub fn named_fleet<S: AsRef<str>>(names: &[S]) -> (Vec<ServiceHandle>, Vec<Arc<RecordingActor>>) {
    let actors: Vec<Arc<RecordingActor>> = names
        .iter()
        .map(|n| Arc::new(RecordingActor::new(n.as_ref())))
        .collect();
    let handles = actors.iter().map(handle).collect();
    (handles, actors)
}

pub fn handle(actor: &Arc<RecordingActor>) -> ServiceHandle {
    ServiceHandle::new(actor.name(), actor.clone() as Arc<dyn RemoteActor>)
}

pub fn dispatch_settings() -> DispatchSettings {
    Config::default().dispatch()
}
