//! Service registry over a fixed list of TCP addresses.

use std::sync::Arc;

use lockstep_core::{NetSettings, RemoteActor, ServiceHandle, ServiceRegistry};
use lockstep_types::ServiceId;

use crate::client::TcpActor;

/// Every address is a candidate; the liveness probe decides which are up.
///
/// One `TcpActor` is kept per address so the connection made by the probe
/// is reused by the worker.
pub struct TcpRegistry {
    services: Vec<(ServiceId, Arc<TcpActor>)>,
}

impl TcpRegistry {
    pub fn new<I, S>(addrs: I, settings: &NetSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let services = addrs
            .into_iter()
            .map(Into::into)
            .map(|addr: String| {
                let actor = Arc::new(TcpActor::from_settings(addr.clone(), settings));
                (ServiceId::new(addr), actor)
            })
            .collect();
        Self { services }
    }

    /// Parse a comma-separated address list, ignoring blanks.
    pub fn parse(list: &str, settings: &NetSettings) -> Self {
        Self::new(
            list.split(',').map(str::trim).filter(|s| !s.is_empty()),
            settings,
        )
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceRegistry for TcpRegistry {
    fn candidates(&self) -> Vec<ServiceHandle> {
        self.services
            .iter()
            .map(|(id, actor)| ServiceHandle::new(id.clone(), actor.clone() as Arc<dyn RemoteActor>))
            .collect()
    }
}
