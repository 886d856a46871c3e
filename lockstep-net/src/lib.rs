//! TCP transport for lockstep actor services.
//!
//! `ActorServer` hosts a `RemoteActor` on a socket; `TcpActor` is the
//! coordinator-side `RemoteActor` that talks to it. `TcpRegistry` and, with
//! the `mdns` feature, `MdnsRegistry` feed discovered services to
//! `lockstep_core::Discovery`.

pub mod client;
pub mod framing;
pub mod protocol;
pub mod registry;
pub mod server;

#[cfg(feature = "mdns")]
pub mod discovery;

pub use client::TcpActor;
pub use protocol::{ActorRequest, ActorResponse, ServiceInfo, PROTOCOL_VERSION};
pub use registry::TcpRegistry;
pub use server::ActorServer;

#[cfg(feature = "mdns")]
pub use discovery::{DiscoveredService, DiscoveryClient, DiscoveryServer, MdnsRegistry, SERVICE_TYPE};
