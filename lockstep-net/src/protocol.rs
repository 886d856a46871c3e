//! Wire protocol between a coordinator's `TcpActor` and an `ActorServer`.
//!
//! Strict request/response: every request except `Goodbye` gets exactly one
//! response on the same connection.

use serde::{Deserialize, Serialize};

/// Bumped on incompatible wire changes; advertised over mDNS.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorRequest {
    /// Liveness probe.
    Ping,
    /// Ask the service to identify itself.
    Describe,
    Initialize,
    Fire,
    Iterate { count: u32 },
    /// Client is closing the connection. No response.
    Goodbye,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorResponse {
    Pong,
    Info(ServiceInfo),
    Done,
    Failed { message: String },
}

/// Identity of a hosted actor service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub protocol: u32,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: PROTOCOL_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterate_keeps_its_count_on_the_wire() {
        let json = serde_json::to_string(&ActorRequest::Iterate { count: 3 }).unwrap();
        assert_eq!(json, r#"{"Iterate":{"count":3}}"#);
    }

    #[test]
    fn service_info_carries_protocol_version() {
        let info = ServiceInfo::new("adder");
        assert_eq!(info.protocol, PROTOCOL_VERSION);
        let back: ServiceInfo = serde_json::from_str(&serde_json::to_string(&info).unwrap()).unwrap();
        assert_eq!(back, info);
    }
}
