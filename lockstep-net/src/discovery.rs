//! mDNS/Bonjour discovery for actor services on the LAN.
//!
//! Services advertise themselves with `DiscoveryServer`; coordinators browse
//! with `DiscoveryClient` or plug `MdnsRegistry` straight into
//! `lockstep_core::Discovery`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo as MdnsServiceInfo};

use lockstep_core::{NetSettings, RemoteActor, ServiceHandle, ServiceRegistry};

use crate::client::TcpActor;
use crate::protocol::PROTOCOL_VERSION;

/// Service type for lockstep mDNS discovery.
pub const SERVICE_TYPE: &str = "_lockstep._tcp.local.";

/// A discovered actor service on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// mDNS instance name, unique per service.
    pub instance: String,
    pub host: String,
    pub port: u16,
    /// Name the service was started with.
    pub name: String,
    /// Full address string for connection.
    pub address: String,
}

/// Service-side mDNS advertisement. Unregistered on drop.
pub struct DiscoveryServer {
    daemon: ServiceDaemon,
    service_fullname: String,
}

impl DiscoveryServer {
    /// Create and register a new advertisement.
    pub fn new(name: &str, port: u16) -> Result<Self, String> {
        let daemon =
            ServiceDaemon::new().map_err(|e| format!("Failed to create mDNS daemon: {}", e))?;

        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let instance_name = format!("{}-{}", hostname, port);

        let mut properties = HashMap::new();
        properties.insert("v".to_string(), PROTOCOL_VERSION.to_string());
        properties.insert("name".to_string(), name.to_string());
        properties.insert("host".to_string(), hostname.clone());

        let service = MdnsServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &format!("{}.local.", hostname),
            (),
            port,
            properties,
        )
        .map_err(|e| format!("Failed to create service info: {}", e))?;

        let fullname = service.get_fullname().to_string();

        daemon
            .register(service)
            .map_err(|e| format!("Failed to register service: {}", e))?;

        info!(target: "discovery", "mDNS advertised '{}' on port {} ({})", name, port, fullname);

        Ok(Self {
            daemon,
            service_fullname: fullname,
        })
    }
}

impl Drop for DiscoveryServer {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.unregister(&self.service_fullname) {
            warn!(target: "discovery", "Failed to unregister mDNS service: {}", e);
        }
        info!(target: "discovery", "mDNS advertisement withdrawn");
    }
}

/// Client-side mDNS browser.
pub struct DiscoveryClient {
    receiver: flume::Receiver<DiscoveredService>,
    stop_tx: flume::Sender<()>,
    _handle: thread::JoinHandle<()>,
}

impl DiscoveryClient {
    /// Start browsing for actor services.
    pub fn new() -> Result<Self, String> {
        let (tx, rx) = flume::unbounded();
        let (stop_tx, stop_rx) = flume::bounded(1);

        let handle = thread::Builder::new()
            .name("lockstep-mdns".into())
            .spawn(move || {
                if let Err(e) = browse_services(tx, stop_rx) {
                    error!(target: "discovery", "mDNS browser error: {}", e);
                }
            })
            .map_err(|e| format!("Failed to start mDNS browser: {}", e))?;

        Ok(Self {
            receiver: rx,
            stop_tx,
            _handle: handle,
        })
    }

    /// Services resolved since the last poll.
    pub fn poll(&self) -> Vec<DiscoveredService> {
        self.receiver.try_iter().collect()
    }

    /// Browse for a specific duration and return all discovered services.
    pub fn browse_for(duration: Duration) -> Result<Vec<DiscoveredService>, String> {
        let client = Self::new()?;
        thread::sleep(duration);
        Ok(client.poll())
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
    }
}

fn browse_services(
    tx: flume::Sender<DiscoveredService>,
    stop_rx: flume::Receiver<()>,
) -> Result<(), String> {
    let daemon =
        ServiceDaemon::new().map_err(|e| format!("Failed to create mDNS daemon: {}", e))?;

    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| format!("Failed to browse: {}", e))?;

    info!(target: "discovery", "mDNS browser started for {}", SERVICE_TYPE);

    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                if let Some(service) = service_to_discovered(&info) {
                    info!(
                        target: "discovery",
                        "Discovered service '{}' at {}",
                        service.name,
                        service.address
                    );
                    if tx.send(service).is_err() {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = daemon.shutdown();
    info!(target: "discovery", "mDNS browser stopped");
    Ok(())
}

fn service_to_discovered(info: &MdnsServiceInfo) -> Option<DiscoveredService> {
    let properties = info.get_properties();

    let version = properties.get_property_val_str("v")?;
    if version != PROTOCOL_VERSION.to_string() {
        warn!(
            target: "discovery",
            "Ignoring service with incompatible protocol version: {} (expected {})",
            version,
            PROTOCOL_VERSION
        );
        return None;
    }

    let name = properties
        .get_property_val_str("name")
        .unwrap_or("unnamed")
        .to_string();

    let host = properties
        .get_property_val_str("host")
        .unwrap_or_else(|| info.get_hostname())
        .to_string();

    let port = info.get_port();
    let ip = info.get_addresses().iter().next()?;

    Some(DiscoveredService {
        instance: info.get_fullname().to_string(),
        host,
        port,
        name,
        address: format!("{}:{}", ip, port),
    })
}

/// `ServiceRegistry` over everything browsed so far.
///
/// Services are never forgotten here; the liveness probe drops the ones
/// that went away.
pub struct MdnsRegistry {
    client: DiscoveryClient,
    settings: NetSettings,
    known: Mutex<BTreeMap<String, Arc<TcpActor>>>,
}

impl MdnsRegistry {
    pub fn new(settings: &NetSettings) -> Result<Self, String> {
        Ok(Self {
            client: DiscoveryClient::new()?,
            settings: settings.clone(),
            known: Mutex::new(BTreeMap::new()),
        })
    }
}

impl ServiceRegistry for MdnsRegistry {
    fn candidates(&self) -> Vec<ServiceHandle> {
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        for service in self.client.poll() {
            let changed = known
                .get(&service.instance)
                .map_or(true, |actor| actor.addr() != service.address);
            if changed {
                let actor = TcpActor::from_settings(service.address.clone(), &self.settings);
                known.insert(service.instance, Arc::new(actor));
            }
        }
        known
            .iter()
            .map(|(instance, actor)| {
                ServiceHandle::new(instance.as_str(), actor.clone() as Arc<dyn RemoteActor>)
            })
            .collect()
    }
}
