//! `--serve`: host a `RecordingActor` until the process is killed.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lockstep_core::RecordingActor;
use lockstep_net::ActorServer;

use crate::args::ServeOptions;

pub fn run_service(opts: &ServeOptions) -> io::Result<()> {
    let name = match &opts.name {
        Some(name) => name.clone(),
        None => format!("lockstep-{}", opts.addr.rsplit(':').next().unwrap_or("0")),
    };

    let mut actor = RecordingActor::new(name.as_str()).with_latency(opts.latency);
    if let Some(kind) = opts.fail {
        actor = actor.failing_on(kind);
    }
    let actor = Arc::new(actor);

    let server = ActorServer::bind(&opts.addr, &name, actor.clone())?;
    println!("serving '{}' on {}", name, server.local_addr());

    #[cfg(feature = "mdns")]
    let _advertisement = if opts.advertise {
        match lockstep_net::DiscoveryServer::new(&name, server.local_addr().port()) {
            Ok(d) => Some(d),
            Err(e) => {
                log::warn!("Failed to register mDNS advertisement: {}", e);
                None
            }
        }
    } else {
        None
    };

    #[cfg(not(feature = "mdns"))]
    if opts.advertise {
        eprintln!("--advertise requires the 'mdns' feature. Build with: cargo build --features mdns");
        std::process::exit(1);
    }

    let mut last_connections = usize::MAX;
    let mut last_calls = 0usize;
    loop {
        let connections = server.connection_count();
        let calls = actor.calls().len();
        if connections != last_connections || calls != last_calls {
            log::info!(
                "'{}': {} connection(s), {} call(s), {} failed",
                name,
                connections,
                calls,
                actor.failures()
            );
            last_connections = connections;
            last_calls = calls;
        }
        thread::sleep(Duration::from_millis(500));
    }
}
