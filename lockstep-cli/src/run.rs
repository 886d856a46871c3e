//! `--run`: discover services and drive a fixed sequence of rounds.

use std::io;

use lockstep_core::{Config, Coordinator, Discovery, Pipeline, RoundSummary, ServiceRegistry};
use lockstep_net::TcpRegistry;
use lockstep_types::{Command, Firing, Schedule};

use crate::args::{RunOptions, Source, USAGE};

fn other<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

fn load_config(opts: &RunOptions) -> io::Result<Config> {
    match &opts.config {
        Some(path) => Config::load_from(path).map_err(other),
        None => Ok(Config::load()),
    }
}

pub fn run_coordinator(opts: &RunOptions) -> io::Result<()> {
    let config = load_config(opts)?;
    let net = config.net();

    match &opts.source {
        Source::Connect(addrs) => {
            let registry = TcpRegistry::new(addrs.iter().cloned(), &net);
            let fallback = registry.len();
            drive(registry, fallback, opts, &config)
        }
        #[cfg(feature = "mdns")]
        Source::Discover => {
            let registry = lockstep_net::MdnsRegistry::new(&net).map_err(other)?;
            drive(registry, 1, opts, &config)
        }
        #[cfg(not(feature = "mdns"))]
        Source::Discover => {
            eprintln!("--discover requires the 'mdns' feature. Build with: cargo build --features mdns");
            std::process::exit(1);
        }
    }
}

fn report(summary: &RoundSummary, failed: &mut bool) {
    println!("{}", summary);
    for failure in &summary.failures {
        println!(
            "  {} ({}) {}: {}",
            failure.key, failure.service, failure.command, failure.error
        );
    }
    *failed |= !summary.is_clean();
}

fn drive<R: ServiceRegistry>(
    registry: R,
    fallback_required: usize,
    opts: &RunOptions,
    config: &Config,
) -> io::Result<()> {
    let discovery_settings = config.discovery();
    let dispatch = config.dispatch();

    let required = match opts.required {
        Some(n) => n,
        None if discovery_settings.required_services > 0 => discovery_settings.required_services,
        None => fallback_required,
    };
    // 0 on the command line means unbounded, like the config value.
    let iterations = match opts.iterations {
        Some(0) => None,
        Some(n) => Some(n),
        None => dispatch.iterations,
    };
    if iterations.is_none() && !dispatch.pipelining {
        eprintln!("lockstep: unbounded iterations need [dispatch] pipelining = true\n\n{}", USAGE);
        std::process::exit(2);
    }

    let discovery = Discovery::from_settings(registry, &discovery_settings);
    log::info!("waiting for {} service(s)", required);
    let mut coordinator = Coordinator::start(&discovery, required, &dispatch).map_err(other)?;
    for worker in coordinator.workers() {
        println!("{} -> {}", worker.key(), worker.service());
    }

    let mut failed = false;
    report(&coordinator.run_round(Command::Initialize).map_err(other)?, &mut failed);

    if dispatch.pipelining {
        // Each service stands in for one actor of a linear pipeline.
        let names: Vec<String> = coordinator
            .workers()
            .iter()
            .map(|w| w.service().to_string())
            .collect();
        coordinator.map_actors(names.iter().cloned()).map_err(other)?;
        let schedule = Schedule::sequential(names.into_iter().map(|n| Firing::new(n, 1)).collect());
        match iterations {
            Some(n) => {
                for summary in coordinator.run_pipelined(&schedule, n).map_err(other)? {
                    report(&summary, &mut failed);
                }
            }
            None => {
                log::info!("pipelining {} level(s) until interrupted", schedule.len());
                for round in Pipeline::new(&schedule, None) {
                    report(&coordinator.pipelined_step(&round).map_err(other)?, &mut failed);
                }
            }
        }
    } else {
        for _ in 0..opts.rounds {
            report(&coordinator.run_round(Command::Fire).map_err(other)?, &mut failed);
        }
        let count = iterations.unwrap_or(1);
        let counts: Vec<_> = coordinator.keys().into_iter().map(|k| (k, count)).collect();
        report(&coordinator.iterate_round(counts).map_err(other)?, &mut failed);
    }

    report(&coordinator.run_round(Command::Exit).map_err(other)?, &mut failed);
    coordinator.shutdown();

    if failed {
        eprintln!("some calls failed");
        std::process::exit(1);
    }
    Ok(())
}
