mod args;
mod run;
mod serve;

use std::fs::File;
use std::path::Path;

use args::Mode;

fn init_logging(verbose: bool, log_file: Option<&Path>) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(log_level, Config::default(), file)),
            Err(e) => eprintln!("Cannot create log file {}: {}", path.display(), e),
        }
    }

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Logger already initialized");
    }

    log::info!("lockstep starting (log level: {:?})", log_level);
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", args::USAGE);
        return Ok(());
    }

    let options = match args::parse(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("lockstep: {}\n\n{}", e, args::USAGE);
            std::process::exit(2);
        }
    };
    init_logging(options.verbose, options.log_file.as_deref());

    match options.mode {
        Mode::Serve(opts) => serve::run_service(&opts),
        Mode::Run(opts) => run::run_coordinator(&opts),
    }
}
