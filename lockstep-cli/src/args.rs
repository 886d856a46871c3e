//! Command-line options, parsed by hand.

use std::path::PathBuf;
use std::time::Duration;

use lockstep_core::CallKind;

pub const DEFAULT_ADDR: &str = "0.0.0.0:7117";

pub const USAGE: &str = "\
usage:
  lockstep --serve [--addr HOST:PORT] [--name NAME] [--fail fire|iterate|initialize]
                   [--latency-ms N] [--advertise]
  lockstep --run   [--connect A,B,C | --discover] [--required N] [--rounds N]
                   [--iterations N] [--config PATH]

common: --verbose/-v  --log-file PATH";

#[derive(Debug, Clone, PartialEq)]
pub struct ServeOptions {
    pub addr: String,
    pub name: Option<String>,
    pub fail: Option<CallKind>,
    pub latency: Duration,
    pub advertise: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Connect(Vec<String>),
    Discover,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub source: Source,
    pub required: Option<usize>,
    pub rounds: usize,
    pub iterations: Option<u32>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Serve(ServeOptions),
    Run(RunOptions),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    pub mode: Mode,
}

fn value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn number<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>, String> {
    match value(args, flag) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| format!("{} expects a number, got '{}'", flag, s)),
    }
}

/// Parse `args` without the program name.
pub fn parse(args: &[String]) -> Result<Options, String> {
    let verbose = has(args, "--verbose") || has(args, "-v");
    let log_file = value(args, "--log-file").map(PathBuf::from);

    let mode = match (has(args, "--serve"), has(args, "--run")) {
        (true, false) => Mode::Serve(parse_serve(args)?),
        (false, true) => Mode::Run(parse_run(args)?),
        (true, true) => return Err("--serve and --run are mutually exclusive".into()),
        (false, false) => return Err("one of --serve or --run is required".into()),
    };

    Ok(Options {
        verbose,
        log_file,
        mode,
    })
}

fn parse_serve(args: &[String]) -> Result<ServeOptions, String> {
    let fail = match value(args, "--fail") {
        None => None,
        Some(s) => Some(CallKind::parse(s).ok_or_else(|| format!("unknown call kind '{}'", s))?),
    };
    Ok(ServeOptions {
        addr: value(args, "--addr").unwrap_or(DEFAULT_ADDR).to_string(),
        name: value(args, "--name").map(str::to_string),
        fail,
        latency: Duration::from_millis(number(args, "--latency-ms")?.unwrap_or(0)),
        advertise: has(args, "--advertise"),
    })
}

fn parse_run(args: &[String]) -> Result<RunOptions, String> {
    let source = match (value(args, "--connect"), has(args, "--discover")) {
        (Some(list), false) => {
            let addrs: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if addrs.is_empty() {
                return Err("--connect needs at least one address".into());
            }
            Source::Connect(addrs)
        }
        (None, true) => Source::Discover,
        (Some(_), true) => return Err("--connect and --discover are mutually exclusive".into()),
        (None, false) => return Err("--run needs --connect or --discover".into()),
    };
    Ok(RunOptions {
        source,
        required: number(args, "--required")?,
        rounds: number(args, "--rounds")?.unwrap_or(1),
        iterations: number(args, "--iterations")?,
        config: value(args, "--config").map(PathBuf::from),
    })
}
