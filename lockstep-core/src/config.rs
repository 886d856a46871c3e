use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    discovery: DiscoveryConfig,
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    net: NetConfig,
}

#[derive(Deserialize, Default)]
struct DiscoveryConfig {
    required_services: Option<usize>,
    poll_interval_ms: Option<u64>,
    quorum_timeout_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct DispatchConfig {
    call_timeout_ms: Option<u64>,
    pipelining: Option<bool>,
    iterations: Option<u32>,
}

#[derive(Deserialize, Default)]
struct NetConfig {
    connect_timeout_ms: Option<u64>,
    io_timeout_ms: Option<u64>,
}

/// Error loading an explicitly requested config file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Parse(e) => write!(f, "TOML error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Discovery tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    /// 0 means "one service per model actor".
    pub required_services: usize,
    pub poll_interval: Duration,
    /// `None` waits for the quorum indefinitely.
    pub quorum_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub call_timeout: Option<Duration>,
    pub pipelining: bool,
    /// `None` runs an unbounded pipeline.
    pub iterations: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetSettings {
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
}

pub struct Config {
    discovery: DiscoveryConfig,
    dispatch: DispatchConfig,
    net: NetConfig,
}

impl Default for Config {
    /// Embedded defaults only, ignoring any user file.
    fn default() -> Self {
        Self::from_file(embedded())
    }
}

impl Config {
    /// Embedded defaults overridden by the user's config file, if present and valid.
    pub fn load() -> Self {
        let mut base = embedded();

        if let Some(path) = user_config_path() {
            if path.exists() {
                match read_file(&path) {
                    Ok(user) => merge(&mut base, user),
                    Err(e) => {
                        log::warn!(target: "config", "ignoring config {}: {}", path.display(), e)
                    }
                }
            }
        }

        Self::from_file(base)
    }

    /// Embedded defaults overridden by an explicit file. Errors are returned, not ignored.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut base = embedded();
        merge(&mut base, read_file(path)?);
        Ok(Self::from_file(base))
    }

    /// Embedded defaults overridden by TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut base = embedded();
        merge(&mut base, toml::from_str(contents)?);
        Ok(Self::from_file(base))
    }

    fn from_file(file: ConfigFile) -> Self {
        Config {
            discovery: file.discovery,
            dispatch: file.dispatch,
            net: file.net,
        }
    }

    pub fn discovery(&self) -> DiscoverySettings {
        DiscoverySettings {
            required_services: self.discovery.required_services.unwrap_or(0),
            poll_interval: Duration::from_millis(
                self.discovery.poll_interval_ms.unwrap_or(500).max(1),
            ),
            quorum_timeout: millis_or_none(self.discovery.quorum_timeout_ms),
        }
    }

    pub fn dispatch(&self) -> DispatchSettings {
        DispatchSettings {
            call_timeout: millis_or_none(self.dispatch.call_timeout_ms),
            pipelining: self.dispatch.pipelining.unwrap_or(false),
            iterations: match self.dispatch.iterations {
                Some(0) => None,
                Some(n) => Some(n),
                None => Some(1),
            },
        }
    }

    pub fn net(&self) -> NetSettings {
        NetSettings {
            connect_timeout: millis_or_none(self.net.connect_timeout_ms),
            io_timeout: millis_or_none(self.net.io_timeout_ms),
        }
    }
}

fn millis_or_none(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|&ms| ms > 0).map(Duration::from_millis)
}

fn embedded() -> ConfigFile {
    toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
        log::error!(target: "config", "embedded config.toml is invalid: {}", e);
        ConfigFile::default()
    })
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lockstep").join("config.toml"))
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    merge_discovery(&mut base.discovery, user.discovery);
    merge_dispatch(&mut base.dispatch, user.dispatch);
    merge_net(&mut base.net, user.net);
}

fn merge_discovery(base: &mut DiscoveryConfig, user: DiscoveryConfig) {
    if user.required_services.is_some() {
        base.required_services = user.required_services;
    }
    if user.poll_interval_ms.is_some() {
        base.poll_interval_ms = user.poll_interval_ms;
    }
    if user.quorum_timeout_ms.is_some() {
        base.quorum_timeout_ms = user.quorum_timeout_ms;
    }
}

fn merge_dispatch(base: &mut DispatchConfig, user: DispatchConfig) {
    if user.call_timeout_ms.is_some() {
        base.call_timeout_ms = user.call_timeout_ms;
    }
    if user.pipelining.is_some() {
        base.pipelining = user.pipelining;
    }
    if user.iterations.is_some() {
        base.iterations = user.iterations;
    }
}

fn merge_net(base: &mut NetConfig, user: NetConfig) {
    if user.connect_timeout_ms.is_some() {
        base.connect_timeout_ms = user.connect_timeout_ms;
    }
    if user.io_timeout_ms.is_some() {
        base.io_timeout_ms = user.io_timeout_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_embedded_config() {
        let config = Config::default();
        let discovery = config.discovery();
        assert_eq!(discovery.required_services, 0);
        assert_eq!(discovery.poll_interval, Duration::from_millis(500));
        assert_eq!(discovery.quorum_timeout, None);

        let dispatch = config.dispatch();
        assert_eq!(dispatch.call_timeout, None);
        assert!(!dispatch.pipelining);
        assert_eq!(dispatch.iterations, Some(1));

        assert_eq!(config.net().connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.net().io_timeout, None);
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [discovery]
            quorum_timeout_ms = 1500

            [dispatch]
            iterations = 0
            "#,
        )
        .unwrap();
        assert_eq!(
            config.discovery().quorum_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.discovery().poll_interval, Duration::from_millis(500));
        assert_eq!(config.dispatch().iterations, None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\ncall_timeout_ms = 250\npipelining = true").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        let dispatch = config.dispatch();
        assert_eq!(dispatch.call_timeout, Some(Duration::from_millis(250)));
        assert!(dispatch.pipelining);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch\npipelining = ").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load_from(&dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
