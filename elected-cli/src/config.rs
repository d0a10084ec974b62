//! Configuration for the daemon, layered with figment.
//!
//! Sources in precedence order, later ones overriding earlier ones:
//! 1. Defaults
//! 2. The `--config` file, or `elected.{toml,yaml,yml,json}` in the working directory
//! 3. `ELECTED_*` environment variables
//! 4. Command line flags

use crate::cli::Cli;
use elected::{CommandSpec, DaemonConfig, ElectionConfig, DEFAULT_WAIT};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Consul agent queried when nothing else is configured
pub const DEFAULT_SERVER: &str = "localhost:8500";

/// Prefix of environment variables read as configuration
pub const ENV_PREFIX: &str = "ELECTED_";

/// Base name of configuration files discovered in the working directory
const CONFIG_FILE_STEM: &str = "elected";

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Configuration file format not supported
    #[error("Unsupported configuration file format: {format}")]
    UnsupportedFormat { format: String },

    /// Configuration parsing failed
    #[error("Failed to parse configuration: {source}")]
    ParseError { source: figment::Error },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        ConfigError::ValidationError {
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::ParseError { source: error }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything the daemon can be configured with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectedConfig {
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<PathBuf>,
    pub restart: bool,
    pub wait: String,
    pub verbose: bool,
    pub quiet: bool,
}

impl Default for ElectedConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            key: None,
            command: None,
            cwd: None,
            watch: None,
            restart: false,
            wait: DEFAULT_WAIT.to_string(),
            verbose: false,
            quiet: false,
        }
    }
}

/// Values given on the command line. Absent flags leave lower layers untouched.
#[derive(Debug, Default, Serialize)]
struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    watch: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quiet: Option<bool>,
}

impl From<&Cli> for CliOverrides {
    fn from(cli: &Cli) -> Self {
        Self {
            server: cli.server.clone(),
            key: cli.key.clone(),
            command: cli.command.clone(),
            cwd: cli.cwd.clone(),
            watch: cli.watch.clone(),
            restart: cli.restart.then_some(true),
            wait: cli.wait.clone(),
            verbose: cli.verbose.then_some(true),
            quiet: cli.quiet.then_some(true),
        }
    }
}

/// Consul duration syntax, e.g. `30s`, `10m`, `1h30m`
const WAIT_PATTERN: &str = r"^(\d+(\.\d+)?(ns|us|µs|ms|s|m|h))+$";

/// Whether `wait` is a duration Consul accepts for blocking queries
pub fn is_consul_duration(wait: &str) -> ConfigResult<bool> {
    let pattern = Regex::new(WAIT_PATTERN).map_err(|e| {
        ConfigError::validation(format!("Invalid wait pattern: {e}"))
    })?;
    Ok(pattern.is_match(wait))
}

impl ElectedConfig {
    /// Validates the configuration and turns it into the daemon's settings
    pub fn daemon_config(&self, hostname: &str) -> ConfigResult<DaemonConfig> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::validation("server must not be empty"));
        }

        let key = self
            .key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::validation("a lock key is required (--key)"))?;

        let command = self
            .command
            .as_deref()
            .and_then(CommandSpec::parse)
            .ok_or_else(|| ConfigError::validation("a command is required (--command)"))?
            .with_cwd(self.cwd.clone());

        if !is_consul_duration(&self.wait)? {
            return Err(ConfigError::validation(format!(
                "wait '{}' is not a duration such as 30s, 10m or 1h",
                self.wait
            )));
        }

        Ok(DaemonConfig {
            election: ElectionConfig::new(key, hostname).with_wait(self.wait.clone()),
            command,
            watch: self.watch.clone(),
            restart_on_change: self.restart,
        })
    }
}

/// Loads [`ElectedConfig`] from all sources
pub struct ConfigProvider {
    dir: PathBuf,
}

impl ConfigProvider {
    /// Provider discovering configuration files in the working directory
    pub fn new() -> Self {
        Self::with_dir(PathBuf::from("."))
    }

    /// Provider discovering configuration files in `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self, cli: &Cli) -> ConfigResult<ElectedConfig> {
        let config = self.build_figment(cli)?.extract::<ElectedConfig>()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    fn build_figment(&self, cli: &Cli) -> ConfigResult<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(ElectedConfig::default()));

        match &cli.config {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound { path: path.clone() });
                }
                figment = figment.merge(load_config_file(path)?);
            }
            None => {
                for path in self.discover() {
                    figment = figment.merge(load_config_file(&path)?);
                }
            }
        }

        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::globals(CliOverrides::from(cli))))
    }

    fn discover(&self) -> Vec<PathBuf> {
        ["toml", "yaml", "yml", "json"]
            .iter()
            .map(|ext| self.dir.join(format!("{CONFIG_FILE_STEM}.{ext}")))
            .filter(|path| path.is_file())
            .collect()
    }
}

impl Default for ConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn load_config_file(path: &Path) -> ConfigResult<Figment> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    debug!("Loading config file: {}", path.display());
    match extension.as_str() {
        "toml" => Ok(Figment::from(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::from(Yaml::file(path))),
        "json" => Ok(Figment::from(Json::file(path))),
        other => Err(ConfigError::UnsupportedFormat {
            format: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        use clap::Parser;
        let mut argv = vec!["elected"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn clear_env() {
        for var in [
            "ELECTED_SERVER",
            "ELECTED_KEY",
            "ELECTED_COMMAND",
            "ELECTED_WAIT",
            "ELECTED_RESTART",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let config = ConfigProvider::with_dir(dir.path()).load(&cli(&[])).unwrap();
        assert_eq!(config, ElectedConfig::default());
        assert_eq!(config.server, "localhost:8500");
        assert_eq!(config.wait, "10m");
    }

    #[test]
    #[serial]
    fn test_discovered_file_is_loaded() {
        clear_env();
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("elected.toml"),
            "key = \"jobs/leader\"\ncommand = \"sleep 30\"\nserver = \"consul:8500\"\n",
        )
        .unwrap();

        let config = ConfigProvider::with_dir(dir.path()).load(&cli(&[])).unwrap();
        assert_eq!(config.key.as_deref(), Some("jobs/leader"));
        assert_eq!(config.command.as_deref(), Some("sleep 30"));
        assert_eq!(config.server, "consul:8500");
    }

    #[test]
    #[serial]
    fn test_explicit_yaml_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        fs::write(&path, "key: jobs/yaml\nrestart: true\n").unwrap();

        let config = ConfigProvider::with_dir(dir.path())
            .load(&cli(&["--config", path.to_str().unwrap()]))
            .unwrap();
        assert_eq!(config.key.as_deref(), Some("jobs/yaml"));
        assert!(config.restart);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let result =
            ConfigProvider::with_dir(dir.path()).load(&cli(&["--config", path.to_str().unwrap()]));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    #[serial]
    fn test_unsupported_format() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("elected.ini");
        fs::write(&path, "key=x").unwrap();
        let result =
            ConfigProvider::with_dir(dir.path()).load(&cli(&["--config", path.to_str().unwrap()]));
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
    }

    #[test]
    #[serial]
    fn test_precedence_file_env_flags() {
        clear_env();
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("elected.toml"),
            "key = \"from-file\"\nserver = \"file:8500\"\nwait = \"1m\"\n",
        )
        .unwrap();
        std::env::set_var("ELECTED_KEY", "from-env");
        std::env::set_var("ELECTED_WAIT", "2m");

        let config = ConfigProvider::with_dir(dir.path())
            .load(&cli(&["--wait", "3m"]))
            .unwrap();
        clear_env();

        assert_eq!(config.server, "file:8500");
        assert_eq!(config.key.as_deref(), Some("from-env"));
        assert_eq!(config.wait, "3m");
    }

    #[test]
    #[serial]
    fn test_absent_flag_keeps_file_value() {
        clear_env();
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("elected.toml"), "restart = true\n").unwrap();

        let config = ConfigProvider::with_dir(dir.path()).load(&cli(&[])).unwrap();
        assert!(config.restart);
    }

    #[test]
    fn test_daemon_config() {
        let config = ElectedConfig {
            key: Some("jobs/leader".to_string()),
            command: Some("./run --fast".to_string()),
            cwd: Some(PathBuf::from("/srv")),
            watch: Some(PathBuf::from("/srv/release")),
            restart: true,
            wait: "30s".to_string(),
            ..ElectedConfig::default()
        };
        let daemon = config.daemon_config("web-1").unwrap();
        assert_eq!(daemon.election.key, "jobs/leader");
        assert_eq!(daemon.election.hostname, "web-1");
        assert_eq!(daemon.election.wait, "30s");
        assert_eq!(daemon.command.program(), "./run");
        assert_eq!(daemon.command.args(), ["--fast".to_string()]);
        assert_eq!(daemon.command.cwd(), Some(Path::new("/srv")));
        assert_eq!(daemon.watch, Some(PathBuf::from("/srv/release")));
        assert!(daemon.restart_on_change);
    }

    #[test]
    fn test_key_and_command_required() {
        let config = ElectedConfig {
            command: Some("sleep 30".to_string()),
            ..ElectedConfig::default()
        };
        let err = config.daemon_config("web-1").unwrap_err();
        assert!(err.to_string().contains("--key"));

        let config = ElectedConfig {
            key: Some("jobs/leader".to_string()),
            command: Some("   ".to_string()),
            ..ElectedConfig::default()
        };
        let err = config.daemon_config("web-1").unwrap_err();
        assert!(err.to_string().contains("--command"));
    }

    #[test]
    fn test_wait_must_be_duration() {
        let config = ElectedConfig {
            key: Some("jobs/leader".to_string()),
            command: Some("sleep 30".to_string()),
            wait: "forever".to_string(),
            ..ElectedConfig::default()
        };
        assert!(matches!(
            config.daemon_config("web-1"),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_is_consul_duration() {
        for wait in ["10m", "30s", "1h30m", "1.5h", "250ms"] {
            assert!(is_consul_duration(wait).unwrap(), "{wait}");
        }
        for wait in ["", "10", "m", "ten minutes", "-5s"] {
            assert!(!is_consul_duration(wait).unwrap(), "{wait}");
        }
    }
}
