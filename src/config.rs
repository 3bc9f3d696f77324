//! Configuration module for the aesdsocket server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "aesdsocket")]
#[command(author = "aesdsocket authors")]
#[command(version = "0.1.0")]
#[command(about = "Appends newline-terminated messages to a log and echoes the log back", long_about = None)]
pub struct CliArgs {
    /// Detach from the terminal after binding and run as a daemon
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:9000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Path of the append-only data file
    #[arg(short = 's', long)]
    pub store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Where diagnostics are written
    #[arg(long, value_enum)]
    pub log_target: Option<LogTarget>,
}

/// Diagnostic sink selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// System log via openlog/syslog
    Syslog,
    /// Standard error
    Stderr,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Pending connection queue depth
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
        }
    }
}

/// Store-related configuration
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Location of the data file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Per-connection I/O sizing
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Bytes requested per receive call
    #[serde(default = "default_chunk")]
    pub recv_chunk: usize,
    /// Bytes read from the store and sent per send call
    #[serde(default = "default_chunk")]
    pub send_chunk: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            recv_chunk: default_chunk(),
            send_chunk: default_chunk(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log sink
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            target: default_log_target(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_backlog() -> i32 {
    10
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/tmp/aesdsocketdata")
}

fn default_chunk() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_target() -> LogTarget {
    LogTarget::Syslog
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub daemon: bool,
    pub listen: SocketAddr,
    pub backlog: i32,
    pub store_path: PathBuf,
    pub recv_chunk: usize,
    pub send_chunk: usize,
    pub log_level: String,
    pub log_target: LogTarget,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    ///
    /// Usage errors terminate the process through clap before anything is bound.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they reference, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        let store_path = absolute(&cli.store.unwrap_or(toml_config.store.path))
            .map_err(ConfigError::CurrentDir)?;

        let config = Config {
            daemon: cli.daemon,
            listen,
            backlog: toml_config.server.backlog,
            store_path,
            recv_chunk: toml_config.connection.recv_chunk,
            send_chunk: toml_config.connection.send_chunk,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            log_target: cli.log_target.unwrap_or(toml_config.logging.target),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("server.backlog must be positive"));
        }
        if self.recv_chunk == 0 {
            return Err(ConfigError::Invalid("connection.recv_chunk must be nonzero"));
        }
        if self.send_chunk == 0 {
            return Err(ConfigError::Invalid("connection.send_chunk must be nonzero"));
        }
        Ok(())
    }
}

/// The daemon changes directory to `/`, so relative store paths are pinned
/// to the launch directory here.
fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
    CurrentDir(std::io::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr) => {
                write!(f, "Invalid listen address '{addr}'")
            }
            ConfigError::CurrentDir(e) => {
                write!(f, "Failed to resolve current directory: {e}")
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("aesdsocket").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_args(parse(&[]).unwrap()).unwrap();
        assert!(!config.daemon);
        assert_eq!(config.listen, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.backlog, 10);
        assert_eq!(config.store_path, PathBuf::from("/var/tmp/aesdsocketdata"));
        assert_eq!(config.recv_chunk, 1024);
        assert_eq!(config.send_chunk, 1024);
        assert_eq!(config.log_target, LogTarget::Syslog);
    }

    #[test]
    fn test_daemon_flag() {
        assert!(parse(&["-d"]).unwrap().daemon);
        assert!(parse(&["--daemon"]).unwrap().daemon);
    }

    #[test]
    fn test_usage_errors() {
        assert!(parse(&["extra"]).is_err());
        assert!(parse(&["-d", "extra"]).is_err());
        assert!(parse(&["-x"]).is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9100"
            backlog = 32

            [store]
            path = "/tmp/store"

            [connection]
            recv_chunk = 64
            send_chunk = 128

            [logging]
            level = "debug"
            target = "stderr"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9100");
        assert_eq!(config.server.backlog, 32);
        assert_eq!(config.store.path, PathBuf::from("/tmp/store"));
        assert_eq!(config.connection.recv_chunk, 64);
        assert_eq!(config.connection.send_chunk, 128);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.target, LogTarget::Stderr);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nlisten = \"127.0.0.1:9100\"\n[logging]\nlevel = \"debug\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = Config::from_args(
            parse(&["-c", &path, "-l", "127.0.0.1:9200", "--log-target", "stderr"]).unwrap(),
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:9200".parse().unwrap());
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_target, LogTarget::Stderr);
    }

    #[test]
    fn test_relative_store_is_pinned() {
        let config = Config::from_args(parse(&["-s", "data/log"]).unwrap()).unwrap();
        assert!(config.store_path.is_absolute());
        assert!(config.store_path.ends_with("data/log"));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_args(parse(&["-l", "not-an-address"]).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nrecv_chunk = 0").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let err = Config::from_args(parse(&["-c", &path]).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
