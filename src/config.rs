//! Configuration module for the gopherd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::gopher::{ExtensionMatch, Site};

/// Environment variable naming the base directory used when no root is given.
pub const HOME_ENV: &str = "GOPHERD_HOME";

/// Subdirectory of `GOPHERD_HOME` that is served.
pub const HOME_DOC_DIR: &str = "doc";

/// Command-line arguments for the gopher server
#[derive(Parser, Debug, Default)]
#[command(name = "gopherd")]
#[command(author = "gopherd authors")]
#[command(version = "0.1.0")]
#[command(about = "A Gopher server for a single directory tree", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Root directory to serve (defaults to $GOPHERD_HOME/doc)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:70)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Host advertised in directory listings
    #[arg(long)]
    pub host: Option<String>,

    /// Port advertised in directory listings
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of concurrent connections (unbounded when unset)
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Seconds to wait for the request line (0 = wait forever)
    #[arg(short = 't', long)]
    pub request_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gopher: GopherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Directory to serve
    pub root: Option<PathBuf>,
    /// Concurrent connection cap
    pub max_connections: Option<usize>,
    /// Request line deadline in seconds
    #[serde(default)]
    pub request_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            root: None,
            max_connections: None,
            request_timeout: 0,
        }
    }
}

/// Menu rendering configuration
#[derive(Debug, Deserialize)]
pub struct GopherConfig {
    /// Host written into every menu line
    #[serde(default = "default_host")]
    pub host: String,
    /// Port written into every menu line
    #[serde(default = "default_port")]
    pub port: u16,
    /// How file extensions are matched when classifying entries
    #[serde(default)]
    pub extension_match: ExtensionMatch,
    /// Emit the `.` line after the last menu item
    #[serde(default)]
    pub listing_terminator: bool,
}

impl Default for GopherConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            extension_match: ExtensionMatch::default(),
            listing_terminator: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:70".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    70
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_connections: Option<usize>,
    pub request_timeout: Option<Duration>,
    pub extension_match: ExtensionMatch,
    pub listing_terminator: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let home = std::env::var_os(HOME_ENV).map(PathBuf::from);
        Self::merge(cli, toml_config, home)
    }

    /// Merge CLI args, file values and the `GOPHERD_HOME` fallback.
    fn merge(
        cli: CliArgs,
        toml_config: TomlConfig,
        home: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let root = match cli.root.or(toml_config.server.root) {
            Some(root) => root,
            None => match home {
                Some(home) if !home.as_os_str().is_empty() => home.join(HOME_DOC_DIR),
                _ => return Err(ConfigError::NoRoot),
            },
        };
        let root = validate_root(&root)?;

        let timeout_secs = cli
            .request_timeout
            .unwrap_or(toml_config.server.request_timeout);

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            root,
            host: cli.host.unwrap_or(toml_config.gopher.host),
            port: cli.port.unwrap_or(toml_config.gopher.port),
            max_connections: cli
                .max_connections
                .or(toml_config.server.max_connections)
                .filter(|&n| n > 0),
            request_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            extension_match: toml_config.gopher.extension_match,
            listing_terminator: toml_config.gopher.listing_terminator,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Build the immutable per-process view shared with every connection.
    pub fn site(&self) -> Arc<Site> {
        Arc::new(Site {
            root: self.root.clone(),
            host: self.host.clone(),
            port: self.port,
            extension_match: self.extension_match,
            listing_terminator: self.listing_terminator,
        })
    }
}

/// Check that `root` is an existing, listable directory and make it absolute.
fn validate_root(root: &Path) -> Result<PathBuf, ConfigError> {
    let metadata =
        std::fs::metadata(root).map_err(|e| ConfigError::RootStat(root.to_path_buf(), e))?;
    if !metadata.is_dir() {
        return Err(ConfigError::RootNotDirectory(root.to_path_buf()));
    }
    std::fs::read_dir(root).map_err(|e| ConfigError::RootUnreadable(root.to_path_buf(), e))?;
    root.canonicalize()
        .map_err(|e| ConfigError::RootStat(root.to_path_buf(), e))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    NoRoot,
    RootStat(PathBuf, std::io::Error),
    RootNotDirectory(PathBuf),
    RootUnreadable(PathBuf, std::io::Error),
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
            ConfigError::NoRoot => {
                write!(f, "No root directory given and {HOME_ENV} is not set")
            }
            ConfigError::RootStat(path, e) => {
                write!(f, "Failed to stat root '{}': {}", path.display(), e)
            }
            ConfigError::RootNotDirectory(path) => {
                write!(f, "Root '{}' isn't a directory", path.display())
            }
            ConfigError::RootUnreadable(path, e) => {
                write!(f, "Failed to list root '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_root(root: &Path) -> CliArgs {
        CliArgs {
            root: Some(root.to_path_buf()),
            log_level: "info".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:70");
        assert_eq!(config.server.root, None);
        assert_eq!(config.gopher.host, "127.0.0.1");
        assert_eq!(config.gopher.port, 70);
        assert_eq!(config.gopher.extension_match, ExtensionMatch::Suffix);
        assert!(!config.gopher.listing_terminator);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:7070"
            root = "/srv/gopher"
            max_connections = 256
            request_timeout = 30

            [gopher]
            host = "gopher.example.org"
            port = 7070
            extension_match = "prefix"
            listing_terminator = true

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:7070");
        assert_eq!(config.server.root, Some(PathBuf::from("/srv/gopher")));
        assert_eq!(config.server.max_connections, Some(256));
        assert_eq!(config.server.request_timeout, 30);
        assert_eq!(config.gopher.host, "gopher.example.org");
        assert_eq!(config.gopher.port, 7070);
        assert_eq!(config.gopher.extension_match, ExtensionMatch::Prefix);
        assert!(config.gopher.listing_terminator);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = cli_with_root(dir.path());
        cli.port = Some(7000);
        cli.request_timeout = Some(5);

        let mut file = TomlConfig::default();
        file.gopher.port = 7070;
        file.server.root = Some(PathBuf::from("/does/not/matter"));

        let config = Config::merge(cli, file, None).unwrap();
        assert_eq!(config.root, dir.path().canonicalize().unwrap());
        assert_eq!(config.port, 7000);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_connections, None);
    }

    #[test]
    fn test_root_from_home_env() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join(HOME_DOC_DIR)).unwrap();

        let cli = CliArgs {
            log_level: "info".to_string(),
            ..Default::default()
        };
        let config =
            Config::merge(cli, TomlConfig::default(), Some(home.path().to_path_buf())).unwrap();
        assert_eq!(
            config.root,
            home.path().join(HOME_DOC_DIR).canonicalize().unwrap()
        );
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn test_no_root_fails() {
        let cli = CliArgs {
            log_level: "info".to_string(),
            ..Default::default()
        };
        let err = Config::merge(cli, TomlConfig::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::NoRoot));
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with_root(&dir.path().join("missing"));
        let err = Config::merge(cli, TomlConfig::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::RootStat(..)));
    }

    #[test]
    fn test_file_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"not a directory").unwrap();

        let err = Config::merge(cli_with_root(&file), TomlConfig::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::RootNotDirectory(_)));
    }

    #[test]
    fn test_site_carries_menu_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = cli_with_root(dir.path());
        cli.host = Some("gopher.example.org".to_string());
        let mut file = TomlConfig::default();
        file.gopher.listing_terminator = true;

        let site = Config::merge(cli, file, None).unwrap().site();
        assert_eq!(site.host, "gopher.example.org");
        assert_eq!(site.port, 70);
        assert!(site.listing_terminator);
        assert!(site.root.is_absolute());
    }
}
