//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::query::Dialect;

/// Environment variable overriding the database URL
pub const DATABASE_URL_ENV: &str = "MODULA_DATABASE_URL";

/// Environment variable overriding the node identifier
pub const NODE_ID_ENV: &str = "MODULA_NODE_ID";

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "MODULA_CONFIG_DIR";

/// Default maximum connections in the pool
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default tolerated clock skew for received timestamps
const DEFAULT_MAX_DRIFT_MS: u64 = 60_000;

/// Modula configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub clock: ClockConfig,
}

/// Supported database drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
    Mysql,
    Postgres,
}

impl Driver {
    /// Infer the driver from a connection URL scheme
    pub fn from_url(url: &str) -> anyhow::Result<Self> {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("Database URL has no scheme: {}", url))?;

        match scheme.as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(anyhow!(
                "Unsupported database scheme '{}'. Valid options: sqlite, mysql, postgres",
                other
            )),
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite => Dialect::Sqlite,
            Self::Mysql => Dialect::MySql,
            Self::Postgres => Dialect::Postgres,
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (`sqlite:`, `mysql://` or `postgres://`)
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    pub connect_timeout_secs: u64,
    /// Whether to run migrations on connect
    pub auto_migrate: bool,
    /// Identifier of this node in change events and backups
    pub node_id: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            connect_timeout_secs: 30,
            auto_migrate: true,
            node_id: default_node_id(),
        }
    }
}

impl DatabaseConfig {
    /// Create a config for the given connection URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Create a config for an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            ..Default::default()
        }
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Disable automatic migrations
    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn driver(&self) -> anyhow::Result<Driver> {
        Driver::from_url(&self.url)
    }

    /// Whether this points at a private in-memory SQLite database
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.driver()?;
        if self.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.min_connections > self.max_connections {
            return Err(anyhow!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.min_connections,
                self.max_connections
            ));
        }
        if self.node_id.trim().is_empty() {
            return Err(anyhow!("database.node_id must not be empty"));
        }
        Ok(())
    }
}

/// Causal clock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// How far ahead of local time a received timestamp may be before it is
    /// logged as suspicious
    pub max_drift_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
        }
    }
}

/// Default SQLite database location
pub fn default_database_url() -> String {
    let path = if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("modula").join("modula.db")
    } else {
        PathBuf::from("modula.db")
    };
    format!("sqlite:{}?mode=rwc", path.display())
}

/// Default node identifier: the host name
pub fn default_node_id() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("modula")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location with environment
    /// overrides applied
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATABASE_URL_ENV).filter(|v| !v.is_empty()) {
            self.database.url = url;
        }
        if let Some(node_id) = lookup(NODE_ID_ENV).filter(|v| !v.is_empty()) {
            self.database.node_id = node_id;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.database.validate()
    }
}
