//! Connection settings handed in by the process's config loader.

use crate::dialect::Backend;
use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// TLS requirement for the database connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    #[serde(alias = "disabled")]
    Disable,
    #[default]
    #[serde(alias = "preferred")]
    Prefer,
    #[serde(alias = "required")]
    Require,
}

/// Database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Backend kind: "mysql" or "postgres".
    #[serde(default)]
    pub backend: Backend,

    pub host: String,

    /// Port; defaults to the backend's standard port.
    #[serde(default)]
    pub port: Option<u16>,

    pub user: String,

    #[serde(default)]
    pub password: String,

    pub database: String,

    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Prepended to every logical table name.
    #[serde(default)]
    pub table_prefix: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub min_connections: u32,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

impl DbConfig {
    pub fn new(
        backend: Backend,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            host: host.into(),
            port: None,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ssl_mode: SslMode::default(),
            table_prefix: String::new(),
            max_connections: default_max_connections(),
            min_connections: 0,
            idle_timeout_secs: default_idle_timeout_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.backend.default_port())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Check the settings before opening a pool.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(DbError::Config("host must not be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(DbError::Config("user must not be empty".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(DbError::Config("database must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(DbError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(DbError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if !self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(DbError::Config(format!(
                "table_prefix '{}' may only contain letters, digits and '_'",
                self.table_prefix
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port())
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("table_prefix", &self.table_prefix)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .finish()
    }
}
