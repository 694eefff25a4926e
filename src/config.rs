use http::HeaderValue;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How an insert reports the identifier of the row it created.
///
/// The two are not interchangeable: `Returning` expects the command text to
/// carry a `RETURNING` clause, `LastInsertRowid` expects it not to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    LastInsertRowid,
    Returning,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file; `:memory:` opens a private database.
    pub path: String,
    pub busy_timeout_ms: u64,
    pub id_strategy: IdStrategy,
    /// Applied to file-backed databases only.
    pub journal_mode: Option<String>,
    /// Create the sessions table and its unique key if they are missing.
    pub bootstrap_schema: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "gateway.sqlite".to_string(),
            busy_timeout_ms: 5_000,
            id_strategy: IdStrategy::LastInsertRowid,
            journal_mode: Some("WAL".to_string()),
            bootstrap_schema: true,
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            journal_mode: None,
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Value of `Access-Control-Allow-Origin` on session responses.
    pub allowed_origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "sql_gateway=info".to_string(),
        }
    }
}

/// Gateway service configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Create a config for the database at `db_path`, everything else default
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig {
                path: db_path.into(),
                ..DatabaseConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig::in_memory(),
            ..Self::default()
        }
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.database.id_strategy = strategy;
        self
    }

    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.session.allowed_origin = Some(origin.into());
        self
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }
        if let Some(origin) = &self.session.allowed_origin {
            if HeaderValue::from_str(origin).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "session.allowed_origin is not a valid header value: {origin:?}"
                )));
            }
        }
        Ok(())
    }
}
