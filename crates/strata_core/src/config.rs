//! Store configuration and connection-string resolution.
//!
//! # Responsibility
//! - Describe which dialect and connection key a store uses.
//! - Resolve connection keys from JSON files and environment overrides.
//!
//! # Invariants
//! - Resolution failures are configuration errors raised at startup; they
//!   never surface from entity operations.
//! - Resolved connection strings are never logged.

use crate::db::{open_session, DbError, Dialect};
use crate::logging::{init_logging, LogSettings, LoggingError};
use crate::uow::unit_of_work::UnitOfWork;
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Base connection file, required.
pub const CONNECTION_FILE: &str = "connectionStrings.json";
/// Environment variable naming the optional overlay file.
pub const ENVIRONMENT_VAR: &str = "STRATA_ENVIRONMENT";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    EmptyKey,
    MissingValue(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        origin: String,
        source: serde_json::Error,
    },
    Db(DbError),
    Logging(LoggingError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "connection key must not be empty"),
            Self::MissingValue(key) => write!(f, "no connection string configured for `{key}`"),
            Self::Io { path, source } => write!(f, "failed to read `{}`: {source}", path.display()),
            Self::Parse { origin, source } => write!(f, "invalid JSON in {origin}: {source}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::EmptyKey | Self::MissingValue(_) => None,
        }
    }
}

impl From<DbError> for ConfigError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<LoggingError> for ConfigError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

/// Supplies the connection string for a named key.
pub trait ConnectionResolver {
    fn connection_string(&self, key: &str) -> ConfigResult<String>;
}

/// Resolves keys from `connectionStrings.json`, an optional
/// `connectionStrings.<environment>.json` overlay and environment variables.
///
/// Nested keys use `:` (`ConnectionStrings:Main`). The matching environment
/// variable replaces `:` with `__` and wins over both files.
#[derive(Debug, Clone)]
pub struct JsonConnectionResolver {
    base_dir: PathBuf,
    environment: Option<String>,
    env_overrides: bool,
}

impl JsonConnectionResolver {
    /// Resolver over `base_dir`, taking the overlay name from
    /// `STRATA_ENVIRONMENT`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let environment = std::env::var(ENVIRONMENT_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self {
            base_dir: base_dir.into(),
            environment,
            env_overrides: true,
        }
    }

    pub fn with_environment(mut self, environment: Option<&str>) -> Self {
        self.environment = environment.map(str::to_string);
        self
    }

    /// Ignores environment-variable overrides.
    pub fn without_env_overrides(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    fn overlay_path(&self) -> Option<PathBuf> {
        self.environment
            .as_deref()
            .map(|environment| self.base_dir.join(format!("connectionStrings.{environment}.json")))
    }
}

impl ConnectionResolver for JsonConnectionResolver {
    fn connection_string(&self, key: &str) -> ConfigResult<String> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }

        if self.env_overrides {
            let variable = key.replace(':', "__");
            if let Some(value) = std::env::var(&variable).ok().filter(|v| !v.trim().is_empty()) {
                info!("event=connection_resolve module=config status=ok source=env key={key}");
                return Ok(value);
            }
        }

        if let Some(overlay) = self.overlay_path() {
            if overlay.exists() {
                if let Some(value) = lookup(&read_json(&overlay)?, key) {
                    info!("event=connection_resolve module=config status=ok source=overlay key={key}");
                    return Ok(value);
                }
            }
        }

        let base = read_json(&self.base_dir.join(CONNECTION_FILE))?;
        match lookup(&base, key) {
            Some(value) => {
                info!("event=connection_resolve module=config status=ok source=base key={key}");
                Ok(value)
            }
            None => Err(ConfigError::MissingValue(key.to_string())),
        }
    }
}

fn read_json(path: &Path) -> ConfigResult<Value> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        origin: path.display().to_string(),
        source,
    })
}

/// Walks `:`-separated segments; only non-empty strings count as values.
fn lookup(root: &Value, key: &str) -> Option<String> {
    key.split(':')
        .try_fold(root, |node, segment| node.get(segment))
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
}

/// Store-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    pub dialect: Dialect,
    pub connection_key: String,
    #[serde(default)]
    pub log: Option<LogSettings>,
}

impl StoreConfig {
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            origin: "store config".to_string(),
            source,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let value = read_json(path)?;
        serde_json::from_value(value).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// Starts logging when a `log` section is present.
    pub fn init_logging(&self) -> ConfigResult<bool> {
        match &self.log {
            Some(settings) => {
                init_logging(settings)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolves the connection key and opens a Unit of Work over it.
    pub fn open_unit_of_work(&self, resolver: &impl ConnectionResolver) -> ConfigResult<UnitOfWork> {
        let connection_string = resolver.connection_string(&self.connection_key)?;
        let conn = open_session(&connection_string)?;
        Ok(UnitOfWork::new(conn, self.dialect))
    }
}
