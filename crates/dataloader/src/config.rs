//! Configuration resolution
//!
//! Settings come from `DATALOADER_*` environment variables (a `.env` file is
//! loaded by the binary before resolution). Resolution is a pure function of
//! a key lookup: it never touches the network or the filesystem, and it
//! fails before any I/O when a required setting is absent.

use crate::error::{IngestError, Result};
use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Configuration Constants
// ============================================================================

pub const ENV_DB_HOST: &str = "DATALOADER_DB_HOST";
pub const ENV_DB_PORT: &str = "DATALOADER_DB_PORT";
pub const ENV_DB_NAME: &str = "DATALOADER_DB_NAME";
pub const ENV_DB_USER: &str = "DATALOADER_DB_USER";
pub const ENV_DB_PASSWORD: &str = "DATALOADER_DB_PASSWORD";
pub const ENV_DATA_URL: &str = "DATALOADER_DATA_URL";
pub const ENV_DATA_DIR: &str = "DATALOADER_DATA_DIR";
pub const ENV_FILE_PATTERN: &str = "DATALOADER_FILE_PATTERN";
pub const ENV_TABLE: &str = "DATALOADER_TABLE";

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
/// Database used by batch mode when `DATALOADER_DB_NAME` is unset
pub const DEFAULT_BATCH_DB_NAME: &str = "tripdata";
pub const DEFAULT_TABLE: &str = "yellow_tripdata";
pub const DEFAULT_DATA_URL: &str =
    "https://www.kaggle.com/api/v1/datasets/download/elemento/nyc-yellow-taxi-trip-data";
pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_FILE_PATTERN: &str = "*.csv";

/// Which pipeline is being configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Download an archive, unpack it, load every CSV inside
    Remote,
    /// Load every matching file in a local directory
    Local,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Remote => write!(f, "remote"),
            PipelineMode::Local => write!(f, "local"),
        }
    }
}

/// Database connection parameters
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl DbConfig {
    /// Connection options for a single bulk-load connection
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
            .application_name("dataloader")
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A possibly schema-qualified table identifier such as `public.yellow_tripdata`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    parts: Vec<String>,
}

impl TableName {
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<String> = name.split('.').map(|p| p.trim().to_string()).collect();
        if parts.iter().any(String::is_empty) {
            return Err(IngestError::config(format!("Invalid table name '{}'", name)));
        }
        Ok(Self { parts })
    }

    /// Quoted form safe to splice into SQL: `"public"."yellow_tripdata"`
    pub fn quoted(&self) -> String {
        self.parts
            .iter()
            .map(|p| format!("\"{}\"", p.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

/// Fully resolved loader configuration, built once and passed down by argument
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub mode: PipelineMode,
    pub db: DbConfig,
    pub table: TableName,
    /// Dataset archive URL (remote mode)
    pub data_url: String,
    /// Directory scanned for data files (local mode)
    pub data_dir: PathBuf,
    /// Glob matched against file names in `data_dir`
    pub file_pattern: String,
}

impl LoaderConfig {
    /// Resolve configuration from the process environment
    pub fn from_env(mode: PipelineMode) -> Result<Self> {
        Self::from_lookup(mode, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup.
    ///
    /// Blank values are treated as unset. All missing required settings are
    /// reported together.
    pub fn from_lookup<F>(mode: PipelineMode, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database = match mode {
            PipelineMode::Remote => get(ENV_DB_NAME),
            PipelineMode::Local => {
                Some(get(ENV_DB_NAME).unwrap_or_else(|| DEFAULT_BATCH_DB_NAME.to_string()))
            },
        };
        let user = get(ENV_DB_USER);
        let password = get(ENV_DB_PASSWORD);

        let missing: Vec<&str> = [
            (ENV_DB_NAME, database.is_none()),
            (ENV_DB_USER, user.is_none()),
            (ENV_DB_PASSWORD, password.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        let (Some(database), Some(user), Some(password)) = (database, user, password) else {
            return Err(IngestError::config(format!(
                "Missing required environment variable(s): {}",
                missing.join(", ")
            )));
        };

        let port = match get(ENV_DB_PORT) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                IngestError::config(format!("{} must be a port number, got '{}'", ENV_DB_PORT, raw))
            })?,
            None => DEFAULT_DB_PORT,
        };

        let table = TableName::parse(&get(ENV_TABLE).unwrap_or_else(|| DEFAULT_TABLE.to_string()))?;

        Ok(Self {
            mode,
            db: DbConfig {
                host: get(ENV_DB_HOST).unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
                port,
                database,
                user,
                password,
            },
            table,
            data_url: get(ENV_DATA_URL).unwrap_or_else(|| DEFAULT_DATA_URL.to_string()),
            data_dir: get(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            file_pattern: get(ENV_FILE_PATTERN).unwrap_or_else(|| DEFAULT_FILE_PATTERN.to_string()),
        })
    }
}
