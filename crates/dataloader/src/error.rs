//! Error types for the dataloader pipeline
//!
//! Every stage returns a typed [`IngestError`] carrying the file or locator
//! that failed. The orchestrator decides whether a failure is fatal; lower
//! layers never retry.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for dataloader operations
pub type Result<T> = std::result::Result<T, IngestError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pipeline stage in which a fatal error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Creating the working directory
    Prepare,
    Fetch,
    Unpack,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prepare => write!(f, "prepare"),
            Stage::Fetch => write!(f, "fetch"),
            Stage::Unpack => write!(f, "unpack"),
            Stage::Load => write!(f, "load"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    /// Required settings missing or malformed. Raised before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Download from '{locator}' failed: {reason}")]
    Download { locator: String, reason: String },

    #[error("Archive error for '{}': {reason}", .archive.display())]
    Archive { archive: PathBuf, reason: String },

    #[error("Failed to load '{}': {source}", .file.display())]
    Load {
        file: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    /// A fatal failure that aborted the whole run
    #[error("Ingestion failed at {stage} stage: {source}")]
    Ingestion {
        stage: Stage,
        #[source]
        source: BoxError,
    },
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn download(locator: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Download {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }

    pub fn archive(archive: impl AsRef<Path>, reason: impl fmt::Display) -> Self {
        Self::Archive {
            archive: archive.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn load(file: impl AsRef<Path>, source: sqlx::Error) -> Self {
        Self::Load {
            file: file.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn ingestion(stage: Stage, source: impl Into<BoxError>) -> Self {
        Self::Ingestion {
            stage,
            source: source.into(),
        }
    }

    /// The typed stage error wrapped by an `Ingestion` failure, if any
    pub fn cause(&self) -> Option<&IngestError> {
        match self {
            Self::Ingestion { source, .. } => source.downcast_ref::<IngestError>(),
            _ => None,
        }
    }

    /// The file a load failure refers to, looking through `Ingestion`
    pub fn failed_file(&self) -> Option<&Path> {
        match self {
            Self::Load { file, .. } => Some(file),
            _ => self.cause().and_then(IngestError::failed_file),
        }
    }

    /// Process exit status for this error, looking through `Ingestion`
    pub fn exit_code(&self) -> u8 {
        match (self, self.cause()) {
            (Self::Configuration(_), _) | (_, Some(Self::Configuration(_))) => 2,
            _ => 1,
        }
    }
}

/// Failure to remove the working directory.
///
/// Only ever logged; never changes the outcome of a run.
#[derive(Error, Debug)]
#[error("Failed to remove working directory '{}': {source}", .path.display())]
pub struct CleanupWarning {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
