//! DIN-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, IntakeError>;

/// Top-level error type for the intake service.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("[DIN-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DIN-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DIN-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DIN-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DIN-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IntakeError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DIN-1001",
            Self::MissingConfig { .. } => "DIN-1002",
            Self::ConfigParse { .. } => "DIN-1003",
            Self::Serialization { .. } => "DIN-2101",
            Self::Io { .. } => "DIN-3002",
        }
    }

    /// Whether retrying might resolve the failure (a full disk, a lock, a
    /// permission fixed by the operator). Config and serialization errors
    /// need a change before anything will succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for IntakeError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

/// Reasons a persisted processed-set could not be restored.
///
/// Never crosses the public API: the store degrades every variant to an
/// empty record after logging it once.
#[derive(Debug, Error)]
pub enum StateLoadError {
    #[error("cannot read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state file {path} has unexpected shape: {details}")]
    Shape { path: PathBuf, details: String },
}
