//! SSG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SsgError>;

/// Top-level error type for Storage-Sage.
///
/// Policy and safety outcomes are verdicts, never errors; this enum carries
/// the fatal classes only (configuration, audit, runtime). Exit-code mapping:
/// configuration errors exit 2, everything else exits 1.
#[derive(Debug, Error)]
pub enum SsgError {
    #[error("[SSG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SSG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SSG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SSG-2001] stat failure for {path}: {details}")]
    StatError { path: PathBuf, details: String },

    #[error("[SSG-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SSG-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[SSG-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[SSG-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SSG-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SSG-3101] audit write failed: {details}")]
    AuditWriteFailed { details: String },

    #[error("[SSG-3102] audit hash chain broken at record {record_id}: {details}")]
    HashChainBroken { record_id: i64, details: String },

    #[error("[SSG-3201] run cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("[SSG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SsgError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SSG-1001",
            Self::MissingConfig { .. } => "SSG-1002",
            Self::ConfigParse { .. } => "SSG-1003",
            Self::StatError { .. } => "SSG-2001",
            Self::Serialization { .. } => "SSG-2101",
            Self::Sql { .. } => "SSG-2102",
            Self::PermissionDenied { .. } => "SSG-3001",
            Self::Io { .. } => "SSG-3002",
            Self::ChannelClosed { .. } => "SSG-3003",
            Self::AuditWriteFailed { .. } => "SSG-3101",
            Self::HashChainBroken { .. } => "SSG-3102",
            Self::Cancelled { .. } => "SSG-3201",
            Self::Runtime { .. } => "SSG-3900",
        }
    }

    /// Whether this error is a configuration/validation failure (exit code 2).
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. }
        )
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::StatError { .. }
                | Self::Sql { .. }
                | Self::AuditWriteFailed { .. }
                | Self::Runtime { .. }
        )
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

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SsgError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for SsgError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for SsgError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::ConfigParse {
            context: "yaml",
            details: value.to_string(),
        }
    }
}
