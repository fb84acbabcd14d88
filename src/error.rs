use std::path::PathBuf;

use thiserror::Error;

/// The seven abstract error kinds from the error-handling design: each
/// carries enough context to let an operator find the offending manifest,
/// path, or host without re-running with `-vv`.
#[derive(Error, Debug)]
pub enum PgMakeSchemasError {
    #[error("manifest error at {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("path error: {path}: {reason}")]
    Path { path: PathBuf, reason: String },

    #[error("ordering error: {reason}")]
    Ordering { reason: String },

    #[error("migration error: {reason}")]
    Migration { reason: String },

    #[error("{host}: fragment {fragment_info}: {cause}")]
    Receivers {
        host: String,
        fragment_info: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("unsupported: {reason}")]
    Unsupported { reason: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml error at {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Stable discriminant for callers that want to branch on error kind
/// without matching the full enum (e.g. the CLI's exit-code mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Manifest,
    Path,
    Ordering,
    Migration,
    Receivers,
    Config,
    Unsupported,
    Io,
    Yaml,
}

impl PgMakeSchemasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Manifest { .. } => ErrorKind::Manifest,
            Self::Path { .. } => ErrorKind::Path,
            Self::Ordering { .. } => ErrorKind::Ordering,
            Self::Migration { .. } => ErrorKind::Migration,
            Self::Receivers { .. } => ErrorKind::Receivers,
            Self::Config { .. } => ErrorKind::Config,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Io { .. } => ErrorKind::Io,
            Self::Yaml { .. } => ErrorKind::Yaml,
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Manifest { path: path.into(), reason: reason.into() }
    }

    pub fn path_not_allowed(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into(), reason: "not in any directory of the allow-list".into() }
    }

    pub fn unsafe_open(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Path { path: path.into(), reason: reason.into() }
    }

    pub fn ordering(reason: impl Into<String>) -> Self {
        Self::Ordering { reason: reason.into() }
    }

    pub fn migration(reason: impl Into<String>) -> Self {
        Self::Migration { reason: reason.into() }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config { reason: reason.into() }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported { reason: reason.into() }
    }

    pub fn receivers(
        host: impl Into<String>,
        fragment_info: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Receivers { host: host.into(), fragment_info: fragment_info.into(), cause: Box::new(cause) }
    }
}

pub type Result<T> = std::result::Result<T, PgMakeSchemasError>;
