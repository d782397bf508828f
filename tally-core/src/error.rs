//! Error types for tally-core.

use std::path::PathBuf;

use thiserror::Error;

/// A raw feed object did not fit its record kind's schema.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    /// A field carried a JSON value that cannot be read as the column type.
    #[error("{kind}.{field}: expected {expected}, got {found}")]
    Type {
        kind: &'static str,
        field: &'static str,
        expected: String,
        found: String,
    },

    /// A VARCHAR value exceeds its declared length.
    #[error("{kind}.{field}: value of {len} chars exceeds VARCHAR({max})")]
    TooLong {
        kind: &'static str,
        field: &'static str,
        len: usize,
        max: u16,
    },

    /// The record key could not be derived (missing or null key field).
    #[error("{kind}: missing key field '{field}'")]
    MissingKey {
        kind: &'static str,
        field: &'static str,
    },

    /// A scoped record belongs to a different parent than the batch it arrived in.
    #[error("{kind}: record scoped to '{found}' inside batch for '{expected}'")]
    ScopeMismatch {
        kind: &'static str,
        expected: String,
        found: String,
    },

    /// A record was placed in a batch of another kind.
    #[error("record of kind '{found}' inside batch for '{expected}'")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },

    /// The raw value was not a JSON object at all.
    #[error("{kind}: expected a JSON object, got {found}")]
    NotAnObject { kind: &'static str, found: String },
}

/// All errors that can arise from configuration load / save.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the path that was being accessed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with file path and serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No config file, and the caller needs one (e.g. to locate the feed).
    #[error("config not found at {path}; run `tally init` first")]
    NotFound { path: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
