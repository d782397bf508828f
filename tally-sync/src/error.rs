//! Error types for tally-sync.

use std::path::PathBuf;

use thiserror::Error;

use tally_core::{CompetitionId, ConfigError, EntityId, SchemaError, SeasonId};

/// Failures of the persistent document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The SQLite database rejected an operation.
    #[error("sqlite error ({context}): {source}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Collection and field names must be plain identifiers.
    #[error("invalid collection or field name '{0}'")]
    InvalidName(String),

    /// A stored document could not be (de)serialized.
    #[error("collection '{collection}' JSON error: {source}")]
    Json {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    /// A document was found but does not have the expected shape.
    #[error("collection '{collection}' document '{key}' is corrupt: {reason}")]
    Corrupt {
        collection: String,
        key: String,
        reason: String,
    },

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Failures reported by the feed provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Transient: unreachable, timed out, or missing.
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    /// The response could not be read into the expected structure.
    #[error("feed response malformed: {0}")]
    Malformed(String),
}

/// Failures of downstream collaborators (datastore sink, event channel).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// All errors that can arise from a sync call.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient fetch failure; retry on the next pass. No store mutation happened.
    #[error("feed unavailable for {entity}: {reason}")]
    FeedUnavailable { entity: EntityId, reason: String },

    /// The payload could not be mapped into records. No store mutation happened.
    #[error("feed payload malformed for {entity}: {reason}")]
    FeedMalformed { entity: EntityId, reason: String },

    /// An acknowledgment message does not fit the game it names.
    #[error("ack for {entity} rejected: {reason}")]
    AckRejected { entity: EntityId, reason: String },

    /// A season calendar could not be fetched.
    #[error("calendar {season}/{competition} unavailable: {source}")]
    CalendarUnavailable {
        season: SeasonId,
        competition: CompetitionId,
        source: FeedError,
    },

    /// Persistence layer failure; fatal for the current call.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The local outbox could not be opened while wiring services.
    #[error("outbox unavailable: {0}")]
    Outbox(#[from] SinkError),

    /// Configuration could not be loaded while wiring services.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub(crate) fn from_feed(entity: &EntityId, err: FeedError) -> Self {
        match err {
            FeedError::Unavailable(reason) => SyncError::FeedUnavailable {
                entity: entity.clone(),
                reason,
            },
            FeedError::Malformed(reason) => SyncError::FeedMalformed {
                entity: entity.clone(),
                reason,
            },
        }
    }

    pub(crate) fn from_schema(entity: &EntityId, err: SchemaError) -> Self {
        SyncError::FeedMalformed {
            entity: entity.clone(),
            reason: err.to_string(),
        }
    }

    /// Errors confined to one entity: batch loops log these and move on.
    pub fn is_entity_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::FeedUnavailable { .. } | SyncError::FeedMalformed { .. }
        )
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SinkError::Io`].
pub(crate) fn sink_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SinkError {
    SinkError::Io {
        path: path.into(),
        source,
    }
}
