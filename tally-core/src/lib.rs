//! Tally core library: domain types, record-kind catalog, configuration.
//!
//! - [`types`]: newtypes, field values, policies
//! - [`schema`]: static record-kind catalog and boundary validation
//! - [`config`]: `~/.tally/config.yaml` load / save
//! - [`error`]: [`SchemaError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod schema;
pub mod types;

pub use config::{Config, SyncSettings};
pub use error::{ConfigError, SchemaError};
pub use schema::{catalog, KeySpec, KindSpec, Row, SportCatalog, LABEL};
pub use types::{
    CompetitionId, EntityId, FieldType, FieldValue, SeasonId, Sport, SyncStatus, WritePolicy,
};
