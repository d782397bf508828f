//! # tally-sync
//!
//! Fingerprint-gated incremental sync of match feeds.
//!
//! Call [`SyncOrchestrator::sync`] to fetch, classify and reconcile a single
//! game, or [`pipeline::run`] to process every game of a [`SyncScope`].
//! Persistence goes through the [`DocumentStore`] seam; the feed, the
//! downstream datastore and the event channel are the [`FeedProvider`],
//! [`DatastoreSink`] and [`EventChannel`] traits.

pub mod calendar;
pub mod error;
pub mod feed;
pub mod fingerprint;
pub mod orchestrator;
pub mod outbox;
pub mod payload;
pub mod pipeline;
pub mod recon_store;
pub mod reconciler;
pub mod record;
pub mod store;

pub use calendar::{CalendarReport, CalendarService};
pub use error::{FeedError, SinkError, StoreError, SyncError};
pub use feed::{CalendarEntry, DirectoryFeed, FeedProvider, GamePayload, RefEntry};
pub use orchestrator::{SyncOrchestrator, SyncResult};
pub use outbox::{
    AckMessage, DatastoreBatch, DatastoreSink, EventChannel, JsonLinesOutbox, MemoryOutbox, Meta,
    SyncMessage,
};
pub use payload::Referential;
pub use pipeline::{BatchReport, Services, SyncScope};
pub use recon_store::ReconciliationStore;
pub use reconciler::{Delta, DeltaReconciler, RecordBatch};
pub use record::Record;
pub use store::{DocumentStore, FileStore, Filter, MemoryStore};
