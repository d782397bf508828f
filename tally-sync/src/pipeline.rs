//! Shared batch-sync entrypoint used by the CLI and the daemon.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tally_core::{CompetitionId, Config, EntityId, SeasonId, SyncSettings, SyncStatus};

use crate::calendar::CalendarService;
use crate::error::{StoreError, SyncError};
use crate::feed::{DirectoryFeed, FeedProvider};
use crate::orchestrator::{SyncOrchestrator, SyncResult};
use crate::outbox::{DatastoreSink, EventChannel, JsonLinesOutbox};
use crate::store::{DocumentStore, FileStore};

/// Collaborators wired together for one process.
#[derive(Clone)]
pub struct Services {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub calendar: CalendarService,
    pub settings: SyncSettings,
}

impl Services {
    pub fn new(
        feed: Arc<dyn FeedProvider>,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn DatastoreSink>,
        channel: Arc<dyn EventChannel>,
        source: &str,
        settings: SyncSettings,
    ) -> Self {
        let orchestrator = SyncOrchestrator::new(Arc::clone(&feed), Arc::clone(&store))
            .with_sink(sink)
            .with_channel(channel)
            .with_source(source);
        Self {
            orchestrator: Arc::new(orchestrator),
            calendar: CalendarService::new(feed, store),
            settings,
        }
    }

    /// File-backed store, directory feed and JSON-lines outbox as configured.
    pub fn open(config: &Config, home: &Path) -> Result<Self, SyncError> {
        let feed = Arc::new(DirectoryFeed::new(config.feed_dir_at(home)?));
        let store = Arc::new(FileStore::open(config.store_dir_at(home))?);
        let outbox = Arc::new(JsonLinesOutbox::open(config.outbox_dir_at(home))?);
        Ok(Self::new(
            feed,
            store,
            outbox.clone(),
            outbox,
            &config.source,
            config.sync.clone(),
        ))
    }

    pub fn lookback(&self) -> Duration {
        Duration::hours(self.settings.lookback_hours)
    }

    pub fn lookahead(&self) -> Duration {
        Duration::hours(self.settings.lookahead_hours)
    }

    /// Games due for a sync at `now`.
    pub fn due_ids(&self, now: DateTime<Utc>) -> Result<Vec<EntityId>, StoreError> {
        self.calendar.due_ids(now, self.lookback(), self.lookahead())
    }
}

/// Which games a pipeline run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// One game.
    Entity(EntityId),
    /// Every game whose kickoff falls in the configured window around `now`.
    Due { now: DateTime<Utc> },
    /// Every game of one season calendar.
    Season {
        season: SeasonId,
        competition: CompetitionId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedEntity {
    pub id: EntityId,
    pub status: SyncStatus,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntity {
    pub id: EntityId,
    pub reason: String,
}

/// Per-entity outcomes of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub synced: Vec<SyncedEntity>,
    pub not_ready: Vec<EntityId>,
    pub failed: Vec<FailedEntity>,
}

impl BatchReport {
    /// Fold one sync outcome in. Entity-scoped failures are logged and kept;
    /// anything else is returned to the caller.
    pub fn record(
        &mut self,
        id: &EntityId,
        outcome: Result<Option<SyncResult>, SyncError>,
    ) -> Result<(), SyncError> {
        match outcome {
            Ok(Some(result)) => self.synced.push(SyncedEntity {
                id: result.id,
                status: result.status,
                checksum: result.checksum,
            }),
            Ok(None) => {
                debug!("{id}: not ready, skipped");
                self.not_ready.push(id.clone());
            }
            Err(e) if e.is_entity_scoped() => {
                warn!("{id}: skipped: {e}");
                self.failed.push(FailedEntity {
                    id: id.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    pub fn count(&self, status: SyncStatus) -> usize {
        self.synced.iter().filter(|s| s.status == status).count()
    }

    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.not_ready.is_empty() && self.failed.is_empty()
    }
}

/// Games a scope resolves to.
pub fn resolve(services: &Services, scope: &SyncScope) -> Result<Vec<EntityId>, StoreError> {
    match scope {
        SyncScope::Entity(id) => Ok(vec![id.clone()]),
        SyncScope::Due { now } => services.due_ids(*now),
        SyncScope::Season {
            season,
            competition,
        } => services
            .calendar
            .list_ids_by_season_competition(season, competition),
    }
}

/// Sync every game of a scope, one after another.
pub fn run(services: &Services, scope: SyncScope) -> Result<BatchReport, SyncError> {
    let mut report = BatchReport::default();
    for id in resolve(services, &scope)? {
        let outcome = services.orchestrator.sync(&id);
        report.record(&id, outcome)?;
    }
    Ok(report)
}
