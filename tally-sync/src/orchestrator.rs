//! Per-game sync: fetch, classify, reconcile, deliver.
//!
//! A sync call walks `NOT_FETCHED -> FETCHED -> {CREATED | UPDATED | UNCHANGED}`.
//! Classification compares the game checksum (over its player stats) with
//! the checksum last acknowledged downstream, kept in the `acks` collection.
//! Record-level reconciliation runs on every call regardless of the
//! classification.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use tally_core::schema::catalog;
use tally_core::types::format_timestamp;
use tally_core::{EntityId, Sport, SyncStatus, WritePolicy};

use crate::error::{StoreError, SyncError};
use crate::feed::FeedProvider;
use crate::fingerprint::aggregate_checksum;
use crate::outbox::{AckMessage, DatastoreBatch, DatastoreSink, EventChannel, Meta, SyncMessage};
use crate::payload::{self, Referential};
use crate::recon_store::ReconciliationStore;
use crate::reconciler::DeltaReconciler;
use crate::record::Record;
use crate::store::DocumentStore;

/// Collection holding `{id, checksum, acked_at}` per acknowledged game.
pub const ACKS: &str = "acks";

/// Outcome of one sync call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub id: EntityId,
    pub sport: Sport,
    pub status: SyncStatus,
    pub checksum: String,
    pub referential: Referential,
    pub datastore: Vec<DatastoreBatch>,
}

impl SyncResult {
    /// Whether any stored record was inserted, updated or deleted.
    pub fn has_changed(&self) -> bool {
        self.datastore.iter().any(|b| b.delta.has_changed())
    }

    pub fn message(&self, source: &str) -> SyncMessage {
        SyncMessage {
            id: self.id.clone(),
            status: self.status,
            checksum: self.checksum.clone(),
            referential: self.referential.clone(),
            datastore: self.datastore.clone(),
            meta: Meta {
                kind: self.sport.feed().to_string(),
                source: source.to_string(),
            },
        }
    }
}

/// Checksum of a game: player-stat fingerprints ordered by record key.
pub fn entity_checksum(player_stats: &[Record]) -> String {
    aggregate_checksum(
        player_stats,
        |r| r.key().to_string(),
        |r| r.fingerprint().to_string(),
    )
}

pub struct SyncOrchestrator {
    feed: Arc<dyn FeedProvider>,
    store: Arc<dyn DocumentStore>,
    recon: ReconciliationStore,
    sink: Option<Arc<dyn DatastoreSink>>,
    channel: Option<Arc<dyn EventChannel>>,
    source: String,
}

impl SyncOrchestrator {
    pub fn new(feed: Arc<dyn FeedProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            feed,
            recon: ReconciliationStore::new(Arc::clone(&store)),
            store,
            sink: None,
            channel: None,
            source: "tally".to_string(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DatastoreSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn EventChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Value of `meta.source` on published messages.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn recon_store(&self) -> &ReconciliationStore {
        &self.recon
    }

    /// Sync one game. `Ok(None)` when the feed has not finished publishing it.
    pub fn sync(&self, id: &EntityId) -> Result<Option<SyncResult>, SyncError> {
        let ready = self
            .feed
            .is_ready(id)
            .map_err(|e| SyncError::from_feed(id, e))?;
        if !ready {
            debug!("{id}: not ready");
            return Ok(None);
        }

        let payload = self
            .feed
            .fetch(id)
            .map_err(|e| SyncError::from_feed(id, e))?;
        if payload.id != *id {
            return Err(SyncError::FeedMalformed {
                entity: id.clone(),
                reason: format!("payload is for game {}", payload.id),
            });
        }
        let game = payload::build(&payload).map_err(|e| SyncError::from_schema(id, e))?;

        let checksum = entity_checksum(game.player_stats());
        let status = match self.acknowledged(id)? {
            None => SyncStatus::Created,
            Some(acked) if acked != checksum => SyncStatus::Updated,
            Some(_) => SyncStatus::Unchanged,
        };

        let reconciler = match &self.sink {
            Some(sink) => DeltaReconciler::new(&self.recon).with_sink(sink.as_ref()),
            None => DeltaReconciler::new(&self.recon),
        };

        // Read phase for every kind before any write.
        let mut plans = Vec::with_capacity(game.batches.len());
        for batch in game.batches {
            self.recon.ensure_indexes(batch.kind())?;
            plans.push(reconciler.plan(batch)?);
        }

        let mut datastore = Vec::with_capacity(plans.len());
        for plan in &plans {
            let delta = reconciler.apply(plan)?;
            let batch = plan.batch();
            let full_set = status != SyncStatus::Unchanged
                || (batch.kind().write_policy == WritePolicy::DeleteBulkInsert
                    && delta.has_changed());
            let records: Vec<&Record> = if full_set {
                batch.records().iter().collect()
            } else {
                plan.changed_records().collect()
            };
            datastore.push(DatastoreBatch::new(
                batch.kind(),
                batch.scope(),
                records,
                delta,
            ));
        }

        let result = SyncResult {
            id: id.clone(),
            sport: game.sport,
            status,
            checksum,
            referential: game.referential,
            datastore,
        };
        info!("{id}: {} checksum={}", result.status, result.checksum);
        self.deliver(&result);
        Ok(Some(result))
    }

    /// Hand the result to the datastore sink and, for CREATED and UPDATED,
    /// publish it. Failures are logged; the missing ack makes the next pass
    /// classify the game again.
    fn deliver(&self, result: &SyncResult) {
        if let Some(sink) = &self.sink {
            let batches = result
                .datastore
                .iter()
                .filter(|b| result.status != SyncStatus::Unchanged || b.delta.has_changed());
            for batch in batches {
                if let Err(e) = sink.write(batch) {
                    warn!("{}: datastore write to {} failed: {e}", result.id, batch.target_table);
                }
            }
        }
        if result.status == SyncStatus::Unchanged {
            return;
        }
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.publish(&result.message(&self.source)) {
                warn!("{}: publish failed: {e}", result.id);
            }
        }
    }

    /// Last checksum confirmed downstream for a game.
    pub fn acknowledged(&self, id: &EntityId) -> Result<Option<String>, StoreError> {
        let Some(doc) = self.store.find_one(ACKS, &id.0)? else {
            return Ok(None);
        };
        match doc.get("checksum").and_then(Value::as_str) {
            Some(checksum) => Ok(Some(checksum.to_string())),
            None => Err(StoreError::Corrupt {
                collection: ACKS.to_string(),
                key: id.0.clone(),
                reason: "missing checksum".to_string(),
            }),
        }
    }

    /// Record `checksum` as durably received downstream.
    pub fn acknowledge(&self, id: &EntityId, checksum: &str) -> Result<(), StoreError> {
        let mut doc = Map::new();
        doc.insert("id".into(), Value::String(id.0.clone()));
        doc.insert("checksum".into(), Value::String(checksum.to_string()));
        doc.insert("acked_at".into(), Value::String(format_timestamp(&Utc::now())));
        self.store.upsert(ACKS, &id.0, doc)?;
        info!("{id}: acknowledged {checksum}");
        Ok(())
    }

    /// Forget the acknowledged checksum so the next sync reclassifies the game.
    /// Returns whether an acknowledgment existed.
    pub fn unacknowledge(&self, id: &EntityId) -> Result<bool, StoreError> {
        let removed = self.store.delete(ACKS, &id.0)?;
        info!("{id}: unacknowledged (existed: {removed})");
        Ok(removed)
    }

    /// Sport a game was last synced as, from its stored match info.
    pub fn synced_sport(&self, id: &EntityId) -> Result<Option<Sport>, StoreError> {
        for sport in Sport::ALL {
            if self
                .recon
                .get_fingerprint(catalog(sport).match_info, &id.0)?
                .is_some()
            {
                return Ok(Some(sport));
            }
        }
        Ok(None)
    }

    /// Apply a downstream acknowledgment. `meta.type` must name a known feed
    /// and, once the game has been synced, the feed it came from.
    pub fn handle_ack(&self, message: &AckMessage) -> Result<(), SyncError> {
        let id = &message.id;
        let kind = message.meta.kind.as_str();
        let reject = |reason: String| {
            warn!("{id}: ack from {} rejected: {reason}", message.meta.source);
            Err(SyncError::AckRejected {
                entity: id.clone(),
                reason,
            })
        };

        let Some(claimed) = Sport::from_feed(kind) else {
            return reject(format!("unknown feed type '{kind}'"));
        };
        match self.synced_sport(id)? {
            Some(sport) if sport != claimed => {
                return reject(format!(
                    "game was synced from {} ({sport}), ack names '{kind}'",
                    sport.feed()
                ));
            }
            Some(_) => {}
            None => debug!("{id}: ack before any stored match info"),
        }

        debug!("ack for {id} from {} ({kind})", message.meta.source);
        self.acknowledge(id, &message.checksum)?;
        Ok(())
    }
}
