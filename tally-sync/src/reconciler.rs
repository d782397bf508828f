//! Per-kind delta reconciliation against the [`ReconciliationStore`].
//!
//! Reconciliation is split in two phases. [`DeltaReconciler::plan`] only
//! reads: it looks up every stored fingerprint and, for full-set kinds, the
//! keys currently held under the batch's scope. [`DeltaReconciler::apply`]
//! then writes: deletions first, then inserts and updates. Callers plan every
//! batch of an entity before applying any of them, so a failure while
//! planning leaves the store untouched.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use tally_core::{KeySpec, KindSpec, SchemaError, WritePolicy};

use crate::error::StoreError;
use crate::outbox::DatastoreSink;
use crate::recon_store::ReconciliationStore;
use crate::record::Record;

// ---------------------------------------------------------------------------
// RecordBatch
// ---------------------------------------------------------------------------

/// The current records of one kind for one parent scope.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    kind: &'static KindSpec,
    scope: Option<String>,
    records: Vec<Record>,
}

impl RecordBatch {
    /// Validate and de-duplicate a batch.
    ///
    /// Every record must be of `kind`. Full-set kinds need a scope and every
    /// record must carry that same scope. A key seen twice keeps the last
    /// record, at the position of the first.
    pub fn new(
        kind: &'static KindSpec,
        scope: Option<String>,
        records: Vec<Record>,
    ) -> Result<Self, SchemaError> {
        if let Some(field) = kind.scope {
            let Some(expected) = scope.as_deref() else {
                return Err(SchemaError::MissingKey {
                    kind: kind.name,
                    field,
                });
            };
            if let Some(stray) = records.iter().find(|r| r.scope() != Some(expected)) {
                return Err(SchemaError::ScopeMismatch {
                    kind: kind.name,
                    expected: expected.to_string(),
                    found: stray.scope().unwrap_or_default().to_string(),
                });
            }
        }

        let mut position: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<Record> = Vec::with_capacity(records.len());
        for record in records {
            if record.kind() != kind {
                return Err(SchemaError::WrongKind {
                    expected: kind.name,
                    found: record.kind().name,
                });
            }
            match position.get(record.key()) {
                Some(&i) => unique[i] = record,
                None => {
                    position.insert(record.key().to_string(), unique.len());
                    unique.push(record);
                }
            }
        }

        Ok(Self {
            kind,
            scope,
            records: unique,
        })
    }

    pub fn kind(&self) -> &'static KindSpec {
        self.kind
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// Keys affected by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
}

impl Delta {
    pub fn has_changed(&self) -> bool {
        !(self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }
}

/// A stored record absent from the current batch.
#[derive(Debug, Clone)]
struct Removal {
    key: String,
    /// Key column values identifying the downstream row.
    columns: Map<String, Value>,
}

/// Outcome of the read phase for one batch.
#[derive(Debug, Clone)]
pub struct Plan {
    batch: RecordBatch,
    to_delete: Vec<Removal>,
    inserts: Vec<usize>,
    updates: Vec<usize>,
}

impl Plan {
    pub fn kind(&self) -> &'static KindSpec {
        self.batch.kind
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Inserted and updated records, in batch order.
    pub fn changed_records(&self) -> impl Iterator<Item = &Record> + '_ {
        let mut indices: Vec<usize> = self.inserts.iter().chain(&self.updates).copied().collect();
        indices.sort_unstable();
        indices.into_iter().map(move |i| &self.batch.records[i])
    }

    pub fn delta(&self) -> Delta {
        let keys = |indices: &[usize]| -> Vec<String> {
            indices
                .iter()
                .map(|&i| self.batch.records[i].key().to_string())
                .collect()
        };
        Delta {
            inserted: keys(&self.inserts),
            updated: keys(&self.updates),
            deleted: self.to_delete.iter().map(|r| r.key.clone()).collect(),
            unchanged: self.batch.records.len() - self.inserts.len() - self.updates.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// DeltaReconciler
// ---------------------------------------------------------------------------

pub struct DeltaReconciler<'a> {
    store: &'a ReconciliationStore,
    sink: Option<&'a dyn DatastoreSink>,
}

impl<'a> DeltaReconciler<'a> {
    pub fn new(store: &'a ReconciliationStore) -> Self {
        Self { store, sink: None }
    }

    /// Signal each deleted row to the downstream datastore by its key columns.
    pub fn with_sink(mut self, sink: &'a dyn DatastoreSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Classify every record of the batch without writing.
    pub fn plan(&self, batch: RecordBatch) -> Result<Plan, StoreError> {
        let kind = batch.kind;
        let to_delete = match (kind.write_policy, batch.scope()) {
            (WritePolicy::DeleteBulkInsert, Some(scope)) => {
                let current: BTreeSet<&str> = batch.records.iter().map(Record::key).collect();
                self.store
                    .scoped_records(kind, scope)?
                    .into_iter()
                    .filter(|(key, _)| !current.contains(key.as_str()))
                    .map(|(key, stored)| Removal {
                        columns: key_columns(kind, &key, &stored),
                        key,
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for (i, record) in batch.records.iter().enumerate() {
            match self.store.get_fingerprint(kind, record.key())? {
                None => inserts.push(i),
                Some(stored) if stored != record.fingerprint() => updates.push(i),
                Some(_) => debug!("{} {} unchanged", kind.target_table, record.key()),
            }
        }

        Ok(Plan {
            batch,
            to_delete,
            inserts,
            updates,
        })
    }

    /// Write a plan: deletions first, then inserts and updates.
    pub fn apply(&self, plan: &Plan) -> Result<Delta, StoreError> {
        let kind = plan.kind();
        for removal in &plan.to_delete {
            let key = &removal.key;
            self.store.delete(kind, key)?;
            if let Some(sink) = self.sink {
                if let Err(e) = sink.delete(kind.target_table, &removal.columns) {
                    warn!("datastore delete {} {key} failed: {e}", kind.target_table);
                }
            }
        }
        for record in plan.changed_records() {
            self.store.upsert(record)?;
        }

        let delta = plan.delta();
        if delta.has_changed() {
            info!(
                "{}{}: +{} ~{} -{} ={}",
                kind.target_table,
                plan.batch.scope().map(|s| format!("[{s}]")).unwrap_or_default(),
                delta.inserted.len(),
                delta.updated.len(),
                delta.deleted.len(),
                delta.unchanged,
            );
        }
        Ok(delta)
    }

    /// Plan and apply a single batch.
    pub fn reconcile(&self, batch: RecordBatch) -> Result<Delta, StoreError> {
        let plan = self.plan(batch)?;
        self.apply(&plan)
    }
}

/// Downstream identity of a stored row: its natural key column, or the
/// columns its digest key is computed from.
fn key_columns(kind: &KindSpec, key: &str, stored: &Map<String, Value>) -> Map<String, Value> {
    match kind.key {
        KeySpec::Column(column) => {
            let mut columns = Map::new();
            columns.insert(column.to_string(), Value::String(key.to_string()));
            columns
        }
        KeySpec::Digest(fields) => fields
            .iter()
            .map(|field| {
                let value = stored.get(*field).cloned().unwrap_or(Value::Null);
                (field.to_string(), value)
            })
            .collect(),
    }
}
