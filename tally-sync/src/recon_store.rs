//! Last-seen fingerprint per record, one collection per record kind.
//!
//! Documents live in the collection named after the kind's target table,
//! keyed by record key:
//!
//! ```json
//! {"key": "...", "fingerprint": "<sha256 hex>", "scope": "<match id>|null",
//!  "synced_at": "2015-08-08T14:00:00Z", "record": {...}}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use tally_core::KindSpec;

use crate::error::StoreError;
use crate::record::Record;
use crate::store::{DocumentStore, Filter};

const SCOPE_FIELD: &str = "scope";

#[derive(Clone)]
pub struct ReconciliationStore {
    store: Arc<dyn DocumentStore>,
}

impl ReconciliationStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Index the scope field of full-set kinds.
    pub fn ensure_indexes(&self, kind: &KindSpec) -> Result<(), StoreError> {
        if kind.scope.is_some() {
            self.store.create_index(kind.target_table, SCOPE_FIELD)?;
        }
        Ok(())
    }

    pub fn get_fingerprint(&self, kind: &KindSpec, key: &str) -> Result<Option<String>, StoreError> {
        let Some(doc) = self.store.find_one(kind.target_table, key)? else {
            return Ok(None);
        };
        match doc.get("fingerprint").and_then(|v| v.as_str()) {
            Some(fp) => Ok(Some(fp.to_string())),
            None => Err(StoreError::Corrupt {
                collection: kind.target_table.to_string(),
                key: key.to_string(),
                reason: "missing fingerprint".to_string(),
            }),
        }
    }

    /// Insert or replace by record key. Repeating the call is harmless.
    pub fn upsert(&self, record: &Record) -> Result<(), StoreError> {
        self.store.upsert(
            record.kind().target_table,
            record.key(),
            record.to_document(Utc::now()),
        )
    }

    /// Every key currently stored under `scope`.
    pub fn scoped_keys(&self, kind: &KindSpec, scope: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .store
            .find(kind.target_table, &Filter::eq(SCOPE_FIELD, scope))?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Stored column values of every record under `scope`, by key.
    pub fn scoped_records(
        &self,
        kind: &KindSpec,
        scope: &str,
    ) -> Result<BTreeMap<String, Map<String, Value>>, StoreError> {
        Ok(self
            .store
            .find(kind.target_table, &Filter::eq(SCOPE_FIELD, scope))?
            .into_iter()
            .map(|(key, mut doc)| {
                let record = match doc.remove("record") {
                    Some(Value::Object(record)) => record,
                    _ => Map::new(),
                };
                (key, record)
            })
            .collect())
    }

    pub fn delete(&self, kind: &KindSpec, key: &str) -> Result<bool, StoreError> {
        self.store.delete(kind.target_table, key)
    }

    /// Number of stored records of a kind.
    pub fn count(&self, kind: &KindSpec) -> Result<usize, StoreError> {
        Ok(self.store.find(kind.target_table, &Filter::All)?.len())
    }
}
