//! Keyed, fingerprinted records.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use tally_core::types::format_timestamp;
use tally_core::{FieldValue, KeySpec, KindSpec, Row, SchemaError};

use crate::fingerprint::{digest_parts, fingerprint};

/// A validated row together with its record key, parent scope and fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    key: String,
    scope: Option<String>,
    fingerprint: String,
    row: Row,
}

impl Record {
    /// Derive key, scope and fingerprint from a typed row.
    ///
    /// Natural keys must be non-null. Digest keys hash the canonical text of
    /// their fields (null as empty). The fingerprint covers every column
    /// except a natural key column.
    pub fn from_row(row: Row) -> Result<Self, SchemaError> {
        let kind = row.kind();
        let key = match kind.key {
            KeySpec::Column(field) => row.text(field).ok_or(SchemaError::MissingKey {
                kind: kind.name,
                field,
            })?,
            KeySpec::Digest(fields) => digest_parts(
                fields
                    .iter()
                    .map(|f| row.get(f).map(ToString::to_string).unwrap_or_default()),
            ),
        };
        let scope = kind.scope.and_then(|field| row.text(field));
        let key_column = kind.key_column();
        let fingerprint = fingerprint(
            row.iter()
                .filter(|(name, _)| Some(*name) != key_column)
                .map(|(_, value)| value),
        );
        Ok(Self {
            key,
            scope,
            fingerprint,
            row,
        })
    }

    /// Coerce a raw feed object and derive its record in one step.
    pub fn from_raw(kind: &'static KindSpec, raw: &Value) -> Result<Self, SchemaError> {
        Self::from_row(kind.coerce(raw)?)
    }

    pub fn kind(&self) -> &'static KindSpec {
        self.row.kind()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.row.get(field)
    }

    /// Column values as a JSON object, in schema order.
    pub fn to_json(&self) -> Map<String, Value> {
        self.row.to_json()
    }

    /// Reconciliation document persisted under the record key.
    pub fn to_document(&self, synced_at: DateTime<Utc>) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("key".into(), Value::String(self.key.clone()));
        doc.insert("fingerprint".into(), Value::String(self.fingerprint.clone()));
        doc.insert(
            "scope".into(),
            self.scope.clone().map(Value::String).unwrap_or(Value::Null),
        );
        doc.insert("synced_at".into(), Value::String(format_timestamp(&synced_at)));
        doc.insert("record".into(), Value::Object(self.to_json()));
        doc
    }
}
