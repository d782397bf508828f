//! Downstream collaborators: the datastore sink and the event channel.
//!
//! [`MemoryOutbox`] records everything it receives. [`JsonLinesOutbox`]
//! appends one JSON object per line to `datastore.jsonl` and
//! `messages.jsonl` under its directory.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tally_core::{EntityId, KindSpec, SyncStatus, WritePolicy};

use crate::error::{sink_io_err, SinkError};
use crate::payload::Referential;
use crate::reconciler::Delta;
use crate::record::Record;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Classified records of one kind, tagged with their target metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreBatch {
    pub target_table: String,
    pub write_policy: WritePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_keys: Option<BTreeMap<String, String>>,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    pub records: Vec<Map<String, Value>>,
    pub delta: Delta,
}

impl DatastoreBatch {
    /// Batch for `kind` carrying `records`. Full-set kinds are keyed for
    /// deletion by their scope field and `scope`.
    pub fn new<'r>(
        kind: &KindSpec,
        scope: Option<&str>,
        records: impl IntoIterator<Item = &'r Record>,
        delta: Delta,
    ) -> Self {
        let (upsert_key, delete_keys) = match kind.write_policy {
            WritePolicy::Upsert => (kind.key_column().map(str::to_string), None),
            WritePolicy::DeleteBulkInsert => {
                let keys = kind
                    .scope
                    .zip(scope)
                    .map(|(field, value)| BTreeMap::from([(field.to_string(), value.to_string())]));
                (None, keys)
            }
        };
        Self {
            target_table: kind.target_table.to_string(),
            write_policy: kind.write_policy,
            upsert_key,
            delete_keys,
            columns: kind
                .column_schema()
                .into_iter()
                .map(|(name, ty)| ColumnDef { name, ty })
                .collect(),
            chunk_size: kind.chunk_size,
            records: records.into_iter().map(Record::to_json).collect(),
            delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Feed family, e.g. `f9`.
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
}

/// Published once per CREATED or UPDATED sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub id: EntityId,
    pub status: SyncStatus,
    pub checksum: String,
    pub referential: Referential,
    pub datastore: Vec<DatastoreBatch>,
    pub meta: Meta,
}

/// Durable-receipt confirmation from a downstream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub id: EntityId,
    pub checksum: String,
    pub meta: Meta,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait DatastoreSink: Send + Sync {
    /// Remove the row whose key columns equal `columns`.
    fn delete(&self, table: &str, columns: &Map<String, Value>) -> Result<(), SinkError>;
    fn write(&self, batch: &DatastoreBatch) -> Result<(), SinkError>;
}

pub trait EventChannel: Send + Sync {
    fn publish(&self, message: &SyncMessage) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// MemoryOutbox
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Recorded {
    deletes: Vec<(String, Map<String, Value>)>,
    batches: Vec<DatastoreBatch>,
    messages: Vec<SyncMessage>,
}

/// Keeps every delete, batch and message in memory.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    inner: Mutex<Recorded>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `(table, key columns)` pairs, in arrival order.
    pub fn deletes(&self) -> Vec<(String, Map<String, Value>)> {
        self.recorded().deletes.clone()
    }

    pub fn batches(&self) -> Vec<DatastoreBatch> {
        self.recorded().batches.clone()
    }

    pub fn messages(&self) -> Vec<SyncMessage> {
        self.recorded().messages.clone()
    }

    pub fn clear(&self) {
        let mut recorded = self.recorded();
        *recorded = Recorded::default();
    }
}

impl DatastoreSink for MemoryOutbox {
    fn delete(&self, table: &str, columns: &Map<String, Value>) -> Result<(), SinkError> {
        self.recorded()
            .deletes
            .push((table.to_string(), columns.clone()));
        Ok(())
    }

    fn write(&self, batch: &DatastoreBatch) -> Result<(), SinkError> {
        self.recorded().batches.push(batch.clone());
        Ok(())
    }
}

impl EventChannel for MemoryOutbox {
    fn publish(&self, message: &SyncMessage) -> Result<(), SinkError> {
        self.recorded().messages.push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonLinesOutbox
// ---------------------------------------------------------------------------

/// One line of `datastore.jsonl`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DatastoreOp {
    Delete {
        table: String,
        columns: Map<String, Value>,
    },
    Write { batch: DatastoreBatch },
}

#[derive(Debug)]
pub struct JsonLinesOutbox {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesOutbox {
    pub const DATASTORE_FILE: &'static str = "datastore.jsonl";
    pub const MESSAGES_FILE: &'static str = "messages.jsonl";

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| sink_io_err(&dir, e))?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append<T: Serialize>(&self, file: &str, value: &T) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let path = self.dir.join(file);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| sink_io_err(&path, e))?;
        handle
            .write_all(line.as_bytes())
            .map_err(|e| sink_io_err(&path, e))
    }
}

impl DatastoreSink for JsonLinesOutbox {
    fn delete(&self, table: &str, columns: &Map<String, Value>) -> Result<(), SinkError> {
        self.append(
            Self::DATASTORE_FILE,
            &DatastoreOp::Delete {
                table: table.to_string(),
                columns: columns.clone(),
            },
        )
    }

    fn write(&self, batch: &DatastoreBatch) -> Result<(), SinkError> {
        self.append(
            Self::DATASTORE_FILE,
            &DatastoreOp::Write {
                batch: batch.clone(),
            },
        )
    }
}

impl EventChannel for JsonLinesOutbox {
    fn publish(&self, message: &SyncMessage) -> Result<(), SinkError> {
        self.append(Self::MESSAGES_FILE, message)
    }
}
