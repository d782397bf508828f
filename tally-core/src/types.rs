//! Domain types shared by the sync engine, daemon, and CLI.
//!
//! Field values are kept as a closed enum so every record that reaches the
//! reconciliation layer has already been validated against its kind's schema.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of one external fixture ("game") as issued by the feed provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Season identifier, e.g. `2015`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeasonId(pub String);

impl fmt::Display for SeasonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SeasonId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SeasonId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Competition identifier, e.g. `24`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompetitionId(pub String);

impl fmt::Display for CompetitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CompetitionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CompetitionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Sport covered by a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    #[default]
    Soccer,
    Rugby,
}

impl Sport {
    pub const ALL: [Sport; 2] = [Sport::Soccer, Sport::Rugby];

    /// Feed family the sport's match documents come from.
    pub fn feed(self) -> &'static str {
        match self {
            Sport::Soccer => "f9",
            Sport::Rugby => "ru7",
        }
    }

    pub fn from_feed(feed: &str) -> Option<Sport> {
        Sport::ALL.into_iter().find(|sport| sport.feed() == feed)
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sport::Soccer => write!(f, "soccer"),
            Sport::Rugby => write!(f, "rugby"),
        }
    }
}

/// How a record kind is written downstream and reconciled locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Identity by record key; records are never deleted.
    Upsert,
    /// Full-set reconciliation per parent scope; absent keys are deleted.
    DeleteBulkInsert,
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePolicy::Upsert => write!(f, "upsert"),
            WritePolicy::DeleteBulkInsert => write!(f, "delete_bulk_insert"),
        }
    }
}

/// Whole-entity classification produced by a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Created => write!(f, "CREATED"),
            SyncStatus::Updated => write!(f, "UPDATED"),
            SyncStatus::Unchanged => write!(f, "UNCHANGED"),
        }
    }
}

/// Semantic column type. Renders as the SQL type the downstream datastore uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Varchar(u16),
    Integer,
    Float,
    Timestamp,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Varchar(len) => write!(f, "VARCHAR({len})"),
            FieldType::Integer => write!(f, "INTEGER"),
            FieldType::Float => write!(f, "FLOAT"),
            FieldType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// A validated scalar value of one record field.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// JSON representation used in stored documents and downstream batches.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(x) => serde_json::Number::from_f64(*x)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Timestamp(ts) => Value::String(format_timestamp(ts)),
        }
    }
}

/// Canonical text form. Null renders as the empty string.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Timestamp(ts) => f.write_str(&format_timestamp(ts)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(ts)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// RFC 3339, UTC, second precision, `Z` suffix. Lexicographic order matches
/// chronological order, which the calendar range queries rely on.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn newtype_display() {
        assert_eq!(EntityId::from("805305").to_string(), "805305");
        assert_eq!(SeasonId::from("2015").to_string(), "2015");
        assert_eq!(CompetitionId::from("24").to_string(), "24");
    }

    #[test]
    fn null_renders_empty() {
        assert_eq!(FieldValue::Null.to_string(), "");
        assert_eq!(FieldValue::Null.to_json(), Value::Null);
    }

    #[test]
    fn timestamp_text_form_is_utc_seconds() {
        let ts = Utc.with_ymd_and_hms(2015, 8, 8, 14, 0, 0).unwrap();
        assert_eq!(FieldValue::from(ts).to_string(), "2015-08-08T14:00:00Z");
    }

    #[test]
    fn numbers_render_without_padding() {
        assert_eq!(FieldValue::Int(16).to_string(), "16");
        assert_eq!(FieldValue::Float(0.5).to_string(), "0.5");
        assert_eq!(FieldValue::Float(16.0).to_string(), "16");
    }

    #[test]
    fn feeds_map_back_to_sports() {
        for sport in Sport::ALL {
            assert_eq!(Sport::from_feed(sport.feed()), Some(sport));
        }
        assert_eq!(Sport::from_feed("f24"), None);
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&SyncStatus::Unchanged).unwrap();
        assert_eq!(json, "\"UNCHANGED\"");
        let policy = serde_json::to_string(&WritePolicy::DeleteBulkInsert).unwrap();
        assert_eq!(policy, "\"delete_bulk_insert\"");
    }

    #[test]
    fn field_type_renders_sql() {
        assert_eq!(FieldType::Varchar(10).to_string(), "VARCHAR(10)");
        assert_eq!(FieldType::Timestamp.to_string(), "TIMESTAMP");
    }
}
