//! Record-kind catalog and boundary validation.
//!
//! Every kind the engine reconciles is described by a static [`KindSpec`]:
//! its downstream table, write policy, ordered column schema, how its record
//! key is obtained, and (for full-set kinds) which column holds the parent
//! scope. Raw feed objects become typed [`Row`]s through [`KindSpec::coerce`],
//! which is the only place dynamic JSON is interpreted.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::types::{FieldType, FieldValue, Sport, WritePolicy};

// ---------------------------------------------------------------------------
// Kind description
// ---------------------------------------------------------------------------

/// One named, typed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: FieldType,
}

const fn varchar(name: &'static str, len: u16) -> Column {
    Column {
        name,
        ty: FieldType::Varchar(len),
    }
}

const fn integer(name: &'static str) -> Column {
    Column {
        name,
        ty: FieldType::Integer,
    }
}

const fn float(name: &'static str) -> Column {
    Column {
        name,
        ty: FieldType::Float,
    }
}

const fn timestamp(name: &'static str) -> Column {
    Column {
        name,
        ty: FieldType::Timestamp,
    }
}

/// How a record's key is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    /// The value of a natural identifier column.
    Column(&'static str),
    /// A digest over the ordered values of these columns.
    Digest(&'static [&'static str]),
}

/// Static description of one record kind.
#[derive(Debug, PartialEq, Eq)]
pub struct KindSpec {
    pub name: &'static str,
    pub target_table: &'static str,
    pub write_policy: WritePolicy,
    pub columns: &'static [Column],
    pub key: KeySpec,
    /// Column holding the parent scope (match id) for full-set kinds.
    pub scope: Option<&'static str>,
    pub chunk_size: Option<usize>,
}

impl KindSpec {
    pub fn position(&self, field: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == field)
    }

    pub fn column(&self, field: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == field)
    }

    /// Name of the key column for natural-key kinds.
    pub fn key_column(&self) -> Option<&'static str> {
        match self.key {
            KeySpec::Column(name) => Some(name),
            KeySpec::Digest(_) => None,
        }
    }

    /// `(name, SQL type)` pairs, in column order, for the downstream schema.
    pub fn column_schema(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .map(|c| (c.name.to_string(), c.ty.to_string()))
            .collect()
    }

    /// Validate a raw feed object into a typed row.
    ///
    /// Missing fields and empty strings become null; fields not in the schema
    /// are ignored.
    pub fn coerce(&'static self, raw: &Value) -> Result<Row, SchemaError> {
        let Value::Object(map) = raw else {
            return Err(SchemaError::NotAnObject {
                kind: self.name,
                found: describe(raw),
            });
        };
        self.coerce_map(map)
    }

    pub fn coerce_map(&'static self, map: &Map<String, Value>) -> Result<Row, SchemaError> {
        let mut values = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            let value = match map.get(column.name) {
                None => FieldValue::Null,
                Some(raw) => coerce_value(self.name, column, raw)?,
            };
            values.push(value);
        }
        Ok(Row { kind: self, values })
    }
}

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// Typed values of one record, aligned with its kind's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    kind: &'static KindSpec,
    values: Vec<FieldValue>,
}

impl Row {
    pub fn kind(&self) -> &'static KindSpec {
        self.kind
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.kind.position(field).map(|i| &self.values[i])
    }

    /// Non-null canonical text of a field.
    pub fn text(&self, field: &str) -> Option<String> {
        self.get(field)
            .filter(|v| !v.is_null())
            .map(ToString::to_string)
    }

    /// Replace a field's value. Returns `false` if the column does not exist.
    pub fn set(&mut self, field: &str, value: FieldValue) -> bool {
        match self.kind.position(field) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> + '_ {
        self.kind
            .columns
            .iter()
            .map(|c| c.name)
            .zip(self.values.iter())
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

fn coerce_value(
    kind: &'static str,
    column: &Column,
    raw: &Value,
) -> Result<FieldValue, SchemaError> {
    let mismatch = || SchemaError::Type {
        kind,
        field: column.name,
        expected: column.ty.to_string(),
        found: describe(raw),
    };

    if raw.is_null() {
        return Ok(FieldValue::Null);
    }
    if let Value::String(s) = raw {
        if s.trim().is_empty() {
            return Ok(FieldValue::Null);
        }
    }

    match column.ty {
        FieldType::Varchar(max) => {
            let text = match raw {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(mismatch()),
            };
            let len = text.chars().count();
            if len > usize::from(max) {
                return Err(SchemaError::TooLong {
                    kind,
                    field: column.name,
                    len,
                    max,
                });
            }
            Ok(FieldValue::Str(text))
        }
        FieldType::Integer => match raw {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral))
                .map(FieldValue::Int)
                .ok_or_else(mismatch),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
                    .map(FieldValue::Int)
                    .ok_or_else(mismatch)
            }
            _ => Err(mismatch()),
        },
        FieldType::Float => match raw {
            Value::Number(n) => n.as_f64().map(FieldValue::Float).ok_or_else(mismatch),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(FieldValue::Float)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        FieldType::Timestamp => match raw {
            Value::String(s) => parse_timestamp(s.trim())
                .map(FieldValue::Timestamp)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
    }
}

fn integral(x: f64) -> Option<i64> {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        Some(x as i64)
    } else {
        None
    }
}

/// RFC 3339 with any offset, or a naive `YYYY-MM-DD[ T]HH:MM:SS` taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Catalog: soccer (f9)
// ---------------------------------------------------------------------------

pub static SOCCER_MATCHINFO: KindSpec = KindSpec {
    name: "matchinfo",
    target_table: "soccer_matchinfo",
    write_policy: WritePolicy::Upsert,
    columns: &[
        varchar("id", 10),
        varchar("competition_id", 10),
        integer("season_id"),
        varchar("type", 20),
        integer("matchday"),
        varchar("weather", 20),
        integer("attendance"),
        varchar("period", 20),
        timestamp("date"),
        varchar("pool", 10),
        varchar("round_name", 50),
        varchar("round_number", 10),
        varchar("venue_id", 10),
        varchar("match_official_id", 10),
        varchar("winner_id", 10),
    ],
    key: KeySpec::Column("id"),
    scope: None,
    chunk_size: None,
};

pub static SOCCER_EVENT: KindSpec = KindSpec {
    name: "event",
    target_table: "soccer_event",
    write_policy: WritePolicy::DeleteBulkInsert,
    columns: &[
        varchar("event_id", 50),
        varchar("competition_id", 10),
        integer("season_id"),
        varchar("match_id", 10),
        varchar("team_id", 10),
        varchar("player_id", 10),
        varchar("type", 50),
        integer("minutes"),
        integer("seconds"),
        varchar("description", 50),
        varchar("detail", 50),
    ],
    key: KeySpec::Column("event_id"),
    scope: Some("match_id"),
    chunk_size: Some(500),
};

pub static SOCCER_TEAMSTAT: KindSpec = KindSpec {
    name: "teamstat",
    target_table: "soccer_teamstat",
    write_policy: WritePolicy::DeleteBulkInsert,
    columns: &[
        varchar("competition_id", 10),
        integer("season_id"),
        varchar("match_id", 10),
        varchar("team_id", 10),
        integer("score"),
        integer("shootout_score"),
        varchar("side", 10),
        varchar("formation_used", 11),
        varchar("official_id", 10),
        varchar("type", 50),
        float("fh"),
        float("sh"),
        float("efh"),
        float("esh"),
        float("value"),
    ],
    key: KeySpec::Digest(&["competition_id", "season_id", "match_id", "team_id", "type"]),
    scope: Some("match_id"),
    chunk_size: Some(500),
};

pub static SOCCER_PLAYERSTAT: KindSpec = KindSpec {
    name: "playerstat",
    target_table: "soccer_playerstat",
    write_policy: WritePolicy::DeleteBulkInsert,
    columns: &[
        varchar("player_id", 10),
        varchar("competition_id", 10),
        integer("season_id"),
        varchar("match_id", 10),
        varchar("team_id", 10),
        integer("score"),
        integer("shootout_score"),
        varchar("side", 10),
        varchar("formation_used", 11),
        varchar("official_id", 10),
        varchar("main_position", 20),
        varchar("sub_position", 20),
        integer("shirt_number"),
        varchar("status", 20),
        varchar("captain", 10),
        varchar("type", 50),
        float("value"),
        varchar("formation_place", 11),
    ],
    key: KeySpec::Digest(&["competition_id", "season_id", "match_id", "player_id", "type"]),
    scope: Some("match_id"),
    chunk_size: Some(500),
};

// ---------------------------------------------------------------------------
// Catalog: rugby (ru7)
// ---------------------------------------------------------------------------

pub static RUGBY_MATCHINFO: KindSpec = KindSpec {
    name: "matchinfo",
    target_table: "rugby_matchinfo",
    write_policy: WritePolicy::Upsert,
    columns: &[
        varchar("id", 10),
        varchar("competition_id", 10),
        varchar("season_id", 10),
        timestamp("date"),
        varchar("venue_id", 10),
        varchar("group_id", 20),
        varchar("group_name", 20),
        varchar("round", 10),
    ],
    key: KeySpec::Column("id"),
    scope: None,
    chunk_size: None,
};

pub static RUGBY_MATCHSCORE: KindSpec = KindSpec {
    name: "matchscore",
    target_table: "rugby_matchscore",
    write_policy: WritePolicy::Upsert,
    columns: &[
        varchar("id", 10),
        integer("attendance"),
        integer("home_ht_score"),
        integer("home_score"),
        integer("away_ht_score"),
        integer("away_score"),
    ],
    key: KeySpec::Column("id"),
    scope: None,
    chunk_size: None,
};

pub static RUGBY_EVENT: KindSpec = KindSpec {
    name: "event",
    target_table: "rugby_event",
    write_policy: WritePolicy::DeleteBulkInsert,
    columns: &[
        varchar("match_id", 10),
        integer("minutes"),
        integer("seconds"),
        varchar("player_id", 10),
        varchar("team_id", 10),
        varchar("type", 50),
        varchar("temporary", 50),
    ],
    key: KeySpec::Digest(&["match_id", "minutes", "seconds", "team_id", "player_id", "type"]),
    scope: Some("match_id"),
    chunk_size: Some(500),
};

pub static RUGBY_TEAMSTAT: KindSpec = KindSpec {
    name: "teamstat",
    target_table: "rugby_teamstat",
    write_policy: WritePolicy::DeleteBulkInsert,
    columns: &[
        varchar("match_id", 10),
        varchar("team_id", 10),
        varchar("side", 10),
        varchar("type", 50),
        float("value"),
    ],
    key: KeySpec::Digest(&["match_id", "team_id", "type"]),
    scope: Some("match_id"),
    chunk_size: Some(500),
};

pub static RUGBY_PLAYERSTAT: KindSpec = KindSpec {
    name: "playerstat",
    target_table: "rugby_playerstat",
    write_policy: WritePolicy::DeleteBulkInsert,
    columns: &[
        varchar("match_id", 10),
        varchar("team_id", 10),
        varchar("player_id", 10),
        varchar("position_name", 20),
        varchar("position_id", 2),
        varchar("side", 10),
        varchar("type", 50),
        float("value"),
    ],
    key: KeySpec::Digest(&["match_id", "player_id", "type"]),
    scope: Some("match_id"),
    chunk_size: Some(500),
};

// ---------------------------------------------------------------------------
// Catalog: referential labels
// ---------------------------------------------------------------------------

/// Display labels of referential entities (teams, persons, venues, ...).
pub static LABEL: KindSpec = KindSpec {
    name: "label",
    target_table: "label",
    write_policy: WritePolicy::Upsert,
    columns: &[varchar("id", 10), varchar("label", 150)],
    key: KeySpec::Column("id"),
    scope: None,
    chunk_size: None,
};

/// The kinds a match document of one sport decomposes into.
#[derive(Debug)]
pub struct SportCatalog {
    pub sport: Sport,
    pub match_info: &'static KindSpec,
    pub match_score: Option<&'static KindSpec>,
    pub event: &'static KindSpec,
    pub team_stat: &'static KindSpec,
    pub player_stat: &'static KindSpec,
}

impl SportCatalog {
    /// Every kind of this sport, referential labels last.
    pub fn kinds(&self) -> Vec<&'static KindSpec> {
        let mut kinds = vec![self.match_info];
        kinds.extend(self.match_score);
        kinds.extend([self.event, self.team_stat, self.player_stat, &LABEL]);
        kinds
    }
}

pub static SOCCER: SportCatalog = SportCatalog {
    sport: Sport::Soccer,
    match_info: &SOCCER_MATCHINFO,
    match_score: None,
    event: &SOCCER_EVENT,
    team_stat: &SOCCER_TEAMSTAT,
    player_stat: &SOCCER_PLAYERSTAT,
};

pub static RUGBY: SportCatalog = SportCatalog {
    sport: Sport::Rugby,
    match_info: &RUGBY_MATCHINFO,
    match_score: Some(&RUGBY_MATCHSCORE),
    event: &RUGBY_EVENT,
    team_stat: &RUGBY_TEAMSTAT,
    player_stat: &RUGBY_PLAYERSTAT,
};

pub fn catalog(sport: Sport) -> &'static SportCatalog {
    match sport {
        Sport::Soccer => &SOCCER,
        Sport::Rugby => &RUGBY,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_key_and_scope_column_exists() {
        for catalog in [&SOCCER, &RUGBY] {
            for kind in catalog.kinds() {
                match kind.key {
                    KeySpec::Column(name) => assert!(kind.column(name).is_some(), "{name}"),
                    KeySpec::Digest(fields) => {
                        for f in fields {
                            assert!(kind.column(f).is_some(), "{}.{f}", kind.name);
                        }
                    }
                }
                if let Some(scope) = kind.scope {
                    assert!(kind.column(scope).is_some());
                    assert_eq!(kind.write_policy, WritePolicy::DeleteBulkInsert);
                }
            }
        }
    }

    #[test]
    fn target_tables_are_unique() {
        let mut tables: Vec<_> = SOCCER
            .kinds()
            .into_iter()
            .chain(RUGBY.kinds())
            .map(|k| k.target_table)
            .collect();
        tables.sort();
        tables.dedup();
        // `label` is shared by both sports.
        assert_eq!(tables.len(), 10);
    }

    #[test]
    fn coerce_reads_numeric_strings() {
        let row = SOCCER_MATCHINFO
            .coerce(&json!({"id": "g1", "attendance": "12000", "season_id": 2015}))
            .unwrap();
        assert_eq!(row.get("attendance"), Some(&FieldValue::Int(12000)));
        assert_eq!(row.get("season_id"), Some(&FieldValue::Int(2015)));
        assert_eq!(row.get("weather"), Some(&FieldValue::Null));
    }

    #[test]
    fn coerce_ignores_unknown_fields() {
        let row = LABEL
            .coerce(&json!({"id": "t1", "label": "Arsenal", "fingerprint": "x"}))
            .unwrap();
        assert_eq!(row.values().len(), 2);
    }

    #[test]
    fn set_and_text() {
        let mut row = SOCCER_EVENT.coerce(&json!({"event_id": "e1"})).unwrap();
        assert!(row.text("match_id").is_none());
        assert!(row.set("match_id", FieldValue::from("g1")));
        assert_eq!(row.text("match_id").as_deref(), Some("g1"));
        assert!(!row.set("nope", FieldValue::Null));
    }

    #[test]
    fn non_object_is_rejected() {
        let err = LABEL.coerce(&json!(["t1"])).unwrap_err();
        assert!(matches!(err, SchemaError::NotAnObject { .. }));
    }
}
