//! Mapping a fetched [`GamePayload`] into per-kind record batches.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use tally_core::{catalog, FieldValue, KindSpec, Row, SchemaError, Sport, LABEL};

use crate::feed::{GamePayload, RefEntry};
use crate::reconciler::RecordBatch;
use crate::record::Record;

/// Fields copied from the match info onto sub-records that leave them empty.
const INHERITED: [&str; 2] = ["competition_id", "season_id"];

/// Referential entities of one game, for downstream indexing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<RefEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition: Option<RefEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<RefEntry>,
    #[serde(default)]
    pub teams: Vec<RefEntry>,
    #[serde(default)]
    pub persons: Vec<RefEntry>,
}

impl Referential {
    pub fn entries(&self) -> impl Iterator<Item = &RefEntry> + '_ {
        self.season
            .iter()
            .chain(&self.competition)
            .chain(&self.venue)
            .chain(&self.teams)
            .chain(&self.persons)
    }
}

/// Every batch of one game, match info first and labels last.
#[derive(Debug, Clone)]
pub struct GameBatches {
    pub sport: Sport,
    pub match_id: String,
    pub batches: Vec<RecordBatch>,
    pub referential: Referential,
}

impl GameBatches {
    pub fn batch(&self, kind: &KindSpec) -> Option<&RecordBatch> {
        self.batches.iter().find(|b| b.kind() == kind)
    }

    /// Player-stat records, the most volatile part of a game.
    pub fn player_stats(&self) -> &[Record] {
        let player_stat = catalog(self.sport).player_stat;
        self.batch(player_stat)
            .map(RecordBatch::records)
            .unwrap_or_default()
    }
}

/// Validate a payload and split it into batches.
pub fn build(payload: &GamePayload) -> Result<GameBatches, SchemaError> {
    let cat = catalog(payload.sport);
    let match_id = payload.id.0.clone();

    let info = keyed_row(cat.match_info, &payload.match_info, &match_id)?;
    let mut batches = vec![RecordBatch::new(
        cat.match_info,
        None,
        vec![Record::from_row(info.clone())?],
    )?];

    if let Some(kind) = cat.match_score {
        let raw = payload.match_score.clone().unwrap_or_default();
        let score = keyed_row(kind, &raw, &match_id)?;
        batches.push(RecordBatch::new(kind, None, vec![Record::from_row(score)?])?);
    }

    for (kind, raws) in [
        (cat.event, &payload.events),
        (cat.team_stat, &payload.team_stats),
        (cat.player_stat, &payload.player_stats),
    ] {
        let records = raws
            .iter()
            .map(|raw| scoped_record(kind, raw, &info, &match_id))
            .collect::<Result<Vec<_>, _>>()?;
        batches.push(RecordBatch::new(kind, Some(match_id.clone()), records)?);
    }

    let referential = Referential {
        season: payload.season.clone(),
        competition: payload.competition.clone(),
        venue: payload.venue.clone(),
        teams: payload.teams.clone(),
        persons: payload.persons.clone(),
    };
    let labels = referential
        .entries()
        .map(|e| Record::from_raw(&LABEL, &json!({"id": e.id, "label": e.label})))
        .collect::<Result<Vec<_>, _>>()?;
    batches.push(RecordBatch::new(&LABEL, None, labels)?);

    Ok(GameBatches {
        sport: payload.sport,
        match_id,
        batches,
        referential,
    })
}

/// Coerce a one-per-game object whose key must be the match id.
fn keyed_row(
    kind: &'static KindSpec,
    raw: &Map<String, Value>,
    match_id: &str,
) -> Result<Row, SchemaError> {
    let mut row = kind.coerce_map(raw)?;
    let Some(field) = kind.key_column() else {
        return Ok(row);
    };
    match row.text(field) {
        None => {
            row.set(field, FieldValue::from(match_id));
        }
        Some(found) if found != match_id => {
            return Err(SchemaError::ScopeMismatch {
                kind: kind.name,
                expected: match_id.to_string(),
                found,
            });
        }
        Some(_) => {}
    }
    Ok(row)
}

fn scoped_record(
    kind: &'static KindSpec,
    raw: &Value,
    info: &Row,
    match_id: &str,
) -> Result<Record, SchemaError> {
    let mut row = kind.coerce(raw)?;
    if let Some(field) = kind.scope {
        if row.text(field).is_none() {
            row.set(field, FieldValue::from(match_id));
        }
    }
    for field in INHERITED {
        let empty = row.get(field).map_or(false, FieldValue::is_null);
        if !empty {
            continue;
        }
        if let Some(value) = info.get(field).filter(|v| !v.is_null()) {
            row.set(field, value.clone());
        }
    }
    Record::from_row(row)
}
