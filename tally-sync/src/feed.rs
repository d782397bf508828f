//! Feed provider seam and the directory-backed provider.
//!
//! Layout read by [`DirectoryFeed`]:
//!
//! ```text
//! <root>/games/<id>.json                          one GamePayload per game
//! <root>/calendars/<season>-<competition>.json    array of fixtures
//! ```
//!
//! A game is ready once its file exists.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use tally_core::schema::parse_timestamp;
use tally_core::{CompetitionId, EntityId, SeasonId, Sport};

use crate::error::FeedError;

pub trait FeedProvider: Send + Sync {
    /// Whether the game is fully published upstream.
    fn is_ready(&self, id: &EntityId) -> Result<bool, FeedError>;

    fn fetch(&self, id: &EntityId) -> Result<GamePayload, FeedError>;

    fn fetch_calendar(
        &self,
        season: &SeasonId,
        competition: &CompetitionId,
    ) -> Result<Vec<CalendarEntry>, FeedError>;
}

/// Identifier and display label of one referential entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefEntry {
    pub id: String,
    pub label: String,
}

/// One game as delivered by the feed, already shaped into flat objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePayload {
    pub id: EntityId,
    #[serde(default)]
    pub sport: Sport,
    #[serde(default)]
    pub season: Option<RefEntry>,
    #[serde(default)]
    pub competition: Option<RefEntry>,
    #[serde(default)]
    pub venue: Option<RefEntry>,
    #[serde(default)]
    pub teams: Vec<RefEntry>,
    #[serde(default)]
    pub persons: Vec<RefEntry>,
    pub match_info: Map<String, Value>,
    #[serde(default)]
    pub match_score: Option<Map<String, Value>>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub team_stats: Vec<Value>,
    #[serde(default)]
    pub player_stats: Vec<Value>,
}

/// One fixture of a season calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: EntityId,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub date: DateTime<Utc>,
    pub season_id: SeasonId,
    pub competition_id: CompetitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away: Option<String>,
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(raw.trim())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
}

/// Calendar file row; season and competition default to the file's.
#[derive(Debug, Deserialize)]
struct RawFixture {
    id: EntityId,
    #[serde(deserialize_with = "lenient_timestamp")]
    date: DateTime<Utc>,
    #[serde(default)]
    home: Option<String>,
    #[serde(default)]
    away: Option<String>,
}

// ---------------------------------------------------------------------------
// DirectoryFeed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DirectoryFeed {
    root: PathBuf,
}

impl DirectoryFeed {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn game_path(&self, id: &EntityId) -> PathBuf {
        self.root.join("games").join(format!("{id}.json"))
    }

    pub fn calendar_path(&self, season: &SeasonId, competition: &CompetitionId) -> PathBuf {
        self.root
            .join("calendars")
            .join(format!("{season}-{competition}.json"))
    }

    fn read(&self, path: &Path) -> Result<String, FeedError> {
        std::fs::read_to_string(path)
            .map_err(|e| FeedError::Unavailable(format!("{}: {e}", path.display())))
    }
}

fn safe_component(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '\\']) && s != "." && s != ".."
}

impl FeedProvider for DirectoryFeed {
    fn is_ready(&self, id: &EntityId) -> Result<bool, FeedError> {
        if !safe_component(&id.0) {
            return Err(FeedError::Malformed(format!("invalid game id '{id}'")));
        }
        Ok(self.game_path(id).is_file())
    }

    fn fetch(&self, id: &EntityId) -> Result<GamePayload, FeedError> {
        if !safe_component(&id.0) {
            return Err(FeedError::Malformed(format!("invalid game id '{id}'")));
        }
        let path = self.game_path(id);
        let contents = self.read(&path)?;
        serde_json::from_str(&contents)
            .map_err(|e| FeedError::Malformed(format!("{}: {e}", path.display())))
    }

    fn fetch_calendar(
        &self,
        season: &SeasonId,
        competition: &CompetitionId,
    ) -> Result<Vec<CalendarEntry>, FeedError> {
        if !safe_component(&season.0) || !safe_component(&competition.0) {
            return Err(FeedError::Malformed(format!(
                "invalid calendar '{season}-{competition}'"
            )));
        }
        let path = self.calendar_path(season, competition);
        let contents = self.read(&path)?;
        let rows: Vec<RawFixture> = serde_json::from_str(&contents)
            .map_err(|e| FeedError::Malformed(format!("{}: {e}", path.display())))?;
        Ok(rows
            .into_iter()
            .map(|row| CalendarEntry {
                id: row.id,
                date: row.date,
                season_id: season.clone(),
                competition_id: competition.clone(),
                home: row.home,
                away: row.away,
            })
            .collect())
    }
}
