//! Fixture calendar: which games exist and when they kick off.
//!
//! Fixtures are stored in the `calendar` collection keyed by game id, with
//! `date` kept as an RFC 3339 UTC string so range filters order correctly.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use tally_core::types::format_timestamp;
use tally_core::{CompetitionId, EntityId, SeasonId};

use crate::error::{StoreError, SyncError};
use crate::feed::{CalendarEntry, FeedProvider};
use crate::store::{Document, DocumentStore, Filter};

pub const CALENDAR: &str = "calendar";

/// Outcome of [`CalendarService::refresh_calendars`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarReport {
    /// `(season, competition, fixtures stored)`
    pub refreshed: Vec<(SeasonId, CompetitionId, usize)>,
    /// `(season, competition, reason)`
    pub failed: Vec<(SeasonId, CompetitionId, String)>,
}

#[derive(Clone)]
pub struct CalendarService {
    feed: Arc<dyn FeedProvider>,
    store: Arc<dyn DocumentStore>,
}

impl CalendarService {
    pub fn new(feed: Arc<dyn FeedProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self { feed, store }
    }

    /// Fetch one season calendar and upsert every fixture. Re-adding is
    /// harmless. Returns the number of fixtures stored.
    pub fn add_calendar(
        &self,
        season: &SeasonId,
        competition: &CompetitionId,
    ) -> Result<usize, SyncError> {
        for field in ["id", "date", "season_id"] {
            self.store.create_index(CALENDAR, field)?;
        }
        let entries = self
            .feed
            .fetch_calendar(season, competition)
            .map_err(|source| SyncError::CalendarUnavailable {
                season: season.clone(),
                competition: competition.clone(),
                source,
            })?;
        for entry in &entries {
            self.store.upsert(CALENDAR, &entry.id.0, to_document(entry))?;
        }
        info!(
            "calendar {season}/{competition}: {} fixtures",
            entries.len()
        );
        Ok(entries.len())
    }

    /// Re-fetch every season/competition pair already known. A pair whose
    /// feed fails is reported and skipped; store failures abort.
    pub fn refresh_calendars(&self) -> Result<CalendarReport, SyncError> {
        let pairs: BTreeSet<(SeasonId, CompetitionId)> = self
            .store
            .find(CALENDAR, &Filter::All)?
            .iter()
            .filter_map(|(_, doc)| {
                Some((
                    SeasonId::from(doc.get("season_id")?.as_str()?),
                    CompetitionId::from(doc.get("competition_id")?.as_str()?),
                ))
            })
            .collect();

        let mut report = CalendarReport::default();
        for (season, competition) in pairs {
            match self.add_calendar(&season, &competition) {
                Ok(n) => report.refreshed.push((season, competition, n)),
                Err(SyncError::CalendarUnavailable { source, .. }) => {
                    warn!("calendar {season}/{competition} skipped: {source}");
                    report.failed.push((season, competition, source.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Games kicking off in `[from, to)`, ordered by kickoff then id.
    pub fn list_ids_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EntityId>, StoreError> {
        let filter = Filter::range(
            "date",
            Some(Value::String(format_timestamp(&from))),
            Some(Value::String(format_timestamp(&to))),
        );
        self.ids(&filter)
    }

    /// Games of one season and competition, ordered by kickoff then id.
    pub fn list_ids_by_season_competition(
        &self,
        season: &SeasonId,
        competition: &CompetitionId,
    ) -> Result<Vec<EntityId>, StoreError> {
        let filter = Filter::And(vec![
            Filter::eq("season_id", season.0.as_str()),
            Filter::eq("competition_id", competition.0.as_str()),
        ]);
        self.ids(&filter)
    }

    /// Games whose kickoff lies in `[now - lookback, now + lookahead)`.
    pub fn due_ids(
        &self,
        now: DateTime<Utc>,
        lookback: Duration,
        lookahead: Duration,
    ) -> Result<Vec<EntityId>, StoreError> {
        self.list_ids_by_date_range(now - lookback, now + lookahead)
    }

    /// Stored fixture for one game.
    pub fn entry(&self, id: &EntityId) -> Result<Option<Document>, StoreError> {
        self.store.find_one(CALENDAR, &id.0)
    }

    fn ids(&self, filter: &Filter) -> Result<Vec<EntityId>, StoreError> {
        let mut rows: Vec<(String, String)> = self
            .store
            .find(CALENDAR, filter)?
            .into_iter()
            .map(|(key, doc)| {
                let date = doc
                    .get("date")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (date, key)
            })
            .collect();
        rows.sort();
        Ok(rows.into_iter().map(|(_, id)| EntityId(id)).collect())
    }
}

fn to_document(entry: &CalendarEntry) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert("id".into(), Value::String(entry.id.0.clone()));
    doc.insert("date".into(), Value::String(format_timestamp(&entry.date)));
    doc.insert("season_id".into(), Value::String(entry.season_id.0.clone()));
    doc.insert(
        "competition_id".into(),
        Value::String(entry.competition_id.0.clone()),
    );
    for (field, value) in [("home", &entry.home), ("away", &entry.away)] {
        if let Some(v) = value {
            doc.insert(field.into(), Value::String(v.clone()));
        }
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::error::FeedError;
    use crate::feed::DirectoryFeed;
    use crate::store::MemoryStore;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, day, hour, 0, 0).unwrap()
    }

    fn service() -> (TempDir, CalendarService) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("calendars");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("2015-8.json"),
            json!([
                {"id": "g2", "date": "2015-08-08T15:00:00Z"},
                {"id": "g1", "date": "2015-08-08T15:00:00Z"},
                {"id": "g3", "date": "2015-08-15T12:30:00Z"}
            ])
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.join("2015-24.json"),
            json!([{"id": "f1", "date": "2015-08-09T10:00:00Z"}]).to_string(),
        )
        .unwrap();
        let svc = CalendarService::new(
            Arc::new(DirectoryFeed::new(tmp.path())),
            Arc::new(MemoryStore::new()),
        );
        (tmp, svc)
    }

    #[test]
    fn add_is_idempotent() {
        let (_tmp, svc) = service();
        assert_eq!(svc.add_calendar(&"2015".into(), &"8".into()).unwrap(), 3);
        assert_eq!(svc.add_calendar(&"2015".into(), &"8".into()).unwrap(), 3);
        let ids = svc
            .list_ids_by_season_competition(&"2015".into(), &"8".into())
            .unwrap();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn date_range_orders_by_kickoff_then_id() {
        let (_tmp, svc) = service();
        svc.add_calendar(&"2015".into(), &"8".into()).unwrap();
        svc.add_calendar(&"2015".into(), &"24".into()).unwrap();

        let ids = svc.list_ids_by_date_range(at(8, 0), at(10, 0)).unwrap();
        let expected: Vec<EntityId> = vec!["g1".into(), "g2".into(), "f1".into()];
        assert_eq!(ids, expected);

        // Upper bound is exclusive.
        let ids = svc.list_ids_by_date_range(at(8, 0), at(8, 15)).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn season_listing_is_per_competition() {
        let (_tmp, svc) = service();
        svc.add_calendar(&"2015".into(), &"8".into()).unwrap();
        svc.add_calendar(&"2015".into(), &"24".into()).unwrap();
        let ids = svc
            .list_ids_by_season_competition(&"2015".into(), &"24".into())
            .unwrap();
        assert_eq!(ids, vec![EntityId::from("f1")]);
    }

    #[test]
    fn due_window() {
        let (_tmp, svc) = service();
        svc.add_calendar(&"2015".into(), &"8".into()).unwrap();
        let due = svc
            .due_ids(at(9, 12), Duration::hours(24), Duration::hours(0))
            .unwrap();
        assert_eq!(due, vec![EntityId::from("g1"), EntityId::from("g2")]);

        let ahead = svc
            .due_ids(at(15, 12), Duration::hours(0), Duration::hours(1))
            .unwrap();
        assert_eq!(ahead, vec![EntityId::from("g3")]);
    }

    #[test]
    fn missing_calendar_is_unavailable() {
        let (_tmp, svc) = service();
        let err = svc.add_calendar(&"2016".into(), &"8".into()).unwrap_err();
        assert!(matches!(
            err,
            SyncError::CalendarUnavailable {
                source: FeedError::Unavailable(_),
                ..
            }
        ));
    }

    #[test]
    fn refresh_reports_failures_per_pair() {
        let (tmp, svc) = service();
        svc.add_calendar(&"2015".into(), &"8".into()).unwrap();
        svc.add_calendar(&"2015".into(), &"24".into()).unwrap();
        std::fs::remove_file(tmp.path().join("calendars/2015-24.json")).unwrap();

        let report = svc.refresh_calendars().unwrap();
        let refreshed: Vec<(SeasonId, CompetitionId, usize)> =
            vec![("2015".into(), "8".into(), 3)];
        assert_eq!(report.refreshed, refreshed);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1, CompetitionId::from("24"));
    }
}
