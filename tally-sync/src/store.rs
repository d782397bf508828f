//! Keyed document collections.
//!
//! [`DocumentStore`] is the persistence seam used by the reconciliation
//! store, the acknowledgment ledger and the calendar. Every call is atomic on
//! its own; no multi-call transactions exist.
//!
//! [`MemoryStore`] keeps collections in process memory. [`FileStore`] keeps
//! them in one SQLite database, so a daemon and CLI invocations can share a
//! store directory and each write costs one row.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::error::{io_err, StoreError};

/// One stored JSON object.
pub type Document = Map<String, Value>;

/// Persistent keyed collections.
pub trait DocumentStore: Send + Sync {
    fn find_one(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError>;

    /// Insert or replace the document stored under `key`.
    fn upsert(&self, collection: &str, key: &str, document: Document) -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    fn delete(&self, collection: &str, key: &str) -> Result<bool, StoreError>;

    /// Matching documents, sorted by key.
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<(String, Document)>, StoreError>;

    /// Maintain an equality index on a top-level field. Idempotent.
    fn create_index(&self, collection: &str, field: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Predicate over top-level document fields.
///
/// Strings compare lexicographically and numbers numerically; values of
/// different JSON types never match a range. A missing field reads as null.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    /// `from <= field < to`; an open bound is `None`.
    Range {
        field: String,
        from: Option<Value>,
        to: Option<Value>,
    },
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn range(field: impl Into<String>, from: Option<Value>, to: Option<Value>) -> Self {
        Filter::Range {
            field: field.into(),
            from,
            to,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => {
                let actual = doc.get(field).unwrap_or(&Value::Null);
                match compare(actual, expected) {
                    Some(ord) => ord == Ordering::Equal,
                    None => actual == expected,
                }
            }
            Filter::Range { field, from, to } => {
                let actual = doc.get(field).unwrap_or(&Value::Null);
                let above = from.as_ref().map_or(true, |lo| {
                    matches!(
                        compare(actual, lo),
                        Some(Ordering::Greater | Ordering::Equal)
                    )
                });
                let below = to
                    .as_ref()
                    .map_or(true, |hi| compare(actual, hi) == Some(Ordering::Less));
                above && below
            }
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
        }
    }

    /// Equality clauses an index could answer.
    fn indexed_terms(&self) -> Vec<(&str, &Value)> {
        match self {
            // A missing field reads as null but is never indexed.
            Filter::Eq(field, value) if !value.is_null() => vec![(field.as_str(), value)],
            Filter::And(parts) => parts.iter().flat_map(Filter::indexed_terms).collect(),
            _ => Vec::new(),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

fn index_key(value: &Value) -> String {
    match value {
        Value::String(s) => format!("s:{s}"),
        Value::Number(n) => format!("n:{}", n.as_f64().unwrap_or(f64::NAN)),
        other => format!("j:{other}"),
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Collection {
    indexes: BTreeSet<String>,
    documents: BTreeMap<String, Document>,
    /// field -> index key -> document keys
    lookup: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl Collection {
    fn index_field(&mut self, field: &str) {
        let mut entries: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (key, doc) in &self.documents {
            if let Some(value) = doc.get(field) {
                entries
                    .entry(index_key(value))
                    .or_default()
                    .insert(key.clone());
            }
        }
        self.lookup.insert(field.to_string(), entries);
    }

    fn unindex(&mut self, key: &str) {
        let Some(doc) = self.documents.get(key) else {
            return;
        };
        for (field, entries) in self.lookup.iter_mut() {
            if let Some(value) = doc.get(field) {
                let ik = index_key(value);
                if let Some(keys) = entries.get_mut(&ik) {
                    keys.remove(key);
                    if keys.is_empty() {
                        entries.remove(&ik);
                    }
                }
            }
        }
    }

    fn upsert(&mut self, key: &str, document: Document) {
        self.unindex(key);
        for (field, entries) in self.lookup.iter_mut() {
            if let Some(value) = document.get(field) {
                entries
                    .entry(index_key(value))
                    .or_default()
                    .insert(key.to_string());
            }
        }
        self.documents.insert(key.to_string(), document);
    }

    fn delete(&mut self, key: &str) -> bool {
        self.unindex(key);
        self.documents.remove(key).is_some()
    }

    fn create_index(&mut self, field: &str) -> bool {
        if !self.indexes.insert(field.to_string()) {
            return false;
        }
        self.index_field(field);
        true
    }

    fn find(&self, filter: &Filter) -> Vec<(String, Document)> {
        let candidates: Option<BTreeSet<&String>> = filter
            .indexed_terms()
            .into_iter()
            .find_map(|(field, value)| {
                let entries = self.lookup.get(field)?;
                Some(
                    entries
                        .get(&index_key(value))
                        .map(|keys| keys.iter().collect())
                        .unwrap_or_default(),
                )
            });

        let matching = |(key, doc): (&String, &Document)| {
            filter.matches(doc).then(|| (key.clone(), doc.clone()))
        };
        match candidates {
            Some(keys) => keys
                .into_iter()
                .filter_map(|k| self.documents.get_key_value(k))
                .filter_map(matching)
                .collect(),
            None => self.documents.iter().filter_map(matching).collect(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Poisoned)
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Process-local store. Used in tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn find_one(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        let guard = lock(&self.collections)?;
        Ok(guard
            .get(collection)
            .and_then(|c| c.documents.get(key))
            .cloned())
    }

    fn upsert(&self, collection: &str, key: &str, document: Document) -> Result<(), StoreError> {
        let mut guard = lock(&self.collections)?;
        guard
            .entry(collection.to_string())
            .or_default()
            .upsert(key, document);
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        let mut guard = lock(&self.collections)?;
        Ok(guard
            .get_mut(collection)
            .map(|c| c.delete(key))
            .unwrap_or(false))
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<(String, Document)>, StoreError> {
        let guard = lock(&self.collections)?;
        Ok(guard
            .get(collection)
            .map(|c| c.find(filter))
            .unwrap_or_default())
    }

    fn create_index(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        let mut guard = lock(&self.collections)?;
        guard
            .entry(collection.to_string())
            .or_default()
            .create_index(field);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

const DATABASE: &str = "store.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Database {
    conn: Connection,
    /// Tables known to exist on this connection.
    tables: HashSet<String>,
}

/// SQLite database at `<root>/store.db`, one table per collection.
///
/// Rows are `(key TEXT PRIMARY KEY, doc TEXT)` with the document as JSON.
/// Indexes are expression indexes on `json_extract(doc, '$."field"')`.
/// Several processes may open the same root; SQLite serializes their writes.
#[derive(Debug)]
pub struct FileStore {
    db: Mutex<Database>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        let path = root.join(DATABASE);
        let context = path.display().to_string();

        let conn = Connection::open(&path).map_err(|e| sqlite_err(&context, e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| sqlite_err(&context, e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| sqlite_err(&context, e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| sqlite_err(&context, e))?;

        Ok(Self {
            db: Mutex::new(Database {
                conn,
                tables: HashSet::new(),
            }),
        })
    }

    /// Lock the connection and make sure `collection` has a table.
    fn table(&self, collection: &str) -> Result<MutexGuard<'_, Database>, StoreError> {
        validate_name(collection)?;
        let mut db = lock(&self.db)?;
        if !db.tables.contains(collection) {
            db.conn
                .execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS \"{collection}\" (
                            key TEXT PRIMARY KEY NOT NULL,
                            doc TEXT NOT NULL
                        )"
                    ),
                    [],
                )
                .map_err(|e| sqlite_err(collection, e))?;
            db.tables.insert(collection.to_string());
        }
        Ok(db)
    }
}

impl DocumentStore for FileStore {
    fn find_one(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        let db = self.table(collection)?;
        let doc: Option<String> = db
            .conn
            .prepare_cached(&format!("SELECT doc FROM \"{collection}\" WHERE key = ?1"))
            .and_then(|mut stmt| stmt.query_row([key], |row| row.get(0)).optional())
            .map_err(|e| sqlite_err(collection, e))?;
        doc.map(|text| decode(collection, &text)).transpose()
    }

    fn upsert(&self, collection: &str, key: &str, document: Document) -> Result<(), StoreError> {
        let text = serde_json::to_string(&document).map_err(|source| StoreError::Json {
            collection: collection.to_string(),
            source,
        })?;
        let db = self.table(collection)?;
        db.conn
            .prepare_cached(&format!(
                "INSERT INTO \"{collection}\" (key, doc) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET doc = excluded.doc"
            ))
            .and_then(|mut stmt| stmt.execute(params![key, text]))
            .map_err(|e| sqlite_err(collection, e))?;
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        let db = self.table(collection)?;
        let removed = db
            .conn
            .prepare_cached(&format!("DELETE FROM \"{collection}\" WHERE key = ?1"))
            .and_then(|mut stmt| stmt.execute([key]))
            .map_err(|e| sqlite_err(collection, e))?;
        Ok(removed > 0)
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<(String, Document)>, StoreError> {
        let (sql, bound) = select_sql(collection, filter);
        let db = self.table(collection)?;
        let rows: Vec<(String, String)> = db
            .conn
            .prepare_cached(&sql)
            .and_then(|mut stmt| {
                let rows = stmt
                    .query_map(params_from_iter(bound), |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>();
                rows
            })
            .map_err(|e| sqlite_err(collection, e))?;
        drop(db);

        let mut found = Vec::with_capacity(rows.len());
        for (key, text) in rows {
            let doc = decode(collection, &text)?;
            if filter.matches(&doc) {
                found.push((key, doc));
            }
        }
        Ok(found)
    }

    fn create_index(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        validate_name(field)?;
        let db = self.table(collection)?;
        db.conn
            .execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS \"{collection}__{field}\" ON \"{collection}\" ({})",
                    json_path(field)
                ),
                [],
            )
            .map_err(|e| sqlite_err(collection, e))?;
        Ok(())
    }
}

/// Collection and field names become SQL identifiers.
fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with("sqlite")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Index expression for a top-level field. Queries must spell it the same
/// way for SQLite to use the index.
fn json_path(field: &str) -> String {
    format!("json_extract(doc, '$.\"{field}\"')")
}

/// `SELECT` narrowing `collection` to rows that may match `filter`.
fn select_sql(collection: &str, filter: &Filter) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut bound = Vec::new();
    push_down(filter, &mut clauses, &mut bound);
    let mut sql = format!("SELECT key, doc FROM \"{collection}\"");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY key");
    (sql, bound)
}

/// Translate the clauses SQLite can answer with the same typing rules as
/// [`Filter::matches`]. Rows kept are a superset of the matches.
fn push_down(filter: &Filter, clauses: &mut Vec<String>, bound: &mut Vec<SqlValue>) {
    match filter {
        Filter::All => {}
        Filter::Eq(field, value) => {
            if let Some((guard, param)) = typed(field, value) {
                clauses.push(format!("{guard} AND {} = ?", json_path(field)));
                bound.push(param);
            }
        }
        Filter::Range { field, from, to } => {
            for (limit, op) in [(from, ">="), (to, "<")] {
                let Some(value) = limit else { continue };
                if let Some((guard, param)) = typed(field, value) {
                    clauses.push(format!("{guard} AND {} {op} ?", json_path(field)));
                    bound.push(param);
                }
            }
        }
        Filter::And(parts) => {
            for part in parts {
                push_down(part, clauses, bound);
            }
        }
    }
}

/// Type guard and parameter for a string or number operand.
fn typed(field: &str, value: &Value) -> Option<(String, SqlValue)> {
    validate_name(field).ok()?;
    match value {
        Value::String(s) => Some((
            format!("json_type(doc, '$.\"{field}\"') = 'text'"),
            SqlValue::Text(s.clone()),
        )),
        Value::Number(n) => {
            let param = match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64()?),
            };
            Some((
                format!("json_type(doc, '$.\"{field}\"') IN ('integer', 'real')"),
                param,
            ))
        }
        _ => None,
    }
}

fn decode(collection: &str, text: &str) -> Result<Document, StoreError> {
    serde_json::from_str(text).map_err(|source| StoreError::Json {
        collection: collection.to_string(),
        source,
    })
}

fn sqlite_err(context: &str, source: rusqlite::Error) -> StoreError {
    StoreError::Sqlite {
        context: context.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn seed(store: &dyn DocumentStore) {
        store
            .upsert("games", "g1", doc(json!({"date": "2015-08-08T14:00:00Z", "season_id": "2015"})))
            .unwrap();
        store
            .upsert("games", "g2", doc(json!({"date": "2015-08-09T14:00:00Z", "season_id": "2015"})))
            .unwrap();
        store
            .upsert("games", "g3", doc(json!({"date": "2016-01-01T14:00:00Z", "season_id": "2016"})))
            .unwrap();
    }

    fn keys(found: Vec<(String, Document)>) -> Vec<String> {
        found.into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn upsert_replaces_by_key() {
        let store = MemoryStore::new();
        store.upsert("c", "k", doc(json!({"v": 1}))).unwrap();
        store.upsert("c", "k", doc(json!({"v": 2}))).unwrap();
        let all = store.find("c", &Filter::All).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1["v"], json!(2));
    }

    #[test]
    fn delete_reports_presence() {
        let store = MemoryStore::new();
        store.upsert("c", "k", doc(json!({}))).unwrap();
        assert!(store.delete("c", "k").unwrap());
        assert!(!store.delete("c", "k").unwrap());
        assert!(!store.delete("missing", "k").unwrap());
        assert!(store.find_one("c", "k").unwrap().is_none());
    }

    #[test]
    fn range_is_half_open() {
        let store = MemoryStore::new();
        seed(&store);
        let found = store
            .find(
                "games",
                &Filter::range(
                    "date",
                    Some(json!("2015-08-08T14:00:00Z")),
                    Some(json!("2015-08-09T14:00:00Z")),
                ),
            )
            .unwrap();
        assert_eq!(keys(found), vec!["g1"]);
    }

    #[test]
    fn numbers_compare_numerically() {
        let store = MemoryStore::new();
        store.upsert("c", "a", doc(json!({"n": 9}))).unwrap();
        store.upsert("c", "b", doc(json!({"n": 10}))).unwrap();
        let found = store
            .find("c", &Filter::range("n", Some(json!(9.5)), None))
            .unwrap();
        assert_eq!(keys(found), vec!["b"]);
    }

    #[test]
    fn indexed_and_unindexed_lookups_agree() {
        let plain = MemoryStore::new();
        let indexed = MemoryStore::new();
        indexed.create_index("games", "season_id").unwrap();
        seed(&plain);
        seed(&indexed);

        let filter = Filter::And(vec![
            Filter::eq("season_id", "2015"),
            Filter::range("date", Some(json!("2015-08-09")), None),
        ]);
        assert_eq!(
            keys(plain.find("games", &filter).unwrap()),
            keys(indexed.find("games", &filter).unwrap())
        );
        assert_eq!(keys(indexed.find("games", &filter).unwrap()), vec!["g2"]);
    }

    #[test]
    fn null_lookup_matches_missing_fields_with_an_index() {
        let store = MemoryStore::new();
        store.create_index("c", "home").unwrap();
        store.upsert("c", "a", doc(json!({"home": "t1"}))).unwrap();
        store.upsert("c", "b", doc(json!({}))).unwrap();
        store.upsert("c", "n", doc(json!({"home": null}))).unwrap();

        let found = store.find("c", &Filter::eq("home", Value::Null)).unwrap();
        assert_eq!(keys(found), vec!["b", "n"]);
    }

    #[test]
    fn index_follows_updates_and_deletes() {
        let store = MemoryStore::new();
        store.create_index("games", "season_id").unwrap();
        seed(&store);
        store
            .upsert("games", "g1", doc(json!({"season_id": "2016"})))
            .unwrap();
        store.delete("games", "g3").unwrap();

        let in_2015 = store.find("games", &Filter::eq("season_id", "2015")).unwrap();
        let in_2016 = store.find("games", &Filter::eq("season_id", "2016")).unwrap();
        assert_eq!(keys(in_2015), vec!["g2"]);
        assert_eq!(keys(in_2016), vec!["g1"]);
    }

    #[test]
    fn file_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(tmp.path()).unwrap();
            store.create_index("games", "season_id").unwrap();
            seed(&store);
            store.delete("games", "g2").unwrap();
        }
        let reopened = FileStore::open(tmp.path()).unwrap();
        let found = reopened
            .find("games", &Filter::eq("season_id", "2015"))
            .unwrap();
        assert_eq!(keys(found), vec!["g1"]);
        assert!(reopened.find_one("games", "g3").unwrap().is_some());
    }

    #[test]
    fn file_store_matches_memory_store_semantics() {
        let tmp = TempDir::new().unwrap();
        let file = FileStore::open(tmp.path()).unwrap();
        let memory = MemoryStore::new();
        for store in [&file as &dyn DocumentStore, &memory] {
            store.create_index("c", "home").unwrap();
            store.upsert("c", "a", doc(json!({"home": "t1", "n": 9}))).unwrap();
            store.upsert("c", "b", doc(json!({"n": 10}))).unwrap();
            store.upsert("c", "c", doc(json!({"home": null, "n": "10"}))).unwrap();
            store.upsert("c", "d", doc(json!({"home": true, "n": 10.5}))).unwrap();
        }

        let filters = [
            Filter::All,
            Filter::eq("home", "t1"),
            Filter::eq("home", Value::Null),
            Filter::eq("home", true),
            Filter::eq("n", 10),
            Filter::eq("n", 10.0),
            Filter::range("n", Some(json!(9.5)), None),
            Filter::range("n", None, Some(json!("2"))),
            Filter::And(vec![Filter::eq("home", "t1"), Filter::range("n", None, Some(json!(10)))]),
        ];
        for filter in &filters {
            assert_eq!(
                keys(file.find("c", filter).unwrap()),
                keys(memory.find("c", filter).unwrap()),
                "{filter:?}"
            );
        }
        assert_eq!(keys(file.find("c", &Filter::eq("n", 10)).unwrap()), vec!["b"]);
        assert_eq!(
            keys(file.find("c", &Filter::range("n", Some(json!(9.5)), None)).unwrap()),
            vec!["b", "d"]
        );
    }

    #[test]
    fn file_store_handles_see_each_others_writes() {
        let tmp = TempDir::new().unwrap();
        let daemon = FileStore::open(tmp.path()).unwrap();
        let cli = FileStore::open(tmp.path()).unwrap();

        assert!(daemon.find_one("acks", "g1").unwrap().is_none());
        cli.upsert("acks", "g1", doc(json!({"checksum": "abc"}))).unwrap();
        let seen = daemon.find_one("acks", "g1").unwrap().expect("written by the other handle");
        assert_eq!(seen["checksum"], json!("abc"));

        daemon.upsert("acks", "g2", doc(json!({"checksum": "def"}))).unwrap();
        let fresh = FileStore::open(tmp.path()).unwrap();
        assert_eq!(keys(fresh.find("acks", &Filter::All).unwrap()), vec!["g1", "g2"]);

        assert!(cli.delete("acks", "g2").unwrap());
        assert!(daemon.find_one("acks", "g2").unwrap().is_none());
    }

    #[test]
    fn file_store_write_cost_does_not_grow_with_the_collection() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        store.create_index("stats", "scope").unwrap();
        let write = |range: std::ops::Range<usize>| {
            let started = std::time::Instant::now();
            for i in range {
                let record = doc(json!({"scope": format!("g{}", i / 20), "value": i}));
                store.upsert("stats", &format!("k{i:06}"), record).unwrap();
            }
            started.elapsed()
        };

        let early = write(0..300);
        write(300..5_300);
        let late = write(5_300..5_600);
        assert!(
            late <= early * 4 + Duration::from_millis(100),
            "300 writes took {early:?} into an empty collection and {late:?} into 5300 records"
        );
        assert_eq!(store.find("stats", &Filter::eq("scope", "g42")).unwrap().len(), 20);
    }

    #[test]
    fn indexed_equality_is_answered_by_the_index() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        store.create_index("games", "season_id").unwrap();
        seed(&store);

        let (sql, _) = select_sql("games", &Filter::eq("season_id", "2015"));
        let db = lock(&store.db).unwrap();
        let mut stmt = db.conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}")).unwrap();
        let plan: Vec<String> = stmt
            .query_map(params_from_iter([SqlValue::Text("2015".into())]), |row| row.get(3))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(
            plan.iter().any(|step| step.contains("games__season_id")),
            "{plan:?}"
        );
    }

    #[test]
    fn file_store_rejects_path_like_names() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.upsert("../escape", "k", Document::new()),
            Err(StoreError::InvalidName(_))
        ));
        assert!(store.create_index("games", "da'te").is_err());
        assert!(store.find_one("sqlite_master", "k").is_err());
    }

    #[test]
    fn corrupt_document_is_a_json_error() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        store.upsert("acks", "g0", doc(json!({"checksum": "x"}))).unwrap();
        {
            let db = lock(&store.db).unwrap();
            db.conn
                .execute(
                    "INSERT INTO \"acks\" (key, doc) VALUES ('g1', '{not json')",
                    [],
                )
                .unwrap();
        }
        let err = store.find_one("acks", "g1").unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
        assert!(store.find_one("acks", "g0").unwrap().is_some());
        assert!(tmp.path().join("store.db").exists());
    }
}
