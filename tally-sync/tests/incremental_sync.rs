use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tally_core::schema::SOCCER_PLAYERSTAT;
use tally_core::{EntityId, SyncSettings, SyncStatus};
use tally_sync::fingerprint::digest_parts;
use tally_sync::{
    DirectoryFeed, FileStore, JsonLinesOutbox, MemoryOutbox, ReconciliationStore, Services,
    SyncOrchestrator,
};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_game(feed: &Path, stats: &[(&str, i64)]) {
    let player_stats: Vec<Value> = stats
        .iter()
        .map(|(player, value)| json!({"player_id": player, "team_id": "t1", "type": "touches", "value": value}))
        .collect();
    let game = json!({
        "id": "g1",
        "sport": "soccer",
        "season": {"id": "2015", "label": "Season 2015/2016"},
        "competition": {"id": "8", "label": "English Barclays Premier League"},
        "teams": [{"id": "t1", "label": "Arsenal"}],
        "persons": [{"id": "p1", "label": "Santi Cazorla"}, {"id": "p2", "label": "Aaron Ramsey"}],
        "match_info": {"competition_id": "8", "season_id": 2015, "date": "2015-08-08 14:00:00"},
        "player_stats": player_stats
    });
    let path = feed.join("games").join("g1.json");
    fs::create_dir_all(path.parent().unwrap()).expect("mkdir games");
    fs::write(path, game.to_string()).expect("write game");
}

fn stat_key(player: &str) -> String {
    digest_parts(["8", "2015", "g1", player, "touches"])
}

struct Fixture {
    feed: TempDir,
    store_dir: TempDir,
    outbox: Arc<MemoryOutbox>,
    orchestrator: SyncOrchestrator,
}

impl Fixture {
    fn new() -> Self {
        init_logging();
        let feed = TempDir::new().expect("feed");
        let store_dir = TempDir::new().expect("store");
        let outbox = Arc::new(MemoryOutbox::new());
        let orchestrator = Self::orchestrator(feed.path(), store_dir.path(), &outbox);
        Self {
            feed,
            store_dir,
            outbox,
            orchestrator,
        }
    }

    fn orchestrator(feed: &Path, store: &Path, outbox: &Arc<MemoryOutbox>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::new(DirectoryFeed::new(feed)),
            Arc::new(FileStore::open(store).expect("open store")),
        )
        .with_sink(outbox.clone())
        .with_channel(outbox.clone())
    }

    /// Same on-disk state, fresh process.
    fn reopen(&mut self) {
        self.orchestrator = Self::orchestrator(self.feed.path(), self.store_dir.path(), &self.outbox);
    }

    fn recon(&self) -> &ReconciliationStore {
        self.orchestrator.recon_store()
    }
}

#[test]
fn created_then_unchanged_then_updated() {
    let fx = Fixture::new();
    let id = EntityId::from("g1");

    write_game(fx.feed.path(), &[("p1", 10), ("p2", 5)]);
    let first = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    assert_eq!(first.status, SyncStatus::Created);
    assert_eq!(
        fx.recon().scoped_keys(&SOCCER_PLAYERSTAT, "g1").expect("keys"),
        [stat_key("p1"), stat_key("p2")]
            .into_iter()
            .collect::<BTreeSet<_>>()
    );

    fx.orchestrator
        .acknowledge(&id, &first.checksum)
        .expect("ack");
    let second = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    assert_eq!(second.status, SyncStatus::Unchanged);
    assert_eq!(second.checksum, first.checksum);
    assert!(!second.has_changed());

    let p1_before = fx
        .recon()
        .get_fingerprint(&SOCCER_PLAYERSTAT, &stat_key("p1"))
        .expect("lookup");
    write_game(fx.feed.path(), &[("p1", 16)]);
    let third = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    assert_eq!(third.status, SyncStatus::Updated);
    assert_ne!(third.checksum, first.checksum);

    let stats = third
        .datastore
        .iter()
        .find(|b| b.target_table == "soccer_playerstat")
        .expect("playerstat batch");
    assert_eq!(stats.delta.deleted, vec![stat_key("p2")]);
    assert_eq!(stats.delta.updated, vec![stat_key("p1")]);
    assert_eq!(stats.records.len(), 1);
    assert_eq!(stats.records[0]["value"], json!(16.0));

    let p1_after = fx
        .recon()
        .get_fingerprint(&SOCCER_PLAYERSTAT, &stat_key("p1"))
        .expect("lookup");
    assert_ne!(p1_before, p1_after);
    assert!(fx
        .recon()
        .get_fingerprint(&SOCCER_PLAYERSTAT, &stat_key("p2"))
        .expect("lookup")
        .is_none());

    let deletes = fx.outbox.deletes();
    assert_eq!(deletes.len(), 1);
    let (table, columns) = &deletes[0];
    assert_eq!(table, "soccer_playerstat");
    assert_eq!(columns["match_id"], json!("g1"));
    assert_eq!(columns["player_id"], json!("p2"));
    assert_eq!(columns["type"], json!("touches"));
    assert!(columns.get("key").is_none());
    let statuses: Vec<_> = fx.outbox.messages().iter().map(|m| m.status).collect();
    assert_eq!(statuses, vec![SyncStatus::Created, SyncStatus::Updated]);
}

#[test]
fn unacknowledge_forces_created() {
    let fx = Fixture::new();
    let id = EntityId::from("g1");
    write_game(fx.feed.path(), &[("p1", 10)]);

    let first = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    fx.orchestrator.acknowledge(&id, &first.checksum).expect("ack");
    assert!(fx.orchestrator.unacknowledge(&id).expect("unack"));

    let again = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    assert_eq!(again.status, SyncStatus::Created);
    assert!(!again.has_changed(), "record fingerprints are untouched");
}

#[test]
fn state_survives_restart() {
    let mut fx = Fixture::new();
    let id = EntityId::from("g1");
    write_game(fx.feed.path(), &[("p1", 10), ("p2", 5)]);

    let first = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    fx.orchestrator.acknowledge(&id, &first.checksum).expect("ack");

    fx.reopen();
    let after = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    assert_eq!(after.status, SyncStatus::Unchanged);
    assert_eq!(after.checksum, first.checksum);
    assert!(!after.has_changed());
}

#[test]
fn checksum_ignores_fetch_order() {
    let fx = Fixture::new();
    let id = EntityId::from("g1");

    write_game(fx.feed.path(), &[("p1", 10), ("p2", 5), ("p3", 7)]);
    let forward = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    fx.orchestrator.acknowledge(&id, &forward.checksum).expect("ack");

    write_game(fx.feed.path(), &[("p3", 7), ("p1", 10), ("p2", 5)]);
    let shuffled = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    assert_eq!(shuffled.checksum, forward.checksum);
    assert_eq!(shuffled.status, SyncStatus::Unchanged);
}

#[test]
fn cancelled_game_retracts_all_stats() {
    let fx = Fixture::new();
    let id = EntityId::from("g1");
    write_game(fx.feed.path(), &[("p1", 10), ("p2", 5)]);
    fx.orchestrator.sync(&id).expect("sync");

    write_game(fx.feed.path(), &[]);
    let result = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    let stats = result
        .datastore
        .iter()
        .find(|b| b.target_table == "soccer_playerstat")
        .expect("playerstat batch");
    assert_eq!(stats.delta.deleted.len(), 2);
    assert!(fx
        .recon()
        .scoped_keys(&SOCCER_PLAYERSTAT, "g1")
        .expect("keys")
        .is_empty());
}

#[test]
fn services_write_the_jsonl_outbox() {
    init_logging();
    let feed = TempDir::new().expect("feed");
    let store = TempDir::new().expect("store");
    let outbox_dir = TempDir::new().expect("outbox");
    write_game(feed.path(), &[("p1", 10)]);

    let outbox = Arc::new(JsonLinesOutbox::open(outbox_dir.path()).expect("outbox"));
    let services = Services::new(
        Arc::new(DirectoryFeed::new(feed.path())),
        Arc::new(FileStore::open(store.path()).expect("store")),
        outbox.clone(),
        outbox,
        "collector",
        SyncSettings::default(),
    );
    let report = tally_sync::pipeline::run(&services, tally_sync::SyncScope::Entity("g1".into()))
        .expect("run");
    assert_eq!(report.count(SyncStatus::Created), 1);

    let messages = fs::read_to_string(outbox_dir.path().join(JsonLinesOutbox::MESSAGES_FILE))
        .expect("messages");
    let message: Value = serde_json::from_str(messages.lines().next().expect("one line"))
        .expect("json");
    assert_eq!(message["status"], json!("CREATED"));
    assert_eq!(message["meta"], json!({"type": "f9", "source": "collector"}));
    assert_eq!(message["referential"]["teams"][0]["label"], json!("Arsenal"));

    let datastore = fs::read_to_string(outbox_dir.path().join(JsonLinesOutbox::DATASTORE_FILE))
        .expect("datastore");
    assert!(datastore.lines().count() >= 5);
}

#[test]
fn ack_from_a_second_process_gates_the_first() {
    let fx = Fixture::new();
    let id = EntityId::from("g1");
    write_game(fx.feed.path(), &[("p1", 10)]);

    let first = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    assert_eq!(first.status, SyncStatus::Created);

    // Another process on the same store directory, as `tally ack` would be.
    let other = Fixture::orchestrator(fx.feed.path(), fx.store_dir.path(), &fx.outbox);
    other.acknowledge(&id, &first.checksum).expect("ack");

    let second = fx.orchestrator.sync(&id).expect("sync").expect("ready");
    assert_eq!(second.status, SyncStatus::Unchanged);

    // A write from the first handle keeps the second handle's ack.
    fx.orchestrator.acknowledge(&"g2".into(), "def").expect("ack g2");
    assert_eq!(
        other.acknowledged(&id).expect("read"),
        Some(first.checksum.clone())
    );
    assert_eq!(fx.outbox.messages().len(), 1);
}
