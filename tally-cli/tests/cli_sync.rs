use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::Duration as StdDuration;

use assert_cmd::prelude::*;
use chrono::{DateTime, Duration, Utc};
use predicates::str::contains;
use serde_json::{json, Value};
use tempfile::TempDir;

fn tally_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tally"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

fn write_json(root: &Path, rel: &str, body: Value) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("create fixture dir");
    fs::write(path, body.to_string()).expect("write fixture");
}

fn write_feed(feed: &Path, kickoff: DateTime<Utc>, touches: i64) {
    write_json(
        feed,
        "calendars/2015-8.json",
        json!([{
            "id": "g1",
            "date": kickoff.to_rfc3339(),
            "home": "Arsenal",
            "away": "West Ham United"
        }]),
    );
    write_json(
        feed,
        "games/g1.json",
        json!({
            "id": "g1",
            "sport": "soccer",
            "season": {"id": "2015", "label": "Season 2015/2016"},
            "competition": {"id": "8", "label": "English Barclays Premier League"},
            "teams": [{"id": "t1", "label": "Arsenal"}],
            "persons": [{"id": "p1", "label": "Santi Cazorla"}],
            "match_info": {"competition_id": "8", "season_id": 2015},
            "player_stats": [
                {"player_id": "p1", "team_id": "t1", "type": "touches", "value": touches}
            ]
        }),
    );
}

fn setup(kickoff: DateTime<Utc>) -> (TempDir, TempDir) {
    let home = TempDir::new().expect("home");
    let feed = TempDir::new().expect("feed");
    write_feed(feed.path(), kickoff, 71);

    tally_cmd(home.path())
        .arg("init")
        .arg("--feed-dir")
        .arg(feed.path())
        .assert()
        .success()
        .stdout(contains("Feed directory set"));
    tally_cmd(home.path())
        .args(["calendar", "add", "--season", "2015", "--competition", "8"])
        .assert()
        .success()
        .stdout(contains("1 fixtures"));
    (home, feed)
}

fn sync_json(home: &Path) -> Value {
    let output = tally_cmd(home)
        .args(["sync", "g1", "--json"])
        .output()
        .expect("run tally sync");
    assert!(
        output.status.success(),
        "sync failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("sync report JSON")
}

#[test]
fn acknowledgment_drives_classification() {
    let kickoff = DateTime::parse_from_rfc3339("2015-08-08T14:00:00Z")
        .expect("kickoff")
        .with_timezone(&Utc);
    let (home, feed) = setup(kickoff);

    let first = sync_json(home.path());
    assert_eq!(first["synced"][0]["status"], json!("CREATED"));
    let checksum = first["synced"][0]["checksum"]
        .as_str()
        .expect("checksum")
        .to_string();

    // Without an ack the same state is offered again.
    let again = sync_json(home.path());
    assert_eq!(again["synced"][0]["status"], json!("CREATED"));
    assert_eq!(again["synced"][0]["checksum"], json!(checksum));

    tally_cmd(home.path())
        .args(["ack", "g1", &checksum])
        .assert()
        .success()
        .stdout(contains("acknowledged"));
    let unchanged = sync_json(home.path());
    assert_eq!(unchanged["synced"][0]["status"], json!("UNCHANGED"));

    write_feed(feed.path(), kickoff, 72);
    let updated = sync_json(home.path());
    assert_eq!(updated["synced"][0]["status"], json!("UPDATED"));
    assert_ne!(updated["synced"][0]["checksum"], json!(checksum));

    tally_cmd(home.path())
        .args(["unack", "g1"])
        .assert()
        .success()
        .stdout(contains("unacknowledged"));
    let recreated = sync_json(home.path());
    assert_eq!(recreated["synced"][0]["status"], json!("CREATED"));

    let messages =
        fs::read_to_string(home.path().join(".tally/outbox/messages.jsonl")).expect("messages");
    let statuses: Vec<String> = messages
        .lines()
        .map(|line| {
            let message: Value = serde_json::from_str(line).expect("message JSON");
            message["status"].as_str().expect("status").to_string()
        })
        .collect();
    assert_eq!(statuses, vec!["CREATED", "CREATED", "UPDATED", "CREATED"]);
}

#[test]
fn ids_by_season_and_by_range() {
    let kickoff = DateTime::parse_from_rfc3339("2015-08-08T14:00:00Z")
        .expect("kickoff")
        .with_timezone(&Utc);
    let (home, _feed) = setup(kickoff);

    tally_cmd(home.path())
        .args(["ids", "--season", "2015", "--competition", "8"])
        .assert()
        .success()
        .stdout("g1\n");
    tally_cmd(home.path())
        .args(["ids", "--from", "2015-08-08", "--to", "2015-08-09"])
        .assert()
        .success()
        .stdout("g1\n");
    tally_cmd(home.path())
        .args(["ids", "--from", "2015-08-09", "--to", "2015-08-10"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn status_lists_due_games() {
    let (home, _feed) = setup(Utc::now() - Duration::hours(1));

    let output = tally_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("run tally status");
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).expect("status JSON");
    assert_eq!(report["games"][0]["id"], json!("g1"));
    assert_eq!(report["games"][0]["fixture"], json!("Arsenal - West Ham United"));
    assert_eq!(report["games"][0]["acknowledged"], Value::Null);

    let output = tally_cmd(home.path())
        .args(["sync", "--due", "--json"])
        .output()
        .expect("run tally sync --due");
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).expect("sync JSON");
    assert_eq!(report["synced"][0]["id"], json!("g1"));
}

#[test]
fn sync_without_init_points_at_init() {
    let home = TempDir::new().expect("home");
    tally_cmd(home.path())
        .args(["sync", "g1"])
        .assert()
        .failure()
        .stderr(contains("tally init"));
}

#[test]
fn sync_needs_an_id_or_due() {
    let home = TempDir::new().expect("home");
    tally_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("--due"));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");
    let output = tally_cmd(home.path())
        .args(["daemon", "status"])
        .output()
        .expect("run tally daemon status");
    assert!(output.status.success());
    let status: Value = serde_json::from_slice(&output.stdout).expect("status JSON");
    assert_eq!(status["running"], json!(false));
}

fn wait_for_daemon(home: &Path) {
    for _ in 0..100 {
        let output = tally_cmd(home)
            .args(["daemon", "status"])
            .output()
            .expect("run tally daemon status");
        let status: Value = serde_json::from_slice(&output.stdout).unwrap_or(Value::Null);
        if status["running"] == json!(true) {
            return;
        }
        sleep(StdDuration::from_millis(100));
    }
    panic!("daemon did not come up");
}

#[test]
fn commands_route_through_a_running_daemon() {
    let kickoff = DateTime::parse_from_rfc3339("2015-08-08T14:00:00Z")
        .expect("kickoff")
        .with_timezone(&Utc);
    let (home, feed) = setup(kickoff);

    let mut daemon = tally_cmd(home.path())
        .args(["daemon", "start"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn daemon");
    wait_for_daemon(home.path());

    let first = sync_json(home.path());
    assert_eq!(first["synced"][0]["status"], json!("CREATED"));
    let checksum = first["synced"][0]["checksum"]
        .as_str()
        .expect("checksum")
        .to_string();

    tally_cmd(home.path())
        .args(["ack", "g1", &checksum])
        .assert()
        .success()
        .stdout(contains("via daemon"));
    let unchanged = sync_json(home.path());
    assert_eq!(unchanged["synced"][0]["status"], json!("UNCHANGED"));

    write_json(
        feed.path(),
        "ack-ru7.json",
        json!({"id": "g1", "checksum": "other", "meta": {"type": "ru7", "source": "warehouse"}}),
    );
    tally_cmd(home.path())
        .arg("ack")
        .arg("--message")
        .arg(feed.path().join("ack-ru7.json"))
        .assert()
        .failure()
        .stderr(contains("rejected"));
    let still = sync_json(home.path());
    assert_eq!(still["synced"][0]["status"], json!("UNCHANGED"));

    tally_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("stop requested"));
    let exit = daemon.wait().expect("daemon exit");
    assert!(exit.success());
}
