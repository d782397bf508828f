//! `tally sync`: classify and reconcile games, on the daemon when one runs.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;

use tally_core::{EntityId, SyncStatus};
use tally_daemon::request_sync;
use tally_sync::pipeline::{self, BatchReport, SyncScope};

use super::Target;

/// Arguments for `tally sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Game to sync (omit when using `--due`).
    pub id: Option<String>,

    /// Sync every game whose kickoff falls in the configured window.
    #[arg(long, conflicts_with = "id")]
    pub due: bool,

    /// Emit the batch report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let scope = match (self.id, self.due) {
            (Some(id), _) => SyncScope::Entity(EntityId(id)),
            (None, true) => SyncScope::Due { now: Utc::now() },
            (None, false) => anyhow::bail!("provide a game id or use --due"),
        };

        let (report, skipped) = match Target::resolve()? {
            Target::Daemon(home) => via_daemon(&home, scope)?,
            Target::Local(services) => (
                pipeline::run(&services, scope).context("sync failed")?,
                Vec::new(),
            ),
        };

        if self.json {
            for id in &skipped {
                eprintln!("{id}: already being synced by the daemon");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize sync report")?
            );
            return Ok(());
        }
        print_report(&report, &skipped);
        Ok(())
    }
}

/// Run the pass on the daemon's worker pool. Ids it is already syncing come
/// back as skipped.
fn via_daemon(home: &Path, scope: SyncScope) -> Result<(BatchReport, Vec<EntityId>)> {
    let id = match scope {
        SyncScope::Entity(id) => Some(id.0),
        _ => None,
    };
    let mut summary = request_sync(home, id).context("daemon sync failed")?;
    let report: BatchReport = serde_json::from_value(summary["report"].take())
        .context("daemon returned an unreadable sync report")?;
    let skipped: Vec<EntityId> = serde_json::from_value(summary["skipped"].take())
        .context("daemon returned unreadable skipped ids")?;
    Ok((report, skipped))
}

fn print_report(report: &BatchReport, skipped: &[EntityId]) {
    if report.is_empty() && skipped.is_empty() {
        println!("Nothing to sync.");
        return;
    }

    for synced in &report.synced {
        println!(
            "✓ {}  {}  {}",
            synced.id,
            status_label(synced.status),
            synced.checksum.bright_black()
        );
    }
    for id in &report.not_ready {
        println!("· {id}  {}", "NOT READY".bright_black());
    }
    for failed in &report.failed {
        println!("✗ {}  {}", failed.id, failed.reason.red());
    }
    for id in skipped {
        println!("· {id}  {}", "IN FLIGHT".bright_black());
    }
}

fn status_label(status: SyncStatus) -> String {
    let label = status.to_string();
    match status {
        SyncStatus::Created => label.green().bold().to_string(),
        SyncStatus::Updated => label.yellow().bold().to_string(),
        SyncStatus::Unchanged => label.bright_black().to_string(),
    }
}
