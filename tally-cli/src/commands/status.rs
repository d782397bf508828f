//! `tally status` — due games and their acknowledgment state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use tally_sync::Services;

use super::open_services;

/// Arguments for `tally status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let services = open_services()?;
        let report = build_report(&services, Utc::now())?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(report);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    window_from: String,
    window_to: String,
    games: Vec<GameStatus>,
}

#[derive(Debug, Serialize)]
struct GameStatus {
    id: String,
    kickoff: String,
    fixture: String,
    acknowledged: Option<String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "game")]
    id: String,
    #[tabled(rename = "kickoff")]
    kickoff: String,
    #[tabled(rename = "fixture")]
    fixture: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "acked checksum")]
    checksum: String,
}

fn build_report(services: &Services, now: DateTime<Utc>) -> Result<StatusReport> {
    let ids = services
        .due_ids(now)
        .context("failed to read the calendar")?;

    let mut games = Vec::with_capacity(ids.len());
    for id in ids {
        let entry = services
            .calendar
            .entry(&id)
            .with_context(|| format!("failed to read calendar entry for '{id}'"))?
            .unwrap_or_default();
        let field = |name: &str| {
            entry
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or("?")
                .to_string()
        };
        let acknowledged = services
            .orchestrator
            .acknowledged(&id)
            .with_context(|| format!("failed to read acknowledgment for '{id}'"))?;
        games.push(GameStatus {
            kickoff: field("date"),
            fixture: format!("{} - {}", field("home"), field("away")),
            id: id.0,
            acknowledged,
        });
    }

    Ok(StatusReport {
        window_from: tally_core::types::format_timestamp(&(now - services.lookback())),
        window_to: tally_core::types::format_timestamp(&(now + services.lookahead())),
        games,
    })
}

fn print_table(report: StatusReport) {
    let acked = report
        .games
        .iter()
        .filter(|g| g.acknowledged.is_some())
        .count();
    println!(
        "Tally v{} | {} due games | {} acknowledged | window {} .. {}",
        env!("CARGO_PKG_VERSION"),
        report.games.len(),
        acked,
        report.window_from,
        report.window_to,
    );

    if report.games.is_empty() {
        println!("No games due. Run 'tally calendar add' to load fixtures.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .games
        .into_iter()
        .map(|game| {
            let (status, checksum) = match game.acknowledged {
                Some(checksum) => ("ACKED".green().bold().to_string(), short(&checksum)),
                None => ("PENDING".yellow().bold().to_string(), "-".to_string()),
            };
            StatusTableRow {
                id: game.id,
                kickoff: game.kickoff,
                fixture: game.fixture,
                status,
                checksum,
            }
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn short(checksum: &str) -> String {
    checksum.chars().take(12).collect()
}
