//! `tally calendar add|refresh`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use tally_core::{CompetitionId, SeasonId};

use super::open_services;

#[derive(Subcommand, Debug)]
pub enum CalendarCommand {
    /// Fetch one season calendar and store its fixtures.
    Add(CalendarAddArgs),
    /// Re-fetch every calendar already stored.
    Refresh,
}

#[derive(Args, Debug)]
pub struct CalendarAddArgs {
    #[arg(long)]
    pub season: String,

    #[arg(long)]
    pub competition: String,
}

pub fn run(command: CalendarCommand) -> Result<()> {
    let services = open_services()?;

    match command {
        CalendarCommand::Add(args) => {
            let season = SeasonId::from(args.season.as_str());
            let competition = CompetitionId::from(args.competition.as_str());
            let stored = services
                .calendar
                .add_calendar(&season, &competition)
                .with_context(|| format!("failed to add calendar {season}/{competition}"))?;
            println!("✓ Calendar {season}/{competition}: {stored} fixtures");
        }
        CalendarCommand::Refresh => {
            let report = services
                .calendar
                .refresh_calendars()
                .context("calendar refresh failed")?;
            if report.refreshed.is_empty() && report.failed.is_empty() {
                println!("No calendars stored. Run `tally calendar add` first.");
            }
            for (season, competition, stored) in &report.refreshed {
                println!("✓ Calendar {season}/{competition}: {stored} fixtures");
            }
            for (season, competition, reason) in &report.failed {
                println!("✗ Calendar {season}/{competition}: {reason}");
            }
        }
    }

    Ok(())
}
