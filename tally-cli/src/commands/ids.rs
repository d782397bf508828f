//! `tally ids` — list calendar game ids.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use tally_core::{CompetitionId, SeasonId};

use super::{open_services, parse_instant};

#[derive(Args, Debug)]
pub struct IdsArgs {
    /// Kickoff lower bound (inclusive).
    #[arg(long, value_parser = parse_instant, requires = "to", conflicts_with = "season")]
    pub from: Option<DateTime<Utc>>,

    /// Kickoff upper bound (exclusive).
    #[arg(long, value_parser = parse_instant, requires = "from")]
    pub to: Option<DateTime<Utc>>,

    #[arg(long, requires = "competition")]
    pub season: Option<String>,

    #[arg(long, requires = "season")]
    pub competition: Option<String>,
}

impl IdsArgs {
    pub fn run(self) -> Result<()> {
        let services = open_services()?;

        let ids = match (self.from, self.to, self.season, self.competition) {
            (Some(from), Some(to), _, _) => services
                .calendar
                .list_ids_by_date_range(from, to)
                .context("failed to list ids by date range")?,
            (_, _, Some(season), Some(competition)) => services
                .calendar
                .list_ids_by_season_competition(
                    &SeasonId(season),
                    &CompetitionId(competition),
                )
                .context("failed to list ids by season")?,
            _ => anyhow::bail!("provide --from/--to or --season/--competition"),
        };

        for id in ids {
            println!("{id}");
        }
        Ok(())
    }
}
