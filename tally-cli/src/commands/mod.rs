pub mod ack;
pub mod calendar;
pub mod daemon;
pub mod ids;
pub mod init;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use tally_core::config;
use tally_core::schema::parse_timestamp;
use tally_daemon::daemon_running;
use tally_sync::Services;

/// Services wired from `~/.tally/config.yaml`.
pub fn open_services() -> Result<Services> {
    let home = config::home().context("could not determine home directory")?;
    open_services_at(&home)
}

fn open_services_at(home: &Path) -> Result<Services> {
    let config = config::load_at(home).context("failed to load ~/.tally/config.yaml")?;
    Services::open(&config, home)
        .context("failed to open sync services; run `tally init --feed-dir <dir>` first")
}

/// Where `sync`, `ack` and `unack` run.
pub enum Target {
    /// A daemon is serving the socket under this home; it does the work.
    Daemon(PathBuf),
    Local(Services),
}

impl Target {
    pub fn resolve() -> Result<Self> {
        let home = config::home().context("could not determine home directory")?;
        if daemon_running(&home) {
            return Ok(Target::Daemon(home));
        }
        Ok(Target::Local(open_services_at(&home)?))
    }
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_instant(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Some(ts) = parse_timestamp(s) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid date '{s}'; expected YYYY-MM-DD or RFC 3339"))
}
