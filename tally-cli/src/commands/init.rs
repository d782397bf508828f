//! `tally init --feed-dir <dir>`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use tally_core::config;

/// Point the configuration at a feed directory.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory holding `games/<id>.json` and `calendars/<season>-<competition>.json`.
    #[arg(long)]
    pub feed_dir: PathBuf,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let feed_dir = self
            .feed_dir
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.feed_dir.display()))?;

        let home = config::home().context("could not determine home directory")?;
        let config = config::init_at(&home, feed_dir.clone())
            .with_context(|| format!("failed to init with feed dir '{}'", feed_dir.display()))?;

        println!("✓ Feed directory set to '{}'", feed_dir.display());
        println!("  Store:  {}", config.store_dir_at(&home).display());
        println!("  Outbox: {}", config.outbox_dir_at(&home).display());
        println!("  Saved to: {}", config::config_path_at(&home).display());
        Ok(())
    }
}
