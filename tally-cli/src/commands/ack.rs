//! `tally ack` / `tally unack`
//!
//! Both go through the daemon socket while a daemon is running, so the
//! daemon applies the change itself. Otherwise they write the store directly.

use std::fs;
use std::io::Read;

use anyhow::{Context, Result};
use clap::Args;

use tally_core::EntityId;
use tally_daemon::{request_ack, request_ack_message, request_unack};
use tally_sync::AckMessage;

use super::Target;

#[derive(Args, Debug)]
pub struct AckArgs {
    #[arg(required_unless_present = "message")]
    pub id: Option<String>,

    /// Checksum reported by the sync being acknowledged.
    #[arg(required_unless_present = "message")]
    pub checksum: Option<String>,

    /// Consumer acknowledgment `{id, checksum, meta}` as a JSON file, or `-` for stdin.
    #[arg(long, conflicts_with_all = ["id", "checksum"])]
    pub message: Option<String>,
}

impl AckArgs {
    pub fn run(self) -> Result<()> {
        if let Some(source) = &self.message {
            let message = read_message(source)?;
            return ack_message(&message);
        }
        let (Some(id), Some(checksum)) = (self.id, self.checksum) else {
            anyhow::bail!("provide a game id and checksum, or --message");
        };
        let id = EntityId(id);

        let via = match Target::resolve()? {
            Target::Daemon(home) => {
                request_ack(&home, &id.0, &checksum)
                    .with_context(|| format!("daemon failed to acknowledge '{id}'"))?;
                " (via daemon)"
            }
            Target::Local(services) => {
                services
                    .orchestrator
                    .acknowledge(&id, &checksum)
                    .with_context(|| format!("failed to acknowledge '{id}'"))?;
                ""
            }
        };
        println!("✓ '{id}' acknowledged at {checksum}{via}");
        Ok(())
    }
}

fn read_message(source: &str) -> Result<AckMessage> {
    let text = if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read ack message from stdin")?;
        text
    } else {
        fs::read_to_string(source)
            .with_context(|| format!("failed to read ack message from {source}"))?
    };
    serde_json::from_str(&text).context("ack message must be {id, checksum, meta: {type, source}}")
}

fn ack_message(message: &AckMessage) -> Result<()> {
    let id = &message.id;
    let via = match Target::resolve()? {
        Target::Daemon(home) => {
            request_ack_message(&home, message)
                .with_context(|| format!("daemon failed to acknowledge '{id}'"))?;
            " (via daemon)"
        }
        Target::Local(services) => {
            services
                .orchestrator
                .handle_ack(message)
                .with_context(|| format!("failed to acknowledge '{id}'"))?;
            ""
        }
    };
    println!(
        "✓ '{id}' acknowledged at {} for {}{via}",
        message.checksum, message.meta.source
    );
    Ok(())
}

#[derive(Args, Debug)]
pub struct UnackArgs {
    pub id: String,
}

impl UnackArgs {
    pub fn run(self) -> Result<()> {
        let id = EntityId(self.id);
        let existed = match Target::resolve()? {
            Target::Daemon(home) => request_unack(&home, &id.0)
                .with_context(|| format!("daemon failed to unacknowledge '{id}'"))?
                .get("existed")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Target::Local(services) => services
                .orchestrator
                .unacknowledge(&id)
                .with_context(|| format!("failed to unacknowledge '{id}'"))?,
        };
        if existed {
            println!("✓ '{id}' unacknowledged; next sync reports it as CREATED");
        } else {
            println!("'{id}' had no acknowledgment");
        }
        Ok(())
    }
}
