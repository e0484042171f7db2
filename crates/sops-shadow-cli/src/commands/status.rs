//! Status command - describe a secret pair without changing it.
//!
//! # Examples
//!
//! ```bash
//! # Table for humans
//! sops-shadow status secrets/prod.yaml
//!
//! # JSON for scripts
//! sops-shadow status secrets/prod.yaml --json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{Cell, Color};
use serde::Serialize;
use sops_shadow_core::{Fingerprint, PairStatus, SyncState};
use tracing::instrument;

use super::{Refusal, describe};
use crate::context::{Context, absolute};
use crate::output::create_table;
use crate::state::{SessionEntry, SessionStateManager};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Encrypted file or shadow
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// JSON output format for status command
#[derive(Serialize)]
struct StatusReport<'a> {
    #[serde(flatten)]
    pair: &'a PairStatus,
    tracked: Option<&'a SessionEntry>,
}

#[instrument(level = "info", name = "cmd::status", skip_all, fields(file = %args.file.display()))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let path = absolute(&args.file)?;
    let Some(status) = ctx.session().status(&path)? else {
        return Err(Refusal::Unsupported(path).into());
    };

    let state = SessionStateManager::new()?.load()?;
    let tracked = state.find(status.shadow.as_path());

    if args.json {
        let report = StatusReport {
            pair: &status,
            tracked,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let fingerprint =
        |fp: Option<Fingerprint>| fp.map_or_else(|| "-".to_owned(), |fp| fp.to_string());
    let mut table = create_table();
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Original", &status.original.to_string()]);
    table.add_row(vec!["Shadow", &status.shadow.to_string()]);
    table.add_row(vec!["Format", status.format.as_str()]);
    table.add_row(vec!["Original exists", yes_no(status.original_exists)]);
    table.add_row(vec!["Shadow exists", yes_no(status.shadow_exists)]);
    table.add_row(vec!["Encrypted", yes_no(status.encrypted)]);
    table.add_row(vec![
        "Original fingerprint",
        &fingerprint(status.original_fingerprint),
    ]);
    table.add_row(vec!["Shadow fingerprint", &fingerprint(status.shadow_fingerprint)]);

    if let Some(pending) = status.pending {
        table.add_row(vec![
            Cell::new("State"),
            Cell::new(state_label(pending.state)).fg(state_color(pending.state)),
        ]);
        table.add_row(vec!["Next sync", describe(pending.decision)]);
    }
    let references = tracked.map_or(0, |entry| entry.references);
    table.add_row(vec!["Open references", &references.to_string()]);
    if let Some(entry) = tracked {
        table.add_row(vec!["Opened at", &entry.opened_at.to_rfc3339()]);
    }

    println!("{table}");
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn state_label(state: SyncState) -> &'static str {
    match state {
        SyncState::Unsynced => "unsynced",
        SyncState::ShadowStale => "shadow stale",
        SyncState::OriginalStale => "original stale",
        SyncState::InSync => "in sync",
    }
}

fn state_color(state: SyncState) -> Color {
    match state {
        SyncState::InSync => Color::Green,
        SyncState::ShadowStale | SyncState::OriginalStale => Color::Yellow,
        SyncState::Unsynced => Color::Red,
    }
}
