//! Cleanup command - delete every shadow recorded by `open`.

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{Cell, Color};
use sops_shadow_core::CleanupAction;
use tracing::instrument;

use crate::context::Context;
use crate::output::create_table;

#[derive(ClapArgs, Clone)]
pub struct Args {}

#[instrument(level = "info", name = "cmd::cleanup", skip_all)]
pub fn execute(ctx: &Context, _args: &Args) -> Result<()> {
    let results = ctx.with_tracked_session(|session| Ok(session.shutdown()))?;

    if results.is_empty() {
        eprintln!("No open shadows.");
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Shadow", "Result"]);
    for result in &results {
        let (label, color) = match &result.action {
            CleanupAction::Deleted => ("deleted".to_owned(), Color::Green),
            CleanupAction::AlreadyGone => ("already gone".to_owned(), Color::White),
            CleanupAction::Failed { reason } => (format!("failed: {reason}"), Color::Red),
        };
        table.add_row(vec![
            Cell::new(result.shadow.to_string()),
            Cell::new(label).fg(color),
        ]);
    }
    println!("{table}");

    let failed = results.iter().filter(|result| !result.is_ok()).count();
    eprintln!(
        "Cleaned up {} shadow(s){}",
        results.len() - failed,
        if failed > 0 {
            format!(", {failed} could not be deleted")
        } else {
            String::new()
        }
    );
    Ok(())
}
