//! Info command - show the resolved configuration.
//!
//! # Examples
//!
//! ```bash
//! # Show settings in table format
//! sops-shadow info
//!
//! # Output as JSON for scripting
//! sops-shadow info --json
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args as ClapArgs;
use serde::Serialize;
use sops_shadow_core::fs::{ENGINE_CONFIG_FILENAME, find_upwards};
use sops_shadow_core::run_control::{self, EngineOptions};
use sops_shadow_core::{FileFormat, OsFileSystem};
use tracing::instrument;

use crate::context::Context;
use crate::output::create_table;
use crate::state::SessionStateManager;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// JSON output format for info command
#[derive(Serialize)]
struct ResolvedInfo {
    settings_file: PathBuf,
    settings_file_exists: bool,
    enabled: bool,
    creation_enabled: bool,
    engine_binary: PathBuf,
    engine_timeout: Option<String>,
    workspace_roots: Vec<PathBuf>,
    run_control: Option<PathBuf>,
    engine_config: Option<PathBuf>,
    engine_args: Vec<String>,
    engine_env: Vec<String>,
    associations: BTreeMap<String, FileFormat>,
    state_file: PathBuf,
    open_shadows: usize,
}

#[instrument(level = "info", name = "cmd::info", skip_all)]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let engine = ctx.engine();
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let options = EngineOptions::resolve(&ctx.settings, &ctx.roots);
    let state_manager = SessionStateManager::new()?;
    let open_shadows = state_manager.load()?.sessions.len();

    let info = ResolvedInfo {
        settings_file: ctx.settings_path.clone(),
        settings_file_exists: ctx.settings_path.is_file(),
        enabled: ctx.settings.enabled,
        creation_enabled: ctx.settings.creation_enabled,
        engine_binary: engine.binary(),
        engine_timeout: ctx
            .settings
            .engine_timeout
            .map(|timeout| format!("{timeout:?}")),
        workspace_roots: ctx.roots.clone(),
        run_control: run_control::load(&ctx.settings, &ctx.roots).map(|(path, _)| path),
        engine_config: find_upwards(&OsFileSystem, &cwd, ENGINE_CONFIG_FILENAME),
        engine_args: options
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect(),
        engine_env: options.env.iter().map(|(name, _)| (*name).to_owned()).collect(),
        associations: ctx.settings.associations.clone(),
        state_file: state_manager.state_path().to_path_buf(),
        open_shadows,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let optional = |path: &Option<PathBuf>| {
        path.as_ref()
            .map_or_else(|| "(none)".to_owned(), |path| path.display().to_string())
    };
    let mut table = create_table();
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec![
        "Settings File",
        &format!(
            "{}{}",
            info.settings_file.display(),
            if info.settings_file_exists { "" } else { " (not found, using defaults)" }
        ),
    ]);
    table.add_row(vec!["Enabled", &info.enabled.to_string()]);
    table.add_row(vec!["Create New Files", &info.creation_enabled.to_string()]);
    table.add_row(vec!["Engine Binary", &info.engine_binary.display().to_string()]);
    table.add_row(vec![
        "Engine Timeout",
        info.engine_timeout.as_deref().unwrap_or("(none)"),
    ]);
    for root in &info.workspace_roots {
        table.add_row(vec!["Workspace Root", &root.display().to_string()]);
    }
    table.add_row(vec!["Run Control", &optional(&info.run_control)]);
    table.add_row(vec!["Engine Config", &optional(&info.engine_config)]);
    if !info.engine_args.is_empty() {
        table.add_row(vec!["Engine Arguments", &info.engine_args.join(" ")]);
    }
    if !info.engine_env.is_empty() {
        table.add_row(vec!["Engine Environment", &info.engine_env.join(", ")]);
    }
    for (pattern, format) in &info.associations {
        table.add_row(vec![
            "Association",
            &format!("{pattern} -> {}", format.as_str()),
        ]);
    }
    table.add_row(vec!["State File", &info.state_file.display().to_string()]);
    table.add_row(vec!["Open Shadows", &info.open_shadows.to_string()]);
    println!("{table}");

    Ok(())
}
