#![deny(unsafe_code)]

mod commands;
mod config;
mod context;
mod exit_code;
mod output;
mod state;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sops_shadow_core::{EngineError, SyncError};

use crate::commands::{
    Refusal, cleanup, close, completions, decrypt, edit, info, open, save, status, toggle,
};
use crate::context::{Context, EngineArgs};

/// Edit SOPS-encrypted files through decrypted shadow files
#[derive(Parser)]
#[command(name = "sops-shadow")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Decrypt next to the original and print the shadow path
    sops-shadow open secrets/prod.yaml

    # Re-encrypt after editing the shadow
    sops-shadow save secrets/.decrypted~prod.yaml

    # Delete the shadow again
    sops-shadow close secrets/prod.yaml

    # Do all three around your editor
    sops-shadow edit secrets/prod.yaml
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt a file into its shadow and print the shadow path
    Open(open::Args),

    /// Propagate a saved shadow back into its encrypted original
    Save(save::Args),

    /// Release a shadow opened with `open`, deleting it when no longer used
    Close(close::Args),

    /// Open, run an editor on the shadow, re-encrypt and clean up
    Edit(edit::Args),

    /// Print the decrypted content of a file
    Decrypt(decrypt::Args),

    /// Show the sync state of a file pair
    Status(status::Args),

    /// Print the other side of a file pair
    Toggle(toggle::Args),

    /// Delete every shadow recorded by `open`
    Cleanup(cleanup::Args),

    /// Show resolved settings and engine configuration
    Info(info::Args),

    /// Generate shell completions
    Completions(completions::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    if let Commands::Completions(args) = &cli.command {
        return completions::execute(args);
    }

    let ctx = Context::load(&cli.engine, cli.quiet)?;
    match &cli.command {
        Commands::Open(args) => open::execute(&ctx, args),
        Commands::Save(args) => save::execute(&ctx, args),
        Commands::Close(args) => close::execute(&ctx, args),
        Commands::Edit(args) => edit::execute(&ctx, args),
        Commands::Decrypt(args) => decrypt::execute(&ctx, args),
        Commands::Status(args) => status::execute(&ctx, args),
        Commands::Toggle(args) => toggle::execute(&ctx, args),
        Commands::Cleanup(args) => cleanup::execute(&ctx, args),
        Commands::Info(args) => info::execute(&ctx, args),
        Commands::Completions(args) => completions::execute(args),
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(refusal) = cause.downcast_ref::<Refusal>() {
            return match refusal {
                Refusal::NoCounterpart(_) => exit_code::NOT_FOUND,
                Refusal::Disabled(_) | Refusal::Unsupported(_) | Refusal::NotEncrypted(_) => {
                    exit_code::USAGE
                }
            };
        }

        if let Some(sync_err) = cause.downcast_ref::<SyncError>() {
            match sync_err {
                SyncError::Engine(_) => return exit_code::ENGINE_FAILED,
                SyncError::FileSystem { source, .. } => {
                    if let Some(code) = io_exit_code(source) {
                        return code;
                    }
                }
                SyncError::Parse(_) => {}
            }
        }

        if cause.downcast_ref::<EngineError>().is_some() {
            return exit_code::ENGINE_FAILED;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && let Some(code) = io_exit_code(io_err)
        {
            return code;
        }
    }

    let msg = format!("{e:#}").to_lowercase();
    if msg.contains("cancelled") || msg.contains("interrupted") {
        exit_code::CANCELLED
    } else {
        exit_code::GENERAL_ERROR
    }
}

fn io_exit_code(err: &io::Error) -> Option<u8> {
    match err.kind() {
        io::ErrorKind::PermissionDenied => Some(exit_code::PERMISSION_DENIED),
        io::ErrorKind::NotFound => Some(exit_code::NOT_FOUND),
        io::ErrorKind::Interrupted => Some(exit_code::CANCELLED),
        _ => None,
    }
}
