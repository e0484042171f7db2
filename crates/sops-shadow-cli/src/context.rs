//! Per-invocation context: settings, workspace roots and the session.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args as ClapArgs;
use sops_shadow_core::{OsFileSystem, Session, Settings, ShadowPath, SopsEngine};

use crate::config;
use crate::output::ConsoleNotifier;
use crate::state::SessionStateManager;

/// Session type used by every command.
pub type CliSession = Session<SopsEngine, OsFileSystem, ConsoleNotifier>;

/// Flags that override the settings file.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct EngineArgs {
    /// Path to the sops binary
    #[arg(long = "sops-bin", env = "SOPS_SHADOW_BIN", value_name = "PATH", global = true)]
    pub sops_bin: Option<PathBuf>,

    /// Workspace root used to find .sopsrc (repeatable, defaults to the current directory)
    #[arg(long, value_name = "DIR", global = true)]
    pub workspace: Vec<PathBuf>,

    /// Encrypt saved files that have no encrypted original yet
    #[arg(long, global = true)]
    pub create: bool,
}

/// Everything a command needs to build an engine or a session.
#[derive(Debug, Clone)]
pub struct Context {
    pub settings: Settings,
    pub settings_path: PathBuf,
    pub roots: Vec<PathBuf>,
    quiet: bool,
}

impl Context {
    /// Load the settings file and apply command-line overrides.
    pub fn load(args: &EngineArgs, quiet: bool) -> Result<Self> {
        let (settings_path, mut settings) = config::load_settings()?;

        if let Some(bin) = &args.sops_bin {
            settings.bin_path = Some(bin.clone());
        }
        if args.create {
            settings.creation_enabled = true;
        }

        let roots = if args.workspace.is_empty() {
            vec![std::env::current_dir().context("Failed to determine current directory")?]
        } else {
            args.workspace
                .iter()
                .map(|root| absolute(root))
                .collect::<Result<_>>()?
        };

        Ok(Self {
            settings,
            settings_path,
            roots,
            quiet,
        })
    }

    /// Engine configured from the settings.
    pub fn engine(&self) -> SopsEngine {
        SopsEngine::new(self.settings.clone(), self.roots.clone())
    }

    /// Fresh session with nothing tracked.
    pub fn session(&self) -> CliSession {
        Session::new(self.engine(), &self.settings, ConsoleNotifier::new(self.quiet))
    }

    /// Run `f` on a session that carries the shadows recorded by earlier
    /// invocations, then record what is open afterwards.
    pub fn with_tracked_session<R>(
        &self,
        f: impl FnOnce(&mut CliSession) -> Result<R>,
    ) -> Result<R> {
        let manager = SessionStateManager::new()?;
        let mut session = self.session();
        manager.with_lock(|state| {
            for entry in &state.sessions {
                match ShadowPath::new(&entry.shadow) {
                    Some(shadow) => session.restore(shadow, entry.references),
                    None => tracing::warn!(
                        "Dropping invalid state entry {}",
                        entry.shadow.display()
                    ),
                }
            }
            let result = f(&mut session);
            state.sync_from(session.open_shadows());
            result
        })
    }
}

/// Make `path` absolute against the current directory.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Invalid path: {}", path.display()))
}
