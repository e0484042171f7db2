//! Session state shared between CLI invocations.
//!
//! `open` and `close` run as separate processes, so the shadows they
//! materialize are recorded in `sessions.json` inside the config directory.
//!
//! # Concurrency Safety
//!
//! The state file is protected by an advisory file lock so concurrent
//! invocations cannot lose each other's updates. Use `with_lock()` for
//! read-modify-write operations.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sops_shadow_core::OpenShadowSet;

use crate::config;

/// One materialized shadow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    /// The decrypted file.
    pub shadow: PathBuf,
    /// The encrypted file it mirrors.
    pub original: PathBuf,
    /// Number of `open` calls not yet matched by `close`.
    pub references: usize,
    /// When the shadow was first opened.
    pub opened_at: DateTime<Utc>,
}

/// The complete session state stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Schema version for future migrations
    #[serde(default = "default_version")]
    pub version: u32,
    /// Open shadows
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

fn default_version() -> u32 {
    1
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            version: default_version(),
            sessions: Vec::new(),
        }
    }
}

impl SessionState {
    /// Replace the entries with the contents of `open`, keeping the original
    /// opening time of shadows that were already recorded.
    pub fn sync_from(&mut self, open: &OpenShadowSet) {
        let now = Utc::now();
        let mut sessions: Vec<SessionEntry> = open
            .iter()
            .map(|(shadow, references)| {
                let opened_at = self
                    .find(shadow.as_path())
                    .map_or(now, |entry| entry.opened_at);
                SessionEntry {
                    shadow: shadow.as_path().to_path_buf(),
                    original: shadow.original().into_path_buf(),
                    references,
                    opened_at,
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.shadow.cmp(&b.shadow));
        self.sessions = sessions;
    }

    /// Entry recorded for `shadow`.
    pub fn find(&self, shadow: &Path) -> Option<&SessionEntry> {
        self.sessions.iter().find(|entry| entry.shadow == shadow)
    }
}

/// Manages the session state file.
pub struct SessionStateManager {
    state_path: PathBuf,
    lock_path: PathBuf,
}

/// Default timeout for acquiring the state file lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

impl SessionStateManager {
    /// Create a new state manager, initializing the config directory if needed.
    pub fn new() -> Result<Self> {
        let config_dir = config::config_dir()?;
        Self::in_dir(&config_dir)
    }

    fn in_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

        Ok(Self {
            state_path: config_dir.join("sessions.json"),
            lock_path: config_dir.join("sessions.lock"),
        })
    }

    /// Get the path to the state file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Execute a function while holding an exclusive lock on the state file.
    ///
    /// The state is saved afterwards even if `f` fails, since shadows it
    /// materialized before failing still need to be recorded.
    pub fn with_lock<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut SessionState) -> Result<R>,
    {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open lock file: {}", self.lock_path.display()))?;

        let start = Instant::now();
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > LOCK_TIMEOUT {
                        anyhow::bail!(
                            "Timed out waiting for state file lock after {:?}. \
                             Another sops-shadow process may be holding the lock.",
                            LOCK_TIMEOUT
                        );
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to lock: {}", self.lock_path.display()));
                }
            }
        }

        let mut state = self.load()?;
        let result = f(&mut state);

        if let Err(e) = self.save(&state) {
            tracing::warn!("Failed to save state: {}", e);
        }

        let _ = FileExt::unlock(&lock_file);

        result
    }

    /// Load the current state, returning default if file doesn't exist.
    pub fn load(&self) -> Result<SessionState> {
        if !self.state_path.exists() {
            return Ok(SessionState::default());
        }

        let contents = std::fs::read_to_string(&self.state_path)
            .with_context(|| format!("Failed to read state file: {}", self.state_path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state file: {}", self.state_path.display()))
    }

    fn save(&self, state: &SessionState) -> Result<()> {
        let contents = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.state_path, contents)
            .with_context(|| format!("Failed to write state file: {}", self.state_path.display()))
    }
}
