//! Shadow-file synchronization engine for SOPS-encrypted configuration files.
//!
//! An encrypted original such as `secret.yaml` is edited through a decrypted
//! shadow (`.decrypted~secret.yaml`) that lives next to it. This crate keeps the
//! two in sync while the external `sops` binary performs all cryptography.
//!
//! # Components
//!
//! - [`shadow`] - naming convention between originals and shadows
//! - [`fingerprint`] - change-detection digest over file bytes
//! - [`fs`] - filesystem seam and `.sops.yaml` discovery
//! - [`run_control`] - `.sopsrc` lookup and per-call engine options
//! - [`format`] - supported formats, parser table and encryption detection
//! - [`engine`] - the [`Engine`] seam and the `sops` subprocess invoker
//! - [`reconcile`] - decides decrypt / re-encrypt / no-op for a file pair
//! - [`lifecycle`] - open-shadow bookkeeping and best-effort cleanup
//! - [`session`] - event routing for open, focus, save and close
//!
//! # Example
//!
//! ```no_run
//! use sops_shadow_core::{Session, Settings, SopsEngine, TracingNotifier};
//!
//! let settings = Settings::default();
//! let engine = SopsEngine::new(settings.clone(), vec![std::env::current_dir().unwrap()]);
//! let mut session = Session::new(engine, &settings, TracingNotifier);
//!
//! session.open("config/secret.yaml").unwrap();
//! // ... edit config/.decrypted~secret.yaml ...
//! session.save("config/.decrypted~secret.yaml").unwrap();
//! session.close("config/secret.yaml");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod format;
pub mod fs;
pub mod lifecycle;
pub mod reconcile;
pub mod run_control;
pub mod session;
pub mod settings;
pub mod shadow;

pub use engine::{Engine, EngineError, SopsEngine};
pub use error::SyncError;
pub use fingerprint::Fingerprint;
pub use format::{FileFormat, FormatResolver, ParseError};
pub use fs::{FileSystem, OsFileSystem};
pub use lifecycle::{CleanupAction, CleanupResult, OpenShadowSet, Release};
pub use reconcile::{PairStatus, Reconciler, SaveOutcome, SyncDecision, SyncOutcome, SyncState};
pub use session::{
    CloseOutcome, EventOutcome, FocusOutcome, Notifier, OpenOutcome, Session, SessionEvent,
    TracingNotifier,
};
pub use settings::{EngineDefaults, Settings};
pub use shadow::{DECRYPTED_PREFIX, Identity, OriginalPath, ShadowPath};
