//! Process exit codes.
//!
//! Scripts can rely on these staying stable.

/// Command completed.
pub const SUCCESS: u8 = 0;
/// Unclassified failure.
pub const GENERAL_ERROR: u8 = 1;
/// The file cannot be handled the way it was asked (unsupported format,
/// not encrypted, tracking disabled).
pub const USAGE: u8 = 2;
/// The `sops` binary failed, timed out or could not be started.
pub const ENGINE_FAILED: u8 = 3;
/// Permission denied on a file or the state directory.
pub const PERMISSION_DENIED: u8 = 5;
/// File or counterpart not found.
pub const NOT_FOUND: u8 = 7;
/// Interrupted by the user.
pub const CANCELLED: u8 = 8;
