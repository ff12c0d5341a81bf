//! Stable exit codes for `riva` commands.

/// Command succeeded; for `run`, the root intention was verified.
pub const OK: i32 = 0;
/// Invalid input, config, or session file, or any other error.
pub const INVALID: i32 = 1;
/// `riva run` finished with the root intention failed.
pub const ROOT_FAILED: i32 = 2;
