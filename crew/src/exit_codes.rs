//! Stable exit codes for crew CLI commands.

/// Command succeeded or the workflow completed.
pub const OK: i32 = 0;
/// Invalid arguments, config or rule table, or any other setup error.
pub const INVALID: i32 = 1;
/// `crew run` finished with a failed workflow.
pub const FAILED: i32 = 2;
