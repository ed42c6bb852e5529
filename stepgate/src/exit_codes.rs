//! Stable exit codes for stepgate CLI commands.

/// Command succeeded; submissions were accepted.
pub const OK: i32 = 0;
/// Invalid input, missing workspace, unknown job or other errors.
pub const INVALID: i32 = 1;
/// The request was evaluated and turned down (rejected submission,
/// disallowed transition, missing planning artifacts, failing gates).
pub const REJECTED: i32 = 2;
/// The submission completed the job.
pub const COMPLETE: i32 = 3;
