//! Stable exit codes for reconciler CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config, or state, or any other error.
pub const INVALID: i32 = 1;
/// `reconciler verify` (or a pass) found effects matching no predicted outcome.
pub const MISMATCH: i32 = 2;
/// The pass ended with the item blocked or in error.
pub const BLOCKED: i32 = 3;
