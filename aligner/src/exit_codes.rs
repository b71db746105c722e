//! Stable exit codes for aligner CLI commands.

/// Command succeeded; `apply` committed or had nothing to change.
pub const OK: i32 = 0;
/// Command failed due to invalid config/manifest/catalog/recipe or other errors.
/// The manifest is unchanged.
pub const INVALID: i32 = 1;
/// `aligner apply` committed a plan that the full-system check rejected; the
/// manifest was restored.
pub const ROLLED_BACK: i32 = 4;
/// The manifest backup was missing or corrupt when it was needed. The manifest
/// may hold a rejected change and must be inspected by hand.
pub const BACKUP_LOST: i32 = 5;
