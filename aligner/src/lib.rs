//! Cross-project dependency alignment.
//!
//! Finds, for each cataloged package, the smallest newer version that builds
//! and runs in every project of a multi-project repository, writes the
//! resulting pins into the shared manifest and confirms them with a
//! full-system check, restoring the exact previous manifest on rejection.
//!
//! - **[`core`]**: Pure, deterministic logic (pin parsing, version order,
//!   catalog, recipe injection, candidate search, manifest rewriting).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, manifest backups, project
//!   discovery, container toolchain, process execution). Trait seams keep
//!   them replaceable in tests.
//!
//! [`plan`] and [`align`] coordinate both to implement the CLI commands.

pub mod align;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
