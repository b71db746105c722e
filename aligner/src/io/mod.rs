//! I/O helpers for aligner commands.

pub mod config;
pub mod lock;
pub mod manifest_store;
pub mod process;
pub mod registry;
pub mod system_check;
pub mod toolchain;
pub mod verifier;
