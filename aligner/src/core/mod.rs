//! Deterministic, pure logic shared by the aligner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod catalog;
pub mod dependency;
pub mod manifest;
pub mod recipe;
pub mod select;
pub mod types;
pub mod version;
