//! Deterministic, pure logic shared by the workflow engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod actions;
pub mod brief;
pub mod budget;
pub mod classifier;
pub mod health;
pub mod patterns;
pub mod recovery;
pub mod rejection;
pub mod routing;
pub mod types;
