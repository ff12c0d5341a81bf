//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod decision;
pub mod heuristics;
pub mod invariants;
pub mod judgment;
pub mod text;
pub mod tree;
pub mod types;
