//! Recursive intention engine.
//!
//! A goal becomes a root intention. The engine tries to verify it directly through
//! thought/action/judgment cycles, and decomposes it into ordered child intentions when
//! direct attempts stall. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (intention arena, judgment evaluator,
//!   decision functions, heuristics, budget, invariants). No I/O.
//! - **[`checkpoint`]**: The gate consulted at every risk point, with an automatic
//!   implementation and a human-mediated decorator.
//! - **[`io`]**: Side-effecting adapters (config, processes, action dispatch, completion
//!   services, prompts, session files, console).
//!
//! Orchestration modules ([`cycle`], [`navigator`], [`engine`]) sequence core logic with
//! the adapters. [`engine::run`] is the entry point.

pub mod checkpoint;
pub mod core;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod navigator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
