//! `rlguard-syncer` library surface.
//!
//! Split out of the binary so the cooperative scheduler and CLI parsing
//! can be exercised directly from `tests/`, the way the teacher crate
//! splits a thin `main.rs` from a library of the same modules.

pub mod cli;
pub mod constants;
pub mod scheduler;
