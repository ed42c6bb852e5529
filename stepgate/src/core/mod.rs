//! Deterministic, pure logic for the job/step state machine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod allowlist;
pub mod conductor;
pub mod gate_spec;
pub mod lifecycle;
pub mod plan;
pub mod policies;
pub mod submission;
pub mod types;
