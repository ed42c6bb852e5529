//! Evidence-gated job/step state machine for driving an external executor.
//!
//! A job is planned through an interview, compiled into numbered steps, and
//! then executed one step at a time: every submission is checked against its
//! required evidence, the evidence validator, and the step's declarative
//! gates before the cursor moves. The crate keeps a strict split:
//!
//! - **[`core`]**: pure, deterministic logic (types, policies, plan
//!   compilation, submission rules, lifecycle). No I/O.
//! - **[`io`]**: side-effecting adapters (config, stores, shell execution,
//!   repository access, prompts, events).
//!
//! [`evidence`], [`gates`] and [`orchestrator`] combine the two to implement
//! the exposed operations.

pub mod core;
pub mod error;
pub mod evidence;
pub mod exit_codes;
pub mod gates;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
