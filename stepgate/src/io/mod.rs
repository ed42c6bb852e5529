//! I/O adapters for the orchestrator.

pub mod config;
pub mod events;
pub mod file_store;
pub mod init;
pub mod plan_file;
pub mod process;
pub mod prompt;
pub mod repo;
pub mod shell;
pub mod store;
