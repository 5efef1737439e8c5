//! rebaiser core library.
//!
//! This crate provides the components for keeping an internal fork rebased
//! onto its upstream: configuration, the git, AI, code-host, notification
//! and test-runner collaborators, conflict extraction and resolution, the
//! rebase pipeline and its scheduler.

pub mod ai;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod test_runner;

// Re-exports for convenience.
pub use config::AppConfig;
pub use pipeline::{Pipeline, PipelineSettings, RunSummary, Services};
pub use scheduler::{Scheduler, Shutdown};
