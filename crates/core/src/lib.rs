//! jobctx core data models.
//!
//! This crate defines the values exchanged between a context environment
//! and the submission client it hands workloads to.

#![warn(missing_docs)]

// Identities
mod id;

// Configuration
pub mod config;

// Jobs
mod workload;
mod result;

// Errors
mod error;

// Re-exports
pub use id::JobId;
pub use config::{ConfigOption, ConfigValue, Configuration};
pub use workload::{Stage, Workload};
pub use result::{ExecutionResult, JobExecutionResult, JobStatus};
pub use error::{
    ConfigError, ExecutionError, Result, SubmissionError, DETACHED_MESSAGE, EXECUTE_TWICE_MESSAGE,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
