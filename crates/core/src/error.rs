//! Error types shared by the submission client and the context environment.

use crate::id::JobId;

/// Result alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Message carried by every error raised because a job ran detached.
pub const DETACHED_MESSAGE: &str = "Job was submitted in detached mode. \
    Results of job execution, such as accumulators, runtime, etc. are not available. ";

/// Appended to [`DETACHED_MESSAGE`] when `execute` is called twice in detached mode.
pub const EXECUTE_TWICE_MESSAGE: &str =
    "Please make sure your program doesn't call execute twice when running in detached mode.";

/// Errors raised while reading configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value could not be parsed into the option's type
    #[error("Invalid value '{value}' for configuration key '{key}': {reason}")]
    Invalid {
        /// Configuration key
        key: String,
        /// Raw value as stored
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The configuration source itself could not be read
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Errors raised by a submission client when a job cannot be handed over.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// The coordinator could not be reached
    #[error("Coordinator unreachable: {0}")]
    Unreachable(String),

    /// The coordinator refused the workload
    #[error("Workload rejected: {0}")]
    Rejected(String),

    /// The job is not known to the coordinator
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors surfaced to callers of the context environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// `execute` called again on a detached environment
    #[error("{0}")]
    InvalidInvocation(String),

    /// The workload could not be submitted
    #[error("Submission failed: {0}")]
    Submission(#[from] SubmissionError),

    /// The job was accepted but did not finish successfully
    #[error("Job {job_id} failed: {message}")]
    RemoteExecution {
        /// Job that failed
        job_id: JobId,
        /// Failure reported by the coordinator
        message: String,
    },

    /// Nothing was recorded on the environment before `execute`
    #[error("No stages have been added to the workload yet. A job cannot be executed without stages.")]
    EmptyWorkload,

    /// Runtime information requested from a detached result
    #[error("{}", DETACHED_MESSAGE)]
    DetachedResult,

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExecutionError {
    /// The error raised for a second detached `execute`.
    pub fn executed_twice_detached() -> Self {
        ExecutionError::InvalidInvocation(format!("{DETACHED_MESSAGE}{EXECUTE_TWICE_MESSAGE}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executed_twice_message() {
        let err = ExecutionError::executed_twice_detached();
        let msg = err.to_string();
        assert!(msg.starts_with("Job was submitted in detached mode."));
        assert!(msg.ends_with("call execute twice when running in detached mode."));
    }

    #[test]
    fn test_submission_error_converts() {
        let err: ExecutionError = SubmissionError::Unreachable("10.0.0.1:6123".to_string()).into();
        assert_eq!(err.to_string(), "Submission failed: Coordinator unreachable: 10.0.0.1:6123");
    }
}
