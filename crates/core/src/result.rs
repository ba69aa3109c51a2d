//! Execution results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::{ExecutionError, Result};
use crate::id::JobId;
use crate::Time;

/// Final status of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job completed successfully
    Success,
    /// Job failed
    Failed,
    /// Job was cancelled
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => write!(f, "SUCCESS"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Outcome of a job the caller waited for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionResult {
    /// Job ID
    pub job_id: JobId,

    /// Final status
    pub status: JobStatus,

    /// Wall-clock time between start and end of the job
    pub net_runtime: Duration,

    /// Named counters collected by the job
    #[serde(default)]
    pub accumulators: BTreeMap<String, serde_json::Value>,

    /// When the coordinator reported completion
    pub finished_at: Option<Time>,
}

impl JobExecutionResult {
    /// Create a result with no accumulators.
    pub fn new(job_id: JobId, status: JobStatus, net_runtime: Duration) -> Self {
        Self {
            job_id,
            status,
            net_runtime,
            accumulators: BTreeMap::new(),
            finished_at: None,
        }
    }

    /// Attach an accumulator value.
    pub fn with_accumulator(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.accumulators.insert(name.into(), value);
        self
    }
}

/// Result of `execute`: either the real outcome, or a placeholder when the
/// job was submitted without waiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionResult {
    /// The caller waited for the job
    Attached(JobExecutionResult),
    /// The caller did not wait; only the job ID is known
    Detached {
        /// Job that was submitted
        job_id: JobId,
    },
}

impl ExecutionResult {
    /// Placeholder for a job submitted without waiting.
    pub fn detached(job_id: JobId) -> Self {
        ExecutionResult::Detached { job_id }
    }

    /// ID of the job this result belongs to.
    pub fn job_id(&self) -> JobId {
        match self {
            ExecutionResult::Attached(result) => result.job_id,
            ExecutionResult::Detached { job_id } => *job_id,
        }
    }

    /// Whether this is a detached placeholder.
    pub fn is_detached(&self) -> bool {
        matches!(self, ExecutionResult::Detached { .. })
    }

    /// Final status. Not available for detached jobs.
    pub fn status(&self) -> Result<JobStatus> {
        match self {
            ExecutionResult::Attached(result) => Ok(result.status),
            ExecutionResult::Detached { .. } => Err(ExecutionError::DetachedResult),
        }
    }

    /// Net runtime. Not available for detached jobs.
    pub fn net_runtime(&self) -> Result<Duration> {
        match self {
            ExecutionResult::Attached(result) => Ok(result.net_runtime),
            ExecutionResult::Detached { .. } => Err(ExecutionError::DetachedResult),
        }
    }

    /// Accumulator value by name. Not available for detached jobs.
    pub fn accumulator(&self, name: &str) -> Result<Option<&serde_json::Value>> {
        match self {
            ExecutionResult::Attached(result) => Ok(result.accumulators.get(name)),
            ExecutionResult::Detached { .. } => Err(ExecutionError::DetachedResult),
        }
    }
}

impl From<JobExecutionResult> for ExecutionResult {
    fn from(result: JobExecutionResult) -> Self {
        ExecutionResult::Attached(result)
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Attached(result) => write!(
                f,
                "Job {} finished with status {} in {} ms",
                result.job_id,
                result.status,
                result.net_runtime.as_millis()
            ),
            ExecutionResult::Detached { job_id } => {
                write!(f, "Job {} submitted in detached mode", job_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attached_accessors() {
        let id = JobId::new();
        let result: ExecutionResult =
            JobExecutionResult::new(id, JobStatus::Success, Duration::from_millis(1500))
                .with_accumulator("records", json!(42))
                .into();

        assert_eq!(result.job_id(), id);
        assert!(!result.is_detached());
        assert_eq!(result.status().unwrap(), JobStatus::Success);
        assert_eq!(result.net_runtime().unwrap(), Duration::from_millis(1500));
        assert_eq!(result.accumulator("records").unwrap(), Some(&json!(42)));
        assert_eq!(result.accumulator("missing").unwrap(), None);
    }

    #[test]
    fn test_detached_accessors_fail() {
        let id = JobId::new();
        let result = ExecutionResult::detached(id);

        assert_eq!(result.job_id(), id);
        assert!(result.is_detached());
        assert_eq!(result.status(), Err(ExecutionError::DetachedResult));
        assert_eq!(result.net_runtime(), Err(ExecutionError::DetachedResult));
        assert!(result.accumulator("records").is_err());
    }

    #[test]
    fn test_display() {
        let id = JobId::new();
        let detached = ExecutionResult::detached(id);
        assert_eq!(detached.to_string(), format!("Job {} submitted in detached mode", id));

        let attached: ExecutionResult =
            JobExecutionResult::new(id, JobStatus::Success, Duration::from_millis(20)).into();
        assert_eq!(
            attached.to_string(),
            format!("Job {} finished with status SUCCESS in 20 ms", id)
        );
    }

    #[test]
    fn test_serialized_mode_tag() {
        let value = serde_json::to_value(ExecutionResult::detached(JobId::new())).unwrap();
        assert_eq!(value["mode"], "detached");
        assert!(value["job_id"].is_string());
    }
}
