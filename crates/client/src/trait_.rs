//! Submission client abstraction.

use async_trait::async_trait;
use jobctx_core::{Configuration, ExecutionError, JobExecutionResult, JobId, SubmissionError, Workload};
use std::sync::Arc;

/// Hands workloads to a coordinator.
///
/// This trait allows different coordinators to be plugged in behind the
/// context environment.
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// Submit a workload. Returns once the coordinator has accepted the job,
    /// without waiting for it to run.
    async fn submit(
        &self,
        workload: Workload,
        configuration: &Configuration,
    ) -> Result<Arc<dyn SubmissionHandle>, SubmissionError>;
}

/// Live reference to a submitted job.
#[async_trait]
pub trait SubmissionHandle: Send + Sync {
    /// ID assigned by the coordinator.
    fn job_id(&self) -> JobId;

    /// Wait for the job to reach a final state.
    ///
    /// Resolves with [`ExecutionError::RemoteExecution`] if the job failed or
    /// was cancelled.
    async fn await_result(&self) -> Result<JobExecutionResult, ExecutionError>;

    /// Request cancellation. Resolves when the coordinator acknowledged the
    /// request, which does not mean the job already stopped.
    async fn cancel(&self) -> Result<(), SubmissionError>;
}
