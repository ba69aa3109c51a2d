//! In-process cluster.
//!
//! Runs workloads on the current tokio runtime. Each stage takes a fixed
//! simulated time; a stage whose properties contain `"fail": true` fails the
//! job. Used by the `jobctx` binary and by tests that need a real client.

use async_trait::async_trait;
use jobctx_core::config::LOCAL_STAGE_DURATION_MS;
use jobctx_core::{
    Configuration, ExecutionError, JobExecutionResult, JobId, JobStatus, SubmissionError, Workload,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{SubmissionClient, SubmissionHandle};

/// State of a job on the local cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// Still running, with the number of finished stages
    Running { stages_done: usize },
    /// Reached a final state
    Finished(Result<JobExecutionResult, ExecutionError>),
}

impl JobState {
    /// Whether the job reached a final state.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Finished(_))
    }
}

/// Finished jobs kept for reattaching before the oldest are evicted.
const RETAINED_FINISHED_JOBS: usize = 64;

struct LocalJob {
    seq: u64,
    state: watch::Receiver<JobState>,
    cancel: Arc<watch::Sender<bool>>,
}

/// Submission client running jobs in-process.
///
/// Running jobs are always tracked. Finished ones stay reachable through
/// [`LocalClusterClient::handle`] until more than a fixed number of newer
/// jobs have finished.
pub struct LocalClusterClient {
    jobs: Arc<Mutex<HashMap<JobId, LocalJob>>>,
    next_seq: AtomicU64,
    retain_finished: usize,
}

impl LocalClusterClient {
    /// Create an empty local cluster.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
            retain_finished: RETAINED_FINISHED_JOBS,
        }
    }

    /// Current state of a job.
    pub async fn job_state(&self, job_id: &JobId) -> Option<JobState> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id).map(|job| job.state.borrow().clone())
    }

    /// Reattach to a job, e.g. to poll one that was submitted detached.
    pub async fn handle(&self, job_id: &JobId) -> Option<Arc<dyn SubmissionHandle>> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id).map(|job| {
            Arc::new(LocalHandle {
                job_id: *job_id,
                state: job.state.clone(),
                cancel: job.cancel.clone(),
            }) as Arc<dyn SubmissionHandle>
        })
    }
}

/// Drop the oldest finished jobs beyond `retain`.
fn evict_finished(jobs: &mut HashMap<JobId, LocalJob>, retain: usize) {
    let mut finished: Vec<(u64, JobId)> = jobs
        .iter()
        .filter(|(_, job)| job.state.borrow().is_finished())
        .map(|(id, job)| (job.seq, *id))
        .collect();
    if finished.len() <= retain {
        return;
    }
    finished.sort_unstable();
    let excess = finished.len() - retain;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
    debug!("Evicted {} finished job(s)", excess);
}

impl Default for LocalClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubmissionClient for LocalClusterClient {
    async fn submit(
        &self,
        workload: Workload,
        configuration: &Configuration,
    ) -> Result<Arc<dyn SubmissionHandle>, SubmissionError> {
        if workload.stages.is_empty() {
            return Err(SubmissionError::Rejected(format!(
                "workload '{}' has no stages",
                workload.name
            )));
        }

        let stage_duration = configuration
            .get(&LOCAL_STAGE_DURATION_MS)
            .map_err(|e| SubmissionError::Rejected(e.to_string()))?;
        let stage_duration = Duration::from_millis(stage_duration);

        let job_id = JobId::new();
        let (state_tx, state_rx) = watch::channel(JobState::Running { stages_done: 0 });
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);

        {
            let mut jobs = self.jobs.lock().await;
            evict_finished(&mut jobs, self.retain_finished);
            jobs.insert(
                job_id,
                LocalJob {
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    state: state_rx.clone(),
                    cancel: cancel_tx.clone(),
                },
            );
        }

        info!(
            "Accepted job {} ({}) with {} stages",
            job_id,
            workload.name,
            workload.stages.len()
        );
        tokio::spawn(run_job(job_id, workload, stage_duration, state_tx, cancel_rx));

        Ok(Arc::new(LocalHandle {
            job_id,
            state: state_rx,
            cancel: cancel_tx,
        }))
    }
}

async fn run_job(
    job_id: JobId,
    workload: Workload,
    stage_duration: Duration,
    state: watch::Sender<JobState>,
    mut cancel: watch::Receiver<bool>,
) {
    let started = Instant::now();

    for (index, stage) in workload.stages.iter().enumerate() {
        debug!("Job {} running stage {}", job_id, stage.name);

        let cancelled = tokio::select! {
            _ = tokio::time::sleep(stage_duration) => false,
            Ok(_) = cancel.wait_for(|c| *c) => true,
        };
        if cancelled {
            info!("Job {} cancelled during stage {}", job_id, stage.name);
            state.send_replace(JobState::Finished(Err(ExecutionError::RemoteExecution {
                job_id,
                message: "job was cancelled".to_string(),
            })));
            return;
        }

        let should_fail = stage
            .properties
            .get("fail")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if should_fail {
            warn!("Job {} failed in stage {}", job_id, stage.name);
            state.send_replace(JobState::Finished(Err(ExecutionError::RemoteExecution {
                job_id,
                message: format!("stage '{}' failed", stage.name),
            })));
            return;
        }

        state.send_replace(JobState::Running {
            stages_done: index + 1,
        });
    }

    let mut result = JobExecutionResult::new(job_id, JobStatus::Success, started.elapsed())
        .with_accumulator("stages", serde_json::json!(workload.stages.len()));
    if let Some(parallelism) = workload.parallelism {
        result = result.with_accumulator("parallelism", serde_json::json!(parallelism));
    }
    result.finished_at = Some(chrono::Utc::now());

    info!("Job {} finished in {:?}", job_id, result.net_runtime);
    state.send_replace(JobState::Finished(Ok(result)));
}

struct LocalHandle {
    job_id: JobId,
    state: watch::Receiver<JobState>,
    cancel: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl SubmissionHandle for LocalHandle {
    fn job_id(&self) -> JobId {
        self.job_id
    }

    async fn await_result(&self) -> Result<JobExecutionResult, ExecutionError> {
        let mut state = self.state.clone();
        let finished = state.wait_for(JobState::is_finished).await.map_err(|_| {
            ExecutionError::RemoteExecution {
                job_id: self.job_id,
                message: "job terminated without reporting a result".to_string(),
            }
        })?;

        match &*finished {
            JobState::Finished(outcome) => outcome.clone(),
            JobState::Running { .. } => Err(ExecutionError::RemoteExecution {
                job_id: self.job_id,
                message: "job is still running".to_string(),
            }),
        }
    }

    async fn cancel(&self) -> Result<(), SubmissionError> {
        if self.state.borrow().is_finished() {
            return Err(SubmissionError::Rejected(format!(
                "job {} already finished",
                self.job_id
            )));
        }
        self.cancel.send_replace(true);
        debug!("Cancellation requested for job {}", self.job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobctx_core::Stage;

    fn workload(stages: Vec<Stage>) -> Workload {
        Workload::new("test", Some(2), stages)
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_to_success() {
        let client = LocalClusterClient::new();
        let handle = client
            .submit(workload(vec![Stage::new("read"), Stage::new("write")]), &Configuration::new())
            .await
            .unwrap();

        let result = handle.await_result().await.unwrap();
        assert_eq!(result.job_id, handle.job_id());
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.accumulators.get("stages"), Some(&serde_json::json!(2)));
        assert_eq!(result.accumulators.get("parallelism"), Some(&serde_json::json!(2)));
        assert!(result.finished_at.is_some());

        let state = client.job_state(&handle.job_id()).await.unwrap();
        assert!(state.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_stage() {
        let client = LocalClusterClient::new();
        let stages = vec![
            Stage::new("read"),
            Stage::new("explode").with_properties(serde_json::json!({"fail": true})),
        ];
        let handle = client.submit(workload(stages), &Configuration::new()).await.unwrap();

        match handle.await_result().await {
            Err(ExecutionError::RemoteExecution { job_id, message }) => {
                assert_eq!(job_id, handle.job_id());
                assert!(message.contains("explode"));
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_job() {
        let client = LocalClusterClient::new();
        let config = Configuration::new().with(&LOCAL_STAGE_DURATION_MS, 60_000);
        let handle = client.submit(workload(vec![Stage::new("slow")]), &config).await.unwrap();

        handle.cancel().await.unwrap();
        let outcome = handle.await_result().await;
        assert!(matches!(outcome, Err(ExecutionError::RemoteExecution { .. })));

        // Cancelling a finished job is rejected
        assert!(handle.cancel().await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_empty_workload() {
        let client = LocalClusterClient::new();
        let empty = client.submit(workload(vec![]), &Configuration::new()).await;
        assert!(matches!(empty, Err(SubmissionError::Rejected(_))));
        assert!(client.jobs.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach() {
        let client = LocalClusterClient::new();
        let handle = client
            .submit(workload(vec![Stage::new("read")]), &Configuration::new())
            .await
            .unwrap();

        let reattached = client.handle(&handle.job_id()).await.unwrap();
        let result = reattached.await_result().await.unwrap();
        assert_eq!(result.job_id, handle.job_id());

        assert!(client.handle(&JobId::new()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_jobs_are_evicted() {
        let client = LocalClusterClient {
            retain_finished: 2,
            ..LocalClusterClient::new()
        };
        let slow = Configuration::new().with(&LOCAL_STAGE_DURATION_MS, 60_000);
        let running = client.submit(workload(vec![Stage::new("slow")]), &slow).await.unwrap();

        let mut finished = Vec::new();
        for _ in 0..3 {
            let handle = client
                .submit(workload(vec![Stage::new("read")]), &Configuration::new())
                .await
                .unwrap();
            handle.await_result().await.unwrap();
            finished.push(handle.job_id());
        }

        // The next submission prunes the oldest finished job only
        let latest = client
            .submit(workload(vec![Stage::new("read")]), &Configuration::new())
            .await
            .unwrap();
        assert!(client.handle(&finished[0]).await.is_none());
        assert!(client.handle(&finished[1]).await.is_some());
        assert!(client.handle(&finished[2]).await.is_some());
        assert!(client.handle(&latest.job_id()).await.is_some());
        assert_eq!(
            client.job_state(&running.job_id()).await,
            Some(JobState::Running { stages_done: 0 })
        );
    }
}
