//! The context environment: executes workloads through a submission client.

use futures::FutureExt;
use jobctx_client::{SubmissionClient, SubmissionHandle};
use jobctx_core::config::{ATTACHED, DEFAULT_PARALLELISM, SHUTDOWN_CANCEL_TIMEOUT_MS, SHUTDOWN_ON_ATTACHED_EXIT};
use jobctx_core::{Configuration, ExecutionError, ExecutionResult, Result, Stage, Workload};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownHooks;
use crate::slot::ResultSlot;

const HOOK_NAME: &str = "ContextEnvironment";

/// Executes workloads against a fixed submission client.
///
/// In attached mode `execute` waits for the job and may be called any number
/// of times. In detached mode it returns right after submission and may only
/// be called once per environment.
pub struct ContextEnvironment {
    client: Arc<dyn SubmissionClient>,
    configuration: Configuration,
    result_slot: ResultSlot,
    shutdown_hooks: Arc<ShutdownHooks>,
    parallelism: Option<u32>,
    attached: bool,
    /// Bound on the shutdown cancellation wait; `None` when no hook is installed.
    cancel_on_exit: Option<Duration>,
    stages: Vec<Stage>,
    already_called: bool,
}

impl ContextEnvironment {
    /// Create an environment. `result_slot` is shared with the caller.
    ///
    /// Every option the environment reads is parsed here, so a malformed
    /// value is reported before anything is submitted.
    pub fn new(
        client: Arc<dyn SubmissionClient>,
        configuration: Configuration,
        shutdown_hooks: Arc<ShutdownHooks>,
        result_slot: ResultSlot,
    ) -> Result<Self> {
        let parallelism = configuration.get(&DEFAULT_PARALLELISM)?;
        let attached = configuration.get(&ATTACHED)?;
        let shutdown_on_exit = configuration.get(&SHUTDOWN_ON_ATTACHED_EXIT)?;
        let cancel_timeout = Duration::from_millis(configuration.get(&SHUTDOWN_CANCEL_TIMEOUT_MS)?);

        Ok(Self {
            client,
            configuration,
            result_slot,
            shutdown_hooks,
            parallelism: u32::try_from(parallelism).ok().filter(|p| *p > 0),
            attached,
            cancel_on_exit: shutdown_on_exit.then_some(cancel_timeout),
            stages: Vec::new(),
            already_called: false,
        })
    }

    /// Configuration the environment was created with.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Slot receiving execution results.
    pub fn result_slot(&self) -> &ResultSlot {
        &self.result_slot
    }

    /// Parallelism applied to submitted workloads (None = coordinator default).
    pub fn parallelism(&self) -> Option<u32> {
        self.parallelism
    }

    /// Override the parallelism. Zero resets it to the coordinator default.
    pub fn set_parallelism(&mut self, parallelism: u32) {
        self.parallelism = Some(parallelism).filter(|p| *p > 0);
    }

    /// Record a stage for the next execution.
    pub fn add_stage(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Stages recorded since the last execution.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether `execute` waits for job completion.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Submit the recorded stages as job `job_name` and, in attached mode,
    /// wait for it to finish. The result is also written to the result slot.
    pub async fn execute(&mut self, job_name: &str) -> Result<ExecutionResult> {
        self.verify_execute_is_called_once_when_detached()?;

        let handle = self.submit(job_name).await?;

        let result = if self.attached {
            self.await_attached(handle).await?
        } else {
            info!("Job {} submitted in detached mode", handle.job_id());
            ExecutionResult::detached(handle.job_id())
        };

        self.set_execution_result(result.clone());
        Ok(result)
    }

    /// Submit the recorded stages without waiting, returning the live handle.
    /// The result slot is left untouched.
    pub async fn execute_async(&mut self, job_name: &str) -> Result<Arc<dyn SubmissionHandle>> {
        self.verify_execute_is_called_once_when_detached()?;
        self.submit(job_name).await
    }

    /// Store `result` in the result slot directly.
    pub fn set_execution_result(&self, result: ExecutionResult) {
        self.result_slot.set(result);
    }

    fn verify_execute_is_called_once_when_detached(&mut self) -> Result<()> {
        if self.already_called && !self.attached {
            return Err(ExecutionError::executed_twice_detached());
        }
        self.already_called = true;
        Ok(())
    }

    async fn submit(&mut self, job_name: &str) -> Result<Arc<dyn SubmissionHandle>> {
        if self.stages.is_empty() {
            return Err(ExecutionError::EmptyWorkload);
        }
        let stages = std::mem::take(&mut self.stages);
        let workload = Workload::new(job_name, self.parallelism, stages);

        debug!("Submitting job {} with {} stages", job_name, workload.stages.len());
        let handle = self.client.submit(workload, &self.configuration).await?;
        info!("Job {} ({}) accepted", handle.job_id(), job_name);
        Ok(handle)
    }

    async fn await_attached(&self, handle: Arc<dyn SubmissionHandle>) -> Result<ExecutionResult> {
        let completion = handle.await_result();

        let hook = self.cancel_on_exit.map(|timeout| {
            let handle = handle.clone();
            self.shutdown_hooks.register(HOOK_NAME, move || {
                cancel_within(handle, timeout).boxed()
            })
        });

        debug!("Waiting for job {} to finish", handle.job_id());
        let outcome = completion.await;

        if let Some(hook) = hook {
            hook.remove();
        }

        let result = outcome?;
        info!("Job {} finished with status {}", result.job_id, result.status);
        Ok(result.into())
    }
}

/// Request cancellation and wait at most `timeout` for the acknowledgment.
/// Failures are logged and swallowed.
async fn cancel_within(handle: Arc<dyn SubmissionHandle>, timeout: Duration) {
    let job_id = handle.job_id();
    info!("Cancelling job {} on shutdown", job_id);

    match tokio::time::timeout(timeout, handle.cancel()).await {
        Ok(Ok(())) => debug!("Cancellation of job {} acknowledged", job_id),
        Ok(Err(e)) => warn!("Cancellation of job {} failed: {}", job_id, e),
        Err(_) => warn!(
            "Cancellation of job {} not acknowledged within {:?}",
            job_id, timeout
        ),
    }
}

impl fmt::Display for ContextEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parallelism {
            Some(p) => write!(f, "Context Environment (parallelism = {})", p),
            None => write!(f, "Context Environment (parallelism = default)"),
        }
    }
}
