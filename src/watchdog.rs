//! Sweep for jobs whose execution died without reporting.

use tracing::{debug, warn};

use crate::job::ExecutionOutcome;
use crate::scheduler::TaskScheduler;
use crate::types::{ExecutionId, JobId};

/// Host-side view of a job's lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackedState {
    /// An execution is (supposedly) running.
    Running,
    /// Waiting for a submitted follow-up execution.
    Checkpointed,
    /// Finished and reported.
    Completed,
    /// Marked dead by a sweep.
    Failed,
}

impl TrackedState {
    /// True while the job still depends on a scheduled task.
    pub fn in_flight(self) -> bool {
        matches!(self, TrackedState::Running | TrackedState::Checkpointed)
    }
}

/// A job the host is tracking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedJob {
    /// Tracked job.
    pub job_id: JobId,
    /// Task carrying the job's current or next execution.
    pub execution_id: Option<ExecutionId>,
    /// Last known state.
    pub state: TrackedState,
}

impl TrackedJob {
    /// Job whose execution `execution_id` was just started.
    pub fn running(job_id: impl Into<JobId>, execution_id: Option<ExecutionId>) -> Self {
        Self {
            job_id: job_id.into(),
            execution_id,
            state: TrackedState::Running,
        }
    }

    /// Update from the outcome of an execution.
    pub fn record(&mut self, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Checkpointed { execution_id, .. } => {
                self.execution_id = Some(execution_id.clone());
                self.state = TrackedState::Checkpointed;
            }
            ExecutionOutcome::Finished { .. } => self.state = TrackedState::Completed,
        }
    }
}

/// Mark in-flight jobs whose task is no longer pending or processing as failed.
///
/// Jobs without an execution id, or whose id the scheduler does not know, are
/// failed as well. Returns the ids of the jobs marked in this sweep.
pub fn sweep_stalled(jobs: &mut [TrackedJob], scheduler: &dyn TaskScheduler) -> Vec<JobId> {
    let in_flight = jobs.iter().filter(|job| job.state.in_flight()).count();
    debug!("[reconcile:watchdog] in-flight jobs found: {in_flight}");
    let mut failed = Vec::new();
    for job in jobs.iter_mut().filter(|job| job.state.in_flight()) {
        if let Some(execution_id) = &job.execution_id {
            match scheduler.status(execution_id) {
                Ok(Some(status)) if status.is_live() => continue,
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        "[reconcile:watchdog] unable to check task {execution_id} of job {}: {err}",
                        job.job_id
                    );
                    continue;
                }
            }
        }
        warn!(
            "[reconcile:watchdog] job {} has no live task; marking failed",
            job.job_id
        );
        job.state = TrackedState::Failed;
        failed.push(job.job_id.clone());
    }
    failed
}
