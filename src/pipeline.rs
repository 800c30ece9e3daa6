//! Downstream pipeline stage reporting.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::errors::ReconcileError;
use crate::types::{ChunkHandle, ExecutionId, JobId, LogMessage};

/// Final status of a finished reconciliation stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Every page was processed without error.
    Completed,
    /// At least one setup or page failure was recorded.
    CompletedWithErrors,
}

/// Report handed to the pipeline when a job finishes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    /// Finished job.
    pub job_id: JobId,
    /// All chunks of the job, in order.
    pub chunk_handles: Vec<ChunkHandle>,
    /// Number of recorded failures.
    pub error_count: usize,
    /// Failure messages, in the order they occurred.
    pub errors: Vec<LogMessage>,
    /// Outcome of the stage.
    pub status: StageStatus,
}

/// Pipeline control collaborator notified at stage boundaries.
pub trait PipelineControl: Send + Sync {
    /// An execution of `job_id` started.
    fn stage_started(&self, job_id: &str) -> Result<(), ReconcileError>;
    /// The job finished; no further executions follow.
    fn stage_finished(&self, report: &StageReport) -> Result<(), ReconcileError>;
    /// Start the next pipeline stage.
    fn trigger_next(&self) -> Result<ExecutionId, ReconcileError>;
}

/// Event captured by `RecordingPipeline`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// `stage_started` was called.
    Started(JobId),
    /// `stage_finished` was called.
    Finished(StageReport),
    /// `trigger_next` was called and returned this id.
    Triggered(ExecutionId),
}

/// In-memory pipeline that records every call.
#[derive(Debug, Default)]
pub struct RecordingPipeline {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingPipeline {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Most recent finished report, if any.
    pub fn last_report(&self) -> Option<StageReport> {
        self.events().into_iter().rev().find_map(|event| match event {
            PipelineEvent::Finished(report) => Some(report),
            _ => None,
        })
    }

    fn record(&self, event: PipelineEvent) -> Result<(), ReconcileError> {
        self.events
            .lock()
            .map_err(|_| ReconcileError::Pipeline("pipeline recorder lock poisoned".into()))?
            .push(event);
        Ok(())
    }
}

impl PipelineControl for RecordingPipeline {
    fn stage_started(&self, job_id: &str) -> Result<(), ReconcileError> {
        self.record(PipelineEvent::Started(job_id.to_string()))
    }

    fn stage_finished(&self, report: &StageReport) -> Result<(), ReconcileError> {
        self.record(PipelineEvent::Finished(report.clone()))
    }

    fn trigger_next(&self) -> Result<ExecutionId, ReconcileError> {
        let triggered = self
            .events()
            .iter()
            .filter(|event| matches!(event, PipelineEvent::Triggered(_)))
            .count();
        let id = format!("stage-{}", triggered + 1);
        self.record(PipelineEvent::Triggered(id.clone()))?;
        Ok(id)
    }
}
