#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Execution time and usage budget checks.
pub mod budget;
/// Capacity-bounded chunk output.
pub mod chunks;
/// Resume state carried between executions.
pub mod checkpoint;
/// Reconciliation configuration types.
pub mod config;
/// Centralized constants used across the scan, chunk, and task layers.
pub mod constants;
/// Missing-key computation per page.
pub mod diff;
/// Reusable example runners shared by downstream crates.
pub mod example_apps;
/// Summary index query model and collaborators.
pub mod index;
/// Execution state machine.
pub mod job;
/// Composite key decoding and filter extraction.
pub mod keys;
/// Downstream pipeline reporting.
pub mod pipeline;
/// Deferred task scheduling.
pub mod scheduler;
/// History source traits and paging.
pub mod source;
/// Storage transports (filesystem today).
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Stalled-job sweep.
pub mod watchdog;

mod errors;

pub use budget::{BudgetGuard, Clock, ManualClock, SystemClock, UsageLedger, UsageMeter};
pub use checkpoint::{ResumeState, ScanFailure};
pub use chunks::{ChunkStore, ChunkWriter, InMemoryChunkStore};
pub use config::{BudgetConfig, ChunkConfig, ReconcileConfig, TaskTarget};
pub use diff::DiffEngine;
pub use errors::ReconcileError;
pub use index::{AggregateIndex, InMemoryAggregateIndex, IndexQuery, SummaryRecord};
pub use job::{Collaborators, ExecutionOutcome, JobController, JobState};
pub use keys::{CompositeKey, SummaryFilters};
pub use pipeline::{PipelineControl, RecordingPipeline, StageReport, StageStatus};
pub use scheduler::{
    DeferredTask, FileTaskQueue, InMemoryScheduler, TaskScheduler, TaskStatus, TaskType,
};
pub use source::{
    HistoryRecord, HistorySource, InMemoryHistorySource, Page, PageWindow, PagedScanner,
    ScanParameters,
};
pub use transport::FileChunkStore;
pub use types::{
    ChunkHandle, ExecutionId, FieldValue, JobId, LogMessage, ParamName, SourceId, SummaryKey,
};
pub use watchdog::{TrackedJob, TrackedState, sweep_stalled};
