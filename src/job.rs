//! One execution of a reconciliation job.
//!
//! An execution resumes from a `ResumeState`, scans pages until the budget
//! runs out or the window is exhausted, saves the missing keys it found, and
//! then either resubmits itself with the advanced state or reports the
//! finished job downstream.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::budget::{BudgetGuard, Clock, UsageMeter};
use crate::checkpoint::{ResumeState, ScanFailure, check_job_id};
use crate::chunks::{ChunkStore, ChunkWriter};
use crate::config::ReconcileConfig;
use crate::diff::DiffEngine;
use crate::errors::ReconcileError;
use crate::index::AggregateIndex;
use crate::pipeline::{PipelineControl, StageReport, StageStatus};
use crate::scheduler::{DeferredTask, TaskScheduler};
use crate::source::{HistorySource, PagedScanner, ScanParameters, ScanWindow};
use crate::types::{ChunkHandle, ExecutionId, SummaryKey};

/// Lifecycle state of one execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Scanning pages.
    Running,
    /// Budget ran out; a follow-up execution was submitted.
    Checkpointed,
    /// All pages processed without failures.
    Completed,
    /// All pages processed; at least one failure was recorded.
    CompletedWithErrors,
}

/// Next action of the scan loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Fetch and diff this page.
    Fetch(usize),
    /// Stop and resubmit from the current page.
    Checkpoint,
    /// No pages remain.
    Finish,
}

/// Accumulated progress of one execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanProgress {
    /// Next page to process.
    pub page_index: usize,
    /// Missing keys found by this execution, in page order.
    pub missing: Vec<SummaryKey>,
    /// Failures recorded by this job so far, including earlier executions.
    pub errors: Vec<ScanFailure>,
}

impl ScanProgress {
    /// Progress starting at `page_index` with nothing accumulated.
    pub fn resume(page_index: usize) -> Self {
        Self {
            page_index,
            ..Self::default()
        }
    }

    /// Decide the next step. `exhausted` is only consulted while pages remain.
    pub fn next_step(&self, page_count: usize, exhausted: impl FnOnce() -> bool) -> Step {
        if self.page_index >= page_count {
            Step::Finish
        } else if exhausted() {
            Step::Checkpoint
        } else {
            Step::Fetch(self.page_index)
        }
    }

    /// Fold the result of the current page in and move to the next page.
    pub fn advance(&mut self, outcome: Result<Vec<SummaryKey>, ReconcileError>) {
        match outcome {
            Ok(missing) => self.missing.extend(missing),
            Err(err) => {
                error!("[reconcile:job] page {} failed: {err}", self.page_index);
                self.errors.push(ScanFailure {
                    page_index: Some(self.page_index),
                    message: err.to_string(),
                });
            }
        }
        self.page_index += 1;
    }

    /// Record a failure that prevented the scan from starting.
    pub fn fail_setup(&mut self, err: ReconcileError) {
        error!("[reconcile:job] scan setup failed: {err}");
        self.errors.push(ScanFailure {
            page_index: None,
            message: err.to_string(),
        });
    }

    /// Terminal state once no pages remain.
    pub fn completion_state(&self) -> JobState {
        if self.errors.is_empty() {
            JobState::Completed
        } else {
            JobState::CompletedWithErrors
        }
    }
}

/// Result of one execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The execution stopped early and queued a follow-up.
    Checkpointed {
        /// Id of the submitted follow-up execution.
        execution_id: ExecutionId,
        /// State the follow-up resumes from, failures included.
        resume: ResumeState,
    },
    /// The job finished and was reported downstream.
    Finished {
        /// Report handed to the pipeline.
        report: StageReport,
        /// Id returned when the next stage was triggered.
        next_stage: ExecutionId,
    },
}

impl ExecutionOutcome {
    /// Terminal state of the execution.
    pub fn state(&self) -> JobState {
        match self {
            ExecutionOutcome::Checkpointed { .. } => JobState::Checkpointed,
            ExecutionOutcome::Finished { report, .. } => match report.status {
                StageStatus::Completed => JobState::Completed,
                StageStatus::CompletedWithErrors => JobState::CompletedWithErrors,
            },
        }
    }

    /// Chunk handles known after the execution.
    pub fn chunk_handles(&self) -> &[ChunkHandle] {
        match self {
            ExecutionOutcome::Checkpointed { resume, .. } => &resume.chunk_handles,
            ExecutionOutcome::Finished { report, .. } => &report.chunk_handles,
        }
    }
}

/// External services one execution talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Paged history query.
    pub history: Arc<dyn HistorySource>,
    /// Existing summary lookup.
    pub index: Arc<dyn AggregateIndex>,
    /// Chunk persistence.
    pub chunks: Arc<dyn ChunkStore>,
    /// Resubmission target for checkpoints.
    pub scheduler: Arc<dyn TaskScheduler>,
    /// Stage start/finish reporting.
    pub pipeline: Arc<dyn PipelineControl>,
    /// Time source for the budget guard.
    pub clock: Arc<dyn Clock>,
    /// Usage source for the budget guard.
    pub usage: Arc<dyn UsageMeter>,
}

/// Drives executions of reconciliation jobs.
pub struct JobController {
    config: ReconcileConfig,
    scanner: PagedScanner,
    diff: DiffEngine,
    writer: ChunkWriter,
    scheduler: Arc<dyn TaskScheduler>,
    pipeline: Arc<dyn PipelineControl>,
    clock: Arc<dyn Clock>,
    usage: Arc<dyn UsageMeter>,
}

impl JobController {
    /// Build a controller; `config` is validated first.
    pub fn new(
        config: ReconcileConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ReconcileError> {
        let config = config.validated()?;
        let writer = ChunkWriter::new(collaborators.chunks, config.chunking.clone())?;
        Ok(Self {
            scanner: PagedScanner::new(collaborators.history),
            diff: DiffEngine::new(collaborators.index, config.index_result_cap),
            writer,
            scheduler: collaborators.scheduler,
            pipeline: collaborators.pipeline,
            clock: collaborators.clock,
            usage: collaborators.usage,
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Run one execution from `state`.
    ///
    /// Page and setup failures are recorded, carried across checkpoints, and
    /// end in `CompletedWithErrors`. `Err` is returned only for an unusable
    /// job id or when chunk output, resubmission, or the final report fails.
    pub fn execute(&self, state: ResumeState) -> Result<ExecutionOutcome, ReconcileError> {
        check_job_id(&state.job_id)?;
        let ResumeState {
            job_id,
            params_json,
            next_page_index,
            chunk_handles,
            failures,
        } = state;
        let mut guard = BudgetGuard::new(self.config.budget.clone(), self.clock.clone());
        guard.start();
        info!(
            "[reconcile:job] job {job_id} starting at page {next_page_index} with {} existing chunks and {} prior failures",
            chunk_handles.len(),
            failures.len()
        );
        if let Err(err) = self.pipeline.stage_started(&job_id) {
            warn!("[reconcile:job] unable to report stage start for job {job_id}: {err}");
        }

        let mut progress = ScanProgress {
            errors: failures,
            ..ScanProgress::resume(next_page_index)
        };
        let outcome = match self.open(&params_json) {
            Ok(Some((params, window))) => self.scan(&mut progress, &params, &window, &mut guard),
            Ok(None) => {
                info!("[reconcile:job] no history query for job {job_id}; nothing to scan");
                progress.completion_state()
            }
            Err(err) => {
                progress.fail_setup(err);
                progress.completion_state()
            }
        };

        let chunk_handles = self
            .writer
            .save(&job_id, &progress.missing, chunk_handles)?;
        let ScanProgress {
            page_index, errors, ..
        } = progress;

        if outcome == JobState::Checkpointed {
            let resume = ResumeState {
                job_id,
                params_json,
                next_page_index: page_index,
                chunk_handles,
                failures: errors,
            };
            let task = DeferredTask {
                task_type: self.config.task.task_type,
                script_id: self.config.task.script_id.to_string(),
                deployment_id: self.config.task.deployment_id.to_string(),
                params: resume.to_task_params()?,
            };
            let execution_id = self.scheduler.submit(&task)?;
            info!(
                "[reconcile:job] time/usage limit reached for job {}; resubmitted as {execution_id} at page {}",
                resume.job_id, resume.next_page_index
            );
            return Ok(ExecutionOutcome::Checkpointed {
                execution_id,
                resume,
            });
        }

        let status = if errors.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::CompletedWithErrors
        };
        let report = StageReport {
            job_id,
            chunk_handles,
            error_count: errors.len(),
            errors: errors.into_iter().map(|failure| failure.message).collect(),
            status,
        };
        self.pipeline.stage_finished(&report)?;
        let next_stage = self.pipeline.trigger_next()?;
        info!(
            "[reconcile:job] job {} finished as {:?} with {} chunks; next stage {next_stage}",
            report.job_id,
            report.status,
            report.chunk_handles.len()
        );
        Ok(ExecutionOutcome::Finished { report, next_stage })
    }

    fn open(
        &self,
        params_json: &str,
    ) -> Result<Option<(ScanParameters, ScanWindow)>, ReconcileError> {
        let params = ScanParameters::from_json(params_json)?;
        Ok(self.scanner.open(&params)?.map(|window| (params, window)))
    }

    fn scan(
        &self,
        progress: &mut ScanProgress,
        params: &ScanParameters,
        window: &ScanWindow,
        guard: &mut BudgetGuard,
    ) -> JobState {
        let page_count = window.page_count();
        loop {
            let usage = self.usage.as_ref();
            match progress.next_step(page_count, || guard.exhausted(usage)) {
                Step::Fetch(page_index) => {
                    let outcome = window
                        .fetch(page_index)
                        .and_then(|page| self.diff.missing(&page, params));
                    if let Ok(missing) = &outcome {
                        debug!(
                            "[reconcile:job] page {page_index}: {} missing",
                            missing.len()
                        );
                    }
                    progress.advance(outcome);
                }
                Step::Checkpoint => return JobState::Checkpointed,
                Step::Finish => return progress.completion_state(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{ManualClock, UnmeteredUsage, UsageLedger};
    use crate::chunks::{InMemoryChunkStore, read_chunk_keys};
    use crate::index::{InMemoryAggregateIndex, SummaryRecord};
    use crate::pipeline::{PipelineEvent, RecordingPipeline};
    use crate::scheduler::{InMemoryScheduler, TaskType};
    use crate::source::{HistoryRecord, InMemoryHistorySource, Page, PageWindow};
    use std::time::Duration;

    fn key(dept: usize) -> String {
        format!("1|1|7|{dept}||||401|402|2024-01-31")
    }

    /// Source whose fetches advance a manual clock and can fail chosen pages.
    struct TestSource {
        inner: InMemoryHistorySource,
        clock: ManualClock,
        tick_ms: u64,
        failing_pages: Vec<usize>,
    }

    struct TestWindow {
        inner: Box<dyn PageWindow>,
        clock: ManualClock,
        tick_ms: u64,
        failing_pages: Vec<usize>,
    }

    impl HistorySource for TestSource {
        fn id(&self) -> &str {
            "test"
        }

        fn open(
            &self,
            params: &ScanParameters,
        ) -> Result<Option<Box<dyn PageWindow>>, ReconcileError> {
            Ok(self.inner.open(params)?.map(|inner| {
                Box::new(TestWindow {
                    inner,
                    clock: self.clock.clone(),
                    tick_ms: self.tick_ms,
                    failing_pages: self.failing_pages.clone(),
                }) as Box<dyn PageWindow>
            }))
        }
    }

    impl PageWindow for TestWindow {
        fn page_count(&self) -> usize {
            self.inner.page_count()
        }

        fn record_count(&self) -> usize {
            self.inner.record_count()
        }

        fn fetch(&self, page_index: usize) -> Result<Page, ReconcileError> {
            self.clock.advance(self.tick_ms);
            if self.failing_pages.contains(&page_index) {
                return Err(ReconcileError::PageFetch {
                    page_index,
                    reason: "connection reset".into(),
                });
            }
            self.inner.fetch(page_index)
        }
    }

    struct Harness {
        controller: JobController,
        chunks: Arc<InMemoryChunkStore>,
        scheduler: Arc<InMemoryScheduler>,
        pipeline: Arc<RecordingPipeline>,
    }

    struct Setup {
        time_limit_ms: u64,
        tick_ms: u64,
        failing_pages: Vec<usize>,
        capacity: usize,
        usage: Arc<dyn UsageMeter>,
        task_type: TaskType,
        history: Option<Arc<dyn HistorySource>>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                time_limit_ms: 1_000,
                tick_ms: 10,
                failing_pages: Vec::new(),
                capacity: 1_000,
                usage: Arc::new(UnmeteredUsage),
                task_type: TaskType::ScheduledScript,
                history: None,
            }
        }
    }

    /// Five history keys over three pages; departments 2 and 4 have summaries.
    fn harness(setup: Setup) -> Harness {
        let clock = ManualClock::new(0);
        let records = (1..=5).map(|dept| HistoryRecord::from_key(key(dept))).collect();
        let history = setup.history.unwrap_or_else(|| {
            Arc::new(TestSource {
                inner: InMemoryHistorySource::new("dhr", records, 2),
                clock: clock.clone(),
                tick_ms: setup.tick_ms,
                failing_pages: setup.failing_pages,
            }) as Arc<dyn HistorySource>
        });
        let index = InMemoryAggregateIndex::new(vec![
            SummaryRecord::active(key(2)),
            SummaryRecord::active(key(4)),
        ]);
        let chunks = Arc::new(InMemoryChunkStore::new());
        let scheduler = Arc::new(InMemoryScheduler::new());
        let pipeline = Arc::new(RecordingPipeline::new());
        let mut config = ReconcileConfig::default();
        config.budget.time_limit = Duration::from_millis(setup.time_limit_ms);
        config.chunking.capacity = setup.capacity;
        config.task.task_type = setup.task_type;
        let controller = JobController::new(
            config,
            Collaborators {
                history,
                index: Arc::new(index),
                chunks: chunks.clone(),
                scheduler: scheduler.clone(),
                pipeline: pipeline.clone(),
                clock: Arc::new(clock),
                usage: setup.usage,
            },
        )
        .unwrap();
        Harness {
            controller,
            chunks,
            scheduler,
            pipeline,
        }
    }

    #[test]
    fn completes_in_one_execution() {
        let h = harness(Setup::default());
        let outcome = h.controller.execute(ResumeState::fresh("42", "")).unwrap();
        assert_eq!(outcome.state(), JobState::Completed);
        let ExecutionOutcome::Finished { report, next_stage } = outcome else {
            panic!("expected a finished execution");
        };
        assert_eq!(next_stage, "stage-1");
        assert_eq!(report.error_count, 0);
        assert_eq!(report.chunk_handles.len(), 1);
        assert_eq!(
            read_chunk_keys(h.chunks.as_ref(), &report.chunk_handles, ',').unwrap(),
            vec![key(1), key(3), key(5)]
        );
        assert_eq!(
            h.chunks.name_of(&report.chunk_handles[0]).unwrap(),
            "chkSummary-42_001.txt"
        );
        assert!(h.scheduler.submitted().is_empty());
        assert_eq!(
            h.pipeline.events(),
            vec![
                PipelineEvent::Started("42".into()),
                PipelineEvent::Finished(report),
                PipelineEvent::Triggered("stage-1".into()),
            ]
        );
    }

    #[test]
    fn checkpoint_keeps_unprocessed_page_and_resubmits() {
        let h = harness(Setup {
            time_limit_ms: 15,
            ..Setup::default()
        });
        let outcome = h
            .controller
            .execute(ResumeState::fresh("42", r#"{"subs":["1"]}"#))
            .unwrap();
        let ExecutionOutcome::Checkpointed {
            execution_id,
            resume,
        } = outcome
        else {
            panic!("expected a checkpoint");
        };
        assert!(resume.failures.is_empty());
        assert_eq!(resume.next_page_index, 2);
        assert_eq!(resume.params_json, r#"{"subs":["1"]}"#);
        assert_eq!(
            read_chunk_keys(h.chunks.as_ref(), &resume.chunk_handles, ',').unwrap(),
            vec![key(1), key(3)]
        );

        let submitted = h.scheduler.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, execution_id);
        assert_eq!(submitted[0].1.task_type, TaskType::ScheduledScript);
        assert_eq!(submitted[0].1.params, resume.to_task_params().unwrap());
        assert_eq!(
            h.pipeline.events(),
            vec![PipelineEvent::Started("42".into())]
        );
    }

    #[test]
    fn resumed_execution_tops_up_and_finishes() {
        let h = harness(Setup {
            time_limit_ms: 15,
            ..Setup::default()
        });
        let ExecutionOutcome::Checkpointed { resume, .. } =
            h.controller.execute(ResumeState::fresh("42", "")).unwrap()
        else {
            panic!("expected a checkpoint");
        };
        let (_, task) = h.scheduler.take_next().unwrap().unwrap();
        let restored = ResumeState::from_task_params(&task.params).unwrap();
        assert_eq!(restored, resume);

        let outcome = h.controller.execute(restored).unwrap();
        assert_eq!(outcome.state(), JobState::Completed);
        assert_eq!(outcome.chunk_handles(), resume.chunk_handles.as_slice());
        assert_eq!(
            read_chunk_keys(h.chunks.as_ref(), outcome.chunk_handles(), ',').unwrap(),
            vec![key(1), key(3), key(5)]
        );
    }

    #[test]
    fn page_failure_is_recorded_and_scan_continues() {
        let h = harness(Setup {
            failing_pages: vec![1],
            ..Setup::default()
        });
        let outcome = h.controller.execute(ResumeState::fresh("42", "")).unwrap();
        let ExecutionOutcome::Finished { report, .. } = outcome else {
            panic!("expected a finished execution");
        };
        assert_eq!(report.status, StageStatus::CompletedWithErrors);
        assert_eq!(report.error_count, 1);
        assert!(report.errors[0].contains("page 1"));
        assert_eq!(
            read_chunk_keys(h.chunks.as_ref(), &report.chunk_handles, ',').unwrap(),
            vec![key(1), key(5)]
        );
    }

    #[test]
    fn setup_failure_skips_scan_and_keeps_existing_chunks() {
        let h = harness(Setup::default());
        let mut state = ResumeState::fresh("42", "{not json");
        state.chunk_handles = vec!["prior".into()];
        let outcome = h.controller.execute(state).unwrap();
        let ExecutionOutcome::Finished { report, .. } = outcome else {
            panic!("expected a finished execution");
        };
        assert_eq!(report.status, StageStatus::CompletedWithErrors);
        assert_eq!(report.error_count, 1);
        assert!(report.errors[0].contains("invalid scan parameters"));
        assert_eq!(report.chunk_handles, vec!["prior".to_string()]);
        assert!(h.chunks.is_empty());
    }

    #[test]
    fn page_failure_before_checkpoint_is_reported_at_finish() {
        let h = harness(Setup {
            time_limit_ms: 15,
            failing_pages: vec![0],
            ..Setup::default()
        });
        let ExecutionOutcome::Checkpointed { resume, .. } =
            h.controller.execute(ResumeState::fresh("42", "")).unwrap()
        else {
            panic!("expected a checkpoint");
        };
        assert_eq!(resume.next_page_index, 2);
        assert_eq!(resume.failures.len(), 1);
        assert_eq!(resume.failures[0].page_index, Some(0));

        let (_, task) = h.scheduler.take_next().unwrap().unwrap();
        let restored = ResumeState::from_task_params(&task.params).unwrap();
        assert_eq!(restored.failures, resume.failures);
        let outcome = h.controller.execute(restored).unwrap();
        assert_eq!(outcome.state(), JobState::CompletedWithErrors);
        let ExecutionOutcome::Finished { report, .. } = outcome else {
            panic!("expected a finished execution");
        };
        assert_eq!(report.status, StageStatus::CompletedWithErrors);
        assert_eq!(report.error_count, 1);
        assert!(report.errors[0].contains("page 0"));
        assert_eq!(
            read_chunk_keys(h.chunks.as_ref(), &report.chunk_handles, ',').unwrap(),
            vec![key(3), key(5)]
        );
    }

    /// Source whose query can never be opened.
    struct UnopenableSource {
        unavailable: bool,
    }

    impl HistorySource for UnopenableSource {
        fn id(&self) -> &str {
            "closed"
        }

        fn open(
            &self,
            _params: &ScanParameters,
        ) -> Result<Option<Box<dyn PageWindow>>, ReconcileError> {
            if self.unavailable {
                return Err(ReconcileError::SourceUnavailable {
                    source_id: "closed".into(),
                    reason: "query rejected".into(),
                });
            }
            Ok(None)
        }
    }

    #[test]
    fn source_without_query_completes_with_nothing_to_write() {
        let h = harness(Setup {
            history: Some(Arc::new(UnopenableSource { unavailable: false })),
            ..Setup::default()
        });
        let outcome = h.controller.execute(ResumeState::fresh("42", "")).unwrap();
        let ExecutionOutcome::Finished { report, .. } = outcome else {
            panic!("expected a finished execution");
        };
        assert_eq!(report.status, StageStatus::Completed);
        assert_eq!(report.error_count, 0);
        assert!(report.chunk_handles.is_empty());
        assert!(h.chunks.is_empty());
        assert!(h.scheduler.submitted().is_empty());
    }

    #[test]
    fn unavailable_source_records_one_failure_and_keeps_chunks() {
        let h = harness(Setup {
            history: Some(Arc::new(UnopenableSource { unavailable: true })),
            ..Setup::default()
        });
        let mut state = ResumeState::fresh("42", "");
        state.next_page_index = 4;
        state.chunk_handles = vec!["7".into(), "8".into()];
        let outcome = h.controller.execute(state).unwrap();
        let ExecutionOutcome::Finished { report, .. } = outcome else {
            panic!("expected a finished execution");
        };
        assert_eq!(report.status, StageStatus::CompletedWithErrors);
        assert_eq!(report.error_count, 1);
        assert!(report.errors[0].contains("unavailable"));
        assert_eq!(report.chunk_handles, vec!["7".to_string(), "8".to_string()]);
        assert!(h.chunks.is_empty());
    }

    #[test]
    fn job_id_with_handle_delimiter_is_rejected_before_scanning() {
        let h = harness(Setup::default());
        let err = h
            .controller
            .execute(ResumeState::fresh("a,b", ""))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Checkpoint(ref msg) if msg.contains("reserved")));
        assert!(h.pipeline.events().is_empty());
        assert!(h.chunks.is_empty());
    }

    #[test]
    fn checkpoint_is_submitted_with_configured_task_type() {
        let h = harness(Setup {
            time_limit_ms: 15,
            task_type: TaskType::MapReduce,
            ..Setup::default()
        });
        let outcome = h.controller.execute(ResumeState::fresh("42", "")).unwrap();
        assert_eq!(outcome.state(), JobState::Checkpointed);
        let submitted = h.scheduler.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].1.task_type, TaskType::MapReduce);
    }

    #[test]
    fn low_usage_checkpoints_before_first_page() {
        let h = harness(Setup {
            usage: Arc::new(UsageLedger::new(500)),
            ..Setup::default()
        });
        let mut state = ResumeState::fresh("42", "");
        state.next_page_index = 1;
        let outcome = h.controller.execute(state).unwrap();
        let ExecutionOutcome::Checkpointed { resume, .. } = outcome else {
            panic!("expected a checkpoint");
        };
        assert_eq!(resume.next_page_index, 1);
        assert!(resume.chunk_handles.is_empty());
        assert!(h.chunks.is_empty());
    }

    #[test]
    fn resume_past_last_page_finishes_immediately() {
        let h = harness(Setup {
            usage: Arc::new(UsageLedger::new(0)),
            ..Setup::default()
        });
        let mut state = ResumeState::fresh("42", "");
        state.next_page_index = 3;
        let outcome = h.controller.execute(state).unwrap();
        assert_eq!(outcome.state(), JobState::Completed);
        assert!(outcome.chunk_handles().is_empty());
    }

    #[test]
    fn oversized_key_aborts_execution() {
        let h = harness(Setup {
            capacity: 20,
            ..Setup::default()
        });
        let err = h
            .controller
            .execute(ResumeState::fresh("42", ""))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            h.pipeline.events(),
            vec![PipelineEvent::Started("42".into())]
        );
    }

    #[test]
    fn next_step_checks_budget_only_while_pages_remain() {
        let progress = ScanProgress::resume(3);
        assert_eq!(
            progress.next_step(3, || panic!("budget consulted after last page")),
            Step::Finish
        );
        let progress = ScanProgress::resume(1);
        assert_eq!(progress.next_step(3, || true), Step::Checkpoint);
        assert_eq!(progress.next_step(3, || false), Step::Fetch(1));
    }

    #[test]
    fn advance_moves_forward_on_success_and_failure() {
        let mut progress = ScanProgress::resume(4);
        progress.advance(Ok(vec!["a".into()]));
        progress.advance(Err(ReconcileError::IndexQuery("down".into())));
        progress.advance(Ok(vec!["b".into()]));
        assert_eq!(progress.page_index, 7);
        assert_eq!(progress.missing, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(progress.errors.len(), 1);
        assert_eq!(progress.errors[0].page_index, Some(5));
        assert_eq!(progress.completion_state(), JobState::CompletedWithErrors);
    }
}
