use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, error::ErrorKind};

use crate::budget::{SystemClock, UsageLedger, UsageMeter};
use crate::checkpoint::ResumeState;
use crate::chunks::read_chunk_keys;
use crate::config::ReconcileConfig;
use crate::constants::budget::{TIME_LIMIT_MS, USAGE_RESERVE};
use crate::constants::chunks::CHUNK_CAPACITY;
use crate::constants::scan::PAGE_SIZE;
use crate::errors::ReconcileError;
use crate::index::{InMemoryAggregateIndex, SummaryRecord};
use crate::job::{Collaborators, ExecutionOutcome, JobController};
use crate::pipeline::RecordingPipeline;
use crate::scheduler::{
    DeferredTask, FileTaskQueue, InMemoryScheduler, TaskScheduler, TaskStatus,
};
use crate::source::{
    HistoryRecord, HistorySource, InMemoryHistorySource, Page, PageWindow, ScanParameters,
};
use crate::transport::fs::{FileChunkStore, read_key_lines};
use crate::types::{ExecutionId, JobId};
use crate::watchdog::{TrackedJob, sweep_stalled};

#[derive(Debug, Parser)]
#[command(
    name = "reconcile_demo",
    disable_help_subcommand = true,
    about = "Reconcile history keys against existing summaries",
    long_about = "Scan history keys page by page, collect the keys with no summary, and write them into capacity-bounded chunk files. Executions checkpoint and resubmit themselves when their time or usage budget runs out.",
    after_help = "History and summary files hold one composite key per line. Set RUST_LOG=debug for per-page logs."
)]
/// CLI for `reconcile_demo`.
///
/// Common usage:
/// - Single pass: `--history dhr.txt --summaries summaries.txt`
/// - Force checkpoints: `--usage-limit 3000 --usage-per-page 1000`
/// - Persist the task queue and continue later: `--queue-dir /tmp/tasks --max-executions 2`,
///   then rerun with `--resume`
struct ReconcileDemoCli {
    #[arg(long, value_name = "PATH", help = "History keys, one per line")]
    history: PathBuf,
    #[arg(long, value_name = "PATH", help = "Existing summary names, one per line")]
    summaries: PathBuf,
    #[arg(long = "job-id", default_value = "1", help = "Job id used in chunk names")]
    job_id: JobId,
    #[arg(
        long,
        default_value = "",
        help = "Scan parameters as JSON (subs, books, assetTypes, date)"
    )]
    params: String,
    #[arg(
        long = "chunk-dir",
        default_value = "reconcile_chunks",
        value_name = "PATH",
        help = "Directory chunk files are written under"
    )]
    chunk_dir: PathBuf,
    #[arg(long = "chunk-folder", help = "Optional sub-folder for new chunks")]
    chunk_folder: Option<String>,
    #[arg(
        long,
        default_value_t = CHUNK_CAPACITY,
        value_parser = parse_positive_usize,
        help = "Max bytes per chunk"
    )]
    capacity: usize,
    #[arg(
        long = "page-size",
        default_value_t = PAGE_SIZE,
        value_parser = parse_positive_usize,
        help = "History keys per page"
    )]
    page_size: usize,
    #[arg(
        long = "time-limit-ms",
        default_value_t = TIME_LIMIT_MS,
        help = "Wall-clock budget per execution"
    )]
    time_limit_ms: u64,
    #[arg(
        long = "usage-limit",
        default_value_t = i64::MAX,
        help = "Usage units granted to each execution"
    )]
    usage_limit: i64,
    #[arg(
        long = "usage-per-page",
        default_value_t = 0,
        help = "Usage units charged for each page fetch"
    )]
    usage_per_page: i64,
    #[arg(
        long = "usage-reserve",
        default_value_t = USAGE_RESERVE,
        help = "Usage units that must remain before a page starts"
    )]
    usage_reserve: i64,
    #[arg(
        long = "queue-dir",
        value_name = "PATH",
        help = "Persist resubmitted executions in this directory instead of memory"
    )]
    queue_dir: Option<PathBuf>,
    #[arg(long, help = "Start from the oldest pending task in --queue-dir")]
    resume: bool,
    #[arg(
        long = "max-executions",
        value_parser = parse_positive_usize,
        help = "Stop after this many executions even if the job is not finished"
    )]
    max_executions: Option<usize>,
}

/// Run the reconciliation demo CLI with injectable args.
pub fn run_reconcile_demo<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) = parse_cli::<ReconcileDemoCli, _>(
        std::iter::once("reconcile_demo".to_string()).chain(args_iter),
    )?
    else {
        return Ok(());
    };

    let mut config = ReconcileConfig::default();
    config.budget.time_limit = Duration::from_millis(cli.time_limit_ms);
    config.budget.usage_reserve = cli.usage_reserve;
    config.chunking.capacity = cli.capacity;
    config.chunking.folder = cli.chunk_folder.clone();
    let delimiter = config.chunking.delimiter;

    let history: Vec<HistoryRecord> = read_key_lines(&cli.history)?
        .into_iter()
        .map(HistoryRecord::from_key)
        .collect();
    let summaries: Vec<SummaryRecord> = read_key_lines(&cli.summaries)?
        .into_iter()
        .map(SummaryRecord::active)
        .collect();
    println!(
        "history keys: {} | summaries: {}",
        history.len(),
        summaries.len()
    );

    let ledger = UsageLedger::new(cli.usage_limit);
    let source = MeteredHistory {
        inner: InMemoryHistorySource::new("dhr", history, cli.page_size),
        ledger: ledger.clone(),
        cost: cli.usage_per_page,
    };
    let queue = match &cli.queue_dir {
        Some(dir) => DemoQueue::File(Arc::new(FileTaskQueue::open(dir)?)),
        None => DemoQueue::Memory(Arc::new(InMemoryScheduler::new())),
    };
    let chunks = Arc::new(FileChunkStore::open(&cli.chunk_dir)?);
    let pipeline = Arc::new(RecordingPipeline::new());
    let usage: Arc<dyn UsageMeter> = Arc::new(ledger.clone());
    let controller = JobController::new(
        config,
        Collaborators {
            history: Arc::new(source),
            index: Arc::new(InMemoryAggregateIndex::new(summaries)),
            chunks: chunks.clone(),
            scheduler: queue.scheduler(),
            pipeline,
            clock: Arc::new(SystemClock::new()),
            usage,
        },
    )?;

    let (mut current, mut state) = if cli.resume {
        match queue.take_next()? {
            Some((id, task)) => (Some(id), ResumeState::from_task_params(&task.params)?),
            None => {
                println!("no pending task to resume");
                return Ok(());
            }
        }
    } else {
        // Reject malformed parameters before the first execution.
        ScanParameters::from_json(&cli.params)?;
        (None, ResumeState::fresh(cli.job_id.clone(), cli.params.clone()))
    };
    let mut tracked = TrackedJob::running(state.job_id.clone(), current.clone());
    let max_executions = cli.max_executions.unwrap_or(usize::MAX);

    let mut executions = 0usize;
    loop {
        executions += 1;
        ledger.refill(cli.usage_limit);
        let outcome = controller.execute(state)?;
        tracked.record(&outcome);
        if let Some(id) = current.take() {
            queue.set_status(&id, TaskStatus::Complete)?;
        }
        match outcome {
            ExecutionOutcome::Checkpointed {
                execution_id,
                resume,
            } => {
                println!(
                    "execution {executions}: checkpointed at page {} ({} chunks, {} failures) -> {execution_id}",
                    resume.next_page_index,
                    resume.chunk_handles.len(),
                    resume.failures.len()
                );
                if executions >= max_executions {
                    println!("stopping after {executions} executions; rerun with --resume to continue");
                    break;
                }
                let Some((id, task)) = queue.take_next()? else {
                    return Err("checkpointed task was not queued".into());
                };
                tracked.execution_id = Some(id.clone());
                current = Some(id);
                state = ResumeState::from_task_params(&task.params)?;
            }
            ExecutionOutcome::Finished { report, next_stage } => {
                println!("execution {executions}: finished -> next stage {next_stage}");
                println!("{}", serde_json::to_string_pretty(&report)?);
                for handle in &report.chunk_handles {
                    let path = chunks.path_of(handle)?;
                    println!("chunk {handle}: {}", path.display());
                }
                let keys = read_chunk_keys(chunks.as_ref(), &report.chunk_handles, delimiter)?;
                println!("missing keys across all chunks: {}", keys.len());
                break;
            }
        }
    }

    let stalled = sweep_stalled(std::slice::from_mut(&mut tracked), queue.scheduler().as_ref());
    if !stalled.is_empty() {
        println!("stalled jobs marked failed: {}", stalled.join(", "));
    }
    Ok(())
}

/// History source that charges a usage ledger for every page fetch.
struct MeteredHistory {
    inner: InMemoryHistorySource,
    ledger: UsageLedger,
    cost: i64,
}

struct MeteredWindow {
    inner: Box<dyn PageWindow>,
    ledger: UsageLedger,
    cost: i64,
}

impl HistorySource for MeteredHistory {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn open(&self, params: &ScanParameters) -> Result<Option<Box<dyn PageWindow>>, ReconcileError> {
        Ok(self.inner.open(params)?.map(|inner| {
            Box::new(MeteredWindow {
                inner,
                ledger: self.ledger.clone(),
                cost: self.cost,
            }) as Box<dyn PageWindow>
        }))
    }
}

impl PageWindow for MeteredWindow {
    fn page_count(&self) -> usize {
        self.inner.page_count()
    }

    fn record_count(&self) -> usize {
        self.inner.record_count()
    }

    fn fetch(&self, page_index: usize) -> Result<Page, ReconcileError> {
        self.ledger.charge(self.cost);
        self.inner.fetch(page_index)
    }
}

enum DemoQueue {
    Memory(Arc<InMemoryScheduler>),
    File(Arc<FileTaskQueue>),
}

impl DemoQueue {
    fn scheduler(&self) -> Arc<dyn TaskScheduler> {
        match self {
            DemoQueue::Memory(queue) => queue.clone(),
            DemoQueue::File(queue) => queue.clone(),
        }
    }

    fn take_next(&self) -> Result<Option<(ExecutionId, DeferredTask)>, ReconcileError> {
        match self {
            DemoQueue::Memory(queue) => queue.take_next(),
            DemoQueue::File(queue) => queue.take_next(),
        }
    }

    fn set_status(&self, execution_id: &str, status: TaskStatus) -> Result<(), ReconcileError> {
        match self {
            DemoQueue::Memory(queue) => queue.set_status(execution_id, status),
            DemoQueue::File(queue) => queue.set_status(execution_id, status),
        }
    }
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw.parse::<usize>().map_err(|_| {
        format!(
            "invalid value '{}': expected a positive integer",
            raw.trim()
        )
    })?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}
