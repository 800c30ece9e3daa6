//! Deferred task submission for checkpointed executions.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;
use tracing::debug;

use crate::constants::task_queue::{BITCODE_PREFIX, TASK_FILE_EXTENSION, TASK_RECORD_VERSION};
use crate::errors::ReconcileError;
use crate::types::{ExecutionId, ParamName};

/// Kind of deferred task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub enum TaskType {
    /// Long-running scheduled script.
    ScheduledScript,
    /// Map/reduce job.
    MapReduce,
}

/// One deferred execution request.
#[derive(Clone, Debug, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct DeferredTask {
    /// Kind of task to run.
    pub task_type: TaskType,
    /// Script the task runs.
    pub script_id: String,
    /// Deployment of `script_id` to run under.
    pub deployment_id: String,
    /// Flat parameter map handed to the execution.
    pub params: BTreeMap<ParamName, String>,
}

/// Lifecycle of a submitted task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub enum TaskStatus {
    /// Queued, not started.
    Pending,
    /// Currently running.
    Processing,
    /// Ran to completion.
    Complete,
    /// Ended with an error or was killed.
    Failed,
}

impl TaskStatus {
    /// True while the task may still make progress.
    pub fn is_live(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Processing)
    }
}

/// Deferred task scheduler collaborator.
pub trait TaskScheduler: Send + Sync {
    /// Queue `task` and return its execution id.
    fn submit(&self, task: &DeferredTask) -> Result<ExecutionId, ReconcileError>;
    /// Current status, or `None` when the id is unknown.
    fn status(&self, execution_id: &str) -> Result<Option<TaskStatus>, ReconcileError>;
}

#[derive(Debug, Default)]
struct SchedulerState {
    queue: VecDeque<ExecutionId>,
    tasks: IndexMap<ExecutionId, (DeferredTask, TaskStatus)>,
}

/// In-memory FIFO scheduler. A host loop drains it with `take_next`.
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    state: Mutex<SchedulerState>,
}

impl InMemoryScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the oldest pending task and mark it `Processing`.
    pub fn take_next(&self) -> Result<Option<(ExecutionId, DeferredTask)>, ReconcileError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        while let Some(id) = state.queue.pop_front() {
            if let Some((task, status)) = state.tasks.get_mut(&id)
                && *status == TaskStatus::Pending
            {
                *status = TaskStatus::Processing;
                return Ok(Some((id, task.clone())));
            }
        }
        Ok(None)
    }

    /// Record a new status for `execution_id`.
    pub fn set_status(&self, execution_id: &str, status: TaskStatus) -> Result<(), ReconcileError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let entry = state.tasks.get_mut(execution_id).ok_or_else(|| {
            ReconcileError::Scheduler(format!("unknown execution '{execution_id}'"))
        })?;
        entry.1 = status;
        Ok(())
    }

    /// All tasks submitted so far, oldest first.
    pub fn submitted(&self) -> Vec<(ExecutionId, DeferredTask)> {
        self.state
            .lock()
            .map(|state| {
                state
                    .tasks
                    .iter()
                    .map(|(id, (task, _))| (id.clone(), task.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl TaskScheduler for InMemoryScheduler {
    fn submit(&self, task: &DeferredTask) -> Result<ExecutionId, ReconcileError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let id = format!("task-{}", state.tasks.len() + 1);
        state
            .tasks
            .insert(id.clone(), (task.clone(), TaskStatus::Pending));
        state.queue.push_back(id.clone());
        Ok(id)
    }

    fn status(&self, execution_id: &str) -> Result<Option<TaskStatus>, ReconcileError> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state.tasks.get(execution_id).map(|(_, status)| *status))
    }
}

fn poisoned() -> ReconcileError {
    ReconcileError::Scheduler("scheduler lock poisoned".into())
}

/// Persisted task record.
#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
struct TaskRecord {
    task: DeferredTask,
    status: TaskStatus,
}

/// File-backed task queue: one versioned record per task under a directory.
///
/// Execution ids are zero-padded sequence numbers, so lexical file order is
/// submission order.
pub struct FileTaskQueue {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl fmt::Debug for FileTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTaskQueue")
            .field("dir", &self.dir)
            .finish()
    }
}

impl FileTaskQueue {
    /// Open (or create) a queue in `dir`.
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, ReconcileError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    /// Claim the oldest pending task, marking it `Processing`.
    pub fn take_next(&self) -> Result<Option<(ExecutionId, DeferredTask)>, ReconcileError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        for id in self.execution_ids()? {
            let path = self.record_path(&id);
            let mut record = read_record(&path)?;
            if record.status == TaskStatus::Pending {
                record.status = TaskStatus::Processing;
                write_record(&path, &record)?;
                return Ok(Some((id, record.task)));
            }
        }
        Ok(None)
    }

    /// Record a new status for `execution_id`.
    pub fn set_status(&self, execution_id: &str, status: TaskStatus) -> Result<(), ReconcileError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let path = self.checked_record_path(execution_id)?;
        if !path.is_file() {
            return Err(ReconcileError::Scheduler(format!(
                "unknown execution '{execution_id}'"
            )));
        }
        let mut record = read_record(&path)?;
        record.status = status;
        write_record(&path, &record)
    }

    fn record_path(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{execution_id}.{TASK_FILE_EXTENSION}"))
    }

    fn checked_record_path(&self, execution_id: &str) -> Result<PathBuf, ReconcileError> {
        if execution_id.is_empty()
            || !execution_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        {
            return Err(ReconcileError::Scheduler(format!(
                "malformed execution id '{execution_id}'"
            )));
        }
        Ok(self.record_path(execution_id))
    }

    fn execution_ids(&self) -> Result<Vec<ExecutionId>, ReconcileError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(TASK_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl TaskScheduler for FileTaskQueue {
    fn submit(&self, task: &DeferredTask) -> Result<ExecutionId, ReconcileError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let next = self
            .execution_ids()?
            .iter()
            .filter_map(|id| id.strip_prefix("task-")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let id = format!("task-{next:06}");
        let record = TaskRecord {
            task: task.clone(),
            status: TaskStatus::Pending,
        };
        write_record(&self.record_path(&id), &record)?;
        debug!("[reconcile:tasks] queued {id} in {}", self.dir.display());
        Ok(id)
    }

    fn status(&self, execution_id: &str) -> Result<Option<TaskStatus>, ReconcileError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let path = self.checked_record_path(execution_id)?;
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(read_record(&path)?.status))
    }
}

fn encode_task_record(record: &TaskRecord) -> Vec<u8> {
    let payload = encode_bitcode_payload(&bitcode::encode(record));
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(TASK_RECORD_VERSION);
    buf.extend_from_slice(&payload);
    buf
}

fn decode_task_record(bytes: &[u8]) -> Result<TaskRecord, ReconcileError> {
    if bytes.first().copied() != Some(TASK_RECORD_VERSION) {
        return Err(ReconcileError::Scheduler(
            "task record version mismatch".into(),
        ));
    }
    let raw = decode_bitcode_payload(&bytes[1..])?;
    bitcode::decode(&raw)
        .map_err(|err| ReconcileError::Scheduler(format!("corrupt task record: {err}")))
}

fn encode_bitcode_payload(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(BITCODE_PREFIX);
    out.extend_from_slice(bytes);
    out
}

fn decode_bitcode_payload(bytes: &[u8]) -> Result<Vec<u8>, ReconcileError> {
    if bytes.first().copied() != Some(BITCODE_PREFIX) {
        return Err(ReconcileError::Scheduler(
            "bitcode payload missing expected prefix".into(),
        ));
    }
    Ok(bytes[1..].to_vec())
}

fn read_record(path: &Path) -> Result<TaskRecord, ReconcileError> {
    decode_task_record(&fs::read(path)?)
}

fn write_record(path: &Path, record: &TaskRecord) -> Result<(), ReconcileError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, encode_task_record(record))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task(page: usize) -> DeferredTask {
        DeferredTask {
            task_type: TaskType::ScheduledScript,
            script_id: "customscript_reconcile".into(),
            deployment_id: "customdeploy_reconcile".into(),
            params: BTreeMap::from([
                ("jobId".to_string(), "42".to_string()),
                ("nextPageIndex".to_string(), page.to_string()),
            ]),
        }
    }

    #[test]
    fn in_memory_scheduler_runs_fifo() {
        let scheduler = InMemoryScheduler::new();
        let first = scheduler.submit(&task(1)).unwrap();
        let second = scheduler.submit(&task(2)).unwrap();
        assert_ne!(first, second);
        assert_eq!(scheduler.status(&first).unwrap(), Some(TaskStatus::Pending));

        let (id, claimed) = scheduler.take_next().unwrap().unwrap();
        assert_eq!(id, first);
        assert_eq!(claimed, task(1));
        assert_eq!(scheduler.status(&first).unwrap(), Some(TaskStatus::Processing));

        scheduler.set_status(&second, TaskStatus::Failed).unwrap();
        assert!(scheduler.take_next().unwrap().is_none());
        assert_eq!(scheduler.status("task-99").unwrap(), None);
        assert_eq!(scheduler.submitted().len(), 2);
    }

    #[test]
    fn file_queue_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let queue = FileTaskQueue::open(dir.path()).unwrap();
        let first = queue.submit(&task(3)).unwrap();
        let second = queue.submit(&task(4)).unwrap();
        assert_eq!(first, "task-000001");
        assert_eq!(second, "task-000002");

        let reopened = FileTaskQueue::open(dir.path()).unwrap();
        assert_eq!(reopened.status(&first).unwrap(), Some(TaskStatus::Pending));
        let (id, claimed) = reopened.take_next().unwrap().unwrap();
        assert_eq!(id, first);
        assert_eq!(claimed, task(3));
        assert_eq!(queue.status(&first).unwrap(), Some(TaskStatus::Processing));

        reopened.set_status(&first, TaskStatus::Complete).unwrap();
        let (id, _) = reopened.take_next().unwrap().unwrap();
        assert_eq!(id, second);
        assert!(reopened.take_next().unwrap().is_none());
        assert_eq!(reopened.status("task-000009").unwrap(), None);
    }

    #[test]
    fn file_queue_rejects_corrupt_records_and_bad_ids() {
        let dir = tempdir().unwrap();
        let queue = FileTaskQueue::open(dir.path()).unwrap();
        fs::write(dir.path().join("task-000001.task"), b"\x01Xjunk").unwrap();
        let err = queue.status("task-000001").unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Scheduler(ref msg) if msg.contains("prefix")
        ));
        fs::write(dir.path().join("task-000001.task"), b"\x09B").unwrap();
        assert!(matches!(
            queue.status("task-000001"),
            Err(ReconcileError::Scheduler(ref msg)) if msg.contains("version")
        ));
        assert!(queue.status("../escape").is_err());
    }

    #[test]
    fn live_statuses() {
        assert!(TaskStatus::Pending.is_live());
        assert!(TaskStatus::Processing.is_live());
        assert!(!TaskStatus::Complete.is_live());
        assert!(!TaskStatus::Failed.is_live());
    }
}
