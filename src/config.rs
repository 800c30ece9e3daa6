use std::borrow::Cow;
use std::time::Duration;

use crate::constants::budget::{TIME_LIMIT_MS, USAGE_RESERVE};
use crate::constants::checkpoint::{
    DEFAULT_DEPLOYMENT_ID, DEFAULT_SCRIPT_ID, HANDLE_LIST_DELIMITER,
};
use crate::constants::chunks::{CHUNK_CAPACITY, CHUNK_DELIMITER, CHUNK_FILE_PREFIX};
use crate::constants::index::RESULT_CAP;
use crate::constants::keys::KEY_DELIMITER;
use crate::errors::ReconcileError;
use crate::scheduler::TaskType;

/// Limits that force an execution to checkpoint.
#[derive(Clone, Debug)]
pub struct BudgetConfig {
    /// Wall-clock allowance measured from the execution's start.
    pub time_limit: Duration,
    /// Usage units that must remain when the next page starts.
    pub usage_reserve: i64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_millis(TIME_LIMIT_MS),
            usage_reserve: USAGE_RESERVE,
        }
    }
}

/// Controls how missing keys are laid out into chunks.
#[derive(Clone, Debug)]
pub struct ChunkConfig {
    /// Max bytes of content per chunk.
    pub capacity: usize,
    /// Separator written between keys.
    pub delimiter: char,
    /// Prefix of created chunk names (`<prefix>-<jobId>_<seq>.txt`).
    pub file_prefix: Cow<'static, str>,
    /// Optional store folder new chunks are created in.
    pub folder: Option<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            capacity: CHUNK_CAPACITY,
            delimiter: CHUNK_DELIMITER,
            file_prefix: Cow::Borrowed(CHUNK_FILE_PREFIX),
            folder: None,
        }
    }
}

/// Script/deployment pair a checkpointed execution is resubmitted under.
#[derive(Clone, Debug)]
pub struct TaskTarget {
    /// Kind of task submitted.
    pub task_type: TaskType,
    /// Script id of the reconciliation task.
    pub script_id: Cow<'static, str>,
    /// Deployment id of the reconciliation task.
    pub deployment_id: Cow<'static, str>,
}

impl Default for TaskTarget {
    fn default() -> Self {
        Self {
            task_type: TaskType::ScheduledScript,
            script_id: Cow::Borrowed(DEFAULT_SCRIPT_ID),
            deployment_id: Cow::Borrowed(DEFAULT_DEPLOYMENT_ID),
        }
    }
}

/// Top-level reconciliation configuration.
#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    /// Time and usage limits for one execution.
    pub budget: BudgetConfig,
    /// Chunk layout.
    pub chunking: ChunkConfig,
    /// Max summary names requested per page query.
    pub index_result_cap: usize,
    /// Where checkpointed executions are resubmitted.
    pub task: TaskTarget,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            chunking: ChunkConfig::default(),
            index_result_cap: RESULT_CAP,
            task: TaskTarget::default(),
        }
    }
}

impl ReconcileConfig {
    /// Reject settings the scan loop and chunk writer cannot honor.
    pub fn validated(self) -> Result<Self, ReconcileError> {
        if self.budget.time_limit.is_zero() {
            return Err(ReconcileError::Configuration(
                "time limit must be greater than zero".to_string(),
            ));
        }
        if self.chunking.capacity < 2 {
            return Err(ReconcileError::Configuration(
                "chunk capacity must be at least 2 bytes".to_string(),
            ));
        }
        if !self.chunking.delimiter.is_ascii() {
            return Err(ReconcileError::Configuration(
                "chunk delimiter must be a single ASCII character".to_string(),
            ));
        }
        if self.chunking.delimiter == KEY_DELIMITER {
            return Err(ReconcileError::Configuration(format!(
                "chunk delimiter '{}' collides with the key field delimiter",
                self.chunking.delimiter
            )));
        }
        let prefix = self.chunking.file_prefix.as_ref();
        let folder = self.chunking.folder.as_deref().unwrap_or("");
        if prefix.contains(HANDLE_LIST_DELIMITER) || folder.contains(HANDLE_LIST_DELIMITER) {
            return Err(ReconcileError::Configuration(format!(
                "chunk prefix and folder may not contain '{HANDLE_LIST_DELIMITER}'"
            )));
        }
        if self.index_result_cap == 0 {
            return Err(ReconcileError::Configuration(
                "index result cap must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_limits() {
        let config = ReconcileConfig::default().validated().unwrap();
        assert_eq!(config.budget.time_limit, Duration::from_millis(2_700_000));
        assert_eq!(config.budget.usage_reserve, 1000);
        assert_eq!(config.chunking.capacity, 10_000_000);
        assert_eq!(config.chunking.delimiter, ',');
        assert_eq!(config.task.task_type, TaskType::ScheduledScript);
        assert_eq!(config.index_result_cap, 1000);
    }

    #[test]
    fn rejects_delimiter_collision_and_zero_sizes() {
        let mut config = ReconcileConfig::default();
        config.chunking.delimiter = '|';
        let err = config.validated().unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Configuration(ref msg) if msg.contains("collides")
        ));

        let config = ReconcileConfig {
            index_result_cap: 0,
            ..ReconcileConfig::default()
        };
        assert!(config.validated().is_err());

        let mut config = ReconcileConfig::default();
        config.chunking.folder = Some("exports,old".into());
        assert!(matches!(
            config.validated(),
            Err(ReconcileError::Configuration(ref msg)) if msg.contains("folder")
        ));

        let mut config = ReconcileConfig::default();
        config.chunking.capacity = 1;
        assert!(config.validated().is_err());

        let mut config = ReconcileConfig::default();
        config.budget.time_limit = Duration::ZERO;
        assert!(matches!(
            config.validated(),
            Err(ReconcileError::Configuration(ref msg)) if msg.contains("time limit")
        ));
    }
}
