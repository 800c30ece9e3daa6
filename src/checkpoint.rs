//! Resume state carried between executions of one job.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::checkpoint::{
    HANDLE_LIST_DELIMITER, PARAM_CHUNK_HANDLES, PARAM_FAILURES, PARAM_JOB_ID, PARAM_NEXT_PAGE,
    PARAM_SCAN_PARAMS, RESERVED_JOB_ID_CHARS,
};
use crate::errors::ReconcileError;
use crate::types::{ChunkHandle, JobId, LogMessage, ParamName};

/// A recorded setup or page failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFailure {
    /// Page that failed; `None` for failures before the first page.
    pub page_index: Option<usize>,
    /// Rendered error.
    pub message: LogMessage,
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Progress persisted when an execution checkpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumeState {
    /// Job being reconciled.
    pub job_id: JobId,
    /// Serialized `ScanParameters`, carried verbatim.
    pub params_json: String,
    /// First page the next execution processes.
    pub next_page_index: usize,
    /// Chunks written so far, in creation order.
    pub chunk_handles: Vec<ChunkHandle>,
    /// Failures recorded by earlier executions of the job.
    pub failures: Vec<ScanFailure>,
}

impl ResumeState {
    /// State for the first execution of a job.
    pub fn fresh(job_id: impl Into<JobId>, params_json: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            params_json: params_json.into(),
            ..Self::default()
        }
    }

    /// Flatten into deferred task parameters.
    pub fn to_task_params(&self) -> Result<BTreeMap<ParamName, String>, ReconcileError> {
        let separator = HANDLE_LIST_DELIMITER.to_string();
        let mut params = BTreeMap::from([
            (PARAM_JOB_ID.to_string(), self.job_id.clone()),
            (PARAM_SCAN_PARAMS.to_string(), self.params_json.clone()),
            (PARAM_NEXT_PAGE.to_string(), self.next_page_index.to_string()),
            (
                PARAM_CHUNK_HANDLES.to_string(),
                self.chunk_handles.join(separator.as_str()),
            ),
        ]);
        if !self.failures.is_empty() {
            params.insert(
                PARAM_FAILURES.to_string(),
                serde_json::to_string(&self.failures)?,
            );
        }
        Ok(params)
    }

    /// Rebuild from deferred task parameters.
    ///
    /// A missing page index defaults to 0, a missing handle list or failure
    /// list to empty.
    pub fn from_task_params(params: &BTreeMap<ParamName, String>) -> Result<Self, ReconcileError> {
        let job_id = params
            .get(PARAM_JOB_ID)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ReconcileError::Checkpoint(format!("missing '{PARAM_JOB_ID}'")))?
            .to_string();
        check_job_id(&job_id)?;
        let params_json = params.get(PARAM_SCAN_PARAMS).cloned().unwrap_or_default();
        let next_page_index = match params.get(PARAM_NEXT_PAGE).map(|value| value.trim()) {
            None | Some("") => 0,
            Some(raw) => raw.parse::<usize>().map_err(|err| {
                ReconcileError::Checkpoint(format!(
                    "invalid '{PARAM_NEXT_PAGE}' value '{raw}': {err}"
                ))
            })?,
        };
        let chunk_handles = params
            .get(PARAM_CHUNK_HANDLES)
            .map(|raw| {
                raw.split(HANDLE_LIST_DELIMITER)
                    .map(str::trim)
                    .filter(|handle| !handle.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let failures = match params.get(PARAM_FAILURES).map(|value| value.trim()) {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|err| {
                ReconcileError::Checkpoint(format!("invalid '{PARAM_FAILURES}' value: {err}"))
            })?,
        };
        Ok(Self {
            job_id,
            params_json,
            next_page_index,
            chunk_handles,
            failures,
        })
    }
}

/// Reject job ids that would corrupt chunk names or the joined handle list.
pub fn check_job_id(job_id: &str) -> Result<(), ReconcileError> {
    if job_id.trim().is_empty() {
        return Err(ReconcileError::Checkpoint("job id is empty".to_string()));
    }
    if let Some(ch) = job_id.chars().find(|ch| RESERVED_JOB_ID_CHARS.contains(ch)) {
        return Err(ReconcileError::Checkpoint(format!(
            "job id '{job_id}' contains reserved character '{ch}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_params_round_trip() {
        let state = ResumeState {
            job_id: "42".into(),
            params_json: r#"{"subs":["1"]}"#.into(),
            next_page_index: 7,
            chunk_handles: vec!["11".into(), "12".into()],
            failures: vec![
                ScanFailure {
                    page_index: Some(3),
                    message: "failed to fetch page 3: timeout, retry later".into(),
                },
                ScanFailure {
                    page_index: None,
                    message: "setup".into(),
                },
            ],
        };
        let params = state.to_task_params().unwrap();
        assert_eq!(params.get("nextPageIndex").map(String::as_str), Some("7"));
        assert_eq!(params.get("chunkHandles").map(String::as_str), Some("11,12"));
        assert!(params["scanFailures"].contains(r#""pageIndex":3"#));
        assert_eq!(ResumeState::from_task_params(&params).unwrap(), state);
    }

    #[test]
    fn missing_progress_defaults_to_fresh_state() {
        let params = BTreeMap::from([("jobId".to_string(), "42".to_string())]);
        assert_eq!(
            ResumeState::from_task_params(&params).unwrap(),
            ResumeState::fresh("42", "")
        );
        let params = ResumeState::fresh("42", "").to_task_params().unwrap();
        assert!(!params.contains_key("scanFailures"));
        let restored = ResumeState::from_task_params(&params).unwrap();
        assert!(restored.chunk_handles.is_empty());
        assert!(restored.failures.is_empty());
    }

    #[test]
    fn rejects_missing_job_and_bad_page_index() {
        assert!(matches!(
            ResumeState::from_task_params(&BTreeMap::new()),
            Err(ReconcileError::Checkpoint(ref msg)) if msg.contains("jobId")
        ));
        let params = BTreeMap::from([
            ("jobId".to_string(), "42".to_string()),
            ("nextPageIndex".to_string(), "-1".to_string()),
        ]);
        assert!(matches!(
            ResumeState::from_task_params(&params),
            Err(ReconcileError::Checkpoint(ref msg)) if msg.contains("nextPageIndex")
        ));
        let params = BTreeMap::from([
            ("jobId".to_string(), "42".to_string()),
            ("scanFailures".to_string(), "not json".to_string()),
        ]);
        assert!(matches!(
            ResumeState::from_task_params(&params),
            Err(ReconcileError::Checkpoint(ref msg)) if msg.contains("scanFailures")
        ));
    }

    #[test]
    fn job_ids_with_reserved_characters_are_rejected() {
        for job_id in ["a,b", "a/b", "a\\b", "  "] {
            assert!(
                matches!(check_job_id(job_id), Err(ReconcileError::Checkpoint(_))),
                "{job_id:?} should be rejected"
            );
        }
        assert!(check_job_id("job-7").is_ok());

        let params = BTreeMap::from([
            ("jobId".to_string(), "a,b".to_string()),
            ("chunkHandles".to_string(), "chkSummary-a,b_001.txt".to_string()),
        ]);
        assert!(matches!(
            ResumeState::from_task_params(&params),
            Err(ReconcileError::Checkpoint(ref msg)) if msg.contains("reserved")
        ));
    }
}
