use std::io;

use thiserror::Error;

use crate::types::SourceId;

/// Error type for reconciliation setup, collaborator, and persistence failures.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The history query could not be constructed or run.
    #[error("history source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable {
        /// Source that failed.
        source_id: SourceId,
        /// Underlying cause.
        reason: String,
    },
    /// One page could not be fetched.
    #[error("failed to fetch page {page_index}: {reason}")]
    PageFetch {
        /// Page that failed.
        page_index: usize,
        /// Underlying cause.
        reason: String,
    },
    /// The summary index search failed.
    #[error("summary index query failed: {0}")]
    IndexQuery(String),
    /// Job parameters could not be parsed.
    #[error("invalid scan parameters: {0}")]
    InvalidParameters(String),
    /// A chunk could not be loaded, created, or appended to.
    #[error("chunk store failure: {0}")]
    ChunkStore(String),
    /// A single key is longer than the chunk capacity, so no delimiter can be
    /// found inside a full window starting at `offset`.
    #[error(
        "no key boundary within {capacity} bytes starting at offset {offset}; a key exceeds chunk capacity"
    )]
    KeyExceedsCapacity {
        /// Byte offset of the window start in the joined key text.
        offset: usize,
        /// Configured chunk capacity.
        capacity: usize,
    },
    /// Task submission or status lookup failed.
    #[error("task scheduler failure: {0}")]
    Scheduler(String),
    /// Stage reporting or next-stage trigger failed.
    #[error("pipeline control failure: {0}")]
    Pipeline(String),
    /// Resume state is missing, malformed, or unusable.
    #[error("checkpoint state is invalid: {0}")]
    Checkpoint(String),
    /// Configuration rejected by validation.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON encoding or decoding failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReconcileError {
    /// True for data/configuration invariant violations that must abort the
    /// execution instead of being recorded as a scan failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::KeyExceedsCapacity { .. })
    }
}
