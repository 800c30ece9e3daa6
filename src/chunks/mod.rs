//! Capacity-bounded chunk output.
//!
//! Missing keys are joined with the chunk delimiter and laid out across an
//! append-only sequence of chunks:
//! - the newest existing chunk is topped up first (a leading delimiter
//!   separates the appended text from its prior content),
//! - the rest goes into new chunks named `<prefix>-<jobId>_<seq>.txt`,
//! - every cut falls on a key boundary, so concatenating the chunks in order
//!   with the delimiter reproduces the key sequence.

mod cut;

pub use cut::{CutPoint, cut_point};

use indexmap::IndexMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::config::ChunkConfig;
use crate::constants::chunks::{CHUNK_FILE_EXTENSION, CHUNK_SEQ_WIDTH};
use crate::errors::ReconcileError;
use crate::types::{ChunkHandle, SummaryKey};

/// Durable object store holding chunk contents.
pub trait ChunkStore: Send + Sync {
    /// Full contents of the chunk behind `handle`.
    fn load(&self, handle: &str) -> Result<String, ReconcileError>;
    /// Persist a new chunk and return its handle.
    fn create(
        &self,
        name: &str,
        contents: &str,
        folder: Option<&str>,
    ) -> Result<ChunkHandle, ReconcileError>;
    /// Append `text` to an existing chunk, persist it, and return its handle.
    fn append(&self, handle: &str, text: &str) -> Result<ChunkHandle, ReconcileError>;
}

/// Chunk name for sequence number `seq` (1-based).
///
/// ```
/// use summary_reconcile::chunks::chunk_name;
/// assert_eq!(chunk_name("chkSummary", "42", 7), "chkSummary-42_007.txt");
/// assert_eq!(chunk_name("chkSummary", "42", 1234), "chkSummary-42_1234.txt");
/// ```
pub fn chunk_name(prefix: &str, job_id: &str, seq: usize) -> String {
    format!("{prefix}-{job_id}_{seq:0width$}.{CHUNK_FILE_EXTENSION}", width = CHUNK_SEQ_WIDTH)
}

/// Writes missing keys into capacity-bounded chunks.
pub struct ChunkWriter {
    store: Arc<dyn ChunkStore>,
    config: ChunkConfig,
    delimiter: u8,
}

impl ChunkWriter {
    /// Create a writer; the delimiter must be a single ASCII byte.
    pub fn new(store: Arc<dyn ChunkStore>, config: ChunkConfig) -> Result<Self, ReconcileError> {
        let delimiter = u8::try_from(config.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ReconcileError::Configuration(format!(
                    "chunk delimiter '{}' is not a single ASCII byte",
                    config.delimiter
                ))
            })?;
        if config.capacity < 2 {
            return Err(ReconcileError::Configuration(
                "chunk capacity must be at least 2 bytes".to_string(),
            ));
        }
        Ok(Self {
            store,
            config,
            delimiter,
        })
    }

    /// Persist `keys` after the chunks in `existing` and return the updated
    /// handle list.
    ///
    /// Handles in `existing` are never removed or reordered. Empty keys are
    /// dropped. A key longer than the chunk capacity aborts with
    /// `ReconcileError::KeyExceedsCapacity`.
    pub fn save(
        &self,
        job_id: &str,
        keys: &[SummaryKey],
        existing: Vec<ChunkHandle>,
    ) -> Result<Vec<ChunkHandle>, ReconcileError> {
        let separator = char::from(self.delimiter).to_string();
        let keys: Vec<&str> = keys
            .iter()
            .map(String::as_str)
            .filter(|key| !key.is_empty())
            .collect();
        let joined = keys.join(separator.as_str());
        if joined.is_empty() {
            debug!("[reconcile:chunks] no contents to save for job {job_id}");
            return Ok(existing);
        }
        let len = joined.len();
        let capacity = self.config.capacity;
        let mut handles = existing;
        let mut consumed = 0usize;

        if let Some(last) = handles.last().cloned() {
            match self.store.load(&last) {
                Ok(contents) => {
                    let remaining = capacity.saturating_sub(contents.len().saturating_add(1));
                    if remaining > 0
                        && let Some(cut) =
                            cut_point(&joined, 0, remaining, remaining, true, self.delimiter)
                    {
                        let text = format!("{separator}{}", &joined[..cut.end]);
                        let handle = self.store.append(&last, &text)?;
                        if let Some(slot) = handles.last_mut() {
                            *slot = handle;
                        }
                        debug!(
                            "[reconcile:chunks] appended {} bytes to chunk {last}",
                            text.len()
                        );
                        consumed = cut.next;
                    }
                }
                Err(err) => {
                    warn!(
                        "[reconcile:chunks] unable to load chunk {last}; continuing with new chunks: {err}"
                    );
                }
            }
        }

        let mut seq = handles.len();
        while consumed < len {
            let lo = consumed;
            let hi = lo.saturating_add(capacity);
            let cut = cut_point(&joined, lo, hi, capacity, false, self.delimiter)
                .ok_or(ReconcileError::KeyExceedsCapacity {
                    offset: lo,
                    capacity,
                })?;
            seq += 1;
            let name = chunk_name(&self.config.file_prefix, job_id, seq);
            let handle = self.store.create(
                &name,
                &joined[lo..cut.end],
                self.config.folder.as_deref(),
            )?;
            debug!(
                "[reconcile:chunks] created chunk {name} ({} bytes) -> {handle}",
                cut.end - lo
            );
            handles.push(handle);
            consumed = cut.next;
        }
        Ok(handles)
    }
}

/// Read back the keys stored in `handles`, in order.
pub fn read_chunk_keys(
    store: &dyn ChunkStore,
    handles: &[ChunkHandle],
    delimiter: char,
) -> Result<Vec<SummaryKey>, ReconcileError> {
    let mut keys = Vec::new();
    for handle in handles {
        let contents = store.load(handle)?;
        if contents.is_empty() {
            continue;
        }
        keys.extend(contents.split(delimiter).map(str::to_string));
    }
    Ok(keys)
}

#[derive(Clone, Debug)]
struct StoredChunk {
    name: String,
    folder: Option<String>,
    contents: String,
}

/// In-memory chunk store with sequential numeric handles.
#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<IndexMap<ChunkHandle, StoredChunk>>,
}

impl InMemoryChunkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name a chunk was created with.
    pub fn name_of(&self, handle: &str) -> Option<String> {
        self.chunks
            .read()
            .ok()
            .and_then(|chunks| chunks.get(handle).map(|chunk| chunk.name.clone()))
    }

    /// Folder a chunk was created in.
    pub fn folder_of(&self, handle: &str) -> Option<String> {
        self.chunks
            .read()
            .ok()
            .and_then(|chunks| chunks.get(handle).and_then(|chunk| chunk.folder.clone()))
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.read().map(|chunks| chunks.len()).unwrap_or(0)
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> ReconcileError {
    ReconcileError::ChunkStore("chunk store lock poisoned".to_string())
}

impl ChunkStore for InMemoryChunkStore {
    fn load(&self, handle: &str) -> Result<String, ReconcileError> {
        let chunks = self.chunks.read().map_err(|_| poisoned())?;
        chunks
            .get(handle)
            .map(|chunk| chunk.contents.clone())
            .ok_or_else(|| ReconcileError::ChunkStore(format!("chunk {handle} not found")))
    }

    fn create(
        &self,
        name: &str,
        contents: &str,
        folder: Option<&str>,
    ) -> Result<ChunkHandle, ReconcileError> {
        let mut chunks = self.chunks.write().map_err(|_| poisoned())?;
        let handle = (chunks.len() + 1).to_string();
        chunks.insert(
            handle.clone(),
            StoredChunk {
                name: name.to_string(),
                folder: folder.map(str::to_string),
                contents: contents.to_string(),
            },
        );
        Ok(handle)
    }

    fn append(&self, handle: &str, text: &str) -> Result<ChunkHandle, ReconcileError> {
        let mut chunks = self.chunks.write().map_err(|_| poisoned())?;
        let chunk = chunks
            .get_mut(handle)
            .ok_or_else(|| ReconcileError::ChunkStore(format!("chunk {handle} not found")))?;
        chunk.contents.push_str(text);
        Ok(handle.to_string())
    }
}
