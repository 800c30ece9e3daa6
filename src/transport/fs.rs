use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use crate::chunks::ChunkStore;
use crate::errors::ReconcileError;
use crate::types::{ChunkHandle, SummaryKey};

/// Filesystem chunk store: one plain-text file per chunk under `root`.
///
/// Handles are paths relative to `root` (`<folder>/<name>` or `<name>`), using
/// `/` as separator on every platform.
pub struct FileChunkStore {
    root: PathBuf,
}

impl fmt::Debug for FileChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileChunkStore")
            .field("root", &self.root)
            .finish()
    }
}

impl FileChunkStore {
    /// Open a store rooted at `root`, creating the directory when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ReconcileError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path behind `handle`.
    pub fn path_of(&self, handle: &str) -> Result<PathBuf, ReconcileError> {
        let relative = Path::new(handle);
        if handle.is_empty()
            || !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(ReconcileError::ChunkStore(format!(
                "chunk handle '{handle}' is not a relative path inside the store"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ChunkStore for FileChunkStore {
    fn load(&self, handle: &str) -> Result<String, ReconcileError> {
        let path = self.path_of(handle)?;
        fs::read_to_string(&path).map_err(|err| map_chunk_err(&path, err))
    }

    fn create(
        &self,
        name: &str,
        contents: &str,
        folder: Option<&str>,
    ) -> Result<ChunkHandle, ReconcileError> {
        let handle = match folder.map(|folder| folder.trim_matches('/')) {
            Some(folder) if !folder.is_empty() => format!("{folder}/{name}"),
            _ => name.to_string(),
        };
        let path = self.path_of(&handle)?;
        ensure_parent_dir(&path)?;
        fs::write(&path, contents).map_err(|err| map_chunk_err(&path, err))?;
        Ok(handle)
    }

    fn append(&self, handle: &str, text: &str) -> Result<ChunkHandle, ReconcileError> {
        let path = self.path_of(handle)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|err| map_chunk_err(&path, err))?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|err| map_chunk_err(&path, err))?;
        Ok(handle.to_string())
    }
}

/// Read one key per line from `path`, skipping blank lines.
pub fn read_key_lines(path: &Path) -> Result<Vec<SummaryKey>, ReconcileError> {
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn ensure_parent_dir(path: &Path) -> Result<(), ReconcileError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn map_chunk_err(path: &Path, err: io::Error) -> ReconcileError {
    ReconcileError::ChunkStore(format!("{}: {err}", path.display()))
}
