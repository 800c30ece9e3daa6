/// Filesystem-backed chunk storage and key file readers.
pub mod fs;

pub use fs::{FileChunkStore, read_key_lines};
