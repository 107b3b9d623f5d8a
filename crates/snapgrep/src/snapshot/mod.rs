//! Snapshot container: a random-access on-disk copy of a repository's
//! files at one commit, used as the search corpus.
//!
//! Layout (little-endian): a fixed header (magic, version, file count,
//! table offset — patched after the body is written), the concatenated
//! file contents, then the file table (length-prefixed path, content
//! offset, content length). Files are written once and never mutated;
//! readers map the file and share it freely.

use std::error::Error;
use std::fmt::{self, Display};

pub const MAGIC: u32 = 0x534e_4150; // 'SNAP'
pub const VERSION: u32 = 1;

pub(crate) const HEADER_LEN: usize = 4 + 4 + 4 + 8;

mod reader;
pub use reader::{FileEntry, Snapshot};

mod writer;
pub use writer::SnapshotWriter;

/// Errors raised while opening or reading a snapshot. `Corrupt` is the
/// class that makes the store delete the file and refetch.
#[derive(Debug, Clone)]
pub enum SnapshotError {
    Corrupt(String),
    Io(String),
}

impl SnapshotError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, SnapshotError::Corrupt(_))
    }
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Corrupt(s) => write!(f, "corrupt snapshot: {}", s),
            SnapshotError::Io(s) => write!(f, "snapshot io error: {}", s),
        }
    }
}

impl Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        SnapshotError::Io(e.to_string())
    }
}
