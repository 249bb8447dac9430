//! Well-known transaction log files of a shard directory.

use std::path::{Path, PathBuf};

/// One of the three metadata documents kept in a shard directory.
///
/// Which of them exist encodes the recovery state: `current.json` alone is a
/// clean shutdown, an additional `current.c.json` is an interrupted commit and
/// an additional `current.m.json` is an interrupted merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentFile {
    /// Durable committed state.
    Current,
    /// Pending commit snapshot.
    Commit,
    /// Pending merge snapshot.
    Merge,
}

impl CurrentFile {
    /// Returns the file name inside the shard directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Current => "current.json",
            Self::Commit => "current.c.json",
            Self::Merge => "current.m.json",
        }
    }

    /// Returns the full path of this file inside `dir`.
    pub fn path(self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Kind of edit transaction; selects the pending log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// New data committed from memory.
    Commit,
    /// Merge (compaction) of existing files.
    Merge,
}

impl EditKind {
    /// Returns the pending log file written while this kind of edit is staged.
    pub fn log_file(self) -> CurrentFile {
        match self {
            Self::Commit => CurrentFile::Commit,
            Self::Merge => CurrentFile::Merge,
        }
    }
}
