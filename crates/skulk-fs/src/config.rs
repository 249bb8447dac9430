//! Open-time configuration for the file-set metadata manager.

use std::fs::File;
use std::io;

/// Sync mode used when persisting metadata documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync file data and metadata (default).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
}

impl SyncMode {
    /// Flushes `file` to durable storage according to the mode.
    pub(crate) fn sync(self, file: &File) -> io::Result<()> {
        match self {
            Self::Fsync => file.sync_all(),
            Self::Fdatasync => file.sync_data(),
        }
    }
}

/// Configuration for opening a shard's file system.
///
/// # Examples
/// ```rust,ignore
/// use alopex_skulk_fs::{FsConfig, SyncMode};
///
/// let config = FsConfig {
///     rollback: true,
///     sync_mode: SyncMode::Fdatasync,
/// };
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsConfig {
    /// Discard an interrupted commit on open instead of replaying it.
    pub rollback: bool,
    /// Sync mode for metadata writes.
    pub sync_mode: SyncMode,
}

impl FsConfig {
    /// Creates a configuration with the given rollback flag and default sync mode.
    pub fn new(rollback: bool) -> Self {
        Self {
            rollback,
            ..Self::default()
        }
    }
}
