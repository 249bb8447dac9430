//! Error and Result types for Skulk file-set metadata operations.

use crate::fset::Fid;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for file system metadata operations.
pub type Result<T> = std::result::Result<T, FsError>;

/// The error type for file-set metadata operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Allocation failed while building in-memory state or a serialization buffer.
    #[error("Out of memory")]
    OutOfMemory,

    /// Underlying I/O error (open, read, write, fsync, rename or remove).
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Metadata document is malformed, has the wrong format version, or a
    /// file set failed to decode.
    #[error("Corrupt format: {0}")]
    CorruptFormat(String),

    /// A file set with this fid is already present in the registry.
    #[error("Duplicate file set: fid {0}")]
    DuplicateKey(Fid),

    /// Another edit transaction currently holds the edit gate.
    #[error("Edit already in progress")]
    EditInProgress,

    /// The edit-id counter reached `u64::MAX`; no further cid can be issued.
    #[error("Edit id space exhausted")]
    EditIdExhausted,

    /// An edit operation cannot be applied to its file set.
    #[error("Invalid edit on fid {fid}: {reason}")]
    InvalidEdit {
        /// Target file set.
        fid: Fid,
        /// What was wrong with the operation.
        reason: String,
    },
}

impl FsError {
    /// Builds a `CorruptFormat` error from anything printable.
    pub(crate) fn corrupt(reason: impl std::fmt::Display) -> Self {
        Self::CorruptFormat(reason.to_string())
    }
}
