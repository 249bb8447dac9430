//! Skulk FS - versioned file-set metadata for Skulk time series shards
//!
//! This crate tracks which physical data files make up each time partition
//! of a storage shard, and changes that state transactionally with
//! crash-safe recovery. Durability rests on fsync and atomic rename; there
//! is no separate write-ahead log.
//!
//! # Components
//!
//! - [`FileSystem`]: shard handle with lookups and edit transactions
//! - [`FsEdit`]: a staged edit, finished by commit or abort
//! - [`FileSet`] / [`FileSetRegistry`]: file-set data model
//! - [`FileSetCodec`]: pluggable JSON codec for file sets
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_skulk_fs::{EditKind, FileSystem};
//! use alopex_skulk_fs::fset::{DiskId, FileKind, FileOp, NewFile};
//!
//! let fs = FileSystem::open(shard_dir, false)?;
//!
//! // Stage new files for partition 1738 and make them durable
//! let ops = vec![
//!     FileOp::create(1738, NewFile::new(FileKind::Head, DiskId::default(), 4096)),
//!     FileOp::create(1738, NewFile::new(FileKind::Data, DiskId::default(), 1 << 20)),
//! ];
//! let edit = fs.begin_edit(&ops, EditKind::Commit)?;
//! edit.commit()?;
//!
//! let set = fs.get_file_set(1738).unwrap();
//! assert_eq!(set.len(), 2);
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod filesystem;
pub mod fset;

pub use config::{FsConfig, SyncMode};
pub use error::{FsError, Result};
pub use filesystem::{
    load_fs, save_fs, CurrentFile, EditKind, FileSystem, FsEdit, RecoveryOutcome,
};
pub use fset::{
    Cid, DiskId, FileEntry, FileKind, FileOp, FileOpKind, FileSet, FileSetCodec, FileSetRegistry,
    Fid, JsonFileSetCodec, NewFile,
};
