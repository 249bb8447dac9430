//! Versioned file-set metadata of a storage shard.
//!
//! The [`FileSystem`] tracks which physical files make up each time
//! partition of a shard and lets that state change transactionally.
//!
//! # Architecture
//!
//! Two registries are kept in memory:
//!
//! - `committed`: the durable state that lookups read
//! - `pending`: the candidate state an edit transaction stages into
//!
//! ```text
//! begin_edit → apply ops to pending → save current.{c,m}.json → fsync
//! commit     → rename current.{c,m}.json over current.json → reconcile committed
//! abort      → remove current.{c,m}.json → reset pending
//! ```
//!
//! The rename is the durability point of a transaction. Whatever state the
//! process dies in, [`FileSystem::open`] finds out from the files present in
//! the shard directory and either replays or rolls back the transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_skulk_fs::{EditKind, FileSystem};
//! use alopex_skulk_fs::fset::{DiskId, FileKind, FileOp, NewFile};
//!
//! let fs = FileSystem::open("/data/vnode2/tsdb", false)?;
//!
//! let ops = vec![FileOp::create(1, NewFile::new(FileKind::Data, DiskId::default(), 4096))];
//! let edit = fs.begin_edit(&ops, EditKind::Commit)?;
//! edit.commit()?;
//!
//! let set = fs.get_file_set(1).unwrap();
//! ```

mod current;
mod edit;
mod gate;
mod recovery;
mod store;

pub use current::{CurrentFile, EditKind};
pub use edit::FsEdit;
pub use recovery::RecoveryOutcome;
pub use store::{load_fs, save_fs, FORMAT_VERSION};

use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::fset::{Cid, FileSet, FileSetCodec, FileSetRegistry, Fid, JsonFileSetCodec};
use gate::EditGate;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info};

/// Handle to the file-set metadata of one shard.
///
/// Lookups may run from any number of threads concurrently with each other
/// and with a staged edit. Edit transactions are serialized: at most one
/// [`FsEdit`] exists at a time.
#[derive(Debug)]
pub struct FileSystem<C: FileSetCodec = JsonFileSetCodec> {
    dir: PathBuf,
    config: FsConfig,
    codec: C,
    committed: RwLock<FileSetRegistry>,
    pending: Mutex<FileSetRegistry>,
    /// Last edit id handed out.
    neid: AtomicU64,
    gate: EditGate,
    recovery: RecoveryOutcome,
}

impl FileSystem<JsonFileSetCodec> {
    /// Opens the shard metadata in `dir`, recovering any interrupted edit.
    ///
    /// With `rollback` set, an interrupted commit is discarded instead of
    /// replayed. An interrupted merge is always discarded.
    ///
    /// # Errors
    ///
    /// Any I/O or format error aborts the open; the shard is not usable.
    pub fn open(dir: impl AsRef<Path>, rollback: bool) -> Result<Self> {
        Self::open_with_config(dir, FsConfig::new(rollback))
    }

    /// Opens the shard metadata with an explicit configuration.
    pub fn open_with_config(dir: impl AsRef<Path>, config: FsConfig) -> Result<Self> {
        FileSystem::open_with_codec(dir, config, JsonFileSetCodec)
    }
}

impl<C: FileSetCodec> FileSystem<C> {
    /// Opens the shard metadata using a custom file-set codec.
    pub fn open_with_codec(dir: impl AsRef<Path>, config: FsConfig, codec: C) -> Result<Self> {
        let mut this = Self {
            dir: dir.as_ref().to_path_buf(),
            config,
            codec,
            committed: RwLock::new(FileSetRegistry::new()),
            pending: Mutex::new(FileSetRegistry::new()),
            neid: AtomicU64::new(0),
            gate: EditGate::default(),
            recovery: RecoveryOutcome::Clean,
        };

        let result = fs::create_dir_all(&this.dir)
            .map_err(FsError::from)
            .and_then(|()| this.recover());
        match result {
            Ok(outcome) => {
                this.recovery = outcome;
                info!(
                    "Opened file system at {} (recovery {:?}, {} file sets, neid {})",
                    this.dir.display(),
                    outcome,
                    this.read_committed().len(),
                    this.last_edit_id()
                );
                Ok(this)
            }
            Err(err) => {
                error!("Failed to open file system at {}: {}", this.dir.display(), err);
                Err(err)
            }
        }
    }

    /// Releases the in-memory state.
    pub fn close(self) {
        info!("Closed file system at {}", self.dir.display());
    }

    /// Returns the shard directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the configuration the file system was opened with.
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Returns the path of one of the shard's metadata documents.
    pub fn file_path(&self, file: CurrentFile) -> PathBuf {
        file.path(&self.dir)
    }

    /// Returns what recovery did when the file system was opened.
    pub fn recovery_outcome(&self) -> RecoveryOutcome {
        self.recovery
    }

    /// Allocates the next edit id.
    ///
    /// Ids are monotonic for the life of the handle and resume above the
    /// largest persisted cid after a restart.
    ///
    /// # Errors
    ///
    /// `EditIdExhausted` once `u64::MAX` has been handed out or committed.
    pub fn alloc_edit_id(&self) -> Result<Cid> {
        next_edit_id(&self.neid)
    }

    /// Returns the most recently allocated edit id.
    pub fn last_edit_id(&self) -> Cid {
        self.neid.load(Ordering::SeqCst)
    }

    /// Returns the committed file set for `fid`.
    pub fn get_file_set(&self, fid: Fid) -> Option<Arc<FileSet>> {
        self.read_committed().find(fid).cloned()
    }

    /// Returns a copy of the committed registry.
    pub fn snapshot(&self) -> FileSetRegistry {
        self.read_committed().clone()
    }

    /// Returns true while an edit transaction is in flight.
    pub fn is_editing(&self) -> bool {
        self.gate.is_held()
    }

    fn read_committed(&self) -> RwLockReadGuard<'_, FileSetRegistry> {
        self.committed.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write_committed(&self) -> RwLockWriteGuard<'_, FileSetRegistry> {
        self.committed.write().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_pending(&self) -> MutexGuard<'_, FileSetRegistry> {
        self.pending.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Makes `pending` an equal snapshot of `committed`.
    fn dup_state(&self) {
        let committed = self.read_committed().clone();
        *self.lock_pending() = committed;
    }
}

/// Advances `neid` by one and returns the new value, never wrapping.
fn next_edit_id(neid: &AtomicU64) -> Result<Cid> {
    neid.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
        .map(|last| last + 1)
        .map_err(|_| FsError::EditIdExhausted)
}
