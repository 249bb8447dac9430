//! Edit transactions: stage, commit, abort.

use super::current::{CurrentFile, EditKind};
use super::gate::GatePermit;
use super::store::{remove_if_exists, save_fs, sync_dir};
use super::{next_edit_id, FileSystem};
use crate::error::{FsError, Result};
use crate::fset::{
    FileOp, FileOpKind, FileSet, FileSetCodec, FileSetRegistry, Fid, JsonFileSetCodec,
};
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// An edit transaction whose candidate state has been staged and persisted
/// to the pending log file.
///
/// The transaction holds the edit gate until it is finished with
/// [`commit`](FsEdit::commit) or [`abort`](FsEdit::abort). Dropping an
/// unfinished edit aborts it.
#[must_use = "an edit is aborted when dropped; call commit() to apply it"]
#[derive(Debug)]
pub struct FsEdit<'a, C: FileSetCodec = JsonFileSetCodec> {
    fs: &'a FileSystem<C>,
    kind: EditKind,
    finished: bool,
    // released after the edit is finished
    _permit: GatePermit<'a>,
}

/// Counts of file sets touched while reconciling committed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CommitStats {
    pub(crate) created: usize,
    pub(crate) removed: usize,
    pub(crate) edited: usize,
}

impl<'a, C: FileSetCodec> FsEdit<'a, C> {
    /// Returns the kind of this edit.
    pub fn kind(&self) -> EditKind {
        self.kind
    }

    /// Returns the staged (not yet committed) file set for `fid`.
    pub fn staged_file_set(&self, fid: Fid) -> Option<Arc<FileSet>> {
        self.fs.lock_pending().find(fid).cloned()
    }

    /// Applies the staged state.
    ///
    /// The rename of the pending log over `current.json` decides the outcome.
    /// Once it succeeded the edit is committed and `Ok` is returned; a failed
    /// directory fsync after that point is only logged.
    ///
    /// # Errors
    ///
    /// `IoError` if the rename fails; the committed state is then unchanged
    /// and the pending log is left for recovery.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let result = self.fs.commit_staged(self.kind);

        match result {
            Ok(stats) => {
                info!(
                    "Committed {:?} edit at {} (created {}, removed {}, edited {})",
                    self.kind,
                    self.fs.dir.display(),
                    stats.created,
                    stats.removed,
                    stats.edited
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "Failed to commit {:?} edit at {}: {}",
                    self.kind,
                    self.fs.dir.display(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Discards the staged state and removes the pending log file.
    ///
    /// # Errors
    ///
    /// `IoError` if the pending log exists but cannot be removed.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        let result = self.fs.abort_staged(self.kind);

        match &result {
            Ok(()) => info!(
                "Aborted {:?} edit at {}",
                self.kind,
                self.fs.dir.display()
            ),
            Err(err) => error!(
                "Failed to abort {:?} edit at {}: {}",
                self.kind,
                self.fs.dir.display(),
                err
            ),
        }
        result
    }
}

impl<C: FileSetCodec> Drop for FsEdit<'_, C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("{:?} edit dropped without commit, aborting", self.kind);
        if let Err(e) = self.fs.abort_staged(self.kind) {
            warn!("Failed to abort dropped edit: {:?}", e);
        }
    }
}

impl<C: FileSetCodec> FileSystem<C> {
    /// Starts an edit transaction, blocking while another one is in flight.
    ///
    /// Every operation is applied to the pending state in order, file sets
    /// left without files are pruned, and the pending state is saved to the
    /// pending log of `kind` (`current.c.json` or `current.m.json`).
    ///
    /// # Errors
    ///
    /// `InvalidEdit` if an operation does not fit its file set,
    /// `EditIdExhausted` if no cid is left for a new file, `IoError` or
    /// `CorruptFormat` if saving fails. On error nothing stays staged and the
    /// gate is released.
    pub fn begin_edit(&self, ops: &[FileOp], kind: EditKind) -> Result<FsEdit<'_, C>> {
        let permit = self.gate.acquire();
        self.start_edit(ops, kind, permit)
    }

    /// Like [`begin_edit`](Self::begin_edit) but fails with `EditInProgress`
    /// instead of waiting for the running transaction.
    pub fn try_begin_edit(&self, ops: &[FileOp], kind: EditKind) -> Result<FsEdit<'_, C>> {
        let permit = self.gate.try_acquire().ok_or(FsError::EditInProgress)?;
        self.start_edit(ops, kind, permit)
    }

    fn start_edit<'a>(
        &'a self,
        ops: &[FileOp],
        kind: EditKind,
        permit: GatePermit<'a>,
    ) -> Result<FsEdit<'a, C>> {
        match self.stage(ops, kind) {
            Ok(()) => {
                info!(
                    "Began {:?} edit at {} ({} ops)",
                    kind,
                    self.dir.display(),
                    ops.len()
                );
                Ok(FsEdit {
                    fs: self,
                    kind,
                    finished: false,
                    _permit: permit,
                })
            }
            Err(err) => {
                error!(
                    "Failed to begin {:?} edit at {}: {}",
                    kind,
                    self.dir.display(),
                    err
                );
                if let Err(e) = remove_if_exists(&self.file_path(kind.log_file())) {
                    warn!("Failed to remove pending log after failed edit: {:?}", e);
                }
                self.dup_state();
                Err(err)
            }
        }
    }

    fn stage(&self, ops: &[FileOp], kind: EditKind) -> Result<()> {
        // staging always starts from the committed state
        self.dup_state();
        let mut pending = self.lock_pending();
        apply_ops(&mut pending, ops, &self.neid)?;

        let pruned = pending.prune_empty();
        if !pruned.is_empty() {
            debug!("Pruned empty file sets {:?} from pending state", pruned);
        }

        save_fs(
            &self.codec,
            &pending,
            &self.file_path(kind.log_file()),
            self.config.sync_mode,
        )
    }

    /// Renames the pending log over `current.json` and reconciles the
    /// committed registry with the pending one.
    pub(super) fn commit_staged(&self, kind: EditKind) -> Result<CommitStats> {
        self.commit_staged_with(kind, sync_dir)
    }

    /// [`commit_staged`](Self::commit_staged) with the directory fsync step
    /// supplied by the caller.
    fn commit_staged_with(
        &self,
        kind: EditKind,
        sync_dir: impl FnOnce(&Path) -> io::Result<()>,
    ) -> Result<CommitStats> {
        let pending = self.lock_pending();
        let log = self.file_path(kind.log_file());
        let current = self.file_path(CurrentFile::Current);

        if let Err(err) = fs::rename(&log, &current) {
            drop(pending);
            self.dup_state();
            return Err(err.into());
        }
        if let Err(err) = sync_dir(&self.dir) {
            // the rename is done; the edit counts as committed either way
            error!(
                "Failed to fsync {} after renaming {} over {}: {}",
                self.dir.display(),
                log.display(),
                current.display(),
                err
            );
        }

        let reconciled = apply_commit(&mut self.write_committed(), &pending);
        drop(pending);
        match reconciled {
            Ok(stats) => {
                debug!("Reconciled committed state: {:?}", stats);
                Ok(stats)
            }
            Err(err) => {
                // current.json already holds the new state; a reopen replays it
                error!(
                    "Committed state at {} diverged from {} after rename: {}",
                    self.dir.display(),
                    current.display(),
                    err
                );
                self.dup_state();
                Err(err)
            }
        }
    }

    /// Removes the pending log of `kind` and resets the pending state.
    pub(super) fn abort_staged(&self, kind: EditKind) -> Result<()> {
        let removed = remove_if_exists(&self.file_path(kind.log_file()));
        self.dup_state();
        removed?;
        Ok(())
    }
}

/// Applies `ops` to `registry`, creating file sets for unseen fids.
fn apply_ops(registry: &mut FileSetRegistry, ops: &[FileOp], neid: &AtomicU64) -> Result<()> {
    let mut alloc_cid = || next_edit_id(neid);
    let mut current: Option<(Fid, usize)> = None;

    for op in ops {
        let pos = match current {
            Some((fid, pos)) if fid == op.fid => pos,
            _ => {
                let pos = registry.find_or_create(op.fid)?;
                current = Some((op.fid, pos));
                pos
            }
        };

        if let FileOpKind::Add(file) = &op.kind {
            // caller-allocated ids must never be handed out again
            neid.fetch_max(file.cid, atomic::Ordering::SeqCst);
        }
        registry.make_mut(pos).apply(&op.kind, &mut alloc_cid)?;
    }
    Ok(())
}

enum Step {
    Drop,
    Create(Arc<FileSet>),
    Edit(Arc<FileSet>),
    Keep,
}

/// Reconciles `committed` with `pending` in one sorted-merge pass over fids.
///
/// - fid only in `committed`: the file set was dropped
/// - fid only in `pending`: a new file set is inserted
/// - fid in both: the committed file set is edited in place
///
/// File sets that are shared with `pending` are left untouched, so readers
/// holding them keep the same `Arc`.
fn apply_commit(committed: &mut FileSetRegistry, pending: &FileSetRegistry) -> Result<CommitStats> {
    let mut stats = CommitStats::default();
    let (mut i, mut j) = (0, 0);

    loop {
        let step = match (committed.get(i), pending.get(j)) {
            (Some(ours), Some(theirs)) => match ours.fid().cmp(&theirs.fid()) {
                Ordering::Less => Step::Drop,
                Ordering::Greater => Step::Create(Arc::clone(theirs)),
                Ordering::Equal if Arc::ptr_eq(ours, theirs) => Step::Keep,
                Ordering::Equal => Step::Edit(Arc::clone(theirs)),
            },
            (Some(_), None) => Step::Drop,
            (None, Some(theirs)) => Step::Create(Arc::clone(theirs)),
            (None, None) => break,
        };

        match step {
            Step::Drop => {
                committed.remove_at(i);
                stats.removed += 1;
            }
            Step::Create(set) => {
                committed.insert_sorted(set)?;
                stats.created += 1;
                i += 1;
                j += 1;
            }
            Step::Edit(set) => {
                if !committed.make_mut(i).sync_from(&set).is_empty() {
                    stats.edited += 1;
                }
                i += 1;
                j += 1;
            }
            Step::Keep => {
                i += 1;
                j += 1;
            }
        }
    }

    Ok(stats)
}
