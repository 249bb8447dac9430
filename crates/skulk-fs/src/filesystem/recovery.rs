//! Recovery of interrupted edit transactions at open.

use super::current::{CurrentFile, EditKind};
use super::store::{load_fs, remove_if_exists, save_fs, TMP_SUFFIX};
use super::FileSystem;
use crate::error::Result;
use crate::fset::{FileSetCodec, FileSetRegistry};
use std::fs;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// What recovery found in the shard directory and did about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No `current.json` existed; an empty state was created.
    Created,
    /// Clean shutdown; nothing to recover.
    Clean,
    /// An interrupted commit was replayed from `current.c.json`.
    CommitReplayed,
    /// An interrupted commit was discarded because rollback was requested.
    CommitRolledBack,
    /// An interrupted merge was discarded.
    MergeDiscarded,
}

impl<C: FileSetCodec> FileSystem<C> {
    /// Brings the in-memory state in line with the shard directory.
    ///
    /// Running it again on the same directory, without edits in between,
    /// finds a clean shutdown and writes nothing.
    pub(super) fn recover(&self) -> Result<RecoveryOutcome> {
        let current = self.file_path(CurrentFile::Current);
        let commit_log = self.file_path(CurrentFile::Commit);
        let merge_log = self.file_path(CurrentFile::Merge);

        let outcome = if !current.try_exists()? {
            for log in [&commit_log, &merge_log] {
                if remove_if_exists(log)? {
                    warn!(
                        "Removed pending log {} of a shard without {}",
                        log.display(),
                        current.display()
                    );
                }
            }
            let empty = FileSetRegistry::new();
            save_fs(&self.codec, &empty, &current, self.config.sync_mode)?;
            *self.write_committed() = empty;
            RecoveryOutcome::Created
        } else {
            *self.write_committed() = load_fs(&self.codec, &current)?;

            if commit_log.try_exists()? {
                let outcome = if self.config.rollback {
                    self.abort_staged(EditKind::Commit)?;
                    RecoveryOutcome::CommitRolledBack
                } else {
                    *self.lock_pending() = load_fs(&self.codec, &commit_log)?;
                    self.commit_staged(EditKind::Commit)?;
                    RecoveryOutcome::CommitReplayed
                };
                if remove_if_exists(&merge_log)? {
                    warn!(
                        "Removed merge log {} left beside a commit log",
                        merge_log.display()
                    );
                }
                outcome
            } else if merge_log.try_exists()? {
                self.abort_staged(EditKind::Merge)?;
                RecoveryOutcome::MergeDiscarded
            } else {
                RecoveryOutcome::Clean
            }
        };

        self.scan_and_fix()?;
        self.dup_state();
        Ok(outcome)
    }

    /// Repairs what a crash can leave behind and recomputes the edit-id counter.
    ///
    /// - temp files of interrupted document writes are removed
    /// - file sets without files are pruned and `current.json` rewritten
    /// - `neid` restarts at the largest committed cid
    fn scan_and_fix(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_tmp = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("current") && name.ends_with(TMP_SUFFIX));
            if is_tmp {
                warn!("Removing incomplete metadata file {}", path.display());
                remove_if_exists(&path)?;
            }
        }

        let mut committed = self.write_committed();
        let pruned = committed.prune_empty();
        if !pruned.is_empty() {
            warn!("Pruned empty file sets {:?} from committed state", pruned);
            save_fs(
                &self.codec,
                &committed,
                &self.file_path(CurrentFile::Current),
                self.config.sync_mode,
            )?;
        }

        let max_cid = committed.max_cid();
        self.neid.store(max_cid, Ordering::SeqCst);
        debug!("Edit id counter restarts after cid {}", max_cid);
        Ok(())
    }
}
