//! Integration tests for edit transactions on a shard file system.
//!
//! These tests verify:
//! - begin/commit and begin/abort cycles
//! - reconciliation of committed state (drop, create, edit)
//! - mutual exclusion of edits and lock-free lookups

use alopex_skulk_fs::{
    CurrentFile, DiskId, EditKind, FileEntry, FileKind, FileOp, FileSet, FileSetCodec, FileSystem,
    FsConfig, FsError, JsonFileSetCodec, NewFile, Result,
};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn data(size: u64) -> NewFile {
    NewFile::new(FileKind::Data, DiskId::default(), size)
}

fn head(size: u64) -> NewFile {
    NewFile::new(FileKind::Head, DiskId::default(), size)
}

/// Commits one data file for each fid.
fn commit_partitions(fs: &FileSystem, fids: &[i32]) {
    let ops: Vec<FileOp> = fids.iter().map(|&fid| FileOp::create(fid, data(1024))).collect();
    fs.begin_edit(&ops, EditKind::Commit).unwrap().commit().unwrap();
}

fn only_file(fs: &FileSystem, fid: i32) -> FileEntry {
    let set = fs.get_file_set(fid).unwrap();
    assert_eq!(set.len(), 1);
    set.files()[0]
}

#[test]
fn test_commit_makes_files_visible() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();
    assert!(fs.snapshot().is_empty());

    let ops = vec![FileOp::create(7, head(64)), FileOp::create(7, data(4096))];
    let edit = fs.begin_edit(&ops, EditKind::Commit).unwrap();

    // staged, not yet committed
    assert!(fs.get_file_set(7).is_none());
    assert_eq!(edit.staged_file_set(7).unwrap().len(), 2);
    assert!(fs.file_path(CurrentFile::Commit).exists());

    edit.commit().unwrap();

    let set = fs.get_file_set(7).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.files_of(FileKind::Head).next().unwrap().cid, 1);
    assert_eq!(set.files_of(FileKind::Data).next().unwrap().cid, 2);
    assert_eq!(fs.last_edit_id(), 2);
    assert!(!fs.file_path(CurrentFile::Commit).exists());
    assert!(!fs.is_editing());
}

#[test]
fn test_merge_edit_uses_merge_log() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();
    commit_partitions(&fs, &[1]);

    let old = only_file(&fs, 1);
    let ops = vec![FileOp::replace(1, old, data(2048))];
    let edit = fs.begin_edit(&ops, EditKind::Merge).unwrap();
    assert!(fs.file_path(CurrentFile::Merge).exists());
    assert!(!fs.file_path(CurrentFile::Commit).exists());
    edit.commit().unwrap();

    let merged = only_file(&fs, 1);
    assert!(!merged.is_same_file(&old));
    assert_eq!(merged.size, 2048);
    assert!(merged.cid > old.cid);
    assert!(!fs.file_path(CurrentFile::Merge).exists());
}

#[test]
fn test_commit_reconciles_dropped_new_and_edited_partitions() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();
    commit_partitions(&fs, &[1, 2, 3]);

    let before_2 = fs.get_file_set(2).unwrap();
    let before_3 = fs.get_file_set(3).unwrap();
    let file_1 = only_file(&fs, 1);

    let ops = vec![
        FileOp::remove(1, file_1),
        FileOp::create(2, head(16)),
        FileOp::create(4, data(512)),
    ];
    fs.begin_edit(&ops, EditKind::Commit).unwrap().commit().unwrap();

    assert_eq!(fs.snapshot().fids(), vec![2, 3, 4]);
    assert!(fs.get_file_set(1).is_none());

    // untouched partition keeps its identity
    assert!(Arc::ptr_eq(&fs.get_file_set(3).unwrap(), &before_3));
    // edited partition changed, while the old snapshot stays readable
    let after_2 = fs.get_file_set(2).unwrap();
    assert_eq!(after_2.len(), 2);
    assert_eq!(before_2.len(), 1);
}

#[test]
fn test_removing_last_file_prunes_partition() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();
    commit_partitions(&fs, &[10, 11]);

    let ops = vec![FileOp::remove(10, only_file(&fs, 10))];
    let edit = fs.begin_edit(&ops, EditKind::Merge).unwrap();
    assert!(edit.staged_file_set(10).is_none());
    edit.commit().unwrap();

    assert_eq!(fs.snapshot().fids(), vec![11]);
    let reopened = FileSystem::open(temp_dir.path(), false).unwrap();
    assert_eq!(reopened.snapshot().fids(), vec![11]);
}

#[test]
fn test_abort_leaves_state_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();
    commit_partitions(&fs, &[1, 2]);
    let before = fs.snapshot();
    let current_bytes = std::fs::read(fs.file_path(CurrentFile::Current)).unwrap();

    for kind in [EditKind::Commit, EditKind::Merge] {
        let ops = vec![FileOp::create(3, data(1)), FileOp::create(1, head(1))];
        let edit = fs.begin_edit(&ops, kind).unwrap();
        assert!(fs.file_path(kind.log_file()).exists());
        edit.abort().unwrap();

        assert_eq!(fs.snapshot(), before);
        assert!(!fs.file_path(CurrentFile::Commit).exists());
        assert!(!fs.file_path(CurrentFile::Merge).exists());
    }
    assert_eq!(
        std::fs::read(fs.file_path(CurrentFile::Current)).unwrap(),
        current_bytes
    );

    // aborted changes do not leak into the next edit
    commit_partitions(&fs, &[5]);
    assert_eq!(fs.snapshot().fids(), vec![1, 2, 5]);
    assert_eq!(fs.get_file_set(1).unwrap().len(), 1);
}

#[test]
fn test_dropped_edit_aborts() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();

    {
        let _edit = fs
            .begin_edit(&[FileOp::create(1, data(1))], EditKind::Commit)
            .unwrap();
        assert!(fs.is_editing());
    }

    assert!(!fs.is_editing());
    assert!(fs.snapshot().is_empty());
    assert!(!fs.file_path(CurrentFile::Commit).exists());
}

#[test]
fn test_invalid_edit_releases_gate() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();
    commit_partitions(&fs, &[1]);

    let missing = FileEntry::new(FileKind::Stat, DiskId::default(), 99, 0);
    let ops = vec![FileOp::create(2, data(1)), FileOp::remove(1, missing)];
    let err = fs.begin_edit(&ops, EditKind::Commit).unwrap_err();
    assert!(matches!(err, FsError::InvalidEdit { fid: 1, .. }));

    assert!(!fs.is_editing());
    assert!(!fs.file_path(CurrentFile::Commit).exists());

    // partially applied ops were discarded with the failed edit
    commit_partitions(&fs, &[3]);
    assert_eq!(fs.snapshot().fids(), vec![1, 3]);
}

#[test]
fn test_try_begin_edit_reports_edit_in_progress() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();

    let edit = fs
        .try_begin_edit(&[FileOp::create(1, data(1))], EditKind::Commit)
        .unwrap();
    let err = fs
        .try_begin_edit(&[FileOp::create(2, data(1))], EditKind::Merge)
        .unwrap_err();
    assert!(matches!(err, FsError::EditInProgress));
    // the rejected edit must not clobber the staged one
    assert!(!fs.file_path(CurrentFile::Merge).exists());

    edit.commit().unwrap();
    fs.try_begin_edit(&[FileOp::create(2, data(1))], EditKind::Merge)
        .unwrap()
        .commit()
        .unwrap();
    assert_eq!(fs.snapshot().fids(), vec![1, 2]);
}

#[test]
fn test_second_begin_edit_blocks_until_commit() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();
    let second_started = AtomicBool::new(false);

    let first = fs
        .begin_edit(&[FileOp::create(1, data(1))], EditKind::Commit)
        .unwrap();

    let (tx, rx) = mpsc::channel();
    thread::scope(|s| {
        s.spawn(|| {
            let edit = fs
                .begin_edit(&[FileOp::create(2, data(1))], EditKind::Commit)
                .unwrap();
            second_started.store(true, Ordering::SeqCst);
            // first edit is already committed when the second one stages
            tx.send(edit.staged_file_set(1).is_some()).unwrap();
            edit.commit().unwrap();
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!second_started.load(Ordering::SeqCst));
        first.commit().unwrap();

        assert!(rx.recv().unwrap());
    });

    assert_eq!(fs.snapshot().fids(), vec![1, 2]);
}

#[test]
fn test_lookups_run_during_staged_edit() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();
    commit_partitions(&fs, &[1]);

    let edit = fs
        .begin_edit(
            &[FileOp::remove(1, only_file(&fs, 1)), FileOp::create(2, data(1))],
            EditKind::Commit,
        )
        .unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                assert!(fs.get_file_set(1).is_some());
                assert!(fs.get_file_set(2).is_none());
            });
        }
    });

    edit.commit().unwrap();
    assert!(fs.get_file_set(1).is_none());
    assert!(fs.get_file_set(2).is_some());
}

#[test]
fn test_alloc_edit_id_feeds_add_ops() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();

    let cid = fs.alloc_edit_id().unwrap();
    assert_eq!(cid, 1);
    let file = FileEntry::new(FileKind::Data, DiskId::new(1, 0), cid, 777);
    let ops = vec![FileOp::add(5, file), FileOp::create(5, head(8))];
    fs.begin_edit(&ops, EditKind::Commit).unwrap().commit().unwrap();

    let set = fs.get_file_set(5).unwrap();
    assert!(set.contains(&file));
    assert_eq!(set.files_of(FileKind::Head).next().unwrap().cid, 2);
    assert_eq!(fs.alloc_edit_id().unwrap(), 3);
}

#[test]
fn test_concurrent_edits_from_many_threads() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();

    thread::scope(|s| {
        for fid in 0..8 {
            let fs = &fs;
            s.spawn(move || {
                let ops = vec![FileOp::create(fid, data(fid as u64))];
                fs.begin_edit(&ops, EditKind::Commit).unwrap().commit().unwrap();
            });
        }
    });

    assert_eq!(fs.snapshot().fids(), (0..8).collect::<Vec<_>>());
    assert_eq!(fs.last_edit_id(), 8);

    let reopened = FileSystem::open(temp_dir.path(), false).unwrap();
    assert_eq!(reopened.snapshot(), fs.snapshot());
}

#[test]
fn test_add_at_max_cid_rejects_new_ids() {
    let temp_dir = TempDir::new().unwrap();
    let fs = FileSystem::open(temp_dir.path(), false).unwrap();

    let last = FileEntry::new(FileKind::Data, DiskId::default(), u64::MAX, 1);
    let ops = vec![FileOp::add(1, last), FileOp::create(1, head(1))];
    let err = fs.begin_edit(&ops, EditKind::Commit).unwrap_err();
    assert!(matches!(err, FsError::EditIdExhausted));

    assert!(!fs.is_editing());
    assert!(fs.snapshot().is_empty());
    assert!(!fs.file_path(CurrentFile::Commit).exists());
    // the caller-supplied cid stays reserved
    assert!(fs.alloc_edit_id().is_err());
}

/// Codec that panics while encoding one particular partition.
#[derive(Debug, Default)]
struct PanickingCodec;

const PANIC_FID: i32 = 13;

impl FileSetCodec for PanickingCodec {
    fn encode(&self, set: &FileSet) -> Result<Value> {
        assert_ne!(set.fid(), PANIC_FID, "cannot encode fid {}", PANIC_FID);
        JsonFileSetCodec.encode(set)
    }

    fn decode(&self, value: &Value) -> Result<FileSet> {
        JsonFileSetCodec.decode(value)
    }
}

#[test]
fn test_panic_while_staging_releases_gate() {
    let temp_dir = TempDir::new().unwrap();
    let fs =
        FileSystem::open_with_codec(temp_dir.path(), FsConfig::default(), PanickingCodec).unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        fs.begin_edit(&[FileOp::create(PANIC_FID, data(1))], EditKind::Commit)
    }));
    assert!(result.is_err());
    assert!(!fs.is_editing());

    // the next edit neither blocks nor sees the abandoned ops
    fs.try_begin_edit(&[FileOp::create(2, data(1))], EditKind::Commit)
        .unwrap()
        .commit()
        .unwrap();
    assert_eq!(fs.snapshot().fids(), vec![2]);
}
