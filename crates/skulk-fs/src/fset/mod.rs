//! File-set data model.
//!
//! A [`FileSet`] describes the physical data files that make up one time
//! partition (identified by its [`Fid`]) at a point in time. File sets are
//! only ever changed through [`FileOp`]s staged by an edit transaction.
//!
//! # Components
//!
//! - [`FileEntry`]: one physical file (kind, disk locator, creation id)
//! - [`FileSet`]: the sorted file entries of one partition
//! - [`FileOp`]: a single add/create/remove/replace instruction for a partition
//! - [`FileSetRegistry`]: fid-sorted collection of file sets
//! - [`FileSetCodec`]: pluggable JSON codec for a single file set

pub mod codec;
pub mod registry;

pub use codec::{FileSetCodec, JsonFileSetCodec};
pub use registry::FileSetRegistry;

use crate::error::{FsError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Partition identifier. File sets are ordered by ascending fid.
pub type Fid = i32;

/// Creation identifier of a file entry, drawn from the edit-id counter.
pub type Cid = u64;

/// Role of a physical file inside a file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Block index (head) file.
    Head,
    /// Data block file.
    Data,
    /// Per-block statistics file.
    Stat,
    /// Delta file holding recent, not yet merged rows.
    Delta,
}

/// Storage tier locator of a file: `(level, id)` of the disk it lives on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DiskId {
    /// Storage tier level.
    pub level: i32,
    /// Disk index within the tier.
    pub id: i32,
}

impl DiskId {
    /// Creates a disk locator.
    pub fn new(level: i32, id: i32) -> Self {
        Self { level, id }
    }
}

/// A single physical file referenced by a file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// Role of the file.
    #[serde(rename = "type")]
    pub kind: FileKind,
    /// Disk the file lives on.
    pub did: DiskId,
    /// Creation id.
    pub cid: Cid,
    /// File size in bytes.
    pub size: u64,
}

impl FileEntry {
    /// Creates a file entry.
    pub fn new(kind: FileKind, did: DiskId, cid: Cid, size: u64) -> Self {
        Self {
            kind,
            did,
            cid,
            size,
        }
    }

    /// Returns true if both entries name the same physical file.
    ///
    /// Kind, disk locator and creation id must match; size is ignored.
    pub fn is_same_file(&self, other: &FileEntry) -> bool {
        self.identity() == other.identity()
    }

    fn identity(&self) -> (FileKind, DiskId, Cid) {
        (self.kind, self.did, self.cid)
    }

    fn cmp_identity(&self, other: &FileEntry) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

/// A file to be created by an edit; its cid is assigned while the edit is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewFile {
    /// Role of the file.
    pub kind: FileKind,
    /// Disk the file lives on.
    pub did: DiskId,
    /// File size in bytes.
    pub size: u64,
}

impl NewFile {
    /// Creates a new-file description.
    pub fn new(kind: FileKind, did: DiskId, size: u64) -> Self {
        Self { kind, did, size }
    }

    fn into_entry(self, cid: Cid) -> FileEntry {
        FileEntry::new(self.kind, self.did, cid, self.size)
    }
}

/// What an edit operation does to its file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOpKind {
    /// Add a file whose cid was allocated by the caller.
    Add(FileEntry),
    /// Add a new file, drawing its cid from the edit-id counter.
    Create(NewFile),
    /// Remove an existing file.
    Remove(FileEntry),
    /// Replace an existing file with a new one drawing a fresh cid.
    Replace {
        /// File being replaced.
        old: FileEntry,
        /// Replacement file.
        new: NewFile,
    },
}

/// A single edit instruction targeting the file set of `fid`.
///
/// # Examples
/// ```rust,ignore
/// use alopex_skulk_fs::fset::{DiskId, FileKind, FileOp, NewFile};
///
/// let ops = vec![
///     FileOp::create(1, NewFile::new(FileKind::Head, DiskId::default(), 4096)),
///     FileOp::create(1, NewFile::new(FileKind::Data, DiskId::default(), 1 << 20)),
/// ];
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOp {
    /// Target partition.
    pub fid: Fid,
    /// Operation to apply.
    pub kind: FileOpKind,
}

impl FileOp {
    /// Adds a file with a caller-allocated cid.
    pub fn add(fid: Fid, file: FileEntry) -> Self {
        Self {
            fid,
            kind: FileOpKind::Add(file),
        }
    }

    /// Creates a new file, assigning its cid during staging.
    pub fn create(fid: Fid, file: NewFile) -> Self {
        Self {
            fid,
            kind: FileOpKind::Create(file),
        }
    }

    /// Removes a file.
    pub fn remove(fid: Fid, file: FileEntry) -> Self {
        Self {
            fid,
            kind: FileOpKind::Remove(file),
        }
    }

    /// Replaces `old` with a newly created file.
    pub fn replace(fid: Fid, old: FileEntry, new: NewFile) -> Self {
        Self {
            fid,
            kind: FileOpKind::Replace { old, new },
        }
    }
}

/// Counts of file entries changed by [`FileSet::sync_from`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileSetDiff {
    /// Entries present only in the target.
    pub added: usize,
    /// Entries present only in the set being edited.
    pub removed: usize,
}

impl FileSetDiff {
    /// Returns true if no entry changed.
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// The files that make up one partition, sorted by (kind, disk, cid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FileSetDoc")]
pub struct FileSet {
    fid: Fid,
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct FileSetDoc {
    fid: Fid,
    files: Vec<FileEntry>,
}

impl TryFrom<FileSetDoc> for FileSet {
    type Error = String;

    fn try_from(doc: FileSetDoc) -> std::result::Result<Self, String> {
        let FileSetDoc { fid, mut files } = doc;
        sort_files(fid, &mut files)?;
        Ok(Self { fid, files })
    }
}

fn sort_files(fid: Fid, files: &mut [FileEntry]) -> std::result::Result<(), String> {
    files.sort_by(FileEntry::cmp_identity);
    match files.windows(2).find(|w| w[0].is_same_file(&w[1])) {
        Some(pair) => Err(format!(
            "fid {} lists file {:?} cid {} twice",
            fid, pair[0].kind, pair[0].cid
        )),
        None => Ok(()),
    }
}

impl FileSet {
    /// Creates an empty file set.
    pub fn new(fid: Fid) -> Self {
        Self {
            fid,
            files: Vec::new(),
        }
    }

    /// Builds a file set from entries in any order.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if the same file appears twice.
    pub fn from_files(fid: Fid, mut files: Vec<FileEntry>) -> Result<Self> {
        sort_files(fid, &mut files).map_err(FsError::CorruptFormat)?;
        Ok(Self { fid, files })
    }

    /// Returns the partition id.
    pub fn fid(&self) -> Fid {
        self.fid
    }

    /// Returns the file entries in (kind, disk, cid) order.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Returns the files of one kind.
    pub fn files_of(&self, kind: FileKind) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(move |file| file.kind == kind)
    }

    /// Returns the number of file entries.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if the file set references no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Returns true if `file` is part of this set.
    pub fn contains(&self, file: &FileEntry) -> bool {
        self.search(file).is_ok()
    }

    /// Returns the largest cid among the entries, or 0 when empty.
    pub fn max_cid(&self) -> Cid {
        self.files.iter().map(|file| file.cid).max().unwrap_or(0)
    }

    fn search(&self, file: &FileEntry) -> std::result::Result<usize, usize> {
        self.files.binary_search_by(|probe| probe.cmp_identity(file))
    }

    fn insert(&mut self, file: FileEntry) -> Result<()> {
        match self.search(&file) {
            Ok(_) => Err(FsError::InvalidEdit {
                fid: self.fid,
                reason: format!("file {:?} cid {} already present", file.kind, file.cid),
            }),
            Err(pos) => {
                self.files
                    .try_reserve(1)
                    .map_err(|_| FsError::OutOfMemory)?;
                self.files.insert(pos, file);
                Ok(())
            }
        }
    }

    fn remove(&mut self, file: &FileEntry) -> Result<FileEntry> {
        match self.search(file) {
            Ok(pos) => Ok(self.files.remove(pos)),
            Err(_) => Err(FsError::InvalidEdit {
                fid: self.fid,
                reason: format!("file {:?} cid {} not present", file.kind, file.cid),
            }),
        }
    }

    /// Applies one edit operation. `alloc_cid` is called once for every file
    /// the operation creates.
    pub(crate) fn apply(
        &mut self,
        op: &FileOpKind,
        alloc_cid: &mut dyn FnMut() -> Result<Cid>,
    ) -> Result<()> {
        match op {
            FileOpKind::Add(file) => self.insert(*file),
            FileOpKind::Create(new) => self.insert(new.into_entry(alloc_cid()?)),
            FileOpKind::Remove(file) => self.remove(file).map(|_| ()),
            FileOpKind::Replace { old, new } => {
                self.remove(old)?;
                self.insert(new.into_entry(alloc_cid()?))
            }
        }
    }

    /// Edits this set in place so that its entries equal `target`'s.
    ///
    /// Both entry lists are sorted, so this is a single merge walk.
    pub(crate) fn sync_from(&mut self, target: &FileSet) -> FileSetDiff {
        debug_assert_eq!(self.fid, target.fid);
        let mut diff = FileSetDiff::default();
        if self.files == target.files {
            return diff;
        }

        let mut merged = Vec::with_capacity(target.files.len());
        let (mut i, mut j) = (0, 0);
        loop {
            match (self.files.get(i), target.files.get(j)) {
                (Some(ours), Some(theirs)) => match ours.cmp_identity(theirs) {
                    Ordering::Less => {
                        diff.removed += 1;
                        i += 1;
                    }
                    Ordering::Greater => {
                        diff.added += 1;
                        merged.push(*theirs);
                        j += 1;
                    }
                    Ordering::Equal => {
                        // same file; size comes from the target
                        merged.push(*theirs);
                        i += 1;
                        j += 1;
                    }
                },
                (Some(_), None) => {
                    diff.removed += 1;
                    i += 1;
                }
                (None, Some(theirs)) => {
                    diff.added += 1;
                    merged.push(*theirs);
                    j += 1;
                }
                (None, None) => break,
            }
        }
        self.files = merged;
        diff
    }
}
