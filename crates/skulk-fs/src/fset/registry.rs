//! Fid-sorted registry of file sets.
//!
//! File sets are held as `Arc<FileSet>` so that the committed state, the
//! pending state and readers can share unchanged descriptors. Mutable access
//! goes through [`Arc::make_mut`], which copies a descriptor only when it is
//! shared.

use super::{Cid, FileSet, Fid};
use crate::error::{FsError, Result};
use std::sync::Arc;

/// An ordered collection of file sets, unique and ascending by fid.
///
/// # Examples
/// ```rust,ignore
/// use alopex_skulk_fs::fset::{FileSet, FileSetRegistry};
///
/// let mut registry = FileSetRegistry::new();
/// registry.insert_sorted(FileSet::new(2))?;
/// registry.insert_sorted(FileSet::new(1))?;
/// assert_eq!(registry.fids(), vec![1, 2]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSetRegistry {
    sets: Vec<Arc<FileSet>>,
}

impl FileSetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from file sets that must already be strictly
    /// ascending by fid.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if the fids are unsorted or repeated.
    pub fn from_sorted(sets: Vec<FileSet>) -> Result<Self> {
        if let Some(pair) = sets.windows(2).find(|w| w[0].fid() >= w[1].fid()) {
            return Err(FsError::corrupt(format!(
                "file set fid {} listed after fid {}",
                pair[1].fid(),
                pair[0].fid()
            )));
        }
        Ok(Self {
            sets: sets.into_iter().map(Arc::new).collect(),
        })
    }

    /// Returns the number of file sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Returns true if the registry holds no file sets.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Iterates file sets in ascending fid order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<FileSet>> {
        self.sets.iter()
    }

    /// Returns all fids in ascending order.
    pub fn fids(&self) -> Vec<Fid> {
        self.sets.iter().map(|set| set.fid()).collect()
    }

    /// Finds the file set with exactly this fid.
    pub fn find(&self, fid: Fid) -> Option<&Arc<FileSet>> {
        self.search(fid).ok().map(|pos| &self.sets[pos])
    }

    /// Inserts a file set at its sorted position and returns that position.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if the fid is already present.
    pub fn insert_sorted(&mut self, set: impl Into<Arc<FileSet>>) -> Result<usize> {
        let set = set.into();
        match self.search(set.fid()) {
            Ok(_) => Err(FsError::DuplicateKey(set.fid())),
            Err(pos) => {
                self.sets.try_reserve(1).map_err(|_| FsError::OutOfMemory)?;
                self.sets.insert(pos, set);
                Ok(pos)
            }
        }
    }

    /// Removes and returns the file set with this fid.
    pub fn remove(&mut self, fid: Fid) -> Option<Arc<FileSet>> {
        self.search(fid).ok().map(|pos| self.sets.remove(pos))
    }

    /// Releases all file sets.
    pub fn clear(&mut self) {
        self.sets.clear();
    }

    /// Removes every file set that references no files and returns their fids.
    pub fn prune_empty(&mut self) -> Vec<Fid> {
        let mut pruned = Vec::new();
        self.sets.retain(|set| {
            if set.is_empty() {
                pruned.push(set.fid());
                false
            } else {
                true
            }
        });
        pruned
    }

    /// Returns the largest cid referenced by any file set, or 0.
    pub fn max_cid(&self) -> Cid {
        self.sets.iter().map(|set| set.max_cid()).max().unwrap_or(0)
    }

    pub(crate) fn search(&self, fid: Fid) -> std::result::Result<usize, usize> {
        self.sets.binary_search_by_key(&fid, |set| set.fid())
    }

    pub(crate) fn get(&self, pos: usize) -> Option<&Arc<FileSet>> {
        self.sets.get(pos)
    }

    /// Returns the file set at `pos` for editing, copying it first if shared.
    pub(crate) fn make_mut(&mut self, pos: usize) -> &mut FileSet {
        Arc::make_mut(&mut self.sets[pos])
    }

    pub(crate) fn remove_at(&mut self, pos: usize) -> Arc<FileSet> {
        self.sets.remove(pos)
    }

    /// Returns the file set for `fid`, creating an empty one if absent.
    pub(crate) fn find_or_create(&mut self, fid: Fid) -> Result<usize> {
        match self.search(fid) {
            Ok(pos) => Ok(pos),
            Err(_) => self.insert_sorted(FileSet::new(fid)),
        }
    }
}
