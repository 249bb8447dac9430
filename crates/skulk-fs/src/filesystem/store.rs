//! Saving and loading file-set registries as JSON metadata documents.
//!
//! Document layout:
//!
//! ```text
//! {"fmtv": 1, "fset": [<file set>, <file set>, ...]}
//! ```
//!
//! Each `fset` element is produced by a [`FileSetCodec`]. Documents are
//! written with the atomic pattern used for data files:
//! 1. Write to `<name>.tmp`
//! 2. fsync the temp file
//! 3. Atomic rename to `<name>`
//! 4. fsync the directory (rename persistence)
//!
//! A document therefore never appears on disk partially written.

use crate::config::SyncMode;
use crate::error::{FsError, Result};
use crate::fset::{FileSetCodec, FileSetRegistry};
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata document format version.
pub const FORMAT_VERSION: u64 = 1;

/// Suffix of the temporary file a document is written to before rename.
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// Serializes `registry` to `path`, durably.
pub fn save_fs<C: FileSetCodec + ?Sized>(
    codec: &C,
    registry: &FileSetRegistry,
    path: &Path,
    sync_mode: SyncMode,
) -> Result<()> {
    let mut fset = Vec::new();
    fset.try_reserve(registry.len())
        .map_err(|_| FsError::OutOfMemory)?;
    for set in registry.iter() {
        fset.push(codec.encode(set)?);
    }

    let mut doc = Map::new();
    doc.insert("fmtv".to_string(), Value::from(FORMAT_VERSION));
    doc.insert("fset".to_string(), Value::Array(fset));
    let data = serde_json::to_vec(&Value::Object(doc))
        .map_err(|e| FsError::corrupt(format!("{}: {}", path.display(), e)))?;

    write_atomic(path, &data, sync_mode)?;
    debug!(
        "Saved {} file sets ({} bytes) to {}",
        registry.len(),
        data.len(),
        path.display()
    );
    Ok(())
}

/// Loads a registry previously written by [`save_fs`].
///
/// # Errors
///
/// `IoError` if the file cannot be read; `CorruptFormat` if the document is
/// not valid JSON, `fmtv` is missing or not 1, `fset` is not an array, a file
/// set fails to decode, or fids are not strictly ascending.
pub fn load_fs<C: FileSetCodec + ?Sized>(codec: &C, path: &Path) -> Result<FileSetRegistry> {
    let data = fs::read(path)?;
    let corrupt = |reason: String| FsError::corrupt(format!("{}: {}", path.display(), reason));

    let doc: Value = serde_json::from_slice(&data).map_err(|e| corrupt(e.to_string()))?;
    let doc = doc
        .as_object()
        .ok_or_else(|| corrupt("document is not an object".to_string()))?;

    // any JSON number equal to the version is accepted, `1.0` included
    match doc.get("fmtv") {
        Some(fmtv) if fmtv.as_f64() == Some(FORMAT_VERSION as f64) => {}
        Some(fmtv) => return Err(corrupt(format!("unsupported fmtv {}", fmtv))),
        None => return Err(corrupt("missing fmtv".to_string())),
    }

    let items = doc
        .get("fset")
        .and_then(Value::as_array)
        .ok_or_else(|| corrupt("fset is missing or not an array".to_string()))?;

    let mut sets = Vec::new();
    sets.try_reserve(items.len())
        .map_err(|_| FsError::OutOfMemory)?;
    for item in items {
        let set = codec.decode(item).map_err(|err| match err {
            FsError::CorruptFormat(reason) => corrupt(reason),
            other => other,
        })?;
        sets.push(set);
    }

    FileSetRegistry::from_sorted(sets).map_err(|err| match err {
        FsError::CorruptFormat(reason) => corrupt(reason),
        other => other,
    })
}

/// Returns the temporary path `path` is staged at before rename.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

fn write_atomic(path: &Path, data: &[u8], sync_mode: SyncMode) -> Result<()> {
    write_atomic_with(path, data, |file| sync_mode.sync(file))
}

/// [`write_atomic`] with the temp-file sync step supplied by the caller.
/// `path` is only touched once `sync_file` has succeeded.
fn write_atomic_with(
    path: &Path,
    data: &[u8],
    sync_file: impl FnOnce(&File) -> io::Result<()>,
) -> Result<()> {
    let tmp = tmp_path(path);
    let result = (|| -> io::Result<()> {
        // 1. Write to temp file
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(data)?;

        // 2. fsync temp file
        sync_file(&file)?;
        drop(file);

        // 3. Atomic rename
        fs::rename(&tmp, path)?;

        // 4. fsync directory (rename persistence)
        if let Some(dir) = path.parent() {
            sync_dir(dir)?;
        }
        Ok(())
    })();

    if let Err(err) = result {
        if let Err(cleanup) = remove_if_exists(&tmp) {
            warn!(
                "Failed to remove temp file {}: {:?}",
                tmp.display(),
                cleanup
            );
        }
        return Err(err.into());
    }
    Ok(())
}

/// Fsyncs a directory so that renames and new entries inside it persist.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Removes `path`, treating absence as success. Returns whether a file was removed.
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
