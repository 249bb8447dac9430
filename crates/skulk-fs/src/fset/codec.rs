//! Conversion between a [`FileSet`] and its JSON document form.
//!
//! The metadata document only knows that each `fset` element is a JSON
//! value; how a file set maps onto that value belongs to the data-file layer,
//! which can supply its own [`FileSetCodec`].

use super::FileSet;
use crate::error::{FsError, Result};
use serde::Deserialize;
use serde_json::Value;

/// Encodes and decodes a single file set.
pub trait FileSetCodec: Send + Sync {
    /// Converts a file set into a JSON value.
    fn encode(&self, set: &FileSet) -> Result<Value>;

    /// Converts a JSON value back into a file set.
    ///
    /// Any decode failure must be reported as `CorruptFormat`.
    fn decode(&self, value: &Value) -> Result<FileSet>;
}

/// Default codec using the serde representation of [`FileSet`].
///
/// ```text
/// {"fid": 3, "files": [{"type": "data", "did": {"level": 0, "id": 0}, "cid": 7, "size": 1024}]}
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileSetCodec;

impl FileSetCodec for JsonFileSetCodec {
    fn encode(&self, set: &FileSet) -> Result<Value> {
        serde_json::to_value(set).map_err(|e| FsError::corrupt(format!("fid {}: {}", set.fid(), e)))
    }

    fn decode(&self, value: &Value) -> Result<FileSet> {
        FileSet::deserialize(value).map_err(FsError::corrupt)
    }
}
