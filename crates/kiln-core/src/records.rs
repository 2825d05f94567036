//! The records store (§4.2): a stable-key JSON sidecar of cross-build
//! identity data, canonicalised so it stays diffable under plugin
//! reordering (§3, §8 invariant 5).

use std::path::Path;

use kiln_error::{Error, Result};
use kiln_fs::{mkdirp, ReadableFileSystem, WritableFileSystem};
use serde_json::Value;

/// `readRecords`: a missing `recordsInputPath` yields an empty object; a
/// missing file is treated as empty too; a parse failure is `RecordsParse`.
pub async fn read_records<FS: ReadableFileSystem + ?Sized>(
    fs: &FS,
    path: Option<&Path>,
) -> Result<Value> {
    let Some(path) = path else {
        return Ok(Value::Object(Default::default()));
    };
    if fs.stat(path).await.is_err() {
        return Ok(Value::Object(Default::default()));
    }
    let bytes = fs.read_file(path).await?;
    serde_json::from_slice(&bytes).map_err(|source| Error::RecordsParse {
        path: path.to_path_buf(),
        source,
    })
}

/// `emitRecords`: no-op if `recordsOutputPath` is unset; otherwise the
/// target directory is created, `records` is canonicalised (sorted keys at
/// every depth, 2-space indent) and written through the filesystem.
pub async fn emit_records<FS: WritableFileSystem + ?Sized>(
    fs: &FS,
    path: Option<&Path>,
    records: &Value,
) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            mkdirp(fs, parent).await?;
        }
    }
    let canonical = sort_keys(records);
    let json = serde_json::to_string_pretty(&canonical)
        .expect("a Value built from sort_keys always serialises");
    fs.write_file(path, json.as_bytes()).await
}

/// Recursively sorts object keys lexicographically; array element order is
/// left untouched.
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
