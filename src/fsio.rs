//! Small filesystem helpers shared by the catalog, audit and health writers.
//!
//! Every state file in the data directory is written atomically: the
//! content goes to a temporary file in the target's directory which is
//! renamed over the target, so readers never observe a torn write.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

/// Errors from atomic filesystem operations.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed for {path}: {0}", path = .1)]
    Serialize(#[source] serde_json::Error, String),
}

fn io_err(path: &Path, source: std::io::Error) -> FsError {
    FsError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `content` to `path` atomically (unique tmp file + rename).
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), FsError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| io_err(&parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| io_err(&parent, e))?;
    tmp.write_all(content).map_err(|e| io_err(path, e))?;
    tmp.as_file().sync_all().map_err(|e| io_err(path, e))?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), FsError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| FsError::Serialize(e, path.display().to_string()))?;
    write_atomic(path, &json)
}

/// Append one JSON line to a `.jsonl` file, creating it if needed.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), FsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let line = serde_json::to_string(value)
        .map_err(|e| FsError::Serialize(e, path.display().to_string()))?;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    writeln!(file, "{line}").map_err(|e| io_err(path, e))
}

/// Read every record of a `.jsonl` file. Missing file yields an empty vec;
/// unparseable lines are skipped with a warning.
pub fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, FsError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(rec) => records.push(rec),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping unparseable jsonl line"
                );
            }
        }
    }
    Ok(records)
}
