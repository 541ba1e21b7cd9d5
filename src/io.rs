//! Record files: JSON / JSONL reading with per-record error tolerance, and
//! atomic writes.
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed over the target, so a crash never leaves a half-written dataset.

use crate::error::QcError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Records read from one file, plus how many could not be parsed.
#[derive(Debug, Clone)]
pub struct RecordFile<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

/// Read a record file.
///
/// A file whose first non-blank character is `[` is a JSON array; anything
/// else is JSONL (one record per non-blank line). Records that fail to parse
/// are logged and counted, never fatal. A file that is neither is an error.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<RecordFile<T>, QcError> {
    if !path.exists() {
        return Err(QcError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    let mut skipped = 0;

    if raw.trim_start().starts_with('[') {
        let items: Vec<serde_json::Value> =
            serde_json::from_str(&raw).map_err(|e| QcError::ParseFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        for (i, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<T>(item) {
                Ok(r) => records.push(r),
                Err(e) => {
                    warn!("{}: record {} skipped: {}", path.display(), i, e);
                    skipped += 1;
                }
            }
        }
    } else {
        for (i, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(r) => records.push(r),
                Err(e) => {
                    warn!("{}:{} skipped: {}", path.display(), i + 1, e);
                    skipped += 1;
                }
            }
        }
    }

    debug!(
        "Read {} records from {} ({} skipped)",
        records.len(),
        path.display(),
        skipped
    );
    Ok(RecordFile { records, skipped })
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), QcError> {
    let write_err = |source: std::io::Error| QcError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(body).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Write one JSON record per line, atomically.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<(), QcError> {
    let mut body = Vec::new();
    for r in records {
        serde_json::to_writer(&mut body, r)?;
        body.push(b'\n');
    }
    write_atomic(path, &body)
}

/// Write a pretty-printed JSON value, atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), QcError> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    write_atomic(path, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        id: u32,
    }

    #[test]
    fn jsonl_bad_lines_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.jsonl");
        std::fs::write(&path, "{\"id\":1}\n\nnot json\n{\"id\":\"x\"}\n{\"id\":2}\n").unwrap();
        let file: RecordFile<Rec> = read_records(&path).unwrap();
        assert_eq!(file.records, vec![Rec { id: 1 }, Rec { id: 2 }]);
        assert_eq!(file.skipped, 2);
    }

    #[test]
    fn json_array_bad_items_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        std::fs::write(&path, "  [{\"id\":1}, {\"nope\":true}]").unwrap();
        let file: RecordFile<Rec> = read_records(&path).unwrap();
        assert_eq!(file.records.len(), 1);
        assert_eq!(file.skipped, 1);
    }

    #[test]
    fn broken_array_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        std::fs::write(&path, "[{\"id\":1},").unwrap();
        assert!(matches!(
            read_records::<Rec>(&path),
            Err(QcError::ParseFailed { .. })
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            read_records::<Rec>(Path::new("/nonexistent/r.jsonl")),
            Err(QcError::FileNotFound { .. })
        ));
    }

    #[test]
    fn written_jsonl_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("r.jsonl");
        write_jsonl(&path, &[Rec { id: 7 }, Rec { id: 8 }]).unwrap();
        let file: RecordFile<Rec> = read_records(&path).unwrap();
        assert_eq!(file.records, vec![Rec { id: 7 }, Rec { id: 8 }]);
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
