//! Durable JSON state.
//!
//! Each subsystem keeps its state in one document under the data directory.
//! Writes go through a temp file and an atomic rename so a crash mid-write
//! leaves the previous document intact. An append-only `audit.log` records
//! every engine event as one JSON line.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Persistence error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A document exists but cannot be parsed. Never silently replaced;
    /// the operator decides whether to repair or delete it.
    #[error("corrupt document at {path}: {source}")]
    Corrupt {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Serialization failure on write.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Directory-backed JSON document store.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn doc_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Load a document, returning `T::default()` when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupt` when the file exists but does not parse;
    /// `StoreError::Io` on filesystem failure.
    pub fn load<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.doc_path(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(document = name, "No document on disk, starting fresh");
                return Ok(T::default());
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt { path, source })
    }

    /// Write a document atomically (temp file then rename).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` on filesystem failure.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.doc_path(name);
        let tmp = self.dir.join(format!("{name}.json.tmp"));
        let body = serde_json::to_string_pretty(value)?;

        write_all(&tmp, body.as_bytes())?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(document = name, path = %path.display(), "Document saved");
        Ok(())
    }

    /// Append one JSON line to the audit log.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` on filesystem failure.
    pub fn append_audit<T: Serialize>(&self, entry: &T) -> Result<(), StoreError> {
        let path = self.dir.join("audit.log");
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| StoreError::Io { path, source })
    }
}

fn write_all(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let map_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(map_err)?;
    file.write_all(bytes).map_err(map_err)?;
    file.sync_all().map_err(map_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        counter: u32,
        label: String,
    }

    #[test]
    fn missing_document_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let doc: Doc = store.load("orders").unwrap();
        assert_eq!(doc, Doc::default());
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let doc = Doc {
            counter: 7,
            label: "breaker".to_string(),
        };
        store.save("breaker", &doc).unwrap();
        let loaded: Doc = store.load("breaker").unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        store.save("positions", &Doc::default()).unwrap();
        assert!(dir.path().join("positions.json").exists());
        assert!(!dir.path().join("positions.json.tmp").exists());
    }

    #[test]
    fn corrupt_document_is_an_error_not_a_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orders.json"), "{not json").unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        let result: Result<Doc, _> = store.load("orders");
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn audit_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        store.append_audit(&serde_json::json!({"event": "a"})).unwrap();
        store.append_audit(&serde_json::json!({"event": "b"})).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }
}
