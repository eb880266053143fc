//! Atomic file writes and JSON load/save.
//!
//! Every report, manifest and search-state file goes through these helpers:
//! data is written to a `.partial` sibling and renamed into place, so readers
//! see either the old file or the complete new one.

use crate::error::PersistError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Sibling path used while a write is in flight.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("unnamed"));
    name.push(".partial");
    path.with_file_name(name)
}

/// Create `dir` and all of its parents.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    std::fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))
}

/// Atomically write raw bytes to `path`, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = partial_path(path);
    std::fs::write(&tmp, data).map_err(|e| PersistError::io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(PersistError::io(path, e));
    }
    Ok(())
}

/// Atomically write pretty-printed JSON to `path`.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), PersistError> {
    let json = serde_json::to_vec_pretty(data).map_err(|source| PersistError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &json)
}

/// Load and deserialize JSON from `path`.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path).map_err(|e| PersistError::io(path, e))?;
    let value = serde_json::from_slice(&data).map_err(|source| PersistError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TrialStub {
        trial_id: usize,
        score: f64,
    }

    #[test]
    fn test_atomic_write_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("oracle.json");
        let data = TrialStub {
            trial_id: 3,
            score: 0.75,
        };

        atomic_write_json(&path, &data).unwrap();
        let loaded: Option<TrialStub> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(data));
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("MLP").join("best_model").join("best_model.json");

        atomic_write(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_is_renamed_away() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("best_model.weights.mpk");

        atomic_write(&path, b"weights").unwrap();
        assert!(!partial_path(&path).exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"weights");
    }

    #[test]
    fn test_failed_rename_removes_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("MLP_kfold_model.json");
        std::fs::create_dir(&path).unwrap();

        assert!(atomic_write(&path, b"{}").is_err());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_partial_path_keeps_full_name() {
        let path = Path::new("/models/KFold/MLP_kfold_model.json");
        assert_eq!(
            partial_path(path),
            PathBuf::from("/models/KFold/MLP_kfold_model.json.partial")
        );
    }

    #[test]
    fn test_load_json_missing_file() {
        let loaded: Option<TrialStub> = load_json(Path::new("/nonexistent/oracle.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_json_reports_decode_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = load_json::<TrialStub>(&path).unwrap_err();
        assert!(matches!(err, PersistError::Decode { .. }));
        assert_eq!(err.path(), path.as_path());
    }
}
