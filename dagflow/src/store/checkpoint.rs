//! Persisting and restoring the data store between runs.

use super::{DataStore, ProducerMap};
use crate::errors::DataStoreError;
use crate::graph::ConfigurationDag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Version written into every checkpoint file.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// On-disk form of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    /// Format version of the file.
    pub format_version: u32,
    /// When the checkpoint was written.
    pub written_at: DateTime<Utc>,
    /// Store contents by producer and sub-key.
    pub entries: ProducerMap,
}

fn checkpoint_error(path: &Path, message: impl ToString) -> DataStoreError {
    DataStoreError::Checkpoint {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

impl DataStore {
    /// Writes the store's contents to `path` as JSON.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns `Checkpoint` if the file cannot be written.
    pub fn write_checkpoint(&self, path: impl AsRef<Path>) -> Result<(), DataStoreError> {
        let path = path.as_ref();
        let envelope = CheckpointEnvelope {
            format_version: CHECKPOINT_FORMAT_VERSION,
            written_at: Utc::now(),
            entries: self.data.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(|e| checkpoint_error(path, e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| checkpoint_error(path, e))?;
        }
        std::fs::write(path, bytes).map_err(|e| checkpoint_error(path, e))?;

        tracing::info!(
            path = %path.display(),
            producers = self.data.len(),
            "Wrote data store checkpoint"
        );
        Ok(())
    }

    /// Restores a store from a checkpoint written by [`DataStore::write_checkpoint`].
    ///
    /// # Errors
    ///
    /// Returns `CheckpointVersion` for files of another format version and
    /// `Checkpoint` when the file is missing or malformed.
    pub fn read_checkpoint(path: impl AsRef<Path>, dag: Arc<ConfigurationDag>) -> Result<Self, DataStoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| checkpoint_error(path, e))?;
        let raw: Value = serde_json::from_str(&text).map_err(|e| checkpoint_error(path, e))?;

        let found = raw
            .get("format_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| checkpoint_error(path, "missing format_version"))?;
        if found != u64::from(CHECKPOINT_FORMAT_VERSION) {
            return Err(DataStoreError::CheckpointVersion {
                found: u32::try_from(found).unwrap_or(u32::MAX),
                expected: CHECKPOINT_FORMAT_VERSION,
            });
        }

        let envelope: CheckpointEnvelope = serde_json::from_value(raw).map_err(|e| checkpoint_error(path, e))?;
        tracing::info!(
            path = %path.display(),
            producers = envelope.entries.len(),
            written_at = %envelope.written_at,
            "Restored data store checkpoint"
        );
        Ok(Self::from_entries(envelope.entries, dag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_checkpoint_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let dag = Arc::new(ConfigurationDag::new());

        let mut store = DataStore::new(dag.clone());
        store.add("reader", json!({"rows": [1, 2, 3]})).unwrap();
        store.insert("reader", "query", json!("select *"), false).unwrap();
        store.write_checkpoint(&path).unwrap();

        let restored = DataStore::read_checkpoint(&path, dag).unwrap();
        assert_eq!(restored.entries(), store.entries());
    }

    #[test]
    fn test_checkpoint_rejects_other_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(
            &path,
            json!({"format_version": 7, "written_at": "2024-01-01T00:00:00Z", "entries": {}}).to_string(),
        )
        .unwrap();

        let err = DataStore::read_checkpoint(&path, Arc::new(ConfigurationDag::new())).unwrap_err();
        assert_eq!(err, DataStoreError::CheckpointVersion { found: 7, expected: 1 });
    }

    #[test]
    fn test_checkpoint_missing_file() {
        let err = DataStore::read_checkpoint("/nonexistent/dagflow/store.json", Arc::new(ConfigurationDag::new()))
            .unwrap_err();
        assert_eq!(err.code(), "STORE-CHECKPOINT");
    }
}
