//! In-memory storage backend.
//!
//! Containers live in a shared map keyed by path and survive `close`, so
//! tests can assert on the final state of every container a run produced.
//! Also useful for dry runs where frames should be consumed but not
//! persisted.

use crate::backend::{Container, ContainerStore, DatasetSpec, StorageError, StorageResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Final observable state of one in-memory container.
#[derive(Debug, Clone, Default)]
pub struct ContainerRecord {
    /// Dataset description the container was created with.
    pub dataset: Option<DatasetSpec>,
    /// Current slot capacity.
    pub capacity: u64,
    /// Chunk payloads by slot.
    pub chunks: BTreeMap<u64, Vec<u8>>,
    /// Every capacity passed to `resize`, in call order.
    pub resize_history: Vec<u64>,
    /// Group-scope attributes.
    pub group_attrs: BTreeMap<String, Value>,
    /// Dataset-scope attributes, keyed by dataset path then attribute name.
    pub dataset_attrs: BTreeMap<String, BTreeMap<String, Value>>,
    /// Auxiliary datasets by name.
    pub aux_datasets: BTreeMap<String, Value>,
    /// Number of times `close` completed on this container.
    pub close_count: u32,
}

/// In-memory [`ContainerStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<PathBuf, ContainerRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the record for `path`, if a container was ever created
    /// there.
    pub fn record(&self, path: impl AsRef<Path>) -> Option<ContainerRecord> {
        self.records.lock().get(path.as_ref()).cloned()
    }

    /// Paths of all containers created through this store, in order.
    pub fn container_paths(&self) -> Vec<PathBuf> {
        self.records.lock().keys().cloned().collect()
    }
}

impl ContainerStore for MemoryStore {
    fn create(&self, path: &Path, dataset: &DatasetSpec) -> StorageResult<Box<dyn Container>> {
        let record = ContainerRecord {
            dataset: Some(dataset.clone()),
            capacity: dataset.initial_capacity,
            ..ContainerRecord::default()
        };
        // Truncate semantics: a pre-existing container at the same path is
        // replaced.
        self.records.lock().insert(path.to_path_buf(), record);

        Ok(Box::new(MemoryContainer {
            path: path.to_path_buf(),
            records: Arc::clone(&self.records),
        }))
    }
}

#[derive(Debug)]
struct MemoryContainer {
    path: PathBuf,
    records: Arc<Mutex<BTreeMap<PathBuf, ContainerRecord>>>,
}

impl MemoryContainer {
    fn with_record<T>(
        &self,
        f: impl FnOnce(&mut ContainerRecord) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut records = self.records.lock();
        let record = records.get_mut(&self.path).ok_or(StorageError::Closed)?;
        f(record)
    }
}

impl Container for MemoryContainer {
    fn capacity(&self) -> u64 {
        self.records
            .lock()
            .get(&self.path)
            .map(|r| r.capacity)
            .unwrap_or(0)
    }

    fn write_chunk(&mut self, slot: u64, payload: &[u8]) -> StorageResult<()> {
        self.with_record(|record| {
            if slot >= record.capacity {
                return Err(StorageError::SlotOutOfBounds {
                    slot,
                    capacity: record.capacity,
                });
            }
            record.chunks.insert(slot, payload.to_vec());
            Ok(())
        })
    }

    fn resize(&mut self, capacity: u64) -> StorageResult<u64> {
        self.with_record(|record| {
            record.resize_history.push(capacity);
            record.capacity = capacity;
            Ok(capacity)
        })
    }

    fn set_group_attribute(&mut self, key: &str, value: &Value) -> StorageResult<()> {
        self.with_record(|record| {
            record.group_attrs.insert(key.to_string(), value.clone());
            Ok(())
        })
    }

    fn set_dataset_attribute(
        &mut self,
        dataset: &str,
        key: &str,
        value: &Value,
    ) -> StorageResult<()> {
        self.with_record(|record| {
            record
                .dataset_attrs
                .entry(dataset.to_string())
                .or_default()
                .insert(key.to_string(), value.clone());
            Ok(())
        })
    }

    fn add_aux_dataset(&mut self, name: &str, value: &Value) -> StorageResult<()> {
        self.with_record(|record| {
            record.aux_datasets.insert(name.to_string(), value.clone());
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> StorageResult<()> {
        self.with_record(|record| {
            record.close_count += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameShape, PixelType};

    fn create_test_spec() -> DatasetSpec {
        DatasetSpec {
            name: "data".to_string(),
            shape: FrameShape::new(2, 2),
            pixel_type: PixelType::UInt8,
            compression: None,
            initial_capacity: 2,
        }
    }

    #[test]
    fn test_write_within_capacity() {
        let store = MemoryStore::new();
        let mut container = store.create(Path::new("a"), &create_test_spec()).unwrap();

        container.write_chunk(1, b"abc").unwrap();
        container.close().unwrap();

        let record = store.record("a").unwrap();
        assert_eq!(record.chunks.get(&1).unwrap(), b"abc");
        assert_eq!(record.close_count, 1);
    }

    #[test]
    fn test_write_beyond_capacity_fails() {
        let store = MemoryStore::new();
        let mut container = store.create(Path::new("a"), &create_test_spec()).unwrap();

        let err = container.write_chunk(2, b"abc").unwrap_err();
        assert!(matches!(
            err,
            StorageError::SlotOutOfBounds {
                slot: 2,
                capacity: 2
            }
        ));
    }

    #[test]
    fn test_resize_records_history() {
        let store = MemoryStore::new();
        let mut container = store.create(Path::new("a"), &create_test_spec()).unwrap();

        container.resize(8).unwrap();
        container.write_chunk(7, b"x").unwrap();
        container.resize(8).unwrap();

        let record = store.record("a").unwrap();
        assert_eq!(record.resize_history, vec![8, 8]);
        assert_eq!(record.capacity, 8);
    }

    #[test]
    fn test_create_truncates_existing_container() {
        let store = MemoryStore::new();
        let mut container = store.create(Path::new("a"), &create_test_spec()).unwrap();
        container.write_chunk(0, b"old").unwrap();
        container.close().unwrap();

        let container = store.create(Path::new("a"), &create_test_spec()).unwrap();
        drop(container);

        let record = store.record("a").unwrap();
        assert!(record.chunks.is_empty());
        assert_eq!(record.close_count, 0);
    }

    #[test]
    fn test_attributes_and_aux_datasets() {
        let store = MemoryStore::new();
        let mut container = store.create(Path::new("a"), &create_test_spec()).unwrap();

        container
            .set_group_attribute("run_id", &serde_json::json!(42))
            .unwrap();
        container
            .set_dataset_attribute("data", "image_nr_low", &serde_json::json!(1))
            .unwrap();
        container
            .add_aux_dataset("timestamps", &serde_json::json!([1, 2, 3]))
            .unwrap();
        container.close().unwrap();

        let record = store.record("a").unwrap();
        assert_eq!(record.group_attrs["run_id"], serde_json::json!(42));
        assert_eq!(
            record.dataset_attrs["data"]["image_nr_low"],
            serde_json::json!(1)
        );
        assert_eq!(record.aux_datasets["timestamps"], serde_json::json!([1, 2, 3]));
    }
}
