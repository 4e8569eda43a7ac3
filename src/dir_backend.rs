//! Self-describing directory containers.
//!
//! One container is a directory laid out as a Zarr v2 group: the primary
//! dataset is an array whose `.zarray` document records shape (capacity x
//! rows x cols), per-frame chunking, the little-endian element type, and the
//! compression filter id/options verbatim. Each frame payload is stored as a
//! chunk file named `<slot>.0.0` with the pre-encoded bytes written as-is,
//! so no decode/re-encode happens anywhere on the write path. Resizing a
//! dataset rewrites only the metadata document.
//!
//! Group and dataset attributes live in `.zattrs` documents; auxiliary
//! datasets are stored as standalone JSON documents under their configured
//! name.

use crate::backend::{
    Compression, Container, ContainerStore, DatasetSpec, StorageError, StorageResult,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

const ZARR_FORMAT: u32 = 2;

#[derive(Serialize)]
struct ZarrayMeta {
    zarr_format: u32,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    dtype: String,
    compressor: Option<CompressorMeta>,
    fill_value: u64,
    order: String,
}

#[derive(Serialize)]
struct CompressorMeta {
    id: u32,
    options: Vec<u64>,
}

impl From<&Compression> for CompressorMeta {
    fn from(compression: &Compression) -> Self {
        Self {
            id: compression.filter_id,
            options: compression.options.clone(),
        }
    }
}

/// [`ContainerStore`] backed by directory containers on the local
/// filesystem.
#[derive(Debug, Clone, Default)]
pub struct DirectoryStore;

impl DirectoryStore {
    pub fn new() -> Self {
        Self
    }
}

impl ContainerStore for DirectoryStore {
    fn create(&self, path: &Path, dataset: &DatasetSpec) -> StorageResult<Box<dyn Container>> {
        validate_name(&dataset.name)?;

        // Truncate: an existing container at this path is replaced.
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        let dataset_dir = path.join(&dataset.name);
        fs::create_dir_all(&dataset_dir)?;

        fs::write(
            path.join(".zgroup"),
            serde_json::to_vec_pretty(&serde_json::json!({ "zarr_format": ZARR_FORMAT }))?,
        )?;

        let mut container = DirectoryContainer {
            root: path.to_path_buf(),
            dataset_dir,
            spec: dataset.clone(),
            capacity: dataset.initial_capacity,
            group_attrs: BTreeMap::new(),
            dataset_attrs: BTreeMap::new(),
        };
        container.persist_array_meta()?;

        info!(
            path = %path.display(),
            dataset = %dataset.name,
            rows = dataset.shape.rows,
            cols = dataset.shape.cols,
            dtype = dataset.pixel_type.type_descriptor(),
            "Container created"
        );

        Ok(Box::new(container))
    }
}

#[derive(Debug)]
struct DirectoryContainer {
    root: PathBuf,
    dataset_dir: PathBuf,
    spec: DatasetSpec,
    capacity: u64,
    group_attrs: BTreeMap<String, Value>,
    dataset_attrs: BTreeMap<String, BTreeMap<String, Value>>,
}

impl DirectoryContainer {
    fn persist_array_meta(&mut self) -> StorageResult<()> {
        let meta = ZarrayMeta {
            zarr_format: ZARR_FORMAT,
            shape: vec![
                self.capacity,
                u64::from(self.spec.shape.rows),
                u64::from(self.spec.shape.cols),
            ],
            chunks: vec![
                1,
                u64::from(self.spec.shape.rows),
                u64::from(self.spec.shape.cols),
            ],
            dtype: self.spec.pixel_type.type_descriptor().to_string(),
            compressor: self.spec.compression.as_ref().map(CompressorMeta::from),
            fill_value: 0,
            order: "C".to_string(),
        };
        fs::write(
            self.dataset_dir.join(".zarray"),
            serde_json::to_vec_pretty(&meta)?,
        )?;
        Ok(())
    }

    fn persist_group_attrs(&self) -> StorageResult<()> {
        fs::write(
            self.root.join(".zattrs"),
            serde_json::to_vec_pretty(&self.group_attrs)?,
        )?;
        Ok(())
    }

    fn persist_dataset_attrs(&self, dataset: &str) -> StorageResult<()> {
        let dir = self.root.join(dataset);
        fs::create_dir_all(&dir)?;
        let attrs = self.dataset_attrs.get(dataset);
        fs::write(dir.join(".zattrs"), serde_json::to_vec_pretty(&attrs)?)?;
        Ok(())
    }
}

impl Container for DirectoryContainer {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn write_chunk(&mut self, slot: u64, payload: &[u8]) -> StorageResult<()> {
        if slot >= self.capacity {
            return Err(StorageError::SlotOutOfBounds {
                slot,
                capacity: self.capacity,
            });
        }
        // Dot-separated chunk key; trailing axes are whole-frame.
        fs::write(self.dataset_dir.join(format!("{slot}.0.0")), payload)?;
        Ok(())
    }

    fn resize(&mut self, capacity: u64) -> StorageResult<u64> {
        self.capacity = capacity;
        self.persist_array_meta()?;
        debug!(path = %self.root.display(), capacity, "Dataset resized");
        Ok(self.capacity)
    }

    fn set_group_attribute(&mut self, key: &str, value: &Value) -> StorageResult<()> {
        self.group_attrs.insert(key.to_string(), value.clone());
        self.persist_group_attrs()
    }

    fn set_dataset_attribute(
        &mut self,
        dataset: &str,
        key: &str,
        value: &Value,
    ) -> StorageResult<()> {
        validate_name(dataset)?;
        self.dataset_attrs
            .entry(dataset.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        self.persist_dataset_attrs(dataset)
    }

    fn add_aux_dataset(&mut self, name: &str, value: &Value) -> StorageResult<()> {
        validate_name(name)?;
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(value)?)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> StorageResult<()> {
        debug!(path = %self.root.display(), "Container released");
        Ok(())
    }
}

/// Reject names that would escape the container directory.
fn validate_name(name: &str) -> StorageResult<()> {
    let path = Path::new(name);
    let escapes = name.is_empty()
        || path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
    if escapes {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}
