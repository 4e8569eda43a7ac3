//! Container lifecycle management.
//!
//! At most one container is open at any instant. The state machine carries
//! the backend handle only in the `Open` state, so "no open container" is a
//! type-level fact. Rollover is close-then-open as one logical step:
//! [`ContainerLifecycle::ensure_chunk`] finalizes the previous container
//! before the next one exists.

use crate::backend::{Container, ContainerStore, DatasetSpec, StorageError, StorageResult};
use crate::capacity::CapacityTracker;
use crate::config::{WriterConfig, CHUNK_NUMBER_PLACEHOLDER};
use crate::frame::FrameMessage;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Slots allocated when a container is created; growth is on demand.
pub const DEFAULT_INITIAL_CAPACITY: u64 = 1;

/// Owns the single currently-open container, if any.
pub struct ContainerLifecycle {
    store: Box<dyn ContainerStore>,
    state: State,
}

enum State {
    Closed,
    Open(OpenContainer),
}

/// An open container together with the configuration captured when it was
/// opened. Attribute and side-dataset payloads are written at close from
/// these captured copies; configuration changes after open do not affect
/// this container.
pub struct OpenContainer {
    chunk_id: u64,
    path: PathBuf,
    dataset_name: String,
    chunk_capacity: Option<u64>,
    encoding: Option<String>,
    group_attributes: BTreeMap<String, Value>,
    dataset_attributes: BTreeMap<String, Value>,
    extra_datasets: BTreeMap<String, Value>,
    handle: Box<dyn Container>,
    tracker: CapacityTracker,
}

impl OpenContainer {
    pub fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u64 {
        self.tracker.capacity()
    }

    pub fn written_range(&self) -> Option<(u64, u64)> {
        self.tracker.written_range()
    }

    /// Grow the dataset so `slot` fits. Must precede the write.
    pub fn ensure_capacity(&mut self, slot: u64) -> StorageResult<u64> {
        self.tracker.ensure(self.handle.as_mut(), slot)
    }

    /// Write a pre-encoded payload verbatim at `slot`.
    pub fn write_frame(&mut self, slot: u64, payload: &[u8]) -> StorageResult<()> {
        self.handle.write_chunk(slot, payload)
    }

    /// Record a successful write at `slot`.
    pub fn record_write(&mut self, slot: u64) {
        self.tracker.record_write(slot);
    }

    /// First global frame number (1-based) this container can hold.
    fn first_frame_number(&self) -> u64 {
        match self.chunk_capacity {
            Some(capacity) if self.chunk_id > 0 => (self.chunk_id - 1) * capacity + 1,
            _ => 1,
        }
    }

    /// Shrink, write occupancy metadata and configured payloads, release.
    fn finalize(mut self) -> StorageResult<()> {
        self.tracker.shrink_to_fit(self.handle.as_mut())?;

        // Frame-number attributes are 1-based and globally meaningful, so a
        // consumer can locate a container's content without knowing the
        // chunk geometry.
        if let Some((min_slot, max_slot)) = self.tracker.written_range() {
            let first = self.first_frame_number();
            self.handle.set_dataset_attribute(
                &self.dataset_name,
                "image_nr_low",
                &json!(first + min_slot),
            )?;
            self.handle.set_dataset_attribute(
                &self.dataset_name,
                "image_nr_high",
                &json!(first + max_slot),
            )?;
        }

        if let Some(encoding) = &self.encoding {
            self.handle
                .set_dataset_attribute(&self.dataset_name, "encoding", &json!(encoding))?;
        }

        for (key, value) in &self.group_attributes {
            self.handle.set_group_attribute(key, value)?;
        }

        // Dataset attribute keys of the form `path:attr` target the dataset
        // at `path`; bare keys target the primary dataset.
        for (key, value) in &self.dataset_attributes {
            let (dataset, attr) = match key.split_once(':') {
                Some((dataset, attr)) => (dataset, attr),
                None => (self.dataset_name.as_str(), key.as_str()),
            };
            self.handle.set_dataset_attribute(dataset, attr, value)?;
        }

        for (name, value) in &self.extra_datasets {
            self.handle.add_aux_dataset(name, value)?;
        }

        info!(
            path = %self.path.display(),
            chunk_id = self.chunk_id,
            frames = self
                .tracker
                .written_range()
                .map(|(min, max)| max - min + 1)
                .unwrap_or(0),
            capacity = self.tracker.capacity(),
            "Container finalized"
        );

        self.handle.close()
    }
}

impl ContainerLifecycle {
    pub fn new(store: Box<dyn ContainerStore>) -> Self {
        Self {
            store,
            state: State::Closed,
        }
    }

    /// Chunk id of the open container, if one is open.
    pub fn current_chunk_id(&self) -> Option<u64> {
        match &self.state {
            State::Open(open) => Some(open.chunk_id),
            State::Closed => None,
        }
    }

    /// The open container, if any.
    pub fn current(&self) -> Option<&OpenContainer> {
        match &self.state {
            State::Open(open) => Some(open),
            State::Closed => None,
        }
    }

    /// Make sure the open container is the one for `chunk_id`, rolling over
    /// if a different container is open and opening one if none is.
    ///
    /// The dataset of a newly opened container is shaped after `frame`, the
    /// first frame routed to that chunk.
    pub fn ensure_chunk(
        &mut self,
        chunk_id: u64,
        frame: &FrameMessage,
        config: &WriterConfig,
    ) -> StorageResult<&mut OpenContainer> {
        let reopen = match &self.state {
            State::Open(open) => open.chunk_id != chunk_id,
            State::Closed => true,
        };

        if reopen {
            self.close()?;
            self.open(chunk_id, frame, config)?;
        }

        match &mut self.state {
            State::Open(open) => Ok(open),
            State::Closed => Err(StorageError::Closed),
        }
    }

    fn open(
        &mut self,
        chunk_id: u64,
        frame: &FrameMessage,
        config: &WriterConfig,
    ) -> StorageResult<()> {
        let path = resolve_output_path(&config.output_path, chunk_id);
        let spec = DatasetSpec {
            name: config.dataset_name.clone(),
            shape: frame.shape,
            pixel_type: frame.pixel_type,
            compression: config.compression(),
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        };

        let handle = self.store.create(&path, &spec)?;
        let tracker = CapacityTracker::new(handle.capacity(), config.chunk_capacity());

        debug!(
            path = %path.display(),
            chunk_id = chunk_id,
            "Container opened"
        );

        self.state = State::Open(OpenContainer {
            chunk_id,
            path,
            dataset_name: config.dataset_name.clone(),
            chunk_capacity: config.chunk_capacity(),
            encoding: frame.encoding.clone(),
            group_attributes: config.group_attributes.clone(),
            dataset_attributes: config.dataset_attributes.clone(),
            extra_datasets: config.extra_datasets.clone(),
            handle,
            tracker,
        });
        Ok(())
    }

    /// Finalize and release the open container. No-op when closed.
    ///
    /// On failure the state is already `Closed`; the half-finalized
    /// container is left as the backend left it rather than being retried.
    pub fn close(&mut self) -> StorageResult<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(open) => open.finalize(),
            State::Closed => Ok(()),
        }
    }
}

/// Substitute the chunk number into the output path template.
fn resolve_output_path(template: &str, chunk_id: u64) -> PathBuf {
    PathBuf::from(template.replace(CHUNK_NUMBER_PLACEHOLDER, &chunk_id.to_string()))
}
