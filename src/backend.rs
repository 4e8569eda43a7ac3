//! Storage backend contract for chunked frame containers.
//!
//! Backends are **opaque chunk stores**. They know how to create a container
//! holding one resizable primary dataset, accept pre-encoded chunk payloads
//! at slot offsets, and attach metadata. The writer owns all chunking and
//! occupancy logic; backends do not understand frame indices or rollover.

use crate::frame::{FrameShape, PixelType};
use serde_json::Value;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Container metadata could not be encoded.
    #[error("metadata encoding failed: {0}")]
    Metadata(#[from] serde_json::Error),

    /// A chunk write targeted a slot beyond the dataset's capacity.
    #[error("slot {slot} beyond dataset capacity {capacity}")]
    SlotOutOfBounds {
        /// The requested slot.
        slot: u64,
        /// The dataset capacity at the time of the write.
        capacity: u64,
    },

    /// A dataset or attribute name the backend cannot represent.
    #[error("invalid name '{0}'")]
    InvalidName(String),

    /// The operation requires an open container but none is open.
    #[error("no container is open")]
    Closed,
}

/// Compression filter recorded in container metadata.
///
/// The filter id and options are opaque to the backend; payloads arrive
/// already encoded and are stored verbatim. The metadata exists so that
/// consumers know how to decode the chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compression {
    /// Registered filter identifier.
    pub filter_id: u32,
    /// Codec-specific option tuple, recorded verbatim.
    pub options: Vec<u64>,
}

/// Creation-time description of a container's primary dataset.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    /// Dataset name, possibly a nested path such as `entry/data/data`.
    pub name: String,
    /// Per-frame pixel geometry.
    pub shape: FrameShape,
    /// Element type of the stored frames.
    pub pixel_type: PixelType,
    /// Compression filter metadata, if the stream is encoded.
    pub compression: Option<Compression>,
    /// Number of slots to allocate up front.
    pub initial_capacity: u64,
}

/// Factory for containers.
///
/// # Implementors
///
/// - [`crate::dir_backend::DirectoryStore`] - Self-describing directory
///   containers for production use
/// - [`crate::mem_backend::MemoryStore`] - For testing
pub trait ContainerStore: Send {
    /// Creates a new container at `path`, truncating any existing one, with
    /// a single primary dataset described by `dataset`.
    fn create(&self, path: &Path, dataset: &DatasetSpec) -> StorageResult<Box<dyn Container>>;
}

/// An open container owning one resizable primary dataset.
///
/// # Invariants
///
/// - `write_chunk` stores the payload bytes verbatim; no re-encoding
/// - `write_chunk` fails when `slot >= capacity()`; callers grow first
/// - `resize` returns the capacity actually in effect afterwards
/// - After `close` returns successfully, all writes and metadata are handed
///   to the operating system's buffering layer
pub trait Container: Send + std::fmt::Debug {
    /// Current slot capacity of the primary dataset.
    fn capacity(&self) -> u64;

    /// Writes a pre-encoded payload at `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is beyond the current capacity or an
    /// I/O error occurs.
    fn write_chunk(&mut self, slot: u64, payload: &[u8]) -> StorageResult<()>;

    /// Resizes the primary dataset's slot capacity.
    ///
    /// Returns the new capacity. Backends may round the request up but
    /// never down.
    fn resize(&mut self, capacity: u64) -> StorageResult<u64>;

    /// Sets a key/value attribute at container (group) scope.
    fn set_group_attribute(&mut self, key: &str, value: &Value) -> StorageResult<()>;

    /// Sets a key/value attribute on the dataset at `dataset`.
    fn set_dataset_attribute(&mut self, dataset: &str, key: &str, value: &Value)
        -> StorageResult<()>;

    /// Embeds an auxiliary dataset with an arbitrary JSON payload.
    fn add_aux_dataset(&mut self, name: &str, value: &Value) -> StorageResult<()>;

    /// Flushes and releases the container.
    fn close(self: Box<Self>) -> StorageResult<()>;
}
