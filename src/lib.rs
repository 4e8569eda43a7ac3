//! Framestore
//!
//! Chunked frame storage service for streaming detector acquisition. The
//! service receives a stream of pre-encoded image frames, routes each
//! global frame index to a container chunk, and persists payloads verbatim
//! into self-describing directory containers, rolling over to a new
//! container every `frames_per_container` frames.
//!
//! ## Features
//!
//! - **Direct chunk writes**: payloads produced by an upstream compression
//!   stage are written to storage as-is, with no decode/re-encode
//! - **Lazy capacity management**: datasets grow on demand and are
//!   compacted to the exact written range when a container closes
//! - **Accurate occupancy metadata**: each container records the 1-based
//!   global frame-number range it holds, so consumers can locate frames
//!   without knowing the chunk geometry
//! - **Control-plane API**: start/stop and typed parameter get/set over
//!   HTTP, serialized against the write path
//!
//! ## Architecture
//!
//! ```text
//! Frame stream (TCP)        Writer engine              Containers
//! ┌──────────────┐       ┌────────────────┐         ┌──────────────┐
//! │ Ingest       │──────▶│ Chunk Router   │         │ run_1.zarr   │
//! │ listener     │ mpsc  │ Lifecycle Mgr  │────────▶│ run_2.zarr   │
//! └──────────────┘       │ Capacity Mgr   │         │ run_3.zarr   │
//!                        └────────────────┘         └──────────────┘
//!                                ▲
//!                                │ mutex
//!                        ┌────────────────┐
//!                        │ Control API    │
//!                        │ (axum)         │
//!                        └────────────────┘
//! ```

pub mod backend;
pub mod capacity;
pub mod chunking;
pub mod config;
pub mod container;
pub mod control;
pub mod dir_backend;
pub mod frame;
pub mod ingest;
pub mod mem_backend;
pub mod writer;

pub use backend::{Compression, Container, ContainerStore, DatasetSpec, StorageError};
pub use chunking::{route, ChunkLocation};
pub use config::{Config, WriterConfig};
pub use dir_backend::DirectoryStore;
pub use frame::{FrameMessage, FrameShape, PixelType};
pub use ingest::IngestServer;
pub use mem_backend::MemoryStore;
pub use writer::{FrameWriter, WriteHook, WriteReceipt, WriterError, WriterStatus};
