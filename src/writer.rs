//! Frame writer engine facade.
//!
//! Orchestrates routing, container rollover, capacity growth, and the
//! direct chunk write for every incoming frame. The engine performs no
//! internal locking; callers serialize `start`/`submit`/`stop` (the service
//! binary does this with one mutex around the whole writer).

use crate::backend::{ContainerStore, StorageError};
use crate::chunking;
use crate::config::WriterConfig;
use crate::container::ContainerLifecycle;
use crate::frame::FrameMessage;
use metrics::counter;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced by the writer engine.
#[derive(Debug, Error)]
pub enum WriterError {
    /// Required configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `submit` was called before `start`.
    #[error("writer has not been started")]
    NotStarted,

    /// A storage backend operation failed. The open container is left as
    /// the backend left it; the engine does not retry.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A write hook failed after the frame's core write completed.
    #[error("write hook '{name}' failed: {source}")]
    Hook {
        /// Registered name of the failing hook.
        name: String,
        /// The hook's error.
        #[source]
        source: anyhow::Error,
    },
}

/// Where a frame's payload ended up.
#[derive(Debug, Clone, Serialize)]
pub struct WriteReceipt {
    /// Global frame index of the written frame.
    pub frame_index: u64,
    /// Chunk the frame was routed to (0 when chunking is disabled).
    pub chunk_id: u64,
    /// Slot inside the container's dataset.
    pub slot: u64,
    /// Path of the container holding the frame.
    pub container_path: PathBuf,
}

/// Side-effect hook invoked after each frame's core write.
///
/// Hooks observe the completed write; they cannot mutate engine state. The
/// hook list is registered before `start` and immutable during a run. A
/// hook error aborts the remaining hooks for that frame and propagates to
/// the `submit` caller; the frame itself is already durably written.
pub trait WriteHook: Send {
    /// Name used in error reports and logs.
    fn name(&self) -> &str;

    /// Called once per written frame, in registration order.
    fn on_frame_written(&self, receipt: &WriteReceipt, frame: &FrameMessage) -> anyhow::Result<()>;
}

/// Snapshot of the writer for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct WriterStatus {
    /// Whether `start` has validated configuration and armed the engine.
    pub armed: bool,
    /// Chunk id of the open container, if one is open.
    pub open_chunk_id: Option<u64>,
    /// Path of the open container, if one is open.
    pub container_path: Option<PathBuf>,
    /// Slot capacity of the open container's dataset.
    pub capacity: Option<u64>,
    /// Frames written since the service started.
    pub frames_written: u64,
}

/// The chunked frame-to-container storage engine.
pub struct FrameWriter {
    config: WriterConfig,
    lifecycle: ContainerLifecycle,
    hooks: Vec<Box<dyn WriteHook>>,
    armed: bool,
    frames_written: u64,
}

impl FrameWriter {
    /// Create a writer over the given backend. The writer is idle until
    /// [`FrameWriter::start`] is called.
    pub fn new(config: WriterConfig, store: Box<dyn ContainerStore>) -> Self {
        Self {
            config,
            lifecycle: ContainerLifecycle::new(store),
            hooks: Vec::new(),
            armed: false,
            frames_written: 0,
        }
    }

    /// Register a side-effect hook. Hooks run in registration order and
    /// must be registered before `start`.
    pub fn register_hook(&mut self, hook: Box<dyn WriteHook>) -> Result<(), WriterError> {
        if self.armed {
            return Err(WriterError::Configuration(
                "hooks cannot be registered while the writer is armed".to_string(),
            ));
        }
        self.hooks.push(hook);
        Ok(())
    }

    /// Validate configuration and arm the engine.
    ///
    /// Containers are created lazily by the first submitted frame, so no
    /// I/O happens here; configuration problems surface before any frame
    /// is accepted.
    pub fn start(&mut self) -> Result<(), WriterError> {
        self.config
            .validate()
            .map_err(WriterError::Configuration)?;
        self.armed = true;
        info!(
            dataset = %self.config.dataset_name,
            output_path = %self.config.output_path,
            frames_per_container = self.config.chunk_capacity(),
            "Writer started"
        );
        Ok(())
    }

    /// Route, store, and account one frame.
    pub fn submit(&mut self, frame: &FrameMessage) -> Result<WriteReceipt, WriterError> {
        if !self.armed {
            return Err(WriterError::NotStarted);
        }

        let location = chunking::route(frame.frame_index, self.config.chunk_capacity());
        let rollover = self.lifecycle.current_chunk_id() != Some(location.chunk_id);

        let open = self
            .lifecycle
            .ensure_chunk(location.chunk_id, frame, &self.config)?;
        open.ensure_capacity(location.slot)?;
        open.write_frame(location.slot, &frame.data)?;
        open.record_write(location.slot);

        let receipt = WriteReceipt {
            frame_index: frame.frame_index,
            chunk_id: location.chunk_id,
            slot: location.slot,
            container_path: open.path().to_path_buf(),
        };

        debug!(
            frame_index = frame.frame_index,
            slot = location.slot,
            chunk_id = location.chunk_id,
            bytes = frame.data.len(),
            "Frame written"
        );

        if rollover {
            counter!("framestore_container_rollovers_total").increment(1);
        }
        counter!("framestore_frames_written_total").increment(1);
        counter!("framestore_bytes_written_total").increment(frame.data.len() as u64);
        self.frames_written += 1;

        for hook in &self.hooks {
            hook.on_frame_written(&receipt, frame)
                .map_err(|source| WriterError::Hook {
                    name: hook.name().to_string(),
                    source,
                })?;
        }

        Ok(receipt)
    }

    /// Finalize any open container and return to idle. Idempotent.
    pub fn stop(&mut self) -> Result<(), WriterError> {
        let was_armed = self.armed;
        self.lifecycle.close()?;
        self.armed = false;
        if was_armed {
            info!(frames_written = self.frames_written, "Writer stopped");
        }
        Ok(())
    }

    /// Current engine snapshot for the control plane.
    pub fn status(&self) -> WriterStatus {
        let open = self.lifecycle.current();
        WriterStatus {
            armed: self.armed,
            open_chunk_id: open.map(|c| c.chunk_id()),
            container_path: open.map(|c| c.path().to_path_buf()),
            capacity: open.map(|c| c.capacity()),
            frames_written: self.frames_written,
        }
    }

    /// Read access to the writer configuration.
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Mutable access for the control-plane parameter map. Changes apply
    /// from the next container open.
    pub fn config_mut(&mut self) -> &mut WriterConfig {
        &mut self.config
    }
}
