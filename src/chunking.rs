//! Routing of global frame indices to container chunks.

/// Target location of a frame: which container chunk it belongs to and the
/// slot it occupies inside that container's dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// 0 when chunking is disabled, otherwise the 1-based chunk number.
    pub chunk_id: u64,
    /// Slot index relative to the chunk's dataset.
    pub slot: u64,
}

/// Map a global frame index to its container chunk and relative slot.
///
/// With chunking disabled (`frames_per_container` of `None` or zero) every
/// frame lands in chunk 0 at its own index. With a chunk capacity `C` the
/// chunk number is `frame_index / C + 1` and the slot is `frame_index % C`,
/// so slots always satisfy `slot < C`.
pub fn route(frame_index: u64, frames_per_container: Option<u64>) -> ChunkLocation {
    match frames_per_container {
        Some(capacity) if capacity > 0 => ChunkLocation {
            chunk_id: frame_index / capacity + 1,
            slot: frame_index % capacity,
        },
        _ => ChunkLocation {
            chunk_id: 0,
            slot: frame_index,
        },
    }
}
