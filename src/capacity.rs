//! Slot capacity and occupancy tracking for the open container.

use crate::backend::{Container, StorageResult};
use tracing::debug;

/// Tracks the slot capacity of the open dataset and the range of slots
/// actually written, so the container can be compacted on close.
#[derive(Debug)]
pub struct CapacityTracker {
    capacity: u64,
    /// Upper bound on growth when chunking is enabled; a chunk never needs
    /// more slots than the configured frames per container.
    chunk_limit: Option<u64>,
    min_written: Option<u64>,
    max_written: Option<u64>,
}

impl CapacityTracker {
    /// Create a tracker for a dataset with the given initial capacity.
    pub fn new(initial_capacity: u64, chunk_limit: Option<u64>) -> Self {
        Self {
            capacity: initial_capacity,
            chunk_limit,
            min_written: None,
            max_written: None,
        }
    }

    /// Current slot capacity of the dataset.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Inclusive (min, max) range of slots written so far, if any.
    pub fn written_range(&self) -> Option<(u64, u64)> {
        match (self.min_written, self.max_written) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    /// Grow the dataset so that `slot` fits, if it does not already.
    ///
    /// Growth doubles the current capacity (clamped to the chunk limit) and
    /// never shrinks. Returns the capacity in effect afterwards. Must be
    /// called before the corresponding `write_chunk`.
    pub fn ensure(&mut self, container: &mut dyn Container, slot: u64) -> StorageResult<u64> {
        if slot < self.capacity {
            return Ok(self.capacity);
        }

        let mut target = self.capacity.saturating_mul(2).max(slot + 1);
        if let Some(limit) = self.chunk_limit {
            target = target.min(limit).max(slot + 1);
        }

        let actual = container.resize(target)?;
        debug!(
            requested = target,
            actual = actual,
            slot = slot,
            "Dataset capacity grown"
        );
        self.capacity = actual;
        Ok(self.capacity)
    }

    /// Record a successful write at `slot`.
    pub fn record_write(&mut self, slot: u64) {
        self.min_written = Some(self.min_written.map_or(slot, |min| min.min(slot)));
        self.max_written = Some(self.max_written.map_or(slot, |max| max.max(slot)));
    }

    /// Resize the dataset down to exactly the highest written slot plus one.
    ///
    /// A no-op when nothing was written; the dataset keeps its initial
    /// allocation in that case.
    pub fn shrink_to_fit(&mut self, container: &mut dyn Container) -> StorageResult<()> {
        if let Some(max) = self.max_written {
            let actual = container.resize(max + 1)?;
            debug!(capacity = actual, "Dataset compacted");
            self.capacity = actual;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ContainerStore, DatasetSpec};
    use crate::frame::{FrameShape, PixelType};
    use crate::mem_backend::MemoryStore;
    use std::path::Path;

    fn create_test_container(
        store: &MemoryStore,
        initial_capacity: u64,
    ) -> Box<dyn crate::backend::Container> {
        let spec = DatasetSpec {
            name: "data".to_string(),
            shape: FrameShape::new(4, 4),
            pixel_type: PixelType::UInt16,
            compression: None,
            initial_capacity,
        };
        store.create(Path::new("test.container"), &spec).unwrap()
    }

    #[test]
    fn test_ensure_is_noop_below_capacity() {
        let store = MemoryStore::new();
        let mut container = create_test_container(&store, 4);
        let mut tracker = CapacityTracker::new(4, None);

        assert_eq!(tracker.ensure(container.as_mut(), 3).unwrap(), 4);
        assert_eq!(tracker.capacity(), 4);
    }

    #[test]
    fn test_ensure_grows_by_doubling() {
        let store = MemoryStore::new();
        let mut container = create_test_container(&store, 1);
        let mut tracker = CapacityTracker::new(1, None);

        // Slot 1 doubles 1 -> 2.
        assert_eq!(tracker.ensure(container.as_mut(), 1).unwrap(), 2);
        // Slot 9 requires 10, doubling only reaches 4.
        assert_eq!(tracker.ensure(container.as_mut(), 9).unwrap(), 10);
    }

    #[test]
    fn test_ensure_never_shrinks() {
        let store = MemoryStore::new();
        let mut container = create_test_container(&store, 1);
        let mut tracker = CapacityTracker::new(1, None);

        tracker.ensure(container.as_mut(), 9).unwrap();
        let grown = tracker.capacity();
        assert_eq!(tracker.ensure(container.as_mut(), 0).unwrap(), grown);
        assert_eq!(tracker.ensure(container.as_mut(), 5).unwrap(), grown);
    }

    #[test]
    fn test_growth_clamped_to_chunk_limit() {
        let store = MemoryStore::new();
        let mut container = create_test_container(&store, 1);
        let mut tracker = CapacityTracker::new(1, Some(8));

        // Doubling from 1 would give 2; slot 6 needs 7, limit caps at 8.
        assert_eq!(tracker.ensure(container.as_mut(), 6).unwrap(), 7);
        assert_eq!(tracker.ensure(container.as_mut(), 7).unwrap(), 8);
    }

    #[test]
    fn test_written_range_tracking() {
        let mut tracker = CapacityTracker::new(16, None);
        assert_eq!(tracker.written_range(), None);

        tracker.record_write(5);
        tracker.record_write(0);
        tracker.record_write(9);
        tracker.record_write(3);
        assert_eq!(tracker.written_range(), Some((0, 9)));
    }

    #[test]
    fn test_shrink_to_fit() {
        let store = MemoryStore::new();
        let mut container = create_test_container(&store, 1);
        let mut tracker = CapacityTracker::new(1, None);

        for slot in [0, 5, 3, 9] {
            tracker.ensure(container.as_mut(), slot).unwrap();
            container.write_chunk(slot, b"payload").unwrap();
            tracker.record_write(slot);
        }

        tracker.shrink_to_fit(container.as_mut()).unwrap();
        assert_eq!(tracker.capacity(), 10);
        assert_eq!(container.capacity(), 10);
    }

    #[test]
    fn test_shrink_to_fit_without_writes_is_noop() {
        let store = MemoryStore::new();
        let mut container = create_test_container(&store, 4);
        let mut tracker = CapacityTracker::new(4, None);

        tracker.shrink_to_fit(container.as_mut()).unwrap();
        assert_eq!(tracker.capacity(), 4);
        assert_eq!(container.capacity(), 4);
    }
}
