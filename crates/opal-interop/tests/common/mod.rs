//! Shared test utilities
//!
//! Helpers for the interop integration tests: a tracking allocator for
//! release-count assertions and a scratch block factory.

use opal_interop::{MemoryBlock, TrackingAllocator, TypeTag};
use std::sync::Arc;

// Re-export testing utilities
pub use pretty_assertions::{assert_eq, assert_ne};

/// A tracking allocator wrapped around the system allocator.
///
/// # Example
/// ```
/// let tracker = tracking();
/// assert_eq!(tracker.live_count(), 0);
/// ```
pub fn tracking() -> Arc<TrackingAllocator> {
    Arc::new(TrackingAllocator::system())
}

/// Allocate a zero-filled byte block of the given length.
pub fn scratch(len: usize) -> MemoryBlock {
    MemoryBlock::alloc_count(TypeTag::UInt8, len).expect("scratch allocation failed")
}
