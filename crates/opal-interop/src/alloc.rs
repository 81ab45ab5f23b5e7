//! Native allocator interface
//!
//! The allocation collaborator behind owned memory blocks. `SystemAllocator`
//! is the C heap; `TrackingAllocator` wraps any allocator with bookkeeping
//! so embedders and tests can observe exactly when native memory comes and
//! goes.

use crate::access;
use crate::error::{InteropError, InteropResult};
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, Mutex, OnceLock};

/// Native allocation surface
///
/// `free`, `zero` and `copy_bytes` are unsafe for the same reason the raw
/// accessors are: the addresses must designate valid memory of sufficient
/// size.
pub trait Allocator: Send + Sync {
    /// Request `len` bytes; `len` must be nonzero
    fn allocate(&self, len: usize) -> InteropResult<usize>;

    /// Release an allocation obtained from this allocator
    ///
    /// # Safety
    ///
    /// `addr` must be an address previously returned by `allocate` on this
    /// allocator and not yet freed, or zero (ignored).
    unsafe fn free(&self, addr: usize);

    /// # Safety
    ///
    /// `addr` must be valid for writes of `len` bytes.
    unsafe fn zero(&self, addr: usize, len: usize);

    /// # Safety
    ///
    /// Both ranges must be valid for `len` bytes.
    unsafe fn copy_bytes(&self, dst: usize, src: usize, len: usize);
}

/// Allocator backed by the C heap
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate(&self, len: usize) -> InteropResult<usize> {
        if len == 0 {
            return Err(InteropError::InvalidArgument(
                "Allocation size must be nonzero".to_string(),
            ));
        }
        let ptr = unsafe { libc::malloc(len) };
        if ptr.is_null() {
            return Err(InteropError::PrimitiveFailed(format!(
                "Allocation of {} bytes failed",
                len
            )));
        }
        Ok(ptr as usize)
    }

    unsafe fn free(&self, addr: usize) {
        if addr != 0 {
            libc::free(addr as *mut c_void);
        }
    }

    unsafe fn zero(&self, addr: usize, len: usize) {
        access::fill_bytes(addr, 0, len);
    }

    unsafe fn copy_bytes(&self, dst: usize, src: usize, len: usize) {
        access::copy_bytes(src, dst, len);
    }
}

/// Process-wide default allocator
pub fn default_allocator() -> Arc<dyn Allocator> {
    static DEFAULT: OnceLock<Arc<dyn Allocator>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(SystemAllocator)).clone()
}

#[derive(Default)]
struct TrackState {
    live: HashMap<usize, usize>,
    allocations: usize,
    releases: usize,
}

/// Bookkeeping wrapper around another allocator
///
/// Records every allocation and release and keeps the live set. A free of
/// an address that is not live is dropped instead of reaching the inner
/// allocator, so release-at-most-once is observable rather than undefined.
pub struct TrackingAllocator {
    inner: Arc<dyn Allocator>,
    state: Mutex<TrackState>,
}

impl TrackingAllocator {
    pub fn new(inner: Arc<dyn Allocator>) -> Self {
        TrackingAllocator {
            inner,
            state: Mutex::new(TrackState::default()),
        }
    }

    /// Tracking wrapper around the C heap
    pub fn system() -> Self {
        TrackingAllocator::new(Arc::new(SystemAllocator))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TrackState> {
        self.state.lock().expect("TrackingAllocator lock poisoned")
    }

    /// Total allocations performed
    pub fn allocation_count(&self) -> usize {
        self.state().allocations
    }

    /// Total releases forwarded to the inner allocator
    pub fn release_count(&self) -> usize {
        self.state().releases
    }

    /// Number of allocations not yet released
    pub fn live_count(&self) -> usize {
        self.state().live.len()
    }

    /// Bytes currently allocated and not released
    pub fn live_bytes(&self) -> usize {
        self.state().live.values().sum()
    }

    pub fn is_live(&self, addr: usize) -> bool {
        self.state().live.contains_key(&addr)
    }
}

impl Allocator for TrackingAllocator {
    fn allocate(&self, len: usize) -> InteropResult<usize> {
        let addr = self.inner.allocate(len)?;
        let mut state = self.state();
        state.live.insert(addr, len);
        state.allocations += 1;
        Ok(addr)
    }

    unsafe fn free(&self, addr: usize) {
        if addr == 0 {
            return;
        }
        let mut state = self.state();
        if state.live.remove(&addr).is_none() {
            // Not live: double free or foreign address. Swallow it.
            return;
        }
        state.releases += 1;
        drop(state);
        self.inner.free(addr);
    }

    unsafe fn zero(&self, addr: usize, len: usize) {
        self.inner.zero(addr, len);
    }

    unsafe fn copy_bytes(&self, dst: usize, src: usize, len: usize) {
        self.inner.copy_bytes(dst, src, len);
    }
}
