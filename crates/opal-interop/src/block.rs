//! Owned memory blocks
//!
//! `MemoryBlock` is the allocating, owning subtype of `Pointer`. Release is
//! tied to an explicit `free`, to scope exit through `with`, or to `Drop`
//! as the autorelease backstop.

use crate::access;
use crate::alloc::{default_allocator, Allocator};
use crate::error::{InteropError, InteropResult};
use crate::pointer::{Pointer, PointerKind};
use crate::registry::{self, NativeType, TypeInfo, TypeRegistry, TypeTag};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static AUTORELEASE_DEFAULT: AtomicBool = AtomicBool::new(true);

/// Set whether unscoped allocations carry the autorelease flag by default
pub fn set_autorelease_default(enabled: bool) {
    AUTORELEASE_DEFAULT.store(enabled, Ordering::Relaxed);
}

/// Current default for the autorelease flag on unscoped allocations
pub fn autorelease_default() -> bool {
    AUTORELEASE_DEFAULT.load(Ordering::Relaxed)
}

/// Anything that can state its own byte size
pub trait ByteSized {
    fn byte_size(&self) -> usize;
}

impl ByteSized for TypeTag {
    fn byte_size(&self) -> usize {
        TypeTag::byte_size(self)
    }
}

impl ByteSized for TypeInfo {
    fn byte_size(&self) -> usize {
        self.size
    }
}

impl ByteSized for MemoryBlock {
    fn byte_size(&self) -> usize {
        self.total
    }
}

/// Per-element size specification for allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeSpec {
    /// A literal byte count
    Bytes(usize),
    /// A scalar tag's size
    Typed(TypeTag),
    /// A symbolic name resolved through a type registry
    Named(String),
}

impl SizeSpec {
    /// Size of an object exposing its own byte size
    pub fn of(sized: &dyn ByteSized) -> SizeSpec {
        SizeSpec::Bytes(sized.byte_size())
    }

    fn resolve(&self, registry: &TypeRegistry) -> InteropResult<(usize, Option<TypeTag>)> {
        match self {
            SizeSpec::Bytes(n) => Ok((*n, None)),
            SizeSpec::Typed(tag) => Ok((tag.byte_size(), Some(*tag))),
            SizeSpec::Named(name) => {
                let info = registry.resolve(name)?;
                let tag = match info.native {
                    NativeType::Scalar(tag) => Some(tag),
                    NativeType::Opaque => None,
                };
                Ok((info.size, tag))
            }
        }
    }
}

impl From<usize> for SizeSpec {
    fn from(n: usize) -> Self {
        SizeSpec::Bytes(n)
    }
}

impl From<TypeTag> for SizeSpec {
    fn from(tag: TypeTag) -> Self {
        SizeSpec::Typed(tag)
    }
}

impl From<&str> for SizeSpec {
    fn from(name: &str) -> Self {
        SizeSpec::Named(name.to_string())
    }
}

impl From<String> for SizeSpec {
    fn from(name: String) -> Self {
        SizeSpec::Named(name)
    }
}

/// Allocating, owning fat pointer
///
/// Sole owner of its region. Unscoped allocations carry the autorelease
/// flag, making `Drop` the backstop release if the caller never frees
/// explicitly; `free` is the deterministic path and is idempotent. The
/// drop path performs nothing but the allocator free.
pub struct MemoryBlock {
    ptr: Pointer,
    total: usize,
    elem_size: Option<usize>,
    autorelease: bool,
    alloc: Arc<dyn Allocator>,
}

impl MemoryBlock {
    /// Allocate a single element of `spec` size, zero-filled
    pub fn alloc(spec: impl Into<SizeSpec>) -> InteropResult<MemoryBlock> {
        Self::alloc_count(spec, 1)
    }

    /// Allocate `count` elements of `spec` size, zero-filled
    pub fn alloc_count(spec: impl Into<SizeSpec>, count: usize) -> InteropResult<MemoryBlock> {
        Self::alloc_in(default_allocator(), registry::standard(), spec, count, true)
    }

    /// Allocate without the zero fill
    pub fn alloc_uninit(spec: impl Into<SizeSpec>, count: usize) -> InteropResult<MemoryBlock> {
        Self::alloc_in(default_allocator(), registry::standard(), spec, count, false)
    }

    /// Full allocation form: explicit allocator, registry and zero-fill
    /// choice
    ///
    /// `total = per-element size * count`; a zero count or a zero element
    /// size is a construction error.
    pub fn alloc_in(
        alloc: Arc<dyn Allocator>,
        registry: &TypeRegistry,
        spec: impl Into<SizeSpec>,
        count: usize,
        zero: bool,
    ) -> InteropResult<MemoryBlock> {
        if count == 0 {
            return Err(InteropError::InvalidArgument(
                "Element count must be nonzero".to_string(),
            ));
        }
        let (elem_size, elem_tag) = spec.into().resolve(registry)?;
        if elem_size == 0 {
            return Err(InteropError::InvalidArgument(
                "Element size must be nonzero".to_string(),
            ));
        }
        let total = elem_size.checked_mul(count).ok_or_else(|| {
            InteropError::InvalidArgument("Allocation size overflows the address space".to_string())
        })?;

        let addr = alloc.allocate(total)?;
        if zero {
            unsafe { alloc.zero(addr, total) };
        }

        Ok(MemoryBlock {
            ptr: Pointer::with_parts(addr, PointerKind::Block, elem_tag, Some(total)),
            total,
            elem_size: Some(elem_size),
            autorelease: autorelease_default(),
            alloc,
        })
    }

    /// Allocate a NUL-terminated native copy of a string
    pub fn alloc_string(s: &str) -> InteropResult<MemoryBlock> {
        let total = s.len().checked_add(1).ok_or_else(|| {
            InteropError::InvalidArgument("String size overflows the address space".to_string())
        })?;
        let alloc = default_allocator();
        let addr = alloc.allocate(total)?;
        unsafe {
            access::write_bytes(addr, s.as_bytes());
            access::write::<u8>(addr + s.len(), 0);
        }
        Ok(MemoryBlock {
            ptr: Pointer::with_parts(addr, PointerKind::Block, Some(TypeTag::Int8), Some(total)),
            total,
            elem_size: Some(1),
            autorelease: autorelease_default(),
            alloc,
        })
    }

    /// Adopt ownership of an externally allocated region
    ///
    /// The element size is left unset, so indexed access is unavailable on
    /// an adopted block.
    ///
    /// # Safety
    ///
    /// `addr` must be the start of a live allocation of at least `total`
    /// bytes obtained from the default allocator, and nothing else may
    /// release it.
    pub unsafe fn adopt_raw(addr: usize, total: usize) -> InteropResult<MemoryBlock> {
        if addr == 0 {
            return Err(InteropError::NullPointer);
        }
        if total == 0 {
            return Err(InteropError::InvalidArgument(
                "Adopted extent must be nonzero".to_string(),
            ));
        }
        Ok(MemoryBlock {
            ptr: Pointer::with_parts(addr, PointerKind::Block, None, Some(total)),
            total,
            elem_size: None,
            autorelease: autorelease_default(),
            alloc: default_allocator(),
        })
    }

    /// Scoped allocation: hand a fresh zero-filled block to `f`, release on
    /// every exit path, return its result
    pub fn with<R>(
        spec: impl Into<SizeSpec>,
        count: usize,
        f: impl FnOnce(&mut MemoryBlock) -> InteropResult<R>,
    ) -> InteropResult<R> {
        Self::with_in(default_allocator(), registry::standard(), spec, count, f)
    }

    /// Scoped allocation with an explicit allocator and registry
    pub fn with_in<R>(
        alloc: Arc<dyn Allocator>,
        registry: &TypeRegistry,
        spec: impl Into<SizeSpec>,
        count: usize,
        f: impl FnOnce(&mut MemoryBlock) -> InteropResult<R>,
    ) -> InteropResult<R> {
        let mut block = Self::alloc_in(alloc, registry, spec, count, true)?;
        // A panic in `f` releases through Drop; the backstop stays armed
        // here regardless of the process-wide default
        block.set_autorelease(true);
        let result = f(&mut block);
        // Release on the normal and the error path
        block.free();
        result
    }

    /// Release the block
    ///
    /// Idempotent: clears autorelease and releases via the allocator at
    /// most once. A no-op on an address that is already null.
    pub fn free(&mut self) {
        self.autorelease = false;
        let addr = self.ptr.address();
        if addr == 0 {
            return;
        }
        self.ptr.set_address(0);
        unsafe { self.alloc.free(addr) };
    }

    /// Disable release entirely and hand back the raw pointer
    ///
    /// The caller owns the region afterwards.
    pub fn leak(mut self) -> Pointer {
        self.autorelease = false;
        Pointer::with_parts(
            self.ptr.address(),
            PointerKind::Raw,
            self.ptr.element_type(),
            Some(self.total),
        )
    }

    /// Duplicate into an independently owned block
    ///
    /// Byte-for-byte copy of the contents; no aliasing with the source
    /// afterwards.
    pub fn copy(&self) -> InteropResult<MemoryBlock> {
        if self.ptr.is_null() {
            return Err(InteropError::NullPointer);
        }
        let addr = self.alloc.allocate(self.total)?;
        unsafe { self.alloc.copy_bytes(addr, self.ptr.address(), self.total) };
        Ok(MemoryBlock {
            ptr: Pointer::with_parts(
                addr,
                PointerKind::Block,
                self.ptr.element_type(),
                Some(self.total),
            ),
            total: self.total,
            elem_size: self.elem_size,
            autorelease: autorelease_default(),
            alloc: self.alloc.clone(),
        })
    }

    /// Pointer to element `n` (`n` may be negative)
    ///
    /// Requires the per-element size to be known.
    pub fn at(&self, n: isize) -> InteropResult<Pointer> {
        let elem = self.elem_size.ok_or(InteropError::ElementSizeUnknown)?;
        Ok(self.ptr.offset(n.wrapping_mul(elem as isize)))
    }

    /// Total allocated bytes
    pub fn total(&self) -> usize {
        self.total
    }

    /// Per-element size, when established at allocation
    pub fn elem_size(&self) -> Option<usize> {
        self.elem_size
    }

    pub fn autorelease(&self) -> bool {
        self.autorelease
    }

    pub fn set_autorelease(&mut self, enabled: bool) {
        self.autorelease = enabled;
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.alloc
    }

    /// The block's base as a non-owning pointer value
    pub fn pointer(&self) -> Pointer {
        self.ptr
    }
}

impl Deref for MemoryBlock {
    type Target = Pointer;

    fn deref(&self) -> &Pointer {
        &self.ptr
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        if self.autorelease && !self.ptr.is_null() {
            unsafe { self.alloc.free(self.ptr.address()) };
        }
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryBlock(addr={}, total={}, elem_size={:?}, autorelease={})",
            self.ptr, self.total, self.elem_size, self.autorelease
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::TrackingAllocator;
    use crate::value::Value;

    fn tracking() -> Arc<TrackingAllocator> {
        Arc::new(TrackingAllocator::system())
    }

    #[test]
    fn test_alloc_zero_filled() {
        let block = MemoryBlock::alloc(32usize).unwrap();
        assert_eq!(block.total(), 32);
        assert_eq!(block.read_bytes(0, 32).unwrap(), vec![0u8; 32]);
    }

    #[test]
    fn test_alloc_typed_and_named() {
        let block = MemoryBlock::alloc_count(TypeTag::Int32, 4).unwrap();
        assert_eq!(block.total(), 16);
        assert_eq!(block.elem_size(), Some(4));
        assert_eq!(block.element_type(), Some(TypeTag::Int32));

        let block = MemoryBlock::alloc_count("float64", 2).unwrap();
        assert_eq!(block.total(), 16);
        assert_eq!(block.elem_size(), Some(8));
    }

    #[test]
    fn test_alloc_unknown_type_name() {
        assert!(matches!(
            MemoryBlock::alloc("no_such_type"),
            Err(InteropError::UnknownType(_))
        ));
    }

    #[test]
    fn test_alloc_rejects_zero_sizes() {
        assert!(matches!(
            MemoryBlock::alloc_count(8usize, 0),
            Err(InteropError::InvalidArgument(_))
        ));
        assert!(matches!(
            MemoryBlock::alloc(0usize),
            Err(InteropError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_indexed_access_addresses() {
        let block = MemoryBlock::alloc_count(TypeTag::Int32, 4).unwrap();
        let base = block.address();

        assert_eq!(block.at(0).unwrap().address(), base);
        assert_eq!(block.at(1).unwrap().address(), base + 4);
        assert_eq!(block.at(-1).unwrap().address(), base - 4);
        assert_eq!(block.at(2).unwrap().kind(), PointerKind::Raw);
    }

    #[test]
    fn test_indexed_access_without_elem_size() {
        let backing = MemoryBlock::alloc(16usize).unwrap();
        let mut adopted = unsafe { MemoryBlock::adopt_raw(backing.address(), 16).unwrap() };
        assert!(matches!(adopted.at(0), Err(InteropError::ElementSizeUnknown)));

        // Ownership stays with `backing`
        adopted.set_autorelease(false);
    }

    #[test]
    fn test_free_idempotent() {
        let tracker = tracking();
        let mut block = MemoryBlock::alloc_in(
            tracker.clone(),
            registry::standard(),
            8usize,
            1,
            true,
        )
        .unwrap();

        block.free();
        block.free();
        block.free();
        assert_eq!(tracker.release_count(), 1);
        assert!(block.is_null());
        assert!(!block.autorelease());
    }

    #[test]
    fn test_drop_releases_once_after_free() {
        let tracker = tracking();
        {
            let mut block = MemoryBlock::alloc_in(
                tracker.clone(),
                registry::standard(),
                8usize,
                1,
                true,
            )
            .unwrap();
            block.free();
        }
        assert_eq!(tracker.release_count(), 1);
    }

    #[test]
    fn test_drop_is_backstop() {
        let tracker = tracking();
        {
            let _block = MemoryBlock::alloc_in(
                tracker.clone(),
                registry::standard(),
                24usize,
                1,
                true,
            )
            .unwrap();
            assert_eq!(tracker.live_count(), 1);
        }
        assert_eq!(tracker.release_count(), 1);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_leak_detaches_ownership() {
        let tracker = tracking();
        let leaked = {
            let block = MemoryBlock::alloc_in(
                tracker.clone(),
                registry::standard(),
                TypeTag::Int64,
                2,
                true,
            )
            .unwrap();
            block.leak()
        };
        assert_eq!(tracker.release_count(), 0);
        assert!(tracker.is_live(leaked.address()));
        assert_eq!(leaked.extent(), Some(16));
        assert_eq!(leaked.element_type(), Some(TypeTag::Int64));

        unsafe { tracker.free(leaked.address()) };
    }

    #[test]
    fn test_copy_independence() {
        let block = MemoryBlock::alloc(8usize).unwrap();
        block.write_i64(0, 0x1111_2222_3333_4444).unwrap();

        let dup = block.copy().unwrap();
        assert_ne!(dup.address(), block.address());
        assert_eq!(dup.read_i64(0).unwrap(), 0x1111_2222_3333_4444);

        block.write_i64(0, -1).unwrap();
        assert_eq!(dup.read_i64(0).unwrap(), 0x1111_2222_3333_4444);
    }

    #[test]
    fn test_with_releases_on_success() {
        let tracker = tracking();
        let result = MemoryBlock::with_in(
            tracker.clone(),
            registry::standard(),
            TypeTag::Int32,
            1,
            |block| {
                block.write_i32(0, 99)?;
                block.read_i32(0)
            },
        )
        .unwrap();

        assert_eq!(result, 99);
        assert_eq!(tracker.release_count(), 1);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_with_releases_on_error() {
        let tracker = tracking();
        let result: InteropResult<()> = MemoryBlock::with_in(
            tracker.clone(),
            registry::standard(),
            TypeTag::Int32,
            1,
            |_| Err(InteropError::InvalidArgument("boom".to_string())),
        );

        assert!(result.is_err());
        assert_eq!(tracker.release_count(), 1);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_alloc_string() {
        let block = MemoryBlock::alloc_string("opal").unwrap();
        assert_eq!(block.total(), 5);
        assert_eq!(block.read_cstring(0).unwrap(), "opal");
    }

    #[test]
    fn test_deref_gives_pointer_ops() {
        let block = MemoryBlock::alloc_count(TypeTag::Int16, 3).unwrap();
        block
            .write_array(
                TypeTag::Int16,
                &[Value::Int(7), Value::Int(8), Value::Int(9)],
            )
            .unwrap();
        assert_eq!(block.read_at(TypeTag::Int16, 2).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_size_spec_of() {
        let block = MemoryBlock::alloc(16usize).unwrap();
        assert_eq!(SizeSpec::of(&block), SizeSpec::Bytes(16));
        assert_eq!(SizeSpec::of(&TypeTag::Float64), SizeSpec::Bytes(8));
    }
}
