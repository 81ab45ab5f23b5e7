//! Opal native interop layer
//!
//! This library provides the runtime's bridge to native code:
//! - Fat pointers with typed accessors over raw memory
//! - Owned memory blocks with scoped and drop-driven release
//! - Dynamic library loading and symbol resolution
//! - Native callables in both call directions

/// Interop layer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod access;
pub mod alloc;
pub mod block;
pub mod callable;
pub mod error;
pub mod library;
pub mod marshal;
pub mod namespace;
pub mod pointer;
pub mod registry;
pub mod value;

// All libffi and ABI logic stays behind this module
mod bridge;

// Re-export commonly used types
pub use alloc::{default_allocator, Allocator, SystemAllocator, TrackingAllocator};
pub use block::{MemoryBlock, SizeSpec};
pub use callable::{CallTarget, NativeCallable, Signature};
pub use error::{InteropError, InteropResult};
pub use library::{LibraryRegistry, NativeLibrary, SymbolHandle};
pub use marshal::MarshalContext;
pub use namespace::Namespace;
pub use pointer::{Pointer, PointerKind};
pub use registry::{NativeType, NativeValue, TypeInfo, TypeRegistry, TypeTag};
pub use value::{ManagedFn, Shared, Value};

/// Apply interop settings from a loaded configuration
///
/// Sets the process-wide bounds-checking and autorelease defaults and
/// returns a library registry with the configured search paths prepended.
pub fn apply_config(config: &opal_config::InteropConfig) -> LibraryRegistry {
    access::set_bounds_checking(config.bounds_check_mode().is_checked());
    block::set_autorelease_default(config.autorelease_enabled());

    let mut registry = LibraryRegistry::new();
    for path in &config.library_paths {
        registry.add_search_path(path.clone());
    }
    registry
}
