//! Library loading and symbol resolution tests
//!
//! The math library lookup is skipped quietly on hosts that carry none
//! of the candidate names.

use opal_interop::{InteropError, LibraryRegistry, NativeLibrary, PointerKind};
use std::sync::Arc;

fn open_math(registry: &mut LibraryRegistry) -> Option<Arc<NativeLibrary>> {
    ["libm.so.6", "m", "libSystem.B.dylib"]
        .iter()
        .find_map(|name| registry.open(name).ok())
}

#[test]
fn test_missing_library() {
    let mut registry = LibraryRegistry::new();
    assert!(matches!(
        registry.open("definitely_not_a_real_library_name"),
        Err(InteropError::LibraryNotFound(_))
    ));
}

#[test]
fn test_symbol_resolution() {
    let mut registry = LibraryRegistry::new();
    let lib = match open_math(&mut registry) {
        Some(lib) => lib,
        None => return,
    };

    let cos = lib.symbol("cos").unwrap();
    assert!(!cos.is_null());
    assert_eq!(cos.kind(), PointerKind::Symbol);
    assert_eq!(cos.name(), "cos");
    assert_eq!(cos.library().name(), lib.name());

    assert!(matches!(
        lib.symbol("nothing_exports_this_name"),
        Err(InteropError::SymbolNotFound { .. })
    ));
}

#[test]
fn test_symbol_keeps_library_alive() {
    let mut registry = LibraryRegistry::new();
    let lib = match open_math(&mut registry) {
        Some(lib) => lib,
        None => return,
    };

    let sin = lib.symbol("sin").unwrap();
    drop(registry);
    drop(lib);

    // The handle still pins the library mapping
    assert!(!sin.is_null());
    assert_eq!(sin.name(), "sin");
    let f: extern "C" fn(f64) -> f64 = unsafe { std::mem::transmute(sin.address()) };
    assert_eq!(f(0.0), 0.0);
}

#[test]
fn test_open_caches_per_resolved_path() {
    let mut registry = LibraryRegistry::new();
    let first = match open_math(&mut registry) {
        Some(lib) => lib,
        None => return,
    };

    let second = registry.open(first.name()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.loaded_count(), 1);
}

#[cfg(unix)]
#[test]
fn test_custom_search_path_wins_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let phony = dir.path().join("libphony.so");
    std::fs::write(&phony, b"not a shared object").unwrap();

    let mut registry = LibraryRegistry::new();
    registry.add_search_path(dir.path().to_path_buf());

    // Resolution finds the file; the loader then rejects it
    match registry.open("phony") {
        Err(InteropError::LoadFailed { path, .. }) => assert_eq!(path, phony),
        other => panic!("Expected LoadFailed, got {:?}", other),
    }
    assert_eq!(registry.loaded_count(), 0);
}
