//! Dynamic library loading and symbol resolution
//!
//! Cross-platform dynamic library loading using `libloading`, with
//! platform-specific naming conventions and search paths. Resolved symbols
//! are `SymbolHandle`s: non-owning pointers that keep their library loaded
//! for as long as they live.
//!
//! # Safety
//!
//! Loading a dynamic library executes its initialization code in this
//! process. The caller must ensure the library is trusted.

use crate::error::{InteropError, InteropResult};
use crate::pointer::{Pointer, PointerKind};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded native library
pub struct NativeLibrary {
    name: String,
    path: PathBuf,
    lib: Library,
}

impl NativeLibrary {
    fn load(name: &str, path: PathBuf) -> InteropResult<Self> {
        let lib = unsafe {
            Library::new(&path).map_err(|e| InteropError::LoadFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?
        };
        Ok(NativeLibrary {
            name: name.to_string(),
            path,
            lib,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve an exported name to a symbol handle
    ///
    /// The handle retains this library, keeping it loaded for the handle's
    /// lifetime. Lookup failure signals `SymbolNotFound` rather than
    /// returning a null handle.
    pub fn symbol(self: &Arc<Self>, name: &str) -> InteropResult<SymbolHandle> {
        let addr = unsafe {
            let sym = self.lib.get::<*mut c_void>(name.as_bytes()).map_err(|_| {
                InteropError::SymbolNotFound {
                    library: self.name.clone(),
                    symbol: name.to_string(),
                }
            })?;
            *sym as usize
        };
        Ok(SymbolHandle {
            ptr: Pointer::with_parts(addr, PointerKind::Symbol, None, None),
            library: Arc::clone(self),
            name: name.to_string(),
        })
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeLibrary({} at {})", self.name, self.path.display())
    }
}

/// A resolved exported name inside a loaded library
///
/// Behaves as an ordinary non-owning pointer for every memory operation.
#[derive(Clone)]
pub struct SymbolHandle {
    ptr: Pointer,
    library: Arc<NativeLibrary>,
    name: String,
}

impl SymbolHandle {
    /// Symbol name, kept for diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The library this symbol was resolved from
    pub fn library(&self) -> &Arc<NativeLibrary> {
        &self.library
    }

    /// The symbol's address as a non-owning pointer value
    pub fn pointer(&self) -> Pointer {
        self.ptr
    }
}

impl std::ops::Deref for SymbolHandle {
    type Target = Pointer;

    fn deref(&self) -> &Pointer {
        &self.ptr
    }
}

impl fmt::Debug for SymbolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SymbolHandle('{}' in {} at {})",
            self.name, self.library.name, self.ptr
        )
    }
}

/// Library registry with caching and platform-specific path resolution
pub struct LibraryRegistry {
    /// Cache of loaded libraries by resolved path
    loaded: HashMap<PathBuf, Arc<NativeLibrary>>,
    /// Library search paths, highest priority first
    search_paths: Vec<PathBuf>,
}

impl LibraryRegistry {
    /// Create a registry with the platform's default search paths
    pub fn new() -> Self {
        Self {
            loaded: HashMap::new(),
            search_paths: Self::default_search_paths(),
        }
    }

    /// Get platform-specific default library search paths
    ///
    /// Returns standard system library paths for the current platform:
    /// - Linux: /usr/lib, /usr/local/lib, /lib (plus multiarch and lib64)
    /// - macOS: /usr/lib, /usr/local/lib, /opt/homebrew/lib
    /// - Windows: C:\Windows\System32
    /// - All platforms: current working directory
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // Platform-specific standard paths
        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));

            #[cfg(target_arch = "x86_64")]
            {
                paths.push(PathBuf::from("/usr/lib/x86_64-linux-gnu"));
                paths.push(PathBuf::from("/lib/x86_64-linux-gnu"));
            }
            #[cfg(target_arch = "aarch64")]
            {
                paths.push(PathBuf::from("/usr/lib/aarch64-linux-gnu"));
                paths.push(PathBuf::from("/lib/aarch64-linux-gnu"));
            }

            // Also try lib64 on 64-bit systems
            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            paths.push(PathBuf::from("C:\\Windows\\System32"));
            if let Ok(system_root) = std::env::var("SystemRoot") {
                paths.push(PathBuf::from(format!("{}\\System32", system_root)));
            }
        }

        // Current working directory (highest priority)
        if let Ok(cwd) = std::env::current_dir() {
            paths.insert(0, cwd);
        }

        paths
    }

    /// Resolve a library name to a full path with platform-specific naming
    ///
    /// Handles platform-specific library naming conventions:
    /// - Linux: lib{name}.so
    /// - macOS: lib{name}.dylib or lib{name}.so
    /// - Windows: {name}.dll
    ///
    /// Versioned sonames like `libm.so.6` are matched verbatim in each
    /// search path before the prefix/extension grid is tried.
    fn resolve_library_path(&self, name: &str) -> Option<PathBuf> {
        // If name is already a path, use it directly
        let path = Path::new(name);
        if path.is_absolute() && path.exists() {
            return Some(path.to_path_buf());
        }

        // Platform-specific extensions (in priority order)
        let extensions = if cfg!(target_os = "windows") {
            vec!["dll"]
        } else if cfg!(target_os = "macos") {
            vec!["dylib", "so"]
        } else {
            vec!["so"]
        };

        // Platform-specific prefixes (try both with and without "lib" prefix)
        let prefixes = if cfg!(target_os = "windows") {
            vec!["", "lib"]
        } else {
            vec!["lib", ""]
        };

        for search_path in &self.search_paths {
            let verbatim = search_path.join(name);
            if verbatim.exists() {
                return Some(verbatim);
            }

            for prefix in &prefixes {
                for ext in &extensions {
                    let filename = if prefix.is_empty() {
                        format!("{}.{}", name, ext)
                    } else {
                        format!("{}{}.{}", prefix, name, ext)
                    };

                    let full_path = search_path.join(&filename);
                    if full_path.exists() {
                        return Some(full_path);
                    }
                }
            }
        }

        None
    }

    /// Load a library by name or path
    ///
    /// Returns the cached instance when the name resolves to an already
    /// loaded path. The name can be:
    /// - Short name: "m" -> lib{m}.{ext}
    /// - Versioned soname: "libm.so.6"
    /// - Full path: "/path/to/libfoo.so"
    pub fn open(&mut self, name: &str) -> InteropResult<Arc<NativeLibrary>> {
        match self.resolve_library_path(name) {
            Some(path) => {
                if let Some(lib) = self.loaded.get(&path) {
                    return Ok(Arc::clone(lib));
                }
                let lib = Arc::new(NativeLibrary::load(name, path.clone())?);
                self.loaded.insert(path, Arc::clone(&lib));
                Ok(lib)
            }
            // Nothing on disk under our search paths. Hand the name to the
            // platform loader, which also consults its own cache of
            // versioned sonames.
            None => {
                let key = PathBuf::from(name);
                if let Some(lib) = self.loaded.get(&key) {
                    return Ok(Arc::clone(lib));
                }
                let lib = NativeLibrary::load(name, key.clone())
                    .map_err(|_| InteropError::LibraryNotFound(name.to_string()))?;
                let lib = Arc::new(lib);
                self.loaded.insert(key, Arc::clone(&lib));
                Ok(lib)
            }
        }
    }

    /// Add a custom search path (prepended to the search list)
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    /// Get the number of loaded libraries
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_math(registry: &mut LibraryRegistry) -> Option<Arc<NativeLibrary>> {
        for name in ["libm.so.6", "m", "libSystem.B.dylib"] {
            if let Ok(lib) = registry.open(name) {
                return Some(lib);
            }
        }
        None
    }

    #[test]
    fn test_default_search_paths_not_empty() {
        let paths = LibraryRegistry::default_search_paths();
        assert!(!paths.is_empty());

        // Current directory should be first
        if let Ok(cwd) = std::env::current_dir() {
            assert_eq!(paths[0], cwd);
        }
    }

    #[test]
    fn test_platform_specific_paths() {
        let paths = LibraryRegistry::default_search_paths();

        #[cfg(target_os = "linux")]
        {
            assert!(paths.iter().any(|p| p == Path::new("/usr/lib")));
        }

        #[cfg(target_os = "macos")]
        {
            assert!(paths.iter().any(|p| p == Path::new("/usr/lib")));
        }

        #[cfg(target_os = "windows")]
        {
            assert!(paths
                .iter()
                .any(|p| p.to_str().unwrap().contains("System32")));
        }
    }

    #[test]
    fn test_library_not_found() {
        let mut registry = LibraryRegistry::new();
        let result = registry.open("nonexistent_library_xyz");
        assert!(matches!(result, Err(InteropError::LibraryNotFound(_))));
    }

    #[test]
    fn test_add_custom_search_path() {
        let mut registry = LibraryRegistry::new();
        let custom_path = PathBuf::from("/custom/path");
        registry.add_search_path(custom_path.clone());

        // Custom path should be first
        assert_eq!(registry.search_paths[0], custom_path);
    }

    #[test]
    fn test_open_and_resolve_symbol() {
        let mut registry = LibraryRegistry::new();
        let lib = match open_math(&mut registry) {
            Some(lib) => lib,
            None => return, // no math library on this host
        };

        let handle = lib.symbol("sin").unwrap();
        assert!(!handle.is_null());
        assert_eq!(handle.kind(), PointerKind::Symbol);
        assert_eq!(handle.name(), "sin");

        let missing = lib.symbol("definitely_not_a_symbol_xyz");
        assert!(matches!(
            missing,
            Err(InteropError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn test_open_caches_by_resolved_path() {
        let mut registry = LibraryRegistry::new();
        let first = match open_math(&mut registry) {
            Some(lib) => lib,
            None => return,
        };
        let count = registry.loaded_count();

        let second = registry.open(first.name()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.loaded_count(), count);
    }
}
