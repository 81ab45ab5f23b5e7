//! Interop errors
//!
//! Central error type for the native interop layer. Variants fall into the
//! four families the subsystem distinguishes: construction errors (malformed
//! arguments, rejected before any native binding), primitive failures (a
//! native accessor or call could not complete), invalid-state errors, and
//! lookup errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the native interop layer
#[derive(Error, Debug)]
pub enum InteropError {
    // Construction errors
    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Callable binding requires exactly one of a native target or a managed function")]
    Binding,

    #[error("Expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Unsupported signature: {0}")]
    UnsupportedSignature(String),

    // Primitive failures
    #[error("Native primitive failed: {0}")]
    PrimitiveFailed(String),

    #[error("Number {value} out of range for {target}")]
    OutOfRange { value: String, target: &'static str },

    #[error("Invalid string: {0}")]
    InvalidString(String),

    #[error("Null pointer")]
    NullPointer,

    // Invalid state
    #[error("Per-element size was never established for this block")]
    ElementSizeUnknown,

    #[error("Access of {len} bytes at offset {offset} exceeds extent {extent}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        extent: usize,
    },

    // Lookup errors
    #[error("Unknown type name: {0}")]
    UnknownType(String),

    #[error("Library not found: {0}")]
    LibraryNotFound(String),

    #[error("Failed to load library {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Symbol '{symbol}' not found in {library}")]
    SymbolNotFound { library: String, symbol: String },

    #[error("No entry named '{name}' in namespace '{namespace}'")]
    UnknownEntry { namespace: String, name: String },
}

/// Result type for interop operations
pub type InteropResult<T> = Result<T, InteropError>;
