//! Interop type system
//!
//! Defines:
//! - `TypeTag`: the closed set of scalar types crossing the native boundary
//! - `NativeValue`: runtime representation of native values during marshaling
//! - `TypeRegistry`: symbolic type name → (byte size, native descriptor)
//!
//! Type mapping:
//! - TypeTag::Int32 → NativeValue::I32(i32)
//! - TypeTag::Long → NativeValue::Long(c_long)
//! - TypeTag::Float64 → NativeValue::F64(f64)
//! - TypeTag::CString → NativeValue::CStr(*const c_char)
//! - TypeTag::Pointer → NativeValue::Ptr(*mut c_void)
//! - TypeTag::Void → NativeValue::Void

use crate::error::{InteropError, InteropResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::c_void;
use std::os::raw::{c_char, c_long, c_ulong};
use std::sync::OnceLock;

/// Scalar type tags for the native boundary
///
/// The closed set of element types pointers and signatures are declared
/// with. Aggregates are handled as opaque registry entries, never as tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// C long (i32 on 32-bit targets, i64 on 64-bit)
    Long,
    /// C unsigned long
    ULong,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit IEEE 754 float
    Float32,
    /// 64-bit IEEE 754 float
    Float64,
    /// C bool (u8: 0 or 1)
    Bool,
    /// Untyped data or function pointer
    Pointer,
    /// char* (null-terminated string pointer)
    CString,
    /// void (for void returns only)
    Void,
}

impl TypeTag {
    /// Byte size of a value of this type on the current target
    pub fn byte_size(&self) -> usize {
        match self {
            TypeTag::Int8 | TypeTag::UInt8 | TypeTag::Bool => 1,
            TypeTag::Int16 | TypeTag::UInt16 => 2,
            TypeTag::Int32 | TypeTag::UInt32 | TypeTag::Float32 => 4,
            TypeTag::Int64 | TypeTag::UInt64 | TypeTag::Float64 => 8,
            TypeTag::Long => std::mem::size_of::<c_long>(),
            TypeTag::ULong => std::mem::size_of::<c_ulong>(),
            TypeTag::Pointer | TypeTag::CString => std::mem::size_of::<usize>(),
            TypeTag::Void => 0,
        }
    }

    /// Check whether a managed value can be marshaled to this tag
    pub fn accepts_value(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (
                TypeTag::Int8
                    | TypeTag::UInt8
                    | TypeTag::Int16
                    | TypeTag::UInt16
                    | TypeTag::Int32
                    | TypeTag::UInt32
                    | TypeTag::Long
                    | TypeTag::ULong
                    | TypeTag::Int64
                    | TypeTag::UInt64,
                Value::Int(_)
            ) | (TypeTag::Float32 | TypeTag::Float64, Value::Int(_) | Value::Float(_))
                | (TypeTag::Bool, Value::Bool(_))
                | (
                    TypeTag::Pointer,
                    Value::Pointer(_) | Value::Callable(_) | Value::Int(_) | Value::Null
                )
                | (TypeTag::CString, Value::String(_) | Value::Null)
                | (TypeTag::Void, Value::Null)
        )
    }

    /// Get the display name for this tag (also its registry name)
    pub fn display_name(&self) -> &'static str {
        match self {
            TypeTag::Int8 => "int8",
            TypeTag::UInt8 => "uint8",
            TypeTag::Int16 => "int16",
            TypeTag::UInt16 => "uint16",
            TypeTag::Int32 => "int32",
            TypeTag::UInt32 => "uint32",
            TypeTag::Long => "long",
            TypeTag::ULong => "ulong",
            TypeTag::Int64 => "int64",
            TypeTag::UInt64 => "uint64",
            TypeTag::Float32 => "float32",
            TypeTag::Float64 => "float64",
            TypeTag::Bool => "bool",
            TypeTag::Pointer => "pointer",
            TypeTag::CString => "cstring",
            TypeTag::Void => "void",
        }
    }

    /// All tags, in declaration order
    pub fn all() -> &'static [TypeTag] {
        &[
            TypeTag::Int8,
            TypeTag::UInt8,
            TypeTag::Int16,
            TypeTag::UInt16,
            TypeTag::Int32,
            TypeTag::UInt32,
            TypeTag::Long,
            TypeTag::ULong,
            TypeTag::Int64,
            TypeTag::UInt64,
            TypeTag::Float32,
            TypeTag::Float64,
            TypeTag::Bool,
            TypeTag::Pointer,
            TypeTag::CString,
            TypeTag::Void,
        ]
    }
}

/// Native value representation at the call boundary
///
/// The actual values passed across the boundary during a call.
/// Pointer-carrying variants are only valid for the duration of the call
/// that produced them; lifetime of `CStr` storage is managed by
/// `MarshalContext`.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    Long(c_long),
    ULong(c_ulong),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// 0 or 1
    Bool(u8),
    Ptr(*mut c_void),
    CStr(*const c_char),
    Void,
}

/// Native descriptor for a registered type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeType {
    /// A scalar with a direct tag
    Scalar(TypeTag),
    /// An aggregate known only by its size
    Opaque,
}

/// Resolved type information from the registry
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    /// Registered name
    pub name: String,
    /// Byte size on the current target
    pub size: usize,
    /// Native descriptor
    pub native: NativeType,
}

/// Symbolic type name → (byte size, native descriptor)
///
/// Size lookups for allocation and typed access go through this interface.
/// `new()` carries every scalar tag under its display name plus the common
/// C aliases; opaque aggregates and further aliases can be registered on
/// top of it.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, TypeInfo>,
}

impl TypeRegistry {
    /// Create a registry populated with the builtin scalars and aliases
    pub fn new() -> Self {
        let mut registry = TypeRegistry {
            types: HashMap::new(),
        };

        for tag in TypeTag::all() {
            registry.types.insert(
                tag.display_name().to_string(),
                TypeInfo {
                    name: tag.display_name().to_string(),
                    size: tag.byte_size(),
                    native: NativeType::Scalar(*tag),
                },
            );
        }

        // Common C spellings
        let aliases: &[(&str, TypeTag)] = &[
            ("char", TypeTag::Int8),
            ("uchar", TypeTag::UInt8),
            ("byte", TypeTag::UInt8),
            ("short", TypeTag::Int16),
            ("ushort", TypeTag::UInt16),
            ("int", TypeTag::Int32),
            ("uint", TypeTag::UInt32),
            ("float", TypeTag::Float32),
            ("double", TypeTag::Float64),
            ("string", TypeTag::CString),
            ("void*", TypeTag::Pointer),
        ];
        for (name, tag) in aliases {
            registry.types.insert(
                name.to_string(),
                TypeInfo {
                    name: name.to_string(),
                    size: tag.byte_size(),
                    native: NativeType::Scalar(*tag),
                },
            );
        }

        // Pointer-width integer typedefs
        let size_t = if cfg!(target_pointer_width = "64") {
            TypeTag::UInt64
        } else {
            TypeTag::UInt32
        };
        let ssize_t = if cfg!(target_pointer_width = "64") {
            TypeTag::Int64
        } else {
            TypeTag::Int32
        };
        for (name, tag) in [("size_t", size_t), ("ssize_t", ssize_t), ("intptr_t", ssize_t)] {
            registry.types.insert(
                name.to_string(),
                TypeInfo {
                    name: name.to_string(),
                    size: tag.byte_size(),
                    native: NativeType::Scalar(tag),
                },
            );
        }

        registry
    }

    /// Resolve a symbolic name to its type information
    pub fn resolve(&self, name: &str) -> InteropResult<&TypeInfo> {
        self.types
            .get(name)
            .ok_or_else(|| InteropError::UnknownType(name.to_string()))
    }

    /// Check whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Register an opaque aggregate known only by size
    pub fn register_opaque(&mut self, name: &str, size: usize) {
        self.types.insert(
            name.to_string(),
            TypeInfo {
                name: name.to_string(),
                size,
                native: NativeType::Opaque,
            },
        );
    }

    /// Register `alias` as another name for an existing entry
    pub fn register_alias(&mut self, alias: &str, existing: &str) -> InteropResult<()> {
        let mut info = self.resolve(existing)?.clone();
        info.name = alias.to_string();
        self.types.insert(alias.to_string(), info);
        Ok(())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide default registry used by the convenience allocation forms
pub fn standard() -> &'static TypeRegistry {
    static STANDARD: OnceLock<TypeRegistry> = OnceLock::new();
    STANDARD.get_or_init(TypeRegistry::new)
}
