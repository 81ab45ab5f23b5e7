//! Value marshaling between managed values and native representations
//!
//! Provides bidirectional marshaling at the call boundary:
//! - `MarshalContext::to_native()`: convert managed values to native slots
//! - `MarshalContext::from_native()`: convert native results back
//!
//! # Memory Safety
//!
//! - All allocated C strings are tracked in `MarshalContext`
//! - Automatic cleanup on `Drop`; tracked strings outlive the native call
//! - Range validation for numeric conversions

use crate::error::{InteropError, InteropResult};
use crate::pointer::Pointer;
use crate::registry::{NativeValue, TypeTag};
use crate::value::Value;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_long, c_ulong, c_void};

/// Marshal context for managed/native conversions
///
/// Tracks C strings allocated for arguments so they stay alive for the
/// duration of the native call.
pub struct MarshalContext {
    /// Track allocated C strings for cleanup
    allocated_strings: Vec<CString>,
}

impl MarshalContext {
    /// Create a new marshal context
    pub fn new() -> Self {
        Self {
            allocated_strings: Vec::new(),
        }
    }

    /// Marshal a managed value into the native slot a tag describes
    ///
    /// Integral tags take `Int` with range validation. Floating tags take
    /// `Float` or `Int`. `Pointer` takes a pointer, a callable's entry, a
    /// non-negative `Int` address, or `Null`. `CString` takes a managed
    /// string (a tracked NUL-terminated copy is allocated) or a pointer
    /// passed through as-is.
    pub fn to_native(&mut self, value: &Value, target: TypeTag) -> InteropResult<NativeValue> {
        match (value, target) {
            (Value::Int(n), TypeTag::Int8) => {
                let v = i8::try_from(*n).map_err(|_| out_of_range(*n, "int8"))?;
                Ok(NativeValue::I8(v))
            }
            (Value::Int(n), TypeTag::UInt8) => {
                let v = u8::try_from(*n).map_err(|_| out_of_range(*n, "uint8"))?;
                Ok(NativeValue::U8(v))
            }
            (Value::Int(n), TypeTag::Int16) => {
                let v = i16::try_from(*n).map_err(|_| out_of_range(*n, "int16"))?;
                Ok(NativeValue::I16(v))
            }
            (Value::Int(n), TypeTag::UInt16) => {
                let v = u16::try_from(*n).map_err(|_| out_of_range(*n, "uint16"))?;
                Ok(NativeValue::U16(v))
            }
            (Value::Int(n), TypeTag::Int32) => {
                let v = i32::try_from(*n).map_err(|_| out_of_range(*n, "int32"))?;
                Ok(NativeValue::I32(v))
            }
            (Value::Int(n), TypeTag::UInt32) => {
                let v = u32::try_from(*n).map_err(|_| out_of_range(*n, "uint32"))?;
                Ok(NativeValue::U32(v))
            }
            (Value::Int(n), TypeTag::Long) => {
                let v = c_long::try_from(*n).map_err(|_| out_of_range(*n, "long"))?;
                Ok(NativeValue::Long(v))
            }
            (Value::Int(n), TypeTag::ULong) => {
                let v = c_ulong::try_from(*n).map_err(|_| out_of_range(*n, "ulong"))?;
                Ok(NativeValue::ULong(v))
            }
            (Value::Int(n), TypeTag::Int64) => Ok(NativeValue::I64(*n)),
            (Value::Int(n), TypeTag::UInt64) => {
                let v = u64::try_from(*n).map_err(|_| out_of_range(*n, "uint64"))?;
                Ok(NativeValue::U64(v))
            }

            (Value::Float(n), TypeTag::Float32) => Ok(NativeValue::F32(*n as f32)),
            (Value::Int(n), TypeTag::Float32) => Ok(NativeValue::F32(*n as f32)),
            (Value::Float(n), TypeTag::Float64) => Ok(NativeValue::F64(*n)),
            (Value::Int(n), TypeTag::Float64) => Ok(NativeValue::F64(*n as f64)),

            (Value::Bool(b), TypeTag::Bool) => Ok(NativeValue::Bool(if *b { 1 } else { 0 })),

            (Value::Pointer(p), TypeTag::Pointer) => {
                Ok(NativeValue::Ptr(p.address() as *mut c_void))
            }
            (Value::Callable(c), TypeTag::Pointer) => {
                Ok(NativeValue::Ptr(c.address() as *mut c_void))
            }
            (Value::Int(n), TypeTag::Pointer) => {
                let addr = usize::try_from(*n).map_err(|_| out_of_range(*n, "pointer"))?;
                Ok(NativeValue::Ptr(addr as *mut c_void))
            }
            (Value::Null, TypeTag::Pointer) => Ok(NativeValue::Ptr(std::ptr::null_mut())),

            (Value::String(s), TypeTag::CString) => {
                let c_string = CString::new(s.as_str()).map_err(|e| {
                    InteropError::InvalidString(format!("String contains null byte: {}", e))
                })?;

                // Get pointer before moving the CString into storage
                let ptr = c_string.as_ptr();
                self.allocated_strings.push(c_string);

                Ok(NativeValue::CStr(ptr))
            }
            (Value::Pointer(p), TypeTag::CString) => {
                Ok(NativeValue::CStr(p.address() as *const c_char))
            }
            (Value::Null, TypeTag::CString) => Ok(NativeValue::CStr(std::ptr::null())),

            (Value::Null, TypeTag::Void) => Ok(NativeValue::Void),

            _ => Err(InteropError::TypeError(format!(
                "Cannot pass {} as {}",
                value.type_name(),
                target.display_name()
            ))),
        }
    }

    /// Marshal a native result back to a managed value
    ///
    /// Integral results widen to `Int`; unsigned results beyond the `Int`
    /// range are out-of-range errors rather than silent wraps. Null result
    /// pointers (including C strings) become `Null`.
    ///
    /// # Safety
    ///
    /// For `CStr`, the pointer must be null or point to a NUL-terminated
    /// string.
    pub fn from_native(&self, native: &NativeValue) -> InteropResult<Value> {
        match native {
            NativeValue::I8(v) => Ok(Value::Int(*v as i64)),
            NativeValue::U8(v) => Ok(Value::Int(*v as i64)),
            NativeValue::I16(v) => Ok(Value::Int(*v as i64)),
            NativeValue::U16(v) => Ok(Value::Int(*v as i64)),
            NativeValue::I32(v) => Ok(Value::Int(*v as i64)),
            NativeValue::U32(v) => Ok(Value::Int(*v as i64)),
            NativeValue::Long(v) => Ok(Value::Int(*v as i64)),
            NativeValue::ULong(v) => {
                let n = i64::try_from(*v).map_err(|_| InteropError::OutOfRange {
                    value: v.to_string(),
                    target: "int64",
                })?;
                Ok(Value::Int(n))
            }
            NativeValue::I64(v) => Ok(Value::Int(*v)),
            NativeValue::U64(v) => {
                let n = i64::try_from(*v).map_err(|_| InteropError::OutOfRange {
                    value: v.to_string(),
                    target: "int64",
                })?;
                Ok(Value::Int(n))
            }

            NativeValue::F32(v) => Ok(Value::Float(*v as f64)),
            NativeValue::F64(v) => Ok(Value::Float(*v)),

            NativeValue::Bool(b) => Ok(Value::Bool(*b != 0)),

            NativeValue::Ptr(p) => {
                if p.is_null() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Pointer(Pointer::from_address(*p as usize)))
                }
            }

            NativeValue::CStr(ptr) => {
                if ptr.is_null() {
                    return Ok(Value::Null);
                }

                unsafe {
                    let c_str = CStr::from_ptr(*ptr);
                    let s = c_str.to_str().map_err(|e| {
                        InteropError::InvalidString(format!("Invalid UTF-8: {}", e))
                    })?;
                    Ok(Value::string(s))
                }
            }

            NativeValue::Void => Ok(Value::Null),
        }
    }
}

fn out_of_range(value: i64, target: &'static str) -> InteropError {
    InteropError::OutOfRange {
        value: value.to_string(),
        target,
    }
}

impl Default for MarshalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MarshalContext {
    fn drop(&mut self) {
        // CStrings are freed when the vec drops
        self.allocated_strings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_int_to_i32() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::Int(42), TypeTag::Int32);
        assert_eq!(result.unwrap(), NativeValue::I32(42));
    }

    #[test]
    fn test_marshal_int_to_long() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::Int(1000), TypeTag::Long);
        assert_eq!(result.unwrap(), NativeValue::Long(1000));
    }

    #[test]
    fn test_marshal_float_to_double() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::Float(3.5), TypeTag::Float64);
        assert_eq!(result.unwrap(), NativeValue::F64(3.5));
    }

    #[test]
    fn test_marshal_int_widens_to_double() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::Int(7), TypeTag::Float64);
        assert_eq!(result.unwrap(), NativeValue::F64(7.0));
    }

    #[test]
    fn test_marshal_string_to_cstring() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::string("hello"), TypeTag::CString);

        match result.unwrap() {
            NativeValue::CStr(ptr) => {
                assert!(!ptr.is_null());
                unsafe {
                    let c_str = CStr::from_ptr(ptr);
                    assert_eq!(c_str.to_str().unwrap(), "hello");
                }
            }
            other => panic!("expected CStr, got {:?}", other),
        }
    }

    #[test]
    fn test_marshal_bool() {
        let mut ctx = MarshalContext::new();
        assert_eq!(
            ctx.to_native(&Value::Bool(true), TypeTag::Bool).unwrap(),
            NativeValue::Bool(1)
        );
        assert_eq!(
            ctx.to_native(&Value::Bool(false), TypeTag::Bool).unwrap(),
            NativeValue::Bool(0)
        );
    }

    #[test]
    fn test_marshal_null_to_pointer() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::Null, TypeTag::Pointer);
        assert_eq!(result.unwrap(), NativeValue::Ptr(std::ptr::null_mut()));
    }

    #[test]
    fn test_marshal_int_as_address() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::Int(0x1000), TypeTag::Pointer);
        assert_eq!(result.unwrap(), NativeValue::Ptr(0x1000 as *mut c_void));
    }

    #[test]
    fn test_marshal_type_mismatch() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::string("hello"), TypeTag::Int32);
        assert!(matches!(result, Err(InteropError::TypeError(_))));
    }

    #[test]
    fn test_marshal_out_of_range() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::Int(300), TypeTag::Int8);
        assert!(matches!(result, Err(InteropError::OutOfRange { .. })));

        let result = ctx.to_native(&Value::Int(-1), TypeTag::UInt32);
        assert!(matches!(result, Err(InteropError::OutOfRange { .. })));
    }

    #[test]
    fn test_marshal_string_with_null_byte() {
        let mut ctx = MarshalContext::new();
        let result = ctx.to_native(&Value::string("hello\0world"), TypeTag::CString);
        assert!(matches!(result, Err(InteropError::InvalidString(_))));
    }

    #[test]
    fn test_unmarshal_integers_widen() {
        let ctx = MarshalContext::new();
        assert_eq!(ctx.from_native(&NativeValue::I8(-5)).unwrap(), Value::Int(-5));
        assert_eq!(ctx.from_native(&NativeValue::U16(512)).unwrap(), Value::Int(512));
        assert_eq!(ctx.from_native(&NativeValue::I64(1 << 40)).unwrap(), Value::Int(1 << 40));
    }

    #[test]
    fn test_unmarshal_u64_out_of_range() {
        let ctx = MarshalContext::new();
        let result = ctx.from_native(&NativeValue::U64(u64::MAX));
        assert!(matches!(result, Err(InteropError::OutOfRange { .. })));
    }

    #[test]
    fn test_unmarshal_float() {
        let ctx = MarshalContext::new();
        assert_eq!(ctx.from_native(&NativeValue::F64(3.5)).unwrap(), Value::Float(3.5));
        assert_eq!(ctx.from_native(&NativeValue::F32(0.5)).unwrap(), Value::Float(0.5));
    }

    #[test]
    fn test_unmarshal_null_pointer_is_null_value() {
        let ctx = MarshalContext::new();
        let result = ctx.from_native(&NativeValue::Ptr(std::ptr::null_mut()));
        assert_eq!(result.unwrap(), Value::Null);

        let result = ctx.from_native(&NativeValue::CStr(std::ptr::null()));
        assert_eq!(result.unwrap(), Value::Null);
    }

    #[test]
    fn test_unmarshal_cstring() {
        let c_string = CString::new("hello").unwrap();
        let ctx = MarshalContext::new();
        let result = ctx.from_native(&NativeValue::CStr(c_string.as_ptr()));
        assert_eq!(result.unwrap(), Value::string("hello"));
    }

    #[test]
    fn test_unmarshal_void() {
        let ctx = MarshalContext::new();
        assert_eq!(ctx.from_native(&NativeValue::Void).unwrap(), Value::Null);
    }

    #[test]
    fn test_context_tracks_strings() {
        let mut ctx = MarshalContext::new();
        ctx.to_native(&Value::string("hello"), TypeTag::CString).unwrap();
        ctx.to_native(&Value::string("world"), TypeTag::CString).unwrap();
        assert_eq!(ctx.allocated_strings.len(), 2);
    }
}
