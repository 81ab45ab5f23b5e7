//! Raw typed memory access
//!
//! Scalar reads and writes at raw addresses, plus the bulk byte
//! primitives the block layer is built on. All accesses are unaligned,
//! so packed layouts behave the same as aligned ones.
//!
//! # Safety
//!
//! Every function taking a raw address is unsafe: the caller must ensure
//! the address is valid for the access width. The safe wrappers in
//! `pointer` and `block` establish that from allocation extents.
//!
//! Bounds enforcement is a process-wide mode. When enabled, accesses
//! through handles with a known extent are rejected with `OutOfBounds`
//! instead of reaching memory. Handles with no recorded extent are never
//! checked.

use crate::error::{InteropError, InteropResult};
use crate::pointer::Pointer;
use crate::registry::TypeTag;
use crate::value::Value;
use std::ffi::CStr;
use std::os::raw::{c_char, c_long, c_ulong};
use std::sync::atomic::{AtomicBool, Ordering};

static BOUNDS_CHECKING: AtomicBool = AtomicBool::new(false);

/// Enable or disable process-wide bounds enforcement
pub fn set_bounds_checking(enabled: bool) {
    BOUNDS_CHECKING.store(enabled, Ordering::Relaxed);
}

/// Check whether bounds enforcement is currently enabled
pub fn bounds_checking_enabled() -> bool {
    BOUNDS_CHECKING.load(Ordering::Relaxed)
}

/// Validate an access of `len` bytes at `offset` against a known extent
///
/// Passes unconditionally when enforcement is disabled or the extent is
/// unknown.
pub fn check_extent(offset: usize, len: usize, extent: Option<usize>) -> InteropResult<()> {
    if !bounds_checking_enabled() {
        return Ok(());
    }
    let extent = match extent {
        Some(extent) => extent,
        None => return Ok(()),
    };
    match offset.checked_add(len) {
        Some(end) if end <= extent => Ok(()),
        _ => Err(InteropError::OutOfBounds {
            offset,
            len,
            extent,
        }),
    }
}

/// # Safety
///
/// `addr` must be valid for reads of `size_of::<T>()` bytes.
pub(crate) unsafe fn read<T: Copy>(addr: usize) -> T {
    (addr as *const T).read_unaligned()
}

/// # Safety
///
/// `addr` must be valid for writes of `size_of::<T>()` bytes.
pub(crate) unsafe fn write<T: Copy>(addr: usize, value: T) {
    (addr as *mut T).write_unaligned(value);
}

/// Read a scalar of type `tag` at `addr` into a managed value
///
/// # Safety
///
/// `addr` must be valid for reads of `tag.byte_size()` bytes. For
/// `CString`, the stored pointer must be null or a valid C string.
pub(crate) unsafe fn read_scalar(addr: usize, tag: TypeTag) -> InteropResult<Value> {
    if addr == 0 {
        return Err(InteropError::NullPointer);
    }

    let value = match tag {
        TypeTag::Int8 => Value::Int((addr as *const i8).read_unaligned() as i64),
        TypeTag::UInt8 => Value::Int((addr as *const u8).read_unaligned() as i64),
        TypeTag::Int16 => Value::Int((addr as *const i16).read_unaligned() as i64),
        TypeTag::UInt16 => Value::Int((addr as *const u16).read_unaligned() as i64),
        TypeTag::Int32 => Value::Int((addr as *const i32).read_unaligned() as i64),
        TypeTag::UInt32 => Value::Int((addr as *const u32).read_unaligned() as i64),
        TypeTag::Long => Value::Int((addr as *const c_long).read_unaligned() as i64),
        TypeTag::ULong => {
            let v = (addr as *const c_ulong).read_unaligned();
            let n = i64::try_from(v).map_err(|_| InteropError::OutOfRange {
                value: v.to_string(),
                target: "int64",
            })?;
            Value::Int(n)
        }
        TypeTag::Int64 => Value::Int((addr as *const i64).read_unaligned()),
        TypeTag::UInt64 => {
            let v = (addr as *const u64).read_unaligned();
            let n = i64::try_from(v).map_err(|_| InteropError::OutOfRange {
                value: v.to_string(),
                target: "int64",
            })?;
            Value::Int(n)
        }
        TypeTag::Float32 => Value::Float((addr as *const f32).read_unaligned() as f64),
        TypeTag::Float64 => Value::Float((addr as *const f64).read_unaligned()),
        TypeTag::Bool => Value::Bool((addr as *const u8).read_unaligned() != 0),
        TypeTag::Pointer => {
            let target = (addr as *const usize).read_unaligned();
            if target == 0 {
                Value::Null
            } else {
                Value::Pointer(Pointer::from_address(target))
            }
        }
        TypeTag::CString => {
            let ptr = (addr as *const *const c_char).read_unaligned();
            if ptr.is_null() {
                Value::Null
            } else {
                Value::string(read_cstring(ptr as usize)?)
            }
        }
        TypeTag::Void => {
            return Err(InteropError::TypeError("Cannot read a void value".to_string()))
        }
    };

    Ok(value)
}

/// Write a managed value as a scalar of type `tag` at `addr`
///
/// # Safety
///
/// `addr` must be valid for writes of `tag.byte_size()` bytes.
pub(crate) unsafe fn write_scalar(addr: usize, tag: TypeTag, value: &Value) -> InteropResult<()> {
    if addr == 0 {
        return Err(InteropError::NullPointer);
    }

    match (tag, value) {
        (TypeTag::Int8, Value::Int(n)) => {
            let v = i8::try_from(*n).map_err(|_| out_of_range(*n, "int8"))?;
            (addr as *mut i8).write_unaligned(v);
        }
        (TypeTag::UInt8, Value::Int(n)) => {
            let v = u8::try_from(*n).map_err(|_| out_of_range(*n, "uint8"))?;
            (addr as *mut u8).write_unaligned(v);
        }
        (TypeTag::Int16, Value::Int(n)) => {
            let v = i16::try_from(*n).map_err(|_| out_of_range(*n, "int16"))?;
            (addr as *mut i16).write_unaligned(v);
        }
        (TypeTag::UInt16, Value::Int(n)) => {
            let v = u16::try_from(*n).map_err(|_| out_of_range(*n, "uint16"))?;
            (addr as *mut u16).write_unaligned(v);
        }
        (TypeTag::Int32, Value::Int(n)) => {
            let v = i32::try_from(*n).map_err(|_| out_of_range(*n, "int32"))?;
            (addr as *mut i32).write_unaligned(v);
        }
        (TypeTag::UInt32, Value::Int(n)) => {
            let v = u32::try_from(*n).map_err(|_| out_of_range(*n, "uint32"))?;
            (addr as *mut u32).write_unaligned(v);
        }
        (TypeTag::Long, Value::Int(n)) => {
            let v = c_long::try_from(*n).map_err(|_| out_of_range(*n, "long"))?;
            (addr as *mut c_long).write_unaligned(v);
        }
        (TypeTag::ULong, Value::Int(n)) => {
            let v = c_ulong::try_from(*n).map_err(|_| out_of_range(*n, "ulong"))?;
            (addr as *mut c_ulong).write_unaligned(v);
        }
        (TypeTag::Int64, Value::Int(n)) => {
            (addr as *mut i64).write_unaligned(*n);
        }
        (TypeTag::UInt64, Value::Int(n)) => {
            let v = u64::try_from(*n).map_err(|_| out_of_range(*n, "uint64"))?;
            (addr as *mut u64).write_unaligned(v);
        }
        (TypeTag::Float32, Value::Int(n)) => {
            (addr as *mut f32).write_unaligned(*n as f32);
        }
        (TypeTag::Float32, Value::Float(f)) => {
            (addr as *mut f32).write_unaligned(*f as f32);
        }
        (TypeTag::Float64, Value::Int(n)) => {
            (addr as *mut f64).write_unaligned(*n as f64);
        }
        (TypeTag::Float64, Value::Float(f)) => {
            (addr as *mut f64).write_unaligned(*f);
        }
        (TypeTag::Bool, Value::Bool(b)) => {
            (addr as *mut u8).write_unaligned(*b as u8);
        }
        (TypeTag::Pointer | TypeTag::CString, Value::Pointer(p)) => {
            (addr as *mut usize).write_unaligned(p.address());
        }
        (TypeTag::Pointer | TypeTag::CString, Value::Null) => {
            (addr as *mut usize).write_unaligned(0);
        }
        (TypeTag::Pointer, Value::Int(n)) => {
            let v = usize::try_from(*n).map_err(|_| out_of_range(*n, "pointer"))?;
            (addr as *mut usize).write_unaligned(v);
        }
        (TypeTag::CString, Value::String(_)) => {
            return Err(InteropError::TypeError(
                "Cannot store a managed string by pointer, allocate a native copy first"
                    .to_string(),
            ))
        }
        (tag, value) => {
            return Err(InteropError::TypeError(format!(
                "Cannot store {} as {}",
                value.type_name(),
                tag.display_name()
            )))
        }
    }

    Ok(())
}

fn out_of_range(value: i64, target: &'static str) -> InteropError {
    InteropError::OutOfRange {
        value: value.to_string(),
        target,
    }
}

/// Copy a null-terminated C string at `addr` into a managed string
///
/// # Safety
///
/// `addr` must point to a valid null-terminated string.
pub(crate) unsafe fn read_cstring(addr: usize) -> InteropResult<String> {
    if addr == 0 {
        return Err(InteropError::NullPointer);
    }
    CStr::from_ptr(addr as *const c_char)
        .to_str()
        .map(|s| s.to_string())
        .map_err(|e| InteropError::InvalidString(format!("Invalid UTF-8: {}", e)))
}

/// # Safety
///
/// `addr` must be valid for reads of `len` bytes.
pub(crate) unsafe fn read_bytes(addr: usize, len: usize) -> Vec<u8> {
    std::slice::from_raw_parts(addr as *const u8, len).to_vec()
}

/// # Safety
///
/// `addr` must be valid for writes of `bytes.len()` bytes.
pub(crate) unsafe fn write_bytes(addr: usize, bytes: &[u8]) {
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
}

/// # Safety
///
/// `addr` must be valid for writes of `len` bytes.
pub(crate) unsafe fn fill_bytes(addr: usize, byte: u8, len: usize) {
    std::ptr::write_bytes(addr as *mut u8, byte, len);
}

/// Copy `len` bytes from `src` to `dst`, tolerating overlap
///
/// # Safety
///
/// Both ranges must be valid for `len` bytes.
pub(crate) unsafe fn copy_bytes(src: usize, dst: usize, len: usize) {
    std::ptr::copy(src as *const u8, dst as *mut u8, len);
}

/// Reverse the byte order of `count` consecutive elements of `width` bytes
///
/// # Safety
///
/// The range `[addr, addr + width * count)` must be valid for reads and
/// writes.
pub(crate) unsafe fn byte_swap(addr: usize, width: usize, count: usize) {
    for i in 0..count {
        let start = (addr + i * width) as *mut u8;
        std::slice::from_raw_parts_mut(start, width).reverse();
    }
}
