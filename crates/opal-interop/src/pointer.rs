//! Fat pointer values
//!
//! `Pointer` wraps a raw address together with a role tag and optional
//! element typing. It never owns memory; any number of pointers may alias
//! the same address. Owning and symbol-bound handles embed a `Pointer`
//! carrying their kind, so every pointer-shaped thing in the crate shares
//! this one representation.
//!
//! Accessors assume the address designates readable/writable memory of
//! sufficient size. Violating that is undefined behavior, not a
//! recoverable error. In checked mode, accesses through pointers with a
//! known extent are validated against it first.

use crate::access;
use crate::error::{InteropError, InteropResult};
use crate::registry::TypeTag;
use crate::value::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::size_of;
use std::ops::Add;
use std::os::raw::{c_long, c_ulong};

/// Role tag distinguishing the concrete pointer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    /// Plain address with no tracked provenance
    Raw,
    /// Base address of an owned memory block
    Block,
    /// Resolved symbol inside a loaded library
    Symbol,
    /// Entry address of a native callable
    Callable,
}

/// Non-owning fat pointer
#[derive(Debug, Clone, Copy)]
pub struct Pointer {
    addr: usize,
    kind: PointerKind,
    elem: Option<TypeTag>,
    extent: Option<usize>,
}

impl Pointer {
    /// The null pointer
    pub fn null() -> Self {
        Pointer {
            addr: 0,
            kind: PointerKind::Raw,
            elem: None,
            extent: None,
        }
    }

    /// Wrap a raw integer address
    pub fn from_address(addr: usize) -> Self {
        Pointer {
            addr,
            kind: PointerKind::Raw,
            elem: None,
            extent: None,
        }
    }

    /// Extract an address from a managed value
    ///
    /// Addresses come from `Int` or `Pointer` values; anything else is a
    /// type error.
    pub fn from_value(value: &Value) -> InteropResult<Pointer> {
        match value {
            Value::Pointer(p) => Ok(*p),
            Value::Int(n) => {
                let addr = usize::try_from(*n).map_err(|_| {
                    InteropError::TypeError(format!("Cannot use {} as an address", n))
                })?;
                Ok(Pointer::from_address(addr))
            }
            other => Err(InteropError::TypeError(format!(
                "Cannot construct a pointer from {}",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn with_parts(
        addr: usize,
        kind: PointerKind,
        elem: Option<TypeTag>,
        extent: Option<usize>,
    ) -> Self {
        Pointer {
            addr,
            kind,
            elem,
            extent,
        }
    }

    pub fn address(&self) -> usize {
        self.addr
    }

    /// Repoint at a different address
    ///
    /// The recorded extent is dropped since it cannot be tied to the new
    /// address.
    pub fn set_address(&mut self, addr: usize) {
        self.addr = addr;
        self.extent = None;
    }

    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    pub fn kind(&self) -> PointerKind {
        self.kind
    }

    /// Element type tag, when one was established
    pub fn element_type(&self) -> Option<TypeTag> {
        self.elem
    }

    /// Known byte span from this address, when one was established
    pub fn extent(&self) -> Option<usize> {
        self.extent
    }

    /// Derive a pointer `delta` bytes away
    ///
    /// The result is always `Raw` and never inherits ownership. The extent
    /// shrinks when the step stays inside it, otherwise it is cleared.
    /// Never fails; address arithmetic wraps.
    pub fn offset(&self, delta: isize) -> Pointer {
        let extent = match self.extent {
            Some(extent) if delta >= 0 && (delta as usize) <= extent => {
                Some(extent - delta as usize)
            }
            _ => None,
        };
        Pointer {
            addr: self.addr.wrapping_add_signed(delta),
            kind: PointerKind::Raw,
            elem: self.elem,
            extent,
        }
    }

    fn check(&self, offset: usize, len: usize) -> InteropResult<()> {
        if self.addr == 0 {
            return Err(InteropError::NullPointer);
        }
        access::check_extent(offset, len, self.extent)
    }
}

macro_rules! scalar_accessor {
    ($read:ident, $write:ident, $ty:ty) => {
        impl Pointer {
            pub fn $read(&self, offset: usize) -> InteropResult<$ty> {
                self.check(offset, size_of::<$ty>())?;
                Ok(unsafe { access::read::<$ty>(self.addr.wrapping_add(offset)) })
            }

            pub fn $write(&self, offset: usize, value: $ty) -> InteropResult<()> {
                self.check(offset, size_of::<$ty>())?;
                unsafe { access::write::<$ty>(self.addr.wrapping_add(offset), value) };
                Ok(())
            }
        }
    };
}

scalar_accessor!(read_i8, write_i8, i8);
scalar_accessor!(read_u8, write_u8, u8);
scalar_accessor!(read_i16, write_i16, i16);
scalar_accessor!(read_u16, write_u16, u16);
scalar_accessor!(read_i32, write_i32, i32);
scalar_accessor!(read_u32, write_u32, u32);
scalar_accessor!(read_long, write_long, c_long);
scalar_accessor!(read_ulong, write_ulong, c_ulong);
scalar_accessor!(read_i64, write_i64, i64);
scalar_accessor!(read_u64, write_u64, u64);
scalar_accessor!(read_f32, write_f32, f32);
scalar_accessor!(read_f64, write_f64, f64);

impl Pointer {
    pub fn read_bool(&self, offset: usize) -> InteropResult<bool> {
        Ok(self.read_u8(offset)? != 0)
    }

    pub fn write_bool(&self, offset: usize, value: bool) -> InteropResult<()> {
        self.write_u8(offset, value as u8)
    }

    /// Read a fixed-length UTF-8 string
    pub fn read_string(&self, offset: usize, len: usize) -> InteropResult<String> {
        self.check(offset, len)?;
        let bytes = unsafe { access::read_bytes(self.addr.wrapping_add(offset), len) };
        String::from_utf8(bytes)
            .map_err(|e| InteropError::InvalidString(format!("Invalid UTF-8: {}", e)))
    }

    /// Read a null-terminated string
    pub fn read_cstring(&self, offset: usize) -> InteropResult<String> {
        self.check(offset, 1)?;
        unsafe { access::read_cstring(self.addr.wrapping_add(offset)) }
    }

    /// Write a string truncated to at most `max - 1` bytes, NUL-terminated
    ///
    /// Truncation lands on a character boundary. Returns the number of
    /// string bytes written, excluding the terminator.
    pub fn write_string(&self, offset: usize, s: &str, max: usize) -> InteropResult<usize> {
        if max == 0 {
            return Err(InteropError::InvalidArgument(
                "String capacity must be nonzero".to_string(),
            ));
        }
        let mut end = (max - 1).min(s.len());
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        self.check(offset, end + 1)?;
        unsafe {
            access::write_bytes(self.addr.wrapping_add(offset), &s.as_bytes()[..end]);
            access::write::<u8>(self.addr.wrapping_add(offset).wrapping_add(end), 0);
        }
        Ok(end)
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> InteropResult<Vec<u8>> {
        self.check(offset, len)?;
        Ok(unsafe { access::read_bytes(self.addr.wrapping_add(offset), len) })
    }

    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> InteropResult<()> {
        self.check(offset, bytes.len())?;
        unsafe { access::write_bytes(self.addr.wrapping_add(offset), bytes) };
        Ok(())
    }

    /// Interpret the bytes at `offset` as another address
    pub fn read_pointer(&self, offset: usize) -> InteropResult<Pointer> {
        self.check(offset, size_of::<usize>())?;
        let target = unsafe { access::read::<usize>(self.addr.wrapping_add(offset)) };
        Ok(Pointer::from_address(target))
    }

    pub fn write_pointer(&self, offset: usize, target: &Pointer) -> InteropResult<()> {
        self.check(offset, size_of::<usize>())?;
        unsafe { access::write::<usize>(self.addr.wrapping_add(offset), target.address()) };
        Ok(())
    }

    /// Read the scalar of type `tag` this pointer points at
    pub fn read_value(&self, tag: TypeTag) -> InteropResult<Value> {
        self.check(0, tag.byte_size())?;
        unsafe { access::read_scalar(self.addr, tag) }
    }

    /// Write a managed value as the scalar of type `tag` this pointer
    /// points at
    pub fn write_value(&self, tag: TypeTag, value: &Value) -> InteropResult<()> {
        self.check(0, tag.byte_size())?;
        unsafe { access::write_scalar(self.addr, tag, value) }
    }

    /// Indexed read, scaled by the tag's size
    pub fn read_at(&self, tag: TypeTag, index: isize) -> InteropResult<Value> {
        let delta = index.wrapping_mul(tag.byte_size() as isize);
        self.offset(delta).read_value(tag)
    }

    /// Indexed write, scaled by the tag's size
    pub fn write_at(&self, tag: TypeTag, index: isize, value: &Value) -> InteropResult<()> {
        let delta = index.wrapping_mul(tag.byte_size() as isize);
        self.offset(delta).write_value(tag, value)
    }

    /// Read `count` consecutive scalars of type `tag`
    pub fn read_array(&self, tag: TypeTag, count: usize) -> InteropResult<Vec<Value>> {
        let width = element_width(tag, count)?;
        self.check(0, width.total)?;
        let mut out = Vec::with_capacity(count);
        let mut scratch = *self;
        for _ in 0..count {
            out.push(scratch.read_value(tag)?);
            scratch = scratch.offset(width.step);
        }
        Ok(out)
    }

    /// Write consecutive scalars of type `tag`
    pub fn write_array(&self, tag: TypeTag, values: &[Value]) -> InteropResult<()> {
        let width = element_width(tag, values.len())?;
        self.check(0, width.total)?;
        let mut scratch = *self;
        for value in values {
            scratch.write_value(tag, value)?;
            scratch = scratch.offset(width.step);
        }
        Ok(())
    }

    /// Reverse the byte order of `count` elements of `width` bytes at
    /// `offset`
    pub fn byte_swap(&self, offset: usize, count: usize, width: usize) -> InteropResult<()> {
        if !matches!(width, 2 | 4 | 8) {
            return Err(InteropError::InvalidArgument(format!(
                "Byte swap width must be 2, 4 or 8, got {}",
                width
            )));
        }
        let total = count.checked_mul(width).ok_or_else(|| {
            InteropError::InvalidArgument("Byte swap span overflows the address space".to_string())
        })?;
        self.check(offset, total)?;
        unsafe { access::byte_swap(self.addr.wrapping_add(offset), width, count) };
        Ok(())
    }
}

struct ElementWidth {
    step: isize,
    total: usize,
}

fn element_width(tag: TypeTag, count: usize) -> InteropResult<ElementWidth> {
    let step = tag.byte_size();
    if step == 0 {
        return Err(InteropError::TypeError(
            "Cannot access void elements".to_string(),
        ));
    }
    let total = count.checked_mul(step).ok_or_else(|| {
        InteropError::InvalidArgument("Array span overflows the address space".to_string())
    })?;
    Ok(ElementWidth {
        step: step as isize,
        total,
    })
}

impl PartialEq for Pointer {
    // Same concrete kind and same address
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.addr == other.addr
    }
}

impl Eq for Pointer {}

impl Hash for Pointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.addr.hash(state);
    }
}

impl Add<isize> for Pointer {
    type Output = Pointer;

    fn add(self, rhs: isize) -> Pointer {
        self.offset(rhs)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.addr)
    }
}
