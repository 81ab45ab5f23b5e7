//! Native call bridge
//!
//! All libffi and ABI logic lives in this module. `OutCif` prepares an
//! outbound call interface from a signature; `InStub` owns a generated
//! trampoline that lets native code call a managed function.
//!
//! Argument slots and return slots follow the libffi closure convention:
//! integral results narrower than `ffi_arg` are written widened, floats
//! and 64-bit values at their exact width.

use crate::error::{InteropError, InteropResult};
use crate::marshal::MarshalContext;
use crate::registry::{NativeValue, TypeTag};
use crate::value::{ManagedFn, Value};
use libffi::low;
use libffi::middle::{Arg, Cif, CodePtr, Type};
use std::mem::size_of;
use std::os::raw::{c_char, c_long, c_ulong, c_void};
use std::panic::{self, AssertUnwindSafe};

/// libffi type descriptor for a tag
fn ffi_type(tag: TypeTag) -> Type {
    match tag {
        TypeTag::Int8 => Type::i8(),
        TypeTag::UInt8 => Type::u8(),
        TypeTag::Int16 => Type::i16(),
        TypeTag::UInt16 => Type::u16(),
        TypeTag::Int32 => Type::i32(),
        TypeTag::UInt32 => Type::u32(),
        TypeTag::Long => {
            if size_of::<c_long>() == 8 {
                Type::i64()
            } else {
                Type::i32()
            }
        }
        TypeTag::ULong => {
            if size_of::<c_ulong>() == 8 {
                Type::u64()
            } else {
                Type::u32()
            }
        }
        TypeTag::Int64 => Type::i64(),
        TypeTag::UInt64 => Type::u64(),
        TypeTag::Float32 => Type::f32(),
        TypeTag::Float64 => Type::f64(),
        TypeTag::Bool => Type::u8(),
        TypeTag::Pointer | TypeTag::CString => Type::pointer(),
        TypeTag::Void => Type::void(),
    }
}

fn check_arg_tags(args: &[TypeTag]) -> InteropResult<()> {
    for tag in args {
        if *tag == TypeTag::Void {
            return Err(InteropError::UnsupportedSignature(
                "void cannot be an argument type".to_string(),
            ));
        }
    }
    Ok(())
}

/// Prepared call interface for an outbound native call
pub(crate) struct OutCif {
    cif: Cif,
    ret: TypeTag,
}

// Safety: the prepared Cif is immutable after construction and only read
// during calls
unsafe impl Send for OutCif {}
unsafe impl Sync for OutCif {}

impl OutCif {
    pub(crate) fn new(args: &[TypeTag], ret: TypeTag) -> InteropResult<Self> {
        check_arg_tags(args)?;
        let cif = Cif::new(args.iter().map(|t| ffi_type(*t)), ffi_type(ret));
        Ok(OutCif { cif, ret })
    }

    /// Call a native entry with marshaled arguments
    ///
    /// # Safety
    ///
    /// `entry` must address a function whose actual ABI matches the
    /// signature this interface was prepared from, and every pointer
    /// argument must satisfy the callee's contract.
    pub(crate) unsafe fn call(&self, entry: usize, args: &[NativeValue]) -> NativeValue {
        let code = CodePtr(entry as *mut c_void);
        let ffi_args: Vec<Arg> = args.iter().map(arg_for).collect();

        match self.ret {
            TypeTag::Int8 => NativeValue::I8(self.cif.call::<i8>(code, &ffi_args)),
            TypeTag::UInt8 => NativeValue::U8(self.cif.call::<u8>(code, &ffi_args)),
            TypeTag::Int16 => NativeValue::I16(self.cif.call::<i16>(code, &ffi_args)),
            TypeTag::UInt16 => NativeValue::U16(self.cif.call::<u16>(code, &ffi_args)),
            TypeTag::Int32 => NativeValue::I32(self.cif.call::<i32>(code, &ffi_args)),
            TypeTag::UInt32 => NativeValue::U32(self.cif.call::<u32>(code, &ffi_args)),
            TypeTag::Long => NativeValue::Long(self.cif.call::<c_long>(code, &ffi_args)),
            TypeTag::ULong => NativeValue::ULong(self.cif.call::<c_ulong>(code, &ffi_args)),
            TypeTag::Int64 => NativeValue::I64(self.cif.call::<i64>(code, &ffi_args)),
            TypeTag::UInt64 => NativeValue::U64(self.cif.call::<u64>(code, &ffi_args)),
            TypeTag::Float32 => NativeValue::F32(self.cif.call::<f32>(code, &ffi_args)),
            TypeTag::Float64 => NativeValue::F64(self.cif.call::<f64>(code, &ffi_args)),
            TypeTag::Bool => NativeValue::Bool(self.cif.call::<u8>(code, &ffi_args)),
            TypeTag::Pointer => NativeValue::Ptr(self.cif.call::<*mut c_void>(code, &ffi_args)),
            TypeTag::CString => {
                NativeValue::CStr(self.cif.call::<*const c_char>(code, &ffi_args))
            }
            TypeTag::Void => {
                self.cif.call::<()>(code, &ffi_args);
                NativeValue::Void
            }
        }
    }
}

fn arg_for(value: &NativeValue) -> Arg {
    match value {
        NativeValue::I8(v) => Arg::new(v),
        NativeValue::U8(v) => Arg::new(v),
        NativeValue::I16(v) => Arg::new(v),
        NativeValue::U16(v) => Arg::new(v),
        NativeValue::I32(v) => Arg::new(v),
        NativeValue::U32(v) => Arg::new(v),
        NativeValue::Long(v) => Arg::new(v),
        NativeValue::ULong(v) => Arg::new(v),
        NativeValue::I64(v) => Arg::new(v),
        NativeValue::U64(v) => Arg::new(v),
        NativeValue::F32(v) => Arg::new(v),
        NativeValue::F64(v) => Arg::new(v),
        NativeValue::Bool(v) => Arg::new(v),
        NativeValue::Ptr(v) => Arg::new(v),
        NativeValue::CStr(v) => Arg::new(v),
        // Void never reaches argument position; signatures are validated
        // at construction
        NativeValue::Void => unreachable!(),
    }
}

/// Trampoline state referenced by the generated stub on every call
struct StubData {
    func: ManagedFn,
    args: Vec<TypeTag>,
    ret: TypeTag,
}

/// Owned native trampoline for an inbound call
///
/// Allocates an executable closure whose entry address native code can
/// call. The closure reads the native argument slots, invokes the managed
/// function, and writes the native return slot. Freed on drop, which
/// invalidates the entry address.
pub(crate) struct InStub {
    closure: *mut low::ffi_closure,
    entry: CodePtr,
    // The prepared closure reads this Cif's ffi_cif on every call; boxed
    // so that address stays stable when the InStub moves
    _cif: Box<Cif>,
    _data: Box<StubData>,
}

// Safety: the closure is immutable after preparation and the managed
// function it wraps is Send + Sync
unsafe impl Send for InStub {}
unsafe impl Sync for InStub {}

impl InStub {
    pub(crate) fn new(args: &[TypeTag], ret: TypeTag, func: ManagedFn) -> InteropResult<Self> {
        check_arg_tags(args)?;
        if ret == TypeTag::CString {
            return Err(InteropError::UnsupportedSignature(
                "managed code cannot return a borrowed C string".to_string(),
            ));
        }

        let cif = Box::new(Cif::new(args.iter().map(|t| ffi_type(*t)), ffi_type(ret)));
        let data = Box::new(StubData {
            func,
            args: args.to_vec(),
            ret,
        });

        let (closure, entry) = low::closure_alloc();
        if closure.is_null() {
            return Err(InteropError::PrimitiveFailed(
                "Trampoline allocation failed".to_string(),
            ));
        }

        let prepared = unsafe {
            low::prep_closure(
                closure,
                cif.as_raw_ptr(),
                glue,
                &*data as *const StubData,
                entry,
            )
        };
        if prepared.is_err() {
            unsafe { low::closure_free(closure) };
            return Err(InteropError::PrimitiveFailed(
                "Trampoline preparation failed".to_string(),
            ));
        }

        Ok(InStub {
            closure,
            entry,
            _cif: cif,
            _data: data,
        })
    }

    /// Entry address native code can call
    pub(crate) fn entry(&self) -> usize {
        self.entry.0 as usize
    }
}

impl Drop for InStub {
    fn drop(&mut self) {
        unsafe { low::closure_free(self.closure) };
    }
}

/// Closure glue invoked by libffi when native code calls the stub
unsafe extern "C" fn glue(
    _cif: &low::ffi_cif,
    result: &mut low::ffi_arg,
    args: *const *const c_void,
    userdata: &StubData,
) {
    let ctx = MarshalContext::new();
    let mut values = Vec::with_capacity(userdata.args.len());
    for (i, tag) in userdata.args.iter().enumerate() {
        let native = read_arg(*args.add(i), *tag);
        match ctx.from_native(&native) {
            Ok(value) => values.push(value),
            Err(_) => {
                write_zero(result, userdata.ret);
                return;
            }
        }
    }

    // Neither an error nor a panic may cross the C boundary; both surface
    // the zero value of the return type instead
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (userdata.func)(&values)));
    match outcome {
        Ok(Ok(value)) => write_result(result, userdata.ret, &value),
        _ => write_zero(result, userdata.ret),
    }
}

/// Read one native argument slot at the tag's exact width
unsafe fn read_arg(slot: *const c_void, tag: TypeTag) -> NativeValue {
    match tag {
        TypeTag::Int8 => NativeValue::I8(*(slot as *const i8)),
        TypeTag::UInt8 => NativeValue::U8(*(slot as *const u8)),
        TypeTag::Int16 => NativeValue::I16(*(slot as *const i16)),
        TypeTag::UInt16 => NativeValue::U16(*(slot as *const u16)),
        TypeTag::Int32 => NativeValue::I32(*(slot as *const i32)),
        TypeTag::UInt32 => NativeValue::U32(*(slot as *const u32)),
        TypeTag::Long => NativeValue::Long(*(slot as *const c_long)),
        TypeTag::ULong => NativeValue::ULong(*(slot as *const c_ulong)),
        TypeTag::Int64 => NativeValue::I64(*(slot as *const i64)),
        TypeTag::UInt64 => NativeValue::U64(*(slot as *const u64)),
        TypeTag::Float32 => NativeValue::F32(*(slot as *const f32)),
        TypeTag::Float64 => NativeValue::F64(*(slot as *const f64)),
        TypeTag::Bool => NativeValue::Bool(*(slot as *const u8)),
        TypeTag::Pointer => NativeValue::Ptr(*(slot as *const *mut c_void)),
        TypeTag::CString => NativeValue::CStr(*(slot as *const *const c_char)),
        TypeTag::Void => unreachable!(),
    }
}

/// Marshal a managed result and write it to the native return slot
unsafe fn write_result(result: &mut low::ffi_arg, ret: TypeTag, value: &Value) {
    let mut ctx = MarshalContext::new();
    let native = match ctx.to_native(value, ret) {
        Ok(native) => native,
        Err(_) => {
            write_zero(result, ret);
            return;
        }
    };

    let slot = result as *mut low::ffi_arg;
    match native {
        NativeValue::I8(v) => *slot = v as low::ffi_arg,
        NativeValue::U8(v) => *slot = v as low::ffi_arg,
        NativeValue::I16(v) => *slot = v as low::ffi_arg,
        NativeValue::U16(v) => *slot = v as low::ffi_arg,
        NativeValue::I32(v) => *slot = v as low::ffi_arg,
        NativeValue::U32(v) => *slot = v as low::ffi_arg,
        NativeValue::Long(v) => *slot = v as low::ffi_arg,
        NativeValue::ULong(v) => *slot = v as low::ffi_arg,
        NativeValue::I64(v) => *(slot as *mut i64) = v,
        NativeValue::U64(v) => *(slot as *mut u64) = v,
        NativeValue::F32(v) => *(slot as *mut f32) = v,
        NativeValue::F64(v) => *(slot as *mut f64) = v,
        NativeValue::Bool(v) => *slot = v as low::ffi_arg,
        NativeValue::Ptr(v) => *(slot as *mut *mut c_void) = v,
        // Rejected at construction
        NativeValue::CStr(_) => unreachable!(),
        NativeValue::Void => {}
    }
}

unsafe fn write_zero(result: &mut low::ffi_arg, ret: TypeTag) {
    let slot = result as *mut low::ffi_arg;
    match ret {
        TypeTag::Float32 => *(slot as *mut f32) = 0.0,
        TypeTag::Float64 => *(slot as *mut f64) = 0.0,
        TypeTag::Int64 | TypeTag::UInt64 => *(slot as *mut u64) = 0,
        TypeTag::Pointer | TypeTag::CString => *(slot as *mut usize) = 0,
        TypeTag::Void => {}
        _ => *slot = 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::os::raw::c_int;

    extern "C" fn native_add(a: c_int, b: c_int) -> c_int {
        a + b
    }

    extern "C" fn native_halve(x: f64) -> f64 {
        x / 2.0
    }

    #[test]
    fn test_out_call_int() {
        let cif = OutCif::new(&[TypeTag::Int32, TypeTag::Int32], TypeTag::Int32).unwrap();
        let args = [NativeValue::I32(10), NativeValue::I32(20)];
        let result = unsafe { cif.call(native_add as usize, &args) };
        assert_eq!(result, NativeValue::I32(30));
    }

    #[test]
    fn test_out_call_double() {
        let cif = OutCif::new(&[TypeTag::Float64], TypeTag::Float64).unwrap();
        let args = [NativeValue::F64(5.0)];
        let result = unsafe { cif.call(native_halve as usize, &args) };
        assert_eq!(result, NativeValue::F64(2.5));
    }

    #[test]
    fn test_void_argument_rejected() {
        let result = OutCif::new(&[TypeTag::Void], TypeTag::Int32);
        assert!(matches!(
            result,
            Err(InteropError::UnsupportedSignature(_))
        ));
    }

    #[test]
    fn test_stub_add() {
        let func: ManagedFn = Arc::new(|args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
            _ => Err(InteropError::TypeError("expected two ints".to_string())),
        });
        let stub = InStub::new(&[TypeTag::Int32, TypeTag::Int32], TypeTag::Int32, func).unwrap();

        let f: extern "C" fn(c_int, c_int) -> c_int =
            unsafe { std::mem::transmute(stub.entry()) };
        assert_eq!(f(3, 4), 7);
        assert_eq!(f(-10, 4), -6);
    }

    #[test]
    fn test_stub_error_returns_zero() {
        let func: ManagedFn =
            Arc::new(|_| Err(InteropError::PrimitiveFailed("boom".to_string())));
        let stub = InStub::new(&[], TypeTag::Int32, func).unwrap();

        let f: extern "C" fn() -> c_int = unsafe { std::mem::transmute(stub.entry()) };
        assert_eq!(f(), 0);
    }

    #[test]
    fn test_stub_panic_returns_zero() {
        let func: ManagedFn = Arc::new(|_| panic!("managed failure"));
        let stub = InStub::new(&[TypeTag::Int32], TypeTag::Int32, func).unwrap();

        let f: extern "C" fn(c_int) -> c_int = unsafe { std::mem::transmute(stub.entry()) };
        assert_eq!(f(5), 0);
    }

    #[test]
    fn test_stub_double() {
        let func: ManagedFn = Arc::new(|args| match args {
            [Value::Float(x)] => Ok(Value::Float(x * 3.0)),
            _ => Err(InteropError::TypeError("expected a float".to_string())),
        });
        let stub = InStub::new(&[TypeTag::Float64], TypeTag::Float64, func).unwrap();

        let f: extern "C" fn(f64) -> f64 = unsafe { std::mem::transmute(stub.entry()) };
        assert_eq!(f(2.0), 6.0);
    }

    #[test]
    fn test_stub_cstring_return_rejected() {
        let func: ManagedFn = Arc::new(|_| Ok(Value::string("x")));
        let result = InStub::new(&[], TypeTag::CString, func);
        assert!(matches!(
            result,
            Err(InteropError::UnsupportedSignature(_))
        ));
    }
}
