//! Bound native callables
//!
//! A `NativeCallable` bridges one call direction: call-out marshals managed
//! arguments, invokes a native entry, and marshals the result back; call-in
//! generates a native-invocable stub whose address native code can store
//! and call later. The callable is itself positioned at its entry address
//! and behaves as a pointer, so it composes with pointer-based APIs.
//!
//! # Safety
//!
//! The declared signature is trusted. Invoking a callable whose signature
//! does not match the actual ABI of the bound entry is undefined behavior,
//! not a recoverable error.

use crate::bridge::{InStub, OutCif};
use crate::error::{InteropError, InteropResult};
use crate::library::SymbolHandle;
use crate::marshal::MarshalContext;
use crate::pointer::{Pointer, PointerKind};
use crate::registry::{NativeValue, TypeTag};
use crate::value::{ManagedFn, Value};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Ordered argument types and return type of a native call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub args: Vec<TypeTag>,
    pub ret: TypeTag,
}

impl Signature {
    pub fn new(args: Vec<TypeTag>, ret: TypeTag) -> Self {
        Signature { args, ret }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|t| format!("{:?}", t)).collect();
        write!(f, "({}) -> {:?}", args.join(", "), self.ret)
    }
}

/// Where an outbound callable points
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// Bare entry address
    Address(usize),
    /// Entry resolved from a loaded library; keeps the library alive
    Symbol(SymbolHandle),
}

impl CallTarget {
    pub fn address(&self) -> usize {
        match self {
            CallTarget::Address(addr) => *addr,
            CallTarget::Symbol(handle) => handle.address(),
        }
    }
}

impl From<usize> for CallTarget {
    fn from(addr: usize) -> Self {
        CallTarget::Address(addr)
    }
}

impl From<Pointer> for CallTarget {
    fn from(ptr: Pointer) -> Self {
        CallTarget::Address(ptr.address())
    }
}

impl From<&SymbolHandle> for CallTarget {
    fn from(handle: &SymbolHandle) -> Self {
        CallTarget::Symbol(handle.clone())
    }
}

impl From<SymbolHandle> for CallTarget {
    fn from(handle: SymbolHandle) -> Self {
        CallTarget::Symbol(handle)
    }
}

enum CallableKind {
    /// Outbound: managed code calls a native entry
    Out {
        cif: OutCif,
        // Keeps a symbol's library loaded for the callable's lifetime
        _target: CallTarget,
    },
    /// Inbound: native code calls a managed function through the stub
    In {
        stub: InStub,
        // Drives the stub when managed code invokes it directly
        cif: OutCif,
    },
}

/// A native callable bound in one direction
pub struct NativeCallable {
    ptr: Pointer,
    sig: Signature,
    kind: CallableKind,
}

impl NativeCallable {
    /// Bind a callable from a signature and exactly one implementation
    ///
    /// Supplying both a native target and a managed function, or neither,
    /// is a construction error signaled before any bridge preparation.
    pub fn bind(
        sig: Signature,
        target: Option<CallTarget>,
        managed: Option<ManagedFn>,
    ) -> InteropResult<Arc<NativeCallable>> {
        match (target, managed) {
            (Some(target), None) => {
                let addr = target.address();
                if addr == 0 {
                    return Err(InteropError::NullPointer);
                }
                let cif = OutCif::new(&sig.args, sig.ret)?;
                Ok(Arc::new(NativeCallable {
                    ptr: Pointer::with_parts(addr, PointerKind::Callable, None, None),
                    sig,
                    kind: CallableKind::Out {
                        cif,
                        _target: target,
                    },
                }))
            }
            (None, Some(func)) => {
                let stub = InStub::new(&sig.args, sig.ret, func)?;
                let cif = OutCif::new(&sig.args, sig.ret)?;
                let ptr = Pointer::with_parts(stub.entry(), PointerKind::Callable, None, None);
                Ok(Arc::new(NativeCallable {
                    ptr,
                    sig,
                    kind: CallableKind::In { stub, cif },
                }))
            }
            _ => Err(InteropError::Binding),
        }
    }

    /// Bind a call-out bridge to an existing native entry
    pub fn call_out(
        ret: TypeTag,
        args: Vec<TypeTag>,
        target: impl Into<CallTarget>,
    ) -> InteropResult<Arc<NativeCallable>> {
        Self::bind(Signature::new(args, ret), Some(target.into()), None)
    }

    /// Generate a native-invocable stub for a managed function
    pub fn call_in(
        ret: TypeTag,
        args: Vec<TypeTag>,
        func: ManagedFn,
    ) -> InteropResult<Arc<NativeCallable>> {
        Self::bind(Signature::new(args, ret), None, Some(func))
    }

    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    /// The entry address as a non-owning pointer value
    pub fn pointer(&self) -> Pointer {
        self.ptr
    }

    /// Invoke the callable with managed arguments
    ///
    /// For a call-in callable this drives the generated stub through its
    /// own call interface, exercising the same path native code takes.
    pub fn invoke(&self, args: &[Value]) -> InteropResult<Value> {
        if args.len() != self.sig.args.len() {
            return Err(InteropError::ArityMismatch {
                expected: self.sig.args.len(),
                actual: args.len(),
            });
        }

        let mut ctx = MarshalContext::new();
        let native_args: Vec<NativeValue> = args
            .iter()
            .zip(self.sig.args.iter())
            .map(|(arg, tag)| ctx.to_native(arg, *tag))
            .collect::<InteropResult<Vec<_>>>()?;

        let result = match &self.kind {
            CallableKind::Out { cif, .. } => unsafe {
                cif.call(self.ptr.address(), &native_args)
            },
            CallableKind::In { stub, cif } => unsafe { cif.call(stub.entry(), &native_args) },
        };

        ctx.from_native(&result)
    }

    /// Publish this callable on a namespace under `name`
    ///
    /// The callable becomes both a directly invocable entry and a method
    /// entry usable by consumers that compose the namespace. A target that
    /// is not a namespace is a type error and nothing is published.
    pub fn attach(self: &Arc<Self>, namespace: &Value, name: &str) -> InteropResult<()> {
        match namespace {
            Value::Namespace(shared) => {
                let entry = Value::Callable(Arc::clone(self));
                let callable = Arc::clone(self);
                let method: ManagedFn = Arc::new(move |args| callable.invoke(args));
                shared.with_mut(|ns| {
                    ns.define(name, entry);
                    ns.define_method(name, method);
                });
                Ok(())
            }
            other => Err(InteropError::TypeError(format!(
                "Cannot attach a callable to {}",
                other.type_name()
            ))),
        }
    }
}

impl Deref for NativeCallable {
    type Target = Pointer;

    fn deref(&self) -> &Pointer {
        &self.ptr
    }
}

impl fmt::Debug for NativeCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.kind {
            CallableKind::Out { .. } => "out",
            CallableKind::In { .. } => "in",
        };
        write!(
            f,
            "NativeCallable({} {} at {})",
            direction, self.sig, self.ptr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use std::os::raw::{c_double, c_int};
    use std::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn test_add(a: c_int, b: c_int) -> c_int {
        a + b
    }

    extern "C" fn test_scale(x: c_double, factor: c_double) -> c_double {
        x * factor
    }

    extern "C" fn test_answer() -> c_int {
        42
    }

    #[test]
    fn test_call_out_add() {
        let callable = NativeCallable::call_out(
            TypeTag::Int32,
            vec![TypeTag::Int32, TypeTag::Int32],
            test_add as usize,
        )
        .unwrap();

        let result = callable.invoke(&[Value::Int(10), Value::Int(20)]).unwrap();
        assert_eq!(result, Value::Int(30));
    }

    #[test]
    fn test_call_out_no_args() {
        let callable =
            NativeCallable::call_out(TypeTag::Int32, vec![], test_answer as usize).unwrap();
        let result = callable.invoke(&[]).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn test_call_out_doubles() {
        let callable = NativeCallable::call_out(
            TypeTag::Float64,
            vec![TypeTag::Float64, TypeTag::Float64],
            test_scale as usize,
        )
        .unwrap();

        let result = callable
            .invoke(&[Value::Float(2.5), Value::Float(4.0)])
            .unwrap();
        assert_eq!(result, Value::Float(10.0));
    }

    #[test]
    fn test_arity_mismatch() {
        let callable = NativeCallable::call_out(
            TypeTag::Int32,
            vec![TypeTag::Int32, TypeTag::Int32],
            test_add as usize,
        )
        .unwrap();

        let result = callable.invoke(&[Value::Int(1)]);
        assert!(matches!(
            result,
            Err(InteropError::ArityMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_bind_requires_exactly_one() {
        let sig = Signature::new(vec![], TypeTag::Int32);
        let result = NativeCallable::bind(sig.clone(), None, None);
        assert!(matches!(result, Err(InteropError::Binding)));

        let f: ManagedFn = Arc::new(|_| Ok(Value::Int(1)));
        let result = NativeCallable::bind(
            sig,
            Some(CallTarget::Address(test_answer as usize)),
            Some(f),
        );
        assert!(matches!(result, Err(InteropError::Binding)));
    }

    #[test]
    fn test_bind_null_target() {
        let result =
            NativeCallable::call_out(TypeTag::Int32, vec![], Pointer::null());
        assert!(matches!(result, Err(InteropError::NullPointer)));
    }

    #[test]
    fn test_call_in_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let f: ManagedFn = Arc::new(move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            match args {
                [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a * b)),
                _ => Err(InteropError::TypeError("expected two ints".to_string())),
            }
        });

        let callable =
            NativeCallable::call_in(TypeTag::Int32, vec![TypeTag::Int32, TypeTag::Int32], f)
                .unwrap();

        let result = callable.invoke(&[Value::Int(6), Value::Int(7)]).unwrap();
        assert_eq!(result, Value::Int(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callable_is_a_pointer() {
        let callable =
            NativeCallable::call_out(TypeTag::Int32, vec![], test_answer as usize).unwrap();
        assert!(!callable.is_null());
        assert_eq!(callable.kind(), PointerKind::Callable);
        assert_eq!(callable.address(), test_answer as usize);
    }

    #[test]
    fn test_signature_display() {
        let sig = Signature::new(vec![TypeTag::Int32, TypeTag::Int32], TypeTag::Int32);
        assert_eq!(sig.to_string(), "(Int32, Int32) -> Int32");

        let sig = Signature::new(vec![], TypeTag::Void);
        assert_eq!(sig.to_string(), "() -> Void");
    }

    #[test]
    fn test_attach_to_namespace() {
        let callable = NativeCallable::call_out(
            TypeTag::Int32,
            vec![TypeTag::Int32, TypeTag::Int32],
            test_add as usize,
        )
        .unwrap();

        let ns = Value::namespace(Namespace::new("math"));
        callable.attach(&ns, "add").unwrap();

        let shared = match &ns {
            Value::Namespace(shared) => shared,
            _ => unreachable!(),
        };

        // Published as a directly invocable entry
        let result = shared
            .with(|n| n.call("add", &[Value::Int(2), Value::Int(3)]))
            .unwrap();
        assert_eq!(result, Value::Int(5));

        // And retrievable as a value sharing the same binding
        match shared.with(|n| n.get("add")).unwrap() {
            Value::Callable(c) => assert!(Arc::ptr_eq(&c, &callable)),
            other => panic!("expected a callable, got {:?}", other),
        }

        // Method entries survive composition into another namespace
        let mut importer = Namespace::new("importer");
        shared.with(|n| importer.compose(n));
        let result = importer.call("add", &[Value::Int(20), Value::Int(22)]).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn test_attach_to_non_namespace() {
        let callable =
            NativeCallable::call_out(TypeTag::Int32, vec![], test_answer as usize).unwrap();
        let result = callable.attach(&Value::Int(1), "x");
        assert!(matches!(result, Err(InteropError::TypeError(_))));
    }
}
