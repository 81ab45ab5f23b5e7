//! Managed value representation
//!
//! The compact value set crossing the interop boundary.
//! - Int, Float, Bool, Null: immediate values (stack-allocated)
//! - Strings: heap-allocated, reference-counted (Arc<String>), immutable
//! - Pointer: fat pointer value (Copy)
//! - Callable: bound native callable, shared by reference
//! - Function: Rust closure callable with interop values
//! - Namespace: shared mutable container of published entries

use crate::callable::NativeCallable;
use crate::error::InteropError;
use crate::namespace::Namespace;
use crate::pointer::Pointer;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Explicit reference semantics wrapper.
///
/// `Shared<T>` opts into reference semantics: all clones point to the same
/// underlying value. Mutation through any clone is visible to all other
/// clones.
#[derive(Clone, Debug)]
pub struct Shared<T>(Arc<Mutex<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Shared(Arc::new(Mutex::new(value)))
    }

    /// Acquire the lock and apply a read function.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.0.lock().expect("Shared<T> lock poisoned");
        f(&*guard)
    }

    /// Acquire the lock and apply a mutation function.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.0.lock().expect("Shared<T> lock poisoned");
        f(&mut *guard)
    }

    /// Returns true if this is the only reference to the inner value.
    pub fn is_exclusively_owned(&self) -> bool {
        Arc::strong_count(&self.0) == 1
    }
}

impl<T> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        // Pointer equality — two Shared<T> are equal only if they are the
        // same allocation. Two different namespaces with the same contents
        // are NOT equal unless they are the same reference.
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Managed function type - Rust closure callable with interop values
///
/// Managed functions receive a slice of values and return either a value or
/// an interop error. Arc provides thread safety and cheap cloning for
/// sharing across execution contexts.
pub type ManagedFn = Arc<dyn Fn(&[Value]) -> Result<Value, InteropError> + Send + Sync>;

/// Interop value type
#[derive(Clone)]
pub enum Value {
    /// Signed 64-bit integer
    Int(i64),
    /// IEEE 754 double-precision float
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// String value (reference-counted, immutable)
    String(Arc<String>),
    /// Null value
    Null,
    /// Fat pointer value
    Pointer(Pointer),
    /// Bound native callable
    Callable(Arc<NativeCallable>),
    /// Managed function (Rust closure)
    Function(ManagedFn),
    /// Shared namespace of published entries
    Namespace(Shared<Namespace>),
}

impl Value {
    /// Create a new string value
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Arc::new(s.into()))
    }

    /// Wrap a namespace as a shared value
    pub fn namespace(ns: Namespace) -> Self {
        Value::Namespace(Shared::new(ns))
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Null => "null",
            Value::Pointer(_) => "pointer",
            Value::Callable(_) => "callable",
            Value::Function(_) => "function",
            Value::Namespace(_) => "namespace",
        }
    }
}

impl PartialEq for Value {
    /// Equality contract:
    ///
    /// **Value types** (content equality — two equal values may be different
    /// allocations): Int, Float, Bool, String, Null, Pointer (same kind and
    /// address).
    ///
    /// **Reference types** (identity equality — only the same allocation is
    /// equal): Callable, Function, Namespace. Closures have no meaningful
    /// content equality.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => a == b,
            // Different variants are never equal
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => {
                // No trailing .0 for whole numbers
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.0}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s.as_ref()),
            Value::Null => write!(f, "null"),
            Value::Pointer(p) => write!(f, "<pointer {}>", p),
            Value::Callable(c) => write!(f, "<callable {}>", c.signature()),
            Value::Function(_) => write!(f, "<managed fn>"),
            Value::Namespace(ns) => ns.with(|n| write!(f, "<namespace {}>", n.name())),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Null => write!(f, "Null"),
            Value::Pointer(p) => write!(f, "Pointer({:?})", p),
            Value::Callable(c) => write!(f, "Callable({})", c.signature()),
            Value::Function(_) => write!(f, "Function(<closure>)"),
            Value::Namespace(ns) => ns.with(|n| write!(f, "Namespace({:?})", n.name())),
        }
    }
}
