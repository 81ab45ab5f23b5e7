//! Published entry namespaces
//!
//! A `Namespace` is an extensible container of named entries. Callables
//! publish themselves into one via `attach`, in two forms at once: a
//! directly invocable entry and a method usable by consumers that compose
//! the namespace into their own.

use crate::error::{InteropError, InteropResult};
use crate::value::{ManagedFn, Value};
use std::collections::HashMap;

/// Named container of published entries and methods
#[derive(Clone, Default)]
pub struct Namespace {
    name: String,
    entries: HashMap<String, Value>,
    methods: HashMap<String, ManagedFn>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Namespace {
            name: name.into(),
            entries: HashMap::new(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a directly invocable entry
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), value);
    }

    /// Publish a method for namespace composition
    pub fn define_method(&mut self, name: impl Into<String>, f: ManagedFn) {
        self.methods.insert(name.into(), f);
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> InteropResult<Value> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| InteropError::UnknownEntry {
                namespace: self.name.clone(),
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name) || self.methods.contains_key(name)
    }

    /// Invoke a published entry
    ///
    /// Entries take precedence over methods of the same name.
    pub fn call(&self, name: &str, args: &[Value]) -> InteropResult<Value> {
        if let Some(value) = self.entries.get(name) {
            return match value {
                Value::Function(f) => f(args),
                Value::Callable(c) => c.invoke(args),
                other => Err(InteropError::TypeError(format!(
                    "Entry '{}' is not callable: {}",
                    name,
                    other.type_name()
                ))),
            };
        }
        if let Some(f) = self.methods.get(name) {
            return f(args);
        }
        Err(InteropError::UnknownEntry {
            namespace: self.name.clone(),
            name: name.to_string(),
        })
    }

    /// Import another namespace's methods into this one
    pub fn compose(&mut self, other: &Namespace) {
        for (name, f) in &other.methods {
            self.methods.insert(name.clone(), f.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
