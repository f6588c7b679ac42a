//! Argument trees for task callables.
//!
//! Arguments are arbitrary JSON-shaped data: positional values plus named
//! values, nested to any depth. String leaves may name filesystem paths; the
//! stat probe in [`crate::fs`] discovers those at fingerprint time. The named
//! map is a `BTreeMap` (serde_json's default), which is what gives the probe
//! its deterministic sorted-key visit order.

use std::{collections::BTreeMap, path::PathBuf};

use serde::Serialize;
use serde_json::json;

pub use serde_json::Value;

/// Positional and named arguments handed to a task callable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Args {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn kw(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// Positional string argument interpreted as a path.
    pub fn path(&self, index: usize) -> Option<PathBuf> {
        self.get(index).and_then(Value::as_str).map(PathBuf::from)
    }

    /// Named string argument interpreted as a path.
    pub fn kw_path(&self, name: &str) -> Option<PathBuf> {
        self.kw(name).and_then(Value::as_str).map(PathBuf::from)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// The whole tree as a single value, used by the probe and the
    /// fingerprint engine.
    pub fn to_value(&self) -> Value {
        json!({
            "args": self.positional,
            "kwargs": self.named,
        })
    }
}
