//! Task callables and their stable identities.
//!
//! Memoization only works if a callable can be named in a way that survives
//! process restarts, so every callable carries an identity string that is
//! folded into the task fingerprint. Plain functions are registered under a
//! caller-supplied qualified name; stateful operations implement
//! [`EncapsulatedOp`] and derive their identity from the concrete type name
//! plus a digest of their construction state.

use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::args::Args;

/// Error type user callables may return. Anything that converts into a boxed
/// error works, including plain strings.
pub type CallError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type CallResult = std::result::Result<(), CallError>;

/// A unit of user work with a stable identity.
#[derive(Clone)]
pub struct Callable {
    identity: String,
    func: Arc<dyn Fn(&Args) -> CallResult + Send + Sync>,
}

impl Callable {
    /// Wrap a function under a stable qualified name.
    ///
    /// The name is the function's identity for memoization: reuse it across
    /// runs for cache hits, change it when the function's behavior changes.
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Args) -> CallResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            identity: name.into(),
            func: Arc::new(func),
        }
    }

    /// Wrap a stateful operation.
    ///
    /// The identity is the operation's type name joined with a digest of its
    /// [`EncapsulatedOp::state`], so two instances constructed with equal
    /// state share an identity while differing state or a different type does
    /// not.
    pub fn encapsulated<O>(op: O) -> Self
    where
        O: EncapsulatedOp + 'static,
    {
        let state = serde_json::to_string(&op.state())
            .expect("serializing a serde_json::Value is infallible");
        let digest = blake3::hash(state.as_bytes()).to_hex();
        Self {
            identity: format!("{}#{digest}", std::any::type_name::<O>()),
            func: Arc::new(move |args| op.call(args)),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn invoke(&self, args: &Args) -> CallResult {
        (self.func)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callable").field(&self.identity).finish()
    }
}

/// A callable that closes over explicit construction state.
pub trait EncapsulatedOp: Send + Sync {
    /// Construction state contributing to the operation's identity.
    ///
    /// Return everything that changes what [`EncapsulatedOp::call`] does.
    /// State left out of this value is invisible to memoization.
    fn state(&self) -> Value {
        Value::Null
    }

    fn call(&self, args: &Args) -> CallResult;
}
