//! # Dispatch Tables
//!
//! An `Interface<T>` binds method names to typed handlers for objects of type
//! `T`. It is the server half of the contract that generated stubs satisfy:
//! arguments arrive as one packed tuple, the result leaves as one packed
//! value, and any failure becomes a `Fault` carried back as an EXCEPTION reply.
//!
//! Tables are type-erased behind `Dispatch` so the registry can hold objects
//! of every registered type side by side.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;

use orbrpc::Pack;
use orbrpc::Unpack;
use orbrpc::pack_to_vec;
use orbrpc::unpack_exact;

use crate::context::CallContext;
use crate::registry;

/// Application-level failure of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    message: String,
}

impl Fault {
    pub const CANCELLED: &'static str = "cancelled";

    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// What a handler returns after observing `must_cancel()`.
    pub fn cancelled() -> Self {
        Self::new(Self::CANCELLED)
    }

    pub fn is_cancelled(&self) -> bool {
        self.message == Self::CANCELLED
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Fault {}

impl From<orbrpc::Error> for Fault {
    fn from(e: orbrpc::Error) -> Self {
        Self::new(e.to_string())
    }
}

impl From<registry::Error> for Fault {
    fn from(e: registry::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Type-erased dispatch table.
pub trait Dispatch: Send + Sync + 'static {
    fn type_name(&self) -> &str;

    /// Whether `instance` is of the type this table serves.
    fn accepts(&self, instance: &(dyn Any + Send + Sync)) -> bool;

    /// Invokes `method` with packed `args`, returning the packed result.
    fn invoke(
        &self,
        instance: &(dyn Any + Send + Sync),
        method: &str,
        args: &[u8],
        cx: &CallContext,
    ) -> Result<Vec<u8>, Fault>;

    /// Packed snapshot of the whole object.
    fn contents(&self, instance: &(dyn Any + Send + Sync), cx: &CallContext) -> Result<Vec<u8>, Fault>;
}

type Handler<T> = Box<dyn Fn(&T, &[u8], &CallContext) -> Result<Vec<u8>, Fault> + Send + Sync>;
type Snapshot<T> = Box<dyn Fn(&T) -> Result<Vec<u8>, Fault> + Send + Sync>;

/// Dispatch table for objects of type `T`.
pub struct Interface<T> {
    type_name: String,
    methods: HashMap<String, Handler<T>>,
    snapshot: Option<Snapshot<T>>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Any + Send + Sync> Interface<T> {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            methods: HashMap::new(),
            snapshot: None,
            _marker: PhantomData,
        }
    }

    /// Binds `name` to a handler taking the unpacked argument tuple `A`.
    ///
    /// Objects are shared between concurrent calls, so handlers get `&T` and
    /// mutate through interior mutability.
    pub fn method<A, R, F>(mut self, name: &str, handler: F) -> Self
    where
        A: Unpack,
        R: Pack,
        F: Fn(&T, A, &CallContext) -> Result<R, Fault> + Send + Sync + 'static,
    {
        let erased = move |object: &T, args: &[u8], cx: &CallContext| -> Result<Vec<u8>, Fault> {
            let args: A = unpack_exact(args, &cx.decode_context())?;
            let result = handler(object, args, cx)?;
            Ok(pack_to_vec(&result)?)
        };
        self.methods.insert(name.to_string(), Box::new(erased));
        self
    }

    /// Serves GET_SERIALIZED_CONTENTS calls with a snapshot of the object.
    pub fn contents<R, F>(mut self, snapshot: F) -> Self
    where
        R: Pack,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        self.snapshot = Some(Box::new(move |object: &T| -> Result<Vec<u8>, Fault> {
            Ok(pack_to_vec(&snapshot(object))?)
        }));
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    fn downcast<'a>(&self, instance: &'a (dyn Any + Send + Sync)) -> Result<&'a T, Fault> {
        instance.downcast_ref::<T>().ok_or_else(|| {
            Fault::new(format!("instance is not a {}", self.type_name))
        })
    }
}

impl<T: Any + Send + Sync> Dispatch for Interface<T> {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn accepts(&self, instance: &(dyn Any + Send + Sync)) -> bool {
        instance.is::<T>()
    }

    fn invoke(
        &self,
        instance: &(dyn Any + Send + Sync),
        method: &str,
        args: &[u8],
        cx: &CallContext,
    ) -> Result<Vec<u8>, Fault> {
        let object = self.downcast(instance)?;
        let handler = self.methods.get(method).ok_or_else(|| {
            Fault::new(format!("{} has no method {}", self.type_name, method))
        })?;
        handler(object, args, cx)
    }

    fn contents(&self, instance: &(dyn Any + Send + Sync), _cx: &CallContext) -> Result<Vec<u8>, Fault> {
        let object = self.downcast(instance)?;
        let snapshot = self.snapshot.as_ref().ok_or_else(|| {
            Fault::new(format!("{} does not serialize its contents", self.type_name))
        })?;
        snapshot(object)
    }
}
