//! # Decode Context
//!
//! Decoding arguments on the server may need to turn a remote object handle
//! into the live instance it names. Rather than consulting ambient state, every
//! `Unpack` call receives a `DecodeContext` that says on whose behalf the bytes
//! are being read: a server (with access to its object registry) or a client.
//!
//! ## Invariants
//! - A context is either server or client, never both.
//! - A context only lives for the decoding of one envelope.

use std::any::Any;
use std::sync::Arc;

use orbpack::Decoder;
use orbpack::Encoder;

use crate::codec::Pack;
use crate::codec::Unpack;
use crate::error::Error;
use crate::error::Result;

/// Identifier of a remote object, unique within one server lifetime.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The object factory, implicitly known to every client.
    pub const FACTORY: ObjectId = ObjectId(0);
    /// Returned by the factory when construction fails.
    pub const INVALID: ObjectId = ObjectId(u64::MAX);

    pub fn is_factory(self) -> bool {
        self == Self::FACTORY
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

impl Pack for ObjectId {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        Ok(enc.u64(self.0)?)
    }
}

impl Unpack for ObjectId {
    fn unpack(dec: &mut Decoder<'_>, _cx: &DecodeContext<'_>) -> Result<Self> {
        Ok(ObjectId(dec.u64()?))
    }
}

/// Lookup capability handed to the decoder by a server endpoint.
pub trait ObjectResolver: Send + Sync {
    /// Returns a strong reference to the instance registered under `id`.
    fn resolve(&self, id: ObjectId) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// On whose behalf a payload is being decoded.
#[derive(Clone, Copy)]
pub enum DecodeContext<'a> {
    /// A server endpoint; handles resolve against its registry.
    Server(&'a dyn ObjectResolver),
    /// A client endpoint; handles stay as bare ids.
    Client,
}

impl<'a> DecodeContext<'a> {
    pub fn server(resolver: &'a dyn ObjectResolver) -> Self {
        DecodeContext::Server(resolver)
    }

    pub fn client() -> Self {
        DecodeContext::Client
    }

    /// Returns `(server resolver, is client)`; exactly one side is set.
    pub fn get(&self) -> (Option<&'a dyn ObjectResolver>, bool) {
        match self {
            DecodeContext::Server(resolver) => (Some(*resolver), false),
            DecodeContext::Client => (None, true),
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, DecodeContext::Server(_))
    }

    /// Resolves `id` into a typed shared reference through the server registry.
    pub fn resolve_object<T: Any + Send + Sync>(&self, id: ObjectId) -> Result<Arc<T>> {
        let DecodeContext::Server(resolver) = self else {
            return Err(Error::ProtocolViolation(format!(
                "cannot resolve {} outside a server context", id
            )));
        };
        let instance = resolver.resolve(id).ok_or(Error::ObjectNotFound(id))?;
        instance.downcast::<T>().map_err(|_| Error::TypeMismatch {
            id,
            expected: std::any::type_name::<T>(),
        })
    }
}

impl std::fmt::Debug for DecodeContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeContext::Server(_) => write!(f, "DecodeContext::Server"),
            DecodeContext::Client => write!(f, "DecodeContext::Client"),
        }
    }
}

/// An argument or result that names another remote object.
///
/// Decoded on a server, it carries the live instance, held strongly for as
/// long as the handle exists. Decoded on a client, it only carries the id.
pub struct ObjectRef<T> {
    id: ObjectId,
    instance: Option<Arc<T>>,
}

impl<T> ObjectRef<T> {
    /// A handle that only names the object (client side).
    pub fn remote(id: ObjectId) -> Self {
        Self { id, instance: None }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The resolved instance, present only when decoded by a server.
    pub fn get(&self) -> Option<&T> {
        self.instance.as_deref()
    }

    pub fn instance(&self) -> Option<&Arc<T>> {
        self.instance.as_ref()
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, instance: self.instance.clone() }
    }
}

impl<T> std::fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.id)
            .field("resolved", &self.instance.is_some())
            .finish()
    }
}

impl<T> Pack for ObjectRef<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        Ok(enc.object_ref(self.id.0)?)
    }
}

impl<T: Any + Send + Sync> Unpack for ObjectRef<T> {
    fn unpack(dec: &mut Decoder<'_>, cx: &DecodeContext<'_>) -> Result<Self> {
        let id = ObjectId(dec.object_ref()?);
        match cx {
            DecodeContext::Server(_) => Ok(Self { id, instance: Some(cx.resolve_object::<T>(id)?) }),
            DecodeContext::Client => Ok(Self::remote(id)),
        }
    }
}
