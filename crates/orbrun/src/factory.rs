//! # Object Factory
//!
//! The distinguished object at id 0. Clients use it to construct and destroy
//! objects, to ping the server (which doubles as the cancellation channel),
//! to discover the out-of-band channel addresses, and to reconcile the objects
//! they still hold after a crash.
//!
//! The factory is served through an ordinary `Interface<Factory>`, but it is
//! never an entry in the registry: it cannot be deleted or reconciled away.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use orbrpc::ObjectId;
use tracing::info;
use tracing::warn;

use crate::cancel;
use crate::cancel::Coordinator;
use crate::context::CallContext;
use crate::interface::Dispatch;
use crate::interface::Fault;
use crate::interface::Interface;
use crate::registry::Instance;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnknownType(String),
    /// The instance is not of the type registered under that name.
    TypeMismatch(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownType(name) => write!(f, "no constructor registered for {}", name),
            Self::TypeMismatch(name) => write!(f, "instance does not match type {}", name),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

type Constructor = Box<dyn Fn() -> std::result::Result<Instance, Fault> + Send + Sync>;

/// A constructible type: how to build one and how to dispatch to it.
struct Binding {
    constructor: Constructor,
    dispatch: Arc<dyn Dispatch>,
}

pub struct Factory {
    registry: Arc<Registry>,
    commands: Arc<Coordinator>,
    bindings: DashMap<String, Arc<Binding>>,
    status_address: String,
    control_address: String,
}

impl Factory {
    pub(crate) fn new(
        registry: Arc<Registry>,
        commands: Arc<Coordinator>,
        status_address: String,
        control_address: String,
    ) -> Self {
        Self {
            registry,
            commands,
            bindings: DashMap::new(),
            status_address,
            control_address,
        }
    }

    /// The factory's own wire surface.
    pub(crate) fn interface() -> Interface<Factory> {
        Interface::new("Factory")
            .method("make_object", |f: &Factory, (type_name,): (String,), cx: &CallContext| {
                Ok(f.make_object(&type_name, Some(cx.client())))
            })
            .method("delete_object", |f: &Factory, (id,): (ObjectId,), _: &CallContext| {
                f.delete_object(id);
                Ok(())
            })
            .method("ping", |f: &Factory, (value,): (String,), _: &CallContext| {
                Ok(f.ping(value))
            })
            .method("get_status_publish_address", |f: &Factory, (): (), _: &CallContext| {
                Ok(f.status_address().to_string())
            })
            .method("get_control_address", |f: &Factory, (): (), _: &CallContext| {
                Ok(f.control_address().to_string())
            })
            .method(
                "sync_objects",
                |f: &Factory, (ids, is_active): (Vec<ObjectId>, bool), cx: &CallContext| {
                    f.sync_objects(cx.client(), &ids, is_active);
                    Ok(())
                },
            )
    }

    /// Registers a constructible type under the interface's type name.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn add_constructor<T, F>(&self, interface: Interface<T>, constructor: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> std::result::Result<T, Fault> + Send + Sync + 'static,
    {
        let type_name = interface.type_name().to_string();
        let erased: Constructor = Box::new(move || -> std::result::Result<Instance, Fault> {
            let instance: Instance = Arc::new(constructor()?);
            Ok(instance)
        });
        let binding = Binding { constructor: erased, dispatch: Arc::new(interface) };
        if self.bindings.insert(type_name.clone(), Arc::new(binding)).is_some() {
            warn!(%type_name, "constructor replaced");
        }
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.bindings.contains_key(type_name)
    }

    /// Constructs and registers an instance of `type_name`.
    ///
    /// Returns `ObjectId::INVALID` if the type is unknown or its constructor
    /// fails or panics; nothing is registered in that case.
    pub fn make_object(&self, type_name: &str, owner: Option<u64>) -> ObjectId {
        let Some(binding) = self.binding(type_name) else {
            warn!(%type_name, "make_object for unknown type");
            return ObjectId::INVALID;
        };

        let built = std::panic::catch_unwind(AssertUnwindSafe(|| (binding.constructor)()));
        match built {
            Ok(Ok(instance)) => self.registry.register(instance, binding.dispatch.clone(), owner),
            Ok(Err(fault)) => {
                warn!(%type_name, %fault, "constructor failed");
                ObjectId::INVALID
            }
            Err(_) => {
                warn!(%type_name, "constructor panicked");
                ObjectId::INVALID
            }
        }
    }

    /// Registers a pre-built instance under a registered type name.
    pub fn insert_object<T: Any + Send + Sync>(
        &self,
        type_name: &str,
        object: T,
        owner: Option<u64>,
    ) -> Result<ObjectId> {
        let binding = self
            .binding(type_name)
            .ok_or_else(|| Error::UnknownType(type_name.to_string()))?;

        let instance: Instance = Arc::new(object);
        if !binding.dispatch.accepts(&*instance) {
            return Err(Error::TypeMismatch(type_name.to_string()));
        }
        Ok(self.registry.register(instance, binding.dispatch.clone(), owner))
    }

    /// Removes the object; unknown ids are ignored.
    pub fn delete_object(&self, id: ObjectId) {
        if !self.registry.erase(id) {
            info!(%id, "delete_object for absent id");
        }
    }

    /// Echoes `value`. A `ctrlc<id>` value also requests cancellation of the
    /// command running under `id`.
    pub fn ping(&self, value: String) -> String {
        if let Some(command) = cancel::parse_cancel_ping(&value) {
            self.commands.request_cancel(command);
        }
        value
    }

    pub fn sync_objects(&self, owner: u64, ids: &[ObjectId], is_active: bool) -> Vec<ObjectId> {
        self.registry.reconcile(owner, ids, is_active)
    }

    pub fn status_address(&self) -> &str {
        &self.status_address
    }

    pub fn control_address(&self) -> &str {
        &self.control_address
    }

    fn binding(&self, type_name: &str) -> Option<Arc<Binding>> {
        self.bindings.get(type_name).map(|entry| entry.value().clone())
    }
}
