//! # Object Proxies
//!
//! Typed client-side stubs, each bound to one remote object id. Generated
//! per-interface stubs wrap an `ObjectProxy<T>` and expose one async method per
//! remote method, each a thin `call(name, &(args,))`.
//!
//! ## Ownership
//!
//! A proxy is the unique client-side owner of its remote object: it is neither
//! `Clone` nor `Copy`, and a client refuses to bind a second proxy to a live
//! id. `release()` consumes the proxy and deletes the remote object. Dropping
//! a proxy without releasing it only forgets the id locally, leaving the object
//! for the next `Client::sync()` to reclaim.

use std::marker::PhantomData;
use std::sync::Arc;

use orbrpc::CallFlags;
use orbrpc::ObjectId;
use orbrpc::ObjectRef;
use orbrpc::Pack;
use orbrpc::Unpack;

use crate::cancel::CANCEL_PREFIX;
use crate::client::Client;
use crate::client::Result;

/// Stub bound to one remote object of type `T`.
pub struct ObjectProxy<T> {
    client: Arc<Client>,
    id: ObjectId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectProxy<T> {
    pub(crate) fn bind(client: Arc<Client>, id: ObjectId) -> Self {
        Self { client, id, _marker: PhantomData }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// A handle naming this object, for passing it as an argument to another
    /// remote method.
    pub fn handle(&self) -> ObjectRef<T> {
        ObjectRef::remote(self.id)
    }

    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Pack + ?Sized,
        R: Unpack,
    {
        self.client.call(self.id, method, CallFlags::NONE, args).await
    }

    pub async fn call_with_flags<A, R>(&self, method: &str, flags: CallFlags, args: &A) -> Result<R>
    where
        A: Pack + ?Sized,
        R: Unpack,
    {
        self.client.call(self.id, method, flags, args).await
    }

    /// Calls under a reserved command id so the call can be cancelled.
    pub async fn call_with_id<A, R>(&self, command_id: u64, method: &str, args: &A) -> Result<R>
    where
        A: Pack + ?Sized,
        R: Unpack,
    {
        self.client
            .call_with_id(command_id, self.id, method, CallFlags::NONE, args)
            .await
    }

    /// Fire-and-forget call; returns without waiting for the server.
    pub async fn notify<A>(&self, method: &str, args: &A) -> Result<()>
    where
        A: Pack + ?Sized,
    {
        self.client.notify(self.id, method, CallFlags::NONE, args).await
    }

    /// Snapshot of the whole remote object.
    pub async fn contents<R: Unpack>(&self) -> Result<R> {
        self.client
            .call(self.id, "", CallFlags::QUERY | CallFlags::GET_SERIALIZED_CONTENTS, &())
            .await
    }

    /// Deletes the remote object and gives up the proxy.
    pub async fn release(self) -> Result<()> {
        self.client.factory().delete_object(self.id).await
    }
}

impl<T> Drop for ObjectProxy<T> {
    fn drop(&mut self) {
        self.client.untrack(self.id);
    }
}

impl<T> std::fmt::Debug for ObjectProxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Stub for the object factory at id 0.
pub struct FactoryProxy {
    client: Arc<Client>,
}

impl FactoryProxy {
    pub(crate) fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Returns `ObjectId::INVALID` if the server cannot construct the type.
    pub async fn make_object(&self, type_name: &str) -> Result<ObjectId> {
        self.call("make_object", CallFlags::UPDATE, &(type_name,)).await
    }

    /// Idempotent; deleting an absent id succeeds.
    pub async fn delete_object(&self, id: ObjectId) -> Result<()> {
        self.call("delete_object", CallFlags::UPDATE, &(id,)).await
    }

    pub async fn ping(&self, value: &str) -> Result<String> {
        self.call("ping", CallFlags::QUERY, &(value,)).await
    }

    /// Asks the server to cancel the command running under `command_id`.
    ///
    /// Best effort: the command only stops once it polls its token, and a
    /// command that already finished is unaffected.
    pub async fn cancel(&self, command_id: u64) -> Result<()> {
        let value = format!("{}{}", CANCEL_PREFIX, command_id);
        self.ping(&value).await?;
        Ok(())
    }

    pub async fn get_status_publish_address(&self) -> Result<String> {
        self.call("get_status_publish_address", CallFlags::QUERY, &()).await
    }

    pub async fn get_control_address(&self) -> Result<String> {
        self.call("get_control_address", CallFlags::QUERY, &()).await
    }

    /// With `is_active`, `ids` is everything this client still holds;
    /// otherwise it is exactly the set to delete.
    pub async fn sync_objects(&self, ids: &[ObjectId], is_active: bool) -> Result<()> {
        self.call("sync_objects", CallFlags::UPDATE, &(ids, is_active)).await
    }

    async fn call<A, R>(&self, method: &str, flags: CallFlags, args: &A) -> Result<R>
    where
        A: Pack + ?Sized,
        R: Unpack,
    {
        self.client.call(ObjectId::FACTORY, method, flags, args).await
    }
}
