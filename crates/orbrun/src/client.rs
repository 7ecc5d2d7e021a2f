//! # Client Endpoint
//!
//! Turns typed calls into call envelopes, sends them through a `Transport`,
//! and turns the reply back into a typed result or a `ClientError`.
//!
//! Each client picks a random session id, sent with every call, which the
//! server records as the owner of objects made on its behalf. Sequence numbers
//! double as command ids for cancellation; they start at a random 32-bit
//! offset so that ids from different clients rarely collide on one server.
//!
//! ## Delivery
//!
//! At most once. A COMM_FAILURE (transport error or timeout) says nothing about
//! whether the server executed the call; only idempotent operations such as
//! `delete_object` are safe to retry blindly.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashSet;
use orbrpc::CallEncoder;
use orbrpc::CallFlags;
use orbrpc::DecodeContext;
use orbrpc::Frame;
use orbrpc::ObjectId;
use orbrpc::Pack;
use orbrpc::Status;
use orbrpc::Unpack;
use orbrpc::pack_to_vec;
use orbrpc::unpack_exact;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::warn;

use crate::proxy::FactoryProxy;
use crate::proxy::ObjectProxy;
use crate::transport::Transport;

/// Errors surfaced to callers of remote methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport failure or timeout. The call may or may not have executed.
    CommFailure(String),
    /// The remote method failed; carries the server's message.
    Exception(String),
    /// The server's credential check rejected the call.
    AuthFailure(String),
    /// Malformed or mismatched frames.
    Protocol(orbrpc::Error),
    /// `make_object` returned the invalid-id sentinel.
    Construction(String),
    /// A proxy for this id is already live on this client.
    AlreadyBound(ObjectId),
}

impl ClientError {
    /// The reply status this error corresponds to.
    pub fn status(&self) -> Status {
        match self {
            Self::CommFailure(_) => Status::CommFailure,
            Self::AuthFailure(_) => Status::AuthFailure,
            _ => Status::Exception,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommFailure(_))
    }

    /// Message carried by the server, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::CommFailure(msg) | Self::Exception(msg) | Self::AuthFailure(msg) => Some(msg),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommFailure(msg) => write!(f, "communication failure: {}", msg),
            Self::Exception(msg) => write!(f, "remote exception: {}", msg),
            Self::AuthFailure(msg) => write!(f, "authentication failure: {}", msg),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::Construction(msg) => write!(f, "construction failed: {}", msg),
            Self::AlreadyBound(id) => write!(f, "{} already has a proxy", id),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<orbrpc::Error> for ClientError {
    fn from(e: orbrpc::Error) -> Self {
        Self::Protocol(e)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client endpoint configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name used in logs.
    pub name: String,
    /// How long a call waits for its reply before failing with COMM_FAILURE.
    pub timeout: Duration,
    /// Token sent with every call for the server's auth hook.
    pub credential: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "orbrun-client".to_string(),
            timeout: Duration::from_secs(30),
            credential: None,
        }
    }
}

impl ClientConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

pub struct Client {
    name: String,
    timeout: Duration,
    credential: Option<String>,
    transport: Arc<dyn Transport>,
    session: u64,
    seq_gen: AtomicU64,
    active: DashSet<ObjectId>,
    /// Held shared while a new object is between construction and tracking,
    /// exclusively while `sync` snapshots and sends the active set.
    lifecycle: RwLock<()>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Arc<Self> {
        let mut rng = rand::thread_rng();
        let session: u64 = rng.r#gen();
        let seq_base = u64::from(rng.r#gen::<u32>()) + 1;

        debug!(name = %config.name, session, "client endpoint created");
        Arc::new(Self {
            name: config.name,
            timeout: config.timeout,
            credential: config.credential,
            transport,
            session,
            seq_gen: AtomicU64::new(seq_base),
            active: DashSet::new(),
            lifecycle: RwLock::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session id recorded by the server as owner of objects made by this client.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Reserves the sequence number, and so the command id, of a call.
    ///
    /// Pass it to `call_with_id` to be able to cancel that call through
    /// `FactoryProxy::cancel`.
    pub fn next_command_id(&self) -> u64 {
        self.seq_gen.fetch_add(1, Ordering::Relaxed)
    }

    /// The object factory at id 0.
    pub fn factory(self: &Arc<Self>) -> FactoryProxy {
        FactoryProxy::new(self.clone())
    }

    /// Constructs a remote object and binds a proxy to it.
    pub async fn make<T>(self: &Arc<Self>, type_name: &str) -> Result<ObjectProxy<T>> {
        let _lifecycle = self.lifecycle.read().await;
        let id = self.factory().make_object(type_name).await?;
        if !id.is_valid() {
            return Err(ClientError::Construction(format!("server could not construct {}", type_name)));
        }
        self.attach(id)
    }

    /// Binds a proxy to an existing remote object.
    ///
    /// At most one proxy per id is live on a client at a time.
    pub fn attach<T>(self: &Arc<Self>, id: ObjectId) -> Result<ObjectProxy<T>> {
        if id.is_factory() || !id.is_valid() {
            return Err(ClientError::Construction(format!("{} cannot be bound to a proxy", id)));
        }
        if !self.active.insert(id) {
            return Err(ClientError::AlreadyBound(id));
        }
        Ok(ObjectProxy::bind(self.clone(), id))
    }

    /// Ids of live proxies, ascending.
    pub fn active(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.active.iter().map(|id| *id).collect();
        ids.sort();
        ids
    }

    pub(crate) fn untrack(&self, id: ObjectId) {
        self.active.remove(&id);
    }

    /// Tells the server which objects this client still holds. Everything else
    /// it made for this client is reclaimed.
    ///
    /// Waits for in-flight `make` calls, so an object constructed but not yet
    /// bound to a proxy is never reclaimed.
    pub async fn sync(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.write().await;
        let ids = self.active();
        self.factory().sync_objects(&ids, true).await
    }

    /// Calls `method` on `target` and waits for the reply.
    pub async fn call<A, R>(&self, target: ObjectId, method: &str, flags: CallFlags, args: &A) -> Result<R>
    where
        A: Pack + ?Sized,
        R: Unpack,
    {
        self.call_with_id(self.next_command_id(), target, method, flags, args).await
    }

    /// Like `call`, under a command id obtained from `next_command_id`.
    pub async fn call_with_id<A, R>(
        &self,
        command_id: u64,
        target: ObjectId,
        method: &str,
        flags: CallFlags,
        args: &A,
    ) -> Result<R>
    where
        A: Pack + ?Sized,
        R: Unpack,
    {
        if flags.is_no_reply() {
            return Err(ClientError::Protocol(orbrpc::Error::ProtocolViolation(
                "NO_REPLY calls go through notify".into(),
            )));
        }

        let payload = self.encode(command_id, target, method, flags, args)?;
        debug!(seq = command_id, object = %target, method, "sending call");

        let reply = match tokio::time::timeout(self.timeout, self.transport.call(&payload)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(seq = command_id, object = %target, method, error = %e, "call failed in transport");
                return Err(ClientError::CommFailure(e.to_string()));
            }
            Err(_) => {
                warn!(seq = command_id, object = %target, method, "call timed out");
                return Err(ClientError::CommFailure(format!("no reply within {:?}", self.timeout)));
            }
        };

        let Frame::Reply(reply) = Frame::decode(&reply)? else {
            return Err(ClientError::Protocol(orbrpc::Error::ProtocolViolation(
                "received a call frame while waiting for a reply".into(),
            )));
        };

        if reply.seq != command_id {
            return Err(ClientError::Protocol(orbrpc::Error::ProtocolViolation(format!(
                "sequence mismatch: sent {}, received {}",
                command_id, reply.seq
            ))));
        }

        match reply.status {
            Status::Success => Ok(unpack_exact(reply.body, &DecodeContext::client())?),
            Status::Exception => Err(ClientError::Exception(reply.message())),
            Status::CommFailure => Err(ClientError::CommFailure(reply.message())),
            Status::AuthFailure => Err(ClientError::AuthFailure(reply.message())),
        }
    }

    /// Fire-and-forget call. Returns once the transport accepted the payload.
    pub async fn notify<A>(&self, target: ObjectId, method: &str, flags: CallFlags, args: &A) -> Result<()>
    where
        A: Pack + ?Sized,
    {
        let seq = self.next_command_id();
        let payload = self.encode(seq, target, method, flags | CallFlags::NO_REPLY, args)?;
        debug!(seq, object = %target, method, "sending one-way call");

        match tokio::time::timeout(self.timeout, self.transport.send(&payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ClientError::CommFailure(e.to_string())),
            Err(_) => Err(ClientError::CommFailure(format!("send not accepted within {:?}", self.timeout))),
        }
    }

    fn encode<A>(&self, seq: u64, target: ObjectId, method: &str, flags: CallFlags, args: &A) -> Result<Vec<u8>>
    where
        A: Pack + ?Sized,
    {
        let args = pack_to_vec(args)?;
        let frame = CallEncoder::new(seq, self.session, target, method, &args)
            .with_flags(flags)
            .with_credential(self.credential.as_deref())
            .into_bytes()?;
        Ok(frame)
    }
}
