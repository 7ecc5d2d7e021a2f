//! # Server Endpoint
//!
//! Turns call envelopes into method invocations on live objects.
//!
//! ## Pipeline
//!
//! 1. Decode the frame. Undecodable input gets an EXCEPTION reply addressed to
//!    whatever sequence number could be salvaged, or 0.
//! 2. Refuse the call if the endpoint was stopped through the control channel.
//! 3. Run the authentication hook, if any. Rejection short-circuits with
//!    AUTH_FAILURE before anything else happens.
//! 4. Take a command slot keyed by the call's sequence number.
//! 5. Resolve the target (id 0 is the factory) and invoke the method on the
//!    blocking pool, with panics caught at the boundary.
//! 6. Encode the result or fault, unless the call was NO_REPLY.
//!
//! ## Invariants
//!
//! - A handler panic never takes the endpoint down.
//! - The target instance is held strongly for the whole invocation.
//! - NO_REPLY calls never produce a reply, successful or not.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use orbrpc::CallFlags;
use orbrpc::DecodeContext;
use orbrpc::Frame;
use orbrpc::ObjectId;
use orbrpc::ReplyEncoder;
use orbrpc::Status;
use orbrpc::decode_seq;
use orbrpc::pack_to_vec;
use orbrpc::unpack_exact;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::auth::AuthHook;
use crate::cancel::Coordinator;
use crate::context::CallContext;
use crate::factory;
use crate::factory::Factory;
use crate::interface::Dispatch;
use crate::interface::Fault;
use crate::interface::Interface;
use crate::registry::Instance;
use crate::registry::Registry;
use crate::transport::StatusSink;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The control channel received a signal it does not understand.
    UnknownSignal(String),
    /// A status publish was requested but no sink is configured.
    NoStatusSink,
    Encode(orbrpc::Error),
    Publish(TransportError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSignal(signal) => write!(f, "unknown control signal: {:?}", signal),
            Self::NoStatusSink => write!(f, "no status sink configured"),
            Self::Encode(e) => write!(f, "status encoding failed: {}", e),
            Self::Publish(e) => write!(f, "status publish failed: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Publish(e) => Some(e),
            _ => None,
        }
    }
}

impl From<orbrpc::Error> for Error {
    fn from(e: orbrpc::Error) -> Self {
        Self::Encode(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Publish(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Server endpoint configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Name used in logs and status records.
    pub name: String,
    /// Address the status channel publishes on, handed out by the factory.
    pub status_address: String,
    /// Address the control channel listens on, handed out by the factory.
    pub control_address: String,
    pub auth: Option<Arc<dyn AuthHook>>,
    pub status_sink: Option<Arc<dyn StatusSink>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "orbrun".to_string(),
            status_address: "inproc://orbrun/status".to_string(),
            control_address: "inproc://orbrun/control".to_string(),
            auth: None,
            status_sink: None,
        }
    }
}

impl ServerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_status_address(mut self, address: impl Into<String>) -> Self {
        self.status_address = address.into();
        self
    }

    pub fn with_control_address(mut self, address: impl Into<String>) -> Self {
        self.control_address = address.into();
        self
    }

    pub fn with_auth(mut self, auth: impl AuthHook) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = Some(sink);
        self
    }
}

/// Liveness record sent on the status channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub name: String,
    pub live_objects: u64,
    pub running: Vec<u64>,
    pub stopped: bool,
}

impl StatusRecord {
    pub fn encode(&self) -> orbrpc::Result<Vec<u8>> {
        pack_to_vec(&(&self.name, self.live_objects, &self.running, self.stopped))
    }

    pub fn decode(bytes: &[u8]) -> orbrpc::Result<Self> {
        let (name, live_objects, running, stopped): (String, u64, Vec<u64>, bool) =
            unpack_exact(bytes, &DecodeContext::client())?;
        Ok(Self { name, live_objects, running, stopped })
    }
}

/// Why a call produced a non-SUCCESS reply.
struct Failure {
    status: Status,
    message: String,
}

impl Failure {
    fn exception(message: impl Into<String>) -> Self {
        Self { status: Status::Exception, message: message.into() }
    }
}

/// Owned copy of a decoded call, moved onto the blocking pool.
struct Request {
    seq: u64,
    client: u64,
    target: ObjectId,
    method: String,
    flags: CallFlags,
    args: Vec<u8>,
}

pub struct Server {
    name: String,
    auth: Option<Arc<dyn AuthHook>>,
    status_sink: Option<Arc<dyn StatusSink>>,
    registry: Arc<Registry>,
    commands: Arc<Coordinator>,
    factory: Arc<Factory>,
    factory_dispatch: Arc<dyn Dispatch>,
    stopped: AtomicBool,
}

impl Server {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let commands = Arc::new(Coordinator::new());
        let factory = Arc::new(Factory::new(
            registry.clone(),
            commands.clone(),
            config.status_address,
            config.control_address,
        ));

        info!(name = %config.name, "server endpoint created");
        Arc::new(Self {
            name: config.name,
            auth: config.auth,
            status_sink: config.status_sink,
            registry,
            commands,
            factory,
            factory_dispatch: Arc::new(Factory::interface()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Makes `T` constructible through `make_object(type_name)`.
    pub fn register_type<T, F>(&self, interface: Interface<T>, constructor: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> std::result::Result<T, Fault> + Send + Sync + 'static,
    {
        self.factory.add_constructor(interface, constructor);
    }

    /// Registers a pre-built object of a registered type.
    pub fn insert_object<T: Any + Send + Sync>(
        &self,
        type_name: &str,
        object: T,
        owner: Option<u64>,
    ) -> factory::Result<ObjectId> {
        self.factory.insert_object(type_name, object, owner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn commands(&self) -> &Coordinator {
        &self.commands
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Handles one raw call frame. Returns the reply frame, or `None` for
    /// NO_REPLY calls.
    pub async fn handle(self: &Arc<Self>, bytes: &[u8]) -> Option<Vec<u8>> {
        let call = match Frame::decode(bytes) {
            Ok(Frame::Call(call)) => call,
            Ok(Frame::Reply(reply)) => {
                warn!(seq = reply.seq, "reply frame sent to server endpoint");
                return encode_reply(reply.seq, Err(Failure::exception("expected a call frame")));
            }
            Err(e) => {
                let seq = decode_seq(bytes).unwrap_or(0);
                warn!(seq, error = %e, "undecodable call frame");
                return encode_reply(seq, Err(Failure::exception(e.to_string())));
            }
        };

        let seq = call.seq;
        let no_reply = call.flags.is_no_reply();
        let request = Request {
            seq,
            client: call.client,
            target: call.target,
            method: call.method.to_string(),
            flags: call.flags,
            args: call.args.to_vec(),
        };

        let outcome = self.execute(request, call.credential).await;
        if no_reply {
            if let Err(failure) = &outcome {
                debug!(seq, message = %failure.message, "one-way call failed");
            }
            return None;
        }
        encode_reply(seq, outcome)
    }

    async fn execute(
        self: &Arc<Self>,
        request: Request,
        credential: Option<&str>,
    ) -> std::result::Result<Vec<u8>, Failure> {
        if self.is_stopped() {
            return Err(Failure::exception("endpoint stopped"));
        }

        if let Some(auth) = &self.auth {
            if let Err(e) = auth.check(credential, request.target, &request.method) {
                warn!(seq = request.seq, object = %request.target, method = %request.method, error = %e, "call rejected");
                return Err(Failure { status: Status::AuthFailure, message: e.to_string() });
            }
        }

        let guard = self
            .commands
            .begin(request.seq)
            .map_err(|e| Failure::exception(e.to_string()))?;

        debug!(
            seq = request.seq,
            object = %request.target,
            method = %request.method,
            flags = %request.flags,
            "dispatching call"
        );

        let cx = CallContext::new(
            request.seq,
            request.client,
            request.flags,
            guard.token().clone(),
            self.registry.clone(),
        );

        self.publish_status().await;

        let server = Arc::clone(self);
        let joined = tokio::task::spawn_blocking(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| server.dispatch(&request, &cx)));
            drop(guard);
            result
        })
        .await;

        self.publish_status().await;

        match joined {
            Ok(Ok(Ok(body))) => Ok(body),
            Ok(Ok(Err(fault))) => Err(Failure::exception(fault.message())),
            Ok(Err(_)) => {
                error!("method handler panicked");
                Err(Failure::exception("method handler panicked"))
            }
            Err(e) => Err(Failure::exception(format!("dispatch aborted: {}", e))),
        }
    }

    fn dispatch(&self, request: &Request, cx: &CallContext) -> std::result::Result<Vec<u8>, Fault> {
        let (instance, dispatch) = if request.target.is_factory() {
            (self.factory.clone() as Instance, self.factory_dispatch.clone())
        } else {
            self.registry.lookup_entry(request.target)?
        };

        if request.flags.wants_contents() {
            dispatch.contents(&*instance, cx)
        } else {
            dispatch.invoke(&*instance, &request.method, &request.args, cx)
        }
    }

    /// Stops accepting calls and asks every running command to cancel.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let cancelled = self.commands.cancel_all();
        info!(name = %self.name, cancelled, "server endpoint stopped");
    }

    /// Handles one signal from the control channel: `stop` or `status`.
    pub async fn handle_control(&self, signal: &[u8]) -> Result<()> {
        let signal = String::from_utf8_lossy(signal);
        match signal.trim() {
            "stop" => {
                self.stop();
                Ok(())
            }
            "status" => self.try_publish_status().await,
            other => {
                warn!(signal = %other, "unknown control signal");
                Err(Error::UnknownSignal(other.to_string()))
            }
        }
    }

    pub fn status(&self) -> StatusRecord {
        StatusRecord {
            name: self.name.clone(),
            live_objects: self.registry.len() as u64,
            running: self.commands.running(),
            stopped: self.is_stopped(),
        }
    }

    async fn try_publish_status(&self) -> Result<()> {
        let sink = self.status_sink.as_ref().ok_or(Error::NoStatusSink)?;
        let record = self.status().encode()?;
        sink.publish(&record).await?;
        Ok(())
    }

    async fn publish_status(&self) {
        if self.status_sink.is_none() {
            return;
        }
        if let Err(e) = self.try_publish_status().await {
            warn!(error = %e, "status publish failed");
        }
    }
}

fn encode_reply(seq: u64, outcome: std::result::Result<Vec<u8>, Failure>) -> Option<Vec<u8>> {
    let encoded = match &outcome {
        Ok(body) => ReplyEncoder::success(seq, body).into_bytes(),
        Err(failure) => ReplyEncoder::failure(seq, failure.status, &failure.message).into_bytes(),
    };

    match encoded {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!(seq, error = %e, "reply encoding failed");
            None
        }
    }
}
