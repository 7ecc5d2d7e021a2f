//! # OrbRun
//!
//! The object broker runtime. A server endpoint owns live objects in a
//! registry and dispatches incoming calls to them through per-type dispatch
//! tables; a client endpoint turns typed proxy calls into call envelopes and
//! waits for the reply.
//!
//! ## Layout
//!
//! - `registry`: ownership table of live objects, keyed by `ObjectId`.
//! - `cancel`: per-command cancellation tokens driven by factory pings.
//! - `interface`: typed dispatch tables bound at type registration.
//! - `factory`: the always-present object at id 0.
//! - `server` / `client`: the two endpoints.
//! - `proxy`: typed client stubs bound to one remote object.
//! - `transport` / `loopback`: byte movement between endpoints.

pub mod auth;
pub mod cancel;
pub mod client;
pub mod context;
pub mod factory;
pub mod interface;
pub mod loopback;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod transport;


pub use client::Client;
pub use client::ClientConfig;
pub use client::ClientError;
pub use context::CallContext;
pub use interface::Fault;
pub use interface::Interface;
pub use orbrpc::CallFlags;
pub use orbrpc::ObjectId;
pub use orbrpc::ObjectRef;
pub use orbrpc::Status;
pub use proxy::FactoryProxy;
pub use proxy::ObjectProxy;
pub use server::Server;
pub use server::ServerConfig;

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
