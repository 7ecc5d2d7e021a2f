//! # OrbRPC
//!
//! The call envelope of the object broker: request and reply frames, call
//! flags, reply status codes, and the `Pack`/`Unpack` contract that typed
//! proxies and dispatch tables use to move arguments and results.
//!
//! ## Architecture
//!
//! The envelope is two layers of `orbpack`. The outer layer is a frame with
//! routing metadata (target object, method, flags, sequence). The inner layer
//! is an opaque byte blob holding the packed arguments or result, which is
//! only decoded once the receiver knows the expected types. Decoding the inner
//! layer takes a `DecodeContext` so that remote object handles can be turned
//! into live references on the server side.

pub mod codec;
pub mod context;
pub mod error;
pub mod flag;
pub mod frame;
pub mod status;


pub use codec::Pack;
pub use codec::Unpack;
pub use codec::pack_to_vec;
pub use codec::unpack_exact;
pub use context::DecodeContext;
pub use context::ObjectId;
pub use context::ObjectRef;
pub use context::ObjectResolver;
pub use error::Error;
pub use error::Result;
pub use flag::CallFlags;
pub use frame::CallDecoder;
pub use frame::CallEncoder;
pub use frame::Frame;
pub use frame::ReplyDecoder;
pub use frame::ReplyEncoder;
pub use frame::decode_seq;
pub use status::Status;
