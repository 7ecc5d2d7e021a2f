//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between endpoints.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: a transport knows nothing about frames, objects or
//!   flags. It moves opaque buffers.
//! - **Request-Response first**: `call` sends bytes and awaits bytes. One-way
//!   `send` exists for NO_REPLY calls, which must never wait on the wire.
//! - **Out-of-band status**: status publishing goes through a separate
//!   `StatusSink`, never through the call channel.

use std::fmt;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// The operation timed out before a response was received.
    Timeout,
    /// The remote peer rejected the payload size.
    PayloadTooLarge,
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Timeout => write!(f, "Request timed out"),
            Self::PayloadTooLarge => write!(f, "Payload too large for transport"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A mechanism to send a byte buffer and receive a reply.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload and waits for the reply.
    ///
    /// # invariants
    /// - Must return `Ok(vec)` with the raw reply bytes on success.
    /// - Must return `Err` if the network fails.
    /// - Should not interpret the payload content.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Sends a payload without waiting for any reply.
    ///
    /// Returns once the payload is handed off, not once it is processed.
    async fn send(&self, payload: &[u8]) -> Result<()>;
}

/// Receiver of status records published by a server endpoint.
#[async_trait::async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn publish(&self, payload: &[u8]) -> Result<()>;
}
