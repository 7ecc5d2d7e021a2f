//! # Error Definitions
//!
//! Failures while building or reading call envelopes and their payloads.

use crate::context::ObjectId;

/// Operational failures within the envelope layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying orbpack serialization failed.
    Serialization(orbpack::Error),
    /// The structure of the frame was malformed (e.g., missing sequence header).
    ProtocolViolation(String),
    /// The flag byte carried bits this protocol version does not define.
    UnknownFlags(u8),
    /// QUERY and UPDATE were both set.
    ConflictingFlags,
    /// The reply status byte is not a known status code.
    UnknownStatus(u8),
    /// A remote object handle named an id that is not registered.
    ObjectNotFound(ObjectId),
    /// A remote object handle resolved to an instance of another type.
    TypeMismatch { id: ObjectId, expected: &'static str },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization failed: {}", e),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::UnknownFlags(bits) => write!(f, "unknown call flags: {:#04x}", bits),
            Self::ConflictingFlags => write!(f, "QUERY and UPDATE are mutually exclusive"),
            Self::UnknownStatus(code) => write!(f, "unknown reply status: {}", code),
            Self::ObjectNotFound(id) => write!(f, "{} not found", id),
            Self::TypeMismatch { id, expected } => {
                write!(f, "{} is not a {}", id, expected)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<orbpack::Error> for Error {
    fn from(e: orbpack::Error) -> Self { Self::Serialization(e) }
}

/// A specialized Result type for envelope operations.
pub type Result<T> = std::result::Result<T, Error>;
