//! # Reply Status
//!
//! Outcome codes carried on every reply. The numeric values are part of the
//! wire protocol and must not change within a protocol version.

use crate::error::Error;
use crate::error::Result;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The body holds the packed result.
    Success = 0,
    /// Application-level error; the body holds a message.
    Exception = 1,
    /// Transport failure or timeout; the body holds a message.
    CommFailure = 2,
    /// The credential check rejected the call before dispatch.
    AuthFailure = 3,
}

impl Status {
    pub fn from_u8(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Status::Success),
            1 => Ok(Status::Exception),
            2 => Ok(Status::CommFailure),
            3 => Ok(Status::AuthFailure),
            other => Err(Error::UnknownStatus(other)),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Exception => "EXCEPTION",
            Status::CommFailure => "COMM_FAILURE",
            Status::AuthFailure => "AUTH_FAILURE",
        }
    }

    /// Only transport failures are worth retrying.
    pub fn is_retryable(self) -> bool {
        self == Status::CommFailure
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}
