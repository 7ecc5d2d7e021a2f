//! # Authentication Hook
//!
//! A pluggable credential check run by the server before dispatch. A rejected
//! call is answered with AUTH_FAILURE and has no side effects: no command slot
//! is taken, no object is looked up.
//!
//! The token scheme itself is out of scope; `ApiKeyAuth` is a shared-secret
//! check suitable for tests and trusted networks.

use orbrpc::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingCredential,
    InvalidCredential,
    Denied(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "missing credential"),
            Self::InvalidCredential => write!(f, "invalid credential"),
            Self::Denied(reason) => write!(f, "denied: {}", reason),
        }
    }
}

impl std::error::Error for AuthError {}

/// Credential check invoked for every request before dispatch.
pub trait AuthHook: Send + Sync + 'static {
    fn check(&self, credential: Option<&str>, target: ObjectId, method: &str) -> Result<(), AuthError>;
}

/// Accepts calls whose credential equals a shared key.
pub struct ApiKeyAuth {
    key: String,
}

impl ApiKeyAuth {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth").field("key", &"<redacted>").finish()
    }
}

impl AuthHook for ApiKeyAuth {
    fn check(&self, credential: Option<&str>, _target: ObjectId, _method: &str) -> Result<(), AuthError> {
        let provided = credential.ok_or(AuthError::MissingCredential)?;
        if constant_time_eq(&self.key, provided) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredential)
        }
    }
}

/// Compares every byte regardless of where the first difference is.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
