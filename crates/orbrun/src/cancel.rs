//! # Cancellation Coordinator
//!
//! Cooperative cancellation of running commands. Every command executed by a
//! server endpoint holds a `CancelToken` keyed by its command id. A factory
//! ping of the form `ctrlc<id>` flips that token, and only that token, to the
//! cancel sentinel. The command observes it by polling `must_cancel()`.
//!
//! ## Token states
//!
//! ```text
//! IDLE (0) --begin(id)--> RUNNING(id) --ctrlc<id>--> CANCEL_REQUESTED (MAX)
//!    ^                          |                            |
//!    +--------- guard drop -----+----------------------------+
//! ```
//!
//! ## Invariants
//!
//! - At most one token per command id.
//! - `request_cancel` is a compare-and-swap from the exact id to the sentinel;
//!   a stale or mismatched request changes nothing.
//! - A command that never polls cannot be cancelled.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use tracing::info;

/// Token word of a command that is not running.
pub const IDLE: u64 = 0;
/// Token word of a command that has been asked to stop.
pub const CANCEL_REQUESTED: u64 = u64::MAX;
/// Prefix of a ping that requests cancellation.
pub const CANCEL_PREFIX: &str = "ctrlc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// 0 and `u64::MAX` are token states, not command ids.
    ReservedId(u64),
    /// A command with this id is already running.
    AlreadyRunning(u64),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReservedId(id) => write!(f, "command id {} is reserved", id),
            Self::AlreadyRunning(id) => write!(f, "command {} is already running", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Idle,
    Running(u64),
    CancelRequested,
}

impl TokenState {
    fn from_word(word: u64) -> Self {
        match word {
            IDLE => TokenState::Idle,
            CANCEL_REQUESTED => TokenState::CancelRequested,
            id => TokenState::Running(id),
        }
    }
}

/// The cancellation word of one command.
#[derive(Debug)]
pub struct CancelToken {
    word: AtomicU64,
    checked: AtomicBool,
}

impl CancelToken {
    fn running(id: u64) -> Self {
        Self {
            word: AtomicU64::new(id),
            checked: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TokenState {
        TokenState::from_word(self.word.load(Ordering::Acquire))
    }

    /// True iff cancellation was requested. Always records that it was asked.
    pub fn must_cancel(&self) -> bool {
        self.checked.store(true, Ordering::Release);
        self.word.load(Ordering::Acquire) == CANCEL_REQUESTED
    }

    /// Whether `must_cancel` was polled at least once.
    pub fn cancel_checked(&self) -> bool {
        self.checked.load(Ordering::Acquire)
    }

    fn request(&self, id: u64) -> bool {
        self.word
            .compare_exchange(id, CANCEL_REQUESTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn reset(&self) {
        self.word.store(IDLE, Ordering::Release);
    }
}

/// Map of running commands to their tokens.
#[derive(Default)]
pub struct Coordinator {
    tokens: Arc<DashMap<u64, Arc<CancelToken>>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as running. The slot returns to idle when the guard drops.
    pub fn begin(&self, id: u64) -> Result<CommandGuard> {
        if id == IDLE || id == CANCEL_REQUESTED {
            return Err(Error::ReservedId(id));
        }

        let token = match self.tokens.entry(id) {
            Entry::Occupied(_) => return Err(Error::AlreadyRunning(id)),
            Entry::Vacant(slot) => slot.insert(Arc::new(CancelToken::running(id))).clone(),
        };

        debug!(command = id, "command started");
        Ok(CommandGuard {
            id,
            token,
            tokens: self.tokens.clone(),
        })
    }

    /// Requests cancellation of command `id` if it is the one running under
    /// that id. Returns whether the token changed.
    pub fn request_cancel(&self, id: u64) -> bool {
        let Some(token) = self.tokens.get(&id).map(|entry| entry.value().clone()) else {
            debug!(command = id, "cancel request for idle command ignored");
            return false;
        };

        let changed = token.request(id);
        if changed {
            info!(command = id, "cancellation requested");
        }
        changed
    }

    pub fn state(&self, id: u64) -> TokenState {
        self.tokens
            .get(&id)
            .map(|entry| entry.state())
            .unwrap_or(TokenState::Idle)
    }

    /// Ids of commands currently holding a token, ascending.
    pub fn running(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.tokens.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Requests cancellation of every running command. Returns how many changed.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<(u64, Arc<CancelToken>)> = self
            .tokens
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        tokens.into_iter().filter(|(id, token)| token.request(*id)).count()
    }
}

/// Parses a `ctrlc<id>` ping. Any other string is a plain heartbeat.
pub fn parse_cancel_ping(value: &str) -> Option<u64> {
    let digits = value.strip_prefix(CANCEL_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Holds a command's slot for as long as the command runs.
pub struct CommandGuard {
    id: u64,
    token: Arc<CancelToken>,
    tokens: Arc<DashMap<u64, Arc<CancelToken>>>,
}

impl CommandGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &Arc<CancelToken> {
        &self.token
    }

    pub fn must_cancel(&self) -> bool {
        self.token.must_cancel()
    }
}

impl Drop for CommandGuard {
    fn drop(&mut self) {
        self.token.reset();
        self.tokens.remove(&self.id);
        debug!(
            command = self.id,
            cancel_checked = self.token.cancel_checked(),
            "command finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_compare_and_swap() {
        let commands = Coordinator::new();
        let guard = commands.begin(5).unwrap();
        assert_eq!(commands.state(5), TokenState::Running(5));

        assert!(commands.request_cancel(5));
        assert_eq!(commands.state(5), TokenState::CancelRequested);

        assert!(!commands.request_cancel(5));
        assert!(!commands.request_cancel(9));
        assert_eq!(commands.state(5), TokenState::CancelRequested);
        assert_eq!(commands.state(9), TokenState::Idle);

        drop(guard);
        assert_eq!(commands.state(5), TokenState::Idle);
        assert!(commands.running().is_empty());
    }

    #[test]
    fn test_must_cancel_records_check() {
        let commands = Coordinator::new();
        let guard = commands.begin(7).unwrap();
        assert!(!guard.token().cancel_checked());

        assert!(!guard.must_cancel());
        assert!(guard.token().cancel_checked());

        commands.request_cancel(7);
        assert!(guard.must_cancel());
    }

    #[test]
    fn test_reserved_and_duplicate_ids() {
        let commands = Coordinator::new();
        assert_eq!(commands.begin(IDLE).err(), Some(Error::ReservedId(0)));
        assert_eq!(commands.begin(CANCEL_REQUESTED).err(), Some(Error::ReservedId(u64::MAX)));

        let _guard = commands.begin(3).unwrap();
        assert_eq!(commands.begin(3).err(), Some(Error::AlreadyRunning(3)));
    }

    #[test]
    fn test_commands_cancel_independently() {
        let commands = Coordinator::new();
        let a = commands.begin(10).unwrap();
        let b = commands.begin(11).unwrap();
        assert_eq!(commands.running(), vec![10, 11]);

        commands.request_cancel(11);
        assert!(!a.must_cancel());
        assert!(b.must_cancel());

        assert_eq!(commands.cancel_all(), 1);
        assert!(a.must_cancel());
    }

    #[test]
    fn test_parse_cancel_ping() {
        assert_eq!(parse_cancel_ping("ctrlc42"), Some(42));
        assert_eq!(parse_cancel_ping("ctrlc"), None);
        assert_eq!(parse_cancel_ping("ctrlc-1"), None);
        assert_eq!(parse_cancel_ping("ctrlc+5"), None);
        assert_eq!(parse_cancel_ping("ctrlc 5"), None);
        assert_eq!(parse_cancel_ping("hello"), None);
    }
}
