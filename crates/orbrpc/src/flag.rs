//! # Call Flags
//!
//! Independent bits carried on every request.
//!
//! ## Wire Format
//! - Tag: U8
//! - Bit 0: QUERY, bit 1: UPDATE, bit 2: NO_REPLY, bit 3: ANY_TARGET,
//!   bit 4: GET_SERIALIZED_CONTENTS
//!
//! QUERY and UPDATE classify the call and are mutually exclusive. Bits above
//! bit 4 are reserved and rejected on decode.

use std::ops::BitOr;

use crate::error::Error;
use crate::error::Result;

/// The set of flags attached to a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CallFlags(u8);

impl CallFlags {
    pub const NONE: CallFlags = CallFlags(0);
    /// The call only reads server state.
    pub const QUERY: CallFlags = CallFlags(1);
    /// The call mutates server state.
    pub const UPDATE: CallFlags = CallFlags(2);
    /// Fire-and-forget; the server never replies.
    pub const NO_REPLY: CallFlags = CallFlags(4);
    /// Any replica may serve the call.
    pub const ANY_TARGET: CallFlags = CallFlags(8);
    /// Ask for a snapshot of the object instead of a method result.
    pub const GET_SERIALIZED_CONTENTS: CallFlags = CallFlags(16);

    const ALL: u8 = 0b1_1111;

    /// Validates raw bits read off the wire.
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !Self::ALL != 0 {
            return Err(Error::UnknownFlags(bits));
        }
        let flags = CallFlags(bits);
        flags.validate()?;
        Ok(flags)
    }

    /// Checks the QUERY/UPDATE exclusivity rule.
    pub fn validate(self) -> Result<()> {
        if self.contains(Self::QUERY) && self.contains(Self::UPDATE) {
            return Err(Error::ConflictingFlags);
        }
        Ok(())
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: CallFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CallFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CallFlags) {
        self.0 &= !other.0;
    }

    pub fn is_no_reply(self) -> bool {
        self.contains(Self::NO_REPLY)
    }

    pub fn wants_contents(self) -> bool {
        self.contains(Self::GET_SERIALIZED_CONTENTS)
    }
}

impl BitOr for CallFlags {
    type Output = CallFlags;

    fn bitor(self, rhs: CallFlags) -> CallFlags {
        CallFlags(self.0 | rhs.0)
    }
}

impl std::fmt::Display for CallFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [(CallFlags, &str); 5] = [
            (CallFlags::QUERY, "QUERY"),
            (CallFlags::UPDATE, "UPDATE"),
            (CallFlags::NO_REPLY, "NO_REPLY"),
            (CallFlags::ANY_TARGET, "ANY_TARGET"),
            (CallFlags::GET_SERIALIZED_CONTENTS, "GET_SERIALIZED_CONTENTS"),
        ];
        let active: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if active.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", active.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values_are_stable() {
        assert_eq!(CallFlags::QUERY.bits(), 1);
        assert_eq!(CallFlags::UPDATE.bits(), 2);
        assert_eq!(CallFlags::NO_REPLY.bits(), 4);
        assert_eq!(CallFlags::ANY_TARGET.bits(), 8);
        assert_eq!(CallFlags::GET_SERIALIZED_CONTENTS.bits(), 16);
    }

    #[test]
    fn test_query_and_update_conflict() {
        assert_eq!(CallFlags::from_bits(3), Err(Error::ConflictingFlags));
        assert_eq!((CallFlags::QUERY | CallFlags::UPDATE).validate(), Err(Error::ConflictingFlags));
    }

    #[test]
    fn test_reserved_bits_rejected() {
        assert_eq!(CallFlags::from_bits(0x40), Err(Error::UnknownFlags(0x40)));
    }

    #[test]
    fn test_independent_bits() {
        let flags = CallFlags::from_bits(1 | 4 | 8).unwrap();
        assert!(flags.contains(CallFlags::QUERY));
        assert!(flags.is_no_reply());
        assert!(flags.contains(CallFlags::ANY_TARGET));
        assert!(!flags.wants_contents());
        assert_eq!(flags.to_string(), "QUERY|NO_REPLY|ANY_TARGET");
    }

    #[test]
    fn test_insert_and_remove() {
        let mut flags = CallFlags::UPDATE;
        flags.insert(CallFlags::NO_REPLY);
        assert!(flags.is_no_reply());
        flags.remove(CallFlags::NO_REPLY);
        assert_eq!(flags, CallFlags::UPDATE);
        assert_eq!(CallFlags::NONE.to_string(), "NONE");
    }
}
