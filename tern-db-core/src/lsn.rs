//! Log sequence numbers
//!
//! `Lsn` is a monotonic operation identifier within a namespace WAL.
//! `ExtendedLsn` adds the namespace version epoch, so a renamed-over or
//! force-resynced namespace never confuses a follower holding stale numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic WAL sequence number; `Lsn::EMPTY` means "no position"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(i64);

impl Lsn {
    pub const EMPTY: Lsn = Lsn(-1);

    pub fn new(v: i64) -> Self {
        Lsn(v)
    }

    pub fn is_empty(self) -> bool {
        self.0 < 0
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Lsn {
        Lsn(self.0 + 1)
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Lsn::EMPTY
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Lsn extended with the namespace version epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ExtendedLsn {
    pub ns_version: i64,
    pub lsn: Lsn,
}

impl ExtendedLsn {
    pub const EMPTY: ExtendedLsn = ExtendedLsn {
        ns_version: 0,
        lsn: Lsn::EMPTY,
    };

    pub fn new(ns_version: i64, lsn: Lsn) -> Self {
        Self { ns_version, lsn }
    }

    pub fn is_empty(self) -> bool {
        self.lsn.is_empty()
    }
}

impl fmt::Display for ExtendedLsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ns_version, self.lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_ordering() {
        assert!(Lsn::EMPTY.is_empty());
        assert!(Lsn::EMPTY < Lsn::new(0));
        assert_eq!(Lsn::new(3).next(), Lsn::new(4));
        assert!(ExtendedLsn::EMPTY.is_empty());
    }
}
