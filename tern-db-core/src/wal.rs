//! Write-ahead log
//!
//! Append-only log of row mutations, consumed by followers and the leader
//! syncer. The in-memory tail is a bounded ring: once `max_depth` is
//! exceeded the oldest records fall off, and a peer asking for an LSN older
//! than the retained tail must take a raw snapshot instead.

use crate::lsn::Lsn;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A single logged mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    /// Full document upsert
    Upsert { doc: serde_json::Value },
    /// Delete by primary key
    Delete { pk: Value },
    Truncate,
}

/// One WAL record, emitted in commit order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub op: WalOp,
}

pub const DEFAULT_WAL_DEPTH: usize = 4_000_000;

/// Bounded in-memory WAL tail
#[derive(Debug, Clone)]
pub struct Wal {
    records: VecDeque<WalRecord>,
    next_lsn: Lsn,
    max_depth: usize,
}

impl Default for Wal {
    fn default() -> Self {
        Self::with_max_depth(DEFAULT_WAL_DEPTH)
    }
}

impl Wal {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            records: VecDeque::new(),
            next_lsn: Lsn::new(0),
            max_depth,
        }
    }

    /// Append an operation, assigning the next LSN
    pub fn append(&mut self, op: WalOp) -> Lsn {
        let lsn = self.next_lsn;
        self.records.push_back(WalRecord { lsn, op });
        if self.records.len() > self.max_depth {
            self.records.pop_front();
        }
        self.next_lsn = lsn.next();
        lsn
    }

    /// Append a record produced elsewhere (replication apply), adopting its
    /// LSN as the new head position.
    pub fn append_replicated(&mut self, rec: WalRecord) {
        self.next_lsn = rec.lsn.next();
        self.records.push_back(rec);
        if self.records.len() > self.max_depth {
            self.records.pop_front();
        }
    }

    /// Last assigned LSN, empty when nothing was logged
    pub fn last_lsn(&self) -> Lsn {
        if self.next_lsn.value() == 0 {
            Lsn::EMPTY
        } else {
            Lsn::new(self.next_lsn.value() - 1)
        }
    }

    /// Oldest retained LSN
    pub fn first_lsn(&self) -> Lsn {
        self.records.front().map(|r| r.lsn).unwrap_or(Lsn::EMPTY)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records strictly after `from`. `None` means the position fell off the
    /// ring and the caller needs a raw snapshot.
    pub fn tail_after(&self, from: Lsn) -> Option<Vec<WalRecord>> {
        if from.is_empty() {
            if self.records.len() == self.next_lsn.value() as usize {
                // full history retained
                return Some(self.records.iter().cloned().collect());
            }
            return None;
        }
        if from.next() < self.first_lsn() && !self.records.is_empty() {
            return None;
        }
        if from >= self.next_lsn && !self.next_lsn.is_empty() && from.value() >= self.next_lsn.value()
        {
            return Some(Vec::new());
        }
        Some(
            self.records
                .iter()
                .filter(|r| r.lsn > from)
                .cloned()
                .collect(),
        )
    }

    /// Most recent `depth` records, for the tail shipped with a forced
    /// snapshot
    pub fn recent(&self, depth: usize) -> Vec<WalRecord> {
        let skip = self.records.len().saturating_sub(depth);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn truncate(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(n: i64) -> WalOp {
        WalOp::Upsert {
            doc: serde_json::json!({ "id": n }),
        }
    }

    #[test]
    fn lsn_assignment_is_monotonic() {
        let mut wal = Wal::default();
        assert!(wal.last_lsn().is_empty());
        let a = wal.append(upsert(1));
        let b = wal.append(upsert(2));
        assert!(b > a);
        assert_eq!(wal.last_lsn(), b);
    }

    #[test]
    fn tail_after_position() {
        let mut wal = Wal::default();
        let a = wal.append(upsert(1));
        let _b = wal.append(upsert(2));
        let c = wal.append(upsert(3));
        let tail = wal.tail_after(a).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].lsn, c);
        assert!(wal.tail_after(c).unwrap().is_empty());
    }

    #[test]
    fn overflow_forces_snapshot() {
        let mut wal = Wal::with_max_depth(2);
        let a = wal.append(upsert(1));
        wal.append(upsert(2));
        wal.append(upsert(3));
        wal.append(upsert(4));
        // `a` fell off the ring
        assert!(wal.tail_after(a).is_none());
        assert_eq!(wal.recent(1).len(), 1);
    }

    #[test]
    fn empty_from_requires_full_history() {
        let mut wal = Wal::with_max_depth(2);
        wal.append(upsert(1));
        assert!(wal.tail_after(Lsn::EMPTY).is_some());
        wal.append(upsert(2));
        wal.append(upsert(3));
        assert!(wal.tail_after(Lsn::EMPTY).is_none());
    }
}
