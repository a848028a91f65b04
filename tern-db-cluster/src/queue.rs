//! Leader sync work queue
//!
//! Entries describe namespaces that must catch up, each with candidate
//! source nodes and the data hash expected from each. Workers pop entries
//! with node affinity (prefer the node they are already connected to) under
//! a per-node concurrency cap, and an entry leaves the queue only when a
//! worker takes it.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tern_db_core::ExtendedLsn;

/// One namespace to synchronize
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub ns_name: String,
    /// Candidate source nodes
    pub nodes: Vec<u32>,
    /// Expected data hash per candidate node, parallel to `nodes`
    pub data_hashes: Vec<u64>,
    /// Most recent LSN known in the cluster
    pub latest_lsn: ExtendedLsn,
    /// Position this node already holds
    pub local_lsn: ExtendedLsn,
}

impl Entry {
    /// Nothing to transfer when local already matches the latest
    pub fn is_local(&self) -> bool {
        self.local_lsn == self.latest_lsn
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<Entry>,
    syncs_per_node: FxHashMap<u32, i64>,
}

/// Mutex-guarded queue with per-node caps
#[derive(Debug)]
pub struct LeaderSyncQueue {
    max_syncs_per_node: usize,
    inner: Mutex<Inner>,
}

impl LeaderSyncQueue {
    pub fn new(max_syncs_per_node: usize) -> Self {
        Self {
            max_syncs_per_node,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Replace the queue contents for a new sync term
    pub fn refill(&self, entries: Vec<Entry>) {
        let mut g = self.inner.lock();
        g.entries = entries.into();
        g.syncs_per_node.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Release a node slot after a sync attempt completes
    pub fn sync_done(&self, node: u32) {
        let mut g = self.inner.lock();
        if let Some(n) = g.syncs_per_node.get_mut(&node) {
            if *n > 0 {
                *n -= 1;
            }
        }
    }

    /// Pop an entry, preferring `preferred` to avoid a reconnect. Two
    /// passes: first restricted to the preferred node, then any node with a
    /// free slot. Returns the entry, the chosen node, and the hash expected
    /// from that node.
    pub fn try_get_entry(&self, preferred: Option<u32>) -> Option<(Entry, u32, u64)> {
        let mut g = self.inner.lock();
        let mut preferred = preferred.filter(|p| {
            g.syncs_per_node
                .get(p)
                .map(|&n| self.max_syncs_per_node == 0 || (n as usize) < self.max_syncs_per_node)
                .unwrap_or(true)
        });
        for _retry in 0..2 {
            let mut chosen: Option<(usize, usize)> = None;
            'scan: for (ei, entry) in g.entries.iter().enumerate() {
                for (ni, &node) in entry.nodes.iter().enumerate() {
                    if let Some(p) = preferred {
                        if p != node {
                            continue;
                        }
                    }
                    let in_flight = g.syncs_per_node.get(&node).copied().unwrap_or(0);
                    let allowed = self.max_syncs_per_node == 0
                        || (in_flight as usize) < self.max_syncs_per_node;
                    if allowed {
                        chosen = Some((ei, ni));
                        break 'scan;
                    }
                }
            }
            if let Some((ei, ni)) = chosen {
                let entry = g.entries.remove(ei).expect("index from scan");
                let node = entry.nodes[ni];
                let hash = entry.data_hashes[ni];
                *g.syncs_per_node.entry(node).or_insert(0) += 1;
                return Some((entry, node, hash));
            }
            if preferred.is_some() {
                preferred = None;
            } else {
                break;
            }
        }
        None
    }
}
