//! Peer snapshot source
//!
//! The leader syncer reaches peers through this seam. Implementations wrap
//! the RPC client; tests use an in-process source over live `Database`
//! values. Connections carry the expected cluster id so cross-cluster
//! accidents fail fast.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::sync::Arc;
use tern_db_core::{Database, Snapshot, SnapshotOpts};

/// Remote snapshot access, one logical connection per `(node, call)`
#[async_trait]
pub trait SyncSource: Send + Sync {
    /// Fetch a snapshot of `ns` from `node` starting at `opts.from`
    async fn get_snapshot(&self, node: u32, ns: &str, opts: SnapshotOpts) -> Result<Snapshot>;
}

/// In-process source over a set of peer databases, keyed by node id.
/// Used by tests and single-process clusters.
pub struct LocalSyncSource {
    peers: Vec<Arc<Database>>,
    cluster_id: i32,
    expected_cluster_id: i32,
}

impl LocalSyncSource {
    pub fn new(peers: Vec<Arc<Database>>, cluster_id: i32, expected_cluster_id: i32) -> Self {
        Self {
            peers,
            cluster_id,
            expected_cluster_id,
        }
    }
}

#[async_trait]
impl SyncSource for LocalSyncSource {
    async fn get_snapshot(&self, node: u32, ns: &str, opts: SnapshotOpts) -> Result<Snapshot> {
        if self.cluster_id != self.expected_cluster_id {
            return Err(SyncError::Network(format!(
                "cluster id mismatch: peer {} vs expected {}",
                self.cluster_id, self.expected_cluster_id
            )));
        }
        let db = self
            .peers
            .get(node as usize)
            .ok_or_else(|| SyncError::Network(format!("unknown node {}", node)))?;
        let handle = db.namespace(ns).map_err(SyncError::Core)?;
        Ok(handle.read().build_snapshot(&opts))
    }
}
