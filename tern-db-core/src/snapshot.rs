//! Namespace snapshots
//!
//! A snapshot is what a leader-sync worker pulls from a peer: an ordered
//! chunk stream. When the requested LSN is still inside the peer's WAL tail
//! the stream is WAL-only; otherwise it opens with a schema chunk and raw
//! row chunks (`has_raw_data`), which forces the consumer to apply into a
//! temporary namespace.

use crate::index::IndexDef;
use crate::lsn::ExtendedLsn;
use crate::payload::PayloadField;
use crate::wal::WalRecord;

/// Rows per raw chunk
pub const RAW_CHUNK_ROWS: usize = 1000;

/// One element of the snapshot stream
#[derive(Debug, Clone)]
pub enum SnapshotChunk {
    /// Schema and index definitions; always first in a raw stream
    Meta {
        fields: Vec<PayloadField>,
        indexes: Vec<IndexDef>,
    },
    /// A batch of serialized documents
    Raw { docs: Vec<serde_json::Value> },
    /// A WAL tail slice, applied in order
    Wal { records: Vec<WalRecord> },
}

/// Options for requesting a snapshot
#[derive(Debug, Clone, Copy)]
pub struct SnapshotOpts {
    /// Position the consumer already holds; empty forces a full snapshot
    pub from: ExtendedLsn,
    /// How much WAL tail to ship alongside a forced snapshot
    pub max_wal_depth_on_force_sync: usize,
}

/// A complete snapshot stream with its source replication state
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub chunks: Vec<SnapshotChunk>,
    pub has_raw_data: bool,
    /// Source namespace state at capture time
    pub state: crate::namespace::ReplicationState,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
