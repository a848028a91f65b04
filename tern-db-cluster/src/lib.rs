//! # tern-db cluster
//!
//! Raft-side replication plumbing:
//! - [`SharedSyncState`]: the registry readers block on until a namespace
//!   finishes its initial sync after a leadership transition
//! - [`LeaderSyncQueue`]: per-node-capped work queue of namespaces to sync
//! - [`LeaderSyncer`]: worker pool pulling snapshots + WAL tails from
//!   peers, verifying data hashes, with forced-resync fallback
//! - [`SyncSource`]: the seam to peers (RPC client in production, an
//!   in-process source in tests)

pub mod client;
pub mod config;
pub mod error;
pub mod queue;
pub mod state;
pub mod syncer;

pub use client::{LocalSyncSource, SyncSource};
pub use config::ClusterConfig;
pub use error::{Result, SyncError};
pub use queue::{Entry, LeaderSyncQueue};
pub use state::{RaftInfo, RaftRole, SharedSyncState};
pub use syncer::{LeaderSyncer, SyncerConfig};
