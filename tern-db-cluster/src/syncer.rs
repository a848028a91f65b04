//! Leader syncer
//!
//! When this node becomes the Raft leader, [`LeaderSyncer::sync`] drains a
//! queue of namespaces that must catch up. Each worker pops an entry
//! (preferring its current remote node), requests a snapshot from the
//! entry's local LSN, applies chunks — into a temporary namespace when the
//! peer shipped raw data — and verifies the applied data hash against the
//! hash expected from that node. A mismatch forces one full resync; a
//! second mismatch fails the entry with `DataHashMismatch` and drops the
//! temporary namespace. Successful entries are marked on the shared sync
//! state, waking blocked readers.
//!
//! Termination may arrive in any state: workers poll the token before each
//! chunk application, drop partial temporary namespaces, and a terminated
//! batch reports `Terminated` over any stored error.

use crate::client::SyncSource;
use crate::error::{Result, SyncError};
use crate::queue::{Entry, LeaderSyncQueue};
use crate::state::SharedSyncState;
use std::sync::Arc;
use tern_db_core::{Database, ExtendedLsn, OpContext, SnapshotOpts};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Leader syncer settings
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    pub threads_count: usize,
    /// Concurrent syncs allowed against one peer; 0 = unlimited
    pub max_syncs_per_node: usize,
    /// WAL tail depth shipped alongside forced snapshots
    pub max_wal_depth_on_force_sync: usize,
    pub cluster_id: i32,
    pub server_id: i32,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            threads_count: 4,
            max_syncs_per_node: 2,
            max_wal_depth_on_force_sync: 1000,
            cluster_id: 0,
            server_id: 0,
        }
    }
}

/// Drains leader sync queues with a worker pool
pub struct LeaderSyncer {
    cfg: SyncerConfig,
    queue: Arc<LeaderSyncQueue>,
    terminate: CancellationToken,
}

impl LeaderSyncer {
    pub fn new(cfg: SyncerConfig) -> Self {
        let queue = Arc::new(LeaderSyncQueue::new(cfg.max_syncs_per_node));
        Self {
            cfg,
            queue,
            terminate: CancellationToken::new(),
        }
    }

    /// Stop all workers; in-progress chunk streams are abandoned
    pub fn terminate(&self) {
        self.terminate.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Synchronize every entry, spawning `threads_count` workers. Returns
    /// the first error seen across workers; a terminated run reports
    /// `Terminated` regardless of stored errors.
    pub async fn sync(
        &self,
        entries: Vec<Entry>,
        shared: Arc<SharedSyncState>,
        db: Arc<Database>,
        source: Arc<dyn SyncSource>,
    ) -> Result<()> {
        self.queue.refill(entries);
        let mut workers = Vec::with_capacity(self.cfg.threads_count);
        for worker_id in 0..self.cfg.threads_count {
            let queue = self.queue.clone();
            let shared = shared.clone();
            let db = db.clone();
            let source = source.clone();
            let cfg = self.cfg.clone();
            let terminate = self.terminate.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, cfg, queue, shared, db, source, terminate).await
            }));
        }
        let mut first_err: Option<SyncError> = None;
        for w in workers {
            let res = w
                .await
                .map_err(|e| SyncError::Terminated(format!("sync worker panicked: {}", e)))?;
            if first_err.is_none() {
                first_err = res.err();
            }
            shared.mark_synchronized_all();
        }
        if self.terminate.is_cancelled() {
            return Err(SyncError::Terminated("leader sync was terminated".into()));
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    cfg: SyncerConfig,
    queue: Arc<LeaderSyncQueue>,
    shared: Arc<SharedSyncState>,
    db: Arc<Database>,
    source: Arc<dyn SyncSource>,
    terminate: CancellationToken,
) -> Result<()> {
    let mut last_err: Option<SyncError> = None;
    let mut preferred: Option<u32> = None;
    while let Some((entry, node, expected_hash)) = queue.try_get_entry(preferred) {
        if terminate.is_cancelled() {
            queue.sync_done(node);
            return Err(SyncError::Terminated("terminated while draining".into()));
        }
        preferred = Some(node);
        info!(
            server = cfg.server_id,
            worker = worker_id,
            ns = %entry.ns_name,
            node,
            "trying to sync namespace"
        );
        let mut tmp_ns: Option<String> = None;
        let res = sync_entry(
            &cfg,
            &entry,
            node,
            expected_hash,
            &db,
            &source,
            &terminate,
            &mut tmp_ns,
        )
        .await;
        match res {
            Ok(()) => {
                shared.mark_synchronized(&entry.ns_name);
            }
            Err(e) => {
                error!(
                    server = cfg.server_id,
                    ns = %entry.ns_name,
                    err = %e,
                    "unable to sync local namespace"
                );
                if let Some(tmp) = tmp_ns.take() {
                    error!(ns = %tmp, "dropping temporary namespace");
                    let _ = db.drop_namespace(&tmp);
                }
                last_err = Some(e);
            }
        }
        queue.sync_done(node);
    }
    match last_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Two attempts per entry; the second forces a full resync
#[allow(clippy::too_many_arguments)]
async fn sync_entry(
    cfg: &SyncerConfig,
    entry: &Entry,
    node: u32,
    expected_hash: u64,
    db: &Arc<Database>,
    source: &Arc<dyn SyncSource>,
    terminate: &CancellationToken,
    tmp_ns: &mut Option<String>,
) -> Result<()> {
    for retry in 0..2 {
        let forced = retry > 0;
        sync_namespace_impl(cfg, entry, node, forced, db, source, terminate, tmp_ns).await?;
        // verify against the namespace the chunks actually landed in; the
        // temporary one replaces the live name only on a hash match
        let applied_ns = tmp_ns.as_deref().unwrap_or(&entry.ns_name);
        let state = db.get_repl_state(applied_ns).map_err(SyncError::Core)?;
        if state.data_hash == expected_hash {
            if let Some(tmp) = tmp_ns.take() {
                db.rename_namespace(&tmp, &entry.ns_name)
                    .map_err(SyncError::Core)?;
            }
            info!(
                server = cfg.server_id,
                ns = %entry.ns_name,
                node,
                ns_version = state.ns_version,
                lsn = %state.last_lsn,
                "local namespace was updated from node"
            );
            return Ok(());
        }
        if forced {
            return Err(SyncError::DataHashMismatch(format!(
                "{}: data hash mismatch after full resync for local namespace '{}'; expected: {}, actual: {}",
                cfg.server_id, entry.ns_name, expected_hash, state.data_hash
            )));
        }
        warn!(
            server = cfg.server_id,
            ns = %entry.ns_name,
            expected = expected_hash,
            actual = state.data_hash,
            "data hash mismatch after sync, forcing full resync"
        );
        if let Some(tmp) = tmp_ns.take() {
            let _ = db.drop_namespace(&tmp);
        }
    }
    unreachable!("second attempt either returns or fails")
}

#[allow(clippy::too_many_arguments)]
async fn sync_namespace_impl(
    cfg: &SyncerConfig,
    entry: &Entry,
    node: u32,
    forced: bool,
    db: &Arc<Database>,
    source: &Arc<dyn SyncSource>,
    terminate: &CancellationToken,
    tmp_ns: &mut Option<String>,
) -> Result<()> {
    info!(
        server = cfg.server_id,
        ns = %entry.ns_name,
        mode = if forced { "forced" } else { "by wal" },
        "trying to synchronize namespace"
    );
    let opts = SnapshotOpts {
        from: if forced {
            ExtendedLsn::EMPTY
        } else {
            entry.local_lsn
        },
        max_wal_depth_on_force_sync: cfg.max_wal_depth_on_force_sync,
    };
    let snapshot = source.get_snapshot(node, &entry.ns_name, opts).await?;

    // raw data cannot be applied over live rows: build a temporary
    // namespace and rename it over the original afterwards
    let ctx = OpContext::new().with_no_wait_sync();
    let target = if db.namespace(&entry.ns_name).is_err() || snapshot.has_raw_data {
        let name = db
            .create_temporary_namespace(&entry.ns_name, entry.latest_lsn.ns_version)
            .map_err(SyncError::Core)?;
        let handle = db.namespace(&name).map_err(SyncError::Core)?;
        *tmp_ns = Some(name);
        handle
    } else {
        db.namespace(&entry.ns_name).map_err(SyncError::Core)?
    };

    for chunk in snapshot.chunks {
        if terminate.is_cancelled() {
            return Err(SyncError::Terminated("terminated mid-stream".into()));
        }
        target
            .write(|ns| ns.apply_snapshot_chunk(chunk, &ctx))
            .map_err(SyncError::Core)?;
    }
    Ok(())
}
