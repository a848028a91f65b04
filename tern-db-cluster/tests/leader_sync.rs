//! Leader sync end-to-end over in-process peers

use serde_json::json;
use std::sync::Arc;
use tern_db_cluster::{
    Entry, LeaderSyncer, LocalSyncSource, RaftInfo, SharedSyncState, SyncError, SyncerConfig,
};
use tern_db_core::{
    Database, IndexDef, IndexKind, OpContext, PayloadField, ValueType,
};

fn filled_db(rows: &[(i64, &str)]) -> Arc<Database> {
    let db = Arc::new(Database::in_memory());
    let ns = db.create_namespace("books").unwrap();
    ns.write(|ns| {
        ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
        ns.add_field(PayloadField::new("title", ValueType::String))?;
        let id = ns.payload_type().field_id("id").unwrap();
        ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
        for (id, title) in rows {
            ns.upsert(&json!({"id": id, "title": title}))?;
        }
        Ok(())
    })
    .unwrap();
    db
}

fn leader_state(required: &[&str]) -> Arc<SharedSyncState> {
    let state = SharedSyncState::new();
    state.reset(required.iter().map(|s| s.to_string()).collect(), 1, true);
    state.set_role(RaftInfo::leader(0));
    state.try_transit_role(RaftInfo::leader(0));
    state
}

fn entry_for(peer: &Database, ns: &str) -> Entry {
    let state = peer.get_repl_state(ns).unwrap();
    Entry {
        ns_name: ns.to_string(),
        nodes: vec![0],
        data_hashes: vec![state.data_hash],
        latest_lsn: state.extended_lsn(),
        local_lsn: tern_db_core::ExtendedLsn::EMPTY,
    }
}

fn syncer() -> LeaderSyncer {
    LeaderSyncer::new(SyncerConfig {
        threads_count: 2,
        ..Default::default()
    })
}

#[tokio::test]
async fn full_sync_from_scratch() {
    let peer = filled_db(&[(1, "alpha"), (2, "beta"), (3, "gamma")]);
    let local = Arc::new(Database::in_memory());
    let shared = leader_state(&["books"]);
    let source = Arc::new(LocalSyncSource::new(vec![peer.clone()], 7, 7));

    let entry = entry_for(&peer, "books");
    let expected_hash = entry.data_hashes[0];
    syncer()
        .sync(vec![entry], shared.clone(), local.clone(), source)
        .await
        .unwrap();

    let state = local.get_repl_state("books").unwrap();
    assert_eq!(state.data_hash, expected_hash);
    assert_eq!(local.namespace("books").unwrap().read().total_rows(), 3);
    assert!(shared.is_initial_sync_done("books"));

    // a blocked reader unblocks immediately now
    shared
        .await_initial_sync("books", &OpContext::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn wal_sync_catches_up_existing_namespace() {
    let peer = filled_db(&[(1, "alpha"), (2, "beta"), (3, "gamma"), (4, "delta")]);
    // local already holds a prefix of the history
    let local = filled_db(&[(1, "alpha"), (2, "beta")]);
    let shared = leader_state(&["books"]);
    let source = Arc::new(LocalSyncSource::new(vec![peer.clone()], 7, 7));

    let local_state = local.get_repl_state("books").unwrap();
    let mut entry = entry_for(&peer, "books");
    entry.local_lsn = local_state.extended_lsn();

    syncer()
        .sync(vec![entry], shared.clone(), local.clone(), source)
        .await
        .unwrap();

    let peer_state = peer.get_repl_state("books").unwrap();
    let got = local.get_repl_state("books").unwrap();
    assert_eq!(got.data_hash, peer_state.data_hash);
    assert_eq!(got.last_lsn, peer_state.last_lsn);
}

#[tokio::test]
async fn hash_mismatch_fails_after_forced_retry() {
    let peer = filled_db(&[(1, "alpha")]);
    let local = Arc::new(Database::in_memory());
    let shared = leader_state(&["books"]);
    let source = Arc::new(LocalSyncSource::new(vec![peer.clone()], 7, 7));

    let mut entry = entry_for(&peer, "books");
    // poison the expectation: no snapshot can ever produce this hash
    entry.data_hashes = vec![0xDEAD_BEEF];

    let err = syncer()
        .sync(vec![entry], shared.clone(), local.clone(), source)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DataHashMismatch(_)));
    assert!(!shared.is_initial_sync_done("books"));
    // the temporary namespace was dropped, and the live name never
    // materialized
    for name in local.namespace_names() {
        assert!(!name.contains("_tmp_"), "leaked temporary '{}'", name);
    }
    assert!(local.namespace("books").is_err());
}

#[tokio::test]
async fn mismatch_on_one_entry_does_not_stop_others() {
    let peer = filled_db(&[(1, "alpha"), (2, "beta")]);
    peer.create_namespace("journal").unwrap();
    peer.namespace("journal")
        .unwrap()
        .write(|ns| {
            ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
            let id = ns.payload_type().field_id("id").unwrap();
            ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
            ns.upsert(&json!({"id": 10}))?;
            Ok(())
        })
        .unwrap();

    let local = Arc::new(Database::in_memory());
    let shared = leader_state(&["books", "journal"]);
    let source = Arc::new(LocalSyncSource::new(vec![peer.clone()], 7, 7));

    let mut bad = entry_for(&peer, "books");
    bad.data_hashes = vec![1];
    let good = entry_for(&peer, "journal");

    let err = syncer()
        .sync(vec![bad, good], shared.clone(), local.clone(), source)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DataHashMismatch(_)));
    // the healthy entry still made it
    assert!(shared.is_initial_sync_done("journal"));
    assert!(!shared.is_initial_sync_done("books"));
    assert_eq!(local.namespace("journal").unwrap().read().total_rows(), 1);
}

#[tokio::test]
async fn cluster_id_mismatch_fails_fast() {
    let peer = filled_db(&[(1, "alpha")]);
    let local = Arc::new(Database::in_memory());
    let shared = leader_state(&["books"]);
    // peer believes it is cluster 8, we expect 7
    let source = Arc::new(LocalSyncSource::new(vec![peer.clone()], 8, 7));

    let entry = entry_for(&peer, "books");
    let err = syncer()
        .sync(vec![entry], shared.clone(), local, source)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
}

#[tokio::test]
async fn terminated_syncer_reports_terminated() {
    let peer = filled_db(&[(1, "alpha")]);
    let local = Arc::new(Database::in_memory());
    let shared = leader_state(&["books"]);
    let source = Arc::new(LocalSyncSource::new(vec![peer.clone()], 7, 7));

    let s = syncer();
    s.terminate();
    let err = s
        .sync(vec![entry_for(&peer, "books")], shared, local, source)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Terminated(_)));
}
