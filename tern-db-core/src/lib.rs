//! # tern-db core
//!
//! In-memory document storage for tern-db:
//! - tagged value model with numeric-class ordering
//! - payload schema/rows with inline scalars and arena-backed arrays
//! - secondary indexes (hash, ordered, sparse, full-text storage)
//! - namespaces with copy-on-write publication, WAL, and replication state
//! - the `Database` registry the query engine and leader syncer drive
//!
//! Query execution lives in `tern-db-query`; cluster sync in
//! `tern-db-cluster`.

pub mod cancel;
pub mod cond;
pub mod database;
pub mod error;
pub mod fulltext;
pub mod idset;
pub mod index;
pub mod lsn;
pub mod namespace;
pub mod payload;
pub mod snapshot;
pub mod storage;
pub mod tags;
pub mod value;
pub mod wal;

pub use cancel::{CancelFlag, OpContext};
pub use cond::{match_values, CollateMode, CondType};
pub use database::{Database, DatabaseConfig};
pub use error::{Error, Result};
pub use idset::{IdSet, IdSetRef, RowId};
pub use index::{
    ConditionSpec, FtIndex, Index, IndexDef, IndexKind, SelectKeyResult, SelectOpts,
};
pub use lsn::{ExtendedLsn, Lsn};
pub use namespace::{doc_value, Namespace, NamespaceHandle, ReplicationState};
pub use payload::{FieldId, PayloadField, PayloadRow, PayloadType, TUPLE_FIELD};
pub use snapshot::{Snapshot, SnapshotChunk, SnapshotOpts};
pub use storage::ReplicationConf;
pub use tags::{SharedTagsMatcher, TagId, TagPath, TagsMatcher};
pub use value::{Value, ValueType};
pub use wal::{Wal, WalOp, WalRecord};
