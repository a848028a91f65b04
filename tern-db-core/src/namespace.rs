//! Namespaces
//!
//! A [`Namespace`] owns its payload rows, index set, tags matcher, WAL and
//! replication state. Readers obtain an immutable snapshot through a
//! [`NamespaceHandle`]; writers run against a private clone which is
//! published by atomic pointer swap once the mutation commits:
//!
//! ```text
//! Steady -> Cloning -> Applying -> Publishing -> Steady
//! ```
//!
//! On any failure during `Applying` the clone is discarded, the old instance
//! stays current, and the WAL is not advanced.

use crate::cancel::OpContext;
use crate::cond::CondType;
use crate::error::{Error, Result};
use crate::fulltext::tokenize;
use crate::idset::RowId;
use crate::index::{Index, IndexDef, IndexKind, SelectOpts};
use crate::lsn::{ExtendedLsn, Lsn};
use crate::payload::{FieldId, PayloadField, PayloadRow, PayloadType, TUPLE_FIELD};
use crate::snapshot::{Snapshot, SnapshotChunk, SnapshotOpts, RAW_CHUNK_ROWS};
use crate::tags::{SharedTagsMatcher, TagsMatcher};
use crate::value::Value;
use crate::wal::{Wal, WalOp, WalRecord};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Per-namespace replication coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationState {
    pub ns_version: i64,
    pub last_lsn: Lsn,
    /// Deterministic hash over committed rows; divergence detector
    pub data_hash: u64,
}

impl ReplicationState {
    pub fn extended_lsn(&self) -> ExtendedLsn {
        ExtendedLsn::new(self.ns_version, self.last_lsn)
    }
}

/// Copy-on-write write phases, surfaced for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CowState {
    Cloning,
    Applying,
    Publishing,
}

/// The unit of schema, storage and replication
#[derive(Debug, Clone)]
pub struct Namespace {
    name: String,
    payload_type: PayloadType,
    tags: SharedTagsMatcher,
    rows: Vec<Option<PayloadRow>>,
    indexes: Vec<Index>,
    index_by_name: FxHashMap<String, usize>,
    pk_index: Option<usize>,
    wal: Wal,
    repl: ReplicationState,
    is_temporary: bool,
}

impl Namespace {
    pub fn new(name: impl Into<String>, ns_version: i64) -> Self {
        Self {
            name: name.into(),
            payload_type: PayloadType::new(),
            tags: SharedTagsMatcher::new(TagsMatcher::new(ns_version as u32)),
            rows: Vec::new(),
            indexes: Vec::new(),
            index_by_name: FxHashMap::default(),
            pk_index: None,
            wal: Wal::default(),
            repl: ReplicationState {
                ns_version,
                last_lsn: Lsn::EMPTY,
                data_hash: 0,
            },
            is_temporary: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    pub(crate) fn set_temporary(&mut self, tmp: bool) {
        self.is_temporary = tmp;
    }

    pub fn payload_type(&self) -> &PayloadType {
        &self.payload_type
    }

    /// Current tags-matcher snapshot (published by atomic swap)
    pub fn tags(&self) -> Arc<TagsMatcher> {
        self.tags.load()
    }

    pub fn repl_state(&self) -> ReplicationState {
        self.repl
    }

    pub(crate) fn set_repl_state(&mut self, repl: ReplicationState) {
        self.repl = repl;
    }

    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    // ---- schema -----------------------------------------------------------

    /// Append a schema field
    pub fn add_field(&mut self, field: PayloadField) -> Result<FieldId> {
        self.payload_type.add_field(field)
    }

    /// Add an index over already-declared fields. Rows present in the
    /// namespace are back-filled.
    pub fn add_index(&mut self, def: IndexDef) -> Result<()> {
        if self.index_by_name.contains_key(&def.name) {
            return Err(Error::conflict(format!("index '{}' already exists", def.name)));
        }
        for &f in &def.fields {
            self.payload_type.field(f)?;
        }
        let is_pk_candidate = def
            .fields
            .first()
            .and_then(|&f| self.payload_type.field(f).ok())
            .is_some_and(|f| f.is_pk);
        let idx_no = self.indexes.len();
        let mut index = Index::new(def);
        for (id, row) in self.rows.iter().enumerate() {
            if let Some(row) = row {
                Self::index_row(&self.payload_type, &mut index, row, id as RowId)?;
            }
        }
        self.index_by_name.insert(index.name().to_string(), idx_no);
        if self.pk_index.is_none() && is_pk_candidate && !index.def().is_composite() {
            self.pk_index = Some(idx_no);
        }
        self.indexes.push(index);
        Ok(())
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.index_by_name.get(name).map(|&i| &self.indexes[i])
    }

    pub fn index_no(&self, name: &str) -> Option<usize> {
        self.index_by_name.get(name).copied()
    }

    /// First single-field, non-sparse index over the field
    pub fn index_by_field(&self, field: FieldId) -> Option<&Index> {
        self.indexes.iter().find(|i| {
            !i.is_sparse() && !i.def().is_composite() && i.def().fields.first() == Some(&field)
        })
    }

    /// Composite indexes, for substitution by the preprocessor
    pub fn composite_indexes(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter().filter(|i| i.def().is_composite())
    }

    // ---- rows -------------------------------------------------------------

    pub fn row(&self, id: RowId) -> Option<&PayloadRow> {
        self.rows.get(id as usize).and_then(|r| r.as_ref())
    }

    /// Live row ids, ascending
    pub fn ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .map(|(i, _)| i as RowId)
    }

    pub fn total_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.is_some()).count()
    }

    /// Parse the serialized tuple back into a document
    pub fn doc(&self, id: RowId) -> Option<serde_json::Value> {
        self.row(id)
            .and_then(|r| serde_json::from_slice(r.tuple()).ok())
    }

    /// Values at a dotted json path inside the tuple, for sparse predicates
    pub fn tuple_values(&self, row: &PayloadRow, path: &str) -> Vec<Value> {
        let Ok(doc) = serde_json::from_slice::<serde_json::Value>(row.tuple()) else {
            return Vec::new();
        };
        let mut cur = vec![doc];
        for seg in path.split('.') {
            let mut next = Vec::new();
            for v in cur {
                match v {
                    serde_json::Value::Object(mut m) => {
                        if let Some(child) = m.remove(seg) {
                            next.push(child);
                        }
                    }
                    serde_json::Value::Array(items) => {
                        for item in items {
                            if let serde_json::Value::Object(mut m) = item {
                                if let Some(child) = m.remove(seg) {
                                    next.push(child);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            cur = next;
        }
        let mut out = Vec::new();
        for v in cur {
            match v {
                serde_json::Value::Array(items) => {
                    out.extend(items.iter().map(json_to_value));
                }
                other => out.push(json_to_value(&other)),
            }
        }
        out
    }

    // ---- mutation ---------------------------------------------------------

    fn pk_field(&self) -> Result<FieldId> {
        self.payload_type
            .pk_field()
            .ok_or_else(|| Error::invalid_argument(format!("namespace '{}' has no PK", self.name)))
    }

    fn pk_value(&self, doc: &serde_json::Value) -> Result<Value> {
        let pk = self.pk_field()?;
        let def = self.payload_type.field(pk)?;
        let raw = doc
            .get(&def.name)
            .ok_or_else(|| Error::invalid_argument(format!("document has no PK field '{}'", def.name)))?;
        json_to_value(raw).coerce(def.value_type)
    }

    fn find_by_pk(&self, pk: &Value) -> Option<RowId> {
        let idx = &self.indexes[self.pk_index?];
        idx.get(pk).and_then(|set| set.iter().next())
    }

    fn build_row(&mut self, doc: &serde_json::Value) -> Result<PayloadRow> {
        let mut row = self.payload_type.new_row();
        let obj = doc
            .as_object()
            .ok_or_else(|| Error::invalid_argument("document must be a json object"))?;
        for (field_id, def) in self
            .payload_type
            .fields()
            .iter()
            .enumerate()
            .skip(TUPLE_FIELD + 1)
            .map(|(i, d)| (i, d.clone()))
            .collect::<Vec<_>>()
        {
            if def.is_sparse {
                continue;
            }
            let Some(raw) = obj.get(&def.name) else {
                continue;
            };
            let values: Vec<Value> = match raw {
                serde_json::Value::Array(items) => items
                    .iter()
                    .map(|v| json_to_value(v).coerce(def.value_type))
                    .collect::<Result<_>>()?,
                other => vec![json_to_value(other).coerce(def.value_type)?],
            };
            self.payload_type.set(&mut row, field_id, values)?;
        }
        self.tags.update(|tm| {
            for key in obj.keys() {
                tm.tag_or_add(key);
            }
        });
        row.set_tuple(serde_json::to_vec(doc).map_err(|e| Error::internal(e.to_string()))?);
        Ok(row)
    }

    fn index_row(pt: &PayloadType, index: &mut Index, row: &PayloadRow, id: RowId) -> Result<()> {
        match index.kind() {
            IndexKind::Sparse => {}
            IndexKind::FullText => {
                // handled in bulk by ft_index_row
            }
            _ => {
                if index.def().is_composite() {
                    let key = pt.composite_key(row, &index.def().fields)?;
                    index.upsert(key, id);
                } else if let Some(&f) = index.def().fields.first() {
                    for v in pt.get(row, f)? {
                        index.upsert(v.clone(), id);
                    }
                }
            }
        }
        Ok(())
    }

    fn unindex_row(pt: &PayloadType, index: &mut Index, row: &PayloadRow, id: RowId) -> Result<()> {
        match index.kind() {
            IndexKind::Sparse | IndexKind::FullText => {}
            _ => {
                if index.def().is_composite() {
                    let key = pt.composite_key(row, &index.def().fields)?;
                    index.remove(&key, id);
                } else if let Some(&f) = index.def().fields.first() {
                    for v in pt.get(row, f)? {
                        index.remove(v, id);
                    }
                }
            }
        }
        Ok(())
    }

    fn ft_index_row(&mut self, row_id: RowId) -> Result<()> {
        let Some(row) = self.rows[row_id as usize].clone() else {
            return Ok(());
        };
        let pt = self.payload_type.clone();
        for index in &mut self.indexes {
            if !index.is_fulltext() {
                continue;
            }
            let fields = index.def().fields.clone();
            let Some(ft) = index.ft_mut() else { continue };
            let stop = ft.config.stop_words.clone();
            let mut field_tokens = Vec::with_capacity(fields.len());
            for &f in &fields {
                let mut text = String::new();
                for v in pt.get(&row, f)? {
                    if let Value::String(s) = v {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(s);
                    }
                }
                field_tokens.push(tokenize(&text, &stop));
            }
            let cfg = ft.config.clone();
            ft.data.add_doc(row_id, &field_tokens, &cfg);
        }
        Ok(())
    }

    fn ft_unindex_row(&mut self, row_id: RowId) {
        for index in &mut self.indexes {
            if let Some(ft) = index.ft_mut() {
                ft.data.remove_doc(row_id);
            }
        }
    }

    /// Apply a document without touching the WAL (shared by local writes and
    /// replication applies)
    fn apply_doc(&mut self, doc: &serde_json::Value) -> Result<RowId> {
        let pk = self.pk_value(doc)?;
        let existing = self.find_by_pk(&pk);
        let row = self.build_row(doc)?;
        let id = match existing {
            Some(id) => {
                let old = self.rows[id as usize]
                    .take()
                    .ok_or_else(|| Error::internal("pk index references a free row"))?;
                self.repl.data_hash = self
                    .repl
                    .data_hash
                    .wrapping_sub(self.payload_type.row_hash(&old));
                for index in &mut self.indexes {
                    Self::unindex_row(&self.payload_type, index, &old, id)?;
                }
                self.ft_unindex_row(id);
                id
            }
            None => {
                self.rows.push(None);
                (self.rows.len() - 1) as RowId
            }
        };
        self.repl.data_hash = self
            .repl
            .data_hash
            .wrapping_add(self.payload_type.row_hash(&row));
        for index in &mut self.indexes {
            Self::index_row(&self.payload_type, index, &row, id)?;
        }
        self.rows[id as usize] = Some(row);
        self.ft_index_row(id)?;
        Ok(id)
    }

    fn apply_delete(&mut self, pk: &Value) -> Result<RowId> {
        let id = self
            .find_by_pk(pk)
            .ok_or_else(|| Error::not_found(format!("no row with pk {} in '{}'", pk, self.name)))?;
        let old = self.rows[id as usize]
            .take()
            .ok_or_else(|| Error::internal("pk index references a free row"))?;
        self.repl.data_hash = self
            .repl
            .data_hash
            .wrapping_sub(self.payload_type.row_hash(&old));
        for index in &mut self.indexes {
            Self::unindex_row(&self.payload_type, index, &old, id)?;
        }
        self.ft_unindex_row(id);
        Ok(id)
    }

    fn apply_truncate(&mut self) {
        self.rows.clear();
        let defs: Vec<IndexDef> = self.indexes.iter().map(|i| i.def().clone()).collect();
        self.indexes = defs.into_iter().map(Index::new).collect();
        self.repl.data_hash = 0;
    }

    /// Insert; duplicate PK is a conflict
    pub fn insert(&mut self, doc: &serde_json::Value) -> Result<RowId> {
        let pk = self.pk_value(doc)?;
        if self.find_by_pk(&pk).is_some() {
            return Err(Error::conflict(format!(
                "duplicate pk {} in '{}'",
                pk, self.name
            )));
        }
        self.upsert(doc)
    }

    /// Insert or replace by PK
    pub fn upsert(&mut self, doc: &serde_json::Value) -> Result<RowId> {
        let id = self.apply_doc(doc)?;
        self.repl.last_lsn = self.wal.append(WalOp::Upsert { doc: doc.clone() });
        Ok(id)
    }

    /// Delete by PK
    pub fn delete(&mut self, pk: &Value) -> Result<RowId> {
        let id = self.apply_delete(pk)?;
        self.repl.last_lsn = self.wal.append(WalOp::Delete { pk: pk.clone() });
        Ok(id)
    }

    /// Drop every row, keeping schema and indexes
    pub fn truncate(&mut self) -> Result<()> {
        self.apply_truncate();
        self.repl.last_lsn = self.wal.append(WalOp::Truncate);
        Ok(())
    }

    // ---- replication ------------------------------------------------------

    /// Capture a snapshot stream for a peer at `opts.from`.
    ///
    /// Falls back to raw data (schema + rows + recent WAL tail) when the
    /// requested position is empty or no longer inside the WAL ring.
    pub fn build_snapshot(&self, opts: &SnapshotOpts) -> Snapshot {
        let from = opts.from;
        let same_epoch = from.ns_version == self.repl.ns_version;
        if same_epoch && !from.is_empty() {
            if let Some(tail) = self.wal.tail_after(from.lsn) {
                let chunks = if tail.is_empty() {
                    Vec::new()
                } else {
                    vec![SnapshotChunk::Wal { records: tail }]
                };
                return Snapshot {
                    chunks,
                    has_raw_data: false,
                    state: self.repl,
                };
            }
        }
        // forced / full path
        let mut chunks = vec![SnapshotChunk::Meta {
            fields: self.payload_type.fields()[TUPLE_FIELD + 1..].to_vec(),
            indexes: self.indexes.iter().map(|i| i.def().clone()).collect(),
        }];
        let mut docs = Vec::new();
        for id in self.ids() {
            if let Some(doc) = self.doc(id) {
                docs.push(doc);
            }
            if docs.len() >= RAW_CHUNK_ROWS {
                chunks.push(SnapshotChunk::Raw {
                    docs: std::mem::take(&mut docs),
                });
            }
        }
        if !docs.is_empty() {
            chunks.push(SnapshotChunk::Raw { docs });
        }
        let tail = self.wal.recent(opts.max_wal_depth_on_force_sync);
        if !tail.is_empty() {
            chunks.push(SnapshotChunk::Wal { records: tail });
        }
        Snapshot {
            chunks,
            has_raw_data: true,
            state: self.repl,
        }
    }

    /// Apply one snapshot chunk in stream order
    pub fn apply_snapshot_chunk(&mut self, chunk: SnapshotChunk, ctx: &OpContext) -> Result<()> {
        ctx.check()?;
        match chunk {
            SnapshotChunk::Meta { fields, indexes } => {
                if self.total_rows() != 0 {
                    return Err(Error::invalid_argument(
                        "schema chunk on a non-empty namespace",
                    ));
                }
                for f in fields {
                    // idempotent when the schema was pre-created
                    if self.payload_type.field_id(&f.name).is_none() {
                        self.payload_type.add_field(f)?;
                    }
                }
                for def in indexes {
                    if self.index(&def.name).is_none() {
                        self.add_index(def)?;
                    }
                }
                Ok(())
            }
            SnapshotChunk::Raw { docs } => {
                for doc in docs {
                    self.apply_doc(&doc)?;
                }
                Ok(())
            }
            SnapshotChunk::Wal { records } => {
                for rec in records {
                    if rec.lsn <= self.repl.last_lsn && !self.repl.last_lsn.is_empty() {
                        continue;
                    }
                    self.apply_wal_record(&rec)?;
                }
                Ok(())
            }
        }
    }

    fn apply_wal_record(&mut self, rec: &WalRecord) -> Result<()> {
        match &rec.op {
            WalOp::Upsert { doc } => {
                self.apply_doc(doc)?;
            }
            WalOp::Delete { pk } => {
                // a record may refer to a row the raw chunks never shipped
                let _ = self.apply_delete(pk);
            }
            WalOp::Truncate => self.apply_truncate(),
        }
        self.wal.append_replicated(rec.clone());
        self.repl.last_lsn = rec.lsn;
        Ok(())
    }

    // ---- query-side probes -----------------------------------------------

    /// Index lookup shorthand used by the selector
    pub fn select_key(
        &self,
        index_name: &str,
        values: &[Value],
        cond: CondType,
        opts: &SelectOpts,
    ) -> Result<Vec<crate::index::SelectKeyResult>> {
        let index = self
            .index(index_name)
            .ok_or_else(|| Error::not_found(format!("index '{}' not found", index_name)))?;
        index.select_key(values, cond, opts)
    }
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else {
                Value::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Tuple(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(_) => Value::String(v.to_string()),
    }
}

/// Convert a raw document value to [`Value`]; exposed for query-side coercion
pub fn doc_value(v: &serde_json::Value) -> Value {
    json_to_value(v)
}

// ---- shared handle --------------------------------------------------------

/// Shared, swap-on-publish namespace handle
#[derive(Debug)]
pub struct NamespaceHandle {
    current: ArcSwap<Namespace>,
    write_lock: Mutex<()>,
}

impl NamespaceHandle {
    pub fn new(ns: Namespace) -> Self {
        Self {
            current: ArcSwap::from_pointee(ns),
            write_lock: Mutex::new(()),
        }
    }

    /// Immutable snapshot; stays valid however many writes land after it
    pub fn read(&self) -> Arc<Namespace> {
        self.current.load_full()
    }

    /// Run a mutation against a private clone and publish on success.
    ///
    /// Writers serialize on the clone lock; readers never block. When the
    /// mutation fails the clone is dropped and the published instance is
    /// untouched.
    pub fn write<R>(&self, f: impl FnOnce(&mut Namespace) -> Result<R>) -> Result<R> {
        let _guard = self.write_lock.lock();
        debug!(ns = %self.current.load().name(), state = ?CowState::Cloning, "namespace write");
        let mut clone = (**self.current.load()).clone();
        debug!(ns = %clone.name(), state = ?CowState::Applying, "namespace write");
        match f(&mut clone) {
            Ok(v) => {
                debug!(ns = %clone.name(), state = ?CowState::Publishing, "namespace publish");
                self.current.store(Arc::new(clone));
                Ok(v)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;
    use serde_json::json;

    fn books() -> Namespace {
        let mut ns = Namespace::new("books", 1);
        ns.add_field(PayloadField::new("id", ValueType::Int).pk())
            .unwrap();
        ns.add_field(PayloadField::new("author_id", ValueType::String))
            .unwrap();
        ns.add_field(PayloadField::new("pages", ValueType::Int))
            .unwrap();
        let id = ns.payload_type().field_id("id").unwrap();
        let author = ns.payload_type().field_id("author_id").unwrap();
        let pages = ns.payload_type().field_id("pages").unwrap();
        ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))
            .unwrap();
        ns.add_index(IndexDef::new("author_id", IndexKind::Hash, vec![author]))
            .unwrap();
        ns.add_index(IndexDef::new("pages", IndexKind::Ordered, vec![pages]))
            .unwrap();
        ns
    }

    fn fill(ns: &mut Namespace) {
        for (id, author, pages) in [(1, "A", 100), (2, "A", 300), (3, "B", 300), (4, "A", 300)] {
            ns.upsert(&json!({"id": id, "author_id": author, "pages": pages}))
                .unwrap();
        }
    }

    #[test]
    fn upsert_replaces_by_pk() {
        let mut ns = books();
        fill(&mut ns);
        assert_eq!(ns.total_rows(), 4);
        ns.upsert(&json!({"id": 2, "author_id": "B", "pages": 42}))
            .unwrap();
        assert_eq!(ns.total_rows(), 4);
        let idx = ns.index("author_id").unwrap();
        // author A lost row 2
        assert_eq!(idx.get(&Value::String("A".into())).unwrap().len(), 2);
    }

    #[test]
    fn insert_conflicts_on_duplicate_pk() {
        let mut ns = books();
        fill(&mut ns);
        let err = ns
            .insert(&json!({"id": 1, "author_id": "Z", "pages": 1}))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn delete_updates_hash_and_indexes() {
        let mut ns = books();
        fill(&mut ns);
        let h = ns.repl_state().data_hash;
        ns.delete(&Value::Int(3)).unwrap();
        assert_ne!(ns.repl_state().data_hash, h);
        assert_eq!(ns.total_rows(), 3);
        assert!(ns.index("author_id").unwrap().get(&Value::String("B".into())).is_none());
    }

    #[test]
    fn data_hash_is_content_deterministic() {
        let mut a = books();
        let mut b = books();
        fill(&mut a);
        // same rows, different arrival order
        for (id, author, pages) in [(4, "A", 300), (1, "A", 100), (3, "B", 300), (2, "A", 300)] {
            b.upsert(&json!({"id": id, "author_id": author, "pages": pages}))
                .unwrap();
        }
        assert_eq!(a.repl_state().data_hash, b.repl_state().data_hash);
    }

    #[test]
    fn snapshot_round_trip_wal_only() {
        let mut src = books();
        fill(&mut src);
        let mut dst = books();
        // dst already has the first two ops
        dst.upsert(&json!({"id": 1, "author_id": "A", "pages": 100})).unwrap();
        dst.upsert(&json!({"id": 2, "author_id": "A", "pages": 300})).unwrap();

        let snap = src.build_snapshot(&SnapshotOpts {
            from: dst.repl_state().extended_lsn(),
            max_wal_depth_on_force_sync: 1000,
        });
        assert!(!snap.has_raw_data);
        let ctx = OpContext::new();
        for ch in snap.chunks {
            dst.apply_snapshot_chunk(ch, &ctx).unwrap();
        }
        assert_eq!(dst.repl_state().data_hash, src.repl_state().data_hash);
        assert_eq!(dst.repl_state().last_lsn, src.repl_state().last_lsn);
    }

    #[test]
    fn snapshot_forced_is_raw() {
        let mut src = books();
        fill(&mut src);
        let snap = src.build_snapshot(&SnapshotOpts {
            from: ExtendedLsn::EMPTY,
            max_wal_depth_on_force_sync: 2,
        });
        assert!(snap.has_raw_data);
        let mut dst = Namespace::new("books_tmp", 9);
        let ctx = OpContext::new();
        for ch in snap.chunks {
            dst.apply_snapshot_chunk(ch, &ctx).unwrap();
        }
        assert_eq!(dst.repl_state().data_hash, src.repl_state().data_hash);
        assert_eq!(dst.total_rows(), 4);
    }

    #[test]
    fn cow_readers_keep_old_snapshot() {
        let mut ns = books();
        fill(&mut ns);
        let handle = NamespaceHandle::new(ns);
        let reader = handle.read();
        handle
            .write(|ns| ns.upsert(&json!({"id": 9, "author_id": "C", "pages": 7})))
            .unwrap();
        assert_eq!(reader.total_rows(), 4);
        assert_eq!(handle.read().total_rows(), 5);
    }

    #[test]
    fn cow_failed_write_publishes_nothing() {
        let mut ns = books();
        fill(&mut ns);
        let handle = NamespaceHandle::new(ns);
        let before = handle.read().repl_state();
        let err = handle.write(|ns| {
            ns.upsert(&json!({"id": 10, "author_id": "C", "pages": 7}))?;
            Err::<(), _>(Error::internal("boom"))
        });
        assert!(err.is_err());
        assert_eq!(handle.read().repl_state(), before);
        assert_eq!(handle.read().total_rows(), 4);
    }

    #[test]
    fn sparse_tuple_values() {
        let mut ns = books();
        ns.upsert(&json!({"id": 1, "author_id": "A", "pages": 1, "meta": {"lang": "en"}}))
            .unwrap();
        let row = ns.row(0).unwrap();
        let vals = ns.tuple_values(row, "meta.lang");
        assert_eq!(vals, vec![Value::String("en".into())]);
    }
}
