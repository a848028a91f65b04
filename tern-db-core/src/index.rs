//! Secondary indexes
//!
//! Each namespace owns a set of [`Index`] values: hash (equality/IN),
//! ordered (ranges plus ordered walks that supply sort order), full-text
//! (structures in [`crate::fulltext`]), and sparse (a json path into the
//! tuple, evaluated on demand — owns no ids).
//!
//! `select_key` is the single lookup surface: it returns one or more
//! [`SelectKeyResult`]s that the selector ANDs together. A result is either
//! a list of id-set snapshots (unioned within the result) or a comparator
//! specification for late filtering. Id-set buckets are immutable snapshots:
//! writers copy a bucket, mutate the copy, and swap it in, so concurrent
//! readers keep consistent sets.

use crate::cond::{CollateMode, CondType};
use crate::error::{Error, Result};
use crate::fulltext::{FtConfig, FtIndexData};
use crate::idset::{IdSet, IdSetRef, RowId};
use crate::payload::FieldId;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Index structure family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Hash,
    Ordered,
    FullText,
    Sparse,
}

/// Index definition
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub kind: IndexKind,
    /// Declared fields; more than one makes this a composite index
    pub fields: Vec<FieldId>,
    /// Json path into the tuple for sparse indexes
    pub json_path: Option<String>,
    pub collate: CollateMode,
    /// Full-text configuration, present when kind is FullText
    pub ft_config: Option<FtConfig>,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, kind: IndexKind, fields: Vec<FieldId>) -> Self {
        Self {
            name: name.into(),
            kind,
            fields,
            json_path: None,
            collate: CollateMode::None,
            ft_config: None,
        }
    }

    pub fn sparse(name: impl Into<String>, json_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Sparse,
            fields: Vec::new(),
            json_path: Some(json_path.into()),
            collate: CollateMode::None,
            ft_config: None,
        }
    }

    pub fn with_collate(mut self, collate: CollateMode) -> Self {
        self.collate = collate;
        self
    }

    pub fn with_ft_config(mut self, cfg: FtConfig) -> Self {
        self.ft_config = Some(cfg);
        self
    }

    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }
}

/// Lookup options passed down from the selector
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectOpts {
    /// Upper bound the enclosing query already established; lets an index
    /// decline an expensive range collection in favor of a comparator
    pub max_iterations: usize,
    pub distinct: bool,
}

/// Comparator specification for late filtering; bound against the schema by
/// the selector
#[derive(Debug, Clone)]
pub struct ConditionSpec {
    pub fields: Vec<FieldId>,
    pub json_path: Option<String>,
    pub cond: CondType,
    pub values: Vec<Value>,
    pub collate: CollateMode,
}

/// One lookup product: either id-set snapshots (unioned) or a comparator
#[derive(Debug, Clone)]
pub enum SelectKeyResult {
    IdSets(Vec<IdSetRef>),
    Comparator(ConditionSpec),
}

impl SelectKeyResult {
    /// Upper bound on yielded ids; comparators cost a full scan
    pub fn max_iterations(&self, total_rows: usize) -> usize {
        match self {
            SelectKeyResult::IdSets(sets) => sets.iter().map(|s| s.len()).sum(),
            SelectKeyResult::Comparator(_) => total_rows,
        }
    }
}

/// Full-text index storage: configuration plus built structures
#[derive(Debug, Clone)]
pub struct FtIndex {
    pub config: FtConfig,
    pub data: FtIndexData,
}

#[derive(Debug, Clone)]
enum IndexStore {
    Hash(FxHashMap<Value, IdSetRef>),
    Ordered(BTreeMap<Value, IdSetRef>),
    Sparse,
    FullText(Box<FtIndex>),
}

/// A single secondary index
#[derive(Debug, Clone)]
pub struct Index {
    def: IndexDef,
    store: IndexStore,
    ids_count: usize,
}

impl Index {
    pub fn new(def: IndexDef) -> Self {
        let store = match def.kind {
            IndexKind::Hash => IndexStore::Hash(FxHashMap::default()),
            IndexKind::Ordered => IndexStore::Ordered(BTreeMap::new()),
            IndexKind::Sparse => IndexStore::Sparse,
            IndexKind::FullText => {
                let cfg = def.ft_config.clone().unwrap_or_default();
                let fields = def.fields.len().max(1);
                IndexStore::FullText(Box::new(FtIndex {
                    config: cfg,
                    data: FtIndexData::new(fields),
                }))
            }
        };
        Self {
            def,
            store,
            ids_count: 0,
        }
    }

    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn kind(&self) -> IndexKind {
        self.def.kind
    }

    pub fn is_fulltext(&self) -> bool {
        self.def.kind == IndexKind::FullText
    }

    pub fn is_ordered(&self) -> bool {
        self.def.kind == IndexKind::Ordered
    }

    pub fn is_sparse(&self) -> bool {
        self.def.kind == IndexKind::Sparse
    }

    /// Total ids referenced across buckets
    pub fn size(&self) -> usize {
        self.ids_count
    }

    pub fn ft(&self) -> Option<&FtIndex> {
        match &self.store {
            IndexStore::FullText(ft) => Some(ft),
            _ => None,
        }
    }

    pub fn ft_mut(&mut self) -> Option<&mut FtIndex> {
        match &mut self.store {
            IndexStore::FullText(ft) => Some(ft),
            _ => None,
        }
    }

    /// Insert a row id under a key. Buckets are copied, mutated and swapped
    /// so existing readers keep their snapshots.
    pub fn upsert(&mut self, key: Value, id: RowId) {
        let inserted = match &mut self.store {
            IndexStore::Hash(m) => {
                let bucket = m.entry(key).or_insert_with(|| Arc::new(IdSet::new()));
                Arc::make_mut(bucket).insert(id)
            }
            IndexStore::Ordered(m) => {
                let bucket = m.entry(key).or_insert_with(|| Arc::new(IdSet::new()));
                Arc::make_mut(bucket).insert(id)
            }
            IndexStore::Sparse | IndexStore::FullText(_) => false,
        };
        if inserted {
            self.ids_count += 1;
        }
    }

    /// Remove a row id from a key's bucket, dropping the bucket when empty
    pub fn remove(&mut self, key: &Value, id: RowId) {
        let removed = match &mut self.store {
            IndexStore::Hash(m) => remove_from_bucket(m.get_mut(key), id) && {
                if m.get(key).is_some_and(|b| b.is_empty()) {
                    m.remove(key);
                }
                true
            },
            IndexStore::Ordered(m) => remove_from_bucket(m.get_mut(key), id) && {
                if m.get(key).is_some_and(|b| b.is_empty()) {
                    m.remove(key);
                }
                true
            },
            IndexStore::Sparse | IndexStore::FullText(_) => false,
        };
        if removed {
            self.ids_count -= 1;
        }
    }

    /// Direct bucket lookup (PK probes)
    pub fn get(&self, key: &Value) -> Option<IdSetRef> {
        match &self.store {
            IndexStore::Hash(m) => m.get(key).cloned(),
            IndexStore::Ordered(m) => m.get(key).cloned(),
            _ => None,
        }
    }

    fn comparator(&self, cond: CondType, values: Vec<Value>) -> SelectKeyResult {
        SelectKeyResult::Comparator(ConditionSpec {
            fields: self.def.fields.clone(),
            json_path: self.def.json_path.clone(),
            cond,
            values,
            collate: self.def.collate,
        })
    }

    /// Produce iterators for a condition over this index.
    ///
    /// Results are ANDed by the caller; `Set` unions buckets inside one
    /// result while `AllSet` yields one result per value so the caller's
    /// conjunction realizes the intersection.
    pub fn select_key(
        &self,
        values: &[Value],
        cond: CondType,
        _opts: &SelectOpts,
    ) -> Result<Vec<SelectKeyResult>> {
        match &self.store {
            IndexStore::FullText(_) => Err(Error::internal(
                "full-text predicates go through the full-text selector",
            )),
            IndexStore::Sparse => Ok(vec![self.comparator(cond, values.to_vec())]),
            IndexStore::Hash(m) => match cond {
                CondType::Eq | CondType::Set => {
                    let sets = values.iter().filter_map(|v| m.get(v).cloned()).collect();
                    Ok(vec![SelectKeyResult::IdSets(sets)])
                }
                CondType::AllSet => Ok(values
                    .iter()
                    .map(|v| {
                        SelectKeyResult::IdSets(m.get(v).cloned().into_iter().collect())
                    })
                    .collect()),
                _ => Ok(vec![self.comparator(cond, values.to_vec())]),
            },
            IndexStore::Ordered(m) => match cond {
                CondType::Eq | CondType::Set => {
                    let sets = values.iter().filter_map(|v| m.get(v).cloned()).collect();
                    Ok(vec![SelectKeyResult::IdSets(sets)])
                }
                CondType::AllSet => Ok(values
                    .iter()
                    .map(|v| {
                        SelectKeyResult::IdSets(m.get(v).cloned().into_iter().collect())
                    })
                    .collect()),
                CondType::Lt | CondType::Le | CondType::Gt | CondType::Ge | CondType::Range => {
                    let Some(first) = values.first() else {
                        return Err(Error::invalid_query(format!(
                            "condition {} on '{}' requires a value",
                            cond, self.def.name
                        )));
                    };
                    use std::ops::Bound::*;
                    let range: Vec<IdSetRef> = match cond {
                        CondType::Lt => m
                            .range((Unbounded, Excluded(first.clone())))
                            .map(|(_, s)| s.clone())
                            .collect(),
                        CondType::Le => m
                            .range((Unbounded, Included(first.clone())))
                            .map(|(_, s)| s.clone())
                            .collect(),
                        CondType::Gt => m
                            .range((Excluded(first.clone()), Unbounded))
                            .map(|(_, s)| s.clone())
                            .collect(),
                        CondType::Ge => m
                            .range((Included(first.clone()), Unbounded))
                            .map(|(_, s)| s.clone())
                            .collect(),
                        CondType::Range => {
                            let Some(second) = values.get(1) else {
                                return Err(Error::invalid_query(format!(
                                    "range on '{}' requires two values",
                                    self.def.name
                                )));
                            };
                            m.range((Included(first.clone()), Included(second.clone())))
                                .map(|(_, s)| s.clone())
                                .collect()
                        }
                        _ => unreachable!(),
                    };
                    Ok(vec![SelectKeyResult::IdSets(range)])
                }
                _ => Ok(vec![self.comparator(cond, values.to_vec())]),
            },
        }
    }

    /// Bucket walk in key order, yielding ids for sort-by-index.
    /// Ids inside one bucket come out ascending.
    pub fn ordered_ids(&self, desc: bool) -> Option<Vec<RowId>> {
        let IndexStore::Ordered(m) = &self.store else {
            return None;
        };
        let mut out = Vec::with_capacity(self.ids_count);
        if desc {
            for (_, set) in m.iter().rev() {
                out.extend(set.iter());
            }
        } else {
            for (_, set) in m.iter() {
                out.extend(set.iter());
            }
        }
        Some(out)
    }

    /// Distinct key walk in order (facet/sort helpers)
    pub fn keys(&self) -> Vec<Value> {
        match &self.store {
            IndexStore::Hash(m) => m.keys().cloned().collect(),
            IndexStore::Ordered(m) => m.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

fn remove_from_bucket(bucket: Option<&mut IdSetRef>, id: RowId) -> bool {
    match bucket {
        Some(b) => Arc::make_mut(b).remove(id),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_index() -> Index {
        Index::new(IndexDef::new("author_id", IndexKind::Hash, vec![1]))
    }

    fn ordered_index() -> Index {
        Index::new(IndexDef::new("pages", IndexKind::Ordered, vec![2]))
    }

    #[test]
    fn hash_eq_lookup() {
        let mut idx = hash_index();
        idx.upsert(Value::Int(1), 10);
        idx.upsert(Value::Int(1), 11);
        idx.upsert(Value::Int(2), 12);
        assert_eq!(idx.size(), 3);

        let res = idx
            .select_key(&[Value::Int(1)], CondType::Eq, &SelectOpts::default())
            .unwrap();
        assert_eq!(res.len(), 1);
        match &res[0] {
            SelectKeyResult::IdSets(sets) => {
                assert_eq!(sets.len(), 1);
                assert_eq!(sets[0].as_slice(), &[10, 11]);
            }
            _ => panic!("expected id sets"),
        }
    }

    #[test]
    fn bucket_snapshots_survive_writes() {
        let mut idx = hash_index();
        idx.upsert(Value::Int(1), 10);
        let before = idx.get(&Value::Int(1)).unwrap();
        idx.upsert(Value::Int(1), 11);
        assert_eq!(before.as_slice(), &[10]);
        assert_eq!(idx.get(&Value::Int(1)).unwrap().as_slice(), &[10, 11]);
    }

    #[test]
    fn ordered_range_lookup() {
        let mut idx = ordered_index();
        for (id, pages) in [(1u32, 100), (2, 300), (3, 300), (4, 500)] {
            idx.upsert(Value::Int(pages), id);
        }
        let res = idx
            .select_key(
                &[Value::Int(100), Value::Int(300)],
                CondType::Range,
                &SelectOpts::default(),
            )
            .unwrap();
        match &res[0] {
            SelectKeyResult::IdSets(sets) => {
                let ids: Vec<RowId> = sets.iter().flat_map(|s| s.iter()).collect();
                assert_eq!(ids, vec![1, 2, 3]);
            }
            _ => panic!("expected id sets"),
        }
    }

    #[test]
    fn allset_yields_one_result_per_value() {
        let mut idx = hash_index();
        idx.upsert(Value::Int(1), 10);
        idx.upsert(Value::Int(2), 10);
        idx.upsert(Value::Int(1), 11);
        let res = idx
            .select_key(
                &[Value::Int(1), Value::Int(2)],
                CondType::AllSet,
                &SelectOpts::default(),
            )
            .unwrap();
        assert_eq!(res.len(), 2);
    }

    #[test]
    fn ordered_walk_supplies_sort_order() {
        let mut idx = ordered_index();
        idx.upsert(Value::Int(300), 2);
        idx.upsert(Value::Int(100), 1);
        idx.upsert(Value::Int(300), 4);
        assert_eq!(idx.ordered_ids(false).unwrap(), vec![1, 2, 4]);
        assert_eq!(idx.ordered_ids(true).unwrap(), vec![2, 4, 1]);
    }

    #[test]
    fn remove_drops_empty_buckets() {
        let mut idx = hash_index();
        idx.upsert(Value::Int(1), 10);
        idx.remove(&Value::Int(1), 10);
        assert_eq!(idx.size(), 0);
        assert!(idx.get(&Value::Int(1)).is_none());
    }
}
