//! Join engine
//!
//! A [`JoinedSelector`] executes one join: the right sub-query runs once at
//! build time and materializes a pre-result — full rows below
//! [`VALUES_THRESHOLD`], just ids below [`IDSET_THRESHOLD`], deferred
//! per-row lookups otherwise. Per outer row, the left side of every
//! on-condition is substituted from the outer payload and evaluated against
//! the pre-result (or straight against the right namespace in deferred
//! mode). An on-entry whose left field has no value degenerates to
//! always-false.
//!
//! The distinct right-side join-key values feed the preprocessor's
//! condition injection (see `preprocess::inject_join_conditions`).

use crate::comparator::{eval_filter, field_values};
use crate::error::{QueryError, Result};
use crate::iterators::execute_filter_ids;
use crate::model::{FieldRef, FilterNode, JoinOnEntry, JoinQuery, JoinType, OpType, StrictMode};
use crate::preprocess::Preprocessor;
use std::collections::BTreeSet;
use std::sync::Arc;
use tern_db_core::{
    match_values, CondType, Database, IdSet, Namespace, OpContext, PayloadRow, RowId, Value,
};
use tracing::debug;

/// Right side materializes full rows when at most this many match
pub const VALUES_THRESHOLD: usize = 1024;
/// Right side materializes ids when at most this many match
pub const IDSET_THRESHOLD: usize = 65536;
/// Injection is skipped when the right side exceeds the outer's best
/// iterator by this factor
pub const MAX_ITERATIONS_SCALE_FOR_INNER_JOIN_OPT: usize = 100;

/// Materialization of the right sub-query
#[derive(Debug, Clone)]
pub enum PreResult {
    /// Full right-side rows
    Values(Vec<(RowId, PayloadRow)>),
    /// Right-side row ids
    Ids(IdSet),
    /// Evaluate per outer row against the right namespace
    Deferred,
}

impl PreResult {
    pub fn mode_label(&self) -> &'static str {
        match self {
            PreResult::Values(_) => "values",
            PreResult::Ids(_) => "ids",
            PreResult::Deferred => "deferred",
        }
    }
}

/// One outer row's join outcome
#[derive(Debug, Default)]
pub struct JoinHit {
    pub found: bool,
    pub rows: Vec<RowId>,
}

/// Executes one join against its right namespace snapshot
#[derive(Debug)]
pub struct JoinedSelector {
    pub join_type: JoinType,
    pub right_ns: Arc<Namespace>,
    pub on: Vec<JoinOnEntry>,
    /// Resolved right-side filter (independent of on-conditions)
    right_filter: Vec<FilterNode>,
    pub pre_result: PreResult,
    limit: Option<usize>,
    pub called: usize,
    pub matched: usize,
}

fn invert_cond(cond: CondType) -> CondType {
    // `left cond right` becomes `right cond' substituted-left`
    match cond {
        CondType::Lt => CondType::Gt,
        CondType::Le => CondType::Ge,
        CondType::Gt => CondType::Lt,
        CondType::Ge => CondType::Le,
        other => other,
    }
}

impl JoinedSelector {
    /// Execute the right sub-query once and attach its pre-result
    pub fn build(
        db: &Database,
        strict: StrictMode,
        jq: &JoinQuery,
        ctx: &OpContext,
    ) -> Result<Self> {
        let handle = db.namespace(&jq.namespace).map_err(QueryError::Core)?;
        let ns = handle.read();

        let sub_query = crate::model::Query {
            namespace: jq.namespace.clone(),
            filter: jq.filter.clone(),
            sort: jq.sort.clone(),
            aggregations: Vec::new(),
            joins: Vec::new(),
            merge_queries: Vec::new(),
            select_filter: jq.select_filter.clone(),
            limit: None,
            offset: 0,
            req_total: Default::default(),
            explain: false,
            strict_mode: strict,
            with_rank: false,
        };
        let prepared = Preprocessor::new(&ns, strict, false).prepare(&sub_query)?;
        if prepared.ft_entry.is_some() {
            return Err(QueryError::invalid_query(
                "full-text predicates are not supported inside joins",
            ));
        }
        let ids = execute_filter_ids(&ns, &prepared.filter, ctx)?;

        let pre_result = if ids.len() <= VALUES_THRESHOLD {
            PreResult::Values(
                ids.iter()
                    .filter_map(|&id| ns.row(id).map(|r| (id, r.clone())))
                    .collect(),
            )
        } else if ids.len() <= IDSET_THRESHOLD {
            PreResult::Ids(IdSet::from_sorted(ids))
        } else {
            PreResult::Deferred
        };
        debug!(
            ns = %jq.namespace,
            mode = pre_result.mode_label(),
            "join pre-result built"
        );

        Ok(Self {
            join_type: jq.join_type,
            right_ns: ns,
            on: jq.on.clone(),
            right_filter: prepared.filter,
            pre_result,
            limit: jq.limit,
            called: 0,
            matched: 0,
        })
    }

    /// Resolved values of a right-side field for one right row
    fn right_values(&self, row: &PayloadRow, field: &str) -> Vec<Value> {
        let mut fr = FieldRef::named(field);
        if let Some(ix) = self.right_ns.index_no(field) {
            fr.index_no = Some(ix);
            let def = self.right_ns.indexes()[ix].def();
            if !def.is_composite() {
                fr.field = def.fields.first().copied();
            }
            fr.collate = def.collate;
        } else if let Some(f) = self.right_ns.payload_type().field_id(field) {
            fr.field = Some(f);
        }
        field_values(&self.right_ns, row, &fr)
    }

    /// Check every on-entry for one right row against substituted left
    /// values, folding And/Or like a filter level
    fn on_entries_match(&self, row: &PayloadRow, subs: &[Option<Vec<Value>>]) -> bool {
        let mut acc: Option<bool> = None;
        for (on, left_vals) in self.on.iter().zip(subs) {
            let m = match left_vals {
                // missing left value: the entry is always-false
                None => false,
                Some(left_vals) => {
                    let right = self.right_values(row, &on.right_field);
                    let refs: Vec<&Value> = right.iter().collect();
                    match_values(
                        invert_cond(on.cond),
                        &refs,
                        left_vals,
                        tern_db_core::CollateMode::None,
                    )
                }
            };
            acc = Some(match on.op {
                OpType::And => acc.unwrap_or(true) && m,
                OpType::Or => acc.unwrap_or(false) || m,
                OpType::Not => acc.unwrap_or(true) && !m,
            });
        }
        acc.unwrap_or(true)
    }

    /// Evaluate the join for one outer row.
    ///
    /// `want_match` false means the caller only needs counters updated (the
    /// enclosing conjunction already failed); matched rows are not recorded.
    pub fn process(
        &mut self,
        outer_ns: &Namespace,
        outer_row: &PayloadRow,
        left_fields: &[FieldRef],
        want_match: bool,
    ) -> Result<JoinHit> {
        self.called += 1;
        let limit = if want_match {
            self.limit.unwrap_or(usize::MAX)
        } else {
            1
        };

        // substitute join-on left values from the outer payload
        let mut subs: Vec<Option<Vec<Value>>> = Vec::with_capacity(self.on.len());
        for fr in left_fields {
            let vals = field_values(outer_ns, outer_row, fr);
            subs.push(if vals.is_empty() { None } else { Some(vals) });
        }

        let mut hit = JoinHit::default();
        match &self.pre_result {
            PreResult::Values(rows) => {
                for (id, row) in rows {
                    if self.on_entries_match(row, &subs) {
                        hit.found = true;
                        hit.rows.push(*id);
                        if hit.rows.len() >= limit {
                            break;
                        }
                    }
                }
            }
            PreResult::Ids(ids) => {
                for id in ids.iter() {
                    let Some(row) = self.right_ns.row(id) else {
                        continue;
                    };
                    if self.on_entries_match(row, &subs) {
                        hit.found = true;
                        hit.rows.push(id);
                        if hit.rows.len() >= limit {
                            break;
                        }
                    }
                }
            }
            PreResult::Deferred => {
                let candidates = self.deferred_candidates(&subs);
                let mut checked = |id: RowId| -> Result<bool> {
                    let Some(row) = self.right_ns.row(id) else {
                        return Ok(false);
                    };
                    if !self.on_entries_match(row, &subs) {
                        return Ok(false);
                    }
                    eval_filter(&self.right_ns, row, id, &self.right_filter, &mut |_, _, _| {
                        Ok(false)
                    })
                };
                for id in candidates {
                    if checked(id)? {
                        hit.found = true;
                        hit.rows.push(id);
                        if hit.rows.len() >= limit {
                            break;
                        }
                    }
                }
            }
        }

        if hit.found {
            self.matched += 1;
        }
        Ok(hit)
    }

    /// Candidate right rows for deferred mode: probe the right index of the
    /// first conjunctive equality on-entry, falling back to a namespace scan
    fn deferred_candidates(&self, subs: &[Option<Vec<Value>>]) -> Vec<RowId> {
        for (on, left_vals) in self.on.iter().zip(subs) {
            if on.op != OpType::And || !matches!(on.cond, CondType::Eq | CondType::Set) {
                continue;
            }
            let Some(left_vals) = left_vals else {
                // conjunctive entry with no left value: nothing can match
                return Vec::new();
            };
            let Some(idx) = self.right_ns.index(&on.right_field) else {
                continue;
            };
            if idx.is_sparse() || idx.is_fulltext() || idx.def().is_composite() {
                continue;
            }
            let mut out: Vec<RowId> = left_vals
                .iter()
                .filter_map(|v| idx.get(v))
                .flat_map(|set| set.iter().collect::<Vec<_>>())
                .collect();
            out.sort_unstable();
            out.dedup();
            return out;
        }
        self.right_ns.ids().collect()
    }

    /// Distinct values of a right-side join key across the pre-result;
    /// feeds condition injection into the outer query
    pub fn distinct_right_values(&self, right_field: &str) -> Result<Vec<Value>> {
        let mut set: BTreeSet<Value> = BTreeSet::new();
        match &self.pre_result {
            PreResult::Values(rows) => {
                for (_, row) in rows {
                    set.extend(self.right_values(row, right_field));
                }
            }
            PreResult::Ids(ids) => {
                for id in ids.iter() {
                    if let Some(row) = self.right_ns.row(id) {
                        set.extend(self.right_values(row, right_field));
                    }
                }
            }
            PreResult::Deferred => {
                return Err(QueryError::Internal(
                    "distinct values requested from a deferred pre-result".into(),
                ))
            }
        }
        Ok(set.into_iter().collect())
    }

    /// Resolve the left side of every on-entry against the outer namespace
    pub fn resolve_left_fields(&self, outer_ns: &Namespace) -> Vec<FieldRef> {
        self.on
            .iter()
            .map(|on| {
                let mut fr = FieldRef::named(on.left_field.clone());
                if let Some(ix) = outer_ns.index_no(&on.left_field) {
                    fr.index_no = Some(ix);
                    let def = outer_ns.indexes()[ix].def();
                    if !def.is_composite() {
                        fr.field = def.fields.first().copied();
                    }
                    fr.collate = def.collate;
                } else if let Some(f) = outer_ns.payload_type().field_id(&on.left_field) {
                    fr.field = Some(f);
                }
                fr
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JoinQuery;
    use serde_json::json;
    use tern_db_core::{IndexDef, IndexKind, PayloadField, ValueType};

    fn setup() -> Database {
        let db = Database::in_memory();
        let books = db.create_namespace("books").unwrap();
        books
            .write(|ns| {
                ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
                ns.add_field(PayloadField::new("author_id", ValueType::String))?;
                let id = ns.payload_type().field_id("id").unwrap();
                let author = ns.payload_type().field_id("author_id").unwrap();
                ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
                ns.add_index(IndexDef::new("author_id", IndexKind::Hash, vec![author]))?;
                for (id, a) in [(1, "A"), (2, "A"), (3, "B"), (4, "A")] {
                    ns.upsert(&json!({"id": id, "author_id": a}))?;
                }
                Ok(())
            })
            .unwrap();
        let authors = db.create_namespace("authors").unwrap();
        authors
            .write(|ns| {
                ns.add_field(PayloadField::new("id", ValueType::String).pk())?;
                ns.add_field(PayloadField::new("country", ValueType::String))?;
                let id = ns.payload_type().field_id("id").unwrap();
                let country = ns.payload_type().field_id("country").unwrap();
                ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
                ns.add_index(IndexDef::new("country", IndexKind::Hash, vec![country]))?;
                ns.upsert(&json!({"id": "A", "country": "US"}))?;
                ns.upsert(&json!({"id": "B", "country": "DE"}))?;
                Ok(())
            })
            .unwrap();
        db
    }

    fn us_authors_join() -> JoinQuery {
        JoinQuery::new(JoinType::Inner, "authors")
            .where_cond("country", CondType::Eq, vec![Value::String("US".into())])
            .on("author_id", CondType::Eq, "id")
    }

    #[test]
    fn pre_result_is_values_for_small_right() {
        let db = setup();
        let js =
            JoinedSelector::build(&db, StrictMode::None, &us_authors_join(), &OpContext::new())
                .unwrap();
        assert!(matches!(js.pre_result, PreResult::Values(ref v) if v.len() == 1));
    }

    #[test]
    fn process_matches_on_condition() {
        let db = setup();
        let mut js =
            JoinedSelector::build(&db, StrictMode::None, &us_authors_join(), &OpContext::new())
                .unwrap();
        let books = db.namespace("books").unwrap().read();
        let left = js.resolve_left_fields(&books);

        // book 1 (author A, US) matches
        let hit = js
            .process(&books, books.row(0).unwrap(), &left, true)
            .unwrap();
        assert!(hit.found);
        assert_eq!(hit.rows.len(), 1);

        // book 3 (author B, DE) does not
        let hit = js
            .process(&books, books.row(2).unwrap(), &left, true)
            .unwrap();
        assert!(!hit.found);
        assert_eq!(js.called, 2);
        assert_eq!(js.matched, 1);
    }

    #[test]
    fn distinct_right_values_for_injection() {
        let db = setup();
        let js =
            JoinedSelector::build(&db, StrictMode::None, &us_authors_join(), &OpContext::new())
                .unwrap();
        let vals = js.distinct_right_values("id").unwrap();
        assert_eq!(vals, vec![Value::String("A".into())]);
    }

    #[test]
    fn missing_left_value_is_always_false() {
        let db = setup();
        let mut js =
            JoinedSelector::build(&db, StrictMode::None, &us_authors_join(), &OpContext::new())
                .unwrap();
        let books = db.namespace("books").unwrap().read();
        // a fabricated row with no author_id
        let empty_row = books.payload_type().new_row();
        let left = js.resolve_left_fields(&books);
        let hit = js.process(&books, &empty_row, &left, true).unwrap();
        assert!(!hit.found);
    }
}
