//! Row comparators
//!
//! Late filters for predicates that have no usable index iterator:
//! non-indexed fields (json-path into the tuple), sparse indexes, cross-field
//! compares, and conditions an index declined (`Like`, ranges on hash
//! indexes). Also hosts the tree evaluator shared by the selector, the
//! deferred join path, and tests that need a reference answer.

use crate::error::Result;
use crate::model::{CondEntry, FilterNode, OpType, TwoFieldEntry};
use tern_db_core::{match_values, CollateMode, ConditionSpec, Namespace, PayloadRow, Value};

/// Values of a referenced field for one row.
///
/// Resolved schema fields read through the payload type; everything else
/// decodes the tuple at the json path (the reference's name doubles as the
/// path for non-indexed fields).
pub fn field_values(ns: &Namespace, row: &PayloadRow, fr: &crate::model::FieldRef) -> Vec<Value> {
    if let Some(ix) = fr.index_no {
        let idx = &ns.indexes()[ix];
        if idx.def().is_composite() {
            return ns
                .payload_type()
                .composite_key(row, &idx.def().fields)
                .map(|v| vec![v])
                .unwrap_or_default();
        }
        if idx.is_sparse() {
            if let Some(path) = &idx.def().json_path {
                return ns.tuple_values(row, path);
            }
        }
    }
    if let Some(f) = fr.field {
        return ns
            .payload_type()
            .get(row, f)
            .map(|vs| vs.into_iter().cloned().collect())
            .unwrap_or_default();
    }
    let path = fr.json_path.as_deref().unwrap_or(&fr.name);
    ns.tuple_values(row, path)
}

/// Evaluate a leaf predicate against a row
pub fn matches_cond_entry(ns: &Namespace, row: &PayloadRow, entry: &CondEntry) -> bool {
    let values = field_values(ns, row, &entry.field);
    let refs: Vec<&Value> = values.iter().collect();
    match_values(entry.cond, &refs, &entry.values, entry.field.collate)
}

/// Evaluate a cross-field predicate against a row
pub fn matches_two_field(ns: &Namespace, row: &PayloadRow, entry: &TwoFieldEntry) -> bool {
    let left = field_values(ns, row, &entry.left);
    let right = field_values(ns, row, &entry.right);
    let refs: Vec<&Value> = left.iter().collect();
    match_values(entry.cond, &refs, &right, entry.left.collate)
}

/// Comparator built from an index's declined lookup
#[derive(Debug, Clone)]
pub struct FieldComparator {
    pub spec: ConditionSpec,
    /// Display name for explain output
    pub name: String,
}

impl FieldComparator {
    pub fn matches(&self, ns: &Namespace, row: &PayloadRow) -> bool {
        let values: Vec<Value> = if let Some(path) = &self.spec.json_path {
            ns.tuple_values(row, path)
        } else if self.spec.fields.len() > 1 {
            ns.payload_type()
                .composite_key(row, &self.spec.fields)
                .map(|v| vec![v])
                .unwrap_or_default()
        } else if let Some(&f) = self.spec.fields.first() {
            ns.payload_type()
                .get(row, f)
                .map(|vs| vs.into_iter().cloned().collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let refs: Vec<&Value> = values.iter().collect();
        match_values(self.spec.cond, &refs, &self.spec.values, self.spec.collate)
    }
}

/// Evaluate a filter tree against one row.
///
/// `join_eval` answers `Join` nodes: `(join_idx, want_match)` where
/// `want_match` is false when the running result already failed and the join
/// only needs its counters updated.
pub fn eval_filter(
    ns: &Namespace,
    row: &PayloadRow,
    row_id: tern_db_core::RowId,
    nodes: &[FilterNode],
    join_eval: &mut dyn FnMut(usize, tern_db_core::RowId, bool) -> Result<bool>,
) -> Result<bool> {
    let mut acc: Option<bool> = None;
    for node in nodes {
        let op = node.op();
        let want = match (op, acc) {
            (OpType::And | OpType::Not, Some(false)) => false,
            (OpType::Or, Some(true)) => false,
            _ => true,
        };
        let m = match node {
            FilterNode::Cond { entry, .. } => matches_cond_entry(ns, row, entry),
            FilterNode::TwoField { entry, .. } => matches_two_field(ns, row, entry),
            FilterNode::Bracket { children, .. } => {
                eval_filter(ns, row, row_id, children, join_eval)?
            }
            FilterNode::Join { join_idx, .. } => join_eval(*join_idx, row_id, want)?,
            FilterNode::AlwaysTrue { .. } => true,
            FilterNode::AlwaysFalse { .. } => false,
        };
        acc = Some(match op {
            OpType::And => acc.unwrap_or(true) && m,
            OpType::Or => acc.unwrap_or(false) || m,
            OpType::Not => acc.unwrap_or(true) && !m,
        });
    }
    Ok(acc.unwrap_or(true))
}

/// Collate-aware relaxed equality used when merging entry value sets
pub fn values_equal(a: &Value, b: &Value, collate: CollateMode) -> bool {
    match (a, b, collate) {
        (Value::String(x), Value::String(y), CollateMode::Ascii) => x.eq_ignore_ascii_case(y),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldRef;
    use serde_json::json;
    use tern_db_core::{CondType, IndexDef, IndexKind, PayloadField, ValueType};

    fn ns() -> Namespace {
        let mut ns = Namespace::new("books", 1);
        ns.add_field(PayloadField::new("id", ValueType::Int).pk()).unwrap();
        ns.add_field(PayloadField::new("pages", ValueType::Int)).unwrap();
        let id = ns.payload_type().field_id("id").unwrap();
        ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id])).unwrap();
        ns.upsert(&json!({"id": 1, "pages": 100, "meta": {"lang": "en"}}))
            .unwrap();
        ns
    }

    #[test]
    fn cond_entry_on_schema_field() {
        let ns = ns();
        let row = ns.row(0).unwrap();
        let mut fr = FieldRef::named("pages");
        fr.field = ns.payload_type().field_id("pages");
        let entry = CondEntry {
            field: fr,
            cond: CondType::Ge,
            values: vec![Value::Int(100)],
        };
        assert!(matches_cond_entry(&ns, row, &entry));
    }

    #[test]
    fn cond_entry_on_tuple_path() {
        let ns = ns();
        let row = ns.row(0).unwrap();
        let entry = CondEntry {
            field: FieldRef::named("meta.lang"),
            cond: CondType::Eq,
            values: vec![Value::String("en".into())],
        };
        assert!(matches_cond_entry(&ns, row, &entry));
    }

    #[test]
    fn eval_filter_fold_semantics() {
        let ns = ns();
        let row = ns.row(0).unwrap();
        let mut pages = FieldRef::named("pages");
        pages.field = ns.payload_type().field_id("pages");
        let nodes = vec![
            FilterNode::Cond {
                op: OpType::And,
                entry: CondEntry {
                    field: pages.clone(),
                    cond: CondType::Eq,
                    values: vec![Value::Int(100)],
                },
            },
            FilterNode::Cond {
                op: OpType::Not,
                entry: CondEntry {
                    field: pages,
                    cond: CondType::Gt,
                    values: vec![Value::Int(500)],
                },
            },
        ];
        let ok = eval_filter(&ns, row, 0, &nodes, &mut |_, _, _| Ok(false)).unwrap();
        assert!(ok);
    }
}
