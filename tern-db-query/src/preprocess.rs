//! Query preprocessor
//!
//! Rewrites the parsed filter tree into the reduced, typed form the selector
//! executes. Steps run in order and each is idempotent:
//!
//! 1. resolve field names against the namespace
//! 2. strict-mode checks
//! 3. literal coercion to field types
//! 4. merge compatible entries inside conjunctive runs (never across `Or`)
//! 5. substitute composite indexes
//! 6. inject predicates derived from inner joins (see
//!    [`inject_join_conditions`], which runs after join preselect)
//! 7. remove redundant brackets and fold always-true/false algebra
//! 8. extract the full-text predicate
//! 9. stage forced-sort rewrites
//!
//! Plus: pick an ordered index for driver ordering when the query itself
//! does not ask for a sort.

use crate::comparator::values_equal;
use crate::error::{QueryError, Result};
use crate::join::{JoinedSelector, PreResult, MAX_ITERATIONS_SCALE_FOR_INNER_JOIN_OPT};
use crate::model::{
    CondEntry, FieldRef, FilterNode, JoinType, OpType, Query, SortEntry, StrictMode,
};
use tern_db_core::{CollateMode, CondType, IndexKind, Namespace, Value};
use tracing::debug;

/// Forced-sort staging: rows keyed by these values come first, in order
#[derive(Debug, Clone)]
pub struct ForcedSort {
    pub field: String,
    pub values: Vec<Value>,
    pub desc: bool,
}

/// Preprocessor output
#[derive(Debug, Clone, Default)]
pub struct Prepared {
    pub filter: Vec<FilterNode>,
    /// Extracted full-text predicate; the full-text selector drives when set
    pub ft_entry: Option<CondEntry>,
    pub sort: Vec<SortEntry>,
    pub forced_sort: Option<ForcedSort>,
    /// Ordered index chosen for driver ordering when the query has no sort
    pub optimized_sort_index: Option<String>,
    pub explain_notes: Vec<String>,
}

pub struct Preprocessor<'a> {
    ns: &'a Namespace,
    strict: StrictMode,
    explain: bool,
    notes: Vec<String>,
}

enum MergeOutcome {
    Merged(CondEntry),
    Annihilated,
    NotMerged,
}

impl<'a> Preprocessor<'a> {
    pub fn new(ns: &'a Namespace, strict: StrictMode, explain: bool) -> Self {
        Self {
            ns,
            strict,
            explain,
            notes: Vec::new(),
        }
    }

    fn note(&mut self, msg: impl Into<String>) {
        if self.explain {
            self.notes.push(msg.into());
        }
    }

    /// Run the full pipeline over a query's filter and sort
    pub fn prepare(mut self, query: &Query) -> Result<Prepared> {
        let mut nodes = query.filter.clone();
        self.resolve_nodes(&mut nodes)?;
        self.normalize_scalar_allset(&mut nodes)?;
        self.merge_nodes(&mut nodes);
        self.substitute_composites(&mut nodes);
        remove_brackets(&mut nodes);
        reduce_always(&mut nodes);
        let ft_entry = self.extract_fulltext(&mut nodes)?;

        let mut sort = query.sort.clone();
        let mut forced_sort = None;
        if let Some(first) = sort.first_mut() {
            self.check_sort_field(&first.field)?;
            if !first.forced_values.is_empty() {
                let values = self.coerce_sort_values(&first.field, &first.forced_values)?;
                forced_sort = Some(ForcedSort {
                    field: first.field.clone(),
                    values,
                    desc: first.desc,
                });
                self.note(format!("forced sort on '{}' staged", first.field));
            }
        }
        for entry in sort.iter().skip(1) {
            self.check_sort_field(&entry.field)?;
        }

        let optimized_sort_index = if sort.is_empty() && ft_entry.is_none() {
            self.detect_sort_index(&nodes)
        } else {
            None
        };

        Ok(Prepared {
            filter: nodes,
            ft_entry,
            sort,
            forced_sort,
            optimized_sort_index,
            explain_notes: self.notes,
        })
    }

    // ---- step 1-3: resolution, strict mode, coercion -----------------------

    fn resolve_nodes(&mut self, nodes: &mut [FilterNode]) -> Result<()> {
        for node in nodes {
            match node {
                FilterNode::Cond { entry, .. } => {
                    self.resolve_field(&mut entry.field)?;
                    self.convert_values(entry)?;
                }
                FilterNode::TwoField { entry, .. } => {
                    self.resolve_field(&mut entry.left)?;
                    self.resolve_field(&mut entry.right)?;
                }
                FilterNode::Bracket { children, .. } => self.resolve_nodes(children)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn resolve_field(&self, fr: &mut FieldRef) -> Result<()> {
        if let Some(ix) = self.ns.index_no(&fr.name) {
            fr.index_no = Some(ix);
            let def = self.ns.indexes()[ix].def();
            fr.collate = def.collate;
            if !def.is_composite() {
                fr.field = def.fields.first().copied();
            }
            fr.json_path = def.json_path.clone();
            return Ok(());
        }
        if let Some(f) = self.ns.payload_type().field_id(&fr.name) {
            if self.strict == StrictMode::Indexes {
                return Err(QueryError::strict_mode(format!(
                    "field '{}' is not indexed in '{}' (strict mode: indexes)",
                    fr.name,
                    self.ns.name()
                )));
            }
            fr.field = Some(f);
            return Ok(());
        }
        match self.strict {
            StrictMode::Names => Err(QueryError::strict_mode(format!(
                "unknown field '{}' in '{}' (strict mode: names)",
                fr.name,
                self.ns.name()
            ))),
            StrictMode::Indexes => Err(QueryError::strict_mode(format!(
                "unknown index '{}' in '{}' (strict mode: indexes)",
                fr.name,
                self.ns.name()
            ))),
            StrictMode::None => {
                fr.json_path = Some(fr.name.clone());
                Ok(())
            }
        }
    }

    fn convert_values(&self, entry: &mut CondEntry) -> Result<()> {
        match entry.cond {
            CondType::Any | CondType::Empty => {
                if !entry.values.is_empty() {
                    return Err(QueryError::invalid_query(format!(
                        "{} on '{}' takes no values",
                        entry.cond, entry.field.name
                    )));
                }
                return Ok(());
            }
            CondType::Range => {
                if entry.values.len() != 2 {
                    return Err(QueryError::invalid_query(format!(
                        "range on '{}' requires two values",
                        entry.field.name
                    )));
                }
            }
            CondType::Eq | CondType::Lt | CondType::Le | CondType::Gt | CondType::Ge => {
                if entry.values.is_empty() {
                    return Err(QueryError::invalid_query(format!(
                        "{} on '{}' requires a value",
                        entry.cond, entry.field.name
                    )));
                }
            }
            _ => {}
        }
        // coerce to the declared type for fixed fields; dwithin keeps its
        // point/radius tuple shape
        if entry.cond == CondType::DWithin {
            return Ok(());
        }
        if let Some(f) = entry.field.field {
            let target = self.ns.payload_type().field(f)?.value_type;
            for v in &mut entry.values {
                let taken = std::mem::replace(v, Value::Null);
                *v = taken.coerce(target)?;
            }
        }
        Ok(())
    }

    // ---- step 4 prep: AllSet on scalars degenerates ------------------------

    fn normalize_scalar_allset(&mut self, nodes: &mut [FilterNode]) -> Result<()> {
        for node in nodes {
            match node {
                FilterNode::Cond { op, entry } if entry.cond == CondType::AllSet => {
                    let is_array = entry
                        .field
                        .field
                        .and_then(|f| self.ns.payload_type().field(f).ok())
                        .map(|d| d.is_array)
                        .unwrap_or(true);
                    if is_array {
                        continue;
                    }
                    let mut distinct: Vec<Value> = Vec::new();
                    for v in &entry.values {
                        if !distinct.iter().any(|d| values_equal(d, v, entry.field.collate)) {
                            distinct.push(v.clone());
                        }
                    }
                    *node = match distinct.len() {
                        0 => FilterNode::AlwaysTrue { op: *op },
                        1 => FilterNode::Cond {
                            op: *op,
                            entry: CondEntry {
                                field: entry.field.clone(),
                                cond: CondType::Eq,
                                values: distinct,
                            },
                        },
                        // a scalar can never equal two distinct values
                        _ => FilterNode::AlwaysFalse { op: *op },
                    };
                }
                FilterNode::Bracket { children, .. } => self.normalize_scalar_allset(children)?,
                _ => {}
            }
        }
        Ok(())
    }

    // ---- step 4: merge queryable entries -----------------------------------

    fn merge_nodes(&mut self, nodes: &mut Vec<FilterNode>) {
        for node in nodes.iter_mut() {
            if let FilterNode::Bracket { children, .. } = node {
                self.merge_nodes(children);
            }
        }
        // merge within conjunctive runs only; an Or or Not boundary resets
        let mut changed = true;
        while changed {
            changed = false;
            let mut i = 0;
            'outer: while i < nodes.len() {
                if !matches!(nodes[i], FilterNode::Cond { op: OpType::And, .. }) {
                    i += 1;
                    continue;
                }
                let mut j = i + 1;
                while j < nodes.len() {
                    match nodes[j].op() {
                        OpType::And => {}
                        _ => break,
                    }
                    let mergeable = match (&nodes[i], &nodes[j]) {
                        (
                            FilterNode::Cond { entry: a, .. },
                            FilterNode::Cond { entry: b, .. },
                        ) => a.field.same_field(&b.field) && a.field.collate == b.field.collate,
                        _ => false,
                    };
                    if mergeable {
                        let (FilterNode::Cond { entry: a, .. }, FilterNode::Cond { entry: b, .. }) =
                            (&nodes[i], &nodes[j])
                        else {
                            unreachable!()
                        };
                        match merge_entries(a, b) {
                            MergeOutcome::Merged(merged) => {
                                self.note(format!(
                                    "merged entries on '{}'",
                                    merged.field.name
                                ));
                                nodes[i] = FilterNode::Cond {
                                    op: OpType::And,
                                    entry: merged,
                                };
                                nodes.remove(j);
                                changed = true;
                                continue 'outer;
                            }
                            MergeOutcome::Annihilated => {
                                let field = match &nodes[i] {
                                    FilterNode::Cond { entry, .. } => entry.field.name.clone(),
                                    _ => String::new(),
                                };
                                self.note(format!("entries on '{}' annihilated", field));
                                nodes[i] = FilterNode::AlwaysFalse { op: OpType::And };
                                nodes.remove(j);
                                changed = true;
                                continue 'outer;
                            }
                            MergeOutcome::NotMerged => {}
                        }
                    }
                    j += 1;
                }
                i += 1;
            }
        }
    }

    // ---- step 5: composite index substitution ------------------------------

    fn substitute_composites(&mut self, nodes: &mut Vec<FilterNode>) {
        for node in nodes.iter_mut() {
            if let FilterNode::Bracket { children, .. } = node {
                self.substitute_composites(children);
            }
        }
        let composites: Vec<(usize, String, Vec<tern_db_core::FieldId>)> = self
            .ns
            .indexes()
            .iter()
            .enumerate()
            .filter(|(_, idx)| idx.def().is_composite() && idx.kind() != IndexKind::FullText)
            .map(|(ix, idx)| (ix, idx.name().to_string(), idx.def().fields.clone()))
            .collect();
        for (ix, name, fields) in composites {
            // every component field must have an Eq entry in the same
            // conjunctive run
            let mut positions = Vec::new();
            for &f in &fields {
                let found = nodes.iter().position(|n| {
                    matches!(
                        n,
                        FilterNode::Cond { op: OpType::And, entry }
                            if entry.cond == CondType::Eq
                                && entry.field.field == Some(f)
                                && entry.field.index_no.map(|i| !self.ns.indexes()[i].def().is_composite()).unwrap_or(true)
                                && entry.values.len() == 1
                    )
                });
                match found {
                    Some(p) => positions.push(p),
                    None => {
                        positions.clear();
                        break;
                    }
                }
            }
            if positions.is_empty() {
                continue;
            }
            // conjunctive-run check: no Or between the first involved entry
            // and the last
            let lo = *positions.iter().min().expect("non-empty");
            let hi = *positions.iter().max().expect("non-empty");
            if nodes[lo..=hi].iter().any(|n| n.op() == OpType::Or) {
                continue;
            }
            let mut parts = Vec::with_capacity(fields.len());
            for (&f, &p) in fields.iter().zip(&positions) {
                let FilterNode::Cond { entry, .. } = &nodes[p] else {
                    continue;
                };
                debug_assert_eq!(entry.field.field, Some(f));
                parts.push(entry.values[0].clone());
            }
            let mut sorted = positions.clone();
            sorted.sort_unstable();
            for &p in sorted.iter().rev() {
                nodes.remove(p);
            }
            let fr = FieldRef {
                name: name.clone(),
                index_no: Some(ix),
                field: None,
                json_path: None,
                collate: CollateMode::None,
            };
            nodes.insert(
                lo,
                FilterNode::Cond {
                    op: OpType::And,
                    entry: CondEntry {
                        field: fr,
                        cond: CondType::Eq,
                        values: vec![Value::Composite(parts)],
                    },
                },
            );
            self.note(format!("substituted composite index '{}'", name));
        }
    }

    // ---- step 8: full-text extraction ---------------------------------------

    fn extract_fulltext(&mut self, nodes: &mut Vec<FilterNode>) -> Result<Option<CondEntry>> {
        // full-text inside brackets is rejected outright
        for node in nodes.iter() {
            if let FilterNode::Bracket { children, .. } = node {
                if self.contains_fulltext(children) {
                    return Err(QueryError::invalid_query(
                        "full-text predicate must be a top-level conjunct",
                    ));
                }
            }
        }
        let mut found: Option<usize> = None;
        for (i, node) in nodes.iter().enumerate() {
            let FilterNode::Cond { op, entry } = node else {
                continue;
            };
            let is_ft = entry
                .field
                .index_no
                .map(|ix| self.ns.indexes()[ix].is_fulltext())
                .unwrap_or(false);
            if !is_ft {
                continue;
            }
            match op {
                OpType::Not => {
                    // the semantics of a negated full-text driver are
                    // unspecified; refuse rather than guess
                    return Err(QueryError::invalid_query(
                        "full-text predicate cannot be negated",
                    ));
                }
                OpType::Or => {
                    return Err(QueryError::invalid_query(
                        "full-text predicate must be a conjunct",
                    ));
                }
                OpType::And => {}
            }
            if found.is_some() {
                return Err(QueryError::invalid_query(
                    "only one full-text predicate is allowed per query",
                ));
            }
            found = Some(i);
        }
        Ok(found.map(|i| {
            let FilterNode::Cond { entry, .. } = nodes.remove(i) else {
                unreachable!()
            };
            self.note(format!("full-text driver on '{}'", entry.field.name));
            entry
        }))
    }

    fn contains_fulltext(&self, nodes: &[FilterNode]) -> bool {
        nodes.iter().any(|n| match n {
            FilterNode::Cond { entry, .. } => entry
                .field
                .index_no
                .map(|ix| self.ns.indexes()[ix].is_fulltext())
                .unwrap_or(false),
            FilterNode::Bracket { children, .. } => self.contains_fulltext(children),
            _ => false,
        })
    }

    // ---- sort helpers -------------------------------------------------------

    fn check_sort_field(&self, field: &str) -> Result<()> {
        if self.ns.index_no(field).is_some()
            || self.ns.payload_type().field_id(field).is_some()
        {
            return Ok(());
        }
        match self.strict {
            StrictMode::None => Ok(()),
            _ => Err(QueryError::strict_mode(format!(
                "unknown sort field '{}' in '{}'",
                field,
                self.ns.name()
            ))),
        }
    }

    fn coerce_sort_values(&self, field: &str, values: &[Value]) -> Result<Vec<Value>> {
        let target = self
            .ns
            .index(field)
            .and_then(|idx| idx.def().fields.first().copied())
            .or_else(|| self.ns.payload_type().field_id(field))
            .and_then(|f| self.ns.payload_type().field(f).ok())
            .map(|d| d.value_type);
        match target {
            Some(t) => values
                .iter()
                .cloned()
                .map(|v| v.coerce(t).map_err(QueryError::Core))
                .collect(),
            None => Ok(values.to_vec()),
        }
    }

    /// Choose an ordered index referenced by the filter to drive iteration
    /// order; the biggest candidate wins, mirroring the selectivity
    /// heuristic of the original planner.
    fn detect_sort_index(&self, nodes: &[FilterNode]) -> Option<String> {
        let mut best: Option<(usize, String)> = None;
        for node in nodes {
            let FilterNode::Cond { op: OpType::And, entry } = node else {
                continue;
            };
            let Some(ix) = entry.field.index_no else {
                continue;
            };
            let idx = &self.ns.indexes()[ix];
            if !idx.is_ordered() {
                continue;
            }
            let fit = matches!(
                entry.cond,
                CondType::Lt | CondType::Le | CondType::Gt | CondType::Ge | CondType::Range
            );
            if !fit {
                continue;
            }
            let size = idx.size();
            if best.as_ref().map(|(s, _)| size > *s).unwrap_or(true) {
                best = Some((size, idx.name().to_string()));
            }
        }
        best.map(|(_, name)| name)
    }
}

// ---- step 4 merge table ----------------------------------------------------

fn cmp_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    a.cmp(b)
}

fn intersect_values(a: &[Value], b: &[Value], collate: CollateMode) -> Vec<Value> {
    a.iter()
        .filter(|v| b.iter().any(|w| values_equal(v, w, collate)))
        .cloned()
        .collect()
}

fn union_values(a: &[Value], b: &[Value], collate: CollateMode) -> Vec<Value> {
    let mut out = a.to_vec();
    for v in b {
        if !out.iter().any(|w| values_equal(v, w, collate)) {
            out.push(v.clone());
        }
    }
    out
}

fn filter_by_predicate(
    values: &[Value],
    cond: CondType,
    bounds: &[Value],
    collate: CollateMode,
) -> Vec<Value> {
    values
        .iter()
        .filter(|v| {
            let refs = [*v];
            tern_db_core::match_values(cond, &refs, bounds, collate)
        })
        .cloned()
        .collect()
}

fn set_result(field: FieldRef, values: Vec<Value>) -> MergeOutcome {
    match values.len() {
        0 => MergeOutcome::Annihilated,
        1 => MergeOutcome::Merged(CondEntry {
            field,
            cond: CondType::Eq,
            values,
        }),
        _ => MergeOutcome::Merged(CondEntry {
            field,
            cond: CondType::Set,
            values,
        }),
    }
}

/// Merge two conjunctive entries on the same field, following the planner's
/// algebra. Conservative: anything not provably mergeable stays as-is.
fn merge_entries(a: &CondEntry, b: &CondEntry) -> MergeOutcome {
    use CondType::*;
    let field = a.field.clone();
    let collate = a.field.collate;
    let entry = |cond: CondType, values: Vec<Value>| {
        MergeOutcome::Merged(CondEntry {
            field: field.clone(),
            cond,
            values,
        })
    };

    match (a.cond, b.cond) {
        // Any{} = "field present": absorbed by any positive condition
        (Any, Empty) | (Empty, Any) => MergeOutcome::Annihilated,
        (Any, _) => entry(b.cond, b.values.clone()),
        (_, Any) => entry(a.cond, a.values.clone()),
        (Empty, Empty) => entry(Empty, Vec::new()),

        (Eq | Set, Eq | Set) => {
            set_result(field.clone(), intersect_values(&a.values, &b.values, collate))
        }
        (AllSet, AllSet) => entry(AllSet, union_values(&a.values, &b.values, collate)),

        (Lt, Lt) | (Le, Le) => {
            let (x, y) = (&a.values[0], &b.values[0]);
            let min = if cmp_values(x, y).is_le() { x } else { y };
            entry(a.cond, vec![min.clone()])
        }
        (Lt, Le) | (Le, Lt) => {
            let (lt, le) = if a.cond == Lt {
                (&a.values[0], &b.values[0])
            } else {
                (&b.values[0], &a.values[0])
            };
            if cmp_values(lt, le).is_le() {
                entry(Lt, vec![lt.clone()])
            } else {
                entry(Le, vec![le.clone()])
            }
        }
        (Gt, Gt) | (Ge, Ge) => {
            let (x, y) = (&a.values[0], &b.values[0]);
            let max = if cmp_values(x, y).is_ge() { x } else { y };
            entry(a.cond, vec![max.clone()])
        }
        (Gt, Ge) | (Ge, Gt) => {
            let (gt, ge) = if a.cond == Gt {
                (&a.values[0], &b.values[0])
            } else {
                (&b.values[0], &a.values[0])
            };
            if cmp_values(gt, ge).is_ge() {
                entry(Gt, vec![gt.clone()])
            } else {
                entry(Ge, vec![ge.clone()])
            }
        }
        (Ge, Le) | (Le, Ge) => {
            let (lo, hi) = if a.cond == Ge {
                (&a.values[0], &b.values[0])
            } else {
                (&b.values[0], &a.values[0])
            };
            if cmp_values(lo, hi).is_le() {
                entry(Range, vec![lo.clone(), hi.clone()])
            } else {
                MergeOutcome::Annihilated
            }
        }
        (Range, Range) => {
            let lo = if cmp_values(&a.values[0], &b.values[0]).is_ge() {
                a.values[0].clone()
            } else {
                b.values[0].clone()
            };
            let hi = if cmp_values(&a.values[1], &b.values[1]).is_le() {
                a.values[1].clone()
            } else {
                b.values[1].clone()
            };
            if cmp_values(&lo, &hi).is_le() {
                entry(Range, vec![lo, hi])
            } else {
                MergeOutcome::Annihilated
            }
        }
        (Range, Ge) | (Ge, Range) => {
            let (range, bound) = if a.cond == Range { (a, b) } else { (b, a) };
            let lo = if cmp_values(&range.values[0], &bound.values[0]).is_ge() {
                range.values[0].clone()
            } else {
                bound.values[0].clone()
            };
            if cmp_values(&lo, &range.values[1]).is_le() {
                entry(Range, vec![lo, range.values[1].clone()])
            } else {
                MergeOutcome::Annihilated
            }
        }
        (Range, Le) | (Le, Range) => {
            let (range, bound) = if a.cond == Range { (a, b) } else { (b, a) };
            let hi = if cmp_values(&range.values[1], &bound.values[0]).is_le() {
                range.values[1].clone()
            } else {
                bound.values[0].clone()
            };
            if cmp_values(&range.values[0], &hi).is_le() {
                entry(Range, vec![range.values[0].clone(), hi])
            } else {
                MergeOutcome::Annihilated
            }
        }
        (Eq | Set, Lt | Le | Gt | Ge | Range) => set_result(
            field.clone(),
            filter_by_predicate(&a.values, b.cond, &b.values, collate),
        ),
        (Lt | Le | Gt | Ge | Range, Eq | Set) => set_result(
            field.clone(),
            filter_by_predicate(&b.values, a.cond, &a.values, collate),
        ),
        _ => MergeOutcome::NotMerged,
    }
}

// ---- step 7: bracket and constant folding -----------------------------------

fn contains_join(nodes: &[FilterNode]) -> bool {
    nodes.iter().any(|n| match n {
        FilterNode::Join { .. } => true,
        FilterNode::Bracket { children, .. } => contains_join(children),
        _ => false,
    })
}

/// Flatten structurally redundant brackets. Brackets around joins are
/// preserved.
pub fn remove_brackets(nodes: &mut Vec<FilterNode>) {
    for node in nodes.iter_mut() {
        if let FilterNode::Bracket { children, .. } = node {
            remove_brackets(children);
        }
    }
    let mut i = 0;
    while i < nodes.len() {
        let replace = match &nodes[i] {
            FilterNode::Bracket { op, children } if !contains_join(children) => {
                if children.len() == 1 {
                    let child = &children[0];
                    let combined = match (op, child.op()) {
                        (OpType::Not, OpType::Not) => Some(OpType::And),
                        (OpType::Not, _) => Some(OpType::Not),
                        (outer, OpType::Not) if *outer != OpType::Or => Some(OpType::Not),
                        (outer, _) => Some(*outer),
                    };
                    combined.map(|new_op| {
                        let mut c = child.clone();
                        c.set_op(new_op);
                        vec![c]
                    })
                } else if *op == OpType::And
                    && children
                        .iter()
                        .all(|c| c.op() != OpType::Or)
                {
                    Some(children.clone())
                } else {
                    None
                }
            }
            _ => None,
        };
        match replace {
            Some(mut replacement) => {
                debug!(count = replacement.len(), "bracket flattened");
                nodes.splice(i..=i, replacement.drain(..));
            }
            None => i += 1,
        }
    }
}

/// Fold always-true / always-false nodes with the usual identities
pub fn reduce_always(nodes: &mut Vec<FilterNode>) {
    for node in nodes.iter_mut() {
        if let FilterNode::Bracket { op, children } = node {
            reduce_always(children);
            if children.is_empty() {
                *node = FilterNode::AlwaysTrue { op: *op };
            } else if children.len() == 1 {
                match &children[0] {
                    FilterNode::AlwaysTrue { .. } if children[0].op() != OpType::Not => {
                        *node = FilterNode::AlwaysTrue { op: *op };
                    }
                    FilterNode::AlwaysFalse { .. } if children[0].op() != OpType::Not => {
                        *node = FilterNode::AlwaysFalse { op: *op };
                    }
                    _ => {}
                }
            }
        }
    }
    // Not over constants
    for node in nodes.iter_mut() {
        match node {
            FilterNode::AlwaysTrue { op: OpType::Not } => {
                *node = FilterNode::AlwaysFalse { op: OpType::And };
            }
            FilterNode::AlwaysFalse { op: OpType::Not } => {
                *node = FilterNode::AlwaysTrue { op: OpType::And };
            }
            _ => {}
        }
    }
    // true with And is the identity; false with Or is the identity
    let has_or = nodes.iter().any(|n| n.op() == OpType::Or);
    let mut i = 0;
    while i < nodes.len() {
        let removable = match &nodes[i] {
            FilterNode::AlwaysTrue { op: OpType::And } => nodes.len() > 1,
            FilterNode::AlwaysFalse { op: OpType::Or } => true,
            _ => false,
        };
        if removable {
            nodes.remove(i);
        } else {
            i += 1;
        }
    }
    // a conjunctive false annihilates the whole level when nothing can
    // revive it
    if !has_or
        && nodes
            .iter()
            .any(|n| matches!(n, FilterNode::AlwaysFalse { op: OpType::And }))
    {
        nodes.clear();
        nodes.push(FilterNode::AlwaysFalse { op: OpType::And });
    }
}

// ---- step 6: join-derived predicates ----------------------------------------

/// Inject `Set(left_field, distinct right values)` predicates for inner
/// joins whose materialized right side is small enough to convert the
/// nested-loop into two index scans.
pub fn inject_join_conditions(
    ns: &Namespace,
    nodes: &mut Vec<FilterNode>,
    joins: &[JoinedSelector],
    notes: &mut Vec<String>,
    explain: bool,
) -> Result<()> {
    // an appended conjunct would leak into the other branches of a
    // top-level disjunction
    if nodes.iter().any(|n| n.op() == OpType::Or) {
        return Ok(());
    }
    let outer_estimate = estimate_max_iterations(ns, nodes);
    let mut injected = Vec::new();
    for node in nodes.iter() {
        let FilterNode::Join {
            op: OpType::And,
            join_idx,
        } = node
        else {
            continue;
        };
        let js = &joins[*join_idx];
        if js.join_type != JoinType::Inner {
            continue;
        }
        let right_size = match &js.pre_result {
            PreResult::Values(rows) => rows.len(),
            PreResult::Ids(ids) => ids.len(),
            PreResult::Deferred => continue,
        };
        // the outer's best iterator already being much smaller makes the
        // injection pure overhead
        if right_size > outer_estimate.saturating_mul(MAX_ITERATIONS_SCALE_FOR_INNER_JOIN_OPT) {
            continue;
        }
        for on in &js.on {
            if on.op != OpType::And
                || !matches!(on.cond, CondType::Eq | CondType::Set)
            {
                continue;
            }
            let Some(ix) = ns.index_no(&on.left_field) else {
                continue;
            };
            let idx = &ns.indexes()[ix];
            if idx.is_fulltext() || idx.is_sparse() || idx.def().is_composite() {
                continue;
            }
            let values = js.distinct_right_values(&on.right_field)?;
            if values.is_empty() {
                continue;
            }
            if explain {
                notes.push(format!(
                    "injected {} values from join '{}' into '{}'",
                    values.len(),
                    js.right_ns.name(),
                    on.left_field
                ));
            }
            let fr = FieldRef {
                name: on.left_field.clone(),
                index_no: Some(ix),
                field: idx.def().fields.first().copied(),
                json_path: None,
                collate: idx.def().collate,
            };
            injected.push(FilterNode::Cond {
                op: OpType::And,
                entry: CondEntry {
                    field: fr,
                    cond: CondType::Set,
                    values,
                },
            });
        }
    }
    nodes.extend(injected);
    Ok(())
}

/// Rough upper bound on what the current filter can yield, from index
/// bucket sizes; full row count when nothing is indexed
pub fn estimate_max_iterations(ns: &Namespace, nodes: &[FilterNode]) -> usize {
    let total = ns.total_rows();
    let mut best = total;
    for node in nodes {
        let FilterNode::Cond { op: OpType::And, entry } = node else {
            continue;
        };
        let Some(ix) = entry.field.index_no else {
            continue;
        };
        let idx = &ns.indexes()[ix];
        if idx.is_fulltext() || idx.is_sparse() {
            continue;
        }
        if matches!(entry.cond, CondType::Eq | CondType::Set) {
            let size: usize = entry
                .values
                .iter()
                .filter_map(|v| idx.get(v).map(|s| s.len()))
                .sum();
            best = best.min(size);
        }
    }
    best.max(1)
}
