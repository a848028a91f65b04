//! Selector iterators
//!
//! Typed iterators over the id-sets indexes hand out, plus comparator
//! fallbacks, composed into a container mirroring the filter tree. The
//! container picks the cheapest safe driver (smallest `max_iterations`) and
//! verifies the remaining nodes per candidate row — iterator nodes by
//! galloping `next_ge` checks when the driver is ascending, stateless binary
//! search otherwise; comparators as late filters.
//!
//! A pure disjunction of iterators collapses into one merged ordered union.

use crate::comparator::{matches_two_field, FieldComparator};
use crate::error::{QueryError, Result};
use crate::model::{CondEntry, FilterNode, OpType, TwoFieldEntry};
use tern_db_core::{
    ConditionSpec, IdSetRef, Namespace, PayloadRow, RowId, SelectKeyResult, SelectOpts,
};

/// Iterator over the union of sorted id-set snapshots
#[derive(Debug, Clone)]
pub struct SelectIterator {
    sets: Vec<IdSetRef>,
    cursors: Vec<usize>,
    /// Field or index name, for explain output
    pub name: String,
}

impl SelectIterator {
    pub fn new(sets: Vec<IdSetRef>, name: impl Into<String>) -> Self {
        let cursors = vec![0; sets.len()];
        Self {
            sets,
            cursors,
            name: name.into(),
        }
    }

    /// Upper bound on ids this iterator can yield
    pub fn max_iterations(&self) -> usize {
        self.sets.iter().map(|s| s.len()).sum()
    }

    /// Smallest id `>= from` across all sets, advancing internal cursors.
    /// Calls must be monotone in `from`.
    pub fn next_ge(&mut self, from: RowId) -> Option<RowId> {
        let mut best: Option<RowId> = None;
        for (i, set) in self.sets.iter().enumerate() {
            let slice = set.as_slice();
            let mut c = self.cursors[i];
            while c < slice.len() && slice[c] < from {
                // gallop: double the step while below target
                let mut step = 1;
                while c + step < slice.len() && slice[c + step] < from {
                    c += step;
                    step *= 2;
                }
                c += 1;
            }
            self.cursors[i] = c;
            if let Some(&id) = slice.get(c) {
                best = Some(best.map_or(id, |b| b.min(id)));
            }
        }
        best
    }

    /// Galloping membership check; `id` must be monotone across calls
    pub fn contains_ge(&mut self, id: RowId) -> bool {
        self.next_ge(id) == Some(id)
    }

    /// Stateless membership check
    pub fn contains(&self, id: RowId) -> bool {
        self.sets.iter().any(|s| s.contains(id))
    }

    /// All ids in ascending order (drives unordered walks)
    pub fn collect_ids(&self) -> Vec<RowId> {
        let mut out: Vec<RowId> = self.sets.iter().flat_map(|s| s.iter()).collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// One node of the executable filter
#[derive(Debug, Clone)]
pub enum SelectNode {
    Iter { op: OpType, it: SelectIterator },
    Cmp { op: OpType, cmp: FieldComparator },
    TwoField { op: OpType, entry: TwoFieldEntry },
    Group { op: OpType, nodes: Vec<SelectNode> },
    JoinRef { op: OpType, join_idx: usize },
    True { op: OpType },
    False { op: OpType },
}

impl SelectNode {
    pub fn op(&self) -> OpType {
        match self {
            SelectNode::Iter { op, .. }
            | SelectNode::Cmp { op, .. }
            | SelectNode::TwoField { op, .. }
            | SelectNode::Group { op, .. }
            | SelectNode::JoinRef { op, .. }
            | SelectNode::True { op }
            | SelectNode::False { op } => *op,
        }
    }
}

/// Executable filter: iterator/comparator tree
#[derive(Debug, Clone, Default)]
pub struct IteratorContainer {
    pub nodes: Vec<SelectNode>,
}

/// Build a comparator spec straight from an unindexed entry
fn entry_comparator(entry: &CondEntry) -> FieldComparator {
    let spec = ConditionSpec {
        fields: entry.field.field.into_iter().collect(),
        json_path: if entry.field.field.is_none() {
            Some(
                entry
                    .field
                    .json_path
                    .clone()
                    .unwrap_or_else(|| entry.field.name.clone()),
            )
        } else {
            entry.field.json_path.clone()
        },
        cond: entry.cond,
        values: entry.values.clone(),
        collate: entry.field.collate,
    };
    FieldComparator {
        spec,
        name: entry.field.name.clone(),
    }
}

impl IteratorContainer {
    /// Translate a preprocessed filter tree, performing index lookups
    pub fn build(ns: &Namespace, nodes: &[FilterNode], opts: &SelectOpts) -> Result<Self> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            out.push(Self::build_node(ns, node, opts)?);
        }
        Ok(Self { nodes: out })
    }

    fn build_node(ns: &Namespace, node: &FilterNode, opts: &SelectOpts) -> Result<SelectNode> {
        Ok(match node {
            FilterNode::AlwaysTrue { op } => SelectNode::True { op: *op },
            FilterNode::AlwaysFalse { op } => SelectNode::False { op: *op },
            FilterNode::Join { op, join_idx } => SelectNode::JoinRef {
                op: *op,
                join_idx: *join_idx,
            },
            FilterNode::TwoField { op, entry } => SelectNode::TwoField {
                op: *op,
                entry: entry.clone(),
            },
            FilterNode::Bracket { op, children } => {
                let mut nodes = Vec::with_capacity(children.len());
                for c in children {
                    nodes.push(Self::build_node(ns, c, opts)?);
                }
                SelectNode::Group { op: *op, nodes }
            }
            FilterNode::Cond { op, entry } => {
                let Some(ix) = entry.field.index_no else {
                    return Ok(SelectNode::Cmp {
                        op: *op,
                        cmp: entry_comparator(entry),
                    });
                };
                let index = &ns.indexes()[ix];
                if index.is_fulltext() {
                    return Err(QueryError::Internal(
                        "full-text entry survived preprocessing".into(),
                    ));
                }
                let results = index.select_key(&entry.values, entry.cond, opts)?;
                let mut nodes: Vec<SelectNode> = Vec::with_capacity(results.len());
                for (i, res) in results.into_iter().enumerate() {
                    let node_op = if i == 0 { *op } else { OpType::And };
                    nodes.push(match res {
                        SelectKeyResult::IdSets(sets) => SelectNode::Iter {
                            op: node_op,
                            it: SelectIterator::new(sets, index.name()),
                        },
                        SelectKeyResult::Comparator(spec) => SelectNode::Cmp {
                            op: node_op,
                            cmp: FieldComparator {
                                spec,
                                name: index.name().to_string(),
                            },
                        },
                    });
                }
                if nodes.len() == 1 {
                    nodes.pop().expect("just checked")
                } else {
                    SelectNode::Group { op: *op, nodes }
                }
            }
        })
    }

    /// An `And` iterator that can yield nothing annihilates the conjunction
    /// unless a later `Or` node can revive it
    pub fn is_provably_empty(&self) -> bool {
        for (i, node) in self.nodes.iter().enumerate() {
            let empty_and = matches!(
                node,
                SelectNode::Iter { op: OpType::And, it } if it.max_iterations() == 0
            ) || matches!(node, SelectNode::False { op: OpType::And });
            if empty_and
                && !self.nodes[i + 1..]
                    .iter()
                    .any(|n| n.op() == OpType::Or)
            {
                return true;
            }
        }
        false
    }

    /// Pick the top-level node to drive iteration: the cheapest `And`
    /// iterator not followed by an `Or` (which could select rows outside
    /// it). Returns the node index.
    pub fn cheapest_driver(&self) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (i, node) in self.nodes.iter().enumerate() {
            let SelectNode::Iter { op: OpType::And, it } = node else {
                continue;
            };
            if self.nodes[i + 1..].iter().any(|n| n.op() == OpType::Or) {
                continue;
            }
            let cost = it.max_iterations();
            if best.is_none() || cost < best.expect("just checked").1 {
                best = Some((i, cost));
            }
        }
        best.map(|(i, _)| i)
    }

    /// When the whole top level is a disjunction of iterators, the union of
    /// their sets is a complete driver and no per-row checks remain.
    pub fn pure_union(&self) -> Option<SelectIterator> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut sets = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                SelectNode::Iter { op, it } => {
                    let ok = if i == 0 {
                        matches!(op, OpType::And | OpType::Or)
                    } else {
                        matches!(op, OpType::Or)
                    };
                    if !ok {
                        return None;
                    }
                    sets.extend(it.sets.iter().cloned());
                }
                _ => return None,
            }
        }
        // a single And iterator is the plain driver case, not a union
        if self.nodes.len() < 2 {
            return None;
        }
        Some(SelectIterator::new(sets, "union"))
    }

    /// Verify a candidate row against every node except `skip` (the driver).
    ///
    /// `monotone` enables galloping iterator checks and must only be set
    /// when candidate ids arrive ascending.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &mut self,
        ns: &Namespace,
        row: &PayloadRow,
        id: RowId,
        skip: Option<usize>,
        monotone: bool,
        join_eval: &mut dyn FnMut(usize, RowId, bool) -> Result<bool>,
    ) -> Result<bool> {
        Self::check_nodes(&mut self.nodes, ns, row, id, skip, monotone, join_eval)
    }

    fn check_nodes(
        nodes: &mut [SelectNode],
        ns: &Namespace,
        row: &PayloadRow,
        id: RowId,
        skip: Option<usize>,
        monotone: bool,
        join_eval: &mut dyn FnMut(usize, RowId, bool) -> Result<bool>,
    ) -> Result<bool> {
        let mut acc: Option<bool> = None;
        for (i, node) in nodes.iter_mut().enumerate() {
            let op = node.op();
            if skip == Some(i) {
                acc = Some(match op {
                    OpType::And => acc.unwrap_or(true),
                    OpType::Or => true,
                    OpType::Not => {
                        return Err(QueryError::Internal("driver cannot be negated".into()))
                    }
                });
                continue;
            }
            let want = !matches!(
                (op, acc),
                (OpType::And | OpType::Not, Some(false)) | (OpType::Or, Some(true))
            );
            let m = match node {
                SelectNode::Iter { it, .. } => {
                    if monotone {
                        it.contains_ge(id)
                    } else {
                        it.contains(id)
                    }
                }
                SelectNode::Cmp { cmp, .. } => cmp.matches(ns, row),
                SelectNode::TwoField { entry, .. } => matches_two_field(ns, row, entry),
                SelectNode::Group { nodes, .. } => {
                    Self::check_nodes(nodes, ns, row, id, None, monotone, join_eval)?
                }
                SelectNode::JoinRef { join_idx, .. } => join_eval(*join_idx, id, want)?,
                SelectNode::True { .. } => true,
                SelectNode::False { .. } => false,
            };
            acc = Some(match op {
                OpType::And => acc.unwrap_or(true) && m,
                OpType::Or => acc.unwrap_or(false) || m,
                OpType::Not => acc.unwrap_or(true) && !m,
            });
        }
        Ok(acc.unwrap_or(true))
    }

    /// The driver's ascending candidate list
    pub fn driver_ids(&self, driver: usize) -> Vec<RowId> {
        match &self.nodes[driver] {
            SelectNode::Iter { it, .. } => it.collect_ids(),
            _ => Vec::new(),
        }
    }
}

/// Execute a join-free filter to the ascending set of matching row ids.
/// The workhorse behind join pre-results and sub-query materialization.
pub fn execute_filter_ids(
    ns: &Namespace,
    nodes: &[FilterNode],
    ctx: &tern_db_core::OpContext,
) -> Result<Vec<RowId>> {
    let mut container = IteratorContainer::build(ns, nodes, &SelectOpts::default())?;
    if container.is_provably_empty() {
        return Ok(Vec::new());
    }
    let mut no_joins = |_: usize, _: RowId, _: bool| -> Result<bool> {
        Err(QueryError::Internal("join inside a sub-filter".into()))
    };
    if let Some(union) = container.pure_union() {
        return Ok(union.collect_ids());
    }
    let (candidates, skip) = match container.cheapest_driver() {
        Some(driver) => (container.driver_ids(driver), Some(driver)),
        None => (ns.ids().collect(), None),
    };
    let mut out = Vec::new();
    for (n, id) in candidates.into_iter().enumerate() {
        if n % 1024 == 0 {
            ctx.check().map_err(QueryError::Core)?;
        }
        let Some(row) = ns.row(id) else { continue };
        if container.check(ns, row, id, skip, true, &mut no_joins)? {
            out.push(id);
        }
    }
    Ok(out)
}
