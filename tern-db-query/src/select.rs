//! Namespace selector
//!
//! Orchestrates one query against one namespace snapshot: join preselect,
//! preprocessing, condition injection, the full-text driver when present,
//! iterator composition, the row walk with post-filters and join
//! evaluation, aggregation, sorting (forced prefix, field sort, rank
//! order), limit/offset, and projection.
//!
//! Cancellation is checked at per-row batch boundaries.

use crate::aggregate::{AggregationResult, Aggregator};
use crate::comparator::field_values;
use crate::error::{QueryError, Result};
use crate::fulltext::{parse_ft_expression, FtSelector};
use crate::iterators::IteratorContainer;
use crate::join::JoinedSelector;
use crate::model::{FieldRef, JoinType, Query, ReqTotal, SortEntry};
use crate::preprocess::{inject_join_conditions, ForcedSort, Preprocessor};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tern_db_core::{Database, Namespace, OpContext, RowId, SelectOpts, Value};
use tracing::debug;

/// Cancellation is polled every this many candidate rows
const CANCEL_CHECK_BATCH: usize = 1024;

/// One selected row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemRef {
    pub nsid: u32,
    pub id: RowId,
    pub rank: f64,
}

/// Explain output captured when the query asks for it
#[derive(Debug, Clone, Default)]
pub struct ExplainInfo {
    pub driver: String,
    /// Preprocessor rewrites and injections
    pub notes: Vec<String>,
    /// `(right namespace, pre-result mode)` per join
    pub join_modes: Vec<(String, String)>,
}

/// Selected, sorted, limited result set
#[derive(Debug, Default)]
pub struct QueryResults {
    pub items: Vec<ItemRef>,
    /// Matched rows before limit/offset (when requested)
    pub total_count: usize,
    pub aggregations: Vec<AggregationResult>,
    /// `(nsid, outer row, join idx)` → joined right-side rows
    pub joined: FxHashMap<(u32, RowId, usize), Vec<RowId>>,
    namespaces: Vec<Arc<Namespace>>,
    join_namespaces: Vec<Vec<Arc<Namespace>>>,
    select_filter: Vec<String>,
    with_rank: bool,
    pub explain: Option<ExplainInfo>,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids in result order (single-namespace results)
    pub fn ids(&self) -> Vec<RowId> {
        self.items.iter().map(|i| i.id).collect()
    }

    pub fn namespace(&self, nsid: u32) -> Option<&Arc<Namespace>> {
        self.namespaces.get(nsid as usize)
    }

    /// Absorb a merge sub-result; parts arrive in nsid order so the
    /// namespace tables stay indexable by nsid
    pub(crate) fn append_part(&mut self, mut part: QueryResults) {
        self.items.append(&mut part.items);
        self.total_count += part.total_count;
        self.aggregations.extend(part.aggregations);
        self.joined.extend(part.joined);
        self.namespaces.extend(part.namespaces);
        self.join_namespaces.extend(part.join_namespaces);
    }

    /// Materialize documents with projection, rank, and joined buckets
    pub fn to_json(&self) -> Vec<serde_json::Value> {
        let mut out = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let Some(ns) = self.namespaces.get(item.nsid as usize) else {
                continue;
            };
            let Some(doc) = ns.doc(item.id) else { continue };
            let mut doc = doc;
            if !self.select_filter.is_empty() {
                if let serde_json::Value::Object(m) = &mut doc {
                    m.retain(|k, _| self.select_filter.iter().any(|f| f == k));
                }
            }
            if self.with_rank {
                if let serde_json::Value::Object(m) = &mut doc {
                    m.insert("rank()".to_string(), serde_json::json!(item.rank));
                }
            }
            let join_nss = self.join_namespaces.get(item.nsid as usize);
            let mut joined_obj = serde_json::Map::new();
            for ((nsid, row, join_idx), rows) in &self.joined {
                if *nsid != item.nsid || *row != item.id {
                    continue;
                }
                let Some(right_ns) = join_nss.and_then(|v| v.get(*join_idx)) else {
                    continue;
                };
                let docs: Vec<serde_json::Value> =
                    rows.iter().filter_map(|&r| right_ns.doc(r)).collect();
                joined_obj.insert(right_ns.name().to_string(), serde_json::Value::Array(docs));
            }
            if !joined_obj.is_empty() {
                if let serde_json::Value::Object(m) = &mut doc {
                    m.insert("joined".to_string(), serde_json::Value::Object(joined_obj));
                }
            }
            out.push(doc);
        }
        out
    }
}

/// Execute a query, including its merge sub-queries
pub fn select(db: &Database, query: &Query, ctx: &OpContext) -> Result<QueryResults> {
    if query.merge_queries.is_empty() {
        let mut res = select_one(db, query, ctx, 0)?;
        apply_window(&mut res, query.offset, query.limit);
        return Ok(res);
    }
    crate::merge::select_with_merges(db, query, ctx)
}

fn apply_window(res: &mut QueryResults, offset: usize, limit: Option<usize>) {
    let offset = offset.min(res.items.len());
    res.items.drain(..offset);
    if let Some(limit) = limit {
        res.items.truncate(limit);
    }
}

/// Execute one query against its namespace (no merge handling, no window)
pub(crate) fn select_one(
    db: &Database,
    query: &Query,
    ctx: &OpContext,
    nsid: u32,
) -> Result<QueryResults> {
    let handle = db.namespace(&query.namespace).map_err(QueryError::Core)?;
    let ns = handle.read();

    // join preselect: right sub-queries run once here
    let mut joined: Vec<JoinedSelector> = Vec::with_capacity(query.joins.len());
    for jq in &query.joins {
        joined.push(JoinedSelector::build(db, query.strict_mode, jq, ctx)?);
    }
    let left_fields: Vec<Vec<FieldRef>> = joined
        .iter()
        .map(|js| js.resolve_left_fields(&ns))
        .collect();

    let prep = Preprocessor::new(&ns, query.strict_mode, query.explain).prepare(query)?;
    let mut filter = prep.filter;
    let mut notes = prep.explain_notes;
    inject_join_conditions(&ns, &mut filter, &joined, &mut notes, query.explain)?;

    // full-text driver
    let ft_entries = match &prep.ft_entry {
        Some(entry) => {
            let index = entry
                .field
                .index_no
                .and_then(|ix| ns.indexes().get(ix))
                .ok_or_else(|| QueryError::Internal("full-text index vanished".into()))?;
            let ft = index
                .ft()
                .ok_or_else(|| QueryError::Internal("full-text entry on non-ft index".into()))?;
            let expr = match entry.values.first() {
                Some(Value::String(s)) => s.clone(),
                _ => {
                    return Err(QueryError::invalid_query(
                        "full-text condition requires a string expression",
                    ))
                }
            };
            let field_names = index
                .def()
                .fields
                .iter()
                .filter_map(|&f| ns.payload_type().field(f).ok().map(|d| d.name.clone()))
                .collect();
            let parsed = parse_ft_expression(&expr)?;
            Some(FtSelector::new(ft, field_names).process(&parsed, ctx)?)
        }
        None => None,
    };

    let opts = SelectOpts {
        max_iterations: crate::preprocess::estimate_max_iterations(&ns, &filter),
        distinct: false,
    };
    let mut container = IteratorContainer::build(&ns, &filter, &opts)?;

    // driver choice: full-text > explicit-sort index walk > cheapest
    // iterator > merged union > full scan
    let sort_index_driver = match (&ft_entries, prep.sort.first(), &prep.forced_sort) {
        (None, Some(first), None) => ns
            .index(&first.field)
            .filter(|idx| idx.is_ordered())
            .and_then(|idx| idx.ordered_ids(first.desc)),
        (None, None, None) => prep
            .optimized_sort_index
            .as_deref()
            .and_then(|name| ns.index(name))
            .and_then(|idx| idx.ordered_ids(false)),
        _ => None,
    };

    let mut explain_driver;
    let mut container_driver: Option<usize> = None;
    // candidates: (id, rank), monotone flag, ordered flag
    let (candidates, monotone, ordered): (Vec<(RowId, f64)>, bool, bool) = match (
        ft_entries,
        sort_index_driver,
    ) {
        (Some(entries), _) => {
            explain_driver = "fulltext".to_string();
            (
                entries.into_iter().map(|e| (e.row_id, e.rank)).collect(),
                false,
                true,
            )
        }
        (None, Some(ids)) => {
            explain_driver = "sort-index".to_string();
            (ids.into_iter().map(|id| (id, 0.0)).collect(), false, true)
        }
        (None, None) => {
            if container.is_provably_empty() {
                explain_driver = "empty".to_string();
                (Vec::new(), true, false)
            } else if let Some(union) = container.pure_union() {
                explain_driver = format!("union({})", union.max_iterations());
                (
                    union.collect_ids().into_iter().map(|id| (id, 0.0)).collect(),
                    true,
                    false,
                )
            } else if let Some(driver) = container.cheapest_driver() {
                let ids = container.driver_ids(driver);
                explain_driver = format!("index({})", ids.len());
                let out = (
                    ids.into_iter().map(|id| (id, 0.0)).collect(),
                    true,
                    false,
                );
                // remember which node to skip during checks
                container_driver = Some(driver);
                out
            } else {
                explain_driver = "scan".to_string();
                (ns.ids().map(|id| (id, 0.0)).collect(), true, false)
            }
        }
    };

    // aggregators
    let mut aggregators = Vec::with_capacity(query.aggregations.len());
    for a in &query.aggregations {
        aggregators.push(Aggregator::new(&ns, a.clone())?);
    }

    // row walk
    let mut items: Vec<ItemRef> = Vec::new();
    let mut joined_buckets: FxHashMap<(u32, RowId, usize), Vec<RowId>> = FxHashMap::default();
    let need_full_stream = query.req_total != ReqTotal::Disabled
        || !aggregators.is_empty()
        || !prep.sort.is_empty()
        || prep.forced_sort.is_some()
        || !ordered;
    let window_cap = if need_full_stream {
        usize::MAX
    } else {
        query.limit.map(|l| l + query.offset).unwrap_or(usize::MAX)
    };
    let mut total = 0usize;

    for (n, (id, rank)) in candidates.into_iter().enumerate() {
        if n % CANCEL_CHECK_BATCH == 0 {
            ctx.check().map_err(QueryError::Core)?;
        }
        let Some(row) = ns.row(id) else { continue };
        let mut join_eval = |join_idx: usize, row_id: RowId, want: bool| -> Result<bool> {
            let js = &mut joined[join_idx];
            let hit = js.process(&ns, row, &left_fields[join_idx], want)?;
            if hit.found && want {
                joined_buckets.insert((nsid, row_id, join_idx), hit.rows);
            }
            Ok(hit.found)
        };
        let ok = container.check(&ns, row, id, container_driver, monotone, &mut join_eval)?;
        if !ok {
            continue;
        }
        // left joins never filter; they fill buckets for kept rows
        for (join_idx, js) in joined.iter_mut().enumerate() {
            if js.join_type != JoinType::Left {
                continue;
            }
            let hit = js.process(&ns, row, &left_fields[join_idx], true)?;
            if hit.found {
                joined_buckets.insert((nsid, id, join_idx), hit.rows);
            }
        }
        for agg in &mut aggregators {
            agg.aggregate(&ns, row)?;
        }
        total += 1;
        if items.len() < window_cap {
            items.push(ItemRef { nsid, id, rank });
        } else {
            // ordering already known and nothing else consumes the stream
            break;
        }
    }

    // sorting
    if prep.forced_sort.is_some() || !prep.sort.is_empty() {
        sort_items(&ns, &mut items, &prep.sort, &prep.forced_sort);
        explain_driver.push_str("+sort");
    }

    let explain = if query.explain {
        Some(ExplainInfo {
            driver: explain_driver,
            notes,
            join_modes: joined
                .iter()
                .map(|js| {
                    (
                        js.right_ns.name().to_string(),
                        js.pre_result.mode_label().to_string(),
                    )
                })
                .collect(),
        })
    } else {
        None
    };
    if explain.is_some() {
        debug!(driver = %explain.as_ref().map(|e| e.driver.clone()).unwrap_or_default(), "select explained");
    }

    Ok(QueryResults {
        items,
        total_count: total,
        aggregations: aggregators.iter().map(|a| a.result()).collect(),
        joined: joined_buckets,
        join_namespaces: vec![joined.iter().map(|js| js.right_ns.clone()).collect()],
        namespaces: vec![ns],
        select_filter: query.select_filter.clone(),
        with_rank: query.with_rank,
        explain,
    })
}

/// Stable sort honoring the forced-value prefix, then the sort list, with
/// ascending-id tie break
fn sort_items(
    ns: &Namespace,
    items: &mut [ItemRef],
    sort: &[SortEntry],
    forced: &Option<ForcedSort>,
) {
    let resolve = |name: &str| -> FieldRef {
        let mut fr = FieldRef::named(name);
        if let Some(ix) = ns.index_no(name) {
            fr.index_no = Some(ix);
            let def = ns.indexes()[ix].def();
            if !def.is_composite() {
                fr.field = def.fields.first().copied();
            }
        } else if let Some(f) = ns.payload_type().field_id(name) {
            fr.field = Some(f);
        }
        fr
    };
    let sort_fields: Vec<(FieldRef, bool)> = sort
        .iter()
        .map(|s| (resolve(&s.field), s.desc))
        .collect();

    let key_of = |item: &ItemRef, fr: &FieldRef| -> Value {
        ns.row(item.id)
            .map(|row| {
                field_values(ns, row, fr)
                    .into_iter()
                    .next()
                    .unwrap_or(Value::Null)
            })
            .unwrap_or(Value::Null)
    };

    let forced_rank = |item: &ItemRef| -> usize {
        let Some(fs) = forced else { return usize::MAX };
        let fr = resolve(&fs.field);
        let v = key_of(item, &fr);
        fs.values
            .iter()
            .position(|fv| fv == &v)
            .unwrap_or(usize::MAX)
    };

    items.sort_by(|a, b| {
        // stage 1: forced-prefix rank
        let fa = forced_rank(a);
        let fb = forced_rank(b);
        match fa.cmp(&fb) {
            std::cmp::Ordering::Equal => {}
            other => return other,
        }
        // stage 2: the sort list
        for (fr, desc) in &sort_fields {
            let ka = key_of(a, fr);
            let kb = key_of(b, fr);
            let ord = if *desc { kb.cmp(&ka) } else { ka.cmp(&kb) };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        // ties break by ascending id
        a.id.cmp(&b.id)
    });
}
