//! JSON query DSL
//!
//! Decodes the wire DSL into the [`Query`] model. Only the parsed shape is
//! specified here; the SQL text parser is an external collaborator that
//! produces the same model.

use crate::error::{QueryError, Result};
use crate::model::{
    AggType, AggregateEntry, CondEntry, FieldRef, FilterNode, JoinOnEntry, JoinQuery, JoinType,
    OpType, Query, ReqTotal, SortEntry, StrictMode, TwoFieldEntry,
};
use serde::Deserialize;
use tern_db_core::{doc_value, CondType, Value};

#[derive(Debug, Deserialize)]
struct DslQuery {
    namespace: String,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    filters: Vec<DslFilter>,
    #[serde(default)]
    sort: Vec<DslSort>,
    #[serde(default)]
    merge_queries: Vec<DslQuery>,
    #[serde(default)]
    select_filter: Vec<String>,
    #[serde(default)]
    req_total: Option<ReqTotal>,
    #[serde(default)]
    aggregations: Vec<DslAggregation>,
    #[serde(default)]
    explain: bool,
    #[serde(default)]
    strict_mode: Option<StrictMode>,
    #[serde(default)]
    with_rank: bool,
}

#[derive(Debug, Deserialize)]
struct DslFilter {
    #[serde(default)]
    op: Option<OpType>,
    #[serde(default)]
    cond: Option<CondType>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    first_field: Option<String>,
    #[serde(default)]
    second_field: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    filters: Vec<DslFilter>,
    #[serde(default)]
    join_query: Option<DslJoinQuery>,
}

#[derive(Debug, Deserialize)]
struct DslJoinQuery {
    #[serde(rename = "type")]
    join_type: JoinType,
    namespace: String,
    #[serde(default)]
    filters: Vec<DslFilter>,
    #[serde(default)]
    sort: Vec<DslSort>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    on: Vec<DslOnEntry>,
    #[serde(default)]
    select_filter: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DslOnEntry {
    left_field: String,
    right_field: String,
    cond: CondType,
    #[serde(default)]
    op: Option<OpType>,
}

#[derive(Debug, Deserialize)]
struct DslSort {
    field: String,
    #[serde(default)]
    desc: bool,
    /// Forced-sort prefix values
    #[serde(default)]
    values: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DslAggregation {
    #[serde(rename = "type")]
    agg_type: AggType,
    fields: Vec<String>,
    #[serde(default)]
    sort: Vec<DslAggSort>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DslAggSort {
    field: String,
    #[serde(default)]
    desc: bool,
}

fn dsl_values(raw: Option<serde_json::Value>) -> Vec<Value> {
    match raw {
        None => Vec::new(),
        Some(serde_json::Value::Array(items)) => items.iter().map(doc_value).collect(),
        Some(v) => vec![doc_value(&v)],
    }
}

fn convert_filter(f: DslFilter, joins: &mut Vec<JoinQuery>) -> Result<FilterNode> {
    let op = f.op.unwrap_or(OpType::And);
    if let Some(jq) = f.join_query {
        let join_idx = joins.len();
        let join_type = jq.join_type;
        joins.push(convert_join(jq)?);
        // The node operator follows the join type unless the DSL overrides it
        let op = match (f.op, join_type) {
            (Some(op), _) => op,
            (None, JoinType::OrInner) => OpType::Or,
            (None, _) => OpType::And,
        };
        return Ok(FilterNode::Join { op, join_idx });
    }
    if !f.filters.is_empty() {
        let children = f
            .filters
            .into_iter()
            .map(|c| convert_filter(c, joins))
            .collect::<Result<Vec<_>>>()?;
        return Ok(FilterNode::Bracket { op, children });
    }
    let cond = f
        .cond
        .ok_or_else(|| QueryError::invalid_query("filter entry has no condition"))?;
    if let (Some(first), Some(second)) = (f.first_field.as_ref(), f.second_field.as_ref()) {
        return Ok(FilterNode::TwoField {
            op,
            entry: TwoFieldEntry {
                left: FieldRef::named(first.clone()),
                cond,
                right: FieldRef::named(second.clone()),
            },
        });
    }
    let field = f
        .field
        .ok_or_else(|| QueryError::invalid_query("filter entry has no field"))?;
    Ok(FilterNode::Cond {
        op,
        entry: CondEntry {
            field: FieldRef::named(field),
            cond,
            values: dsl_values(f.value),
        },
    })
}

fn convert_join(jq: DslJoinQuery) -> Result<JoinQuery> {
    let mut nested = Vec::new();
    let filter = jq
        .filters
        .into_iter()
        .map(|f| convert_filter(f, &mut nested))
        .collect::<Result<Vec<_>>>()?;
    if !nested.is_empty() {
        return Err(QueryError::invalid_query("nested joins are not supported"));
    }
    Ok(JoinQuery {
        join_type: jq.join_type,
        namespace: jq.namespace,
        filter,
        sort: jq
            .sort
            .into_iter()
            .map(convert_sort)
            .collect::<Result<Vec<_>>>()?,
        limit: jq.limit.and_then(|l| usize::try_from(l).ok()),
        offset: jq.offset.and_then(|o| usize::try_from(o).ok()).unwrap_or(0),
        on: jq
            .on
            .into_iter()
            .map(|e| JoinOnEntry {
                op: e.op.unwrap_or(OpType::And),
                left_field: e.left_field,
                cond: e.cond,
                right_field: e.right_field,
            })
            .collect(),
        select_filter: jq.select_filter,
    })
}

fn convert_sort(s: DslSort) -> Result<SortEntry> {
    Ok(SortEntry {
        field: s.field,
        desc: s.desc,
        forced_values: s.values.iter().map(doc_value).collect(),
    })
}

fn convert_query(dsl: DslQuery) -> Result<Query> {
    let mut joins = Vec::new();
    let filter = dsl
        .filters
        .into_iter()
        .map(|f| convert_filter(f, &mut joins))
        .collect::<Result<Vec<_>>>()?;
    let merge_queries = dsl
        .merge_queries
        .into_iter()
        .map(convert_query)
        .collect::<Result<Vec<_>>>()?;
    Ok(Query {
        namespace: dsl.namespace,
        filter,
        sort: dsl
            .sort
            .into_iter()
            .map(convert_sort)
            .collect::<Result<Vec<_>>>()?,
        aggregations: dsl
            .aggregations
            .into_iter()
            .map(|a| AggregateEntry {
                agg_type: a.agg_type,
                fields: a.fields,
                sort: a.sort.into_iter().map(|s| (s.field, s.desc)).collect(),
                limit: a.limit.and_then(|l| usize::try_from(l).ok()),
                offset: a.offset.and_then(|o| usize::try_from(o).ok()).unwrap_or(0),
            })
            .collect(),
        joins,
        merge_queries,
        select_filter: dsl.select_filter,
        limit: dsl.limit.and_then(|l| usize::try_from(l).ok()),
        offset: dsl.offset.and_then(|o| usize::try_from(o).ok()).unwrap_or(0),
        req_total: dsl.req_total.unwrap_or_default(),
        explain: dsl.explain,
        strict_mode: dsl.strict_mode.unwrap_or_default(),
        with_rank: dsl.with_rank,
    })
}

/// Decode a JSON DSL query
pub fn parse_dsl(json: &str) -> Result<Query> {
    let dsl: DslQuery = serde_json::from_str(json)
        .map_err(|e| QueryError::invalid_query(format!("dsl decode: {}", e)))?;
    convert_query(dsl)
}
