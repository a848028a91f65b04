//! Parsed query model
//!
//! The tree a parser (SQL, JSON DSL, or the builder below) produces and the
//! preprocessor consumes: filter nodes with `And`/`Or`/`Not` operators,
//! sort entries with optional forced-value prefixes, aggregation requests,
//! joins, merge queries, limit/offset, projection, and strict mode.
//!
//! Field references start out as bare names; the preprocessor resolves them
//! against the namespace into index numbers / payload fields / json paths.

use serde::{Deserialize, Serialize};
use tern_db_core::{CollateMode, CondType, FieldId, Value};

/// Operator applied to a filter node relative to the running result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    And,
    Or,
    Not,
}

/// Field reference, progressively resolved by the preprocessor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRef {
    pub name: String,
    /// Index number in the namespace, when the field is indexed
    pub index_no: Option<usize>,
    /// Payload field id, when the field is a fixed schema field
    pub field: Option<FieldId>,
    /// Json path into the tuple for non-indexed / sparse fields
    pub json_path: Option<String>,
    pub collate: CollateMode,
}

impl FieldRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Two references point at the same resolved field
    pub fn same_field(&self, other: &FieldRef) -> bool {
        match (self.index_no, other.index_no) {
            (Some(a), Some(b)) => a == b,
            _ => self.name == other.name,
        }
    }
}

/// Leaf predicate: `field cond values`
#[derive(Debug, Clone, PartialEq)]
pub struct CondEntry {
    pub field: FieldRef,
    pub cond: CondType,
    pub values: Vec<Value>,
}

/// Cross-field predicate: `left cond right`
#[derive(Debug, Clone, PartialEq)]
pub struct TwoFieldEntry {
    pub left: FieldRef,
    pub cond: CondType,
    pub right: FieldRef,
}

/// Filter tree node
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Cond { op: OpType, entry: CondEntry },
    TwoField { op: OpType, entry: TwoFieldEntry },
    Bracket { op: OpType, children: Vec<FilterNode> },
    /// Reference into [`Query::joins`]; only Inner/OrInner joins appear in
    /// the filter tree
    Join { op: OpType, join_idx: usize },
    AlwaysTrue { op: OpType },
    AlwaysFalse { op: OpType },
}

impl FilterNode {
    pub fn op(&self) -> OpType {
        match self {
            FilterNode::Cond { op, .. }
            | FilterNode::TwoField { op, .. }
            | FilterNode::Bracket { op, .. }
            | FilterNode::Join { op, .. }
            | FilterNode::AlwaysTrue { op }
            | FilterNode::AlwaysFalse { op } => *op,
        }
    }

    pub fn set_op(&mut self, new_op: OpType) {
        match self {
            FilterNode::Cond { op, .. }
            | FilterNode::TwoField { op, .. }
            | FilterNode::Bracket { op, .. }
            | FilterNode::Join { op, .. }
            | FilterNode::AlwaysTrue { op }
            | FilterNode::AlwaysFalse { op } => *op = new_op,
        }
    }
}

/// One sort instruction
#[derive(Debug, Clone, PartialEq)]
pub struct SortEntry {
    pub field: String,
    pub desc: bool,
    /// Rows whose sort key is listed here come first, in this order
    pub forced_values: Vec<Value>,
}

impl SortEntry {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: false,
            forced_values: Vec::new(),
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: true,
            forced_values: Vec::new(),
        }
    }
}

/// Aggregation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggType {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    #[serde(rename = "count_cached")]
    CountCached,
    Facet,
    Distinct,
}

/// One aggregation request
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateEntry {
    pub agg_type: AggType,
    pub fields: Vec<String>,
    /// Facet output order; the field name `"count"` sorts by bucket count
    pub sort: Vec<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AggregateEntry {
    pub fn new(agg_type: AggType, fields: Vec<String>) -> Self {
        Self {
            agg_type,
            fields,
            sort: Vec::new(),
            limit: None,
            offset: 0,
        }
    }
}

/// Strict-mode levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrictMode {
    #[default]
    None,
    /// Unknown field names are rejected
    Names,
    /// Unknown indexes are rejected
    Indexes,
}

/// Join kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    OrInner,
}

/// Join on-condition: `left_field cond right_field`, combined by `op`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOnEntry {
    pub op: OpType,
    pub left_field: String,
    pub cond: CondType,
    pub right_field: String,
}

/// A join attached to the query
#[derive(Debug, Clone, PartialEq)]
pub struct JoinQuery {
    pub join_type: JoinType,
    pub namespace: String,
    /// Right-side filter, independent of the on-conditions
    pub filter: Vec<FilterNode>,
    pub sort: Vec<SortEntry>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub on: Vec<JoinOnEntry>,
    pub select_filter: Vec<String>,
}

impl JoinQuery {
    pub fn new(join_type: JoinType, namespace: impl Into<String>) -> Self {
        Self {
            join_type,
            namespace: namespace.into(),
            filter: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: 0,
            on: Vec::new(),
            select_filter: Vec::new(),
        }
    }

    pub fn on(mut self, left: impl Into<String>, cond: CondType, right: impl Into<String>) -> Self {
        self.on.push(JoinOnEntry {
            op: OpType::And,
            left_field: left.into(),
            cond,
            right_field: right.into(),
        });
        self
    }

    pub fn where_cond(
        mut self,
        field: impl Into<String>,
        cond: CondType,
        values: Vec<Value>,
    ) -> Self {
        self.filter.push(FilterNode::Cond {
            op: OpType::And,
            entry: CondEntry {
                field: FieldRef::named(field),
                cond,
                values,
            },
        });
        self
    }
}

/// Total-count request level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReqTotal {
    #[default]
    Disabled,
    Enabled,
    Cached,
}

/// A parsed query ready for preprocessing
#[derive(Debug, Clone)]
pub struct Query {
    pub namespace: String,
    pub filter: Vec<FilterNode>,
    pub sort: Vec<SortEntry>,
    pub aggregations: Vec<AggregateEntry>,
    pub joins: Vec<JoinQuery>,
    pub merge_queries: Vec<Query>,
    pub select_filter: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub req_total: ReqTotal,
    pub explain: bool,
    pub strict_mode: StrictMode,
    /// Expose `rank()` in projected documents
    pub with_rank: bool,
}

impl Query {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            filter: Vec::new(),
            sort: Vec::new(),
            aggregations: Vec::new(),
            joins: Vec::new(),
            merge_queries: Vec::new(),
            select_filter: Vec::new(),
            limit: None,
            offset: 0,
            req_total: ReqTotal::Disabled,
            explain: false,
            strict_mode: StrictMode::None,
            with_rank: false,
        }
    }

    pub fn where_cond(
        mut self,
        field: impl Into<String>,
        cond: CondType,
        values: Vec<Value>,
    ) -> Self {
        self.filter.push(FilterNode::Cond {
            op: OpType::And,
            entry: CondEntry {
                field: FieldRef::named(field),
                cond,
                values,
            },
        });
        self
    }

    pub fn op_where(
        mut self,
        op: OpType,
        field: impl Into<String>,
        cond: CondType,
        values: Vec<Value>,
    ) -> Self {
        self.filter.push(FilterNode::Cond {
            op,
            entry: CondEntry {
                field: FieldRef::named(field),
                cond,
                values,
            },
        });
        self
    }

    pub fn where_fields(
        mut self,
        left: impl Into<String>,
        cond: CondType,
        right: impl Into<String>,
    ) -> Self {
        self.filter.push(FilterNode::TwoField {
            op: OpType::And,
            entry: TwoFieldEntry {
                left: FieldRef::named(left),
                cond,
                right: FieldRef::named(right),
            },
        });
        self
    }

    pub fn bracket(mut self, op: OpType, children: Vec<FilterNode>) -> Self {
        self.filter.push(FilterNode::Bracket { op, children });
        self
    }

    pub fn sort(mut self, entry: SortEntry) -> Self {
        self.sort.push(entry);
        self
    }

    /// Sort with a forced-value prefix
    pub fn sort_forced(mut self, field: impl Into<String>, desc: bool, values: Vec<Value>) -> Self {
        self.sort.push(SortEntry {
            field: field.into(),
            desc,
            forced_values: values,
        });
        self
    }

    pub fn aggregate(mut self, entry: AggregateEntry) -> Self {
        self.aggregations.push(entry);
        self
    }

    pub fn join(mut self, jq: JoinQuery) -> Self {
        let join_idx = self.joins.len();
        match jq.join_type {
            JoinType::Inner => self.filter.push(FilterNode::Join {
                op: OpType::And,
                join_idx,
            }),
            JoinType::OrInner => self.filter.push(FilterNode::Join {
                op: OpType::Or,
                join_idx,
            }),
            JoinType::Left => {}
        }
        self.joins.push(jq);
        self
    }

    pub fn merge(mut self, q: Query) -> Self {
        self.merge_queries.push(q);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn select(mut self, fields: Vec<String>) -> Self {
        self.select_filter = fields;
        self
    }

    pub fn req_total(mut self, rt: ReqTotal) -> Self {
        self.req_total = rt;
        self
    }

    pub fn strict(mut self, mode: StrictMode) -> Self {
        self.strict_mode = mode;
        self
    }

    pub fn with_rank(mut self) -> Self {
        self.with_rank = true;
        self
    }

    pub fn explain(mut self) -> Self {
        self.explain = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_wires_join_into_filter() {
        let q = Query::new("books")
            .where_cond("pages", CondType::Gt, vec![Value::Int(100)])
            .join(JoinQuery::new(JoinType::Inner, "authors").on(
                "author_id",
                CondType::Eq,
                "id",
            ));
        assert_eq!(q.joins.len(), 1);
        assert!(matches!(
            q.filter[1],
            FilterNode::Join {
                op: OpType::And,
                join_idx: 0
            }
        ));
    }

    #[test]
    fn left_join_stays_out_of_filter() {
        let q = Query::new("books").join(JoinQuery::new(JoinType::Left, "authors"));
        assert!(q.filter.is_empty());
        assert_eq!(q.joins.len(), 1);
    }
}
