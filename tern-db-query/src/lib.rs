//! # tern-db query
//!
//! Query execution engine for tern-db:
//! - parsed query model and JSON DSL decode
//! - preprocessor: field resolution, entry merging, composite substitution,
//!   join-condition injection, bracket reduction, full-text extraction,
//!   forced-sort staging
//! - selector iterators over index id-sets with comparator fallbacks
//! - full-text selector with variant expansion, typo lookup and ranked
//!   BM25+position merge
//! - join/merge engine with values / id-set / deferred pre-results
//! - streaming aggregation (sum/avg/min/max/count/facet/distinct)
//!
//! ## Quick start
//!
//! Build a [`Query`] with the fluent builder (or [`parse_dsl`]), then call
//! [`select`] with a [`tern_db_core::Database`].

pub mod aggregate;
pub mod comparator;
pub mod dsl;
pub mod error;
pub mod fulltext;
pub mod iterators;
pub mod join;
pub mod merge;
pub mod model;
pub mod preprocess;
pub mod select;

pub use aggregate::{AggregationResult, Aggregator, FacetBucket};
pub use dsl::parse_dsl;
pub use error::{QueryError, Result};
pub use fulltext::{parse_ft_expression, FtQuery, FtSelector};
pub use iterators::{execute_filter_ids, IteratorContainer, SelectIterator};
pub use join::{JoinedSelector, PreResult};
pub use model::{
    AggType, AggregateEntry, CondEntry, FieldRef, FilterNode, JoinOnEntry, JoinQuery, JoinType,
    OpType, Query, ReqTotal, SortEntry, StrictMode, TwoFieldEntry,
};
pub use preprocess::{Prepared, Preprocessor};
pub use select::{select, ExplainInfo, ItemRef, QueryResults};

// Re-exported for callers building conditions
pub use tern_db_core::{CondType, Value};
