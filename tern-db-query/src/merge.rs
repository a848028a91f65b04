//! Cross-namespace merge
//!
//! A merge composes the main query with independent sub-queries (same or
//! different namespaces) into one result. Ranked results (full-text) order
//! by descending combined rank; everything else orders by `(nsid, id)`.
//! The outer limit/offset applies to the combined stream.

use crate::error::Result;
use crate::model::{Query, ReqTotal};
use crate::select::{select_one, QueryResults};
use tern_db_core::{Database, OpContext};

/// Execute a query with its merge sub-queries
pub fn select_with_merges(db: &Database, query: &Query, ctx: &OpContext) -> Result<QueryResults> {
    let mut combined = select_one(db, query, ctx, 0)?;
    for (i, sub) in query.merge_queries.iter().enumerate() {
        // sub-queries inherit strict mode and run with their own filters
        let mut sub = sub.clone();
        sub.strict_mode = query.strict_mode;
        let nsid = (i + 1) as u32;
        let part = select_one(db, &sub, ctx, nsid)?;
        merge_into(&mut combined, part);
    }

    let ranked = combined.items.iter().any(|i| i.rank > 0.0);
    if ranked {
        combined.items.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (a.nsid, a.id).cmp(&(b.nsid, b.id)))
        });
    } else {
        combined.items.sort_by_key(|i| (i.nsid, i.id));
    }

    if query.req_total != ReqTotal::Disabled {
        combined.total_count = combined.items.len();
    }
    let offset = query.offset.min(combined.items.len());
    combined.items.drain(..offset);
    if let Some(limit) = query.limit {
        combined.items.truncate(limit);
    }
    Ok(combined)
}

/// Absorb a sub-result's items, namespaces and joined buckets
fn merge_into(combined: &mut QueryResults, part: QueryResults) {
    combined.append_part(part);
}
