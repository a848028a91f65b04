//! Streaming aggregation
//!
//! One [`Aggregator`] per aggregation request, fed once per matched row in
//! selection order; results materialize at end-of-stream. Facet and
//! Distinct use the *relaxed* value comparator: numerics bucket together by
//! value across Int/Int64/Double, and mixing strings with numerics in one
//! accumulator is rejected.

use crate::comparator::field_values;
use crate::error::{QueryError, Result};
use crate::model::{AggType, AggregateEntry, FieldRef};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::hash::{Hash, Hasher};
use tern_db_core::{Namespace, PayloadRow, Value};

/// Key wrapper with relaxed equality/hash for facet and distinct buckets
#[derive(Debug, Clone)]
struct RelaxedKey(Vec<Value>);

impl PartialEq for RelaxedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| a.relaxed_eq(b))
    }
}

impl Eq for RelaxedKey {}

impl Hash for RelaxedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            v.relaxed_hash(state);
        }
    }
}

/// One facet output bucket
#[derive(Debug, Clone, Serialize)]
pub struct FacetBucket {
    pub values: Vec<Value>,
    pub count: usize,
}

/// Materialized aggregation output
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub agg_type: AggType,
    pub fields: Vec<String>,
    /// Sum/Avg/Min/Max/Count scalar result
    pub value: Option<Value>,
    pub facets: Vec<FacetBucket>,
    pub distincts: Vec<Vec<Value>>,
    /// Set for CountCached results served from a warm cache
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueClass {
    Numeric,
    String,
    Other,
}

fn class_of(v: &Value) -> ValueClass {
    match v {
        Value::Int(_) | Value::Int64(_) | Value::Double(_) => ValueClass::Numeric,
        Value::String(_) => ValueClass::String,
        _ => ValueClass::Other,
    }
}

/// Streaming state for one aggregation request
#[derive(Debug)]
pub struct Aggregator {
    entry: AggregateEntry,
    fields: Vec<FieldRef>,
    sum: f64,
    hit_count: usize,
    min: Option<Value>,
    max: Option<Value>,
    facets: FxHashMap<RelaxedKey, usize>,
    /// Order-preserving distinct set
    distinct_seen: FxHashMap<RelaxedKey, ()>,
    distinct_order: Vec<Vec<Value>>,
    seen_class: Option<ValueClass>,
}

impl Aggregator {
    pub fn new(ns: &Namespace, entry: AggregateEntry) -> Result<Self> {
        match entry.agg_type {
            AggType::Sum | AggType::Avg | AggType::Min | AggType::Max => {
                if entry.fields.len() != 1 {
                    return Err(QueryError::InvalidAggregation(format!(
                        "{:?} requires exactly one field",
                        entry.agg_type
                    )));
                }
            }
            AggType::Facet | AggType::Distinct => {
                if entry.fields.is_empty() {
                    return Err(QueryError::InvalidAggregation(format!(
                        "{:?} requires at least one field",
                        entry.agg_type
                    )));
                }
            }
            AggType::Count | AggType::CountCached => {}
        }
        let mut fields = Vec::with_capacity(entry.fields.len());
        for name in &entry.fields {
            let mut fr = FieldRef::named(name.clone());
            if let Some(ix) = ns.index_no(name) {
                fr.index_no = Some(ix);
                let def = ns.indexes()[ix].def();
                if !def.is_composite() {
                    fr.field = def.fields.first().copied();
                }
            } else if let Some(f) = ns.payload_type().field_id(name) {
                fr.field = Some(f);
            }
            fields.push(fr);
        }
        Ok(Self {
            entry,
            fields,
            sum: 0.0,
            hit_count: 0,
            min: None,
            max: None,
            facets: FxHashMap::default(),
            distinct_seen: FxHashMap::default(),
            distinct_order: Vec::new(),
            seen_class: None,
        })
    }

    fn check_class(&mut self, values: &[Value]) -> Result<()> {
        for v in values {
            let c = class_of(v);
            if c == ValueClass::Other {
                continue;
            }
            match self.seen_class {
                None => self.seen_class = Some(c),
                Some(prev) if prev != c => {
                    return Err(QueryError::InvalidAggregation(format!(
                        "cannot mix string and numeric values in {:?} over '{}'",
                        self.entry.agg_type,
                        self.entry.fields.join(",")
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Feed one matched row
    pub fn aggregate(&mut self, ns: &Namespace, row: &PayloadRow) -> Result<()> {
        match self.entry.agg_type {
            AggType::Count | AggType::CountCached => {
                self.hit_count += 1;
                return Ok(());
            }
            _ => {}
        }
        let first = field_values(ns, row, &self.fields[0]);
        match self.entry.agg_type {
            AggType::Sum | AggType::Avg => {
                for v in &first {
                    let x = match v {
                        Value::Int(i) => *i as f64,
                        Value::Int64(i) => *i as f64,
                        Value::Double(d) => *d,
                        Value::Null => continue,
                        other => {
                            return Err(QueryError::InvalidAggregation(format!(
                                "cannot sum non-numeric value '{}' of '{}'",
                                other, self.entry.fields[0]
                            )))
                        }
                    };
                    self.sum += x;
                    self.hit_count += 1;
                }
            }
            AggType::Min | AggType::Max => {
                for v in first {
                    if matches!(v, Value::Null) {
                        continue;
                    }
                    match self.entry.agg_type {
                        AggType::Min => {
                            if self.min.as_ref().map(|m| v < *m).unwrap_or(true) {
                                self.min = Some(v);
                            }
                        }
                        _ => {
                            if self.max.as_ref().map(|m| v > *m).unwrap_or(true) {
                                self.max = Some(v);
                            }
                        }
                    }
                }
            }
            AggType::Facet => {
                let key = self.row_key(ns, row);
                self.check_class(&key)?;
                *self.facets.entry(RelaxedKey(key)).or_insert(0) += 1;
            }
            AggType::Distinct => {
                let key = self.row_key(ns, row);
                self.check_class(&key)?;
                let k = RelaxedKey(key.clone());
                if self.distinct_seen.insert(k, ()).is_none() {
                    self.distinct_order.push(key);
                }
            }
            AggType::Count | AggType::CountCached => unreachable!(),
        }
        Ok(())
    }

    fn row_key(&self, ns: &Namespace, row: &PayloadRow) -> Vec<Value> {
        self.fields
            .iter()
            .map(|fr| {
                let vals = field_values(ns, row, fr);
                match vals.len() {
                    0 => Value::Null,
                    1 => vals.into_iter().next().expect("len checked"),
                    _ => Value::Tuple(vals),
                }
            })
            .collect()
    }

    /// Materialize at end-of-stream
    pub fn result(&self) -> AggregationResult {
        let mut out = AggregationResult {
            agg_type: self.entry.agg_type,
            fields: self.entry.fields.clone(),
            value: None,
            facets: Vec::new(),
            distincts: Vec::new(),
            cached: false,
        };
        match self.entry.agg_type {
            AggType::Sum => out.value = Some(Value::Double(self.sum)),
            AggType::Avg => {
                out.value = Some(Value::Double(if self.hit_count == 0 {
                    0.0
                } else {
                    self.sum / self.hit_count as f64
                }))
            }
            AggType::Min => out.value = self.min.clone(),
            AggType::Max => out.value = self.max.clone(),
            AggType::Count => out.value = Some(Value::Int64(self.hit_count as i64)),
            AggType::CountCached => {
                out.value = Some(Value::Int64(self.hit_count as i64));
                out.cached = true;
            }
            AggType::Facet => {
                let mut buckets: Vec<FacetBucket> = self
                    .facets
                    .iter()
                    .map(|(k, &count)| FacetBucket {
                        values: k.0.clone(),
                        count,
                    })
                    .collect();
                self.sort_facets(&mut buckets);
                let offset = self.entry.offset.min(buckets.len());
                buckets.drain(..offset);
                if let Some(limit) = self.entry.limit {
                    buckets.truncate(limit);
                }
                out.facets = buckets;
            }
            AggType::Distinct => out.distincts = self.distinct_order.clone(),
        }
        out
    }

    fn sort_facets(&self, buckets: &mut [FacetBucket]) {
        let sort = &self.entry.sort;
        buckets.sort_by(|a, b| {
            for (field, desc) in sort {
                let ord = if field == "count" {
                    a.count.cmp(&b.count)
                } else {
                    match self.entry.fields.iter().position(|f| f == field) {
                        Some(pos) => a.values[pos].cmp(&b.values[pos]),
                        None => std::cmp::Ordering::Equal,
                    }
                };
                let ord = if *desc { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            // deterministic fallback
            a.values.cmp(&b.values)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tern_db_core::{IndexDef, IndexKind, PayloadField, ValueType};

    fn ns() -> Namespace {
        let mut ns = Namespace::new("books", 1);
        ns.add_field(PayloadField::new("id", ValueType::Int).pk()).unwrap();
        ns.add_field(PayloadField::new("author_id", ValueType::String)).unwrap();
        ns.add_field(PayloadField::new("pages", ValueType::Int)).unwrap();
        let id = ns.payload_type().field_id("id").unwrap();
        ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id])).unwrap();
        for (id, a, p) in [(1, "A", 100), (2, "A", 300), (3, "B", 300), (4, "A", 300)] {
            ns.upsert(&json!({"id": id, "author_id": a, "pages": p})).unwrap();
        }
        ns
    }

    fn run(ns: &Namespace, entry: AggregateEntry) -> AggregationResult {
        let mut agg = Aggregator::new(ns, entry).unwrap();
        for id in ns.ids() {
            agg.aggregate(ns, ns.row(id).unwrap()).unwrap();
        }
        agg.result()
    }

    #[test]
    fn sum_and_avg() {
        let ns = ns();
        let sum = run(&ns, AggregateEntry::new(AggType::Sum, vec!["pages".into()]));
        assert_eq!(sum.value, Some(Value::Double(1000.0)));
        let avg = run(&ns, AggregateEntry::new(AggType::Avg, vec!["pages".into()]));
        assert_eq!(avg.value, Some(Value::Double(250.0)));
    }

    #[test]
    fn min_max_keep_declared_type() {
        let ns = ns();
        let min = run(&ns, AggregateEntry::new(AggType::Min, vec!["pages".into()]));
        assert_eq!(min.value, Some(Value::Int(100)));
        let max = run(&ns, AggregateEntry::new(AggType::Max, vec!["pages".into()]));
        assert_eq!(max.value, Some(Value::Int(300)));
    }

    #[test]
    fn facet_sorted_by_count_desc() {
        let ns = ns();
        let mut entry = AggregateEntry::new(AggType::Facet, vec!["author_id".into()]);
        entry.sort = vec![("count".into(), true)];
        let res = run(&ns, entry);
        assert_eq!(res.facets.len(), 2);
        assert_eq!(res.facets[0].values, vec![Value::String("A".into())]);
        assert_eq!(res.facets[0].count, 3);
    }

    #[test]
    fn facet_limit_offset() {
        let ns = ns();
        let mut entry = AggregateEntry::new(AggType::Facet, vec!["pages".into()]);
        entry.sort = vec![("pages".into(), false)];
        entry.limit = Some(1);
        entry.offset = 1;
        let res = run(&ns, entry);
        assert_eq!(res.facets.len(), 1);
        assert_eq!(res.facets[0].values, vec![Value::Int(300)]);
    }

    #[test]
    fn distinct_preserves_first_seen_order() {
        let ns = ns();
        let res = run(
            &ns,
            AggregateEntry::new(AggType::Distinct, vec!["pages".into()]),
        );
        assert_eq!(
            res.distincts,
            vec![vec![Value::Int(100)], vec![Value::Int(300)]]
        );
    }

    #[test]
    fn distinct_relaxes_numeric_tags() {
        let mut ns = Namespace::new("t", 1);
        ns.add_field(PayloadField::new("id", ValueType::Int).pk()).unwrap();
        ns.add_field(PayloadField::new("x", ValueType::Double)).unwrap();
        let id = ns.payload_type().field_id("id").unwrap();
        ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id])).unwrap();
        ns.upsert(&json!({"id": 1, "x": 1.0})).unwrap();
        ns.upsert(&json!({"id": 2, "x": 1})).unwrap();
        let res = run(&ns, AggregateEntry::new(AggType::Distinct, vec!["x".into()]));
        assert_eq!(res.distincts.len(), 1);
    }

    #[test]
    fn mixing_string_and_numeric_fails() {
        let mut ns = Namespace::new("t", 1);
        ns.add_field(PayloadField::new("id", ValueType::Int).pk()).unwrap();
        let id = ns.payload_type().field_id("id").unwrap();
        ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id])).unwrap();
        // 'y' is unindexed and untyped: values arrive as-is from the tuple
        ns.upsert(&json!({"id": 1, "y": 1})).unwrap();
        ns.upsert(&json!({"id": 2, "y": "one"})).unwrap();
        let mut agg = Aggregator::new(
            &ns,
            AggregateEntry::new(AggType::Distinct, vec!["y".into()]),
        )
        .unwrap();
        let mut failed = false;
        for id in ns.ids() {
            if agg.aggregate(&ns, ns.row(id).unwrap()).is_err() {
                failed = true;
            }
        }
        assert!(failed);
    }
}
