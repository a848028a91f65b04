//! End-to-end selector scenarios against an in-memory database

use serde_json::json;
use tern_db_core::{
    CondType, Database, IndexDef, IndexKind, OpContext, PayloadField, Value, ValueType,
};
use tern_db_query::{
    parse_dsl, select, AggType, AggregateEntry, JoinQuery, JoinType, OpType, Query, ReqTotal,
    SortEntry, StrictMode,
};

fn books_db() -> Database {
    let db = Database::in_memory();
    let books = db.create_namespace("books").unwrap();
    books
        .write(|ns| {
            ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
            ns.add_field(PayloadField::new("author_id", ValueType::String))?;
            ns.add_field(PayloadField::new("pages", ValueType::Int))?;
            let id = ns.payload_type().field_id("id").unwrap();
            let author = ns.payload_type().field_id("author_id").unwrap();
            let pages = ns.payload_type().field_id("pages").unwrap();
            ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
            ns.add_index(IndexDef::new("author_id", IndexKind::Hash, vec![author]))?;
            ns.add_index(IndexDef::new("pages", IndexKind::Ordered, vec![pages]))?;
            for (id, author, pages) in
                [(1, "A", 100), (2, "A", 300), (3, "B", 300), (4, "A", 300)]
            {
                ns.upsert(&json!({"id": id, "author_id": author, "pages": pages}))?;
            }
            Ok(())
        })
        .unwrap();
    db
}

fn add_authors(db: &Database) {
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
}

fn pk_of(doc: &serde_json::Value) -> i64 {
    doc.get("id").and_then(|v| v.as_i64()).unwrap()
}

#[test]
fn and_intersection_with_ordered_sort() {
    let db = books_db();
    let q = Query::new("books")
        .where_cond("author_id", CondType::Eq, vec![Value::String("A".into())])
        .where_cond("pages", CondType::Eq, vec![Value::Int(300)])
        .sort(SortEntry::desc("pages"));
    let res = select(&db, &q, &OpContext::new()).unwrap();
    let ids: Vec<i64> = res.to_json().iter().map(pk_of).collect();
    // tie on pages breaks by ascending row id
    assert_eq!(ids, vec![2, 4]);
}

#[test]
fn forced_sort_prefix() {
    let db = books_db();
    let q = Query::new("books").sort_forced(
        "author_id",
        false,
        vec![Value::String("B".into()), Value::String("A".into())],
    );
    let res = select(&db, &q, &OpContext::new()).unwrap();
    let authors: Vec<String> = res
        .to_json()
        .iter()
        .map(|d| d.get("author_id").unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(authors, vec!["B", "A", "A", "A"]);
}

#[test]
fn inner_join_with_condition_injection() {
    let db = books_db();
    add_authors(&db);
    let q = Query::new("books")
        .join(
            JoinQuery::new(JoinType::Inner, "authors")
                .where_cond("country", CondType::Eq, vec![Value::String("US".into())])
                .on("author_id", CondType::Eq, "id"),
        )
        .explain();
    let res = select(&db, &q, &OpContext::new()).unwrap();
    let mut ids: Vec<i64> = res.to_json().iter().map(pk_of).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 4]);

    // every result row carries its joined bucket
    for doc in res.to_json() {
        let joined = doc.get("joined").unwrap().get("authors").unwrap();
        assert_eq!(joined.as_array().unwrap().len(), 1);
        assert_eq!(joined[0].get("id").unwrap(), "A");
    }

    // the preprocessor injected the distinct author set
    let explain = res.explain.unwrap();
    assert!(explain
        .notes
        .iter()
        .any(|n| n.contains("injected") && n.contains("author_id")));
    assert_eq!(explain.join_modes[0].1, "values");
}

#[test]
fn left_join_keeps_unmatched_outer_rows() {
    let db = books_db();
    add_authors(&db);
    let q = Query::new("books").join(
        JoinQuery::new(JoinType::Left, "authors")
            .where_cond("country", CondType::Eq, vec![Value::String("US".into())])
            .on("author_id", CondType::Eq, "id"),
    );
    let res = select(&db, &q, &OpContext::new()).unwrap();
    // every outer row appears exactly once
    let ids: Vec<i64> = res.to_json().iter().map(pk_of).collect();
    assert_eq!(ids.len(), 4);
    // book 3 (author B, DE) has no joined bucket
    let doc3 = res
        .to_json()
        .into_iter()
        .find(|d| pk_of(d) == 3)
        .unwrap();
    assert!(doc3.get("joined").is_none());
}

#[test]
fn results_match_naive_reference() {
    let db = books_db();
    let q = Query::new("books")
        .where_cond("pages", CondType::Ge, vec![Value::Int(200)])
        .op_where(
            OpType::Or,
            "author_id",
            CondType::Eq,
            vec![Value::String("B".into())],
        );
    let res = select(&db, &q, &OpContext::new()).unwrap();
    let mut got: Vec<i64> = res.to_json().iter().map(pk_of).collect();
    got.sort_unstable();

    // reference: pages >= 200 OR author = B over the raw rows
    let ns = db.namespace("books").unwrap().read();
    let mut expect = Vec::new();
    for id in ns.ids() {
        let doc = ns.doc(id).unwrap();
        let pages = doc.get("pages").unwrap().as_i64().unwrap();
        let author = doc.get("author_id").unwrap().as_str().unwrap();
        if pages >= 200 || author == "B" {
            expect.push(doc.get("id").unwrap().as_i64().unwrap());
        }
    }
    expect.sort_unstable();
    assert_eq!(got, expect);
}

#[test]
fn merged_entries_and_strict_mode() {
    let db = books_db();
    // contradictory equality annihilates
    let q = Query::new("books")
        .where_cond("pages", CondType::Eq, vec![Value::Int(100)])
        .where_cond("pages", CondType::Eq, vec![Value::Int(300)]);
    let res = select(&db, &q, &OpContext::new()).unwrap();
    assert!(res.is_empty());

    // unknown field passes without strict mode (tuple path), fails with it
    let loose = Query::new("books").where_cond("nope", CondType::Eq, vec![Value::Int(1)]);
    assert!(select(&db, &loose, &OpContext::new()).unwrap().is_empty());
    let strict = loose.clone().strict(StrictMode::Names);
    assert!(select(&db, &strict, &OpContext::new()).is_err());
}

#[test]
fn aggregations_and_total() {
    let db = books_db();
    let q = Query::new("books")
        .where_cond("author_id", CondType::Eq, vec![Value::String("A".into())])
        .aggregate(AggregateEntry::new(AggType::Sum, vec!["pages".into()]))
        .req_total(ReqTotal::Enabled)
        .limit(1);
    let res = select(&db, &q, &OpContext::new()).unwrap();
    assert_eq!(res.len(), 1);
    assert_eq!(res.total_count, 3);
    assert_eq!(
        res.aggregations[0].value,
        Some(Value::Double(700.0))
    );
}

#[test]
fn projection_limits_fields() {
    let db = books_db();
    let q = Query::new("books")
        .where_cond("id", CondType::Eq, vec![Value::Int(1)])
        .select(vec!["id".into()]);
    let docs = select(&db, &q, &OpContext::new()).unwrap().to_json();
    assert_eq!(docs.len(), 1);
    let obj = docs[0].as_object().unwrap();
    assert!(obj.contains_key("id"));
    assert!(!obj.contains_key("author_id"));
    assert!(!obj.contains_key("pages"));
}

#[test]
fn dsl_round_trip_executes() {
    let db = books_db();
    let q = parse_dsl(
        r#"{
            "namespace": "books",
            "filters": [
                {"field": "author_id", "cond": "eq", "value": "A"},
                {"field": "pages", "cond": "eq", "value": 300}
            ],
            "sort": [{"field": "pages", "desc": true}]
        }"#,
    )
    .unwrap();
    let res = select(&db, &q, &OpContext::new()).unwrap();
    let ids: Vec<i64> = res.to_json().iter().map(pk_of).collect();
    assert_eq!(ids, vec![2, 4]);
}

#[test]
fn cancellation_stops_selection() {
    let db = books_db();
    let flag = tern_db_core::CancelFlag::new();
    flag.cancel();
    let ctx = OpContext::with_cancel(flag);
    let q = Query::new("books");
    let err = select(&db, &q, &ctx).unwrap_err();
    assert!(err.to_string().contains("ancelled"));
}

#[test]
fn fulltext_end_to_end_with_rank() {
    let db = Database::in_memory();
    let docs = db.create_namespace("docs").unwrap();
    docs.write(|ns| {
        ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
        ns.add_field(PayloadField::new("title", ValueType::String))?;
        let id = ns.payload_type().field_id("id").unwrap();
        let title = ns.payload_type().field_id("title").unwrap();
        ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
        ns.add_index(IndexDef::new("title_ft", IndexKind::FullText, vec![title]))?;
        ns.upsert(&json!({"id": 1, "title": "fast red car"}))?;
        ns.upsert(&json!({"id": 2, "title": "red car fast"}))?;
        ns.upsert(&json!({"id": 3, "title": "slow blue bike"}))?;
        Ok(())
    })
    .unwrap();

    let q = Query::new("docs")
        .where_cond(
            "title_ft",
            CondType::Eq,
            vec![Value::String("fast red car".into())],
        )
        .with_rank();
    let res = select(&db, &q, &OpContext::new()).unwrap();
    let docs = res.to_json();
    let ids: Vec<i64> = docs.iter().map(pk_of).collect();
    assert_eq!(ids, vec![1, 2]);
    let r0 = docs[0].get("rank()").unwrap().as_f64().unwrap();
    let r1 = docs[1].get("rank()").unwrap().as_f64().unwrap();
    assert!(r0 > r1);
}

#[test]
fn fulltext_not_is_refused() {
    let db = Database::in_memory();
    let docs = db.create_namespace("docs").unwrap();
    docs.write(|ns| {
        ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
        ns.add_field(PayloadField::new("title", ValueType::String))?;
        let id = ns.payload_type().field_id("id").unwrap();
        let title = ns.payload_type().field_id("title").unwrap();
        ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
        ns.add_index(IndexDef::new("title_ft", IndexKind::FullText, vec![title]))?;
        Ok(())
    })
    .unwrap();
    let q = Query::new("docs").op_where(
        OpType::Not,
        "title_ft",
        CondType::Eq,
        vec![Value::String("word".into())],
    );
    assert!(select(&db, &q, &OpContext::new()).is_err());
}

#[test]
fn composite_index_substitution() {
    let db = Database::in_memory();
    let books = db.create_namespace("books").unwrap();
    books
        .write(|ns| {
            ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
            ns.add_field(PayloadField::new("author_id", ValueType::String))?;
            ns.add_field(PayloadField::new("pages", ValueType::Int))?;
            let id = ns.payload_type().field_id("id").unwrap();
            let author = ns.payload_type().field_id("author_id").unwrap();
            let pages = ns.payload_type().field_id("pages").unwrap();
            ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
            ns.add_index(IndexDef::new(
                "author_id+pages",
                IndexKind::Hash,
                vec![author, pages],
            ))?;
            for (id, a, p) in [(1, "A", 100), (2, "A", 300), (3, "B", 300)] {
                ns.upsert(&json!({"id": id, "author_id": a, "pages": p}))?;
            }
            Ok(())
        })
        .unwrap();

    let q = Query::new("books")
        .where_cond("author_id", CondType::Eq, vec![Value::String("A".into())])
        .where_cond("pages", CondType::Eq, vec![Value::Int(300)])
        .explain();
    let res = select(&db, &q, &OpContext::new()).unwrap();
    let ids: Vec<i64> = res.to_json().iter().map(pk_of).collect();
    assert_eq!(ids, vec![2]);
    assert!(res
        .explain
        .unwrap()
        .notes
        .iter()
        .any(|n| n.contains("composite")));
}

#[test]
fn merge_queries_combine_namespaces() {
    let db = books_db();
    let journals = db.create_namespace("journals").unwrap();
    journals
        .write(|ns| {
            ns.add_field(PayloadField::new("id", ValueType::Int).pk())?;
            ns.add_field(PayloadField::new("pages", ValueType::Int))?;
            let id = ns.payload_type().field_id("id").unwrap();
            let pages = ns.payload_type().field_id("pages").unwrap();
            ns.add_index(IndexDef::new("id", IndexKind::Hash, vec![id]))?;
            ns.add_index(IndexDef::new("pages", IndexKind::Ordered, vec![pages]))?;
            ns.upsert(&json!({"id": 100, "pages": 900}))?;
            ns.upsert(&json!({"id": 101, "pages": 10}))?;
            Ok(())
        })
        .unwrap();

    let q = Query::new("books")
        .where_cond("pages", CondType::Ge, vec![Value::Int(300)])
        .merge(Query::new("journals").where_cond("pages", CondType::Ge, vec![Value::Int(300)]));
    let res = select(&db, &q, &OpContext::new()).unwrap();
    // unranked merge orders by (nsid, id): books rows first, then journals
    let ids: Vec<i64> = res.to_json().iter().map(pk_of).collect();
    assert_eq!(ids, vec![2, 3, 4, 100]);
}

#[test]
fn or_inner_join_keeps_rows_matching_either_side() {
    let db = books_db();
    add_authors(&db);
    // pages = 100 OR inner-join(authors where country = DE)
    let q = Query::new("books")
        .where_cond("pages", CondType::Eq, vec![Value::Int(100)])
        .join(
            JoinQuery::new(JoinType::OrInner, "authors")
                .where_cond("country", CondType::Eq, vec![Value::String("DE".into())])
                .on("author_id", CondType::Eq, "id"),
        );
    let res = select(&db, &q, &OpContext::new()).unwrap();
    let mut ids: Vec<i64> = res.to_json().iter().map(pk_of).collect();
    ids.sort_unstable();
    // book 1 via pages; book 3 via the DE author
    assert_eq!(ids, vec![1, 3]);
}
