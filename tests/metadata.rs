use featurestore::memory::MemoryServer;
use featurestore::session::MapCondition;
use featurestore::{MapAnnotations, TypedCondition, TypedValue};
use std::collections::BTreeMap;

fn strings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn string_maps_are_queried_within_the_namespace() {
    let server = MemoryServer::new();
    let session = server.session(1);
    let ours = MapAnnotations::new(session.clone(), Some("features/meta".into()));
    let theirs = MapAnnotations::new(session.clone(), Some("elsewhere".into()));
    let unscoped = MapAnnotations::new(session, None);

    let a = ours
        .create_map_annotation(&strings(&[("stain", "dapi"), ("plate", "p1")]))
        .expect("create a");
    let b = ours
        .create_map_annotation(&strings(&[("stain", "gfp"), ("plate", "p1")]))
        .expect("create b");
    theirs
        .create_map_annotation(&strings(&[("stain", "dapi")]))
        .expect("create other");

    let dapi = BTreeMap::from([("stain".to_string(), MapCondition::Eq("dapi".into()))]);
    let found = ours.query_by_map_annotation(&dapi).expect("query");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, a);
    assert_eq!(found[0].values["plate"], "p1");
    assert_eq!(unscoped.query_by_map_annotation(&dapi).expect("query").len(), 2);

    let either = BTreeMap::from([
        ("stain".to_string(), MapCondition::In(vec!["dapi".into(), "gfp".into()])),
        ("plate".to_string(), MapCondition::Eq("p1".into())),
    ]);
    let ids: Vec<i64> = ours
        .query_by_map_annotation(&either)
        .expect("query")
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![a, b]);

    let missing_key = BTreeMap::from([("well".to_string(), MapCondition::Eq("A1".into()))]);
    assert!(ours.query_by_map_annotation(&missing_key).expect("query").is_empty());
}

#[test]
fn typed_maps_round_trip_through_tags() {
    let server = MemoryServer::new();
    let meta = MapAnnotations::new(server.session(1), Some("typed".into()));
    let values = BTreeMap::from([
        ("done".to_string(), TypedValue::from(true)),
        ("count".to_string(), TypedValue::from(12i64)),
        ("scale".to_string(), TypedValue::from(0.5)),
        ("label".to_string(), TypedValue::from("cells")),
    ]);
    let id = meta.create_typed(&values).expect("create");
    meta.create_typed(&BTreeMap::from([("count".to_string(), TypedValue::Int(13))]))
        .expect("create other");

    let stored = meta
        .query_by_map_annotation(&BTreeMap::new())
        .expect("raw query");
    let raw = stored.iter().find(|m| m.id == id).expect("stored");
    assert_eq!(raw.values["count"], "int:12");
    assert_eq!(raw.values["done"], "bool:True");

    let conditions = BTreeMap::from([(
        "count".to_string(),
        TypedCondition::In(vec![TypedValue::Int(12), TypedValue::Int(99)]),
    )]);
    let found = meta.query_typed(&conditions).expect("typed query");
    assert_eq!(found, vec![(id, values)]);
}

#[test]
fn untyped_values_fail_typed_queries() {
    let server = MemoryServer::new();
    let meta = MapAnnotations::new(server.session(1), Some("mixed".into()));
    meta.create_map_annotation(&strings(&[("count", "12")]))
        .expect("create");
    let err = meta.query_typed(&BTreeMap::new()).expect_err("untagged");
    assert_eq!(err.code_str(), "usage");
}
