//! Integration tests for document mutations through the database facade.

use docstore_codec::{to_document_bytes, Value};
use docstore_core::{CoreError, IndexId, OperationOptions};
use docstore_testkit::prelude::*;

#[test]
fn stored_bytes_are_the_canonical_document() {
    let test_db = TestDatabase::memory();
    let users = test_db.documents("users");
    let trx = test_db.begin();

    let input = Value::object([
        ("_key", Value::from("alice")),
        ("name", Value::from("Alice")),
        ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
    ]);
    let result = users.insert(&trx, &input, &OperationOptions::new(), true).unwrap();
    assert_ne!(result.tick, 0);

    let handle = users.lookup(&trx, "alice").unwrap();
    let stored = users.document(&trx, "alice").unwrap();
    let body = handle.body.as_deref().unwrap();
    assert_eq!(body, to_document_bytes(&stored).unwrap().as_slice());

    assert_eq!(stored.get("_key").and_then(Value::as_text), Some("alice"));
    assert_eq!(stored.get("name").and_then(Value::as_text), Some("Alice"));
    assert_eq!(
        stored.get("_rev").and_then(Value::as_text),
        Some(handle.revision.to_string().as_str())
    );
    assert_eq!(result.new.map(|h| h.revision), Some(handle.revision));
}

#[test]
fn insert_then_remove_restores_count() {
    let test_db = TestDatabase::memory();
    let docs = test_db.documents("docs");
    let trx = test_db.begin();

    for i in 0..20 {
        docs.insert(&trx, &doc(&format!("k{i}"), i), &OperationOptions::new(), true)
            .unwrap();
    }
    assert_eq!(docs.document_count(), 20);

    for i in 0..20 {
        let result = docs
            .remove(&trx, &Value::from(format!("k{i}")), &OperationOptions::new(), true)
            .unwrap();
        assert!(result.new.is_none());
        assert!(result.old.is_some());
    }
    assert_eq!(docs.document_count(), 0);
    assert!(docs.keys(&trx).unwrap().is_empty());
    assert_eq!(docs.figures().deletions, 20);
}

#[test]
fn stale_revision_is_a_conflict_without_marker() {
    let test_db = TestDatabase::memory();
    let docs = test_db.documents("docs");
    let trx = test_db.begin();
    docs.insert(&trx, &doc("a", 1), &OperationOptions::new(), true).unwrap();
    let before = docs.markers_written();
    let current = docs.lookup(&trx, "a").unwrap().revision;

    let mut input = doc("a", 2);
    input.set("_rev", Value::from("stale"));
    let options = OperationOptions::new().ignore_revs(false);

    let err = docs.update(&trx, &input, &options, true).unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));
    let err = docs.remove(&trx, &input, &options, true).unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));

    assert_eq!(docs.markers_written(), before);
    assert_eq!(docs.lookup(&trx, "a").unwrap().revision, current);
    assert_eq!(docs.operation_stats().conflicts, 2);

    // Ignoring revisions lets the same input through.
    docs.update(&trx, &input, &OperationOptions::new(), true).unwrap();
    let stored = docs.document(&trx, "a").unwrap();
    assert_eq!(stored.get("n").and_then(Value::as_integer), Some(2));
}

#[test]
fn duplicate_key_is_rejected() {
    let test_db = TestDatabase::memory();
    let docs = test_db.documents("docs");
    let trx = test_db.begin();
    docs.insert(&trx, &doc("dup", 1), &OperationOptions::new(), true).unwrap();

    let err = docs
        .insert(&trx, &doc("dup", 2), &OperationOptions::new(), true)
        .unwrap_err();
    assert!(matches!(err, CoreError::UniqueConstraintViolated { .. }));
    assert_eq!(docs.document_count(), 1);
    let stored = docs.document(&trx, "dup").unwrap();
    assert_eq!(stored.get("n").and_then(Value::as_integer), Some(1));
}

#[test]
fn unique_index_violation_rolls_back() {
    let test_db = TestDatabase::memory();
    let docs = test_db.documents("docs");
    let trx = test_db.begin();
    let unique = docs
        .ensure_hash_index(&trx, vec!["n".to_string()], true, false)
        .unwrap();
    assert!(unique.created);

    docs.insert(&trx, &doc("a", 1), &OperationOptions::new(), true).unwrap();
    docs.insert(&trx, &doc("b", 2), &OperationOptions::new(), true).unwrap();
    let markers = docs.markers_written();

    let err = docs
        .insert(&trx, &doc("c", 1), &OperationOptions::new(), true)
        .unwrap_err();
    assert!(matches!(err, CoreError::UniqueConstraintViolated { .. }));
    assert!(matches!(
        docs.lookup(&trx, "c"),
        Err(CoreError::DocumentNotFound { .. })
    ));

    // An update into the taken value leaves the old revision in place.
    let err = docs
        .update(&trx, &doc("b", 1), &OperationOptions::new(), true)
        .unwrap_err();
    assert!(matches!(err, CoreError::UniqueConstraintViolated { .. }));

    assert_eq!(docs.markers_written(), markers);
    assert_eq!(docs.document_count(), 2);
    assert_eq!(docs.lookup_index(&trx, unique.id, &[Value::from(1)]).unwrap().len(), 1);
    assert_eq!(docs.lookup_index(&trx, unique.id, &[Value::from(2)]).unwrap().len(), 1);
    assert_eq!(docs.operation_stats().rollbacks, 2);
}

#[test]
fn key_only_update_writes_nothing() {
    let test_db = TestDatabase::memory();
    let docs = test_db.documents("docs");
    let trx = test_db.begin();
    docs.insert(&trx, &doc("a", 1), &OperationOptions::new(), true).unwrap();
    let markers = docs.markers_written();
    let revision = docs.lookup(&trx, "a").unwrap().revision;

    let result = docs
        .update(&trx, &Value::object([("_key", Value::from("a"))]), &OperationOptions::new(), true)
        .unwrap();
    assert_eq!(result.tick, 0);
    assert_eq!(docs.markers_written(), markers);
    assert_eq!(docs.lookup(&trx, "a").unwrap().revision, revision);
    assert_eq!(docs.operation_stats().noop_updates, 1);
}

#[test]
fn log_failure_leaves_no_trace() {
    let (test_db, switch) = TestDatabase::with_log_faults();
    let docs = test_db.documents("docs");
    let trx = test_db.begin();
    docs.insert(&trx, &doc("kept", 1), &OperationOptions::new(), true).unwrap();

    switch.fail_now();
    let err = docs
        .insert(&trx, &doc("lost", 2), &OperationOptions::new(), true)
        .unwrap_err();
    assert!(matches!(err, CoreError::LogWriteFailed { .. }));
    let err = docs
        .update(&trx, &doc("kept", 5), &OperationOptions::new(), true)
        .unwrap_err();
    assert!(matches!(err, CoreError::LogWriteFailed { .. }));

    assert_eq!(docs.document_count(), 1);
    assert!(matches!(
        docs.lookup(&trx, "lost"),
        Err(CoreError::DocumentNotFound { .. })
    ));
    let kept = docs.document(&trx, "kept").unwrap();
    assert_eq!(kept.get("n").and_then(Value::as_integer), Some(1));

    switch.reset();
    docs.insert(&trx, &doc("lost", 2), &OperationOptions::new(), true).unwrap();
    assert_eq!(docs.document_count(), 2);
}

#[test]
fn failed_sync_leaves_nothing_to_replay() {
    let (test_db, switch) = TestDatabase::with_log_faults();
    let synced = OperationOptions::new().wait_for_sync(true);
    {
        let docs = test_db.documents("docs");
        let trx = test_db.begin();
        docs.insert(&trx, &doc("kept", 1), &synced, true).unwrap();
        let markers = docs.markers_written();

        switch.fail_sync_now();
        let err = docs.insert(&trx, &doc("lost", 2), &synced, true).unwrap_err();
        assert!(matches!(err, CoreError::LogWriteFailed { .. }));
        let err = docs.update(&trx, &doc("kept", 5), &synced, true).unwrap_err();
        assert!(matches!(err, CoreError::LogWriteFailed { .. }));
        let err = docs
            .remove(&trx, &Value::from("kept"), &synced, true)
            .unwrap_err();
        assert!(matches!(err, CoreError::LogWriteFailed { .. }));

        assert_eq!(docs.markers_written(), markers);
        assert_eq!(docs.document_count(), 1);
        switch.reset();
    }

    let test_db = test_db.reopen();
    let docs = test_db.collection("docs").unwrap();
    let trx = test_db.begin();
    assert_eq!(docs.keys(&trx).unwrap(), vec!["kept".to_string()]);
    let kept = docs.document(&trx, "kept").unwrap();
    assert_eq!(kept.get("n").and_then(Value::as_integer), Some(1));
}

#[test]
fn edges_are_indexed_by_endpoint() {
    let test_db = TestDatabase::memory();
    test_db.documents("people");
    let knows = test_db.edges("knows");
    let trx = test_db.begin();

    knows.insert(&trx, &edge("e1", "people/a", "people/b"), &OperationOptions::new(), true)
        .unwrap();
    knows.insert(&trx, &edge("e2", "people/a", "people/c"), &OperationOptions::new(), true)
        .unwrap();
    knows.insert(&trx, &edge("e3", "people/c", "people/b"), &OperationOptions::new(), true)
        .unwrap();

    let outbound = knows
        .lookup_index(&trx, IndexId::EDGE, &[Value::from("people/a")])
        .unwrap();
    assert_eq!(outbound.len(), 2);
    let inbound = knows
        .lookup_index(&trx, IndexId::EDGE, &[Value::Null, Value::from("people/b")])
        .unwrap();
    assert_eq!(inbound.len(), 2);

    let err = knows
        .insert(&trx, &doc("plain", 1), &OperationOptions::new(), true)
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidEdgeAttribute { .. }));
}

#[test]
fn dropped_index_no_longer_answers() {
    let test_db = TestDatabase::memory();
    let docs = test_db.documents("docs");
    let trx = test_db.begin();
    let index = docs
        .ensure_skiplist_index(&trx, vec!["n".to_string()], false, false)
        .unwrap();
    let again = docs
        .ensure_skiplist_index(&trx, vec!["n".to_string()], false, false)
        .unwrap();
    assert_eq!(index.id, again.id);
    assert!(!again.created);

    assert!(docs.drop_index(&trx, index.id).unwrap());
    assert!(docs.lookup_index(&trx, index.id, &[Value::from(1)]).is_err());
    assert_eq!(docs.index_count(), 1);
}
