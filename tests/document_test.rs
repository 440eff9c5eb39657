//! Document-loop scenarios: the local update pipeline, presence-only
//! changes, snapshots racing pending changes, checkpoints, undo/redo,
//! schema and size rejection, and event fan-out.

use std::collections::HashMap;

use serde_json::json;

use cord::document::DocEvent;
use cord::pack::{DocKey, DocSnapshot};
use cord::presence::PresenceData;
use cord::schema::{Rule, RuleKind};
use cord::{
    ActorId, Change, ChangePack, ChangeSource, Checkpoint, DocError, DocStatus, Document,
    DocumentOptions, VersionVector,
};

fn actor(n: u8) -> ActorId {
    let mut bytes = [0u8; 16];
    bytes[15] = n;
    ActorId::from_bytes(bytes)
}

fn new_doc(key: &str, a: u8) -> Document {
    let mut doc = Document::new(DocKey::new(key).unwrap());
    doc.set_actor(actor(a));
    doc
}

fn presence(entries: &[(&str, serde_json::Value)]) -> PresenceData {
    entries.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

#[test]
fn update_builds_state_and_publishes_events() {
    let mut doc = new_doc("update-basic", 1);
    let all = doc.subscribe("default").unwrap();
    let scoped = doc.subscribe("$.t").unwrap();

    doc.update(|tx| {
        tx.set("$.meta", &json!({"title": "notes", "tags": ["a", "b"]}))?;
        tx.set_text("$.t")?;
        tx.edit("$.t", 0, 0, "hi")
    })
    .unwrap();

    assert_eq!(
        doc.to_sorted_json(),
        "{\"meta\":{\"tags\":[\"a\",\"b\"],\"title\":\"notes\"},\"t\":[{\"val\":\"hi\"}]}"
    );
    assert_eq!(doc.pending_changes().len(), 1);

    // One atomic batch, with everything in it.
    let batches: Vec<Vec<DocEvent>> = std::iter::from_fn(|| all.poll()).collect();
    assert_eq!(batches.len(), 1);
    let DocEvent::LocalChange { operations, actor: who, .. } = &batches[0][0] else {
        panic!("expected a local change event");
    };
    assert_eq!(*who, actor(1));
    assert_eq!(operations.len(), 3); // set + set + edit

    // The path subscription only sees ops under $.t.
    let scoped_ops = scoped.drain();
    let DocEvent::LocalChange { operations, .. } = &scoped_ops[0] else {
        panic!("expected a local change event");
    };
    assert!(operations.iter().all(|op| op.path.starts_with("$.t")));
    assert_eq!(operations.len(), 1);
}

#[test]
fn failed_mutator_rolls_back_the_clone() {
    let mut doc = new_doc("rollback", 1);
    doc.update(|tx| tx.set("$.a", &json!(1))).unwrap();
    let before = doc.to_sorted_json();

    let err = doc.update(|tx| {
        tx.set("$.b", &json!(2))?;
        Err(DocError::InvalidArgument("user bailed".into()))
    });
    assert!(err.is_err());
    assert_eq!(doc.to_sorted_json(), before);

    // The next update starts from a fresh clone and works.
    doc.update(|tx| tx.set("$.c", &json!(3))).unwrap();
    assert_eq!(doc.to_sorted_json(), "{\"a\":1,\"c\":3}");
}

#[test]
fn presence_only_change_consumes_no_lamport() {
    let mut doc = new_doc("presence-only", 1);
    doc.update(|tx| {
        tx.set_presence(presence(&[("cursor", json!(1))]));
        Ok(())
    })
    .unwrap();

    let lamport_before = doc.change_id().lamport;
    let pending_before = doc.pending_changes().len();

    doc.update(|tx| {
        tx.set_presence(presence(&[("cursor", json!(2))]));
        Ok(())
    })
    .unwrap();

    let last = doc.pending_changes().last().unwrap();
    assert!(last.is_presence_only());
    assert!(last.presence_change.is_some());
    assert_eq!(doc.change_id().lamport, lamport_before);
    assert_eq!(doc.pending_changes().len(), pending_before + 1);
    assert_eq!(doc.my_presence().unwrap()["cursor"], json!(2));

    // Undo restores the previous presence map.
    doc.undo().unwrap();
    assert_eq!(doc.my_presence().unwrap()["cursor"], json!(1));
}

#[test]
fn undo_and_redo_roundtrip_structures_and_text() {
    let mut doc = new_doc("undo-redo", 1);
    doc.update(|tx| {
        tx.set("$.cfg", &json!({"mode": "draft"}))?;
        tx.set_text("$.t")?;
        tx.edit("$.t", 0, 0, "hello")
    })
    .unwrap();
    let original = doc.to_sorted_json();

    doc.update(|tx| {
        tx.set("$.cfg", &json!({"mode": "final", "by": "me"}))?;
        tx.edit("$.t", 1, 4, "uzza")
    })
    .unwrap();
    let modified = doc.to_sorted_json();
    assert_eq!(doc.text_string("$.t").unwrap(), "huzzao");
    assert_ne!(original, modified);

    doc.undo().unwrap();
    assert_eq!(doc.to_sorted_json(), original);
    assert_eq!(doc.text_string("$.t").unwrap(), "hello");

    doc.redo().unwrap();
    assert_eq!(doc.to_sorted_json(), modified);
    assert_eq!(doc.text_string("$.t").unwrap(), "huzzao");

    // Empty stack refuses.
    doc.undo().unwrap();
    doc.undo().unwrap();
    assert!(matches!(doc.undo(), Err(DocError::Refused(_))));
}

#[test]
fn snapshot_drops_acked_and_replays_pending_changes() {
    // A server-side document provides the snapshot state.
    let mut server = new_doc("snap-doc", 9);
    server.update(|tx| tx.set("$.a", &json!(1))).unwrap();
    let snapshot = DocSnapshot {
        root: server.root().clone(),
        presences: HashMap::new(),
    };

    let mut doc = new_doc("snap-doc", 1);
    doc.update(|tx| tx.set("$.x", &json!(10))).unwrap(); // client_seq 1
    doc.update(|tx| tx.set("$.y", &json!(20))).unwrap(); // client_seq 2
    let sub = doc.subscribe("default").unwrap();

    let pack = ChangePack {
        doc_key: doc.key().clone(),
        checkpoint: Checkpoint::new(10, 1),
        is_removed: false,
        changes: vec![],
        snapshot: Some(snapshot),
        snapshot_version_vector: Some(server.change_id().version_vector.clone()),
        version_vector: server.change_id().version_vector.clone(),
    };
    doc.apply_change_pack(&pack).unwrap();

    // x (seq 1) was covered by the snapshot; y (seq 2) replays on top.
    assert_eq!(doc.pending_changes().len(), 1);
    assert_eq!(doc.to_sorted_json(), "{\"a\":1,\"y\":20}");
    assert_eq!(doc.checkpoint(), Checkpoint::new(10, 1));

    let events = sub.drain();
    let snapshots = events
        .iter()
        .filter(|ev| matches!(ev, DocEvent::Snapshot { .. }))
        .count();
    assert_eq!(snapshots, 1);
}

#[test]
fn checkpoints_only_move_forward() {
    let doc = new_doc("checkpoints", 1);
    let empty_pack = |cp: Checkpoint| ChangePack {
        doc_key: doc.key().clone(),
        checkpoint: cp,
        is_removed: false,
        changes: vec![],
        snapshot: None,
        snapshot_version_vector: None,
        version_vector: VersionVector::new(),
    };

    let p1 = empty_pack(Checkpoint::new(5, 3));
    let p2 = empty_pack(Checkpoint::new(3, 9));
    let mut doc2 = new_doc("checkpoints", 2);
    doc2.apply_change_pack(&p1).unwrap();
    assert_eq!(doc2.checkpoint(), Checkpoint::new(5, 3));
    doc2.apply_change_pack(&p2).unwrap();
    assert_eq!(doc2.checkpoint(), Checkpoint::new(5, 9));
}

#[test]
fn removed_document_rejects_writes() {
    let mut doc = new_doc("removed-doc", 1);
    doc.update(|tx| tx.set("$.a", &json!(1))).unwrap();

    let pack = ChangePack {
        doc_key: doc.key().clone(),
        checkpoint: Checkpoint::new(1, 1),
        is_removed: true,
        changes: vec![],
        snapshot: None,
        snapshot_version_vector: None,
        version_vector: VersionVector::new(),
    };
    doc.apply_change_pack(&pack).unwrap();
    assert_eq!(doc.status(), DocStatus::Removed);
    assert!(matches!(
        doc.update(|tx| tx.set("$.b", &json!(2))),
        Err(DocError::DocumentRemoved)
    ));
}

#[test]
fn schema_rules_reject_bad_updates() {
    let options = DocumentOptions {
        schema_rules: vec![Rule::new("$.title", RuleKind::String)],
        ..Default::default()
    };
    let mut doc = Document::with_options(DocKey::new("schema-doc").unwrap(), options);
    doc.set_actor(actor(1));

    doc.update(|tx| tx.set("$.title", &json!("draft"))).unwrap();

    let err = doc.update(|tx| tx.set("$.title", &json!(5)));
    assert!(matches!(err, Err(DocError::SchemaValidationFailed(_))));
    assert_eq!(doc.to_sorted_json(), "{\"title\":\"draft\"}");
}

#[test]
fn size_limit_rejects_oversized_updates() {
    let options = DocumentOptions { max_size_limit: 150, ..Default::default() };
    let mut doc = Document::with_options(DocKey::new("size-doc").unwrap(), options);
    doc.set_actor(actor(1));

    doc.update(|tx| tx.set("$.small", &json!("ok"))).unwrap();
    let before = doc.to_sorted_json();

    let err = doc.update(|tx| tx.set("$.big", &json!("x".repeat(200))));
    assert!(matches!(err, Err(DocError::SizeExceedsLimit { .. })));
    assert_eq!(doc.to_sorted_json(), before);
}

#[test]
fn reapplying_a_change_is_idempotent() {
    let mut source = new_doc("idem-doc", 1);
    source
        .update(|tx| {
            tx.set_text("$.t")?;
            tx.edit("$.t", 0, 0, "abc")
        })
        .unwrap();
    source.update(|tx| tx.edit("$.t", 1, 2, "XY")).unwrap();
    let changes: Vec<Change> = source.pending_changes().to_vec();

    let mut replica = new_doc("idem-doc", 2);
    for change in &changes {
        replica.apply_change(change, ChangeSource::Remote).unwrap();
    }
    let once = replica.to_sorted_json();
    assert_eq!(replica.text_string("$.t").unwrap(), "aXYc");

    // The second delivery of the same change must not fork any state.
    replica.apply_change(&changes[1], ChangeSource::Remote).unwrap();
    assert_eq!(replica.to_sorted_json(), once);
    replica.dbg_check();
}

#[test]
fn counters_and_arrays_work_through_the_loop() {
    let mut doc = new_doc("mixed-doc", 1);
    doc.update(|tx| {
        tx.set_counter("$.hits", cord::crdt::counter::CounterValue::Long(0))?;
        tx.set("$.list", &json!([1, 2]))?;
        tx.push("$.list", &json!(3))?;
        tx.increase("$.hits", 5)
    })
    .unwrap();
    assert_eq!(doc.to_sorted_json(), "{\"hits\":5,\"list\":[1,2,3]}");

    doc.update(|tx| {
        tx.move_after("$.list", 2, None)?; // 3 to the front
        tx.set_at("$.list", 1, &json!(9))?; // replace the 1
        tx.remove("$.list.2") // drop the 2
    })
    .unwrap();
    assert_eq!(doc.to_sorted_json(), "{\"hits\":5,\"list\":[3,9]}");

    // Increase undo is a counter-increase.
    doc.update(|tx| tx.increase("$.hits", 10)).unwrap();
    doc.undo().unwrap();
    assert_eq!(doc.to_sorted_json(), "{\"hits\":5,\"list\":[3,9]}");
}

#[test]
fn watch_stream_maintains_online_set_and_presence_events() {
    let mut doc = new_doc("watch-doc", 1);
    let others = doc.subscribe("others").unwrap();

    use cord::pack::{BroadcastBody, WatchDocEventType, WatchDocumentResponse};
    doc.apply_watch_stream(&WatchDocumentResponse::Initialization {
        client_ids: vec![actor(2)],
    });
    assert!(doc.online_clients().contains(&actor(2)));

    // A presence-only change from the watched peer: first presence seen
    // from an online client surfaces as Watched.
    let mut peer = new_doc("watch-doc", 2);
    peer.update(|tx| {
        tx.set_presence(presence(&[("name", json!("ana"))]));
        Ok(())
    })
    .unwrap();
    let change = peer.pending_changes().last().unwrap().clone();
    doc.apply_change(&change, ChangeSource::Remote).unwrap();

    let events = others.drain();
    assert!(matches!(events[0], DocEvent::Watched { actor: a, .. } if a == actor(2)));

    // Broadcast passes through with its payload.
    let broadcast = doc.subscribe("broadcast").unwrap();
    doc.apply_watch_stream(&WatchDocumentResponse::Event {
        event_type: WatchDocEventType::DocumentBroadcast,
        publisher: actor(2),
        body: Some(BroadcastBody { topic: "ping".into(), payload: b"{}".to_vec() }),
    });
    let events = broadcast.drain();
    assert!(matches!(&events[0], DocEvent::Broadcast { topic, .. } if topic.as_str() == "ping"));

    // Unwatch drops presence and announces it.
    doc.apply_watch_stream(&WatchDocumentResponse::Event {
        event_type: WatchDocEventType::DocumentUnwatched,
        publisher: actor(2),
        body: None,
    });
    assert!(!doc.online_clients().contains(&actor(2)));
    assert!(doc.presence(&actor(2)).is_none());
    let events = others.drain();
    assert!(matches!(events[0], DocEvent::Unwatched { actor: a } if a == actor(2)));
}
