//! End-to-end text scenarios: concurrent edits applied in both orders on
//! independent replicas must land on identical state.

use cord::crdt::text::CrdtText;
use cord::pack::DocKey;
use cord::{ActorId, Change, ChangePack, Checkpoint, Document, TimeTicket, VersionVector};

fn actor(n: u8) -> ActorId {
    let mut bytes = [0u8; 16];
    bytes[15] = n;
    ActorId::from_bytes(bytes)
}

fn ticket(lamport: u64, delimiter: u32, a: u8) -> TimeTicket {
    TimeTicket::new(lamport, delimiter, actor(a))
}

#[test]
fn concurrent_inserts_at_same_position_converge() {
    // Actor 1 inserts "a", actor 2 concurrently inserts "b", both at index
    // 0 with the same lamport. Each replica sees the two edits in a
    // different order.
    let a_edit = ticket(1, 1, 1);
    let b_edit = ticket(1, 1, 2);
    let empty = VersionVector::new();

    let mut r1 = CrdtText::new();
    let origin = r1.index_to_pos(0).unwrap();
    r1.edit(origin, origin, &a_edit, "a", &[], Some(&empty)).unwrap();
    r1.edit(origin, origin, &b_edit, "b", &[], Some(&empty)).unwrap();

    let mut r2 = CrdtText::new();
    r2.edit(origin, origin, &b_edit, "b", &[], Some(&empty)).unwrap();
    r2.edit(origin, origin, &a_edit, "a", &[], Some(&empty)).unwrap();

    assert_eq!(r1.to_string(), r2.to_string());
    // At a shared anchor the later ticket sits nearer the anchor, so the
    // greater actor's insertion comes out first.
    assert_eq!(r1.to_string(), "ba");
    assert_eq!(r1.to_sorted_json(), r2.to_sorted_json());
}

#[test]
fn insert_into_concurrently_deleted_range() {
    // Both replicas start from "hello" seeded by actor 9. Actor 1 deletes
    // [1, 4) while actor 2, not having seen that, inserts "X" at index 3.
    let seed = ticket(1, 1, 9);
    let del = ticket(2, 1, 1);
    let ins = ticket(2, 1, 2);
    let vv_deleter: VersionVector = [(actor(9), 1), (actor(1), 2)].into_iter().collect();
    let vv_inserter: VersionVector = [(actor(9), 1), (actor(2), 2)].into_iter().collect();

    let mut ra = CrdtText::new();
    let mut rb = CrdtText::new();
    let origin = ra.index_to_pos(0).unwrap();
    ra.edit(origin, origin, &seed, "hello", &[], None).unwrap();
    rb.edit(origin, origin, &seed, "hello", &[], None).unwrap();

    // Local halves.
    let (del_from, del_to) = ra.pos_range(1, 4).unwrap();
    ra.edit(del_from, del_to, &del, "", &[], None).unwrap();
    assert_eq!(ra.to_string(), "ho");

    let (ins_at, _) = rb.pos_range(3, 3).unwrap();
    rb.edit(ins_at, ins_at, &ins, "X", &[], None).unwrap();
    assert_eq!(rb.to_string(), "helXlo");

    // Cross-delivery. The deleter never saw the insertion, so the "X" node
    // survives the delete; the insertion lands inside the tombstoned range.
    ra.edit(ins_at, ins_at, &ins, "X", &[], Some(&vv_inserter)).unwrap();
    rb.edit(del_from, del_to, &del, "", &[], Some(&vv_deleter)).unwrap();

    assert_eq!(ra.to_string(), "hXo");
    assert_eq!(rb.to_string(), "hXo");
    assert_eq!(ra.to_sorted_json(), rb.to_sorted_json());

    // Index/position mapping survives the tombstones on both replicas.
    for text in [&mut ra, &mut rb] {
        for i in 0..=3 {
            let pos = text.index_to_pos(i).unwrap();
            assert_eq!(text.pos_to_index(pos, true).unwrap(), i);
        }
    }
}

#[test]
fn delete_applied_twice_is_a_no_op() {
    let seed = ticket(1, 1, 9);
    let del = ticket(2, 1, 1);
    let vv: VersionVector = [(actor(9), 1), (actor(1), 2)].into_iter().collect();

    let mut text = CrdtText::new();
    let origin = text.index_to_pos(0).unwrap();
    text.edit(origin, origin, &seed, "abc", &[], None).unwrap();

    let (from, to) = text.pos_range(1, 2).unwrap();
    let first = text.edit(from, to, &del, "", &[], Some(&vv)).unwrap();
    assert_eq!(first.changes.len(), 1);
    assert_eq!(text.to_string(), "ac");

    // Same edit again: the causal filter sees the tombstone and passes.
    let second = text.edit(from, to, &del, "", &[], Some(&vv)).unwrap();
    assert!(second.changes.is_empty());
    assert_eq!(text.to_string(), "ac");
}

// ---- document-level exchange --------------------------------------------

fn deliver(from: &Document, seen: &mut usize, to: &mut Document) {
    let changes: Vec<Change> = from.pending_changes()[*seen..].to_vec();
    *seen = from.pending_changes().len();
    let pack = ChangePack {
        doc_key: to.key().clone(),
        checkpoint: Checkpoint::new(0, 0),
        is_removed: false,
        changes,
        snapshot: None,
        snapshot_version_vector: None,
        version_vector: VersionVector::new(),
    };
    to.apply_change_pack(&pack).unwrap();
}

#[test]
fn documents_converge_through_change_packs() {
    let key = DocKey::new("text-sync").unwrap();
    let mut doc_a = Document::new(key.clone());
    let mut doc_b = Document::new(key);
    doc_a.set_actor(actor(1));
    doc_b.set_actor(actor(2));
    let (mut seen_a, mut seen_b) = (0usize, 0usize);

    doc_a
        .update(|tx| {
            tx.set_text("$.t")?;
            tx.edit("$.t", 0, 0, "hello")
        })
        .unwrap();
    deliver(&doc_a, &mut seen_a, &mut doc_b);
    assert_eq!(doc_b.text_string("$.t").unwrap(), "hello");

    // Concurrent edits at both ends, plus styling on one side.
    doc_a.update(|tx| tx.edit("$.t", 0, 0, ">> ")).unwrap();
    doc_b.update(|tx| tx.edit("$.t", 5, 5, " <<")).unwrap();
    doc_b
        .update(|tx| tx.style("$.t", 0, 5, &[("bold", Some("true"))]))
        .unwrap();

    deliver(&doc_a, &mut seen_a, &mut doc_b);
    deliver(&doc_b, &mut seen_b, &mut doc_a);

    assert_eq!(doc_a.text_string("$.t").unwrap(), ">> hello <<");
    assert_eq!(doc_a.to_sorted_json(), doc_b.to_sorted_json());
    doc_a.dbg_check();
    doc_b.dbg_check();
}

#[test]
fn gc_purges_covered_tombstones() {
    let key = DocKey::new("gc-doc").unwrap();
    let mut doc = Document::new(key);
    doc.set_actor(actor(1));
    doc.update(|tx| {
        tx.set_text("$.t")?;
        tx.edit("$.t", 0, 0, "abc")
    })
    .unwrap();
    doc.update(|tx| tx.edit("$.t", 1, 2, "")).unwrap();
    assert_eq!(doc.text_string("$.t").unwrap(), "ac");
    assert!(doc.garbage_len() >= 1);

    // Nobody else has observed the removal yet: nothing may go.
    let empty = VersionVector::new();
    assert_eq!(doc.garbage_collect(&empty), 0);
    assert!(doc.garbage_len() >= 1);

    // Every participant (just us) has seen it: the tombstone is unlinked.
    let vv = doc.change_id().version_vector.clone();
    assert!(doc.garbage_collect(&vv) >= 1);
    assert_eq!(doc.garbage_len(), 0);
    assert_eq!(doc.text_string("$.t").unwrap(), "ac");
    doc.dbg_check();
}
