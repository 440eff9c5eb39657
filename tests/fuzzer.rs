//! Randomized convergence checks: two documents trade random edits through
//! change packs and must print byte-identical state after every exchange.
//!
//! Runs are seeded, so a failure reproduces by its seed.

use rand::prelude::*;
use rand::rngs::SmallRng;

use cord::pack::DocKey;
use cord::{ActorId, Change, ChangePack, Checkpoint, Document, VersionVector};

const UCHARS: [char; 12] = [
    'a', 'b', 'c', '1', '2', ' ', // ASCII
    'é', 'ß', // Latin supplements
    'Δ', 'λ', // Greek
    '⇒', '𐆚', // Arrows + an astral-plane char for good measure
];

fn random_str(len: usize, rng: &mut SmallRng) -> String {
    let mut str = String::new();
    for _ in 0..len {
        str.push(UCHARS[rng.gen_range(0..UCHARS.len())]);
    }
    str
}

fn actor(n: u8) -> ActorId {
    let mut bytes = [0u8; 16];
    bytes[15] = n;
    ActorId::from_bytes(bytes)
}

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

fn make_random_edit(doc: &mut Document, rng: &mut SmallRng) {
    doc.update(|tx| {
        let len = tx.text_len("$.t")?;
        if len == 0 || rng.gen_bool(0.6) {
            // Insert something.
            let pos = rng.gen_range(0..=len);
            let content = random_str(rng.gen_range(1..4), rng);
            tx.edit("$.t", pos, pos, &content)
        } else {
            // Delete something.
            let from = rng.gen_range(0..len);
            let to = usize::min(from + rng.gen_range(1..4), len);
            tx.edit("$.t", from, to, "")
        }
    })
    .unwrap();
}

fn run_once(seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);

    let key = DocKey::new("fuzz-doc").unwrap();
    let mut doc_a = Document::new(key.clone());
    let mut doc_b = Document::new(key);
    doc_a.set_actor(actor(1));
    doc_b.set_actor(actor(2));
    let (mut seen_a, mut seen_b) = (0usize, 0usize);

    doc_a
        .update(|tx| {
            tx.set_text("$.t")?;
            tx.edit("$.t", 0, 0, "seed text")
        })
        .unwrap();
    deliver(&doc_a, &mut seen_a, &mut doc_b);

    for round in 0..30 {
        for _ in 0..rng.gen_range(1..=3) {
            make_random_edit(&mut doc_a, &mut rng);
        }
        for _ in 0..rng.gen_range(1..=3) {
            make_random_edit(&mut doc_b, &mut rng);
        }

        deliver(&doc_a, &mut seen_a, &mut doc_b);
        deliver(&doc_b, &mut seen_b, &mut doc_a);

        assert_eq!(
            doc_a.to_sorted_json(),
            doc_b.to_sorted_json(),
            "diverged at seed {seed}, round {round}"
        );
        doc_a.dbg_check();
        doc_b.dbg_check();
    }

    // Fully synced: the pointwise-min vector covers every removal, so both
    // sides may purge - and purging must not change what anyone sees.
    let min_synced = doc_a
        .change_id()
        .version_vector
        .min(&doc_b.change_id().version_vector);
    let before = doc_a.to_sorted_json();
    doc_a.garbage_collect(&min_synced);
    doc_b.garbage_collect(&min_synced);
    assert_eq!(doc_a.to_sorted_json(), before, "gc changed visible state (seed {seed})");
    assert_eq!(doc_a.to_sorted_json(), doc_b.to_sorted_json());
    assert_eq!(doc_a.garbage_len(), doc_b.garbage_len());
    doc_a.dbg_check();
    doc_b.dbg_check();
}

#[test]
fn random_edits_converge() {
    for seed in 0..8 {
        run_once(seed);
    }
}
