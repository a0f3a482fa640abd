use proptest::prelude::*;

use super::*;
use crate::types::ClientId;

fn ins(pos: u32, text: &str, client: &str, seq: u64) -> Operation {
    Operation::insert(pos, text, ClientId::from(client), seq)
}

fn del(pos: u32, len: u32, client: &str, seq: u64) -> Operation {
    Operation::delete(pos, len, ClientId::from(client), seq)
}

fn applied(base: &str, ops: &[Operation]) -> String {
    let mut text = base.to_owned();
    for op in ops {
        apply_to_string(op, &mut text);
    }
    text
}

/// Both replica orders for a concurrent pair: `b; a'` and `a; b'`.
fn converge(base: &str, a: &Operation, b: &Operation) -> (String, String) {
    let via_b = applied(base, &[b.clone(), transform(a, b)]);
    let via_a = applied(base, &[a.clone(), transform(b, a)]);
    (via_b, via_a)
}

// ── Insert–Insert ──────────────────────────────────────────────────

#[test]
fn insert_before_insert_is_unchanged() {
    let a = ins(1, "x", "A", 0);
    let b = ins(4, "y", "B", 0);
    assert_eq!(transform(&a, &b), a);
}

#[test]
fn insert_after_insert_shifts_right() {
    let a = ins(4, "x", "A", 0);
    let b = ins(1, "yy", "B", 0);
    assert_eq!(transform(&a, &b), ins(6, "x", "A", 0));
}

#[test]
fn same_position_tie_breaks_by_client_id() {
    let a = ins(3, "aaa", "A", 0);
    let b = ins(3, "bb", "B", 0);
    // "A" < "B": A keeps the spot, B is pushed past A's text.
    assert_eq!(transform(&a, &b), a);
    assert_eq!(transform(&b, &a), ins(6, "bb", "B", 0));
}

// ── Insert–Delete ──────────────────────────────────────────────────

#[test]
fn insert_left_of_delete_is_unchanged() {
    let a = ins(2, "x", "A", 0);
    let b = del(2, 3, "B", 0);
    assert_eq!(transform(&a, &b), a);
}

#[test]
fn insert_right_of_delete_shifts_left() {
    let a = ins(7, "x", "A", 0);
    let b = del(2, 3, "B", 0);
    assert_eq!(transform(&a, &b), ins(4, "x", "A", 0));
}

#[test]
fn insert_inside_deleted_range_collapses_to_noop_at_seam() {
    let a = ins(4, "xyz", "A", 0);
    let b = del(2, 5, "B", 0);
    assert_eq!(transform(&a, &b), ins(2, "", "A", 0));
}

// ── Delete–Insert ──────────────────────────────────────────────────

#[test]
fn delete_right_of_insert_shifts_right() {
    let a = del(4, 2, "A", 0);
    let b = ins(4, "yy", "B", 0);
    assert_eq!(transform(&a, &b), del(6, 2, "A", 0));
}

#[test]
fn delete_left_of_insert_is_unchanged() {
    let a = del(1, 2, "A", 0);
    let b = ins(3, "y", "B", 0);
    assert_eq!(transform(&a, &b), a);
}

#[test]
fn delete_absorbs_insert_inside_its_range() {
    let a = del(2, 4, "A", 0);
    let b = ins(3, "yy", "B", 0);
    assert_eq!(transform(&a, &b), del(2, 6, "A", 0));
}

// ── Delete–Delete ──────────────────────────────────────────────────

#[test]
fn disjoint_deletes() {
    let a = del(6, 2, "A", 0);
    let b = del(1, 3, "B", 0);
    assert_eq!(transform(&a, &b), del(3, 2, "A", 0));
    assert_eq!(transform(&b, &a), b);
}

#[test]
fn delete_swallowed_by_bigger_delete() {
    let a = del(3, 2, "A", 0);
    let b = del(1, 6, "B", 0);
    assert_eq!(transform(&a, &b), del(1, 0, "A", 0));
}

#[test]
fn delete_swallowing_smaller_delete() {
    let a = del(1, 6, "A", 0);
    let b = del(3, 2, "B", 0);
    assert_eq!(transform(&a, &b), del(1, 4, "A", 0));
}

#[test]
fn delete_overlapped_from_the_left() {
    let a = del(3, 4, "A", 0);
    let b = del(1, 4, "B", 0);
    assert_eq!(transform(&a, &b), del(1, 2, "A", 0));
}

#[test]
fn delete_overlapped_from_the_right() {
    let a = del(1, 4, "A", 0);
    let b = del(3, 4, "B", 0);
    assert_eq!(transform(&a, &b), del(1, 2, "A", 0));
}

#[test]
fn identical_deletes_cancel() {
    let a = del(2, 3, "A", 0);
    let b = del(2, 3, "B", 0);
    assert_eq!(transform(&a, &b), del(2, 0, "A", 0));
}

// ── Boundary behaviors ─────────────────────────────────────────────

#[test]
fn insert_at_document_edges() {
    let base = "abc";
    let a = ins(0, "<", "A", 0);
    let b = ins(3, ">", "B", 0);
    let (left, right) = converge(base, &a, &b);
    assert_eq!(left, "<abc>");
    assert_eq!(left, right);
}

#[test]
fn delete_spanning_entire_document() {
    let base = "abcdef";
    let a = del(0, 6, "A", 0);
    let b = ins(3, "x", "B", 0);
    let (left, right) = converge(base, &a, &b);
    assert_eq!(left, right);
    assert_eq!(left, "");
}

#[test]
fn zero_width_ops_transform_harmlessly() {
    let a = ins(2, "", "A", 0);
    let b = del(2, 0, "B", 0);
    assert_eq!(transform(&a, &b), a);
    assert_eq!(transform(&b, &a), b);
    let (left, right) = converge("abcd", &a, &b);
    assert_eq!(left, "abcd");
    assert_eq!(left, right);
}

#[test]
fn two_deletes_covering_whole_document() {
    let base = "abcdefgh";
    let a = del(0, 5, "A", 0);
    let b = del(3, 5, "B", 0);
    let (left, right) = converge(base, &a, &b);
    assert_eq!(left, right);
    assert_eq!(left, "");
}

// ── End-to-end scenarios ───────────────────────────────────────────

#[test]
fn concurrent_inserts_at_same_position_converge() {
    // Both authored against "hello"; tie-break puts A's text first.
    let a = ins(5, " world", "A", 0);
    let b = ins(5, "!", "B", 0);
    let (via_b, via_a) = converge("hello", &a, &b);
    assert_eq!(via_a, via_b);
    assert_eq!(via_a, "hello world!");
}

#[test]
fn insert_vs_overlapping_delete_converges() {
    let a = del(6, 5, "A", 0);
    let b = ins(6, "beautiful ", "B", 0);
    let (via_b, via_a) = converge("hello world", &a, &b);
    assert_eq!(via_a, via_b);
    assert_eq!(via_a, "hello beautiful ");
}

#[test]
fn overlapping_deletes_converge() {
    let a = del(2, 3, "A", 0);
    let b = del(3, 3, "B", 0);
    let (via_b, via_a) = converge("abcdefgh", &a, &b);
    assert_eq!(via_a, via_b);
    assert_eq!(via_a, "abgh");
}

// ── Batched transform ──────────────────────────────────────────────

#[test]
fn transform_against_folds_in_order() {
    let op = ins(10, "x", "C", 0);
    let tail = vec![ins(0, "aa", "A", 0), del(4, 2, "B", 0)];
    let folded = transform_against(&op, &tail);
    assert_eq!(folded, ins(10, "x", "C", 0));
}

#[test]
fn shift_rebase_matches_fold_on_independent_tail() {
    let op = ins(10, "x", "C", 0);
    let tail = vec![ins(1, "aa", "A", 0), del(4, 3, "A", 1), ins(20, "zz", "B", 0)];
    let fast = try_rebase_with_shift(&op, &tail).expect("tail is independent");
    assert_eq!(fast, transform_against(&op, &tail));
    assert_eq!(fast.pos(), 9);
}

#[test]
fn shift_rebase_declines_straddling_tail() {
    let op = ins(10, "x", "C", 0);
    // Deletes across the op's position can collapse it; the fast path
    // must hand over to the fold.
    let tail = vec![del(8, 5, "A", 0)];
    assert!(try_rebase_with_shift(&op, &tail).is_none());
    assert_eq!(rebase_past_log(&op, &tail), ins(8, "", "C", 0));
}

#[test]
fn shift_rebase_declines_insert_tie() {
    let op = ins(5, "x", "C", 0);
    let tail = vec![ins(5, "y", "A", 0)];
    assert!(try_rebase_with_shift(&op, &tail).is_none());
}

// ── Clamping ───────────────────────────────────────────────────────

#[test]
fn clamp_pulls_positions_into_bounds() {
    let op = ins(12, "x", "A", 0);
    assert_eq!(clamp_to_len(&op, 4).pos(), 4);

    let op = del(2, 10, "A", 0);
    assert_eq!(clamp_to_len(&op, 5), del(2, 3, "A", 0));

    let op = del(9, 3, "A", 0);
    let clamped = clamp_to_len(&op, 5);
    assert_eq!(clamped, del(5, 0, "A", 0));
    assert!(clamped.is_noop());
}

// ── Quantified invariants ──────────────────────────────────────────

fn arb_operation(base_len: u32, client: &'static str) -> impl Strategy<Value = Operation> {
    let insert = (0..=base_len, "[a-z]{0,4}")
        .prop_map(move |(pos, text)| Operation::insert(pos, text, ClientId::from(client), 0));
    let delete = (0..=base_len)
        .prop_flat_map(move |pos| (Just(pos), 0..=(base_len - pos)))
        .prop_map(move |(pos, len)| Operation::delete(pos, len, ClientId::from(client), 0));
    prop_oneof![insert, delete]
}

proptest! {
    // TP1: both transform orders reach the same document.
    #[test]
    fn tp1_convergence(
        (base, a, b) in "[a-z]{0,12}".prop_flat_map(|base| {
            let len = char_len(&base);
            (Just(base), arb_operation(len, "A"), arb_operation(len, "B"))
        }),
    ) {
        let (via_b, via_a) = converge(&base, &a, &b);
        prop_assert_eq!(via_b, via_a);
    }

    // Tie-break determinism: many clients inserting at one position end up
    // ordered by client id, whatever the arrival order.
    #[test]
    fn same_position_inserts_sort_by_client_id(
        base in "[a-z]{1,8}",
        pos_frac in 0.0f64..1.0,
        order in prop::sample::select(vec![
            vec![0usize, 1, 2, 3],
            vec![3, 2, 1, 0],
            vec![1, 3, 0, 2],
            vec![2, 0, 3, 1],
        ]),
    ) {
        let clients = ["anna", "bert", "cleo", "dora"];
        let texts = ["1", "22", "333", "4444"];
        let pos = (pos_frac * f64::from(char_len(&base))) as u32;

        let authored: Vec<Operation> = clients
            .iter()
            .zip(texts)
            .map(|(c, t)| Operation::insert(pos, t, ClientId::from(*c), 0))
            .collect();

        // Server view: fold each arrival against the already-applied log.
        let mut log: Vec<Operation> = Vec::new();
        let mut text = base.clone();
        for &i in &order {
            let rebased = transform_against(&authored[i], &log);
            apply_to_string(&rebased, &mut text);
            log.push(rebased);
        }

        let mut expected = base.clone();
        // Ids happen to sort in declaration order here.
        for (i, t) in texts.iter().enumerate() {
            let at = byte_offset(&expected, pos + texts[..i].iter().map(|s| char_len(s)).sum::<u32>());
            expected.insert_str(at, t);
        }
        prop_assert_eq!(text, expected);
    }

    // The ShiftIndex fast path agrees with the fold whenever it engages.
    #[test]
    fn shift_fast_path_agrees_with_fold(
        (base_len, op, tail) in (20u32..60).prop_flat_map(|len| {
            (
                Just(len),
                arb_operation(len, "Z"),
                prop::collection::vec(arb_operation(len, "A"), 0..6),
            )
        }),
    ) {
        let _ = base_len;
        if let Some(fast) = try_rebase_with_shift(&op, &tail) {
            prop_assert_eq!(fast, transform_against(&op, &tail));
        }
    }
}
