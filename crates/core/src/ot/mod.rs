// Operational transform over the {insert, delete} operation algebra.
//
// `transform(a, b)` rebases `a` as if `b` had been applied first. The
// convergence contract (TP1): for any `a`, `b` authored against the same
// base, applying `b` then `transform(a, b)` equals applying `a` then
// `transform(b, a)`. Same-position insert ties resolve in favor of the
// lexicographically smaller client id — its text lands first — and that
// comparison must be identical everywhere an op is rebased.

use crate::shift::ShiftIndex;
use crate::types::{char_len, Operation};

/// Rebase `a` past a single concurrent operation `b`.
pub fn transform(a: &Operation, b: &Operation) -> Operation {
    let mut out = a.clone();
    match (&mut out, b) {
        (
            Operation::Insert { pos, client_id, .. },
            Operation::Insert { pos: b_pos, text: b_text, client_id: b_id, .. },
        ) => {
            if *b_pos < *pos || (*b_pos == *pos && *b_id < *client_id) {
                *pos += char_len(b_text);
            }
        }
        (
            Operation::Insert { pos, text, .. },
            Operation::Delete { pos: b_pos, len: b_len, .. },
        ) => {
            let del_end = b_pos + b_len;
            if *pos >= del_end {
                *pos -= b_len;
            } else if *pos > *b_pos {
                // Insert into a concurrently deleted range: the delete wins.
                // The op collapses to a zero-width marker at the seam; the
                // delete side absorbs the text, so both apply orders erase it.
                *pos = *b_pos;
                text.clear();
            }
        }
        (
            Operation::Delete { pos, len, .. },
            Operation::Insert { pos: b_pos, text: b_text, .. },
        ) => {
            let ins_len = char_len(b_text);
            let end = *pos + *len;
            if *b_pos <= *pos {
                *pos += ins_len;
            } else if *b_pos < end {
                *len += ins_len;
            }
        }
        (
            Operation::Delete { pos, len, .. },
            Operation::Delete { pos: b_pos, len: b_len, .. },
        ) => {
            let a_end = *pos + *len;
            let b_end = *b_pos + *b_len;
            if b_end <= *pos {
                *pos -= b_len;
            } else if *b_pos >= a_end {
                // Entirely to the right: unchanged.
            } else if *b_pos <= *pos && b_end >= a_end {
                // b swallows a.
                *pos = *b_pos;
                *len = 0;
            } else if *pos <= *b_pos && a_end >= b_end {
                // a swallows b.
                *len -= b_len;
            } else if *b_pos < *pos {
                // b overlaps a from the left.
                *pos = *b_pos;
                *len = a_end - b_end;
            } else {
                // b overlaps a from the right.
                *len = *b_pos - *pos;
            }
        }
    }
    out
}

/// Fold `op` left-to-right through a batch of prior operations.
///
/// The batch order must match the order the operations were applied in.
pub fn transform_against<'a, I>(op: &Operation, tail: I) -> Operation
where
    I: IntoIterator<Item = &'a Operation>,
{
    tail.into_iter().fold(op.clone(), |acc, b| transform(&acc, b))
}

/// Rebase `op` past `tail` using one ShiftIndex prefix-sum query.
///
/// Only valid when every tail entry's range provably stays on one side of
/// the op while the fold runs; returns `None` otherwise and the caller
/// falls back to [`transform_against`], which is authoritative.
pub fn try_rebase_with_shift<'a, I>(op: &Operation, tail: I) -> Option<Operation>
where
    I: IntoIterator<Item = &'a Operation> + Clone,
{
    let mut total_ins: u32 = 0;
    let mut total_del: u32 = 0;
    let mut max_index: usize = 0;
    for b in tail.clone() {
        match b {
            Operation::Insert { text, .. } => total_ins += char_len(text),
            Operation::Delete { len, .. } => total_del += len,
        }
        max_index = max_index.max(b.pos() as usize);
    }

    // Bounds the op's position can reach while folding; a tail entry that
    // never enters [lo, hi] interacts with the op as a pure shift.
    let lo = op.pos().saturating_sub(total_del);
    let hi = op.end() + total_ins;

    for b in tail.clone() {
        if b.is_noop() {
            continue;
        }
        let clear = match b {
            Operation::Insert { pos, .. } => *pos < lo || *pos > hi,
            Operation::Delete { pos, len, .. } => pos + len <= lo || *pos >= hi,
        };
        if !clear {
            return None;
        }
    }

    let mut index = ShiftIndex::new(max_index + 1);
    for b in tail {
        match b {
            Operation::Insert { pos, text, .. } => index.add_insert(*pos, char_len(text)),
            Operation::Delete { pos, len, .. } => index.add_delete(*pos, *len),
        }
    }

    let shift = index.query(i64::from(op.pos()) - 1);
    let mut out = op.clone();
    match &mut out {
        Operation::Insert { pos, .. } | Operation::Delete { pos, .. } => {
            *pos = (i64::from(*pos) + shift) as u32;
        }
    }
    Some(out)
}

/// Rebase `op` past an applied batch: ShiftIndex fast path when the tail is
/// independent, pairwise fold otherwise.
pub fn rebase_past_log<'a, I>(op: &Operation, tail: I) -> Operation
where
    I: IntoIterator<Item = &'a Operation> + Clone,
{
    try_rebase_with_shift(op, tail.clone()).unwrap_or_else(|| transform_against(op, tail))
}

/// Clamp an operation into the bounds of a document of `doc_len` code
/// points: positions land in `[0, doc_len]` and delete lengths shrink to
/// fit. A fully clamped-away op becomes a zero-width no-op.
pub fn clamp_to_len(op: &Operation, doc_len: u32) -> Operation {
    let mut out = op.clone();
    match &mut out {
        Operation::Insert { pos, .. } => {
            *pos = (*pos).min(doc_len);
        }
        Operation::Delete { pos, len, .. } => {
            *pos = (*pos).min(doc_len);
            *len = (*len).min(doc_len - *pos);
        }
    }
    out
}

/// Splice an operation into a plain string, clamping out-of-range
/// positions the same way the authoritative session does.
pub fn apply_to_string(op: &Operation, text: &mut String) {
    let doc_len = char_len(text);
    match clamp_to_len(op, doc_len) {
        Operation::Insert { pos, text: ins, .. } => {
            let at = byte_offset(text, pos);
            text.insert_str(at, &ins);
        }
        Operation::Delete { pos, len, .. } => {
            let start = byte_offset(text, pos);
            let end = byte_offset(text, pos + len);
            text.replace_range(start..end, "");
        }
    }
}

fn byte_offset(text: &str, char_pos: u32) -> usize {
    text.char_indices().nth(char_pos as usize).map(|(i, _)| i).unwrap_or(text.len())
}

#[cfg(test)]
mod tests;
