// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The operation algebra: a canonical-form value type for text edits.
//!
//! An [`Operation`] is a sequence of [`Component`]s that, applied to a base
//! document of the right length, produces a target document. The type is
//! built exclusively through [`Operation::retain`], [`Operation::insert`] and
//! [`Operation::delete`], which enforce the canonical form as components are
//! appended: no two adjacent components share a kind, no component is
//! zero-length, and an `Insert` always precedes an adjacent `Delete`. Nothing
//! outside this module constructs a `Component` sequence directly, so every
//! live `Operation` is canonical by construction.

use std::collections::VecDeque;

use crate::error::{OtError, Result};

/// One step of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// Advance the cursor by `n` characters of the base document, copying
    /// them to the output.
    Retain(usize),
    /// Emit `s` into the output without consuming the base document.
    Insert(String),
    /// Consume `n` characters of the base document without emitting them.
    Delete(usize),
}

/// A canonical-form sequence of [`Component`]s transforming one string into
/// another.
///
/// Two operations are `==` iff their canonical component sequences match;
/// this crate never compares operations for semantic equivalence beyond
/// that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operation {
    components: Vec<Component>,
}

impl Operation {
    /// The empty operation (`baseLength == targetLength == 0`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a retain of `n` characters, merging with an existing trailing
    /// retain. A zero-length retain is dropped.
    pub fn retain(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        if let Some(Component::Retain(last)) = self.components.last_mut() {
            *last += n;
            return self;
        }
        self.components.push(Component::Retain(n));
        self
    }

    /// Append an insertion of `s`, merging with an existing trailing insert,
    /// and reordering ahead of a trailing delete so inserts always precede
    /// deletes in canonical form. An empty string is dropped.
    pub fn insert(&mut self, s: &str) -> &mut Self {
        if s.is_empty() {
            return self;
        }
        if let Some(Component::Insert(last)) = self.components.last_mut() {
            last.push_str(s);
            return self;
        }
        let len = self.components.len();
        if len >= 1 && matches!(self.components[len - 1], Component::Delete(_)) {
            if len >= 2 {
                if let Component::Insert(prev) = &mut self.components[len - 2] {
                    prev.push_str(s);
                    return self;
                }
            }
            self.components.insert(len - 1, Component::Insert(s.to_string()));
            return self;
        }
        self.components.push(Component::Insert(s.to_string()));
        self
    }

    /// Append a deletion of `n` characters, merging with an existing
    /// trailing delete. A trailing `Insert` needs no reordering: `Insert`
    /// followed by `Delete` is already canonical (§3 invariant #2), unlike
    /// the reverse, which [`Operation::insert`] swaps. A zero-length delete
    /// is dropped.
    pub fn delete(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        if let Some(Component::Delete(last)) = self.components.last_mut() {
            *last += n;
            return self;
        }
        self.components.push(Component::Delete(n));
        self
    }

    /// The canonical component sequence.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// The length of document this operation expects as input.
    #[must_use]
    pub fn base_len(&self) -> usize {
        self.components
            .iter()
            .map(|c| match c {
                Component::Retain(n) | Component::Delete(n) => *n,
                Component::Insert(_) => 0,
            })
            .sum()
    }

    /// The length of document this operation produces.
    #[must_use]
    pub fn target_len(&self) -> usize {
        self.components
            .iter()
            .map(|c| match c {
                Component::Retain(n) => *n,
                Component::Insert(s) => s.chars().count(),
                Component::Delete(_) => 0,
            })
            .sum()
    }

    /// True iff applying this operation changes nothing: the empty sequence
    /// or a single retain.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.components.is_empty()
            || matches!(self.components.as_slice(), [Component::Retain(_)])
    }

    /// Apply this operation to `doc`, yielding the transformed document.
    pub fn apply(&self, doc: &str) -> Result<String> {
        let chars: Vec<char> = doc.chars().collect();
        if chars.len() != self.base_len() {
            return Err(OtError::LengthMismatch {
                expected: self.base_len(),
                actual: chars.len(),
            });
        }
        let mut i = 0usize;
        let mut out = String::with_capacity(self.target_len());
        for c in &self.components {
            match c {
                Component::Retain(n) => {
                    let end = i + n;
                    if end > chars.len() {
                        return Err(OtError::LengthMismatch {
                            expected: end,
                            actual: chars.len(),
                        });
                    }
                    out.extend(&chars[i..end]);
                    i = end;
                }
                Component::Insert(s) => out.push_str(s),
                Component::Delete(n) => {
                    let end = i + n;
                    if end > chars.len() {
                        return Err(OtError::LengthMismatch {
                            expected: end,
                            actual: chars.len(),
                        });
                    }
                    i = end;
                }
            }
        }
        if i != chars.len() {
            return Err(OtError::LengthMismatch {
                expected: i,
                actual: chars.len(),
            });
        }
        Ok(out)
    }

    /// Produce the operation that undoes this one, given the document it
    /// was originally applied to.
    pub fn invert(&self, doc: &str) -> Result<Self> {
        let chars: Vec<char> = doc.chars().collect();
        if chars.len() != self.base_len() {
            return Err(OtError::LengthMismatch {
                expected: self.base_len(),
                actual: chars.len(),
            });
        }
        let mut result = Self::new();
        let mut i = 0usize;
        for c in &self.components {
            match c {
                Component::Retain(n) => {
                    result.retain(*n);
                    i += n;
                }
                Component::Insert(s) => {
                    result.delete(s.chars().count());
                }
                Component::Delete(n) => {
                    let end = i + n;
                    let removed: String = chars[i..end].iter().collect();
                    result.insert(&removed);
                    i = end;
                }
            }
        }
        Ok(result)
    }

    /// Fuse `self` followed by `other` into a single operation equivalent to
    /// applying both in sequence.
    pub fn compose(&self, other: &Self) -> Result<Self> {
        if self.target_len() != other.base_len() {
            return Err(OtError::LengthMismatch {
                expected: self.target_len(),
                actual: other.base_len(),
            });
        }
        let mut ops1: VecDeque<Component> = self.components.iter().cloned().collect();
        let mut ops2: VecDeque<Component> = other.components.iter().cloned().collect();
        let mut result = Self::new();

        loop {
            match (ops1.front().cloned(), ops2.front().cloned()) {
                (None, None) => break,
                // `self`'s deletes consume the base document and are never
                // seen by `other`, which only ever operates on `self`'s
                // target document; they pass straight through.
                (Some(Component::Delete(n)), _) => {
                    result.delete(n);
                    ops1.pop_front();
                }
                // `other`'s inserts introduce characters `self` never
                // produced, so they pass straight through independent of
                // `self`.
                (_, Some(Component::Insert(t))) => {
                    result.insert(&t);
                    ops2.pop_front();
                }
                (None, Some(_)) | (Some(_), None) => {
                    return Err(OtError::LengthMismatch {
                        expected: self.target_len(),
                        actual: other.base_len(),
                    });
                }
                (Some(a), Some(b)) => match (a, b) {
                    (Component::Retain(n1), Component::Retain(n2)) => {
                        let m = n1.min(n2);
                        result.retain(m);
                        pop_partial(&mut ops1, m);
                        pop_partial(&mut ops2, m);
                    }
                    (Component::Retain(n1), Component::Delete(n2)) => {
                        let m = n1.min(n2);
                        result.delete(m);
                        pop_partial(&mut ops1, m);
                        pop_partial(&mut ops2, m);
                    }
                    (Component::Insert(s), Component::Retain(n2)) => {
                        let m = s.chars().count().min(n2);
                        let consumed: String = s.chars().take(m).collect();
                        result.insert(&consumed);
                        pop_partial(&mut ops1, m);
                        pop_partial(&mut ops2, m);
                    }
                    (Component::Insert(s), Component::Delete(n2)) => {
                        // `self` inserts characters that `other` immediately
                        // deletes again: the net effect is nothing.
                        let m = s.chars().count().min(n2);
                        pop_partial(&mut ops1, m);
                        pop_partial(&mut ops2, m);
                    }
                    (Component::Delete(_), _) | (_, Component::Insert(_)) => unreachable!(
                        "self's deletes and other's inserts are drained before this match arm"
                    ),
                },
            }
        }
        Ok(result)
    }

    /// Transform two operations sharing a base document against each other.
    ///
    /// Returns `(a', b')` such that `a.compose(b')` and `b.compose(a')`
    /// produce the same document. When both operations insert at the same
    /// position, `a`'s insert is given priority and ends up first.
    pub fn transform(a: &Self, b: &Self) -> Result<(Self, Self)> {
        if a.base_len() != b.base_len() {
            return Err(OtError::LengthMismatch {
                expected: a.base_len(),
                actual: b.base_len(),
            });
        }
        let mut ops1: VecDeque<Component> = a.components.iter().cloned().collect();
        let mut ops2: VecDeque<Component> = b.components.iter().cloned().collect();
        let mut a_prime = Self::new();
        let mut b_prime = Self::new();

        loop {
            match (ops1.front().cloned(), ops2.front().cloned()) {
                (None, None) => break,
                (Some(Component::Insert(s)), _) => {
                    let len = s.chars().count();
                    a_prime.insert(&s);
                    b_prime.retain(len);
                    ops1.pop_front();
                }
                (_, Some(Component::Insert(t))) => {
                    let len = t.chars().count();
                    a_prime.retain(len);
                    b_prime.insert(&t);
                    ops2.pop_front();
                }
                (None, Some(_)) | (Some(_), None) => {
                    return Err(OtError::LengthMismatch {
                        expected: a.base_len(),
                        actual: b.base_len(),
                    });
                }
                (Some(x), Some(y)) => match (x, y) {
                    (Component::Retain(n1), Component::Retain(n2)) => {
                        let m = n1.min(n2);
                        a_prime.retain(m);
                        b_prime.retain(m);
                        pop_partial(&mut ops1, m);
                        pop_partial(&mut ops2, m);
                    }
                    (Component::Delete(n1), Component::Delete(n2)) => {
                        let m = n1.min(n2);
                        pop_partial(&mut ops1, m);
                        pop_partial(&mut ops2, m);
                    }
                    (Component::Delete(n1), Component::Retain(n2)) => {
                        let m = n1.min(n2);
                        a_prime.delete(m);
                        pop_partial(&mut ops1, m);
                        pop_partial(&mut ops2, m);
                    }
                    (Component::Retain(n1), Component::Delete(n2)) => {
                        let m = n1.min(n2);
                        b_prime.delete(m);
                        pop_partial(&mut ops1, m);
                        pop_partial(&mut ops2, m);
                    }
                    (Component::Insert(_), _) | (_, Component::Insert(_)) => unreachable!(
                        "inserts are drained before this match arm is reached"
                    ),
                },
            }
        }
        Ok((a_prime, b_prime))
    }
}

/// Pop the front of `queue`, pushing back whatever remains once `consumed`
/// characters have been accounted for. Shared by [`Operation::compose`] and
/// [`Operation::transform`], both of which walk two component queues in
/// lockstep and may only partially consume a component on one side before
/// the other side's component runs out. `compose`'s `(Insert, Retain)` and
/// `(Insert, Delete)` arms are the only callers that ever pass an `Insert`
/// front here, since `self`'s insert is only partially matched against
/// `other` when `other`'s retain/delete is shorter than the inserted string.
fn pop_partial(queue: &mut VecDeque<Component>, consumed: usize) {
    let front = queue.pop_front().expect("queue must be non-empty here");
    match front {
        Component::Retain(n) => {
            let remaining = n - consumed;
            if remaining > 0 {
                queue.push_front(Component::Retain(remaining));
            }
        }
        Component::Delete(n) => {
            let remaining = n - consumed;
            if remaining > 0 {
                queue.push_front(Component::Delete(remaining));
            }
        }
        Component::Insert(s) => {
            let remaining: String = s.chars().skip(consumed).collect();
            if !remaining.is_empty() {
                queue.push_front(Component::Insert(remaining));
            }
        }
    }
}

#[cfg(test)]
pub mod factories {
    //! Terse constructors for building canonical operations in tests.
    use super::Operation;

    #[must_use]
    pub fn ret(n: usize) -> Operation {
        let mut op = Operation::new();
        op.retain(n);
        op
    }

    #[must_use]
    pub fn ins(s: &str) -> Operation {
        let mut op = Operation::new();
        op.insert(s);
        op
    }

    #[must_use]
    pub fn del(n: usize) -> Operation {
        let mut op = Operation::new();
        op.delete(n);
        op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn insert_at(pos: usize, s: &str, doc_len: usize) -> Operation {
        let mut op = Operation::new();
        op.retain(pos).insert(s).retain(doc_len - pos);
        op
    }

    fn delete_at(pos: usize, n: usize, doc_len: usize) -> Operation {
        let mut op = Operation::new();
        op.retain(pos).delete(n).retain(doc_len - pos - n);
        op
    }

    #[test]
    fn builder_merges_adjacent_same_kind() {
        let mut op = Operation::new();
        op.retain(2).retain(3).insert("a").insert("b").delete(1).delete(1);
        assert_eq!(
            op.components(),
            &[
                Component::Retain(5),
                Component::Insert("ab".to_string()),
                Component::Delete(2),
            ]
        );
    }

    #[test]
    fn builder_drops_zero_length_components() {
        let mut op = Operation::new();
        op.retain(0).insert("").delete(0).retain(3);
        assert_eq!(op.components(), &[Component::Retain(3)]);
    }

    #[test]
    fn builder_reorders_delete_before_insert() {
        let mut op = Operation::new();
        op.delete(2).insert("x");
        assert_eq!(
            op.components(),
            &[Component::Insert("x".to_string()), Component::Delete(2)]
        );
    }

    #[test]
    fn builder_merges_insert_into_earlier_insert_across_delete_swap() {
        let mut op = Operation::new();
        op.insert("a").delete(2).insert("b");
        assert_eq!(
            op.components(),
            &[Component::Insert("ab".to_string()), Component::Delete(2)]
        );
    }

    #[test]
    fn apply_basic_insert() {
        let op = insert_at(1, "X", 6);
        assert_eq!(op.apply("abcdef").unwrap(), "aXbcdef");
    }

    #[test]
    fn apply_basic_delete() {
        let op = delete_at(1, 3, 6);
        assert_eq!(op.apply("abcdef").unwrap(), "aef");
    }

    #[test]
    fn apply_length_mismatch_errs() {
        let op = Operation::new().retain(5).clone();
        assert!(matches!(
            op.apply("abc"),
            Err(OtError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn invert_round_trip() {
        let doc = "To be or not to be";
        let mut op = Operation::new();
        op.retain(3).delete(1).insert("me").retain(15);
        let applied = op.apply(doc).unwrap();
        let inverse = op.invert(doc).unwrap();
        assert_eq!(inverse.apply(&applied).unwrap(), doc);
    }

    #[test]
    fn compose_matches_sequential_apply() {
        let doc = "abcdef";
        let a = insert_at(1, "X", 6);
        let mid = a.apply(doc).unwrap();
        let b = delete_at(0, 2, mid.chars().count());
        let composed = a.compose(&b).unwrap();
        assert_eq!(composed.apply(doc).unwrap(), b.apply(&mid).unwrap());
    }

    #[test]
    fn compose_cancels_an_insert_immediately_deleted_again() {
        // Type "X" at position 5, then delete that same "X": an entirely
        // ordinary local-edit sequence (buffered_op.compose(d) inside
        // ClientSession::on_local_edit hits this whenever a user backspaces
        // right after typing). The net effect on the base document is
        // nothing, so composing must not fail and must reduce to a bare
        // retain, not raise a length mismatch.
        let mut a = Operation::new();
        a.retain(5).insert("X");
        let mut b = Operation::new();
        b.retain(5).delete(1);
        assert_eq!(a.target_len(), b.base_len());

        let composed = a.compose(&b).unwrap();
        assert_eq!(composed, factories::ret(5));
        assert_eq!(composed.apply("abcde").unwrap(), "abcde");
    }

    #[test]
    fn compose_partially_deletes_a_multi_char_insert() {
        // Insert "XYZ", then only the trailing "YZ" gets deleted again;
        // the surviving "X" must remain in the composed result.
        let mut a = Operation::new();
        a.retain(2).insert("XYZ");
        let mut b = Operation::new();
        b.retain(3).delete(2);

        let composed = a.compose(&b).unwrap();
        let mut expected = Operation::new();
        expected.retain(2).insert("X");
        assert_eq!(composed, expected);
        assert_eq!(composed.apply("ab").unwrap(), "abX");
    }

    #[test]
    fn transform_disjoint_inserts_converge() {
        let a = insert_at(1, "X", 6);
        let b = insert_at(4, "Y", 6);
        let (a_prime, b_prime) = Operation::transform(&a, &b).unwrap();
        let via_a_first = a.compose(&b_prime).unwrap().apply("abcdef").unwrap();
        let via_b_first = b.compose(&a_prime).unwrap().apply("abcdef").unwrap();
        assert_eq!(via_a_first, "aXbcdYef");
        assert_eq!(via_b_first, "aXbcdYef");
    }

    #[test]
    fn transform_overlapping_deletes_cancel_common_region() {
        let a = delete_at(1, 3, 6); // "bcd"
        let b = delete_at(2, 3, 6); // "cde"
        let (a_prime, b_prime) = Operation::transform(&a, &b).unwrap();
        let via_a_first = a.compose(&b_prime).unwrap().apply("abcdef").unwrap();
        let via_b_first = b.compose(&a_prime).unwrap().apply("abcdef").unwrap();
        assert_eq!(via_a_first, "af");
        assert_eq!(via_b_first, "af");
    }

    #[test]
    fn transform_insert_tie_break_gives_a_priority() {
        let mut a = Operation::new();
        a.insert("A");
        let mut b = Operation::new();
        b.insert("B");
        let (a_prime, b_prime) = Operation::transform(&a, &b).unwrap();
        assert_eq!(a.compose(&b_prime).unwrap().apply("").unwrap(), "AB");
        assert_eq!(b.compose(&a_prime).unwrap().apply("").unwrap(), "AB");
    }

    #[test]
    fn is_noop_true_for_empty_and_single_retain() {
        assert!(Operation::new().is_noop());
        let mut only_retain = Operation::new();
        only_retain.retain(4);
        assert!(only_retain.is_noop());
        let mut not_noop = Operation::new();
        not_noop.retain(4).insert("x");
        assert!(!not_noop.is_noop());
    }

    #[test]
    fn transform_base_length_mismatch_errs() {
        let mut a = Operation::new();
        a.retain(3);
        let mut b = Operation::new();
        b.retain(4);
        assert!(matches!(
            Operation::transform(&a, &b),
            Err(OtError::LengthMismatch { .. })
        ));
    }
}
