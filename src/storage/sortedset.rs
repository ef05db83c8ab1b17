//! Sorted Set
//!
//! Pairs a member → score map (O(1) score lookup) with a [`SkipList`]
//! (ordered and rank queries). Every mutation updates both halves before
//! returning, so no caller ever sees a member in one and not the other.

use crate::storage::skiplist::{Iter, ScoreBorder, SkipList};
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
    list: SkipList<Bytes>,
}

/// `-0.0` and `0.0` are the same score.
fn canonical(score: f64) -> f64 {
    if score == 0.0 {
        0.0
    } else {
        score
    }
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Adds or re-scores `member`. Returns true if the member is new.
    pub fn add(&mut self, member: Bytes, score: f64) -> bool {
        let score = canonical(score);
        let is_new = match self.scores.get(&member) {
            Some(&old) if old.total_cmp(&score).is_eq() => return false,
            Some(&old) => {
                self.list.remove(&member, old);
                false
            }
            None => true,
        };
        self.list.insert(member.clone(), score);
        self.scores.insert(member, score);
        debug_assert_eq!(self.scores.len(), self.list.len());
        is_new
    }

    /// Removes `member`. Returns true if it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                let removed = self.list.remove(&Bytes::copy_from_slice(member), score);
                debug_assert!(removed);
                debug_assert_eq!(self.scores.len(), self.list.len());
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Zero-based rank of `member`, ascending or (with `desc`) descending.
    pub fn rank(&self, member: &[u8], desc: bool) -> Option<usize> {
        let (key, &score) = self.scores.get_key_value(member)?;
        let rank = self.list.rank(key, score)?;
        Some(if desc { self.len() - 1 - rank } else { rank })
    }

    /// Visits members with rank in `start..stop` until `f` returns false.
    ///
    /// Ranks are counted from the high end when `desc` is set. The range
    /// must already be clamped to `0..=len`.
    pub fn for_each_by_rank(
        &self,
        start: usize,
        stop: usize,
        desc: bool,
        mut f: impl FnMut(&Bytes, f64) -> bool,
    ) {
        assert!(
            start <= stop && stop <= self.len(),
            "rank range {}..{} out of bounds for {} members",
            start,
            stop,
            self.len()
        );
        if start == stop {
            return;
        }

        let from = if desc { self.len() - 1 - start } else { start };
        let iter: Iter<'_, Bytes> = self.list.iter_from(from, desc);
        for (member, score) in iter.take(stop - start) {
            if !f(member, score) {
                break;
            }
        }
    }

    /// Collects members with rank in `start..stop`.
    pub fn range_by_rank(&self, start: usize, stop: usize, desc: bool) -> Vec<(Bytes, f64)> {
        let mut out = Vec::with_capacity(stop.saturating_sub(start));
        self.for_each_by_rank(start, stop, desc, |member, score| {
            out.push((member.clone(), score));
            true
        });
        out
    }

    /// Number of members whose score lies between the borders.
    pub fn count(&self, min: &ScoreBorder, max: &ScoreBorder) -> usize {
        self.list.count_in_range(min, max)
    }

    /// Members whose score lies between the borders.
    pub fn range_by_score(
        &self,
        min: &ScoreBorder,
        max: &ScoreBorder,
        desc: bool,
    ) -> Vec<(Bytes, f64)> {
        self.list
            .range_by_score(min, max, desc)
            .into_iter()
            .map(|(member, score)| (member.clone(), score))
            .collect()
    }
}
