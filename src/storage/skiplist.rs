//! Skip List
//!
//! The ordered half of a sorted set. Nodes are ordered by `(score, member)`
//! and every forward pointer carries a span (the number of level-0 nodes it
//! skips), which turns rank queries into a single top-down descent.
//!
//! ## Layout
//!
//! Nodes live in an arena (`Vec<Option<Node>>` plus a free list) and link to
//! each other by index, so removing a node can never leave a dangling
//! reference. The header is kept outside the arena; a link of `None` in a
//! predecessor position means "the header".
//!
//! ```text
//! L2  H ─────────────(2)──────────────▶ c ───────────(1)────────▶ ∅
//! L1  H ───(1)──▶ a ───────(1)───────▶ c ───(1)──▶ d ─────────▶ ∅
//! L0  H ──▶ a ──▶ b ──▶ c ──▶ d
//!           ◀──── ◀──── ◀────          (back pointers)
//! ```
//!
//! The skip list alone does not know whether a member is already present;
//! [`SortedSet`](super::sortedset::SortedSet) pairs it with a hash map and
//! keeps both in step.

use rand::Rng;
use std::cmp::Ordering;

/// Maximum tower height.
pub const MAX_LEVEL: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
struct Level {
    forward: Option<usize>,
    span: usize,
}

#[derive(Debug)]
struct Node<M> {
    member: M,
    score: f64,
    /// Previous node at level 0; `None` when the predecessor is the header.
    backward: Option<usize>,
    levels: Vec<Level>,
}

impl<M: Ord> Node<M> {
    /// True if this node sorts strictly before `(score, member)`.
    fn precedes(&self, score: f64, member: &M) -> bool {
        match self.score.total_cmp(&score) {
            Ordering::Less => true,
            Ordering::Equal => self.member < *member,
            Ordering::Greater => false,
        }
    }

    fn is(&self, score: f64, member: &M) -> bool {
        self.score.total_cmp(&score) == Ordering::Equal && self.member == *member
    }
}

/// One end of a score interval, as used by `ZCOUNT` and `ZRANGEBYSCORE`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBorder {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBorder {
    pub const NEG_INF: ScoreBorder = ScoreBorder {
        value: f64::NEG_INFINITY,
        exclusive: false,
    };

    pub const POS_INF: ScoreBorder = ScoreBorder {
        value: f64::INFINITY,
        exclusive: false,
    };

    pub fn inclusive(value: f64) -> Self {
        Self {
            value,
            exclusive: false,
        }
    }

    pub fn exclusive(value: f64) -> Self {
        Self {
            value,
            exclusive: true,
        }
    }

    /// Parses `1.5`, `(1.5`, `-inf` or `+inf`. NaN is rejected.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?;
        let (exclusive, number) = match text.strip_prefix('(') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let value = match number.to_ascii_lowercase().as_str() {
            "-inf" => f64::NEG_INFINITY,
            "+inf" | "inf" => f64::INFINITY,
            other => other.parse::<f64>().ok()?,
        };
        if value.is_nan() {
            return None;
        }
        Some(Self { value, exclusive })
    }

    /// True if `score` lies on the allowed side of this border used as a minimum.
    pub fn allows_min(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    /// True if `score` lies on the allowed side of this border used as a maximum.
    pub fn allows_max(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

/// An indexable skip list keyed by `(score, member)`.
#[derive(Debug)]
pub struct SkipList<M> {
    header: [Level; MAX_LEVEL],
    nodes: Vec<Option<Node<M>>>,
    free: Vec<usize>,
    tail: Option<usize>,
    length: usize,
    level: usize,
}

impl<M: Ord> Default for SkipList<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Ord> SkipList<M> {
    pub fn new() -> Self {
        Self {
            header: [Level::default(); MAX_LEVEL],
            nodes: Vec::new(),
            free: Vec::new(),
            tail: None,
            length: 0,
            level: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current tower height of the list.
    pub fn height(&self) -> usize {
        self.level
    }

    fn node(&self, idx: usize) -> &Node<M> {
        match &self.nodes[idx] {
            Some(node) => node,
            None => unreachable!("skip list link to freed slot {}", idx),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<M> {
        match &mut self.nodes[idx] {
            Some(node) => node,
            None => unreachable!("skip list link to freed slot {}", idx),
        }
    }

    /// Level `i` of `at`, where `None` is the header.
    fn level_at(&self, at: Option<usize>, i: usize) -> Level {
        match at {
            None => self.header[i],
            Some(idx) => self.node(idx).levels[i],
        }
    }

    fn level_at_mut(&mut self, at: Option<usize>, i: usize) -> &mut Level {
        match at {
            None => &mut self.header[i],
            Some(idx) => &mut self.node_mut(idx).levels[i],
        }
    }

    fn alloc(&mut self, node: Node<M>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn random_level() -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen_bool(0.5) {
            level += 1;
        }
        level
    }

    /// Inserts a node. The caller guarantees `member` is not already present.
    pub fn insert(&mut self, member: M, score: f64) {
        let mut update: [Option<usize>; MAX_LEVEL] = [None; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x: Option<usize> = None;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.level_at(x, i).forward {
                if !self.node(next).precedes(score, &member) {
                    break;
                }
                rank[i] += self.level_at(x, i).span;
                x = Some(next);
            }
            update[i] = x;
        }

        let level = Self::random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = None;
                self.header[i].span = self.length;
            }
            self.level = level;
        }

        let idx = self.alloc(Node {
            member,
            score,
            backward: update[0],
            levels: Vec::with_capacity(level),
        });

        for i in 0..level {
            let pred = self.level_at(update[i], i);
            let behind = rank[0] - rank[i];
            self.node_mut(idx).levels.push(Level {
                forward: pred.forward,
                span: pred.span - behind,
            });
            let pred = self.level_at_mut(update[i], i);
            pred.forward = Some(idx);
            pred.span = behind + 1;
        }

        // Untouched higher levels now skip over one more node.
        for i in level..self.level {
            self.level_at_mut(update[i], i).span += 1;
        }

        match self.node(idx).levels[0].forward {
            Some(next) => self.node_mut(next).backward = Some(idx),
            None => self.tail = Some(idx),
        }
        self.length += 1;
    }

    /// Removes the node for `(score, member)`. Returns false if absent.
    pub fn remove(&mut self, member: &M, score: f64) -> bool {
        let mut update: [Option<usize>; MAX_LEVEL] = [None; MAX_LEVEL];
        let mut x: Option<usize> = None;
        for i in (0..self.level).rev() {
            while let Some(next) = self.level_at(x, i).forward {
                if !self.node(next).precedes(score, member) {
                    break;
                }
                x = Some(next);
            }
            update[i] = x;
        }

        match self.level_at(x, 0).forward {
            Some(target) if self.node(target).is(score, member) => {
                self.unlink(target, &update);
                self.nodes[target] = None;
                self.free.push(target);
                true
            }
            _ => false,
        }
    }

    fn unlink(&mut self, idx: usize, update: &[Option<usize>; MAX_LEVEL]) {
        for i in 0..self.level {
            let own = self.node(idx).levels.get(i).copied();
            let pred = self.level_at_mut(update[i], i);
            match own {
                Some(own) if pred.forward == Some(idx) => {
                    pred.span = pred.span + own.span - 1;
                    pred.forward = own.forward;
                }
                _ => pred.span -= 1,
            }
        }

        let (next, backward) = {
            let node = self.node(idx);
            (node.levels[0].forward, node.backward)
        };
        match next {
            Some(next) => self.node_mut(next).backward = backward,
            None => self.tail = backward,
        }

        while self.level > 1 && self.header[self.level - 1].forward.is_none() {
            self.level -= 1;
        }
        self.length -= 1;
    }

    /// Zero-based rank of `(score, member)` in ascending order.
    pub fn rank(&self, member: &M, score: f64) -> Option<usize> {
        let mut traversed = 0usize;
        let mut x: Option<usize> = None;
        for i in (0..self.level).rev() {
            while let Some(next) = self.level_at(x, i).forward {
                let node = self.node(next);
                if !(node.precedes(score, member) || node.is(score, member)) {
                    break;
                }
                traversed += self.level_at(x, i).span;
                x = Some(next);
            }
            if let Some(cur) = x {
                if self.node(cur).is(score, member) {
                    return Some(traversed - 1);
                }
            }
        }
        None
    }

    /// Arena index of the node at zero-based ascending `rank`.
    fn node_at_rank(&self, rank: usize) -> Option<usize> {
        if rank >= self.length {
            return None;
        }
        let target = rank + 1;
        let mut traversed = 0usize;
        let mut x: Option<usize> = None;
        for i in (0..self.level).rev() {
            while let Some(next) = self.level_at(x, i).forward {
                let span = self.level_at(x, i).span;
                if traversed + span > target {
                    break;
                }
                traversed += span;
                x = Some(next);
            }
            if traversed == target {
                return x;
            }
        }
        None
    }

    /// Member and score at zero-based ascending `rank`.
    pub fn get_by_rank(&self, rank: usize) -> Option<(&M, f64)> {
        self.node_at_rank(rank).map(|idx| {
            let node = self.node(idx);
            (&node.member, node.score)
        })
    }

    /// Walks from the node at ascending `rank`, forwards or backwards.
    pub fn iter_from(&self, rank: usize, desc: bool) -> Iter<'_, M> {
        Iter {
            list: self,
            next: self.node_at_rank(rank),
            desc,
        }
    }

    /// Ascending iteration over every node.
    pub fn iter(&self) -> Iter<'_, M> {
        Iter {
            list: self,
            next: self.header[0].forward,
            desc: false,
        }
    }

    /// First node whose score lies within `[min, max]`.
    fn first_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> Option<usize> {
        let mut x: Option<usize> = None;
        for i in (0..self.level).rev() {
            while let Some(next) = self.level_at(x, i).forward {
                if min.allows_min(self.node(next).score) {
                    break;
                }
                x = Some(next);
            }
        }
        let candidate = self.level_at(x, 0).forward?;
        max.allows_max(self.node(candidate).score)
            .then_some(candidate)
    }

    /// Last node whose score lies within `[min, max]`.
    fn last_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> Option<usize> {
        let mut x: Option<usize> = None;
        for i in (0..self.level).rev() {
            while let Some(next) = self.level_at(x, i).forward {
                if !max.allows_max(self.node(next).score) {
                    break;
                }
                x = Some(next);
            }
        }
        let candidate = x?;
        min.allows_min(self.node(candidate).score)
            .then_some(candidate)
    }

    /// Members with scores between the borders, ascending (or descending).
    pub fn range_by_score(
        &self,
        min: &ScoreBorder,
        max: &ScoreBorder,
        desc: bool,
    ) -> Vec<(&M, f64)> {
        let start = if desc {
            self.last_in_range(min, max)
        } else {
            self.first_in_range(min, max)
        };

        Iter {
            list: self,
            next: start,
            desc,
        }
        .take_while(|(_, score)| min.allows_min(*score) && max.allows_max(*score))
        .collect()
    }

    /// Number of members with scores between the borders.
    pub fn count_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> usize {
        let first = self.first_in_range(min, max);
        let last = self.last_in_range(min, max);
        match (first, last) {
            (Some(first), Some(last)) => {
                let a = self.node(first);
                let b = self.node(last);
                match (self.rank(&a.member, a.score), self.rank(&b.member, b.score)) {
                    (Some(lo), Some(hi)) if hi >= lo => hi - lo + 1,
                    _ => 0,
                }
            }
            _ => 0,
        }
    }
}

/// Level-0 walk over a [`SkipList`].
pub struct Iter<'a, M> {
    list: &'a SkipList<M>,
    next: Option<usize>,
    desc: bool,
}

impl<'a, M: Ord> Iterator for Iter<'a, M> {
    type Item = (&'a M, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let node = self.list.node(idx);
        self.next = if self.desc {
            node.backward
        } else {
            node.levels[0].forward
        };
        Some((&node.member, node.score))
    }
}
