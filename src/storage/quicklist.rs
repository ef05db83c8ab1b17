//! Paged List
//!
//! Backs the list type. Elements are stored in fixed-capacity pages that are
//! linked into a doubly-linked list, which keeps both ends O(1) while random
//! access only walks pages instead of elements.
//!
//! ```text
//!  head                                             tail
//!   │                                                 │
//!   ▼                                                 ▼
//! ┌──────────┐     ┌──────────┐     ┌──────────┐     ┌──────────┐
//! │ a b c d  │ ◀─▶ │ e f      │ ◀─▶ │ g h i j  │ ◀─▶ │ k        │
//! └──────────┘     └──────────┘     └──────────┘     └──────────┘
//! ```
//!
//! Inserting into a full page splits it at its midpoint, so an insert never
//! shifts more than half a page. A page emptied by removal is unlinked
//! immediately, so every linked page holds between 1 and `page_size`
//! elements.
//!
//! Each page is a ring buffer, so pushing or popping at either end of a
//! page never shifts its other elements.
//!
//! Pages live in an arena and link by index. Indices passed to `get`, `set`,
//! `insert` and `remove` must be in bounds; callers validate user input
//! first and a bad index panics.

use std::collections::VecDeque;

/// Default number of elements per page.
pub const DEFAULT_PAGE_SIZE: usize = 1024;

#[derive(Debug)]
struct Page<T> {
    items: VecDeque<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct PagedList<T> {
    pages: Vec<Option<Page<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    page_size: usize,
}

impl<T> PagedList<T> {
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be positive");
        Self {
            pages: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            page_size,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of linked pages.
    pub fn page_count(&self) -> usize {
        self.pages.len() - self.free.len()
    }

    fn page(&self, idx: usize) -> &Page<T> {
        match &self.pages[idx] {
            Some(page) => page,
            None => unreachable!("paged list link to freed page {}", idx),
        }
    }

    fn page_mut(&mut self, idx: usize) -> &mut Page<T> {
        match &mut self.pages[idx] {
            Some(page) => page,
            None => unreachable!("paged list link to freed page {}", idx),
        }
    }

    fn alloc(&mut self, items: VecDeque<T>, prev: Option<usize>, next: Option<usize>) -> usize {
        let page = Page { items, prev, next };
        match self.free.pop() {
            Some(idx) => {
                self.pages[idx] = Some(page);
                idx
            }
            None => {
                self.pages.push(Some(page));
                self.pages.len() - 1
            }
        }
    }

    /// Links a fresh page holding `items` directly after `after` (or at the
    /// head when `after` is `None`).
    fn link_after(&mut self, after: Option<usize>, items: VecDeque<T>) -> usize {
        let next = match after {
            Some(p) => self.page(p).next,
            None => self.head,
        };
        let idx = self.alloc(items, after, next);
        match after {
            Some(p) => self.page_mut(p).next = Some(idx),
            None => self.head = Some(idx),
        }
        match next {
            Some(n) => self.page_mut(n).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        idx
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let page = self.page(idx);
            (page.prev, page.next)
        };
        match prev {
            Some(p) => self.page_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.page_mut(n).prev = prev,
            None => self.tail = prev,
        }
        self.pages[idx] = None;
        self.free.push(idx);
    }

    fn fresh_page(&self, value: T) -> VecDeque<T> {
        let mut items = VecDeque::with_capacity(self.page_size);
        items.push_back(value);
        items
    }

    /// Finds `(page, offset)` for element `index`, walking from the closer end.
    fn locate(&self, index: usize) -> (usize, usize) {
        assert!(
            index < self.len,
            "index {} out of range for list of length {}",
            index,
            self.len
        );

        if index < self.len / 2 {
            let mut remaining = index;
            let mut cursor = self.head;
            while let Some(p) = cursor {
                let page = self.page(p);
                if remaining < page.items.len() {
                    return (p, remaining);
                }
                remaining -= page.items.len();
                cursor = page.next;
            }
        } else {
            // Distance from the tail, counted in elements after `index`.
            let mut remaining = self.len - 1 - index;
            let mut cursor = self.tail;
            while let Some(p) = cursor {
                let page = self.page(p);
                if remaining < page.items.len() {
                    return (p, page.items.len() - 1 - remaining);
                }
                remaining -= page.items.len();
                cursor = page.prev;
            }
        }
        unreachable!("page lengths disagree with list length {}", self.len)
    }

    pub fn push_back(&mut self, value: T) {
        match self.tail {
            Some(t) if self.page(t).items.len() < self.page_size => {
                self.page_mut(t).items.push_back(value);
            }
            tail => {
                let items = self.fresh_page(value);
                self.link_after(tail, items);
            }
        }
        self.len += 1;
    }

    pub fn push_front(&mut self, value: T) {
        match self.head {
            Some(h) if self.page(h).items.len() < self.page_size => {
                self.page_mut(h).items.push_front(value);
            }
            _ => {
                let items = self.fresh_page(value);
                self.link_after(None, items);
            }
        }
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let h = self.head?;
        let page = self.page_mut(h);
        let value = page.items.pop_front()?;
        let emptied = page.items.is_empty();
        if emptied {
            self.unlink(h);
        }
        self.len -= 1;
        Some(value)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        let t = self.tail?;
        let page = self.page_mut(t);
        let value = page.items.pop_back()?;
        let emptied = page.items.is_empty();
        if emptied {
            self.unlink(t);
        }
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, index: usize) -> &T {
        let (p, off) = self.locate(index);
        &self.page(p).items[off]
    }

    /// Replaces the element at `index`, returning the old value.
    pub fn set(&mut self, index: usize, value: T) -> T {
        let (p, off) = self.locate(index);
        std::mem::replace(&mut self.page_mut(p).items[off], value)
    }

    /// Inserts `value` so that it ends up at `index` (`index == len` appends).
    pub fn insert(&mut self, index: usize, value: T) {
        if index == self.len {
            self.push_back(value);
            return;
        }

        let (p, off) = self.locate(index);
        if self.page(p).items.len() < self.page_size {
            self.page_mut(p).items.insert(off, value);
            self.len += 1;
            return;
        }

        // Full page: split around the midpoint and insert into the half that
        // covers `off`.
        let mid = self.page_size / 2;
        let upper = self.page_mut(p).items.split_off(mid);
        let split = self.link_after(Some(p), upper);
        if off <= mid {
            self.page_mut(p).items.insert(off, value);
        } else {
            self.page_mut(split).items.insert(off - mid, value);
        }
        self.len += 1;
    }

    /// Removes and returns the element at `index`.
    pub fn remove(&mut self, index: usize) -> T {
        let (p, off) = self.locate(index);
        let page = self.page_mut(p);
        let value = match page.items.remove(off) {
            Some(value) => value,
            None => unreachable!("offset {} past end of page {}", off, p),
        };
        let emptied = page.items.is_empty();
        if emptied {
            self.unlink(p);
        }
        self.len -= 1;
        value
    }

    /// Removes up to `|count|` elements matching `pred`: from the head when
    /// `count > 0`, from the tail when `count < 0`, every match when zero.
    /// Returns the number removed.
    pub fn remove_matching(&mut self, count: i64, mut pred: impl FnMut(&T) -> bool) -> usize {
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let from_tail = count < 0;

        let mut removed = 0usize;
        let mut cursor = if from_tail { self.tail } else { self.head };
        while let Some(p) = cursor {
            if removed >= limit {
                break;
            }
            let page = self.page_mut(p);
            cursor = if from_tail { page.prev } else { page.next };

            let mut hits = Vec::new();
            for (off, item) in page.items.iter().enumerate() {
                if pred(item) {
                    hits.push(off);
                }
            }
            let budget = limit - removed;
            if hits.len() > budget {
                if from_tail {
                    hits.drain(..hits.len() - budget);
                } else {
                    hits.truncate(budget);
                }
            }
            for &off in hits.iter().rev() {
                page.items.remove(off);
            }
            let emptied = page.items.is_empty();

            removed += hits.len();
            self.len -= hits.len();
            if emptied {
                self.unlink(p);
            }
        }
        removed
    }

    /// Index of the first element matching `pred`.
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.iter().position(|item| pred(item))
    }

    /// Elements with index in `start..stop`.
    pub fn range(&self, start: usize, stop: usize) -> Iter<'_, T> {
        assert!(
            start <= stop && stop <= self.len,
            "range {}..{} out of bounds for list of length {}",
            start,
            stop,
            self.len
        );
        if start == stop {
            return Iter {
                list: self,
                front: None,
                front_offset: 0,
                back: None,
                back_end: 0,
                remaining: 0,
            };
        }
        let (front, front_offset) = self.locate(start);
        let (back, back_offset) = self.locate(stop - 1);
        Iter {
            list: self,
            front: Some(front),
            front_offset,
            back: Some(back),
            back_end: back_offset + 1,
            remaining: stop - start,
        }
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            front: self.head,
            front_offset: 0,
            back: self.tail,
            back_end: self.tail.map_or(0, |t| self.page(t).items.len()),
            remaining: self.len,
        }
    }
}

impl<T> Default for PagedList<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// Iterator with a cursor at each end. `back_end` is exclusive.
pub struct Iter<'a, T> {
    list: &'a PagedList<T>,
    front: Option<usize>,
    front_offset: usize,
    back: Option<usize>,
    back_end: usize,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let list: &'a PagedList<T> = self.list;
        let mut page = list.page(self.front?);
        while self.front_offset >= page.items.len() {
            self.front = page.next;
            self.front_offset = 0;
            page = list.page(self.front?);
        }
        let item = &page.items[self.front_offset];
        self.front_offset += 1;
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let list = self.list;
        let mut page = list.page(self.back?);
        while self.back_end == 0 {
            self.back = page.prev;
            page = list.page(self.back?);
            self.back_end = page.items.len();
        }
        self.back_end -= 1;
        self.remaining -= 1;
        Some(&page.items[self.back_end])
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(list: &PagedList<u32>) -> Vec<u32> {
        list.iter().copied().collect()
    }

    fn assert_pages_bounded(list: &PagedList<u32>) {
        let mut total = 0;
        let mut cursor = list.head;
        let mut prev = None;
        while let Some(p) = cursor {
            let page = list.page(p);
            assert!(!page.items.is_empty());
            assert!(page.items.len() <= list.page_size());
            assert_eq!(page.prev, prev);
            total += page.items.len();
            prev = Some(p);
            cursor = page.next;
        }
        assert_eq!(list.tail, prev);
        assert_eq!(total, list.len());
    }

    #[test]
    fn test_push_both_ends() {
        let mut list = PagedList::new(2);
        list.push_front(1);
        list.push_front(0);
        list.push_back(2);
        list.push_back(3);
        list.push_front(9);
        assert_eq!(collect(&list), vec![9, 0, 1, 2, 3]);
        assert_eq!(list.len(), 5);
        assert_pages_bounded(&list);
    }

    #[test]
    fn test_pop_unlinks_empty_pages() {
        let mut list = PagedList::new(2);
        for i in 0..5 {
            list.push_back(i);
        }
        assert_eq!(list.page_count(), 3);
        assert_eq!(list.pop_front(), Some(0));
        assert_eq!(list.pop_front(), Some(1));
        assert_eq!(list.page_count(), 2);
        assert_eq!(list.pop_back(), Some(4));
        assert_eq!(list.page_count(), 1);
        assert_eq!(collect(&list), vec![2, 3]);
        assert_eq!(list.pop_back(), Some(3));
        assert_eq!(list.pop_back(), Some(2));
        assert_eq!(list.pop_back(), None);
        assert!(list.is_empty());
        assert_eq!(list.page_count(), 0);
    }

    #[test]
    fn test_insert_splits_full_page() {
        let mut list = PagedList::new(4);
        for i in 0..4 {
            list.push_back(i * 10);
        }
        assert_eq!(list.page_count(), 1);

        list.insert(1, 5);
        assert_eq!(list.page_count(), 2);
        assert_eq!(collect(&list), vec![0, 5, 10, 20, 30]);

        list.insert(4, 25);
        assert_eq!(collect(&list), vec![0, 5, 10, 20, 25, 30]);
        list.insert(6, 99);
        assert_eq!(*list.get(6), 99);
        assert_pages_bounded(&list);
    }

    #[test]
    fn test_random_inserts_and_removes_keep_order() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut list = PagedList::new(8);
        let mut model: Vec<u32> = Vec::new();

        for n in 0..2000u32 {
            if model.is_empty() || rng.gen_bool(0.65) {
                let at = rng.gen_range(0..=model.len());
                list.insert(at, n);
                model.insert(at, n);
            } else {
                let at = rng.gen_range(0..model.len());
                assert_eq!(list.remove(at), model.remove(at));
            }
        }
        assert_eq!(collect(&list), model);
        assert_eq!(list.range(0, list.len()).count(), model.len());
        assert_pages_bounded(&list);
    }

    #[test]
    fn test_get_set_from_both_ends() {
        let mut list = PagedList::new(3);
        for i in 0..10 {
            list.push_back(i);
        }
        assert_eq!(*list.get(1), 1);
        assert_eq!(*list.get(8), 8);
        assert_eq!(list.set(8, 80), 8);
        assert_eq!(*list.get(8), 80);
    }

    #[test]
    fn test_range_is_half_open() {
        let mut list = PagedList::new(3);
        for i in 0..10 {
            list.push_back(i);
        }
        let got: Vec<u32> = list.range(2, 7).copied().collect();
        assert_eq!(got, vec![2, 3, 4, 5, 6]);
        assert_eq!(list.range(4, 4).count(), 0);
    }

    #[test]
    fn test_iterates_backwards_across_pages() {
        let mut list = PagedList::new(3);
        for i in 0..10 {
            list.push_back(i);
        }
        list.push_front(100);
        list.insert(5, 50);

        let mut expected = collect(&list);
        expected.reverse();
        assert_eq!(list.iter().rev().copied().collect::<Vec<_>>(), expected);

        let got: Vec<u32> = list.range(2, 9).rev().copied().collect();
        assert_eq!(got, vec![6, 5, 4, 50, 3, 2, 1]);

        // Both cursors meet without yielding an element twice.
        let mut iter = list.range(1, 6);
        assert_eq!(iter.next(), Some(&0));
        assert_eq!(iter.next_back(), Some(&50));
        assert_eq!(iter.next_back(), Some(&3));
        assert_eq!(iter.next(), Some(&1));
        assert_eq!(iter.next(), Some(&2));
        assert_eq!(iter.next_back(), None);
        assert_eq!(iter.next(), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_get_out_of_range_panics() {
        let list: PagedList<u32> = PagedList::new(4);
        list.get(0);
    }

    #[test]
    fn test_remove_matching_directions() {
        let build = || {
            let mut list = PagedList::new(2);
            for v in [1, 2, 1, 3, 1, 1] {
                list.push_back(v);
            }
            list
        };

        let mut head = build();
        assert_eq!(head.remove_matching(2, |v| *v == 1), 2);
        assert_eq!(collect(&head), vec![2, 3, 1, 1]);

        let mut tail = build();
        assert_eq!(tail.remove_matching(-3, |v| *v == 1), 3);
        assert_eq!(collect(&tail), vec![1, 2, 3]);

        let mut all = build();
        assert_eq!(all.remove_matching(0, |v| *v == 1), 4);
        assert_eq!(collect(&all), vec![2, 3]);
        assert_pages_bounded(&all);
    }

    #[test]
    fn test_position() {
        let mut list = PagedList::new(2);
        for v in [5, 6, 7, 6] {
            list.push_back(v);
        }
        assert_eq!(list.position(|v| *v == 6), Some(1));
        assert_eq!(list.position(|v| *v == 9), None);
    }
}
