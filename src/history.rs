//! Fixed-capacity, most-recent-first history.

use std::collections::vec_deque::{self, VecDeque};

/// Sequence with a size limit. Pushing past the limit evicts the oldest entry.
///
/// Index 0 is the most recent entry; the back is the oldest.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Insert at the front; if the limit is exceeded the oldest entry is dropped and returned.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.entries.push_front(item);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Overwrite the oldest entry matching `pred`. Returns `false` if nothing matched.
    pub fn replace_last<P>(&mut self, mut pred: P, value: T) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        match self.entries.iter_mut().rev().find(|e| pred(&**e)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Remove the oldest entry matching `pred`.
    pub fn remove_last<P>(&mut self, mut pred: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        let idx = self.entries.iter().rposition(|e| pred(e))?;
        self.entries.remove(idx)
    }

    /// Most recent first.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<'a, T> IntoIterator for &'a BoundedHistory<T> {
    type Item = &'a T;
    type IntoIter = vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(h: &BoundedHistory<u32>) -> Vec<u32> {
        h.iter().copied().collect()
    }

    #[test]
    fn push_keeps_most_recent_first() {
        let mut h = BoundedHistory::new(3);
        h.push(1);
        h.push(2);
        assert_eq!(collect(&h), vec![2, 1]);
    }

    #[test]
    fn push_evicts_oldest_over_capacity() {
        let mut h = BoundedHistory::new(2);
        assert_eq!(h.push(1), None);
        assert_eq!(h.push(2), None);
        assert_eq!(h.push(3), Some(1));
        assert_eq!(collect(&h), vec![3, 2]);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn replace_last_targets_oldest_match() {
        let mut h = BoundedHistory::new(4);
        for v in [0, 5, 0, 7] {
            h.push(v);
        }
        // front to back: 7, 0, 5, 0
        assert!(h.replace_last(|v| *v == 0, 9));
        assert_eq!(collect(&h), vec![7, 0, 5, 9]);
        assert!(!h.replace_last(|v| *v == 42, 1));
    }

    #[test]
    fn remove_last_targets_oldest_match() {
        let mut h = BoundedHistory::new(4);
        for v in [0, 5, 0, 7] {
            h.push(v);
        }
        assert_eq!(h.remove_last(|v| *v == 0), Some(0));
        assert_eq!(collect(&h), vec![7, 0, 5]);
        assert_eq!(h.remove_last(|v| *v == 42), None);
    }

    #[test]
    fn capacity_is_fixed() {
        let mut h = BoundedHistory::new(1);
        for v in 0..10 {
            h.push(v);
        }
        assert_eq!(h.capacity(), 1);
        assert_eq!(collect(&h), vec![9]);
        assert!(!h.is_empty());
    }
}
