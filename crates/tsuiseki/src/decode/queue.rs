//! A max-priority queue with stable ordering.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    fmt,
};

use tsuiseki_geom::num::TotalF32;

struct Slot<T> {
    key: (TotalF32, Reverse<u64>),
    item: T,
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// A max-heap of items ranked by a scoring function.
///
/// [`PriorityQueue::pop`] returns the item with the highest score. Items with equal scores are
/// returned in insertion order.
pub struct PriorityQueue<T, F> {
    heap: BinaryHeap<Slot<T>>,
    score: F,
    next_seq: u64,
}

impl<T, F: Fn(&T) -> f32> PriorityQueue<T, F> {
    pub fn new(score: F) -> Self {
        Self::with_capacity(0, score)
    }

    pub fn with_capacity(capacity: usize, score: F) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            score,
            next_seq: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        let key = (TotalF32((self.score)(&item)), Reverse(self.next_seq));
        self.next_seq += 1;
        self.heap.push(Slot { key, item });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|slot| slot.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|slot| &slot.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T, F: Fn(&T) -> f32> Extend<T> for PriorityQueue<T, F> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

impl<T, F> fmt::Debug for PriorityQueue<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_highest_first() {
        let mut queue = PriorityQueue::new(|v: &f32| *v);
        queue.extend([0.3, 0.9, -1.0, 0.5]);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.peek(), Some(&0.9));

        let order = std::iter::from_fn(|| queue.pop()).collect::<Vec<_>>();
        assert_eq!(order, [0.9, 0.5, 0.3, -1.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn ties_pop_in_insertion_order() {
        let mut queue = PriorityQueue::new(|&(score, _): &(f32, char)| score);
        queue.extend([(0.5, 'a'), (0.7, 'b'), (0.5, 'c'), (0.7, 'd'), (0.5, 'e')]);
        let order = std::iter::from_fn(|| queue.pop())
            .map(|(_, id)| id)
            .collect::<String>();
        assert_eq!(order, "bdace");
    }

    #[test]
    fn stable_with_random_ties() {
        let mut rng = fastrand::Rng::with_seed(9);
        let mut queue = PriorityQueue::with_capacity(500, |&(score, _): &(u8, usize)| score as f32);
        for i in 0..500 {
            queue.push((rng.u8(0..4), i));
        }
        let popped = std::iter::from_fn(|| queue.pop()).collect::<Vec<_>>();
        for pair in popped.windows(2) {
            let ((sa, ia), (sb, ib)) = (pair[0], pair[1]);
            assert!(sa > sb || (sa == sb && ia < ib), "{pair:?}");
        }
    }
}
