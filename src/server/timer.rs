//! Idle-connection deadlines.
//!
//! A binary min-heap stored in a `Vec`, paired with an id -> slot map so a
//! node can be found, extended or removed in O(log n) without scanning.
//! `std::collections::BinaryHeap` can not do keyed updates, hence the
//! hand-rolled sift operations.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Runs once when a node's deadline passes.
pub type ExpireCallback = Box<dyn FnOnce() + Send>;

struct TimerNode<K> {
    id: K,
    deadline: Instant,
    on_expire: ExpireCallback,
}

pub struct TimerHeap<K> {
    heap: Vec<TimerNode<K>>,
    index: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash> Default for TimerHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> TimerHeap<K> {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Schedules `on_expire` for `id` at `now + timeout`, replacing any
    /// node the id already had.
    pub fn add<F>(&mut self, id: K, timeout: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_at(id, Instant::now() + timeout, on_expire);
    }

    pub fn add_at<F>(&mut self, id: K, deadline: Instant, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.index.get(&id) {
            Some(&i) => {
                let node = &mut self.heap[i];
                node.deadline = deadline;
                node.on_expire = Box::new(on_expire);
                self.restore(i);
            }
            None => {
                let i = self.heap.len();
                self.heap.push(TimerNode {
                    id,
                    deadline,
                    on_expire: Box::new(on_expire),
                });
                self.index.insert(id, i);
                self.sift_up(i);
            }
        }
    }

    /// Moves `id`'s deadline to `now + timeout`. Returns `false` if the id
    /// has no live node.
    pub fn adjust(&mut self, id: K, timeout: Duration) -> bool {
        self.adjust_at(id, Instant::now() + timeout)
    }

    pub fn adjust_at(&mut self, id: K, deadline: Instant) -> bool {
        let Some(&i) = self.index.get(&id) else {
            return false;
        };
        self.heap[i].deadline = deadline;
        self.restore(i);
        true
    }

    /// Drops `id`'s node without running its callback.
    pub fn remove(&mut self, id: K) -> bool {
        match self.index.get(&id) {
            Some(&i) => {
                self.delete(i);
                true
            }
            None => false,
        }
    }

    /// Pops every node whose deadline is `<= now` and runs its callback.
    /// Returns how many fired.
    pub fn pop_expired(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while self.heap.first().is_some_and(|root| root.deadline <= now) {
            let node = self.delete(0);
            (node.on_expire)();
            fired += 1;
        }
        fired
    }

    /// Time from `now` until the earliest deadline, zero if it already
    /// passed, `None` when no timers are live.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.heap
            .first()
            .map(|root| root.deadline.saturating_duration_since(now))
    }

    pub fn deadline(&self, id: K) -> Option<Instant> {
        self.index.get(&id).map(|&i| self.heap[i].deadline)
    }

    pub fn contains(&self, id: K) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    fn delete(&mut self, i: usize) -> TimerNode<K> {
        let node = self.heap.swap_remove(i);
        self.index.remove(&node.id);
        if i < self.heap.len() {
            self.index.insert(self.heap[i].id, i);
            self.restore(i);
        }
        node
    }

    fn restore(&mut self, i: usize) {
        if !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].deadline <= self.heap[i].deadline {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Returns whether the node moved.
    fn sift_down(&mut self, mut i: usize) -> bool {
        let start = i;
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            if left + 1 < n && self.heap[left + 1].deadline < self.heap[left].deadline {
                child = left + 1;
            }
            if self.heap[i].deadline <= self.heap[child].deadline {
                break;
            }
            self.swap(i, child);
            i = child;
        }
        i > start
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].id, a);
        self.index.insert(self.heap[b].id, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_consistent<K: Copy + Eq + Hash + std::fmt::Debug>(timers: &TimerHeap<K>) {
        assert_eq!(timers.heap.len(), timers.index.len());
        for (i, node) in timers.heap.iter().enumerate() {
            assert_eq!(timers.index.get(&node.id), Some(&i), "index map out of sync");
            if i > 0 {
                assert!(timers.heap[(i - 1) / 2].deadline <= node.deadline, "heap order broken");
            }
        }
    }

    #[test]
    fn index_map_tracks_every_mutation() {
        let base = Instant::now();
        let mut timers = TimerHeap::new();
        for id in 0u64..32 {
            let offset = (id * 7919) % 97;
            timers.add_at(id, base + Duration::from_millis(offset), || {});
            assert_consistent(&timers);
        }
        for id in (0u64..32).step_by(3) {
            timers.adjust_at(id, base + Duration::from_millis(200 - id));
            assert_consistent(&timers);
        }
        for id in (1u64..32).step_by(4) {
            assert!(timers.remove(id));
            assert_consistent(&timers);
        }
        timers.pop_expired(base + Duration::from_millis(50));
        assert_consistent(&timers);
    }
}
