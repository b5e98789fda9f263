// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Min-heap timer: keyed entries ordered by deadline, supporting
//! `add`/`adjust`/`cancel`/expire-due.
//!
//! Implemented as an explicit array-based binary heap rather than
//! `std::collections::BinaryHeap`, because `adjust` needs to change an
//! entry's key at a known index and re-sift in O(log n); `BinaryHeap` offers
//! no such operation. An auxiliary `fd -> index` map makes `adjust`/`cancel`
//! O(log n) instead of O(n).
//!
//! Entries store a small tagged [`ExpireReason`] rather than a boxed closure
//! capturing the reactor. `tick()` hands the reactor data to interpret.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Instant;

/// Why an entry expired. Currently the only reason the reactor produces is
/// an idle-connection timeout, but the tag leaves room for others without
/// reworking the heap's API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireReason {
    /// The connection exceeded its configured idle timeout.
    IdleTimeout,
}

#[derive(Debug, Clone)]
struct Entry {
    fd: RawFd,
    deadline_ms: u64,
    reason: ExpireReason,
    /// Monotonically increasing insertion sequence, used only to keep
    /// `adjust`-to-the-same-deadline stable relative to other equal-deadline
    /// entries already ahead of it in insertion order.
    seq: u64,
}

impl Entry {
    fn key(&self) -> (u64, u64) {
        (self.deadline_ms, self.seq)
    }
}

/// A min-heap of timer entries keyed by deadline.
#[derive(Debug)]
pub struct Timer {
    heap: Vec<Entry>,
    index: HashMap<RawFd, usize>,
    base: Instant,
    next_seq: u64,
}

impl Timer {
    /// Creates an empty timer, anchoring its monotonic clock to "now".
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
            base: Instant::now(),
            next_seq: 0,
        }
    }

    /// Milliseconds elapsed since the timer's monotonic anchor.
    pub fn now_ms(&self) -> u64 {
        self.base.elapsed().as_millis() as u64
    }

    /// Adds an entry expiring in `timeout_ms` milliseconds. If `fd` is
    /// already present, behaves like [`adjust`](Self::adjust) and replaces
    /// the expire reason.
    pub fn add(&mut self, fd: RawFd, timeout_ms: u64, reason: ExpireReason) {
        if self.index.contains_key(&fd) {
            self.adjust(fd, timeout_ms);
            if let Some(&idx) = self.index.get(&fd) {
                self.heap[idx].reason = reason;
            }
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = Entry {
            fd,
            deadline_ms: self.now_ms() + timeout_ms,
            reason,
            seq,
        };
        let idx = self.heap.len();
        self.heap.push(entry);
        self.index.insert(fd, idx);
        self.sift_up(idx);
    }

    /// Resets `fd`'s deadline to `now + timeout_ms`. No-op if `fd` is absent.
    pub fn adjust(&mut self, fd: RawFd, timeout_ms: u64) {
        let Some(&idx) = self.index.get(&fd) else {
            return;
        };
        let new_deadline = self.now_ms() + timeout_ms;
        let old_deadline = self.heap[idx].deadline_ms;
        self.heap[idx].deadline_ms = new_deadline;

        if new_deadline > old_deadline {
            self.sift_down(idx);
        } else {
            self.sift_up(idx);
        }
    }

    /// Removes `fd`'s entry, if present.
    pub fn cancel(&mut self, fd: RawFd) {
        let Some(idx) = self.index.remove(&fd) else {
            return;
        };
        self.remove_at(idx);
    }

    /// Pops and returns every entry whose deadline has passed, in deadline
    /// order.
    pub fn tick(&mut self) -> Vec<(RawFd, ExpireReason)> {
        let now = self.now_ms();
        let mut expired = Vec::new();

        while let Some(top) = self.heap.first() {
            if top.deadline_ms > now {
                break;
            }
            let entry = self.heap[0].clone();
            self.index.remove(&entry.fd);
            self.remove_at(0);
            expired.push((entry.fd, entry.reason));
        }

        expired
    }

    /// Milliseconds until the earliest deadline, or `-1` if the timer is
    /// empty. Intended for direct use as the demultiplexer's `wait` timeout.
    pub fn next_tick_ms(&self) -> i64 {
        match self.heap.first() {
            None => -1,
            Some(entry) => {
                let now = self.now_ms();
                if entry.deadline_ms <= now {
                    0
                } else {
                    (entry.deadline_ms - now) as i64
                }
            }
        }
    }

    /// Whether `fd` currently has a live entry.
    pub fn contains(&self, fd: RawFd) -> bool {
        self.index.contains_key(&fd)
    }

    fn remove_at(&mut self, idx: usize) {
        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        self.heap.pop();

        if idx < self.heap.len() {
            self.index.insert(self.heap[idx].fd, idx);
            // The swapped-in entry may need to move either direction.
            self.sift_down(idx);
            self.sift_up(idx);
        }
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx].key() < self.heap[parent].key() {
                self.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;

            if left < len && self.heap[left].key() < self.heap[smallest].key() {
                smallest = left;
            }
            if right < len && self.heap[right].key() < self.heap[smallest].key() {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].fd, a);
        self.index.insert(self.heap[b].fd, b);
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_is_valid(timer: &Timer) {
        for idx in 0..timer.heap.len() {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            if left < timer.heap.len() {
                assert!(timer.heap[idx].key() <= timer.heap[left].key());
            }
            if right < timer.heap.len() {
                assert!(timer.heap[idx].key() <= timer.heap[right].key());
            }
        }
        for (&fd, &idx) in &timer.index {
            assert_eq!(timer.heap[idx].fd, fd);
        }
    }

    #[test]
    fn heap_property_holds_after_inserts() {
        let mut timer = Timer::new();
        for fd in 0..50 {
            timer.add(fd, (50 - fd) as u64, ExpireReason::IdleTimeout);
            heap_is_valid(&timer);
        }
    }

    #[test]
    fn adjust_changes_next_tick() {
        let mut timer = Timer::new();
        timer.add(1, 10_000, ExpireReason::IdleTimeout);
        timer.add(2, 10, ExpireReason::IdleTimeout);
        assert!(timer.next_tick_ms() <= 10);

        timer.adjust(2, 20_000);
        assert!(timer.next_tick_ms() > 1000);
        heap_is_valid(&timer);
    }

    #[test]
    fn cancel_removes_entry() {
        let mut timer = Timer::new();
        timer.add(1, 1000, ExpireReason::IdleTimeout);
        timer.add(2, 1000, ExpireReason::IdleTimeout);
        timer.cancel(1);
        assert!(!timer.contains(1));
        assert!(timer.contains(2));
        heap_is_valid(&timer);
    }

    #[test]
    fn next_tick_ms_is_negative_one_when_empty() {
        let timer = Timer::new();
        assert_eq!(timer.next_tick_ms(), -1);
    }

    #[test]
    fn tick_expires_only_due_entries_in_deadline_order() {
        let mut timer = Timer::new();
        timer.add(1, 0, ExpireReason::IdleTimeout);
        timer.add(2, 0, ExpireReason::IdleTimeout);
        timer.add(3, 10_000, ExpireReason::IdleTimeout);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let expired = timer.tick();
        let fds: Vec<_> = expired.iter().map(|(fd, _)| *fd).collect();
        assert_eq!(fds, vec![1, 2]);
        assert!(timer.contains(3));
        heap_is_valid(&timer);
    }

    #[test]
    fn adjust_to_equal_deadline_does_not_reorder_past_earlier_equal_entries() {
        let mut timer = Timer::new();
        timer.add(1, 1000, ExpireReason::IdleTimeout);
        timer.add(2, 2000, ExpireReason::IdleTimeout);

        let fd1_deadline = timer.heap[timer.index[&1]].deadline_ms;
        let timeout_for_fd2 = fd1_deadline.saturating_sub(timer.now_ms());
        timer.adjust(2, timeout_for_fd2);

        // fd2 now shares fd1's deadline exactly; fd1 was inserted first
        // (lower sequence number) and must still sort ahead of it.
        let idx1 = timer.index[&1];
        let idx2 = timer.index[&2];
        assert_eq!(timer.heap[idx1].deadline_ms, timer.heap[idx2].deadline_ms);
        assert!(timer.heap[idx1].key() < timer.heap[idx2].key());
        heap_is_valid(&timer);
    }
}
