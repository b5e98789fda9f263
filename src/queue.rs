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

//! Bounded blocking queue: fixed-capacity FIFO of tasks, with blocking
//! push/pop and close-aware draining.
//!
//! Built on `crossbeam_channel::bounded`, which already gives blocking
//! bounded send, blocking recv, and "drain remaining then disconnect" close
//! semantics for free; this module just exposes them under a task-queue
//! vocabulary instead of raw channel types.

use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{Result, ServerError};

/// A task handed off from the reactor thread to a worker: an opaque,
/// no-argument, no-return callable.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-capacity FIFO of [`Task`]s.
#[derive(Debug)]
pub struct TaskQueue {
    sender: Mutex<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
}

impl TaskQueue {
    /// Creates a queue that can hold at most `capacity` pending tasks.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: rx,
        }
    }

    /// Pushes a task, blocking while the queue is full. Fails if the queue
    /// has been [`close`](Self::close)d.
    pub fn push(&self, task: Task) -> Result<()> {
        // Clone the sender out from under the lock before the (possibly
        // blocking) send, so concurrent pushers don't serialize on this
        // mutex while the queue is merely full.
        let sender = {
            let guard = self.sender.lock().unwrap();
            guard.clone().ok_or(ServerError::QueueClosed)?
        };
        sender.send(task).map_err(|_| ServerError::QueueClosed)
    }

    /// Pops the next task in FIFO order, blocking while the queue is empty.
    /// Once closed, drains any remaining tasks before returning
    /// [`ServerError::QueueClosed`].
    pub fn pop(&self) -> Result<Task> {
        self.receiver.recv().map_err(|_| ServerError::QueueClosed)
    }

    /// Closes the queue: subsequent `push` calls fail immediately; `pop`
    /// continues to drain whatever was already enqueued, then reports closed.
    pub fn close(&self) {
        *self.sender.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pushes_and_pops_in_fifo_order() {
        let queue = TaskQueue::new(8);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            queue.push(Box::new(move || order.lock().unwrap().push(i))).unwrap();
        }

        for _ in 0..5 {
            let task = queue.pop().unwrap();
            task();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn push_blocks_when_full_and_unblocks_on_pop() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.push(Box::new(|| ())).unwrap();

        let producer_done = Arc::new(AtomicUsize::new(0));
        let q2 = queue.clone();
        let done2 = producer_done.clone();
        let handle = thread::spawn(move || {
            q2.push(Box::new(|| ())).unwrap();
            done2.store(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(producer_done.load(Ordering::SeqCst), 0, "push should still be blocked");

        queue.pop().unwrap();
        handle.join().unwrap();
        assert_eq!(producer_done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let queue = TaskQueue::new(4);
        queue.push(Box::new(|| ())).unwrap();
        queue.push(Box::new(|| ())).unwrap();
        queue.close();

        assert!(queue.push(Box::new(|| ())).is_err());
        assert!(queue.pop().is_ok());
        assert!(queue.pop().is_ok());
        assert!(matches!(queue.pop(), Err(ServerError::QueueClosed)));
    }
}
