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

//! Worker pool: a fixed set of OS threads consuming tasks from a single
//! [`TaskQueue`].
//!
//! Spawns `N` named `std::thread`s via `thread::Builder::new().name(..)`
//! that loop on the shared queue until it closes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::queue::{Task, TaskQueue};

#[derive(Debug, Default)]
struct Completion {
    in_flight: AtomicUsize,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Completion {
    fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.lock.lock().unwrap();
            self.condvar.notify_all();
        }
    }

    fn wait_for_zero(&self) {
        let mut guard = self.lock.lock().unwrap();
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            guard = self.condvar.wait(guard).unwrap();
        }
        drop(guard);
    }
}

/// A fixed-size pool of worker threads draining a bounded task queue.
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    completion: Arc<Completion>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `thread_num` workers sharing `queue`.
    pub fn new(thread_num: usize, queue: Arc<TaskQueue>) -> Self {
        let completion = Arc::new(Completion::default());
        let mut handles = Vec::with_capacity(thread_num);

        for id in 0..thread_num.max(1) {
            let queue = queue.clone();
            let completion = completion.clone();
            let handle = thread::Builder::new()
                .name(format!("hivewire-worker-{id}"))
                .spawn(move || worker_loop(&queue, &completion))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self {
            queue,
            completion,
            handles,
        }
    }

    /// Enqueues `task`, blocking if the queue is momentarily full. Returns
    /// once the task has been accepted into the queue, not once it has run.
    pub fn add_task(&self, task: Task) -> Result<()> {
        self.completion.begin();
        match self.queue.push(task) {
            Ok(()) => Ok(()),
            Err(err) => {
                // Task was never accepted; undo the optimistic increment.
                self.completion.end();
                Err(err)
            }
        }
    }

    /// Blocks until the queue is drained and every worker is idle. Used only
    /// by tests.
    pub fn wait_for_completion(&self) {
        self.completion.wait_for_zero();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.queue.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(queue: &TaskQueue, completion: &Completion) {
    while let Ok(task) = queue.pop() {
        // A panicking handler must not take down the worker thread or leave
        // the in-flight counter stuck.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            log::error!("worker task panicked: {}", describe_panic(&payload));
        }
        completion.end();
    }
}

fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
