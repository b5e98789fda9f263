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

//! Bounded resource pool: a FIFO of pre-opened handles gated by blocking
//! acquire/release, used for both the database and cache pools.
//!
//! A naive implementation keeps a free-list, a counting semaphore, and
//! `free_count`/`use_count` counters updated outside the semaphore-post
//! ordering, which can desynchronize the counters from the semaphore under
//! contention. This implementation sidesteps that class of bug by
//! construction: a single `Mutex<VecDeque<T>>` plus `Condvar` is both the
//! free-list and the wait queue, so there is no separate semaphore to post
//! out of order. `free_count` is simply the guarded queue's length at every
//! observation point.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

use crate::error::{Result, ServerError};

#[derive(Debug)]
struct Inner<T> {
    free: VecDeque<T>,
    capacity: usize,
    closed: bool,
    /// Handles currently checked out. Tracked explicitly (rather than only
    /// derived as `capacity - free.len()`) so `acquire` can report it for
    /// metrics without recomputing; always equal to `capacity - free.len()`
    /// outside this module, per the pool invariant.
    use_count: usize,
}

/// A bounded pool of pre-opened handles of type `T`.
#[derive(Debug)]
pub struct ResourcePool<T> {
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> ResourcePool<T> {
    /// Builds a pool from already-opened `handles`; `capacity` is the
    /// nominal size (handles.len() may be smaller if some failed to open at
    /// init).
    pub fn from_handles(handles: Vec<T>, capacity: usize) -> Self {
        Self {
            state: Mutex::new(Inner {
                free: handles.into(),
                capacity,
                closed: false,
                use_count: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Acquires a handle, blocking while the pool is exhausted. Fails only if
    /// the pool has been [`close`](Self::close)d while waiting.
    pub fn acquire(&self) -> Result<PooledHandle<'_, T>> {
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.closed {
                return Err(ServerError::PoolClosed);
            }
            if let Some(handle) = guard.free.pop_front() {
                guard.use_count += 1;
                return Ok(PooledHandle {
                    pool: self,
                    handle: Some(handle),
                });
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }

    fn release(&self, handle: T) {
        let mut guard = self.state.lock().unwrap();
        if guard.closed {
            // Pool was closed while this handle was checked out; drop it
            // rather than reopening the free list.
            drop(handle);
            return;
        }
        guard.use_count = guard.use_count.saturating_sub(1);
        guard.free.push_back(handle);
        drop(guard);
        self.not_empty.notify_one();
    }

    /// Closes the pool: all free handles are dropped and any blocked or
    /// future `acquire` fails.
    pub fn close(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.closed = true;
        guard.free.clear();
        drop(guard);
        self.not_empty.notify_all();
    }

    /// Number of handles currently idle in the pool. Advisory outside the
    /// pool's own critical section; the authoritative value is only
    /// meaningful while holding the pool's internal lock.
    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap().free.len()
    }

    /// Number of handles currently checked out. Advisory, same caveat as
    /// [`free_count`](Self::free_count).
    pub fn use_count(&self) -> usize {
        self.state.lock().unwrap().use_count
    }

    /// The pool's nominal capacity (may exceed `free_count + use_count` if
    /// some handles failed to open at construction time).
    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().capacity
    }
}

/// Scoped acquisition guard: construction already happened in
/// [`ResourcePool::acquire`]; `Drop` releases the handle back to the pool on
/// every exit path, including unwinding.
#[derive(Debug)]
pub struct PooledHandle<'a, T> {
    pool: &'a ResourcePool<T>,
    handle: Option<T>,
}

impl<T> Deref for PooledHandle<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.handle.as_ref().expect("handle taken before drop")
    }
}

impl<T> DerefMut for PooledHandle<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.handle.as_mut().expect("handle taken before drop")
    }
}

impl<T> Drop for PooledHandle<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}
