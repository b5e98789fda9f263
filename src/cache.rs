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

//! Cache handle pool.
//!
//! Wraps [`ResourcePool`] around `redis::Connection`, the blocking Redis
//! client, for the same reason as [`crate::db`]: worker threads call into it
//! synchronously and there is no async runtime in this crate to bridge into.

use log::warn;

use crate::config::CacheConfig;
use crate::respool::{PooledHandle, ResourcePool};

/// A bounded pool of pre-opened Redis connections.
#[derive(Debug)]
pub struct CachePool {
    inner: ResourcePool<redis::Connection>,
}

impl CachePool {
    /// Opens up to `count` connections against `config`. Same degrade-not-abort
    /// failure model as [`crate::db::DbPool::init`].
    pub fn init(config: &CacheConfig, count: usize) -> Self {
        let url = format!("redis://{}:{}", config.host, config.port);
        let client = match redis::Client::open(url) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!("failed to build cache client: {err}");
                None
            }
        };

        let mut handles = Vec::with_capacity(count);
        if let Some(client) = &client {
            for _ in 0..count {
                match client.get_connection() {
                    Ok(conn) => handles.push(conn),
                    Err(err) => warn!("failed to open cache connection: {err}"),
                }
            }
        }

        let opened = handles.len();
        if opened < count {
            warn!("cache pool running at reduced capacity: {opened}/{count} connections open");
        }

        Self {
            inner: ResourcePool::from_handles(handles, count),
        }
    }

    /// Borrows a connection, blocking while the pool is exhausted.
    pub fn acquire(&self) -> crate::error::Result<PooledHandle<'_, redis::Connection>> {
        self.inner.acquire()
    }

    /// Closes the pool; open connections are dropped as they're returned.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Number of connections presently idle in the pool.
    pub fn free_count(&self) -> usize {
        self.inner.free_count()
    }
}
