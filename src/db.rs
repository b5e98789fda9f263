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

//! Database handle pool.
//!
//! Wraps [`ResourcePool`] around `mysql::Conn`, the blocking MySQL client.
//! Chosen because the worker threads that borrow a connection call into it
//! synchronously from inside a plain `std::thread`, with no async runtime
//! anywhere in this crate to bridge into.

use log::warn;

use crate::config::DbConfig;
use crate::respool::{PooledHandle, ResourcePool};

/// A bounded pool of pre-opened MySQL connections.
#[derive(Debug)]
pub struct DbPool {
    inner: ResourcePool<mysql::Conn>,
}

impl DbPool {
    /// Opens up to `count` connections against `config`. A connection that
    /// fails to open is logged at `warn` and simply absent from the pool;
    /// construction never aborts the server on a database outage, it
    /// degrades capacity instead.
    pub fn init(config: &DbConfig, count: usize) -> Self {
        let opts = mysql::OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.db_name.clone()));

        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            match mysql::Conn::new(opts.clone()) {
                Ok(conn) => handles.push(conn),
                Err(err) => warn!("failed to open database connection: {err}"),
            }
        }

        let opened = handles.len();
        if opened < count {
            warn!("database pool running at reduced capacity: {opened}/{count} connections open");
        }

        Self {
            inner: ResourcePool::from_handles(handles, count),
        }
    }

    /// Borrows a connection, blocking while the pool is exhausted.
    pub fn acquire(&self) -> crate::error::Result<PooledHandle<'_, mysql::Conn>> {
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
