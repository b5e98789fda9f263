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

//! Crate-wide error type.
//!
//! Every fallible path in the reactor's setup and the request-processing
//! pipeline funnels through [`ServerError`] so callers have one type to
//! match on, log, and propagate.

use std::io;

use thiserror::Error;

/// Errors produced by the server core.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Underlying I/O failure (socket setup, registry operations, file access).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration failed validation before the reactor could start.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A resource pool was used after `close()`.
    #[error("resource pool is closed")]
    PoolClosed,

    /// The bounded task queue was used after `close()`.
    #[error("task queue is closed")]
    QueueClosed,

    /// A database command failed.
    #[error("database error: {0}")]
    Database(String),

    /// A cache command failed.
    #[error("cache error: {0}")]
    Cache(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServerError>;
