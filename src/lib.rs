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

#![deny(missing_debug_implementations, rust_2018_idioms)]

//! hivewire is the concurrency and I/O core of a single-process HTTP/1.1
//! server: a readiness-based reactor, a worker pool, a min-heap idle-connection
//! timer, and bounded resource pools for database and cache handles, sitting
//! underneath a per-connection HTTP state machine.
//!
//! The request parser, response synthesizer, and SQL/cache client libraries
//! are treated as narrow external collaborators (see [`http`], [`db`],
//! [`cache`]); this crate owns the hard part: ownership of connections across
//! threads, edge-triggered readiness, one-shot re-arming, and safe teardown.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod db;
pub mod demux;
pub mod error;
pub mod http;
pub mod queue;
pub mod reactor;
pub mod respool;
pub mod timer;
pub mod workerpool;

pub use config::Config;
pub use error::ServerError;
pub use reactor::Reactor;
