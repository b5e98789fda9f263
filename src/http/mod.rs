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

//! The per-connection HTTP layer: method/version tokens, the request parser,
//! response synthesis, the connection state machine, and a small set of
//! illustrative handlers that reach into the database/cache pools.

pub mod connection;
pub mod handlers;
pub mod method;
pub mod request;
pub mod response;
pub mod version;

pub use connection::{ConnState, HttpConnection};
pub use handlers::Pools;
pub use request::{parse_request, ParseOutcome, Request};
pub use response::{Response, Status};
