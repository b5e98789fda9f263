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

//! Per-connection HTTP state machine: `IDLE` -> `READING` -> `PROCESSING` ->
//! `WRITING`, looping back to `READING` on keep-alive or falling to `CLOSED`
//! otherwise.
//!
//! One struct per connection drives buffer, parser, and response together.
//! `process` turns buffered bytes into a response (or decides more bytes are
//! needed); `write` drains the response onto the wire across as many partial
//! writes as the socket demands.

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use super::handlers::{self, Pools};
use super::request::{parse_request, ParseOutcome};
use super::response::{error_response, Response, Status};
use crate::buffer::ConnBuffer;

/// Where a connection sits in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Freshly accepted or between keep-alive requests; only armed for
    /// readability.
    Idle,
    /// Bytes have been read at least once for the request in flight and are
    /// being accumulated toward a complete parse.
    Reading,
    /// A complete request has been parsed; a response is being synthesized.
    Processing,
    /// A response is queued and being drained onto the socket.
    Writing,
    /// The connection is finished; the reactor should deregister and close
    /// its descriptor.
    Closed,
}

/// Driver for one accepted connection's HTTP traffic.
#[derive(Debug)]
pub struct HttpConnection {
    fd: RawFd,
    state: ConnState,
    inbound: ConnBuffer,
    outbound: ConnBuffer,
    pending: Option<Response>,
    mapped_offset: usize,
    doc_root: PathBuf,
    pools: Option<Pools>,
}

impl HttpConnection {
    /// Builds a connection in `IDLE` state for a freshly accepted descriptor,
    /// with no pool-backed routes available (anything routed to a pool
    /// degrades to `503`).
    pub fn init(fd: RawFd, doc_root: PathBuf) -> Self {
        Self::init_with_pools(fd, doc_root, None)
    }

    /// Builds a connection with pool handles reachable from its illustrative
    /// DB-backed handler.
    pub fn init_with_pools(fd: RawFd, doc_root: PathBuf, pools: Option<Pools>) -> Self {
        Self {
            fd,
            state: ConnState::Idle,
            inbound: ConnBuffer::new(),
            outbound: ConnBuffer::new(),
            pending: None,
            mapped_offset: 0,
            doc_root,
            pools,
        }
    }

    /// The connection's descriptor.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The connection's current state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Reads readily available bytes off the wire into the inbound buffer,
    /// transitioning `IDLE`/`READING` as appropriate. Returns `Ok(false)` on
    /// a clean EOF (`read` returned `0`), which the caller should treat as a
    /// hangup.
    pub fn read(&mut self) -> std::io::Result<bool> {
        self.state = ConnState::Reading;
        let n = self.inbound.read_fd(self.fd)?;
        Ok(n != 0)
    }

    /// Attempts to parse one complete request out of the inbound buffer and
    /// synthesizes its response, transitioning to `PROCESSING` and then
    /// `WRITING`. Returns `true` if a response is now queued, `false` if
    /// more bytes are still needed (caller stays in `READING`). A malformed
    /// request synthesizes a `400` response rather than propagating an
    /// error: protocol errors are reported to the peer, not the caller.
    pub fn process(&mut self) -> bool {
        self.state = ConnState::Processing;
        match parse_request(self.inbound.peek()) {
            ParseOutcome::NeedMore => {
                self.state = ConnState::Reading;
                false
            }
            ParseOutcome::BadRequest => {
                self.inbound.retrieve_all();
                self.queue_response(error_response(Status::BadRequest, false));
                true
            }
            ParseOutcome::Complete { request, consumed } => {
                self.inbound.retrieve(consumed);
                let response = handlers::route(&request, &self.doc_root, self.pools.as_ref());
                self.queue_response(response);
                true
            }
        }
    }

    fn queue_response(&mut self, response: Response) {
        self.outbound.append(&response.header_bytes);
        self.mapped_offset = 0;
        self.pending = Some(response);
        self.state = ConnState::Writing;
    }

    /// Drains as much of the queued response as the socket accepts in one
    /// `writev`. Returns `true` once the whole response has been written,
    /// at which point the caller should either loop back to `IDLE` (keep
    /// alive) or move to `CLOSED`.
    pub fn write(&mut self) -> std::io::Result<bool> {
        let mapped_remaining = self
            .pending
            .as_ref()
            .and_then(|r| r.mapped.as_ref())
            .map(|m| &m[self.mapped_offset..]);

        let header_len = self.outbound.readable_bytes();
        let n = self.outbound.write_fd(self.fd, mapped_remaining)?;

        if let Some(spilled) = mapped_remaining {
            let consumed_from_mapped = n.saturating_sub(header_len).min(spilled.len());
            self.mapped_offset += consumed_from_mapped;
        }

        let mapped_len = self
            .pending
            .as_ref()
            .and_then(|r| r.mapped.as_ref())
            .map_or(0, |m| m.len());
        let done = self.outbound.readable_bytes() == 0 && self.mapped_offset >= mapped_len;

        if done {
            let keep_alive = self.pending.as_ref().map_or(false, |r| r.keep_alive);
            self.pending = None;
            self.mapped_offset = 0;
            self.state = if keep_alive {
                ConnState::Idle
            } else {
                ConnState::Closed
            };
        }

        Ok(done)
    }

    /// Whether the connection should be kept open after its current
    /// response finishes writing.
    pub fn is_keep_alive(&self) -> bool {
        self.pending.as_ref().map_or(true, |r| r.keep_alive)
    }

    /// Marks the connection for closing regardless of its current state.
    /// Used by the reactor on idle timeout and on observed peer hangup.
    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    fn pipe_pair() -> (std::fs::File, std::fs::File) {
        use std::os::unix::io::FromRawFd;
        let mut fds = [0i32; 2];
        unsafe { assert_eq!(libc::pipe(fds.as_mut_ptr()), 0) };
        unsafe {
            (
                std::fs::File::from_raw_fd(fds[0]),
                std::fs::File::from_raw_fd(fds[1]),
            )
        }
    }

    #[test]
    fn processes_a_complete_request_against_the_document_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("index.html"))
            .unwrap()
            .write_all(b"hello")
            .unwrap();

        let (reader, mut writer) = pipe_pair();
        let mut conn = HttpConnection::init(reader.as_raw_fd(), dir.path().to_path_buf());

        writer
            .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap();
        drop(writer);

        assert!(conn.read().unwrap());
        assert!(conn.process());
        assert_eq!(conn.state(), ConnState::Writing);
        assert!(!conn.is_keep_alive());
    }

    #[test]
    fn incomplete_request_stays_in_reading() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, mut writer) = pipe_pair();
        let mut conn = HttpConnection::init(reader.as_raw_fd(), dir.path().to_path_buf());

        writer.write_all(b"GET / HTTP/1.1\r\n").unwrap();
        drop(writer);

        assert!(conn.read().unwrap());
        assert!(!conn.process());
        assert_eq!(conn.state(), ConnState::Reading);
    }

    #[test]
    fn malformed_request_queues_a_bad_request_response() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, mut writer) = pipe_pair();
        let mut conn = HttpConnection::init(reader.as_raw_fd(), dir.path().to_path_buf());

        writer.write_all(b"GARBAGE\r\n\r\n").unwrap();
        drop(writer);

        assert!(conn.read().unwrap());
        assert!(conn.process());
        assert_eq!(conn.state(), ConnState::Writing);
        assert!(!conn.is_keep_alive());
    }

    #[test]
    fn write_drains_the_queued_response_and_loops_on_keep_alive() {
        let dir = tempfile::tempdir().unwrap();
        let (resp_reader, writer) = pipe_pair();
        let mut conn = HttpConnection::init(writer.as_raw_fd(), dir.path().to_path_buf());

        conn.state = ConnState::Writing;
        let body = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n";
        conn.outbound.append(body);
        conn.pending = Some(Response {
            header_bytes: body.to_vec(),
            mapped: None,
            keep_alive: true,
        });

        let done = conn.write().unwrap();
        assert!(done);
        assert_eq!(conn.state(), ConnState::Idle);
        drop(writer);

        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut &resp_reader, &mut out).unwrap();
        assert_eq!(out, body);
    }
}
