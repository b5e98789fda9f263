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

//! Event demultiplexer: register/modify/remove file descriptors, wait for
//! readiness with a timeout.
//!
//! Backed by `mio::Poll`. mio always registers descriptors edge-triggered on
//! its epoll backend and has no safe knob for `EPOLLONESHOT`. One-shot
//! readiness is emulated one level up, in [`crate::reactor`], by
//! deregistering a descriptor before handing its readiness to a worker and
//! reregistering it once the worker is done.

use std::io;
use std::os::unix::io::RawFd;

use bitflags::bitflags;
use mio::{event::Source, Events, Interest as MioInterest, Poll, Token};

bitflags! {
    /// Abstract readiness bits a caller can request or observe, independent
    /// of the backing demultiplexer's own vocabulary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        /// Descriptor is readable.
        const READABLE = 0b0000_0001;
        /// Descriptor is writable.
        const WRITABLE = 0b0000_0010;
        /// Peer closed its write half.
        const PEER_HANGUP = 0b0000_0100;
        /// Descriptor hung up.
        const HANGUP = 0b0000_1000;
        /// Descriptor is in an error state.
        const ERROR = 0b0001_0000;
    }
}

impl Interest {
    fn to_mio(self) -> MioInterest {
        if self.contains(Interest::READABLE) && self.contains(Interest::WRITABLE) {
            MioInterest::READABLE | MioInterest::WRITABLE
        } else if self.contains(Interest::WRITABLE) {
            MioInterest::WRITABLE
        } else {
            MioInterest::READABLE
        }
    }
}

/// A single readiness notification.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    fd: RawFd,
    interest: Interest,
}

impl ReadyEvent {
    /// The descriptor this event is for.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The readiness bits observed.
    pub fn interest(&self) -> Interest {
        self.interest
    }
}

fn from_mio(event: &mio::event::Event) -> Interest {
    let mut flags = Interest::empty();
    if event.is_readable() {
        flags |= Interest::READABLE;
    }
    if event.is_writable() {
        flags |= Interest::WRITABLE;
    }
    if event.is_read_closed() || event.is_write_closed() {
        flags |= Interest::PEER_HANGUP;
    }
    if event.is_error() {
        flags |= Interest::ERROR;
    }
    flags
}

/// Readiness-based I/O reactor core: owns a `Poll` instance and the most
/// recent batch of drained events.
#[derive(Debug)]
pub struct Demultiplexer {
    poll: Poll,
    events: Events,
    drained: Vec<ReadyEvent>,
}

impl Demultiplexer {
    /// Creates a demultiplexer with room for `capacity` events per `wait` call.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
            drained: Vec::with_capacity(capacity),
        })
    }

    /// A cloneable handle to the underlying registry, so worker threads can
    /// reregister/deregister descriptors without routing through the reactor
    /// thread.
    pub fn try_clone_registry(&self) -> io::Result<mio::Registry> {
        self.poll.registry().try_clone()
    }

    /// Registers `source` under `token` for `interest`.
    pub fn add<S: Source + ?Sized>(
        &self,
        source: &mut S,
        token: usize,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll
            .registry()
            .register(source, Token(token), interest.to_mio())
    }

    /// Changes the interest set for an already-registered source.
    pub fn modify<S: Source + ?Sized>(
        &self,
        source: &mut S,
        token: usize,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(source, Token(token), interest.to_mio())
    }

    /// Deregisters `source`. After this call the descriptor cannot produce
    /// further readiness notifications until re-`add`ed. This is the
    /// mechanism this crate uses to emulate one-shot readiness.
    pub fn remove<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Blocks until at least one event is ready or `timeout_ms` elapses.
    /// `-1` blocks indefinitely, `0` polls without blocking. Returns the
    /// number of events drained.
    pub fn wait(&mut self, timeout_ms: i64) -> io::Result<usize> {
        let timeout = if timeout_ms < 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(timeout_ms as u64))
        };

        self.poll.poll(&mut self.events, timeout)?;

        self.drained.clear();
        for event in self.events.iter() {
            self.drained.push(ReadyEvent {
                fd: event.token().0 as RawFd,
                interest: from_mio(event),
            });
        }
        Ok(self.drained.len())
    }

    /// The descriptor of the `i`th event from the last `wait` call.
    pub fn event_fd(&self, i: usize) -> RawFd {
        self.drained[i].fd()
    }

    /// The readiness bits of the `i`th event from the last `wait` call.
    pub fn event_mask(&self, i: usize) -> Interest {
        self.drained[i].interest()
    }

    /// All events drained by the last `wait` call.
    pub fn events(&self) -> &[ReadyEvent] {
        &self.drained
    }
}
