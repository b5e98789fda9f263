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

//! Connection I/O buffer: a growable byte buffer with separate read and
//! write cursors, plus scatter/gather helpers for moving bytes to and from a
//! socket in one syscall.
//!
//! Backed by a plain `Vec<u8>` with read/write offsets, grow-by-doubling,
//! and compact-when-idle, rather than a hand-rolled allocation. A `Vec`
//! keeps `unsafe` confined to the `readv`/`writev` FFI boundary instead of
//! spread across grow/compact/drop. The fixed "cheap prepend" region at the
//! front is sized for writing a short framing prefix (e.g. a chunk-size
//! line) without a memmove, though nothing in this crate currently writes
//! one.

use std::io;
use std::os::unix::io::RawFd;

/// Bytes reserved at the front of every buffer for cheap prepending.
const CHEAP_PREPEND: usize = 8;
const INITIAL_SIZE: usize = 1024;
/// Stack-resident overflow buffer used by [`ConnBuffer::read_fd`] so a single
/// `readv` can drain more than the buffer's current writable space without
/// growing it first.
const EXTRA_BUF_SIZE: usize = 65536;

/// A growable byte buffer for one connection's inbound/outbound bytes.
#[derive(Debug)]
pub struct ConnBuffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl ConnBuffer {
    /// Creates a buffer with `CHEAP_PREPEND` reserved bytes ahead of an empty
    /// readable/writable region of `INITIAL_SIZE`.
    pub fn new() -> Self {
        Self {
            data: vec![0u8; CHEAP_PREPEND + INITIAL_SIZE],
            read_pos: CHEAP_PREPEND,
            write_pos: CHEAP_PREPEND,
        }
    }

    /// Bytes available to read.
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes available to write before the buffer must grow.
    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Bytes available ahead of the read cursor for cheap prepending.
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// A view of the unread bytes.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Drops the first `len` unread bytes without copying the rest.
    pub fn retrieve(&mut self, len: usize) {
        let len = len.min(self.readable_bytes());
        if len == self.readable_bytes() {
            self.retrieve_all();
        } else {
            self.read_pos += len;
        }
    }

    /// Drops all unread bytes, resetting both cursors past the prepend
    /// region.
    pub fn retrieve_all(&mut self) {
        self.read_pos = CHEAP_PREPEND;
        self.write_pos = CHEAP_PREPEND;
    }

    /// Takes the unread bytes as an owned `Vec`, leaving the buffer empty.
    pub fn retrieve_as_vec(&mut self) -> Vec<u8> {
        let bytes = self.peek().to_vec();
        self.retrieve_all();
        bytes
    }

    /// Appends `bytes` to the writable region, growing or compacting first
    /// if necessary.
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.write_pos;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    /// Ensures at least `len` bytes of writable space, compacting in place
    /// first and only growing the backing allocation if compacting is not
    /// enough.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }

        if self.prependable_bytes() - CHEAP_PREPEND + self.writable_bytes() >= len {
            self.compact();
        } else {
            let needed = self.write_pos + len;
            self.data.resize(needed.next_power_of_two(), 0);
        }
    }

    fn compact(&mut self) {
        let readable = self.readable_bytes();
        self.data.copy_within(self.read_pos..self.write_pos, CHEAP_PREPEND);
        self.read_pos = CHEAP_PREPEND;
        self.write_pos = CHEAP_PREPEND + readable;
    }

    /// Reads from `fd` directly into the buffer, using a scatter read
    /// (`readv`) across the buffer's remaining writable space and a
    /// stack-resident overflow region so a single syscall can drain more
    /// than the buffer currently has room for. Grows the buffer to absorb
    /// whatever landed in the overflow region. Returns `0` on EOF, same as
    /// `Read::read`.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extra_buf = [0u8; EXTRA_BUF_SIZE];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.data[self.write_pos..].as_mut_ptr() as *mut _,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: extra_buf.as_mut_ptr() as *mut _,
                iov_len: extra_buf.len(),
            },
        ];

        let n = unsafe { libc::readv(fd, iov.as_mut_ptr(), iov.len() as i32) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;

        if n <= writable {
            self.write_pos += n;
        } else {
            let spilled = n - writable;
            self.write_pos = self.data.len();
            self.append(&extra_buf[..spilled]);
        }

        Ok(n)
    }

    /// Writes as many unread bytes as the kernel accepts in one `writev`
    /// call, optionally gathering a second segment (`mapped`) after them.
    /// Used to send a memory-mapped file's bytes without copying them
    /// through this buffer. `mapped` is a plain slice rather than an `Mmap`
    /// so a caller partway through a large mapped segment can pass the
    /// remaining sub-slice directly; the kernel always fills the header
    /// iovec before touching the second one, so a caller can tell how much
    /// of `mapped` was consumed as `n.saturating_sub(header_len)` once
    /// `header_len` (the readable length before this call) is known.
    /// Retires the consumed header bytes from the head of this buffer;
    /// does not touch `mapped` itself.
    pub fn write_fd(&mut self, fd: RawFd, mapped: Option<&[u8]>) -> io::Result<usize> {
        let header = self.peek();
        let mut iov = vec![libc::iovec {
            iov_base: header.as_ptr() as *mut _,
            iov_len: header.len(),
        }];
        if let Some(mapped) = mapped {
            iov.push(libc::iovec {
                iov_base: mapped.as_ptr() as *mut _,
                iov_len: mapped.len(),
            });
        }

        let n = unsafe { libc::writev(fd, iov.as_ptr(), iov.len() as i32) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;

        let header_written = n.min(header.len());
        self.retrieve(header_written);

        Ok(n)
    }
}

impl Default for ConnBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn append_and_retrieve_roundtrip() {
        let mut buf = ConnBuffer::new();
        buf.append(b"hello world");
        assert_eq!(buf.peek(), b"hello world");
        buf.retrieve(6);
        assert_eq!(buf.peek(), b"world");
        buf.retrieve(5);
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn ensure_writable_grows_past_initial_size() {
        let mut buf = ConnBuffer::new();
        let chunk = vec![7u8; INITIAL_SIZE * 2];
        buf.append(&chunk);
        assert_eq!(buf.readable_bytes(), chunk.len());
        assert_eq!(buf.peek(), chunk.as_slice());
    }

    #[test]
    fn retrieve_all_resets_past_the_prepend_region() {
        let mut buf = ConnBuffer::new();
        buf.append(b"abc");
        buf.retrieve_all();
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), CHEAP_PREPEND);
    }

    #[test]
    fn compact_reclaims_space_consumed_by_retrieve() {
        let mut buf = ConnBuffer::new();
        buf.append(&vec![1u8; INITIAL_SIZE - 16]);
        buf.retrieve(INITIAL_SIZE - 16);
        // Buffer is logically empty; appending again should compact rather
        // than growing the backing allocation.
        let cap_before = buf.data.len();
        buf.append(&vec![2u8; INITIAL_SIZE - 16]);
        assert_eq!(buf.data.len(), cap_before);
    }

    #[test]
    fn read_fd_drains_a_pipe_into_the_buffer() {
        use std::os::unix::io::FromRawFd;

        let mut fds = [0i32; 2];
        unsafe { assert_eq!(libc::pipe(fds.as_mut_ptr()), 0) };
        let mut writer = unsafe { std::fs::File::from_raw_fd(fds[1]) };
        let reader = unsafe { std::fs::File::from_raw_fd(fds[0]) };

        writer.write_all(b"ping").unwrap();
        drop(writer);

        let mut buf = ConnBuffer::new();
        let n = buf.read_fd(reader.as_raw_fd()).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf.peek(), b"ping");
    }

    #[test]
    fn write_fd_drains_buffer_into_a_pipe() {
        let mut fds = [0i32; 2];
        unsafe { assert_eq!(libc::pipe(fds.as_mut_ptr()), 0) };
        let reader_fd = fds[0];
        let writer_fd = fds[1];

        let mut buf = ConnBuffer::new();
        buf.append(b"pong");
        let n = buf.write_fd(writer_fd, None).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf.readable_bytes(), 0);

        let mut out = [0u8; 4];
        let read = unsafe { libc::read(reader_fd, out.as_mut_ptr() as *mut _, out.len()) };
        assert_eq!(read, 4);
        assert_eq!(&out, b"pong");

        unsafe {
            libc::close(reader_fd);
            libc::close(writer_fd);
        }
    }

    trait FromRawFdChecked {
        unsafe fn from_raw_fd_checked(fd: i32) -> Self;
    }

    impl FromRawFdChecked for std::fs::File {
        unsafe fn from_raw_fd_checked(fd: i32) -> Self {
            use std::os::unix::io::FromRawFd;
            std::fs::File::from_raw_fd(fd)
        }
    }
}
