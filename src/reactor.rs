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

//! The reactor: owns the listen socket, the connection table, the idle
//! timer, and the worker pool; drives the main readiness loop.
//!
//! Dispatches listen-token readiness against an `fd`-keyed table of
//! connections, draining it in a `poll`/match loop, and uses a `WAKE_TOKEN`
//! plus a channel from workers back to the poll thread so a worker can
//! report a connection closed or ready for reregistration without the
//! reactor thread ever blocking on anything but `poll` itself.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::Waker;
use socket2::{Domain, Socket, Type};

use crate::cache::CachePool;
use crate::config::Config;
use crate::db::DbPool;
use crate::demux::{Demultiplexer, Interest};
use crate::error::Result;
use crate::http::handlers::Pools;
use crate::http::HttpConnection;
use crate::queue::TaskQueue;
use crate::timer::{ExpireReason, Timer};
use crate::workerpool::WorkerPool;

const LISTEN_TOKEN: usize = usize::MAX;
const WAKE_TOKEN: usize = usize::MAX - 1;
const LISTEN_BACKLOG: i32 = 6;

/// Bytes sent to a connection rejected because `MAX_FD` is already reached.
const BUSY_MESSAGE: &[u8] = b"Server busy!";

/// One accepted connection's socket plus its HTTP state machine. Held in the
/// reactor's table while idle, and moved into a worker closure for the
/// duration of one dispatch, emulating one-shot readiness.
#[derive(Debug)]
struct Slot {
    stream: TcpStream,
    conn: HttpConnection,
}

/// Owns every long-lived piece of the server and drives its main loop.
#[derive(Debug)]
pub struct Reactor {
    demux: Demultiplexer,
    listener: TcpListener,
    waker: Arc<Waker>,
    closed_tx: Sender<RawFd>,
    closed_rx: Receiver<RawFd>,
    reinsert_tx: Sender<(RawFd, Slot)>,
    reinsert_rx: Receiver<(RawFd, Slot)>,
    slots: HashMap<RawFd, Slot>,
    timer: Timer,
    timeout_ms: u64,
    max_fd: usize,
    trig_conn_edge: bool,
    trig_listen_edge: bool,
    doc_root: std::path::PathBuf,
    queue: Arc<TaskQueue>,
    workers: WorkerPool,
    pools: Option<Pools>,
    closing: bool,
}

impl Reactor {
    /// Binds the listen socket and wires together every long-lived
    /// component the reactor owns. Fails only on fatal init conditions:
    /// socket bind/listen/register failure.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut listener = bind_listener(config)?;
        let demux = Demultiplexer::new(1024)?;
        demux.add(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;

        let registry = demux.try_clone_registry()?;
        let waker = Arc::new(Waker::new(&registry, mio::Token(WAKE_TOKEN))?);
        let (closed_tx, closed_rx) = unbounded();
        let (reinsert_tx, reinsert_rx) = unbounded();

        let queue = Arc::new(TaskQueue::new(config.thread_num.max(1) * 4));
        let workers = WorkerPool::new(config.thread_num, queue.clone());

        let db = DbPool::init(&config.db, config.conn_pool_num);
        let cache = CachePool::init(&config.cache, config.cache_pool_num);
        let pools = Some(Pools {
            db: Arc::new(db),
            cache: Arc::new(cache),
        });

        Ok(Self {
            demux,
            listener,
            waker,
            closed_tx,
            closed_rx,
            reinsert_tx,
            reinsert_rx,
            slots: HashMap::new(),
            timer: Timer::new(),
            timeout_ms: config.timeout_ms,
            max_fd: config.max_fd,
            trig_conn_edge: config.trig_mode.conn_edge_triggered(),
            trig_listen_edge: config.trig_mode.listen_edge_triggered(),
            doc_root: config.doc_root.clone(),
            queue,
            workers,
            pools,
            closing: false,
        })
    }

    /// Runs the event loop until [`Reactor::shutdown`] is called from
    /// another thread (e.g. a signal handler installed by the host binary)
    /// or a fatal I/O error occurs.
    pub fn run(&mut self) -> Result<()> {
        while !self.closing {
            self.tick()?;
        }
        self.teardown();
        Ok(())
    }

    /// Marks the reactor for shutdown; the current or next `tick` will exit
    /// the loop and release every resource.
    pub fn shutdown(&mut self) {
        self.closing = true;
        let _ = self.waker.wake();
    }

    /// Runs one iteration: wait for readiness up to the timer's next
    /// deadline, dispatch every event, then expire due timer entries.
    fn tick(&mut self) -> Result<()> {
        let timeout_ms = self.timer.next_tick_ms();
        let n = self.demux.wait(timeout_ms)?;

        for i in 0..n {
            let fd = self.demux.event_fd(i);
            let mask = self.demux.event_mask(i);

            match fd as usize {
                LISTEN_TOKEN => self.accept_loop()?,
                WAKE_TOKEN => self.drain_wake(),
                _ => self.dispatch(fd, mask),
            }
        }

        for (fd, reason) in self.timer.tick() {
            match reason {
                ExpireReason::IdleTimeout => self.try_close_idle(fd),
            }
        }

        Ok(())
    }

    /// Accepts every pending connection (draining under edge-trigger,
    /// stopping after one accept under level-trigger). Rejects past
    /// `max_fd` with the literal busy message.
    fn accept_loop(&mut self) -> Result<()> {
        loop {
            let (stream, _addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            self.handle_accepted(stream)?;

            if !self.trig_listen_edge {
                return Ok(());
            }
        }
    }

    fn handle_accepted(&mut self, stream: TcpStream) -> Result<()> {
        let fd = stream.as_raw_fd();

        if self.slots.len() >= self.max_fd {
            // Best-effort: a freshly accepted socket is almost always
            // writable immediately, but a short write is tolerated. The
            // peer still observes a close, just possibly with a truncated
            // message under backpressure.
            unsafe {
                libc::write(fd, BUSY_MESSAGE.as_ptr() as *const _, BUSY_MESSAGE.len());
                libc::close(fd);
            }
            log::warn!("connection limit ({}) reached, rejecting fd {fd}", self.max_fd);
            std::mem::forget(stream);
            return Ok(());
        }

        let mut stream = stream;
        let interest = Interest::READABLE | Interest::PEER_HANGUP;
        self.demux.add(&mut stream, fd as usize, interest)?;

        let conn = HttpConnection::init_with_pools(fd, self.doc_root.clone(), self.pools.clone());
        self.slots.insert(fd, Slot { stream, conn });
        if self.timeout_ms > 0 {
            self.timer.add(fd, self.timeout_ms, ExpireReason::IdleTimeout);
        }

        log::info!("accepted connection fd {fd}");
        Ok(())
    }

    /// Deregisters `fd` (emulating one-shot readiness) and hands its
    /// readiness to a worker task.
    fn dispatch(&mut self, fd: RawFd, _mask: Interest) {
        let Some(mut slot) = self.slots.remove(&fd) else {
            return;
        };

        if let Err(err) = self.demux.remove(&mut slot.stream) {
            log::error!("failed to deregister fd {fd}: {err}");
            return;
        }

        let registry = match self.demux.try_clone_registry() {
            Ok(r) => r,
            Err(err) => {
                log::error!("failed to clone registry for fd {fd}: {err}");
                return;
            }
        };
        let closed_tx = self.closed_tx.clone();
        let reinsert_tx = self.reinsert_tx.clone();
        let waker = self.waker.clone();
        let edge_triggered = self.trig_conn_edge;

        let task: Box<dyn FnOnce() + Send + 'static> = Box::new(move || {
            let outcome = if slot.conn.state() == crate::http::ConnState::Writing {
                run_write_task(&mut slot.conn)
            } else {
                run_read_task(&mut slot.conn, edge_triggered)
            };

            match outcome {
                ConnOutcome::NeedsReregister(interest) => {
                    if registry
                        .reregister(&mut slot.stream, mio::Token(fd as usize), interest.to_mio())
                        .is_err()
                    {
                        report_closed(fd, &closed_tx, &waker);
                        return;
                    }
                    let _ = reinsert_tx.send((fd, slot));
                    let _ = waker.wake();
                }
                ConnOutcome::Closed => {
                    report_closed(fd, &closed_tx, &waker);
                }
            }
        });

        if self.workers.add_task(task).is_err() {
            log::warn!("task queue closed, dropping readiness for fd {fd}");
        }
    }

    /// Drains both the reinsertion and close-report channels a worker may
    /// have woken the reactor for. These are the reactor thread's only
    /// structural mutations of the shared table.
    fn drain_wake(&mut self) {
        while let Ok((fd, slot)) = self.reinsert_rx.try_recv() {
            if self.timeout_ms > 0 {
                // `add` inserts a fresh entry if the tick that ran while
                // this fd was out for dispatch expired and consumed its
                // timer entry; a plain `adjust` would silently no-op in
                // that case and leave the reinserted connection with no
                // idle timeout at all.
                self.timer.add(fd, self.timeout_ms, ExpireReason::IdleTimeout);
            }
            self.slots.insert(fd, slot);
        }
        while let Ok(fd) = self.closed_rx.try_recv() {
            self.slots.remove(&fd);
            self.timer.cancel(fd);
            unsafe {
                libc::close(fd);
            }
            log::info!("Client[{fd}] quit!");
        }
    }

    /// Closes `fd` from the reactor thread itself on idle timeout. If a
    /// worker currently holds this fd (it is absent from `self.slots`
    /// because it was deregistered for dispatch), the close is skipped for
    /// this tick; the worker will eventually report it closed or reregister
    /// it, and `drain_wake` reinstates the timer entry on reregistration.
    fn try_close_idle(&mut self, fd: RawFd) {
        let Some(mut slot) = self.slots.remove(&fd) else {
            return;
        };
        let _ = self.demux.remove(&mut slot.stream);
        unsafe {
            libc::close(fd);
        }
        log::info!("Client[{fd}] quit!");
    }

    /// Releases every owned resource: worker pool first (drains queued
    /// tasks, joins threads), then the resource pools, then the connection
    /// table.
    fn teardown(&mut self) {
        self.workers.wait_for_completion();
        self.queue.close();
        if let Some(pools) = &self.pools {
            pools.db.close();
            pools.cache.close();
        }
        for (fd, _) in self.slots.drain() {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

enum ConnOutcome {
    NeedsReregister(Interest),
    Closed,
}

fn run_read_task(conn: &mut HttpConnection, edge_triggered: bool) -> ConnOutcome {
    loop {
        match conn.read() {
            Ok(true) => {}
            Ok(false) => return ConnOutcome::Closed,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(_) => return ConnOutcome::Closed,
        }
        if !edge_triggered {
            break;
        }
    }

    if !conn.process() {
        return ConnOutcome::NeedsReregister(Interest::READABLE | Interest::PEER_HANGUP);
    }

    drain_write(conn)
}

fn run_write_task(conn: &mut HttpConnection) -> ConnOutcome {
    drain_write(conn)
}

fn drain_write(conn: &mut HttpConnection) -> ConnOutcome {
    match conn.write() {
        Ok(true) => {
            if conn.state() == crate::http::ConnState::Closed {
                ConnOutcome::Closed
            } else {
                ConnOutcome::NeedsReregister(Interest::READABLE | Interest::PEER_HANGUP)
            }
        }
        Ok(false) => ConnOutcome::NeedsReregister(Interest::WRITABLE),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            ConnOutcome::NeedsReregister(Interest::WRITABLE)
        }
        Err(_) => ConnOutcome::Closed,
    }
}

fn report_closed(fd: RawFd, closed_tx: &Sender<RawFd>, waker: &Waker) {
    let _ = closed_tx.send(fd);
    let _ = waker.wake();
}

/// Binds, sets `SO_REUSEADDR`/optional `SO_LINGER`, listens with a backlog
/// of 6, and sets non-blocking.
fn bind_listener(config: &Config) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    if config.opt_linger {
        socket.set_linger(Some(Duration::from_secs(1)))?;
    }

    let addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.port).parse().expect(
        "port is validated to be a u16 before this formats, so the address always parses",
    );
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    Ok(TcpListener::from_std(socket.into()))
}
