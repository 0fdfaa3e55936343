//! Single-threaded event loop.
//!
//! The reactor thread owns the poller, the timer heap, the worker pool and
//! the connection table. A connection is moved out of the table into a
//! worker task for each readiness event and comes back through the
//! completion channel together with a [`Command`]. Connection sockets are
//! registered `EPOLLONESHOT`, so no event for a connection is delivered
//! while a worker holds it.

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::auth::CredentialStore;
use crate::config::Config;
use crate::error::ServerError;
use crate::http::connection::{Command, Connection, ServeContext};
use crate::http::response::busy_response;
use crate::server::listener;
use crate::server::poller::{Event, Interest, Poller};
use crate::server::pool::WorkerPool;
use crate::server::stats::ServerStats;
use crate::server::timer::TimerHeap;
use crate::server::waker::Waker;

/// Opaque connection identity. Never reused, unlike file descriptors.
pub type ConnId = u64;

const LISTENER: ConnId = 0;
const WAKER: ConnId = 1;
const FIRST_CONN: ConnId = 2;

enum Slot {
    Idle(Box<Connection>),
    /// Held by a worker task. `evicted` is set when the idle timer fired
    /// meanwhile; the socket has been shut down and is closed on return.
    Busy { fd: RawFd, evicted: bool },
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Read,
    Write,
}

struct Completion {
    id: ConnId,
    conn: Box<Connection>,
    command: Command,
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake event loop");
        }
    }
}

pub struct Server {
    listener: TcpListener,
    poller: Poller,
    waker: Arc<Waker>,
    timers: TimerHeap<ConnId>,
    pool: WorkerPool,
    conns: HashMap<ConnId, Slot>,
    next_id: ConnId,
    ctx: Arc<ServeContext>,
    stats: Arc<ServerStats>,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
    expired_tx: Sender<ConnId>,
    expired_rx: Receiver<ConnId>,
    shutdown: Arc<AtomicBool>,
    listener_edge: bool,
    connection_edge: bool,
    idle_timeout: Option<Duration>,
    max_connections: usize,
}

impl Server {
    /// Binds the listener and starts the worker threads. Serving begins
    /// with [`run`](Self::run).
    pub fn new(cfg: &Config, credentials: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let server_cfg = &cfg.server;
        let listener = listener::bind(&server_cfg.listen_addr, server_cfg.linger, server_cfg.backlog)
            .context("creating listener")?;
        let poller = Poller::new(server_cfg.max_events).map_err(ServerError::Poller)?;
        let waker = Arc::new(Waker::new().map_err(ServerError::Poller)?);

        let listener_edge = server_cfg.trigger_mode.listener_edge();
        let mut listen_interest = Interest::READABLE | Interest::RDHUP;
        if listener_edge {
            listen_interest = listen_interest | Interest::EDGE;
        }
        poller
            .register(listener.as_raw_fd(), LISTENER, listen_interest)
            .map_err(ServerError::Poller)?;
        poller
            .register(waker.as_raw_fd(), WAKER, Interest::READABLE)
            .map_err(ServerError::Poller)?;

        let workers = &cfg.workers;
        let pool = match workers.queue_capacity {
            0 => WorkerPool::new(workers.threads),
            capacity => WorkerPool::with_queue_capacity(workers.threads, capacity),
        }
        .map_err(ServerError::Workers)?;

        let stats = Arc::new(ServerStats::new());
        let ctx = Arc::new(ServeContext {
            root: cfg.static_files.root.clone(),
            credentials,
            stats: Arc::clone(&stats),
        });
        let (done_tx, done_rx) = channel::unbounded();
        let (expired_tx, expired_rx) = channel::unbounded();

        let idle_timeout =
            (server_cfg.idle_timeout_ms > 0).then(|| Duration::from_millis(server_cfg.idle_timeout_ms));

        info!(
            addr = %server_cfg.listen_addr,
            trigger_mode = ?server_cfg.trigger_mode,
            workers = workers.threads,
            idle_timeout_ms = server_cfg.idle_timeout_ms,
            root = %cfg.static_files.root.display(),
            "server initialized"
        );

        Ok(Self {
            listener,
            poller,
            waker,
            timers: TimerHeap::new(),
            pool,
            conns: HashMap::new(),
            next_id: FIRST_CONN,
            ctx,
            stats,
            done_tx,
            done_rx,
            expired_tx,
            expired_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            listener_edge,
            connection_edge: server_cfg.trigger_mode.connection_edge(),
            idle_timeout,
            max_connections: server_cfg.max_connections,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Runs the event loop until a [`ShutdownHandle`] stops it.
    pub fn run(&mut self) -> anyhow::Result<()> {
        info!("server started");
        while !self.shutdown.load(Ordering::Acquire) {
            let timeout = match self.idle_timeout {
                Some(_) => self.timers.next_deadline(Instant::now()),
                None => None,
            };
            let ready = self.poller.wait(timeout).context("waiting for events")?;

            for i in 0..ready {
                let event = self.poller.event_at(i);
                match event.token() {
                    LISTENER => self.accept(),
                    WAKER => {
                        if let Err(e) = self.waker.reset() {
                            warn!(error = %e, "failed to reset waker");
                        }
                    }
                    id => self.dispatch(id, event),
                }
            }

            self.drain_completions();
            self.timers.pop_expired(Instant::now());
            while let Ok(id) = self.expired_rx.try_recv() {
                self.evict(id);
            }
        }

        self.close_all();
        info!("server stopped");
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.add_client(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
            if !self.listener_edge {
                break;
            }
        }
    }

    fn add_client(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(peer = %peer, error = %e, "failed to set non-blocking");
            return;
        }
        if self.conns.len() >= self.max_connections {
            self.stats.connection_rejected();
            warn!(peer = %peer, max = self.max_connections, "server busy, rejecting client");
            if let Err(e) = (&stream).write(&busy_response()) {
                debug!(peer = %peer, error = %e, "busy response not sent");
            }
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        let conn = Box::new(Connection::new(stream, peer, self.connection_edge));
        if let Err(e) = self
            .poller
            .register(conn.fd(), id, self.conn_interest(Interest::READABLE))
        {
            warn!(peer = %peer, error = %e, "failed to register client");
            return;
        }
        if let Some(timeout) = self.idle_timeout {
            let expired = self.expired_tx.clone();
            self.timers.add(id, timeout, move || {
                if expired.send(id).is_err() {
                    debug!(id, "expiry channel closed");
                }
            });
        }
        self.conns.insert(id, Slot::Idle(conn));

        let active = self.stats.connection_opened();
        info!(peer = %peer, id, active, "client connected");
    }

    fn conn_interest(&self, base: Interest) -> Interest {
        let interest = base | Interest::ONESHOT | Interest::RDHUP;
        if self.connection_edge {
            interest | Interest::EDGE
        } else {
            interest
        }
    }

    fn dispatch(&mut self, id: ConnId, event: Event) {
        if !matches!(self.conns.get(&id), Some(Slot::Idle(_))) {
            debug!(id, "event for unknown or busy connection");
            return;
        }
        if event.is_closed() {
            self.close(id);
            return;
        }

        let step = if event.is_readable() {
            Step::Read
        } else if event.is_writable() {
            Step::Write
        } else {
            return;
        };
        if let Some(timeout) = self.idle_timeout {
            self.timers.adjust(id, timeout);
        }
        self.spawn(id, step);
    }

    /// Moves the connection into a worker task.
    fn spawn(&mut self, id: ConnId, step: Step) {
        let mut conn = match self.conns.remove(&id) {
            Some(Slot::Idle(conn)) => conn,
            Some(busy) => {
                self.conns.insert(id, busy);
                return;
            }
            None => return,
        };
        self.conns.insert(
            id,
            Slot::Busy {
                fd: conn.fd(),
                evicted: false,
            },
        );

        let ctx = Arc::clone(&self.ctx);
        let done = self.done_tx.clone();
        let waker = Arc::clone(&self.waker);
        let submitted = self.pool.add_task(move || {
            let command = panic::catch_unwind(AssertUnwindSafe(|| match step {
                Step::Read => conn.on_read(&ctx),
                Step::Write => conn.on_write(&ctx),
            }))
            .unwrap_or_else(|_| {
                error!(id, "connection task panicked");
                Command::Close
            });
            match done.send(Completion { id, conn, command }) {
                Ok(()) => {
                    if let Err(e) = waker.wake() {
                        debug!(id, error = %e, "failed to wake event loop");
                    }
                }
                Err(_) => debug!(id, "event loop gone, dropping connection"),
            }
        });

        // A rejected task has already dropped the connection, closing it.
        if let Err(e) = submitted {
            warn!(id, error = %e, "dropping connection");
            self.conns.remove(&id);
            self.timers.remove(id);
            self.stats.connection_closed();
        }
    }

    fn drain_completions(&mut self) {
        while let Ok(Completion { id, mut conn, command }) = self.done_rx.try_recv() {
            let evicted = match self.conns.get(&id) {
                Some(Slot::Busy { evicted, .. }) => *evicted,
                _ => {
                    warn!(id, "completion for unknown connection");
                    continue;
                }
            };

            let interest = match command {
                _ if evicted => None,
                Command::Close => None,
                Command::RearmRead => Some(Interest::READABLE),
                Command::RearmWrite => Some(Interest::WRITABLE),
            };
            let Some(interest) = interest else {
                self.conns.remove(&id);
                self.finish_close(id, &mut conn);
                continue;
            };

            if let Err(e) = self
                .poller
                .modify(conn.fd(), id, self.conn_interest(interest))
            {
                warn!(id, error = %e, "failed to re-arm connection");
                self.conns.remove(&id);
                self.finish_close(id, &mut conn);
                continue;
            }
            self.conns.insert(id, Slot::Idle(conn));
        }
    }

    /// Closes an idle connection now. A busy one is shut down and marked so
    /// the completion closes it.
    fn close(&mut self, id: ConnId) {
        match self.conns.remove(&id) {
            Some(Slot::Idle(mut conn)) => self.finish_close(id, &mut conn),
            Some(Slot::Busy { fd, evicted }) => {
                if !evicted {
                    unsafe {
                        libc::shutdown(fd, libc::SHUT_RDWR);
                    }
                }
                self.conns.insert(id, Slot::Busy { fd, evicted: true });
                self.timers.remove(id);
            }
            None => {}
        }
    }

    fn evict(&mut self, id: ConnId) {
        if !self.conns.contains_key(&id) {
            return;
        }
        self.stats.connection_evicted();
        info!(id, "evicting idle connection");
        self.close(id);
    }

    fn finish_close(&mut self, id: ConnId, conn: &mut Connection) {
        self.timers.remove(id);
        if let Err(e) = self.poller.deregister(conn.fd()) {
            debug!(id, error = %e, "deregister failed");
        }
        if let Err(e) = conn.close() {
            debug!(id, error = %e, "shutdown failed");
        }
        let active = self.stats.connection_closed();
        info!(peer = %conn.peer_addr(), id, active, "client disconnected");
    }

    fn close_all(&mut self) {
        self.pool.shutdown();
        self.drain_completions();
        let ids: Vec<ConnId> = self.conns.keys().copied().collect();
        for id in ids {
            self.close(id);
        }
        // Workers are joined, so no slot can still be busy.
        self.conns.clear();
        self.timers.clear();
    }
}
