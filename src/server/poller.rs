//! Thin wrapper over Linux `epoll`.
//!
//! Every registration carries a caller-chosen `u64` token, returned with each
//! readiness event. The server uses connection ids as tokens, never raw
//! descriptors, so a recycled descriptor can not be mistaken for an old
//! connection.

use std::io;
use std::ops::BitOr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Interest / readiness mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    /// Peer closed its writing half.
    pub const RDHUP: Interest = Interest(libc::EPOLLRDHUP as u32);
    /// Deliver one event, then disable the descriptor until it is re-armed.
    pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);
    /// Edge-triggered delivery.
    pub const EDGE: Interest = Interest(libc::EPOLLET as u32);

    pub const fn empty() -> Self {
        Interest(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

/// A readiness notification, valid until the next [`Poller::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    token: u64,
    events: u32,
}

impl Event {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.events & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.events & libc::EPOLLOUT as u32 != 0
    }

    /// Hangup, peer half-close, or socket error.
    pub fn is_closed(&self) -> bool {
        self.events & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

pub struct Poller {
    epfd: OwnedFd,
    events: Vec<libc::epoll_event>,
    ready: usize,
}

impl Poller {
    /// Creates an epoll instance able to report up to `max_events` events
    /// per [`wait`](Self::wait).
    pub fn new(max_events: usize) -> io::Result<Self> {
        assert!(max_events > 0, "max_events must be positive");
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd: unsafe { OwnedFd::from_raw_fd(fd) },
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events],
            ready: 0,
        })
    }

    pub fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Replaces the interest set of an already registered descriptor. This
    /// is also how a one-shot registration is re-armed.
    pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, Interest::empty())
    }

    /// Blocks until at least one registered descriptor is ready or the
    /// timeout elapses. `None` waits forever, `Some(Duration::ZERO)` polls.
    ///
    /// Sub-millisecond remainders are rounded up so a pending timer never
    /// turns into a zero-timeout spin.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => {
                let mut ms = d.as_millis();
                if Duration::from_millis(ms as u64) < d {
                    ms += 1;
                }
                ms.min(i32::MAX as u128) as i32
            }
        };

        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            self.ready = 0;
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        self.ready = n as usize;
        Ok(self.ready)
    }

    /// The `i`-th event reported by the last [`wait`](Self::wait).
    pub fn event_at(&self, i: usize) -> Event {
        assert!(i < self.ready, "event index {i} out of range ({})", self.ready);
        let raw = self.events[i];
        Event {
            token: raw.u64,
            events: raw.events,
        }
    }

    pub fn events(&self) -> impl Iterator<Item = Event> + '_ {
        (0..self.ready).map(|i| self.event_at(i))
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: token,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
