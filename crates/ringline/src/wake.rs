//! Wakeup coordination between the two peers.
//!
//! The transport carries no data in its wake path: the client raises a
//! doorbell (a zero-argument signal), and the server, after its bounded
//! spin finds all rings empty, blocks in a zero-argument unavailable-read
//! callback until a doorbell arrives.
//!
//! Two backings are provided:
//!
//! - [`WakeSignal`]: a capacity-one in-process rendezvous, for when both
//!   streams live in one process (tests, benchmarks, embedded use).
//! - [`Doorbell`]: a Unix-domain socketpair, for two-process deployments.
//!   Each peer holds one end; a 1-byte datagram is the signal.

use std::io::{self, ErrorKind};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use parking_lot::{Condvar, Mutex};

/// Outcome of the consumer's blocking unavailable-read callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    /// A doorbell arrived; resume consuming.
    Woken,
    /// The embedder is shutting down; the stream becomes terminal.
    Shutdown,
}

/// Client-side doorbell callable, stored by value at construction.
pub type DoorbellFn = Box<dyn Fn() + Send>;

/// Server-side unavailable-read callable, stored by value at construction.
pub type UnavailableReadFn = Box<dyn FnMut() -> WakeResult + Send>;

/// Capacity-one in-process rendezvous.
///
/// `signal` is cheap and tolerates redundant calls: consecutive signals
/// collapse into one pending token, matching the at-most-one-block-per-
/// doorbell contract.
pub struct WakeSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Deposit a wake token and wake the waiter if one is blocked.
    pub fn signal(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    /// Block until a token is available, then consume it.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }

    /// Consume a token if one is pending, without blocking.
    pub fn try_wait(&self) -> bool {
        let mut pending = self.pending.lock();
        std::mem::replace(&mut *pending, false)
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-process doorbell over a Unix-domain socketpair.
///
/// Uses `SOCK_DGRAM` so each signal is one discrete datagram. The send
/// side never blocks: a full socket buffer means the peer is already
/// signaled, so the datagram is dropped.
pub struct Doorbell {
    fd: OwnedFd,
}

impl Doorbell {
    /// Create a socketpair and return (doorbell, peer_raw_fd).
    ///
    /// The peer fd should be handed to the other process (e.g. via a
    /// `--doorbell-fd=N` argument); the creator should close it after
    /// spawning.
    pub fn create_pair() -> io::Result<(Self, RawFd)> {
        let (ours, peer) = create_socketpair()?;
        let peer_raw = peer.into_raw_fd();
        Ok((Self { fd: ours }, peer_raw))
    }

    /// Wrap an inherited raw file descriptor.
    ///
    /// # Safety
    ///
    /// The fd must be a valid, open descriptor from a socketpair; this
    /// takes ownership of it.
    pub fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        // SAFETY: caller guarantees fd is valid and transfers ownership.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd: owned })
    }

    /// Signal the other side.
    pub fn signal(&self) {
        let buf = [1u8];
        // SAFETY: fd is valid, buf is valid.
        let ret = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            // A full buffer means the other side is already signaled.
            if err.kind() != ErrorKind::WouldBlock {
                tracing::warn!("doorbell signal failed: {}", err);
            }
        }
    }

    /// Block until a signal from the other side arrives, then drain any
    /// further queued signals.
    pub fn wait(&self) -> io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: fd is valid, buf is valid.
            let ret = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if ret > 0 {
                self.drain();
                return Ok(());
            }
            if ret == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "doorbell peer closed",
                ));
            }
            let err = io::Error::last_os_error();
            if err.kind() != ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Drain pending signals without blocking.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: fd is valid, buf is valid.
            let ret = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if ret > 0 {
                continue;
            }
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != ErrorKind::WouldBlock {
                    tracing::warn!("doorbell drain failed: {}", err);
                }
            }
            break;
        }
    }

    /// The raw file descriptor.
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Create a Unix-domain socketpair (`SOCK_DGRAM`).
///
/// `SOCK_CLOEXEC` is deliberately not set so the peer fd can be inherited
/// by a spawned process.
fn create_socketpair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];

    let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr()) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: socketpair succeeded, fds are valid.
    let fd0 = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let fd1 = unsafe { OwnedFd::from_raw_fd(fds[1]) };

    Ok((fd0, fd1))
}
