//! Socket facade with synchronous read/write over the shared dispatch loop.
//!
//! A non-blocking `MuxSocket` performs each operation as:
//!
//! 1. reset the direction's readiness flag
//! 2. attempt the operation against the engine
//! 3. on would-block, park on the `ReadinessWaiter` until the dispatch loop
//!    reports the direction ready (or errored, closed, timed out)
//! 4. retry exactly once and return whatever that yields
//!
//! The reset happens before the first attempt: with edge-triggered
//! delivery, a readiness edge that arrives between a failed attempt and the
//! wait would otherwise be wiped out and never repeated.
//!
//! Blocking sockets skip all of this and return the engine result
//! unchanged.

use crate::classify::{into_error, into_fatal};
use crate::error::{Direction, MuxError, MuxResult};
use crate::options::{self, Lifecycle, SocketOptions};
use crate::registry::PollRegistry;
use crate::waiter::{ReadinessWaiter, WaitError};
use parking_lot::Mutex;
use srtmux_engine::{EngineErrorCode, EngineResult, SocketHandle, SocketState, TransportEngine};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-socket I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketStats {
    /// Bytes handed to the engine.
    pub bytes_sent: u64,
    /// Bytes received from the engine.
    pub bytes_received: u64,
    /// Successful sends.
    pub messages_sent: u64,
    /// Successful receives.
    pub messages_received: u64,
    /// Times an operation parked on the readiness waiter.
    pub waits: u64,
    /// Retries after a wait.
    pub retries: u64,
}

#[derive(Debug, Default)]
struct SocketCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    waits: AtomicU64,
    retries: AtomicU64,
}

impl SocketCounters {
    fn record(&self, direction: Direction, bytes: usize) {
        let (bytes_counter, messages) = match direction {
            Direction::Read => (&self.bytes_received, &self.messages_received),
            Direction::Write => (&self.bytes_sent, &self.messages_sent),
        };
        bytes_counter.fetch_add(bytes as u64, Ordering::Relaxed);
        messages.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SocketStats {
        SocketStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// A transport socket whose readiness is delivered by a `PollRegistry`.
///
/// At most one thread may read and one thread may write concurrently.
///
/// # Examples
///
/// ```
/// use srtmux_core::{MuxConfig, MuxSocket, PollRegistry, SocketOptions};
/// use srtmux_engine::LoopbackEngine;
/// use std::sync::Arc;
///
/// let engine = Arc::new(LoopbackEngine::new());
/// let registry = PollRegistry::start(engine.clone(), MuxConfig::default()).unwrap();
/// let (a, b) = engine.open_pair();
///
/// let tx = MuxSocket::open(&registry, a, &SocketOptions::new()).unwrap();
/// let rx = MuxSocket::open(&registry, b, &SocketOptions::new()).unwrap();
///
/// tx.write(b"frame").unwrap();
/// let mut buf = [0u8; 16];
/// let n = rx.read(&mut buf).unwrap();
/// assert_eq!(&buf[..n], b"frame");
/// ```
pub struct MuxSocket {
    handle: SocketHandle,
    engine: Arc<dyn TransportEngine>,
    registry: Arc<PollRegistry>,
    waiter: Weak<ReadinessWaiter>,
    blocking: bool,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
    closed: AtomicBool,
    counters: SocketCounters,
}

impl MuxSocket {
    /// Wrap an engine socket: apply `options` at the prebind stage, select
    /// the I/O mode, and register with `registry`.
    ///
    /// The socket takes ownership of `handle` on success. On failure the
    /// handle is left open for the caller to dispose of.
    ///
    /// # Errors
    ///
    /// - `MuxError::InvalidOption` if an option is unknown, unparsable or
    ///   rejected by the engine
    /// - `MuxError::Fatal` if the engine refuses the I/O mode
    /// - `MuxError::Registration` if the registry refuses the handle
    pub fn open(
        registry: &Arc<PollRegistry>,
        handle: SocketHandle,
        options: &SocketOptions,
    ) -> MuxResult<Self> {
        let engine = Arc::clone(registry.engine());
        let blocking = options.blocking()?;
        options::apply_for_lifecycle(engine.as_ref(), handle, Lifecycle::Prebind, options)?;
        engine
            .set_blocking(handle, blocking)
            .map_err(into_fatal)?;

        let waiter = registry.register(handle)?;
        debug!(
            "Opened {} ({}, {} options)",
            handle,
            if blocking { "blocking" } else { "non-blocking" },
            options.len()
        );

        Ok(Self {
            handle,
            engine,
            registry: Arc::clone(registry),
            waiter: Arc::downgrade(&waiter),
            blocking,
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
            closed: AtomicBool::new(false),
            counters: SocketCounters::default(),
        })
    }

    /// Receive one message into `buf`.
    ///
    /// Returns the number of bytes received; an empty `buf` returns `0`
    /// without touching the engine.
    ///
    /// # Errors
    ///
    /// - `MuxError::Timeout` if the read deadline passes while waiting
    /// - `MuxError::Broken` if an error event arrives while waiting
    /// - `MuxError::WouldBlock` if the retry after readiness still blocks
    /// - `MuxError::Closed` or `MuxError::NotRunning` if the socket or the
    ///   registry goes away
    /// - `MuxError::Fatal` for any other engine failure
    pub fn read(&self, buf: &mut [u8]) -> MuxResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.transfer(Direction::Read, || self.engine.receive(self.handle, buf))
    }

    /// Send one message from `buf`.
    ///
    /// Returns the number of bytes accepted; an empty `buf` returns `0`
    /// without touching the engine.
    ///
    /// # Errors
    ///
    /// As for `read`, with the write deadline.
    pub fn write(&self, buf: &[u8]) -> MuxResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.transfer(Direction::Write, || self.engine.send(self.handle, buf))
    }

    fn transfer(
        &self,
        direction: Direction,
        mut op: impl FnMut() -> EngineResult<usize>,
    ) -> MuxResult<usize> {
        self.ensure_open()?;

        if self.blocking {
            let n = op().map_err(|e| into_error(e, direction))?;
            self.counters.record(direction, n);
            return Ok(n);
        }

        let waiter = self.waiter.upgrade().ok_or_else(|| self.gone())?;
        waiter.reset(direction);

        match op() {
            Ok(n) => {
                self.counters.record(direction, n);
                return Ok(n);
            }
            Err(e) => match into_error(e, direction) {
                MuxError::WouldBlock { .. } => {}
                other => return Err(other),
            },
        }

        self.counters.waits.fetch_add(1, Ordering::Relaxed);
        let deadline = *self.deadline(direction).lock();
        waiter
            .wait(direction, deadline)
            .map_err(|e| self.wait_failed(e, direction))?;
        drop(waiter);

        self.counters.retries.fetch_add(1, Ordering::Relaxed);
        let n = op().map_err(|e| into_error(e, direction))?;
        self.counters.record(direction, n);
        Ok(n)
    }

    fn deadline(&self, direction: Direction) -> &Mutex<Option<Instant>> {
        match direction {
            Direction::Read => &self.read_deadline,
            Direction::Write => &self.write_deadline,
        }
    }

    fn ensure_open(&self) -> MuxResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(MuxError::Closed(self.handle))
        } else {
            Ok(())
        }
    }

    /// Error for a waiter that no longer exists or was closed.
    fn gone(&self) -> MuxError {
        if !self.closed.load(Ordering::Acquire) && !self.registry.is_running() {
            MuxError::NotRunning
        } else {
            MuxError::Closed(self.handle)
        }
    }

    fn wait_failed(&self, err: WaitError, direction: Direction) -> MuxError {
        match err {
            WaitError::Fatal => MuxError::Broken(self.handle),
            WaitError::Timeout => MuxError::Timeout { direction },
            WaitError::Closed => self.gone(),
        }
    }

    /// Unregister from the dispatch loop and close the engine socket.
    /// Idempotent; blocked readers and writers wake with `Closed`.
    ///
    /// # Errors
    ///
    /// `MuxError::Registration` if the registry could not drop the handle,
    /// or `MuxError::Fatal` if the engine close failed. The socket counts
    /// as closed either way, and once the engine close succeeds the handle
    /// is removed from the registry even if unregistering failed.
    pub fn close(&self) -> MuxResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Unregister first: the engine may reuse the handle once closed.
        let unregistered = self.registry.unregister(self.handle);
        if unregistered.is_err() {
            if let Some(waiter) = self.waiter.upgrade() {
                waiter.close();
            }
        }

        let closed = match self.engine.close(self.handle) {
            Err(e) if e.code != EngineErrorCode::InvalidSocket => Err(into_fatal(e)),
            _ => Ok(()),
        };
        // The engine has released the handle and may hand it out again.
        if unregistered.is_err() && closed.is_ok() {
            self.registry.forget(self.handle);
        }
        debug!("Closed {}", self.handle);
        unregistered?;
        closed
    }

    /// True once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Apply one option after the socket is connected.
    ///
    /// # Errors
    ///
    /// `MuxError::InvalidOption` if the option is unknown, not settable at
    /// the post stage, unparsable or rejected by the engine.
    pub fn set_option(&self, name: &str, value: &str) -> MuxResult<()> {
        self.ensure_open()?;
        options::apply_option(self.engine.as_ref(), self.handle, Lifecycle::Post, name, value)
    }

    /// Deadline for future and pending-next reads; `None` waits forever.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self.read_deadline.lock() = deadline;
    }

    /// Deadline for future and pending-next writes; `None` waits forever.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        *self.write_deadline.lock() = deadline;
    }

    /// Set both deadlines.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    /// Read deadline `timeout` from now.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.set_read_deadline(timeout.and_then(|t| Instant::now().checked_add(t)));
    }

    /// Write deadline `timeout` from now.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.set_write_deadline(timeout.and_then(|t| Instant::now().checked_add(t)));
    }

    /// Engine handle.
    #[must_use]
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// True if the socket was opened in blocking mode.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Engine-reported liveness.
    #[must_use]
    pub fn state(&self) -> SocketState {
        self.engine.socket_state(self.handle)
    }

    /// I/O counters.
    #[must_use]
    pub fn stats(&self) -> SocketStats {
        self.counters.snapshot()
    }

    /// Registry servicing this socket.
    #[must_use]
    pub fn registry(&self) -> &Arc<PollRegistry> {
        &self.registry
    }
}

impl fmt::Debug for MuxSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxSocket")
            .field("handle", &self.handle)
            .field("blocking", &self.blocking)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for MuxSocket {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing {} on drop failed: {}", self.handle, e);
        }
    }
}

impl io::Read for &MuxSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        MuxSocket::read(*self, buf).map_err(io::Error::from)
    }
}

impl io::Write for &MuxSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        MuxSocket::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for MuxSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        MuxSocket::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for MuxSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        MuxSocket::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
