//! Per-socket readiness waiter.
//!
//! A `ReadinessWaiter` holds one independent lane per direction. The
//! dispatch loop signals a lane with `unblock`; the socket facade parks on
//! it with `wait`. At most one thread may wait on a given lane at a time.
//!
//! Once the registry drops a socket it closes the waiter: any parked caller
//! wakes with `WaitError::Closed` and later waits return immediately, so a
//! socket being torn down can never strand a caller.

use crate::error::Direction;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;

/// Why `ReadinessWaiter::wait` returned without readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// An error event was delivered for the socket.
    #[error("error event delivered")]
    Fatal,
    /// The waiter was closed by the registry.
    #[error("waiter closed")]
    Closed,
    /// The caller's deadline elapsed.
    #[error("deadline elapsed")]
    Timeout,
}

#[derive(Debug, Default)]
struct Slot {
    ready: bool,
    error: bool,
    waiting: bool,
}

#[derive(Debug, Default)]
struct Lane {
    slot: Mutex<Slot>,
    signal: Condvar,
}

/// Wait/signal primitive for the read and write directions of one socket.
#[derive(Debug, Default)]
pub struct ReadinessWaiter {
    read: Lane,
    write: Lane,
    closed: AtomicBool,
}

impl ReadinessWaiter {
    /// Create an open waiter with both directions not ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, direction: Direction) -> &Lane {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    /// Clear the ready and error flags of one direction.
    ///
    /// Must be called before attempting the operation whose would-block
    /// result leads to `wait`, so a readiness edge delivered in between is
    /// not lost.
    pub fn reset(&self, direction: Direction) {
        let mut slot = self.lane(direction).slot.lock();
        slot.ready = false;
        slot.error = false;
    }

    /// Park until the direction is ready, errored, closed, or `deadline`
    /// passes.
    ///
    /// An error takes precedence over readiness.
    ///
    /// # Errors
    ///
    /// - `WaitError::Fatal` if an error event was delivered
    /// - `WaitError::Closed` if the waiter was closed
    /// - `WaitError::Timeout` if `deadline` passed first
    pub fn wait(&self, direction: Direction, deadline: Option<Instant>) -> Result<(), WaitError> {
        let lane = self.lane(direction);
        let mut slot = lane.slot.lock();
        debug_assert!(!slot.waiting, "second concurrent {direction} waiter");
        slot.waiting = true;

        let outcome = loop {
            if slot.error {
                break Err(WaitError::Fatal);
            }
            if slot.ready {
                break Ok(());
            }
            if self.closed.load(Ordering::Acquire) {
                break Err(WaitError::Closed);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        break Err(WaitError::Timeout);
                    }
                    lane.signal.wait_until(&mut slot, deadline);
                }
                None => lane.signal.wait(&mut slot),
            }
        };

        slot.waiting = false;
        outcome
    }

    /// Record readiness and/or an error for one direction and wake its
    /// waiter, if any. Idempotent.
    pub fn unblock(&self, direction: Direction, is_error: bool, is_ready: bool) {
        let lane = self.lane(direction);
        {
            let mut slot = lane.slot.lock();
            slot.error |= is_error;
            slot.ready |= is_ready;
        }
        lane.signal.notify_one();
    }

    /// Close the waiter, waking any parked caller in either direction.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for lane in [&self.read, &self.write] {
            // Taking the lock orders the store before a waiter's next check.
            drop(lane.slot.lock());
            lane.signal.notify_all();
        }
    }

    /// True once `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True if the direction is flagged ready (without consuming it).
    #[must_use]
    pub fn is_ready(&self, direction: Direction) -> bool {
        self.lane(direction).slot.lock().ready
    }
}
