//! Integration tests for the poll registry and dispatch loop
//!
//! Tests for:
//! - Map membership tracks registration exactly
//! - Duplicate registration leaves the first waiter intact
//! - No cross-wake between sockets
//! - A full 512-event batch produces 512 distinct wakeups
//! - Poll failure and shutdown wake every blocked caller

use srtmux_core::{
    Direction, MuxConfig, PollRegistry, ReadinessWaiter, RegistrationError, RegistryState,
    WaitError,
};
use srtmux_engine::{EngineErrorCode, EventMask, LoopbackEngine, SocketHandle, TransportEngine};
use srtmux_integration_tests::{FAST_POLL, Harness, wait_until};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn deadline(ms: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_millis(ms))
}

// ----------------------------------------------------------------------------
// Membership
// ----------------------------------------------------------------------------

#[test]
fn test_handle_in_map_iff_registered() {
    let h = Harness::new();
    let handles: Vec<SocketHandle> = (0..8).map(|_| h.engine.open_pair().0).collect();

    for handle in &handles {
        h.registry.register(*handle).unwrap();
    }
    assert_eq!(h.registry.registered_count(), 8);

    for handle in handles.iter().step_by(2) {
        h.registry.unregister(*handle).unwrap();
    }
    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(h.registry.is_registered(*handle), i % 2 == 1);
        assert_eq!(
            h.engine.is_subscribed(h.registry.context(), *handle),
            i % 2 == 1
        );
    }
    assert_eq!(h.registry.registered_count(), 4);
}

#[test]
fn test_unregister_twice_is_noop() {
    let h = Harness::new();
    let (a, _b) = h.engine.open_pair();
    h.registry.register(a).unwrap();
    h.registry.unregister(a).unwrap();
    h.registry.unregister(a).unwrap();
    assert!(!h.registry.is_registered(a));
    // Never-registered handles are ignored too.
    h.registry.unregister(SocketHandle(4242)).unwrap();
}

#[test]
fn test_duplicate_register_rejected() {
    let h = Harness::new();
    let (a, _b) = h.engine.open_pair();
    let first = h.registry.register(a).unwrap();

    assert_eq!(
        h.registry.register(a).unwrap_err(),
        RegistrationError::AlreadyRegistered(a)
    );
    assert!(Arc::ptr_eq(&first, &h.registry.waiter(a).unwrap()));

    // The original waiter still receives events.
    first.reset(Direction::Read);
    h.engine.raise(a, EventMask::READABLE);
    assert_eq!(first.wait(Direction::Read, deadline(2000)), Ok(()));
}

#[test]
fn test_register_after_engine_drops_socket() {
    let h = Harness::new();
    let (a, _b) = h.engine.open_pair();
    h.registry.register(a).unwrap();
    h.engine.break_socket(a).unwrap();

    // The engine already dropped the subscription; removal is map-only.
    h.registry.unregister(a).unwrap();
    assert!(!h.registry.is_registered(a));

    // A broken socket cannot be subscribed again.
    assert_eq!(
        h.registry.register(a).unwrap_err(),
        RegistrationError::Transient(EngineErrorCode::InvalidSocket)
    );
}

// ----------------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------------

#[test]
fn test_no_cross_wake() {
    let h = Harness::new();
    let (a, _) = h.engine.open_pair();
    let (b, _) = h.engine.open_pair();
    let wa = h.registry.register(a).unwrap();
    let wb = h.registry.register(b).unwrap();
    wa.reset(Direction::Read);
    wb.reset(Direction::Read);
    wb.reset(Direction::Write);

    h.engine.raise(a, EventMask::READABLE);
    assert_eq!(wa.wait(Direction::Read, deadline(2000)), Ok(()));

    assert!(!wb.is_ready(Direction::Read));
    assert_eq!(
        wb.wait(Direction::Read, deadline(50)),
        Err(WaitError::Timeout)
    );
    assert!(!wa.is_ready(Direction::Write));
}

#[test]
fn test_writable_only_wakes_writer() {
    let h = Harness::new();
    let (a, _) = h.engine.open_pair();
    let waiter = h.registry.register(a).unwrap();
    waiter.reset(Direction::Read);
    waiter.reset(Direction::Write);

    h.engine.raise(a, EventMask::WRITABLE);
    assert_eq!(waiter.wait(Direction::Write, deadline(2000)), Ok(()));
    assert!(!waiter.is_ready(Direction::Read));
}

#[test]
fn test_full_batch_wakes_every_socket() {
    let h = Harness::new();
    assert_eq!(h.registry.config().batch_capacity, 512);

    let waiters: Vec<(SocketHandle, Arc<ReadinessWaiter>)> = (0..512)
        .map(|_| {
            let (a, _b) = h.engine.open_pair();
            let waiter = h.registry.register(a).unwrap();
            waiter.reset(Direction::Read);
            (a, waiter)
        })
        .collect();

    let before = h.registry.stats();
    for (handle, _) in &waiters {
        h.engine.raise(*handle, EventMask::READABLE);
    }
    for (_, waiter) in &waiters {
        assert_eq!(waiter.wait(Direction::Read, deadline(5000)), Ok(()));
    }

    assert!(wait_until(Duration::from_secs(2), || {
        h.registry.stats().read_wakeups - before.read_wakeups == 512
    }));
    assert_eq!(h.registry.stats().stale_events, before.stale_events);
}

#[test]
fn test_stale_events_are_skipped() {
    let h = Harness::new();
    let (a, _b) = h.engine.open_pair();
    let waiter = h.registry.register(a).unwrap();

    // Unregister races with a queued event: the event finds no waiter.
    h.engine.raise(a, EventMask::READABLE);
    h.registry.unregister(a).unwrap();
    assert!(waiter.is_closed());
    assert!(h.registry.is_running());
}

#[test]
fn test_broken_socket_wakes_waiter_within_poll_interval() {
    let h = Harness::new();
    let (a, _b) = h.engine.open_pair();
    let waiter = h.registry.register(a).unwrap();
    waiter.reset(Direction::Read);

    let parked = {
        let waiter = Arc::clone(&waiter);
        thread::spawn(move || waiter.wait(Direction::Read, None))
    };
    thread::sleep(Duration::from_millis(20));
    let broke_at = Instant::now();
    h.engine.break_socket(a).unwrap();

    assert_eq!(parked.join().unwrap(), Err(WaitError::Fatal));
    // One poll interval, plus slack for thread scheduling.
    assert!(broke_at.elapsed() < FAST_POLL + Duration::from_millis(40));
    assert!(wait_until(Duration::from_secs(1), || {
        h.registry.stats().error_wakeups == 1
    }));
}

// ----------------------------------------------------------------------------
// Failure and shutdown
// ----------------------------------------------------------------------------

#[test]
fn test_poll_failure_wakes_everyone() {
    let h = Harness::new();
    let waiters: Vec<Arc<ReadinessWaiter>> = (0..4)
        .map(|_| {
            let (a, _b) = h.engine.open_pair();
            h.registry.register(a).unwrap()
        })
        .collect();

    let parked: Vec<_> = waiters
        .iter()
        .map(|w| {
            let w = Arc::clone(w);
            thread::spawn(move || w.wait(Direction::Write, None))
        })
        .collect();
    thread::sleep(Duration::from_millis(20));

    h.engine
        .fail_context(h.registry.context(), EngineErrorCode::InvalidPollId)
        .unwrap();
    for p in parked {
        assert_eq!(p.join().unwrap(), Err(WaitError::Closed));
    }
    assert_eq!(h.registry.state(), RegistryState::Failed);
    assert_eq!(h.registry.registered_count(), 0);

    let (c, _d) = h.engine.open_pair();
    assert_eq!(
        h.registry.register(c).unwrap_err(),
        RegistrationError::ShutDown
    );
}

#[test]
fn test_shutdown_releases_context() {
    let engine = Arc::new(LoopbackEngine::new());
    let registry = PollRegistry::start(
        engine.clone(),
        MuxConfig::default().with_poll_timeout(FAST_POLL),
    )
    .unwrap();
    let context = registry.context();
    let (a, _b) = engine.open_pair();
    let waiter = registry.register(a).unwrap();

    let start = Instant::now();
    registry.shutdown();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(waiter.is_closed());
    assert_eq!(registry.state(), RegistryState::Stopped);

    // The context is gone from the engine.
    assert_eq!(
        engine.release_context(context).unwrap_err().code,
        EngineErrorCode::InvalidPollId
    );
}

#[test]
fn test_drop_shuts_down() {
    let engine = Arc::new(LoopbackEngine::new());
    let registry = PollRegistry::start(
        engine.clone(),
        MuxConfig::default().with_poll_timeout(FAST_POLL),
    )
    .unwrap();
    let context = registry.context();
    drop(registry);
    assert!(engine.release_context(context).is_err());
}
