//! Integration tests for the socket facade retry protocol
//!
//! Tests for:
//! - Fast path, single wait, single retry
//! - Deadlines produce retryable timeouts
//! - Teardown never strands a blocked caller
//! - Error classification surfaces through `std::io`

use srtmux_core::{MuxError, MuxSocket, SocketOptions};
use srtmux_engine::{EngineErrorCode, SocketState, TransportEngine};
use srtmux_integration_tests::Harness;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_write_would_block_then_writable_retries_once() {
    let h = Harness::with_queue(2);
    let (tx, rx) = h.pair();
    tx.write(b"one").unwrap();
    tx.write(b"two").unwrap();

    let writer = thread::spawn(move || {
        let n = tx.write(b"three").unwrap();
        (n, tx.stats())
    });
    thread::sleep(Duration::from_millis(30));

    let mut buf = [0u8; 16];
    assert_eq!(rx.read(&mut buf).unwrap(), 3);

    let (n, stats) = writer.join().unwrap();
    assert_eq!(n, 5);
    assert_eq!(stats.waits, 1);
    assert_eq!(stats.retries, 1);
}

#[test]
fn test_retry_result_is_returned_verbatim() {
    // A readiness signal without data: the single retry still blocks and
    // that result is surfaced instead of waiting again.
    let h = Harness::new();
    let (_tx, rx) = h.pair();
    let handle = rx.handle();

    let reader = thread::spawn(move || {
        let mut buf = [0u8; 8];
        (rx.read(&mut buf), rx.stats())
    });
    thread::sleep(Duration::from_millis(30));
    h.engine.raise(handle, srtmux_engine::EventMask::READABLE);

    let (result, stats) = reader.join().unwrap();
    assert!(matches!(
        result,
        Err(MuxError::WouldBlock {
            code: EngineErrorCode::AsyncReceive,
            ..
        })
    ));
    assert_eq!(stats.retries, 1);
}

#[test]
fn test_timeout_is_retryable() {
    let h = Harness::new();
    let (tx, rx) = h.pair();
    rx.set_read_timeout(Some(Duration::from_millis(20)));

    let mut buf = [0u8; 8];
    let err = rx.read(&mut buf).unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_fatal());

    // Same socket keeps working.
    rx.set_read_deadline(None);
    tx.write(b"ok").unwrap();
    assert_eq!(rx.read(&mut buf).unwrap(), 2);
}

#[test]
fn test_write_deadline_times_out() {
    let h = Harness::with_queue(1);
    let (tx, _rx) = h.pair();
    tx.write(b"fill").unwrap();
    tx.set_write_deadline(Some(Instant::now() + Duration::from_millis(20)));

    let err = tx.write(b"blocked").unwrap_err();
    assert!(matches!(
        err,
        MuxError::Timeout {
            direction: srtmux_core::Direction::Write
        }
    ));
}

#[test]
fn test_set_deadline_applies_to_both_directions() {
    let h = Harness::with_queue(1);
    let (tx, _rx) = h.pair();
    tx.write(b"fill").unwrap();
    tx.set_deadline(Some(Instant::now() + Duration::from_millis(20)));
    assert!(tx.write(b"x").unwrap_err().is_timeout());
    assert!(tx.read(&mut [0u8; 4]).unwrap_err().is_timeout());
}

#[test]
fn test_peer_close_surfaces_as_broken() {
    let h = Harness::new();
    let (tx, rx) = h.pair();
    let reader = thread::spawn(move || {
        let mut buf = [0u8; 8];
        let result = rx.read(&mut buf);
        (result, rx.state())
    });
    thread::sleep(Duration::from_millis(30));
    tx.close().unwrap();

    let (result, state) = reader.join().unwrap();
    assert!(matches!(result, Err(MuxError::Broken(_))));
    assert_eq!(state, SocketState::Broken);
}

#[test]
fn test_concurrent_close_never_strands_reader_and_writer() {
    let h = Harness::with_queue(1);
    let (tx, _rx) = h.pair();
    tx.write(b"fill").unwrap();
    let tx = Arc::new(tx);

    let reader = {
        let tx = Arc::clone(&tx);
        thread::spawn(move || tx.read(&mut [0u8; 8]))
    };
    let writer = {
        let tx = Arc::clone(&tx);
        thread::spawn(move || tx.write(b"more"))
    };
    thread::sleep(Duration::from_millis(30));
    tx.close().unwrap();

    assert!(matches!(reader.join().unwrap(), Err(MuxError::Closed(_))));
    assert!(matches!(writer.join().unwrap(), Err(MuxError::Closed(_))));
    assert!(!h.registry.is_registered(tx.handle()));
}

#[test]
fn test_registry_shutdown_wakes_sockets() {
    let h = Harness::new();
    let (_tx, rx) = h.pair();
    let reader = thread::spawn(move || rx.read(&mut [0u8; 8]));
    thread::sleep(Duration::from_millis(30));
    h.registry.shutdown();

    let err = reader.join().unwrap().unwrap_err();
    assert!(matches!(err, MuxError::NotRunning), "{err:?}");
}

#[test]
fn test_io_error_mapping() {
    let h = Harness::new();
    let (mut tx, mut rx) = h.pair();
    tx.write_all(b"hello").unwrap();
    let mut buf = [0u8; 8];
    let n = Read::read(&mut rx, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");

    rx.set_read_timeout(Some(Duration::from_millis(5)));
    let err = Read::read(&mut rx, &mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);

    tx.close().unwrap();
    let err = Write::write(&mut tx, b"late").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[test]
fn test_open_with_options() {
    let h = Harness::new();
    let (a, _b) = h.engine.open_pair();
    let options = SocketOptions::new()
        .with("transtype", "live")
        .with("latency", "120")
        .with("blocking", "0");
    let sock = MuxSocket::open(&h.registry, a, &options).unwrap();
    assert!(!sock.is_blocking());

    let (c, _d) = h.engine.open_pair();
    let bad = SocketOptions::new().with("transtype", "bulk");
    let err = MuxSocket::open(&h.registry, c, &bad).unwrap_err();
    assert!(err.to_string().contains("must be 'live' or 'file'"));
    // The handle is left to the caller.
    assert_eq!(h.engine.socket_state(c), SocketState::Active);
}
