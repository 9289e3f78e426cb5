//! # srtmux Core
//!
//! Readiness multiplexer for transport sockets whose I/O is driven by an
//! external engine through one shared, edge-triggered event context.
//!
//! This crate provides:
//! - `PollRegistry`: the shared context plus a single dispatch thread that
//!   polls it and wakes per-socket waiters
//! - `ReadinessWaiter`: per-socket, per-direction wait/signal primitive
//! - `MuxSocket`: synchronous read/write with a fast path, a readiness wait
//!   and a single retry, plus deadlines and `std::io` impls
//! - Error classification of raw engine errors
//! - Named socket options with lifecycle checking
//! - A bridge from engine log lines to closures or `tracing`
//! - `MuxConfig` with TOML loading
//!
//! ## Example
//!
//! ```
//! use srtmux_core::{MuxConfig, MuxSocket, PollRegistry, SocketOptions};
//! use srtmux_engine::LoopbackEngine;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let engine = Arc::new(LoopbackEngine::new());
//! let registry = PollRegistry::start(engine.clone(), MuxConfig::default()).unwrap();
//! let (a, b) = engine.open_pair();
//! let tx = MuxSocket::open(&registry, a, &SocketOptions::new()).unwrap();
//! let rx = MuxSocket::open(&registry, b, &SocketOptions::new()).unwrap();
//!
//! // The reader parks until the dispatch loop reports data.
//! let reader = thread::spawn(move || {
//!     let mut buf = [0u8; 32];
//!     let n = rx.read(&mut buf).unwrap();
//!     buf[..n].to_vec()
//! });
//! tx.write(b"payload").unwrap();
//! assert_eq!(reader.join().unwrap(), b"payload");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod config;
pub mod error;
pub mod logging;
pub mod options;
pub mod registry;
pub mod socket;
pub mod waiter;

pub use classify::{ErrorClass, classify};
pub use config::MuxConfig;
pub use error::{Direction, FatalKind, MuxError, MuxResult, RegistrationError};
pub use options::{Lifecycle, SocketOptions};
pub use registry::{DispatchStats, LazyRegistry, PollRegistry, RegistryState};
pub use socket::{MuxSocket, SocketStats};
pub use waiter::{ReadinessWaiter, WaitError};
