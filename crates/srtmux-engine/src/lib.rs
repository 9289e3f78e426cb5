//! # srtmux Engine
//!
//! Interface between the srtmux readiness multiplexer and the native
//! transport engine that actually moves bytes.
//!
//! This crate provides:
//! - The `TransportEngine` trait: event contexts, interest registration,
//!   batched polling, socket state queries and non-blocking send/receive
//! - Socket and context handles, event masks and event records
//! - Engine error codes with an attached system error code
//! - Log vocabulary (levels, functional areas, records) for log bridging
//! - Socket option identifiers and typed option values
//! - `LoopbackEngine`: an in-process engine with edge-triggered contexts
//! - `EpollEngine`: OS sockets driven through Linux epoll (Linux-only)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod log;
pub mod loopback;
pub mod types;

// OS epoll engine is Linux-specific
#[cfg(target_os = "linux")]
pub mod epoll;

pub use engine::TransportEngine;
pub use error::{EngineError, EngineErrorCode, EngineResult};
pub use log::{LogArea, LogHandlerRef, LogLevel, LogRecord, RawLogHandler};
pub use loopback::{LoopbackConfig, LoopbackEngine};
pub use types::{
    ContextHandle, EngineEvent, EventMask, OptionId, OptionValue, SocketHandle, SocketState,
    TransType,
};

#[cfg(target_os = "linux")]
pub use epoll::EpollEngine;
