//! Error types for the readiness multiplexer.

use srtmux_engine::{EngineError, EngineErrorCode, SocketHandle};
use std::fmt;
use std::io;
use thiserror::Error;

/// I/O direction of a socket operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receiving.
    Read,
    /// Sending.
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Category of an unrecoverable engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// Connection lost or reset by the peer.
    ConnectionLost,
    /// Socket is not (or no longer) connected.
    NotConnected,
    /// The engine does not know the socket.
    InvalidSocket,
    /// The event context failed.
    Poll,
    /// The engine ran out of resources.
    Resource,
    /// Any other engine error.
    Other(EngineErrorCode),
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::NotConnected => f.write_str("not connected"),
            Self::InvalidSocket => f.write_str("invalid socket"),
            Self::Poll => f.write_str("event context"),
            Self::Resource => f.write_str("resource"),
            Self::Other(code) => write!(f, "engine ({})", code.code()),
        }
    }
}

/// Why a socket could not be added to (or removed from) the shared context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The handle already has a waiter; the existing one is left intact.
    #[error("socket {0} is already registered")]
    AlreadyRegistered(SocketHandle),

    /// The shared event context is unusable.
    #[error("shared event context is corrupt: {0}")]
    ContextCorrupt(EngineErrorCode),

    /// The engine refused the change; the socket may be retried or closed.
    #[error("engine rejected the request: {0}")]
    Transient(EngineErrorCode),

    /// The registry is stopped or failed.
    #[error("poll registry is shut down")]
    ShutDown,
}

/// Errors surfaced by the multiplexer and the socket facade.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The operation would block and still did after the single retry.
    #[error("{direction} would block: {code}")]
    WouldBlock {
        /// Blocked direction.
        direction: Direction,
        /// Engine code that reported it.
        code: EngineErrorCode,
    },

    /// A deadline elapsed before the socket became ready.
    #[error("{direction} timed out")]
    Timeout {
        /// Direction that timed out.
        direction: Direction,
    },

    /// Unrecoverable engine error.
    #[error("{kind} failure: {code}")]
    Fatal {
        /// Failure category.
        kind: FatalKind,
        /// Engine code.
        code: EngineErrorCode,
        /// Accompanying system error number, if the engine reported one.
        system: Option<i32>,
    },

    /// The dispatch loop reported an error event for the socket.
    #[error("socket {0} is broken")]
    Broken(SocketHandle),

    /// The socket was closed while (or before) the call ran.
    #[error("socket {0} is closed")]
    Closed(SocketHandle),

    /// The poll registry is not running.
    #[error("poll registry is not running")]
    NotRunning,

    /// Registration with the shared context failed.
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// Socket option validation or application failed.
    #[error("{0}")]
    InvalidOption(String),

    /// Invalid multiplexer configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The shared event context could not be created.
    #[error("failed to create event context: {0}")]
    ContextInit(#[source] EngineError),

    /// The dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] io::Error),
}

impl MuxError {
    /// True for deadline expiry, mirroring `net.Error`-style timeout checks.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True if the socket is unusable after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Fatal { .. } | Self::Broken(_) | Self::Closed(_) | Self::NotRunning
        )
    }

    /// The system error that accompanied an engine failure, if any.
    #[must_use]
    pub fn system_error(&self) -> Option<io::Error> {
        match self {
            Self::Fatal {
                system: Some(errno),
                ..
            } => Some(io::Error::from_raw_os_error(*errno)),
            _ => None,
        }
    }
}

impl From<MuxError> for io::Error {
    fn from(err: MuxError) -> Self {
        let kind = match &err {
            MuxError::WouldBlock { .. } => io::ErrorKind::WouldBlock,
            MuxError::Timeout { .. } => io::ErrorKind::TimedOut,
            MuxError::Broken(_)
            | MuxError::Fatal {
                kind: FatalKind::ConnectionLost,
                ..
            } => io::ErrorKind::BrokenPipe,
            MuxError::Closed(_)
            | MuxError::Fatal {
                kind: FatalKind::NotConnected | FatalKind::InvalidSocket,
                ..
            } => io::ErrorKind::NotConnected,
            MuxError::InvalidOption(_) | MuxError::InvalidConfig(_) => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Result type for multiplexer operations.
pub type MuxResult<T> = std::result::Result<T, MuxError>;
