//! Error codes reported by a transport engine.
//!
//! Codes follow the native engine's `major * 1000 + minor` numbering so
//! they can be logged and compared against engine documentation directly.

use std::fmt;
use thiserror::Error;

/// Engine error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorCode {
    /// Unclassified failure.
    Unknown,
    /// Connection setup failure.
    ConnectionSetup,
    /// No server at the remote address.
    NoServer,
    /// Peer rejected the connection.
    ConnectionRejected,
    /// Underlying socket operation failed.
    SocketFail,
    /// Security (encryption) negotiation failed.
    SecurityFail,
    /// Socket closed during the operation.
    Closed,
    /// Connection was broken.
    ConnectionLost,
    /// Socket is not connected.
    NoConnection,
    /// Out of system resources.
    Resource,
    /// Thread could not be created.
    Thread,
    /// Out of buffer memory.
    NoBuffer,
    /// System object (mutex, event) could not be created.
    SysObject,
    /// Operation not supported in the current state.
    InvalidOperation,
    /// Socket is already bound.
    BoundSocket,
    /// Socket is already connected.
    ConnectedSocket,
    /// Invalid parameter.
    InvalidParam,
    /// Socket handle is not valid.
    InvalidSocket,
    /// Socket is not bound.
    UnboundSocket,
    /// Socket is not listening.
    NotListening,
    /// Message API misuse.
    InvalidMessageApi,
    /// Buffer API misuse.
    InvalidBufferApi,
    /// Message larger than the socket accepts.
    LargeMessage,
    /// Event context handle is not valid.
    InvalidPollId,
    /// Event context has no subscriptions.
    PollEmpty,
    /// Send would block on a non-blocking socket.
    AsyncSend,
    /// Receive would block on a non-blocking socket.
    AsyncReceive,
    /// Operation timed out.
    Timeout,
    /// Congestion control rejected the operation.
    Congestion,
    /// Peer reported an error.
    PeerError,
}

impl EngineErrorCode {
    /// Native numeric code (`major * 1000 + minor`).
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::ConnectionSetup => 1000,
            Self::NoServer => 1001,
            Self::ConnectionRejected => 1002,
            Self::SocketFail => 1003,
            Self::SecurityFail => 1004,
            Self::Closed => 1005,
            Self::ConnectionLost => 2001,
            Self::NoConnection => 2002,
            Self::Resource => 3000,
            Self::Thread => 3001,
            Self::NoBuffer => 3002,
            Self::SysObject => 3003,
            Self::InvalidOperation => 5000,
            Self::BoundSocket => 5001,
            Self::ConnectedSocket => 5002,
            Self::InvalidParam => 5003,
            Self::InvalidSocket => 5004,
            Self::UnboundSocket => 5005,
            Self::NotListening => 5006,
            Self::InvalidMessageApi => 5009,
            Self::InvalidBufferApi => 5010,
            Self::LargeMessage => 5012,
            Self::InvalidPollId => 5013,
            Self::PollEmpty => 5014,
            Self::AsyncSend => 6001,
            Self::AsyncReceive => 6002,
            Self::Timeout => 6003,
            Self::Congestion => 6004,
            Self::PeerError => 7000,
        }
    }

    /// Human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Unknown => "unknown error",
            Self::ConnectionSetup => "connection setup failure",
            Self::NoServer => "no server at remote address",
            Self::ConnectionRejected => "connection rejected",
            Self::SocketFail => "socket operation failed",
            Self::SecurityFail => "security negotiation failed",
            Self::Closed => "socket closed during operation",
            Self::ConnectionLost => "connection was broken",
            Self::NoConnection => "socket not connected",
            Self::Resource => "system resource failure",
            Self::Thread => "thread creation failed",
            Self::NoBuffer => "out of buffer memory",
            Self::SysObject => "system object creation failed",
            Self::InvalidOperation => "operation not supported",
            Self::BoundSocket => "socket already bound",
            Self::ConnectedSocket => "socket already connected",
            Self::InvalidParam => "invalid parameter",
            Self::InvalidSocket => "invalid socket",
            Self::UnboundSocket => "socket not bound",
            Self::NotListening => "socket not listening",
            Self::InvalidMessageApi => "message API misuse",
            Self::InvalidBufferApi => "buffer API misuse",
            Self::LargeMessage => "message too large",
            Self::InvalidPollId => "invalid event context",
            Self::PollEmpty => "event context is empty",
            Self::AsyncSend => "send would block",
            Self::AsyncReceive => "receive would block",
            Self::Timeout => "operation timed out",
            Self::Congestion => "congestion control rejected operation",
            Self::PeerError => "peer reported an error",
        }
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Error returned by a `TransportEngine` call.
///
/// `sys_code` carries the underlying system error that accompanied the
/// engine error, negated (`-errno`), or `0` when there was none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{code}")]
pub struct EngineError {
    /// Engine error code.
    pub code: EngineErrorCode,
    /// Negated system error code, `0` if none.
    pub sys_code: i32,
}

impl EngineError {
    /// Error without an accompanying system error.
    #[must_use]
    pub const fn new(code: EngineErrorCode) -> Self {
        Self { code, sys_code: 0 }
    }

    /// Error carrying a system error number (stored negated).
    #[must_use]
    pub const fn with_errno(code: EngineErrorCode, errno: i32) -> Self {
        Self {
            code,
            sys_code: -errno,
        }
    }

    /// The accompanying system error number, if any.
    #[must_use]
    pub const fn errno(&self) -> Option<i32> {
        if self.sys_code < 0 {
            Some(-self.sys_code)
        } else {
            None
        }
    }
}

impl From<EngineErrorCode> for EngineError {
    fn from(code: EngineErrorCode) -> Self {
        Self::new(code)
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
