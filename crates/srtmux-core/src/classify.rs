//! Classification of raw engine errors.
//!
//! The facade only needs to know whether a failed call should be parked on
//! the readiness waiter (would-block), reported as a retryable timeout, or
//! surfaced as fatal.

use crate::error::{Direction, FatalKind, MuxError};
use srtmux_engine::{EngineError, EngineErrorCode};

/// Category of an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Receive would block.
    WouldBlockRead,
    /// Send would block.
    WouldBlockWrite,
    /// The engine timed out.
    Timeout,
    /// Anything unrecoverable.
    Fatal(FatalKind),
}

impl ErrorClass {
    /// True for either would-block class.
    #[must_use]
    pub const fn is_would_block(self) -> bool {
        matches!(self, Self::WouldBlockRead | Self::WouldBlockWrite)
    }

    /// Direction a would-block class refers to.
    #[must_use]
    pub const fn direction(self) -> Option<Direction> {
        match self {
            Self::WouldBlockRead => Some(Direction::Read),
            Self::WouldBlockWrite => Some(Direction::Write),
            _ => None,
        }
    }
}

/// Fatal category of an engine code.
#[must_use]
pub const fn fatal_kind(code: EngineErrorCode) -> FatalKind {
    match code {
        EngineErrorCode::ConnectionLost | EngineErrorCode::PeerError => FatalKind::ConnectionLost,
        EngineErrorCode::NoConnection | EngineErrorCode::Closed => FatalKind::NotConnected,
        EngineErrorCode::InvalidSocket => FatalKind::InvalidSocket,
        EngineErrorCode::InvalidPollId | EngineErrorCode::PollEmpty => FatalKind::Poll,
        EngineErrorCode::Resource
        | EngineErrorCode::Thread
        | EngineErrorCode::NoBuffer
        | EngineErrorCode::SysObject => FatalKind::Resource,
        other => FatalKind::Other(other),
    }
}

/// Classify an engine error.
///
/// # Examples
///
/// ```
/// use srtmux_core::classify::{classify, ErrorClass};
/// use srtmux_engine::{EngineError, EngineErrorCode};
///
/// let err = EngineError::new(EngineErrorCode::AsyncSend);
/// assert_eq!(classify(&err), ErrorClass::WouldBlockWrite);
/// ```
#[must_use]
pub const fn classify(err: &EngineError) -> ErrorClass {
    match err.code {
        EngineErrorCode::AsyncReceive => ErrorClass::WouldBlockRead,
        EngineErrorCode::AsyncSend => ErrorClass::WouldBlockWrite,
        EngineErrorCode::Timeout => ErrorClass::Timeout,
        code => ErrorClass::Fatal(fatal_kind(code)),
    }
}

/// Convert an engine error from an operation in `direction` into a
/// `MuxError`, carrying over the system error number when present.
#[must_use]
pub fn into_error(err: EngineError, direction: Direction) -> MuxError {
    match classify(&err) {
        ErrorClass::WouldBlockRead => MuxError::WouldBlock {
            direction: Direction::Read,
            code: err.code,
        },
        ErrorClass::WouldBlockWrite => MuxError::WouldBlock {
            direction: Direction::Write,
            code: err.code,
        },
        ErrorClass::Timeout => MuxError::Timeout { direction },
        ErrorClass::Fatal(kind) => MuxError::Fatal {
            kind,
            code: err.code,
            system: err.errno(),
        },
    }
}

/// Convert an engine error from a non-I/O call (option, mode switch,
/// close) into a fatal `MuxError`.
#[must_use]
pub fn into_fatal(err: EngineError) -> MuxError {
    MuxError::Fatal {
        kind: fatal_kind(err.code),
        code: err.code,
        system: err.errno(),
    }
}
