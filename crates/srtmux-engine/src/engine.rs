//! The transport engine abstraction consumed by the multiplexer.

use crate::error::EngineResult;
use crate::log::{LogArea, LogHandlerRef, LogLevel};
use crate::types::{
    ContextHandle, EngineEvent, EventMask, OptionId, OptionValue, SocketHandle, SocketState,
};
use std::time::Duration;

/// Native transport engine.
///
/// The engine owns the protocol (handshake, retransmission, congestion
/// control). The multiplexer only needs readiness notification through a
/// shared event context and non-blocking message I/O.
///
/// # Thread Safety
///
/// Implementations must allow `add_interest`/`remove_interest` on a context
/// while another thread is blocked in `poll` on the same context.
pub trait TransportEngine: Send + Sync {
    /// Create a shared event-notification context.
    ///
    /// Polling a context with no subscriptions is not an error; it simply
    /// times out.
    fn create_context(&self) -> EngineResult<ContextHandle>;

    /// Release a context. Pollers blocked on it return `InvalidPollId`.
    fn release_context(&self, context: ContextHandle) -> EngineResult<()>;

    /// Subscribe `handle` to `context` with the given interest mask.
    ///
    /// # Errors
    /// `InvalidOperation` if the handle is already subscribed,
    /// `InvalidPollId` for an unknown context, `InvalidSocket` for an
    /// unknown or dead socket.
    fn add_interest(
        &self,
        context: ContextHandle,
        handle: SocketHandle,
        mask: EventMask,
    ) -> EngineResult<()>;

    /// Remove `handle` from `context`.
    fn remove_interest(&self, context: ContextHandle, handle: SocketHandle) -> EngineResult<()>;

    /// Wait up to `timeout` for readiness events, filling at most
    /// `events.len()` slots.
    ///
    /// Returns the number of filled slots; `0` means the timeout elapsed.
    fn poll(
        &self,
        context: ContextHandle,
        events: &mut [EngineEvent],
        timeout: Duration,
    ) -> EngineResult<usize>;

    /// Current liveness of a socket.
    ///
    /// Reporting a state for which `SocketState::is_gone` holds promises
    /// that the socket is no longer subscribed to any context: callers skip
    /// `remove_interest` for it. An engine whose event mechanism keeps such
    /// sockets subscribed must drop them before returning.
    fn socket_state(&self, handle: SocketHandle) -> SocketState;

    /// Send one message. Non-blocking sockets report `AsyncSend` instead of
    /// waiting; blocking sockets wait inside the engine.
    fn send(&self, handle: SocketHandle, buf: &[u8]) -> EngineResult<usize>;

    /// Receive one message. Non-blocking sockets report `AsyncReceive`
    /// instead of waiting; blocking sockets wait inside the engine.
    fn receive(&self, handle: SocketHandle, buf: &mut [u8]) -> EngineResult<usize>;

    /// Close a socket and release its handle.
    fn close(&self, handle: SocketHandle) -> EngineResult<()>;

    /// Switch a socket between blocking and non-blocking I/O.
    fn set_blocking(&self, handle: SocketHandle, blocking: bool) -> EngineResult<()>;

    /// Apply one socket option.
    fn set_option(
        &self,
        handle: SocketHandle,
        option: OptionId,
        value: &OptionValue,
    ) -> EngineResult<()>;

    /// Install (or remove, with `None`) the engine log handler.
    fn set_log_handler(&self, _handler: Option<LogHandlerRef>) {}

    /// Set the most verbose level the engine reports.
    fn set_log_level(&self, _level: LogLevel) {}

    /// Enable one functional log area.
    fn add_log_area(&self, _area: LogArea) {}

    /// Disable one functional log area.
    fn remove_log_area(&self, _area: LogArea) {}

    /// Enable exactly the given areas; an empty slice disables all.
    fn reset_log_areas(&self, _areas: &[LogArea]) {}
}
