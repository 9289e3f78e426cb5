//! Handles, event masks and option values shared by every engine.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Engine-assigned identifier of a transport socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(pub i32);

impl SocketHandle {
    /// Sentinel used for unfilled event slots.
    pub const INVALID: SocketHandle = SocketHandle(-1);

    /// Raw integer value of the handle.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Engine-assigned identifier of a shared event-notification context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextHandle(pub i32);

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eid#{}", self.0)
    }
}

/// Readiness bits reported by (and subscribed to on) an event context.
///
/// Bit values follow the native engine's epoll flags so masks can be handed
/// across the boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    /// No readiness.
    pub const EMPTY: EventMask = EventMask(0);
    /// Data can be received without blocking.
    pub const READABLE: EventMask = EventMask(0x1);
    /// Data can be sent without blocking.
    pub const WRITABLE: EventMask = EventMask(0x4);
    /// The socket is broken or otherwise errored.
    pub const ERROR: EventMask = EventMask(0x8);
    /// Report transitions only; the consumer must drain before waiting again.
    pub const EDGE_TRIGGERED: EventMask = EventMask(1 << 31);

    /// Interest used by the multiplexer for every registered socket.
    pub const ALL_EDGE: EventMask = EventMask(0x1 | 0x4 | 0x8 | (1 << 31));

    /// Build a mask from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits of the mask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    /// True if no readiness bit is set. The edge-triggered flag is a mode,
    /// not readiness, and is ignored.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 & !Self::EDGE_TRIGGERED.0 == 0
    }

    /// Mask with the edge-triggered mode flag cleared.
    #[must_use]
    pub const fn readiness(self) -> EventMask {
        EventMask(self.0 & !Self::EDGE_TRIGGERED.0)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Self::READABLE) {
            parts.push("IN");
        }
        if self.contains(Self::WRITABLE) {
            parts.push("OUT");
        }
        if self.contains(Self::ERROR) {
            parts.push("ERR");
        }
        if self.contains(Self::EDGE_TRIGGERED) {
            parts.push("ET");
        }
        if parts.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// One readiness notification produced by `TransportEngine::poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineEvent {
    /// Socket the notification is about.
    pub handle: SocketHandle,
    /// Readiness bits.
    pub mask: EventMask,
}

impl EngineEvent {
    /// Create an event record.
    #[must_use]
    pub const fn new(handle: SocketHandle, mask: EventMask) -> Self {
        Self { handle, mask }
    }
}

impl Default for EngineEvent {
    fn default() -> Self {
        Self {
            handle: SocketHandle::INVALID,
            mask: EventMask::EMPTY,
        }
    }
}

/// Liveness of a socket as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// Usable for I/O.
    Active,
    /// Connection lost; the engine has dropped it from every context.
    Broken,
    /// Close in progress.
    Closing,
    /// Closed by its owner.
    Closed,
    /// Unknown to the engine.
    Nonexistent,
}

impl SocketState {
    /// True when the engine no longer tracks the socket in event contexts.
    #[must_use]
    pub const fn is_gone(self) -> bool {
        matches!(
            self,
            Self::Broken | Self::Closing | Self::Closed | Self::Nonexistent
        )
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Broken => "broken",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Nonexistent => "nonexistent",
        };
        f.write_str(name)
    }
}

/// Transmission profile of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransType {
    /// Live streaming: message API, timestamp-based delivery.
    Live,
    /// Bulk file transfer.
    File,
}

/// Engine socket options understood by the option table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OptionId {
    Mss,
    SndBuf,
    RcvBuf,
    UdpSndBuf,
    UdpRcvBuf,
    IpTtl,
    IpTos,
    ReuseAddr,
    TransType,
    Fc,
    Sender,
    TsbpdMode,
    Latency,
    RcvLatency,
    PeerLatency,
    Passphrase,
    PbKeyLen,
    TlPktDrop,
    NakReport,
    ConnTimeo,
    StreamId,
    PayloadSize,
    MessageApi,
    MinVersion,
    EnforcedEncryption,
    PeerIdleTimeo,
    PacketFilter,
    Congestion,
    KmRefreshRate,
    KmPreAnnounce,
    MaxBw,
    InputBw,
    MinInputBw,
    OheadBw,
    SndDropDelay,
    LossMaxTtl,
}

/// Typed value handed to `TransportEngine::set_option`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// 32-bit integer option.
    Int32(i32),
    /// 64-bit integer option.
    Int64(i64),
    /// String option.
    Str(String),
    /// Boolean option.
    Bool(bool),
    /// Transmission profile.
    TransType(TransType),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask_contains() {
        let mask = EventMask::READABLE | EventMask::ERROR;
        assert!(mask.contains(EventMask::READABLE));
        assert!(mask.contains(EventMask::ERROR));
        assert!(!mask.contains(EventMask::WRITABLE));
        assert!(mask.intersects(EventMask::ERROR | EventMask::WRITABLE));
    }

    #[test]
    fn test_event_mask_edge_flag_is_not_readiness() {
        assert!(EventMask::EDGE_TRIGGERED.is_empty());
        assert_eq!(EventMask::ALL_EDGE.readiness().bits(), 0xd);
        assert!(!EventMask::ALL_EDGE.is_empty());
    }

    #[test]
    fn test_event_mask_display() {
        assert_eq!(EventMask::ALL_EDGE.to_string(), "IN|OUT|ERR|ET");
        assert_eq!(EventMask::EMPTY.to_string(), "-");
    }

    #[test]
    fn test_socket_state_is_gone() {
        assert!(!SocketState::Active.is_gone());
        assert!(SocketState::Broken.is_gone());
        assert!(SocketState::Closing.is_gone());
        assert!(SocketState::Closed.is_gone());
        assert!(SocketState::Nonexistent.is_gone());
    }

    #[test]
    fn test_default_event_is_invalid() {
        let ev = EngineEvent::default();
        assert_eq!(ev.handle, SocketHandle::INVALID);
        assert!(ev.mask.is_empty());
    }
}
