//! In-process transport engine.
//!
//! `LoopbackEngine` connects sockets in pairs through bounded message queues
//! and implements event contexts with the same contract as the native
//! engine:
//!
//! - **Edge-triggered** subscriptions see an event only on a transition: an
//!   empty inbox receiving a message (`READABLE`), a full peer inbox losing
//!   a message (`WRITABLE`), or the connection breaking (`ERROR`).
//! - **Level-triggered** subscriptions (no `EDGE_TRIGGERED` bit) are
//!   re-evaluated on every poll.
//! - A broken socket is dropped from every context right after its error
//!   event is queued, so a later `remove_interest` on it fails.
//!
//! Fault injection hooks (`break_socket`, `raise`, `fail_context`,
//! `fail_next_removal`) let tests
//! drive the multiplexer through failure paths deterministically.

use crate::engine::TransportEngine;
use crate::error::{EngineError, EngineErrorCode, EngineResult};
use crate::log::{LogArea, LogHandlerRef, LogLevel, LogRecord, LogSettings};
use crate::types::{
    ContextHandle, EngineEvent, EventMask, OptionId, OptionValue, SocketHandle, SocketState,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest payload of a single live-mode message.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 1456;

/// Messages buffered per socket before the sender would block.
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Loopback engine configuration.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Messages each socket's inbox holds before senders would block.
    pub queue_capacity: usize,
    /// Largest message accepted by `send`.
    pub max_message_size: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

struct LoopSocket {
    state: SocketState,
    peer: Option<SocketHandle>,
    inbox: VecDeque<Vec<u8>>,
    blocking: bool,
    options: HashMap<OptionId, OptionValue>,
}

impl LoopSocket {
    fn connected(peer: SocketHandle) -> Self {
        Self {
            state: SocketState::Active,
            peer: Some(peer),
            inbox: VecDeque::new(),
            blocking: false,
            options: HashMap::new(),
        }
    }
}

struct LoopContext {
    interests: HashMap<SocketHandle, EventMask>,
    pending: VecDeque<EngineEvent>,
    signal: Arc<Condvar>,
    injected: Option<EngineErrorCode>,
    removal_fault: Option<EngineErrorCode>,
}

impl LoopContext {
    fn queue(&mut self, handle: SocketHandle, mask: EventMask) {
        if let Some(ev) = self.pending.iter_mut().find(|e| e.handle == handle) {
            ev.mask |= mask;
        } else {
            self.pending.push_back(EngineEvent::new(handle, mask));
        }
    }
}

type PendingLogs = Vec<(LogHandlerRef, LogRecord)>;

#[derive(Default)]
struct LoopState {
    next_socket: i32,
    next_context: i32,
    sockets: HashMap<SocketHandle, LoopSocket>,
    contexts: HashMap<ContextHandle, LoopContext>,
    log: LogSettings,
}

impl LoopState {
    fn alloc_socket(&mut self) -> SocketHandle {
        self.next_socket += 1;
        SocketHandle(self.next_socket)
    }

    /// Queue `mask` for every context subscribed to `handle`.
    fn raise(&mut self, handle: SocketHandle, mask: EventMask) {
        for ctx in self.contexts.values_mut() {
            let Some(interest) = ctx.interests.get(&handle).copied() else {
                continue;
            };
            let delivered = mask.readiness() & interest.readiness();
            if delivered.is_empty() {
                continue;
            }
            ctx.queue(handle, delivered);
            ctx.signal.notify_all();
        }
    }

    fn drop_subscriptions(&mut self, handle: SocketHandle) {
        for ctx in self.contexts.values_mut() {
            ctx.interests.remove(&handle);
        }
    }

    fn purge_pending(&mut self, handle: SocketHandle) {
        for ctx in self.contexts.values_mut() {
            ctx.pending.retain(|e| e.handle != handle);
        }
    }

    /// Current (level) readiness of a socket.
    fn readiness(&self, handle: SocketHandle, capacity: usize) -> EventMask {
        let Some(sock) = self.sockets.get(&handle) else {
            return EventMask::ERROR;
        };
        let mut mask = EventMask::EMPTY;
        if sock.state != SocketState::Active {
            mask |= EventMask::ERROR;
        }
        if !sock.inbox.is_empty() {
            mask |= EventMask::READABLE;
        }
        let peer_has_room = sock
            .peer
            .and_then(|p| self.sockets.get(&p))
            .is_some_and(|p| p.state == SocketState::Active && p.inbox.len() < capacity);
        if sock.state == SocketState::Active && peer_has_room {
            mask |= EventMask::WRITABLE;
        }
        mask
    }

    /// Mark an active socket broken and drop it from every context once its
    /// error event is queued.
    fn mark_broken(&mut self, handle: SocketHandle) -> bool {
        match self.sockets.get_mut(&handle) {
            Some(sock) if sock.state == SocketState::Active => {
                sock.state = SocketState::Broken;
            }
            _ => return false,
        }
        self.raise(handle, EventMask::ERROR);
        self.drop_subscriptions(handle);
        true
    }

    fn log(
        &self,
        logs: &mut PendingLogs,
        level: LogLevel,
        area: LogArea,
        line: u32,
        message: String,
    ) {
        if let Some(entry) = self.log.prepare(level, area, file!(), line, message) {
            logs.push(entry);
        }
    }
}

fn flush(logs: PendingLogs) {
    for (handler, record) in logs {
        handler.emit(&record);
    }
}

/// In-process engine connecting sockets in pairs.
///
/// # Examples
///
/// ```
/// use srtmux_engine::{LoopbackEngine, TransportEngine};
///
/// let engine = LoopbackEngine::new();
/// let (a, b) = engine.open_pair();
/// engine.send(a, b"hello").unwrap();
///
/// let mut buf = [0u8; 16];
/// let n = engine.receive(b, &mut buf).unwrap();
/// assert_eq!(&buf[..n], b"hello");
/// ```
pub struct LoopbackEngine {
    config: LoopbackConfig,
    state: Mutex<LoopState>,
    /// Wakes engine-internal blocking send/receive calls.
    io_signal: Condvar,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    /// Create an engine with default queue sizes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LoopbackConfig::default())
    }

    /// Create an engine with explicit queue sizes.
    #[must_use]
    pub fn with_config(config: LoopbackConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LoopState::default()),
            io_signal: Condvar::new(),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }

    /// Create two connected, non-blocking sockets.
    pub fn open_pair(&self) -> (SocketHandle, SocketHandle) {
        let mut logs = PendingLogs::new();
        let pair = {
            let mut st = self.state.lock();
            let a = st.alloc_socket();
            let b = st.alloc_socket();
            st.sockets.insert(a, LoopSocket::connected(b));
            st.sockets.insert(b, LoopSocket::connected(a));
            st.log(
                &mut logs,
                LogLevel::Debug,
                LogArea::SockMgmt,
                line!(),
                format!("socket pair {a} <-> {b} created"),
            );
            (a, b)
        };
        flush(logs);
        tracing::trace!("Loopback pair {} <-> {}", pair.0, pair.1);
        pair
    }

    /// Simulate connection loss on `handle` and its peer.
    ///
    /// Both ends become `Broken`, subscribed contexts receive an `ERROR`
    /// event, and the engine drops both from every context.
    ///
    /// # Errors
    /// `InvalidSocket` if the handle is unknown.
    pub fn break_socket(&self, handle: SocketHandle) -> EngineResult<()> {
        let mut logs = PendingLogs::new();
        {
            let mut st = self.state.lock();
            let peer = st
                .sockets
                .get(&handle)
                .ok_or(EngineError::new(EngineErrorCode::InvalidSocket))?
                .peer;
            if st.mark_broken(handle) {
                st.log(
                    &mut logs,
                    LogLevel::Warning,
                    LogArea::Conn,
                    line!(),
                    format!("connection {handle} broken"),
                );
            }
            if let Some(peer) = peer {
                st.mark_broken(peer);
            }
        }
        self.io_signal.notify_all();
        flush(logs);
        Ok(())
    }

    /// Inject an arbitrary readiness event for `handle` into every context
    /// subscribed to it, filtered by each subscription's interest.
    pub fn raise(&self, handle: SocketHandle, mask: EventMask) {
        self.state.lock().raise(handle, mask);
    }

    /// Make the next `poll` on `context` fail with `code`.
    ///
    /// # Errors
    /// `InvalidPollId` if the context is unknown.
    pub fn fail_context(&self, context: ContextHandle, code: EngineErrorCode) -> EngineResult<()> {
        let mut st = self.state.lock();
        let ctx = st
            .contexts
            .get_mut(&context)
            .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))?;
        ctx.injected = Some(code);
        ctx.signal.notify_all();
        Ok(())
    }

    /// Make the next `remove_interest` on `context` fail with `code`,
    /// leaving the subscription in place.
    ///
    /// # Errors
    /// `InvalidPollId` if the context is unknown.
    pub fn fail_next_removal(
        &self,
        context: ContextHandle,
        code: EngineErrorCode,
    ) -> EngineResult<()> {
        let mut st = self.state.lock();
        let ctx = st
            .contexts
            .get_mut(&context)
            .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))?;
        ctx.removal_fault = Some(code);
        Ok(())
    }

    /// Number of messages waiting in `handle`'s inbox.
    #[must_use]
    pub fn queued(&self, handle: SocketHandle) -> usize {
        self.state
            .lock()
            .sockets
            .get(&handle)
            .map_or(0, |s| s.inbox.len())
    }

    /// Last value applied for an option on `handle`.
    #[must_use]
    pub fn option(&self, handle: SocketHandle, option: OptionId) -> Option<OptionValue> {
        self.state
            .lock()
            .sockets
            .get(&handle)
            .and_then(|s| s.options.get(&option).cloned())
    }

    /// Whether `handle` is currently subscribed to `context`.
    #[must_use]
    pub fn is_subscribed(&self, context: ContextHandle, handle: SocketHandle) -> bool {
        self.state
            .lock()
            .contexts
            .get(&context)
            .is_some_and(|c| c.interests.contains_key(&handle))
    }

    fn validate_option(option: OptionId, value: &OptionValue) -> EngineResult<()> {
        let invalid = EngineError::new(EngineErrorCode::InvalidParam);
        match (option, value) {
            (OptionId::Mss, OptionValue::Int32(v)) if *v < 76 => Err(invalid),
            (
                OptionId::SndBuf | OptionId::RcvBuf | OptionId::UdpSndBuf | OptionId::UdpRcvBuf,
                OptionValue::Int32(v),
            ) if *v <= 0 => Err(invalid),
            (OptionId::Latency | OptionId::RcvLatency | OptionId::PeerLatency, OptionValue::Int32(v))
                if *v < 0 =>
            {
                Err(invalid)
            }
            (OptionId::Passphrase, OptionValue::Str(s))
                if !s.is_empty() && !(10..=79).contains(&s.len()) =>
            {
                Err(invalid)
            }
            (OptionId::PbKeyLen, OptionValue::Int32(v)) if ![0, 16, 24, 32].contains(v) => {
                Err(invalid)
            }
            _ => Ok(()),
        }
    }
}

impl TransportEngine for LoopbackEngine {
    fn create_context(&self) -> EngineResult<ContextHandle> {
        let mut st = self.state.lock();
        st.next_context += 1;
        let id = ContextHandle(st.next_context);
        st.contexts.insert(
            id,
            LoopContext {
                interests: HashMap::new(),
                pending: VecDeque::new(),
                signal: Arc::new(Condvar::new()),
                injected: None,
                removal_fault: None,
            },
        );
        Ok(id)
    }

    fn release_context(&self, context: ContextHandle) -> EngineResult<()> {
        let ctx = self
            .state
            .lock()
            .contexts
            .remove(&context)
            .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))?;
        ctx.signal.notify_all();
        Ok(())
    }

    fn add_interest(
        &self,
        context: ContextHandle,
        handle: SocketHandle,
        mask: EventMask,
    ) -> EngineResult<()> {
        let mut logs = PendingLogs::new();
        {
            let mut st = self.state.lock();
            let alive = st
                .sockets
                .get(&handle)
                .is_some_and(|s| s.state == SocketState::Active);
            let ctx = st
                .contexts
                .get_mut(&context)
                .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))?;
            if !alive {
                return Err(EngineError::new(EngineErrorCode::InvalidSocket));
            }
            if ctx.interests.contains_key(&handle) {
                return Err(EngineError::new(EngineErrorCode::InvalidOperation));
            }
            ctx.interests.insert(handle, mask);
            if !mask.contains(EventMask::EDGE_TRIGGERED) {
                ctx.signal.notify_all();
            }
            st.log(
                &mut logs,
                LogLevel::Debug,
                LogArea::EPollUpd,
                line!(),
                format!("{context}: added {handle} for {mask}"),
            );
        }
        flush(logs);
        Ok(())
    }

    fn remove_interest(&self, context: ContextHandle, handle: SocketHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        let ctx = st
            .contexts
            .get_mut(&context)
            .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))?;
        if let Some(code) = ctx.removal_fault.take() {
            return Err(EngineError::new(code));
        }
        if ctx.interests.remove(&handle).is_none() {
            return Err(EngineError::new(EngineErrorCode::InvalidSocket));
        }
        ctx.pending.retain(|e| e.handle != handle);
        Ok(())
    }

    fn poll(
        &self,
        context: ContextHandle,
        events: &mut [EngineEvent],
        timeout: Duration,
    ) -> EngineResult<usize> {
        if events.is_empty() {
            return Err(EngineError::new(EngineErrorCode::InvalidParam));
        }
        let deadline = Instant::now().checked_add(timeout);
        let capacity = self.config.queue_capacity;
        let mut st = self.state.lock();

        loop {
            let level: Vec<(SocketHandle, EventMask)> = st
                .contexts
                .get(&context)
                .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))?
                .interests
                .iter()
                .filter(|(_, m)| !m.contains(EventMask::EDGE_TRIGGERED))
                .map(|(h, m)| (*h, *m))
                .collect();
            let level: Vec<EngineEvent> = level
                .into_iter()
                .filter_map(|(h, interest)| {
                    let mask = st.readiness(h, capacity) & interest.readiness();
                    (!mask.is_empty()).then_some(EngineEvent::new(h, mask))
                })
                .collect();

            let ctx = st
                .contexts
                .get_mut(&context)
                .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))?;

            if let Some(code) = ctx.injected.take() {
                let mut logs = PendingLogs::new();
                st.log(
                    &mut logs,
                    LogLevel::Err,
                    LogArea::EPollApi,
                    line!(),
                    format!("{context}: wait failed: {code}"),
                );
                drop(st);
                flush(logs);
                return Err(EngineError::new(code));
            }

            for ev in level {
                ctx.queue(ev.handle, ev.mask);
            }

            if !ctx.pending.is_empty() {
                let n = ctx.pending.len().min(events.len());
                for (slot, ev) in events.iter_mut().zip(ctx.pending.drain(..n)) {
                    *slot = ev;
                }
                return Ok(n);
            }

            let signal = Arc::clone(&ctx.signal);
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(0);
                    }
                    signal.wait_until(&mut st, deadline);
                }
                None => signal.wait(&mut st),
            }
        }
    }

    fn socket_state(&self, handle: SocketHandle) -> SocketState {
        self.state
            .lock()
            .sockets
            .get(&handle)
            .map_or(SocketState::Nonexistent, |s| s.state)
    }

    fn send(&self, handle: SocketHandle, buf: &[u8]) -> EngineResult<usize> {
        if buf.len() > self.config.max_message_size {
            return Err(EngineError::new(EngineErrorCode::LargeMessage));
        }
        let capacity = self.config.queue_capacity;
        let mut st = self.state.lock();

        loop {
            let sock = st
                .sockets
                .get(&handle)
                .ok_or(EngineError::new(EngineErrorCode::InvalidSocket))?;
            if sock.state != SocketState::Active {
                return Err(EngineError::new(EngineErrorCode::ConnectionLost));
            }
            let blocking = sock.blocking;
            let peer = sock
                .peer
                .ok_or(EngineError::new(EngineErrorCode::NoConnection))?;
            let queued = match st.sockets.get(&peer) {
                Some(p) if p.state == SocketState::Active => p.inbox.len(),
                _ => return Err(EngineError::new(EngineErrorCode::ConnectionLost)),
            };

            if queued < capacity {
                if let Some(p) = st.sockets.get_mut(&peer) {
                    p.inbox.push_back(buf.to_vec());
                }
                if queued == 0 {
                    st.raise(peer, EventMask::READABLE);
                }
                drop(st);
                self.io_signal.notify_all();
                return Ok(buf.len());
            }

            if !blocking {
                return Err(EngineError::new(EngineErrorCode::AsyncSend));
            }
            self.io_signal.wait(&mut st);
        }
    }

    fn receive(&self, handle: SocketHandle, buf: &mut [u8]) -> EngineResult<usize> {
        let capacity = self.config.queue_capacity;
        let mut st = self.state.lock();

        loop {
            let sock = st
                .sockets
                .get_mut(&handle)
                .ok_or(EngineError::new(EngineErrorCode::InvalidSocket))?;
            let was_full = sock.inbox.len() >= capacity;
            let (state, peer, blocking) = (sock.state, sock.peer, sock.blocking);

            if let Some(msg) = sock.inbox.pop_front() {
                // Live-mode semantics: the tail of an oversized message is dropped.
                let n = msg.len().min(buf.len());
                buf[..n].copy_from_slice(&msg[..n]);
                if let (true, Some(peer)) = (was_full, peer) {
                    st.raise(peer, EventMask::WRITABLE);
                }
                drop(st);
                self.io_signal.notify_all();
                return Ok(n);
            }

            if state != SocketState::Active {
                return Err(EngineError::new(EngineErrorCode::ConnectionLost));
            }
            if !blocking {
                return Err(EngineError::new(EngineErrorCode::AsyncReceive));
            }
            self.io_signal.wait(&mut st);
        }
    }

    fn close(&self, handle: SocketHandle) -> EngineResult<()> {
        let mut logs = PendingLogs::new();
        {
            let mut st = self.state.lock();
            let sock = st
                .sockets
                .remove(&handle)
                .ok_or(EngineError::new(EngineErrorCode::InvalidSocket))?;
            st.drop_subscriptions(handle);
            st.purge_pending(handle);
            if let Some(peer) = sock.peer {
                st.mark_broken(peer);
            }
            st.log(
                &mut logs,
                LogLevel::Info,
                LogArea::SockMgmt,
                line!(),
                format!("socket {handle} closed"),
            );
        }
        self.io_signal.notify_all();
        flush(logs);
        Ok(())
    }

    fn set_blocking(&self, handle: SocketHandle, blocking: bool) -> EngineResult<()> {
        {
            let mut st = self.state.lock();
            let sock = st
                .sockets
                .get_mut(&handle)
                .ok_or(EngineError::new(EngineErrorCode::InvalidSocket))?;
            sock.blocking = blocking;
        }
        self.io_signal.notify_all();
        Ok(())
    }

    fn set_option(
        &self,
        handle: SocketHandle,
        option: OptionId,
        value: &OptionValue,
    ) -> EngineResult<()> {
        Self::validate_option(option, value)?;
        let mut st = self.state.lock();
        let sock = st
            .sockets
            .get_mut(&handle)
            .ok_or(EngineError::new(EngineErrorCode::InvalidSocket))?;
        sock.options.insert(option, value.clone());
        Ok(())
    }

    fn set_log_handler(&self, handler: Option<LogHandlerRef>) {
        self.state.lock().log.set_handler(handler);
    }

    fn set_log_level(&self, level: LogLevel) {
        self.state.lock().log.set_level(level);
    }

    fn add_log_area(&self, area: LogArea) {
        self.state.lock().log.add_area(area);
    }

    fn remove_log_area(&self, area: LogArea) {
        self.state.lock().log.remove_area(area);
    }

    fn reset_log_areas(&self, areas: &[LogArea]) {
        self.state.lock().log.reset_areas(areas);
    }
}
