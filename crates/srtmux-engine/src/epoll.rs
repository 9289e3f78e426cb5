//! Linux engine over kernel sockets and `epoll`.
//!
//! Each socket handle is the raw descriptor of a socket the engine owns.
//! Each context handle is the raw descriptor of an `epoll` instance. The
//! engine carries no protocol of its own: it is the thinnest possible
//! native backend and is what the multiplexer runs on when it is pointed at
//! plain sequenced-packet sockets.

use crate::engine::TransportEngine;
use crate::error::{EngineError, EngineErrorCode, EngineResult};
use crate::log::{LogArea, LogHandlerRef, LogLevel, LogSettings};
use crate::types::{
    ContextHandle, EngineEvent, EventMask, OptionId, OptionValue, SocketHandle, SocketState,
};
use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT,
    epoll_event,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Map the errno of a failed send/recv to an engine error.
fn io_error(errno: i32, would_block: EngineErrorCode) -> EngineError {
    let code = match errno {
        libc::EAGAIN => would_block,
        libc::EPIPE | libc::ECONNRESET | libc::ECONNABORTED => EngineErrorCode::ConnectionLost,
        libc::ENOTCONN => EngineErrorCode::NoConnection,
        libc::EBADF | libc::ENOTSOCK => EngineErrorCode::InvalidSocket,
        libc::EMSGSIZE => EngineErrorCode::LargeMessage,
        libc::ENOBUFS | libc::ENOMEM => EngineErrorCode::NoBuffer,
        _ => EngineErrorCode::SocketFail,
    };
    EngineError::with_errno(code, errno)
}

fn interest_flags(mask: EventMask) -> u32 {
    let mut flags = 0;
    if mask.contains(EventMask::READABLE) {
        flags |= EPOLLIN;
    }
    if mask.contains(EventMask::WRITABLE) {
        flags |= EPOLLOUT;
    }
    if mask.contains(EventMask::ERROR) {
        flags |= EPOLLERR;
    }
    if mask.contains(EventMask::EDGE_TRIGGERED) {
        flags |= EPOLLET;
    }
    flags as u32
}

fn readiness_mask(flags: u32) -> EventMask {
    let flags = flags as i32;
    let mut mask = EventMask::EMPTY;
    if flags & EPOLLIN != 0 {
        mask |= EventMask::READABLE;
    }
    if flags & EPOLLOUT != 0 {
        mask |= EventMask::WRITABLE;
    }
    if flags & (EPOLLERR | EPOLLHUP) != 0 {
        mask |= EventMask::ERROR;
    }
    mask
}

/// Engine backed by kernel sockets and `epoll`.
///
/// # Examples
///
/// ```no_run
/// use srtmux_engine::{EpollEngine, TransportEngine};
///
/// let engine = EpollEngine::new();
/// let (a, b) = engine.socket_pair().unwrap();
/// engine.send(a, b"hello").unwrap();
/// ```
#[derive(Default)]
pub struct EpollEngine {
    contexts: Mutex<HashMap<ContextHandle, OwnedFd>>,
    sockets: Mutex<HashMap<SocketHandle, OwnedFd>>,
    subscriptions: Mutex<HashMap<SocketHandle, HashSet<ContextHandle>>>,
    log: Mutex<LogSettings>,
}

impl EpollEngine {
    /// Create an engine owning no sockets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connected pair of non-blocking sequenced-packet sockets.
    ///
    /// # Errors
    /// `Resource` carrying the system error if the pair cannot be created.
    pub fn socket_pair(&self) -> EngineResult<(SocketHandle, SocketHandle)> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: `fds` is a valid two-element buffer for the kernel to fill.
        let rc = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                0,
                fds.as_mut_ptr(),
            )
        };
        if rc < 0 {
            return Err(EngineError::with_errno(
                EngineErrorCode::Resource,
                last_errno(),
            ));
        }
        // SAFETY: both descriptors were just created and are owned by nobody else.
        let (a, b) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        let pair = (self.adopt(a), self.adopt(b));
        self.log(
            LogLevel::Debug,
            LogArea::SockMgmt,
            line!(),
            format!("socket pair {} <-> {} created", pair.0, pair.1),
        );
        Ok(pair)
    }

    /// Take ownership of an existing socket descriptor.
    pub fn adopt(&self, fd: OwnedFd) -> SocketHandle {
        let handle = SocketHandle(fd.as_raw_fd());
        self.sockets.lock().insert(handle, fd);
        handle
    }

    fn raw_socket(&self, handle: SocketHandle) -> EngineResult<RawFd> {
        self.sockets
            .lock()
            .get(&handle)
            .map(AsRawFd::as_raw_fd)
            .ok_or(EngineError::new(EngineErrorCode::InvalidSocket))
    }

    /// Whether `handle` is currently subscribed to `context`.
    #[must_use]
    pub fn is_subscribed(&self, context: ContextHandle, handle: SocketHandle) -> bool {
        self.subscriptions
            .lock()
            .get(&handle)
            .is_some_and(|contexts| contexts.contains(&context))
    }

    /// Remove a gone socket from every context it is subscribed to. The
    /// kernel keeps a hung-up descriptor in an epoll set until it is closed.
    fn detach(&self, handle: SocketHandle, fd: RawFd) {
        let Some(contexts) = self.subscriptions.lock().remove(&handle) else {
            return;
        };
        for context in contexts {
            let Ok(epfd) = self.raw_context(context) else {
                continue;
            };
            let mut event = epoll_event { events: 0, u64: 0 };
            // SAFETY: `event` is ignored for DEL but must be non-null on old kernels.
            let rc = unsafe { libc::epoll_ctl(epfd, EPOLL_CTL_DEL, fd, &mut event) };
            if rc < 0 {
                tracing::debug!(
                    "Detaching {} from {} failed: errno {}",
                    handle,
                    context,
                    last_errno()
                );
            }
        }
        self.log(
            LogLevel::Debug,
            LogArea::EPollUpd,
            line!(),
            format!("socket {handle} gone, removed from its contexts"),
        );
    }

    fn raw_context(&self, context: ContextHandle) -> EngineResult<RawFd> {
        self.contexts
            .lock()
            .get(&context)
            .map(AsRawFd::as_raw_fd)
            .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))
    }

    fn log(&self, level: LogLevel, area: LogArea, line: u32, message: String) {
        let prepared = self.log.lock().prepare(level, area, file!(), line, message);
        if let Some((handler, record)) = prepared {
            handler.emit(&record);
        }
    }

    fn setsockopt_int(fd: RawFd, level: i32, name: i32, value: i32) -> EngineResult<()> {
        // SAFETY: `value` outlives the call and its size is passed alongside.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                (&value as *const i32).cast(),
                size_of::<i32>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let errno = last_errno();
        let code = match errno {
            libc::EBADF | libc::ENOTSOCK => EngineErrorCode::InvalidSocket,
            libc::EINVAL => EngineErrorCode::InvalidParam,
            libc::ENOPROTOOPT | libc::EOPNOTSUPP => EngineErrorCode::InvalidOperation,
            _ => EngineErrorCode::SocketFail,
        };
        Err(EngineError::with_errno(code, errno))
    }
}

impl TransportEngine for EpollEngine {
    fn create_context(&self) -> EngineResult<ContextHandle> {
        // SAFETY: plain syscall without pointer arguments.
        let fd = unsafe { libc::epoll_create1(EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(EngineError::with_errno(
                EngineErrorCode::Resource,
                last_errno(),
            ));
        }
        // SAFETY: `fd` was just created and is owned by nobody else.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        let handle = ContextHandle(fd);
        self.contexts.lock().insert(handle, owned);
        tracing::debug!("epoll context {} created", handle);
        Ok(handle)
    }

    fn release_context(&self, context: ContextHandle) -> EngineResult<()> {
        self.contexts
            .lock()
            .remove(&context)
            .ok_or(EngineError::new(EngineErrorCode::InvalidPollId))?;
        for contexts in self.subscriptions.lock().values_mut() {
            contexts.remove(&context);
        }
        Ok(())
    }

    fn add_interest(
        &self,
        context: ContextHandle,
        handle: SocketHandle,
        mask: EventMask,
    ) -> EngineResult<()> {
        let epfd = self.raw_context(context)?;
        let fd = self.raw_socket(handle)?;
        let mut event = epoll_event {
            events: interest_flags(mask),
            u64: handle.raw() as u64,
        };
        // SAFETY: `event` is a valid epoll_event for the duration of the call.
        let rc = unsafe { libc::epoll_ctl(epfd, EPOLL_CTL_ADD, fd, &mut event) };
        if rc == 0 {
            self.subscriptions
                .lock()
                .entry(handle)
                .or_default()
                .insert(context);
            return Ok(());
        }
        let errno = last_errno();
        let code = match errno {
            libc::EEXIST => EngineErrorCode::InvalidOperation,
            libc::EBADF if self.raw_context(context).is_err() => EngineErrorCode::InvalidPollId,
            libc::EBADF | libc::EPERM => EngineErrorCode::InvalidSocket,
            libc::ENOMEM | libc::ENOSPC => EngineErrorCode::Resource,
            _ => EngineErrorCode::InvalidParam,
        };
        Err(EngineError::with_errno(code, errno))
    }

    fn remove_interest(&self, context: ContextHandle, handle: SocketHandle) -> EngineResult<()> {
        let epfd = self.raw_context(context)?;
        let fd = self.raw_socket(handle)?;
        let mut event = epoll_event { events: 0, u64: 0 };
        // SAFETY: `event` is ignored for DEL but must be non-null on old kernels.
        let rc = unsafe { libc::epoll_ctl(epfd, EPOLL_CTL_DEL, fd, &mut event) };
        let errno = if rc == 0 { 0 } else { last_errno() };
        if rc == 0 || errno == libc::ENOENT {
            let mut subscriptions = self.subscriptions.lock();
            if let Some(contexts) = subscriptions.get_mut(&handle) {
                contexts.remove(&context);
                if contexts.is_empty() {
                    subscriptions.remove(&handle);
                }
            }
        }
        if rc == 0 {
            return Ok(());
        }
        let code = match errno {
            libc::ENOENT | libc::EBADF => EngineErrorCode::InvalidSocket,
            _ => EngineErrorCode::InvalidParam,
        };
        Err(EngineError::with_errno(code, errno))
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
        let epfd = self.raw_context(context)?;
        // Rounded up: a sub-millisecond timeout must not become a busy poll.
        let timeout_ms =
            i32::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(i32::MAX);
        let capacity = i32::try_from(events.len()).unwrap_or(i32::MAX);
        let mut raw = vec![epoll_event { events: 0, u64: 0 }; capacity as usize];

        // SAFETY: `raw` holds `capacity` initialized slots for the kernel to fill.
        let n = unsafe { libc::epoll_wait(epfd, raw.as_mut_ptr(), capacity, timeout_ms) };
        if n < 0 {
            let errno = last_errno();
            return match errno {
                libc::EINTR => Ok(0),
                libc::EBADF | libc::EINVAL => Err(EngineError::with_errno(
                    EngineErrorCode::InvalidPollId,
                    errno,
                )),
                _ => {
                    self.log(
                        LogLevel::Err,
                        LogArea::EPollApi,
                        line!(),
                        format!("{context}: epoll_wait failed: errno {errno}"),
                    );
                    Err(EngineError::with_errno(EngineErrorCode::Unknown, errno))
                }
            };
        }

        let n = n as usize;
        for (slot, ev) in events.iter_mut().zip(&raw[..n]) {
            let flags = ev.events;
            let token = ev.u64;
            *slot = EngineEvent::new(SocketHandle(token as i32), readiness_mask(flags));
        }
        Ok(n)
    }

    fn socket_state(&self, handle: SocketHandle) -> SocketState {
        let Ok(fd) = self.raw_socket(handle) else {
            return SocketState::Nonexistent;
        };
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN | libc::POLLOUT,
            revents: 0,
        };
        // SAFETY: `pfd` is one valid pollfd; zero timeout never blocks.
        let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
        if rc < 0 {
            return SocketState::Nonexistent;
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            SocketState::Nonexistent
        } else if pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
            self.detach(handle, fd);
            SocketState::Broken
        } else {
            SocketState::Active
        }
    }

    fn send(&self, handle: SocketHandle, buf: &[u8]) -> EngineResult<usize> {
        let fd = self.raw_socket(handle)?;
        // SAFETY: `buf` is valid for `buf.len()` bytes.
        let n = unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), libc::MSG_NOSIGNAL) };
        if n < 0 {
            return Err(io_error(last_errno(), EngineErrorCode::AsyncSend));
        }
        Ok(n as usize)
    }

    fn receive(&self, handle: SocketHandle, buf: &mut [u8]) -> EngineResult<usize> {
        let fd = self.raw_socket(handle)?;
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
        if n < 0 {
            return Err(io_error(last_errno(), EngineErrorCode::AsyncReceive));
        }
        if n == 0 && !buf.is_empty() {
            // Orderly shutdown by the peer.
            return Err(EngineError::new(EngineErrorCode::ConnectionLost));
        }
        Ok(n as usize)
    }

    fn close(&self, handle: SocketHandle) -> EngineResult<()> {
        let fd = self
            .sockets
            .lock()
            .remove(&handle)
            .ok_or(EngineError::new(EngineErrorCode::InvalidSocket))?;
        // Closing the last descriptor drops it from every epoll set.
        self.subscriptions.lock().remove(&handle);
        // SAFETY: ownership was just removed from the table; close exactly once.
        let rc = unsafe { libc::close(fd.into_raw_fd()) };
        if rc < 0 {
            let errno = last_errno();
            tracing::warn!("close({}) failed: errno {}", handle, errno);
            return Err(EngineError::with_errno(EngineErrorCode::SocketFail, errno));
        }
        self.log(
            LogLevel::Info,
            LogArea::SockMgmt,
            line!(),
            format!("socket {handle} closed"),
        );
        Ok(())
    }

    fn set_blocking(&self, handle: SocketHandle, blocking: bool) -> EngineResult<()> {
        let fd = self.raw_socket(handle)?;
        // SAFETY: F_GETFL/F_SETFL take no pointer arguments.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io_error(last_errno(), EngineErrorCode::InvalidOperation));
        }
        let flags = if blocking {
            flags & !libc::O_NONBLOCK
        } else {
            flags | libc::O_NONBLOCK
        };
        // SAFETY: as above.
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags) };
        if rc < 0 {
            return Err(io_error(last_errno(), EngineErrorCode::InvalidOperation));
        }
        Ok(())
    }

    fn set_option(
        &self,
        handle: SocketHandle,
        option: OptionId,
        value: &OptionValue,
    ) -> EngineResult<()> {
        let fd = self.raw_socket(handle)?;
        let (level, name) = match option {
            OptionId::SndBuf | OptionId::UdpSndBuf => (libc::SOL_SOCKET, libc::SO_SNDBUF),
            OptionId::RcvBuf | OptionId::UdpRcvBuf => (libc::SOL_SOCKET, libc::SO_RCVBUF),
            OptionId::ReuseAddr => (libc::SOL_SOCKET, libc::SO_REUSEADDR),
            OptionId::IpTtl => (libc::IPPROTO_IP, libc::IP_TTL),
            OptionId::IpTos => (libc::IPPROTO_IP, libc::IP_TOS),
            _ => return Err(EngineError::new(EngineErrorCode::InvalidOperation)),
        };
        let raw = match value {
            OptionValue::Int32(v) => *v,
            OptionValue::Bool(v) => i32::from(*v),
            _ => return Err(EngineError::new(EngineErrorCode::InvalidParam)),
        };
        Self::setsockopt_int(fd, level, name, raw)
    }

    fn set_log_handler(&self, handler: Option<LogHandlerRef>) {
        self.log.lock().set_handler(handler);
    }

    fn set_log_level(&self, level: LogLevel) {
        self.log.lock().set_level(level);
    }

    fn add_log_area(&self, area: LogArea) {
        self.log.lock().add_area(area);
    }

    fn remove_log_area(&self, area: LogArea) {
        self.log.lock().remove_area(area);
    }

    fn reset_log_areas(&self, areas: &[LogArea]) {
        self.log.lock().reset_areas(areas);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_socket_pair_round_trip() {
        let engine = EpollEngine::new();
        let (a, b) = engine.socket_pair().unwrap();
        assert_eq!(engine.send(a, b"datagram").unwrap(), 8);

        let mut buf = [0u8; 64];
        let n = engine.receive(b, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"datagram");
    }

    #[test]
    fn test_empty_receive_would_block() {
        let engine = EpollEngine::new();
        let (_a, b) = engine.socket_pair().unwrap();
        let mut buf = [0u8; 8];
        let err = engine.receive(b, &mut buf).unwrap_err();
        assert_eq!(err.code, EngineErrorCode::AsyncReceive);
        assert_eq!(err.errno(), Some(libc::EAGAIN));
    }

    #[test]
    fn test_context_reports_readable() {
        let engine = EpollEngine::new();
        let ctx = engine.create_context().unwrap();
        let (a, b) = engine.socket_pair().unwrap();
        engine.add_interest(ctx, b, EventMask::ALL_EDGE).unwrap();
        engine.send(a, b"x").unwrap();

        let mut events = [EngineEvent::default(); 8];
        let n = engine.poll(ctx, &mut events, SHORT).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].handle, b);
        assert!(events[0].mask.contains(EventMask::READABLE));
        engine.release_context(ctx).unwrap();
    }

    #[test]
    fn test_duplicate_interest_is_invalid_operation() {
        let engine = EpollEngine::new();
        let ctx = engine.create_context().unwrap();
        let (a, _b) = engine.socket_pair().unwrap();
        engine.add_interest(ctx, a, EventMask::ALL_EDGE).unwrap();
        let err = engine.add_interest(ctx, a, EventMask::ALL_EDGE).unwrap_err();
        assert_eq!(err.code, EngineErrorCode::InvalidOperation);
    }

    #[test]
    fn test_remove_unknown_interest_is_invalid_socket() {
        let engine = EpollEngine::new();
        let ctx = engine.create_context().unwrap();
        let (a, _b) = engine.socket_pair().unwrap();
        let err = engine.remove_interest(ctx, a).unwrap_err();
        assert_eq!(err.code, EngineErrorCode::InvalidSocket);
    }

    #[test]
    fn test_peer_close_marks_broken() {
        let engine = EpollEngine::new();
        let (a, b) = engine.socket_pair().unwrap();
        assert_eq!(engine.socket_state(b), SocketState::Active);
        engine.close(a).unwrap();
        assert_eq!(engine.socket_state(a), SocketState::Nonexistent);
        assert_eq!(engine.socket_state(b), SocketState::Broken);

        let mut buf = [0u8; 8];
        let err = engine.receive(b, &mut buf).unwrap_err();
        assert_eq!(err.code, EngineErrorCode::ConnectionLost);
    }

    #[test]
    fn test_gone_socket_leaves_contexts() {
        let engine = EpollEngine::new();
        let ctx = engine.create_context().unwrap();
        let (a, b) = engine.socket_pair().unwrap();
        engine.add_interest(ctx, b, EventMask::ALL_EDGE).unwrap();
        assert!(engine.is_subscribed(ctx, b));

        engine.close(a).unwrap();
        assert_eq!(engine.socket_state(b), SocketState::Broken);
        assert!(!engine.is_subscribed(ctx, b));
        // ENOENT from the kernel: the descriptor left the epoll set.
        let err = engine.remove_interest(ctx, b).unwrap_err();
        assert_eq!(err.code, EngineErrorCode::InvalidSocket);
        assert_eq!(err.errno(), Some(libc::ENOENT));
    }

    #[test]
    fn test_sub_millisecond_timeout_still_waits() {
        let engine = EpollEngine::new();
        let ctx = engine.create_context().unwrap();
        let mut events = [EngineEvent::default(); 4];

        let start = std::time::Instant::now();
        let n = engine
            .poll(ctx, &mut events, Duration::from_micros(500))
            .unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() >= Duration::from_micros(500));
    }

    #[test]
    fn test_unknown_context_rejected() {
        let engine = EpollEngine::new();
        let mut events = [EngineEvent::default(); 1];
        let err = engine
            .poll(ContextHandle(-5), &mut events, SHORT)
            .unwrap_err();
        assert_eq!(err.code, EngineErrorCode::InvalidPollId);
    }

    #[test]
    fn test_unsupported_option_rejected() {
        let engine = EpollEngine::new();
        let (a, _b) = engine.socket_pair().unwrap();
        engine
            .set_option(a, OptionId::SndBuf, &OptionValue::Int32(65536))
            .unwrap();
        let err = engine
            .set_option(a, OptionId::Latency, &OptionValue::Int32(120))
            .unwrap_err();
        assert_eq!(err.code, EngineErrorCode::InvalidOperation);
    }
}
