//! Poll registry and dispatch loop.
//!
//! A `PollRegistry` owns one shared engine event context and one background
//! thread that polls it. Sockets register their handle and receive a
//! `ReadinessWaiter`; the dispatch loop translates each polled event into
//! an `unblock` on the matching waiter.
//!
//! The waiter map is the only state shared between callers and the loop.
//! It is held while changing the engine's interest set (so registration
//! and removal never interleave for the same handle) and while copying a
//! batch's waiters out, but never while waking anyone.

use crate::classify::{ErrorClass, classify};
use crate::config::MuxConfig;
use crate::error::{Direction, MuxError, MuxResult, RegistrationError};
use crate::waiter::ReadinessWaiter;
use parking_lot::Mutex;
use srtmux_engine::{
    ContextHandle, EngineErrorCode, EngineEvent, EventMask, SocketHandle, TransportEngine,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// Dispatch loop running; registration accepted.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Shut down cleanly.
    Stopped,
    /// The engine poll failed; every waiter was closed.
    Failed,
}

impl RegistryState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Stopping,
            2 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Stopping => 1,
            Self::Stopped => 2,
            Self::Failed => 3,
        }
    }
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of dispatch loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Completed engine polls (including idle ones).
    pub polls: u64,
    /// Polls that returned no events.
    pub idle_timeouts: u64,
    /// Events received from the engine.
    pub events: u64,
    /// Read-direction wakeups delivered.
    pub read_wakeups: u64,
    /// Write-direction wakeups delivered.
    pub write_wakeups: u64,
    /// Error events delivered (each wakes both directions).
    pub error_wakeups: u64,
    /// Events for handles no longer registered.
    pub stale_events: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    polls: AtomicU64,
    idle_timeouts: AtomicU64,
    events: AtomicU64,
    read_wakeups: AtomicU64,
    write_wakeups: AtomicU64,
    error_wakeups: AtomicU64,
    stale_events: AtomicU64,
}

impl DispatchCounters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            polls: self.polls.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            read_wakeups: self.read_wakeups.load(Ordering::Relaxed),
            write_wakeups: self.write_wakeups.load(Ordering::Relaxed),
            error_wakeups: self.error_wakeups.load(Ordering::Relaxed),
            stale_events: self.stale_events.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

type WaiterMap = HashMap<SocketHandle, Arc<ReadinessWaiter>>;

struct Shared {
    engine: Arc<dyn TransportEngine>,
    context: ContextHandle,
    config: MuxConfig,
    waiters: Mutex<WaiterMap>,
    state: AtomicU8,
    counters: DispatchCounters,
}

impl Shared {
    fn state(&self) -> RegistryState {
        RegistryState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RegistryState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Remove and close every waiter. Callers blocked on them wake with a
    /// closed outcome.
    fn close_all(&self) -> usize {
        let drained: Vec<_> = self.waiters.lock().drain().map(|(_, w)| w).collect();
        for waiter in &drained {
            waiter.close();
        }
        drained.len()
    }
}

fn registration_error(handle: SocketHandle, code: EngineErrorCode) -> RegistrationError {
    match code {
        EngineErrorCode::InvalidPollId | EngineErrorCode::PollEmpty => {
            RegistrationError::ContextCorrupt(code)
        }
        EngineErrorCode::InvalidOperation => RegistrationError::AlreadyRegistered(handle),
        other => RegistrationError::Transient(other),
    }
}

/// Shared event context plus the dispatch loop that services it.
///
/// # Examples
///
/// ```
/// use srtmux_core::{MuxConfig, PollRegistry};
/// use srtmux_engine::LoopbackEngine;
/// use std::sync::Arc;
///
/// let engine = Arc::new(LoopbackEngine::new());
/// let registry = PollRegistry::start(engine.clone(), MuxConfig::default()).unwrap();
///
/// let (a, _b) = engine.open_pair();
/// registry.register(a).unwrap();
/// assert!(registry.is_registered(a));
///
/// registry.unregister(a).unwrap();
/// registry.shutdown();
/// ```
pub struct PollRegistry {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PollRegistry {
    /// Create the shared context and start the dispatch loop.
    ///
    /// # Errors
    ///
    /// - `MuxError::InvalidConfig` if `config` does not validate
    /// - `MuxError::ContextInit` if the engine cannot create the context
    /// - `MuxError::Spawn` if the dispatch thread cannot be started
    pub fn start(engine: Arc<dyn TransportEngine>, config: MuxConfig) -> MuxResult<Arc<Self>> {
        config.validate()?;
        let context = engine.create_context().map_err(MuxError::ContextInit)?;
        let thread_name = config.thread_name.clone();

        let shared = Arc::new(Shared {
            engine,
            context,
            config,
            waiters: Mutex::new(HashMap::new()),
            state: AtomicU8::new(RegistryState::Running.as_u8()),
            counters: DispatchCounters::default(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(thread_name)
                .spawn(move || run(&shared))
        };
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                shared.set_state(RegistryState::Failed);
                if let Err(release) = shared.engine.release_context(context) {
                    warn!("Failed to release context {}: {}", context, release);
                }
                return Err(MuxError::Spawn(e));
            }
        };

        info!(
            "Poll registry started on {} (batch {}, timeout {:?})",
            context, shared.config.batch_capacity, shared.config.poll_timeout
        );

        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Subscribe `handle` to the shared context and create its waiter.
    ///
    /// The handle is subscribed for readable, writable and error events,
    /// edge-triggered.
    ///
    /// # Errors
    ///
    /// - `AlreadyRegistered` if the handle has a waiter; the existing one
    ///   is untouched
    /// - `ShutDown` if the registry is not running
    /// - `ContextCorrupt` or `Transient` if the engine rejects the
    ///   subscription
    pub fn register(&self, handle: SocketHandle) -> Result<Arc<ReadinessWaiter>, RegistrationError> {
        let mut waiters = self.shared.waiters.lock();
        // Checked under the map lock: failure and shutdown drain the map
        // after publishing their state.
        if self.shared.state() != RegistryState::Running {
            return Err(RegistrationError::ShutDown);
        }
        if waiters.contains_key(&handle) {
            return Err(RegistrationError::AlreadyRegistered(handle));
        }

        self.shared
            .engine
            .add_interest(self.shared.context, handle, EventMask::ALL_EDGE)
            .map_err(|e| {
                warn!("Engine rejected registration of {}: {}", handle, e);
                registration_error(handle, e.code)
            })?;

        let waiter = Arc::new(ReadinessWaiter::new());
        waiters.insert(handle, Arc::clone(&waiter));
        debug!("Registered {} ({} sockets)", handle, waiters.len());
        Ok(waiter)
    }

    /// Remove `handle` and close its waiter. A handle that is not
    /// registered is ignored.
    ///
    /// If the engine reports the socket gone (broken, closing, closed or
    /// nonexistent) it has already dropped the subscription, so only the
    /// map entry is removed.
    ///
    /// # Errors
    ///
    /// `ContextCorrupt` or `Transient` if the engine refuses to remove the
    /// subscription; the handle then stays registered.
    pub fn unregister(&self, handle: SocketHandle) -> Result<(), RegistrationError> {
        let mut waiters = self.shared.waiters.lock();
        if !waiters.contains_key(&handle) {
            return Ok(());
        }

        let state = self.shared.engine.socket_state(handle);
        if !state.is_gone() {
            match self
                .shared
                .engine
                .remove_interest(self.shared.context, handle)
            {
                Ok(()) => {}
                // Lost a race with the engine dropping a socket that broke.
                Err(e) if e.code == EngineErrorCode::InvalidSocket => {
                    debug!("{} already left {}", handle, self.shared.context);
                }
                Err(e) => {
                    warn!("Engine refused to unregister {}: {}", handle, e);
                    return Err(registration_error(handle, e.code));
                }
            }
        }

        let removed = waiters.remove(&handle);
        let remaining = waiters.len();
        drop(waiters);

        if let Some(waiter) = removed {
            waiter.close();
        }
        debug!(
            "Unregistered {} (state {}, {} sockets)",
            handle, state, remaining
        );
        Ok(())
    }

    /// Drop `handle` from the map and close its waiter without touching
    /// the engine. For handles the engine has already released, e.g. after
    /// a failed `unregister` followed by a successful engine close.
    ///
    /// Returns `true` if the handle was registered.
    pub fn forget(&self, handle: SocketHandle) -> bool {
        let removed = self.shared.waiters.lock().remove(&handle);
        match removed {
            Some(waiter) => {
                waiter.close();
                debug!("Forgot {}", handle);
                true
            }
            None => false,
        }
    }

    /// Stop the dispatch loop, close every waiter and release the context.
    ///
    /// Returns once the loop has exited, which takes at most one poll
    /// timeout. Idempotent.
    pub fn shutdown(&self) {
        let previous = {
            let _guard = self.shared.waiters.lock();
            let previous = self.shared.state();
            if matches!(previous, RegistryState::Stopping | RegistryState::Stopped) {
                return;
            }
            self.shared.set_state(RegistryState::Stopping);
            previous
        };

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Dispatch thread for {} panicked", self.shared.context);
            }
        }

        let closed = self.shared.close_all();
        if let Err(e) = self.shared.engine.release_context(self.shared.context) {
            warn!("Failed to release context {}: {}", self.shared.context, e);
        }

        // A failed registry keeps reporting the failure.
        let terminal = if previous == RegistryState::Failed {
            RegistryState::Failed
        } else {
            RegistryState::Stopped
        };
        self.shared.set_state(terminal);
        info!(
            "Poll registry on {} shut down ({} waiters closed)",
            self.shared.context, closed
        );
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RegistryState {
        self.shared.state()
    }

    /// True while the dispatch loop runs and registration is accepted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state() == RegistryState::Running
    }

    /// True if `handle` currently has a waiter.
    #[must_use]
    pub fn is_registered(&self, handle: SocketHandle) -> bool {
        self.shared.waiters.lock().contains_key(&handle)
    }

    /// The waiter of a registered handle.
    #[must_use]
    pub fn waiter(&self, handle: SocketHandle) -> Option<Arc<ReadinessWaiter>> {
        self.shared.waiters.lock().get(&handle).cloned()
    }

    /// Number of registered handles.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.shared.waiters.lock().len()
    }

    /// Dispatch loop counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.shared.counters.snapshot()
    }

    /// The shared event context.
    #[must_use]
    pub fn context(&self) -> ContextHandle {
        self.shared.context
    }

    /// The engine this registry polls.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn TransportEngine> {
        &self.shared.engine
    }

    /// Configuration the registry was started with.
    #[must_use]
    pub fn config(&self) -> &MuxConfig {
        &self.shared.config
    }
}

impl fmt::Debug for PollRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollRegistry")
            .field("context", &self.shared.context)
            .field("state", &self.shared.state())
            .field("registered", &self.registered_count())
            .finish()
    }
}

impl Drop for PollRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dispatch loop body. Runs until the registry leaves `Running`.
fn run(shared: &Shared) {
    let capacity = shared.config.batch_capacity;
    let timeout = shared.config.poll_timeout;
    let mut events = vec![EngineEvent::default(); capacity];
    let mut scratch: Vec<(Option<Arc<ReadinessWaiter>>, EventMask)> =
        Vec::with_capacity(capacity);

    debug!("Dispatch loop on {} running", shared.context);

    while shared.state() == RegistryState::Running {
        let polled = shared.engine.poll(shared.context, &mut events, timeout);
        bump(&shared.counters.polls);

        match polled {
            Ok(0) => bump(&shared.counters.idle_timeouts),
            Ok(n) => dispatch(shared, &events[..n], &mut scratch),
            Err(e) if classify(&e) == ErrorClass::Timeout => {
                bump(&shared.counters.idle_timeouts);
            }
            Err(e) => {
                if shared.state() != RegistryState::Running {
                    break;
                }
                {
                    let _guard = shared.waiters.lock();
                    shared.set_state(RegistryState::Failed);
                }
                let closed = shared.close_all();
                error!(
                    "Polling {} failed: {}; closed {} waiters",
                    shared.context, e, closed
                );
                return;
            }
        }
    }

    debug!("Dispatch loop on {} exiting", shared.context);
}

/// Wake the waiters of one batch.
fn dispatch(
    shared: &Shared,
    events: &[EngineEvent],
    scratch: &mut Vec<(Option<Arc<ReadinessWaiter>>, EventMask)>,
) {
    let counters = &shared.counters;
    counters
        .events
        .fetch_add(events.len() as u64, Ordering::Relaxed);

    scratch.clear();
    {
        let waiters = shared.waiters.lock();
        scratch.extend(
            events
                .iter()
                .map(|ev| (waiters.get(&ev.handle).cloned(), ev.mask)),
        );
    }
    trace!("Dispatching {} events on {}", events.len(), shared.context);

    for (waiter, mask) in scratch.drain(..) {
        let Some(waiter) = waiter else {
            bump(&counters.stale_events);
            continue;
        };
        if mask.contains(EventMask::ERROR) {
            waiter.unblock(Direction::Read, true, false);
            waiter.unblock(Direction::Write, true, false);
            bump(&counters.error_wakeups);
            continue;
        }
        if mask.contains(EventMask::READABLE) {
            waiter.unblock(Direction::Read, false, true);
            bump(&counters.read_wakeups);
        }
        if mask.contains(EventMask::WRITABLE) {
            waiter.unblock(Direction::Write, false, true);
            bump(&counters.write_wakeups);
        }
    }
}

/// Registry constructor used by `LazyRegistry`.
pub type RegistryInit = fn() -> MuxResult<Arc<PollRegistry>>;

/// Construct-once holder for a process-wide registry.
///
/// The registry is created on the first `get`. A registry that has since
/// failed or been shut down is replaced on the next `get`.
///
/// ```
/// use srtmux_core::{LazyRegistry, MuxConfig, MuxResult, PollRegistry};
/// use srtmux_engine::LoopbackEngine;
/// use std::sync::Arc;
///
/// fn init() -> MuxResult<Arc<PollRegistry>> {
///     PollRegistry::start(Arc::new(LoopbackEngine::new()), MuxConfig::default())
/// }
///
/// static REGISTRY: LazyRegistry = LazyRegistry::new(init);
///
/// let a = REGISTRY.get().unwrap();
/// let b = REGISTRY.get().unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// # if let Some(r) = REGISTRY.take() { r.shutdown(); }
/// ```
pub struct LazyRegistry {
    slot: Mutex<Option<Arc<PollRegistry>>>,
    init: RegistryInit,
}

impl LazyRegistry {
    /// Create an empty holder.
    #[must_use]
    pub const fn new(init: RegistryInit) -> Self {
        Self {
            slot: Mutex::new(None),
            init,
        }
    }

    /// The running registry, starting it if needed.
    ///
    /// # Errors
    ///
    /// Whatever the constructor returns; the holder stays empty and the
    /// next call tries again.
    pub fn get(&self) -> MuxResult<Arc<PollRegistry>> {
        let mut slot = self.slot.lock();
        if let Some(registry) = slot.as_ref().filter(|r| r.is_running()) {
            return Ok(Arc::clone(registry));
        }
        let registry = (self.init)()?;
        *slot = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// Remove the held registry, if any, leaving the holder empty.
    pub fn take(&self) -> Option<Arc<PollRegistry>> {
        self.slot.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waiter::WaitError;
    use srtmux_engine::{LoopbackEngine, SocketState};
    use std::time::{Duration, Instant};

    fn fast_config() -> MuxConfig {
        MuxConfig::default().with_poll_timeout(Duration::from_millis(10))
    }

    fn start() -> (Arc<LoopbackEngine>, Arc<PollRegistry>) {
        let engine = Arc::new(LoopbackEngine::new());
        let registry = PollRegistry::start(engine.clone(), fast_config()).unwrap();
        (engine, registry)
    }

    fn within(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_register_and_unregister() {
        let (engine, registry) = start();
        let (a, _b) = engine.open_pair();

        registry.register(a).unwrap();
        assert!(registry.is_registered(a));
        assert!(engine.is_subscribed(registry.context(), a));

        registry.unregister(a).unwrap();
        assert!(!registry.is_registered(a));
        assert!(!engine.is_subscribed(registry.context(), a));

        // Second removal is a no-op.
        registry.unregister(a).unwrap();
    }

    #[test]
    fn test_duplicate_register_keeps_original() {
        let (engine, registry) = start();
        let (a, _b) = engine.open_pair();
        let first = registry.register(a).unwrap();

        let err = registry.register(a).unwrap_err();
        assert_eq!(err, RegistrationError::AlreadyRegistered(a));
        let current = registry.waiter(a).unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert!(!first.is_closed());
    }

    #[test]
    fn test_engine_rejection_is_reported() {
        let (_engine, registry) = start();
        let err = registry.register(SocketHandle(999)).unwrap_err();
        assert_eq!(
            err,
            RegistrationError::Transient(EngineErrorCode::InvalidSocket)
        );
        assert!(!registry.is_registered(SocketHandle(999)));
    }

    #[test]
    fn test_forget_skips_engine() {
        let (engine, registry) = start();
        let (a, _b) = engine.open_pair();
        let waiter = registry.register(a).unwrap();

        assert!(registry.forget(a));
        assert!(waiter.is_closed());
        assert!(!registry.is_registered(a));
        // Map-only: the engine subscription is untouched.
        assert!(engine.is_subscribed(registry.context(), a));
        assert!(!registry.forget(a));
    }

    #[test]
    fn test_unregister_closes_waiter() {
        let (engine, registry) = start();
        let (a, _b) = engine.open_pair();
        let waiter = registry.register(a).unwrap();

        let parked = {
            let waiter = Arc::clone(&waiter);
            thread::spawn(move || waiter.wait(Direction::Read, None))
        };
        thread::sleep(Duration::from_millis(10));
        registry.unregister(a).unwrap();
        assert_eq!(parked.join().unwrap(), Err(WaitError::Closed));
    }

    #[test]
    fn test_unregister_broken_socket_skips_engine() {
        let (engine, registry) = start();
        let (a, _b) = engine.open_pair();
        registry.register(a).unwrap();
        engine.break_socket(a).unwrap();
        assert_eq!(engine.socket_state(a), SocketState::Broken);

        registry.unregister(a).unwrap();
        assert!(!registry.is_registered(a));
    }

    #[test]
    fn test_readable_event_wakes_reader() {
        let (engine, registry) = start();
        let (a, b) = engine.open_pair();
        let waiter = registry.register(b).unwrap();
        waiter.reset(Direction::Read);

        engine.send(a, b"x").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        assert_eq!(waiter.wait(Direction::Read, Some(deadline)), Ok(()));
        assert!(within(Duration::from_secs(1), || registry.stats().read_wakeups >= 1));
    }

    #[test]
    fn test_error_event_wakes_both_directions() {
        let (engine, registry) = start();
        let (a, _b) = engine.open_pair();
        let waiter = registry.register(a).unwrap();
        waiter.reset(Direction::Read);
        waiter.reset(Direction::Write);

        engine.break_socket(a).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        assert_eq!(
            waiter.wait(Direction::Read, Some(deadline)),
            Err(WaitError::Fatal)
        );
        assert_eq!(
            waiter.wait(Direction::Write, Some(deadline)),
            Err(WaitError::Fatal)
        );
    }

    #[test]
    fn test_poll_failure_closes_waiters() {
        let (engine, registry) = start();
        let (a, _b) = engine.open_pair();
        let waiter = registry.register(a).unwrap();

        engine
            .fail_context(registry.context(), EngineErrorCode::SocketFail)
            .unwrap();
        assert_eq!(waiter.wait(Direction::Read, None), Err(WaitError::Closed));
        assert!(within(Duration::from_secs(1), || registry.state()
            == RegistryState::Failed));

        let (c, _d) = engine.open_pair();
        assert_eq!(registry.register(c).unwrap_err(), RegistrationError::ShutDown);
    }

    #[test]
    fn test_engine_timeout_is_not_fatal() {
        let (engine, registry) = start();
        engine
            .fail_context(registry.context(), EngineErrorCode::Timeout)
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(registry.is_running());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (engine, registry) = start();
        let (a, _b) = engine.open_pair();
        let waiter = registry.register(a).unwrap();

        registry.shutdown();
        assert_eq!(registry.state(), RegistryState::Stopped);
        assert!(waiter.is_closed());
        assert_eq!(registry.registered_count(), 0);
        registry.shutdown();
        assert_eq!(registry.state(), RegistryState::Stopped);
        assert_eq!(registry.register(a).unwrap_err(), RegistrationError::ShutDown);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let engine = Arc::new(LoopbackEngine::new());
        let err = PollRegistry::start(engine, MuxConfig::default().with_batch_capacity(0))
            .unwrap_err();
        assert!(matches!(err, MuxError::InvalidConfig(_)));
    }

    #[test]
    fn test_dispatch_thread_is_named() {
        let engine = Arc::new(LoopbackEngine::new());
        let registry =
            PollRegistry::start(engine, fast_config().with_thread_name("mux-test")).unwrap();
        let name = registry
            .worker
            .lock()
            .as_ref()
            .and_then(|w| w.thread().name().map(str::to_string));
        assert_eq!(name.as_deref(), Some("mux-test"));
    }

    fn lazy_init() -> MuxResult<Arc<PollRegistry>> {
        PollRegistry::start(Arc::new(LoopbackEngine::new()), fast_config())
    }

    #[test]
    fn test_lazy_registry_constructs_once() {
        static LAZY: LazyRegistry = LazyRegistry::new(lazy_init);
        let first = LAZY.get().unwrap();
        let second = LAZY.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        first.shutdown();
        let third = LAZY.get().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.is_running());
        third.shutdown();
    }
}
