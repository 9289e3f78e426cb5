//! Engine log bridge.
//!
//! Engines report log lines through a plain `fn(u64, &LogRecord)` and an
//! integer token. This module keeps a process-wide table from token to
//! closure so applications can install ordinary Rust closures (or forward
//! everything to `tracing`) without handing the engine any pointer it
//! would have to keep alive.

use parking_lot::Mutex;
use srtmux_engine::{LogArea, LogHandlerRef, LogLevel, LogRecord, TransportEngine};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Closure receiving engine log lines.
pub type LogCallback = Arc<dyn Fn(&LogRecord) + Send + Sync>;

struct CallbackTable {
    next: u64,
    /// Engine (by address) to the token currently installed on it.
    installed: BTreeMap<usize, u64>,
    entries: BTreeMap<u64, LogCallback>,
}

static TABLE: Mutex<CallbackTable> = Mutex::new(CallbackTable {
    next: 1,
    installed: BTreeMap::new(),
    entries: BTreeMap::new(),
});

fn engine_key(engine: &dyn TransportEngine) -> usize {
    (engine as *const dyn TransportEngine).cast::<()>() as usize
}

/// The function every engine is given. Runs on engine threads.
fn trampoline(token: u64, record: &LogRecord) {
    let callback = TABLE.lock().entries.get(&token).cloned();
    if let Some(callback) = callback {
        callback(record);
    }
}

/// Install `handler` for `engine`'s log lines, replacing any handler
/// installed earlier through this module.
///
/// The handler runs on whichever engine thread emits the line and must not
/// call back into the engine's log controls.
pub fn set_log_handler<F>(engine: &dyn TransportEngine, handler: F)
where
    F: Fn(&LogRecord) + Send + Sync + 'static,
{
    let token = {
        let mut table = TABLE.lock();
        let token = table.next;
        table.next += 1;
        table.entries.insert(token, Arc::new(handler));
        if let Some(previous) = table.installed.insert(engine_key(engine), token) {
            table.entries.remove(&previous);
        }
        token
    };
    engine.set_log_handler(Some(LogHandlerRef {
        callback: trampoline,
        token,
    }));
    debug!("Installed engine log handler (token {})", token);
}

/// Remove the handler installed on `engine`, if any.
pub fn unset_log_handler(engine: &dyn TransportEngine) {
    engine.set_log_handler(None);
    let mut table = TABLE.lock();
    if let Some(token) = table.installed.remove(&engine_key(engine)) {
        table.entries.remove(&token);
    }
}

/// Route `engine`'s log lines into `tracing`.
///
/// Levels map as: crit/err to `error`, warning to `warn`, notice/info to
/// `info`, debug to `debug`, trace to `trace`. Each event carries the
/// functional area and the engine source location as fields.
pub fn forward_to_tracing(engine: &dyn TransportEngine) {
    set_log_handler(engine, emit_tracing);
}

fn emit_tracing(record: &LogRecord) {
    let area = record.area.as_str();
    let file = record.file.as_str();
    let line = record.line;
    let message = record.message.as_str();
    match record.level {
        LogLevel::Crit | LogLevel::Err => error!(area, file, line, "{}", message),
        LogLevel::Warning => warn!(area, file, line, "{}", message),
        LogLevel::Notice | LogLevel::Info => info!(area, file, line, "{}", message),
        LogLevel::Debug => debug!(area, file, line, "{}", message),
        LogLevel::Trace => trace!(area, file, line, "{}", message),
    }
}

/// Set the most verbose level `engine` reports.
pub fn set_log_level(engine: &dyn TransportEngine, level: LogLevel) {
    engine.set_log_level(level);
}

/// Enable one functional area.
pub fn add_log_area(engine: &dyn TransportEngine, area: LogArea) {
    engine.add_log_area(area);
}

/// Disable one functional area.
pub fn remove_log_area(engine: &dyn TransportEngine, area: LogArea) {
    engine.remove_log_area(area);
}

/// Enable exactly `areas`. An empty slice disables all logging.
pub fn reset_log_areas(engine: &dyn TransportEngine, areas: &[LogArea]) {
    engine.reset_log_areas(areas);
}

#[cfg(test)]
fn installed_token(engine: &dyn TransportEngine) -> Option<u64> {
    TABLE.lock().installed.get(&engine_key(engine)).copied()
}
