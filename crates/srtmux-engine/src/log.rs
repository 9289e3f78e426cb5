//! Engine log vocabulary.
//!
//! Engines report their internal log lines through a plain function pointer
//! plus an integer token chosen by the caller. The caller resolves the token
//! to its own callback; no foreign-owned opaque pointers cross the boundary.

use std::collections::HashSet;
use std::fmt;

/// Severity of an engine log line (syslog numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    /// Critical condition.
    Crit = 2,
    /// Error condition.
    Err = 3,
    /// Warning.
    Warning = 4,
    /// Normal but significant.
    Notice = 5,
    /// Informational.
    Info = 6,
    /// Debug output.
    Debug = 7,
    /// Very verbose tracing.
    Trace = 8,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Crit => "crit",
            Self::Err => "err",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Functional area an engine log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum LogArea {
    General = 0,
    SockMgmt = 1,
    Conn = 2,
    XTimer = 3,
    Tsbpd = 4,
    Rsrc = 5,
    HaiCrypt = 6,
    Congest = 7,
    PFilter = 8,
    AppLog = 10,
    ApiCtrl = 11,
    QueCtrl = 13,
    EPollUpd = 16,
    ApiRecv = 21,
    BufRecv = 22,
    QueRecv = 23,
    ChnRecv = 24,
    GrpRecv = 25,
    ApiSend = 31,
    BufSend = 32,
    QueSend = 33,
    ChnSend = 34,
    GrpSend = 35,
    Internal = 41,
    QueMgmt = 43,
    ChnMgmt = 44,
    GrpMgmt = 45,
    EPollApi = 46,
}

impl LogArea {
    /// Every functional area.
    pub const ALL: [LogArea; 28] = [
        Self::General,
        Self::SockMgmt,
        Self::Conn,
        Self::XTimer,
        Self::Tsbpd,
        Self::Rsrc,
        Self::HaiCrypt,
        Self::Congest,
        Self::PFilter,
        Self::AppLog,
        Self::ApiCtrl,
        Self::QueCtrl,
        Self::EPollUpd,
        Self::ApiRecv,
        Self::BufRecv,
        Self::QueRecv,
        Self::ChnRecv,
        Self::GrpRecv,
        Self::ApiSend,
        Self::BufSend,
        Self::QueSend,
        Self::ChnSend,
        Self::GrpSend,
        Self::Internal,
        Self::QueMgmt,
        Self::ChnMgmt,
        Self::GrpMgmt,
        Self::EPollApi,
    ];

    /// Short name used in log output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::SockMgmt => "sockmgmt",
            Self::Conn => "conn",
            Self::XTimer => "xtimer",
            Self::Tsbpd => "tsbpd",
            Self::Rsrc => "rsrc",
            Self::HaiCrypt => "haicrypt",
            Self::Congest => "congest",
            Self::PFilter => "pfilter",
            Self::AppLog => "applog",
            Self::ApiCtrl => "apictrl",
            Self::QueCtrl => "quectrl",
            Self::EPollUpd => "epollupd",
            Self::ApiRecv => "apirecv",
            Self::BufRecv => "bufrecv",
            Self::QueRecv => "querecv",
            Self::ChnRecv => "chnrecv",
            Self::GrpRecv => "grprecv",
            Self::ApiSend => "apisend",
            Self::BufSend => "bufsend",
            Self::QueSend => "quesend",
            Self::ChnSend => "chnsend",
            Self::GrpSend => "grpsend",
            Self::Internal => "internal",
            Self::QueMgmt => "quemgmt",
            Self::ChnMgmt => "chnmgmt",
            Self::GrpMgmt => "grpmgmt",
            Self::EPollApi => "epollapi",
        }
    }
}

/// One engine log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity.
    pub level: LogLevel,
    /// Source file inside the engine.
    pub file: String,
    /// Source line inside the engine.
    pub line: u32,
    /// Functional area name.
    pub area: String,
    /// Formatted message.
    pub message: String,
}

/// Callback signature the engine invokes for each log line.
pub type RawLogHandler = fn(token: u64, record: &LogRecord);

/// A log handler as the engine sees it: function plus correlation token.
#[derive(Debug, Clone, Copy)]
pub struct LogHandlerRef {
    /// Function to invoke.
    pub callback: RawLogHandler,
    /// Token passed back verbatim on every call.
    pub token: u64,
}

impl LogHandlerRef {
    /// Deliver one record.
    pub fn emit(&self, record: &LogRecord) {
        (self.callback)(self.token, record);
    }
}

/// Log filtering state kept by each engine.
#[derive(Debug, Clone)]
pub(crate) struct LogSettings {
    handler: Option<LogHandlerRef>,
    level: LogLevel,
    areas: HashSet<LogArea>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            handler: None,
            level: LogLevel::Notice,
            areas: LogArea::ALL.into_iter().collect(),
        }
    }
}

impl LogSettings {
    pub(crate) fn set_handler(&mut self, handler: Option<LogHandlerRef>) {
        self.handler = handler;
    }

    pub(crate) fn set_level(&mut self, level: LogLevel) {
        self.level = level;
    }

    pub(crate) fn add_area(&mut self, area: LogArea) {
        self.areas.insert(area);
    }

    pub(crate) fn remove_area(&mut self, area: LogArea) {
        self.areas.remove(&area);
    }

    pub(crate) fn reset_areas(&mut self, areas: &[LogArea]) {
        self.areas = areas.iter().copied().collect();
    }

    /// Build the record and handler to deliver it to, if the line passes the
    /// level and area filters. Delivery happens after the caller releases
    /// its own locks.
    pub(crate) fn prepare(
        &self,
        level: LogLevel,
        area: LogArea,
        file: &str,
        line: u32,
        message: String,
    ) -> Option<(LogHandlerRef, LogRecord)> {
        let handler = self.handler?;
        if level > self.level || !self.areas.contains(&area) {
            return None;
        }
        Some((
            handler,
            LogRecord {
                level,
                file: file.to_string(),
                line,
                area: area.name().to_string(),
                message,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_token: u64, _record: &LogRecord) {}

    #[test]
    fn test_level_ordering_matches_syslog() {
        assert!(LogLevel::Crit < LogLevel::Err);
        assert!(LogLevel::Notice < LogLevel::Debug);
        assert_eq!(LogLevel::Debug as i32, 7);
    }

    #[test]
    fn test_prepare_requires_handler() {
        let settings = LogSettings::default();
        assert!(
            settings
                .prepare(LogLevel::Crit, LogArea::General, "f", 1, "m".into())
                .is_none()
        );
    }

    #[test]
    fn test_prepare_filters_level_and_area() {
        let mut settings = LogSettings::default();
        settings.set_handler(Some(LogHandlerRef {
            callback: noop,
            token: 9,
        }));
        assert!(
            settings
                .prepare(LogLevel::Debug, LogArea::Conn, "f", 1, "m".into())
                .is_none()
        );

        settings.set_level(LogLevel::Debug);
        let (handler, record) = settings
            .prepare(LogLevel::Debug, LogArea::Conn, "f", 1, "m".into())
            .unwrap();
        assert_eq!(handler.token, 9);
        assert_eq!(record.area, "conn");

        settings.remove_area(LogArea::Conn);
        assert!(
            settings
                .prepare(LogLevel::Debug, LogArea::Conn, "f", 1, "m".into())
                .is_none()
        );
    }

    #[test]
    fn test_reset_areas_empty_disables_all() {
        let mut settings = LogSettings::default();
        settings.set_handler(Some(LogHandlerRef {
            callback: noop,
            token: 1,
        }));
        settings.reset_areas(&[]);
        for area in LogArea::ALL {
            assert!(
                settings
                    .prepare(LogLevel::Crit, area, "f", 1, "m".into())
                    .is_none()
            );
        }
        settings.add_area(LogArea::SockMgmt);
        assert!(
            settings
                .prepare(LogLevel::Crit, LogArea::SockMgmt, "f", 1, "m".into())
                .is_some()
        );
    }
}
