//! Named socket options.
//!
//! Options are given as `name -> string value` pairs and applied through
//! `TransportEngine::set_option` after being parsed to the option's type.
//! Each option declares the earliest lifecycle stage it must be set at:
//!
//! | Lifecycle | Settable at            |
//! |-----------|------------------------|
//! | `Prebind` | prebind only           |
//! | `Pre`     | prebind, pre           |
//! | `Post`    | prebind, pre, post     |
//!
//! The pseudo-option `blocking` is not an engine option; it selects
//! blocking I/O for a `MuxSocket` and is only honoured when the socket is
//! opened.

use crate::error::{MuxError, MuxResult};
use srtmux_engine::{OptionId, OptionValue, SocketHandle, TransType, TransportEngine};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Name of the pseudo-option selecting blocking mode.
pub const BLOCKING: &str = "blocking";

/// Socket lifecycle stage at which options are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Before the socket is bound.
    Prebind,
    /// Bound, not yet connected.
    Pre,
    /// Connected.
    Post,
}

impl Lifecycle {
    /// Whether an option declared with this lifecycle may be set at `stage`.
    #[must_use]
    pub const fn can_set_at(self, stage: Lifecycle) -> bool {
        match self {
            Self::Prebind => matches!(stage, Self::Prebind),
            Self::Pre => matches!(stage, Self::Prebind | Self::Pre),
            Self::Post => true,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prebind => f.write_str("prebind"),
            Self::Pre => f.write_str("pre"),
            Self::Post => f.write_str("post"),
        }
    }
}

/// Value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Free-form string.
    String,
    /// `1`/`true` or `0`/`false`.
    Bool,
    /// `live` or `file`.
    TransType,
}

/// One entry of the option table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    /// Option name as used in option maps.
    pub name: &'static str,
    /// Engine option it maps to.
    pub id: OptionId,
    /// Earliest stage it must be set at.
    pub lifecycle: Lifecycle,
    /// Value type.
    pub kind: OptionType,
}

impl OptionSpec {
    /// Whether this option may be set at `stage`.
    #[must_use]
    pub const fn can_set_at(&self, stage: Lifecycle) -> bool {
        self.lifecycle.can_set_at(stage)
    }

    /// Parse a string value to this option's type.
    ///
    /// # Errors
    ///
    /// A description of why the value does not parse.
    pub fn parse(&self, raw: &str) -> Result<OptionValue, String> {
        match self.kind {
            OptionType::Int32 => raw
                .trim()
                .parse::<i32>()
                .map(OptionValue::Int32)
                .map_err(|e| format!("invalid integer value: {e}")),
            OptionType::Int64 => raw
                .trim()
                .parse::<i64>()
                .map(OptionValue::Int64)
                .map_err(|e| format!("invalid integer64 value: {e}")),
            OptionType::String => Ok(OptionValue::Str(raw.to_string())),
            OptionType::Bool => parse_bool(raw).map(OptionValue::Bool),
            OptionType::TransType => match raw {
                "live" => Ok(OptionValue::TransType(TransType::Live)),
                "file" => Ok(OptionValue::TransType(TransType::File)),
                other => Err(format!(
                    "invalid transtype value: {other} (must be 'live' or 'file')"
                )),
            },
        }
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(format!("invalid boolean value: {other}")),
    }
}

const fn spec(
    name: &'static str,
    id: OptionId,
    lifecycle: Lifecycle,
    kind: OptionType,
) -> OptionSpec {
    OptionSpec {
        name,
        id,
        lifecycle,
        kind,
    }
}

/// Every option the table knows.
pub static OPTIONS: &[OptionSpec] = &[
    // Buffer allocation and binding.
    spec("mss", OptionId::Mss, Lifecycle::Prebind, OptionType::Int32),
    spec("sndbuf", OptionId::SndBuf, Lifecycle::Prebind, OptionType::Int32),
    spec("rcvbuf", OptionId::RcvBuf, Lifecycle::Prebind, OptionType::Int32),
    spec("udp_sndbuf", OptionId::UdpSndBuf, Lifecycle::Prebind, OptionType::Int32),
    spec("udp_rcvbuf", OptionId::UdpRcvBuf, Lifecycle::Prebind, OptionType::Int32),
    spec("ipttl", OptionId::IpTtl, Lifecycle::Prebind, OptionType::Int32),
    spec("iptos", OptionId::IpTos, Lifecycle::Prebind, OptionType::Int32),
    spec("reuseaddr", OptionId::ReuseAddr, Lifecycle::Prebind, OptionType::Bool),
    spec("transtype", OptionId::TransType, Lifecycle::Prebind, OptionType::TransType),
    // Handshake and negotiation.
    spec("fc", OptionId::Fc, Lifecycle::Pre, OptionType::Int32),
    spec("sender", OptionId::Sender, Lifecycle::Pre, OptionType::Bool),
    spec("tsbpdmode", OptionId::TsbpdMode, Lifecycle::Pre, OptionType::Bool),
    spec("latency", OptionId::Latency, Lifecycle::Pre, OptionType::Int32),
    spec("rcvlatency", OptionId::RcvLatency, Lifecycle::Pre, OptionType::Int32),
    spec("peerlatency", OptionId::PeerLatency, Lifecycle::Pre, OptionType::Int32),
    spec("passphrase", OptionId::Passphrase, Lifecycle::Pre, OptionType::String),
    spec("pbkeylen", OptionId::PbKeyLen, Lifecycle::Pre, OptionType::Int32),
    spec("tlpktdrop", OptionId::TlPktDrop, Lifecycle::Pre, OptionType::Bool),
    spec("nakreport", OptionId::NakReport, Lifecycle::Pre, OptionType::Bool),
    spec("conntimeo", OptionId::ConnTimeo, Lifecycle::Pre, OptionType::Int32),
    spec("streamid", OptionId::StreamId, Lifecycle::Pre, OptionType::String),
    spec("payloadsize", OptionId::PayloadSize, Lifecycle::Pre, OptionType::Int32),
    spec("messageapi", OptionId::MessageApi, Lifecycle::Pre, OptionType::Bool),
    spec("minversion", OptionId::MinVersion, Lifecycle::Pre, OptionType::Int32),
    spec("enforcedencryption", OptionId::EnforcedEncryption, Lifecycle::Pre, OptionType::Bool),
    spec("peeridletimeo", OptionId::PeerIdleTimeo, Lifecycle::Pre, OptionType::Int32),
    spec("packetfilter", OptionId::PacketFilter, Lifecycle::Pre, OptionType::String),
    spec("congestion", OptionId::Congestion, Lifecycle::Pre, OptionType::String),
    spec("kmrefreshrate", OptionId::KmRefreshRate, Lifecycle::Pre, OptionType::Int32),
    spec("kmpreannounce", OptionId::KmPreAnnounce, Lifecycle::Pre, OptionType::Int32),
    // Adjustable at any time.
    spec("maxbw", OptionId::MaxBw, Lifecycle::Post, OptionType::Int64),
    spec("inputbw", OptionId::InputBw, Lifecycle::Post, OptionType::Int64),
    spec("mininputbw", OptionId::MinInputBw, Lifecycle::Post, OptionType::Int64),
    spec("oheadbw", OptionId::OheadBw, Lifecycle::Post, OptionType::Int32),
    spec("snddropdelay", OptionId::SndDropDelay, Lifecycle::Post, OptionType::Int32),
    spec("lossmaxttl", OptionId::LossMaxTtl, Lifecycle::Post, OptionType::Int32),
];

/// Look up an option by name.
#[must_use]
pub fn find_option(name: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.name == name)
}

/// Parse `raw` as the value of the named option.
///
/// # Errors
///
/// `MuxError::InvalidOption` for an unknown name or an unparsable value.
pub fn parse_value(name: &str, raw: &str) -> MuxResult<OptionValue> {
    let spec =
        find_option(name).ok_or_else(|| MuxError::InvalidOption(format!("unknown option: {name}")))?;
    spec.parse(raw)
        .map_err(|e| MuxError::InvalidOption(format!("{name}: {e}")))
}

/// Resolve a name for `stage`. `Ok(None)` means the blocking pseudo-option,
/// which only the socket facade consumes.
fn resolve(name: &str, stage: Lifecycle) -> Result<Option<&'static OptionSpec>, String> {
    if name == BLOCKING {
        return if Lifecycle::Prebind.can_set_at(stage) {
            Ok(None)
        } else {
            Err(format!(
                "option '{name}' cannot be set at {stage} stage (requires {})",
                Lifecycle::Prebind
            ))
        };
    }
    let spec = find_option(name).ok_or_else(|| format!("unknown option: {name}"))?;
    if !spec.can_set_at(stage) {
        return Err(format!(
            "option '{name}' cannot be set at {stage} stage (requires {})",
            spec.lifecycle
        ));
    }
    Ok(Some(spec))
}

/// Check that every option is known and settable at `stage`, without
/// applying anything. All problems are reported in one error.
///
/// # Errors
///
/// `MuxError::InvalidOption` listing every offending option.
pub fn validate_for_lifecycle(stage: Lifecycle, options: &SocketOptions) -> MuxResult<()> {
    let errors: Vec<String> = options
        .iter()
        .filter_map(|(name, _)| resolve(name, stage).err())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(MuxError::InvalidOption(format!(
            "socket option validation errors: {}",
            errors.join("; ")
        )))
    }
}

/// Apply every option settable at `stage` to `handle`. Options that fail
/// do not stop the rest from being applied; all failures are reported in
/// one error.
///
/// # Errors
///
/// `MuxError::InvalidOption` listing every option that was unknown, not
/// settable at `stage`, unparsable, or rejected by the engine.
pub fn apply_for_lifecycle(
    engine: &dyn TransportEngine,
    handle: SocketHandle,
    stage: Lifecycle,
    options: &SocketOptions,
) -> MuxResult<()> {
    let mut errors = Vec::new();
    for (name, raw) in options.iter() {
        if let Err(e) = apply_one(engine, handle, stage, name, raw) {
            errors.push(e);
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(MuxError::InvalidOption(format!(
            "socket option errors: {}",
            errors.join("; ")
        )))
    }
}

fn apply_one(
    engine: &dyn TransportEngine,
    handle: SocketHandle,
    stage: Lifecycle,
    name: &str,
    raw: &str,
) -> Result<(), String> {
    let Some(spec) = resolve(name, stage)? else {
        return Ok(());
    };
    let value = spec.parse(raw).map_err(|e| format!("{name}: {e}"))?;
    engine
        .set_option(handle, spec.id, &value)
        .map_err(|e| format!("{name}: {e}"))?;
    debug!("Applied option {}={} to {} at {}", name, raw, handle, stage);
    Ok(())
}

/// Apply a single named option at `stage`.
///
/// # Errors
///
/// `MuxError::InvalidOption` describing the failure.
pub fn apply_option(
    engine: &dyn TransportEngine,
    handle: SocketHandle,
    stage: Lifecycle,
    name: &str,
    raw: &str,
) -> MuxResult<()> {
    apply_one(engine, handle, stage, name, raw).map_err(MuxError::InvalidOption)
}

/// String-keyed option map handed to `MuxSocket::open`.
///
/// ```
/// use srtmux_core::SocketOptions;
///
/// let options = SocketOptions::new()
///     .with("latency", "120")
///     .with("transtype", "live")
///     .with("blocking", "0");
/// assert!(!options.blocking().unwrap());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketOptions {
    values: BTreeMap<String, String>,
}

impl SocketOptions {
    /// Empty option set (non-blocking, engine defaults).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `insert`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set an option, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Remove an option.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    /// Raw value of an option.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Options in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of options, including `blocking`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no option is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the `blocking` pseudo-option selects blocking mode.
    /// Sockets are non-blocking unless asked otherwise.
    ///
    /// # Errors
    ///
    /// `MuxError::InvalidOption` if the value is not a boolean.
    pub fn blocking(&self) -> MuxResult<bool> {
        match self.get(BLOCKING) {
            None => Ok(false),
            Some(raw) => {
                parse_bool(raw).map_err(|e| MuxError::InvalidOption(format!("{BLOCKING}: {e}")))
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SocketOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}
