//! Glue types shared across Formatter, Filter, Transport, Follower and
//! Supervisor (spec §3, §6).

use std::fmt;

/// How a log's lines are addressed to the remote ingestion service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramingMode {
    /// Token-addressed log: the token is prepended (plain) or embedded
    /// (syslog) in every frame; destination is typically the shared
    /// default transport.
    Token { token: String },
    /// API-addressed log: frames carry no token, but the transport's
    /// connection is preceded by a `PUT .../?realtime=1` preamble
    /// identifying the host/log by key (spec §6).
    Api { host_key: String, log_key: String },
}

/// A destination endpoint for a Transport, plus the bytes (if any) to write
/// once per reconnect before any frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub endpoint: String,
    pub port: u16,
    pub tls: bool,
    pub preamble: Vec<u8>,
}

impl Destination {
    /// Structural identity used to decide whether two log descriptors can
    /// share one Transport (spec §3, §9): same endpoint, port, TLS-ness and
    /// preamble.
    pub fn shares_transport_with(&self, other: &Destination) -> bool {
        self.endpoint == other.endpoint
            && self.port == other.port
            && self.tls == other.tls
            && self.preamble == other.preamble
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}{}",
            self.endpoint,
            self.port,
            if self.tls { " (tls)" } else { "" }
        )
    }
}

/// An immutable, resolved description of one log to follow (spec §3).
/// Produced by the out-of-scope configuration layer; the core never
/// mutates it after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogDescriptor {
    pub name: String,
    pub path_pattern: String,
    pub destination: Destination,
    pub mode: FramingMode,
    /// Hostname used by the syslog formatter and (optionally) as the TLS
    /// SNI/verification name override; `None` uses the local hostname.
    pub hostname: Option<String>,
    /// `appname` field for the syslog formatter; defaults to the log name.
    pub appname: Option<String>,
}

impl LogDescriptor {
    pub fn token(&self) -> Option<&str> {
        match &self.mode {
            FramingMode::Token { token } => Some(token.as_str()),
            FramingMode::Api { .. } => None,
        }
    }

    pub fn log_id(&self) -> Option<&str> {
        match &self.mode {
            FramingMode::Api { log_key, .. } => Some(log_key.as_str()),
            FramingMode::Token { .. } => None,
        }
    }
}

/// An ordered sequence of bytes terminated by `\n`; the unit the Follower's
/// line splitter produces (spec §3).
pub type Line = String;

/// A fully formatted, newline-terminated outbound record (spec §3, GLOSSARY).
pub type Frame = Bytes;

pub use bytes::Bytes;
