//! One-shot assembly of Formatter, Filter and Transport per
//! [`LogDescriptor`], Follower spawning, and coordinated shutdown (spec
//! §4.5).

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Tunables;
use crate::filter::FilterRegistry;
use crate::follower::{Follower, FollowerHandle};
use crate::formatter::{Formatter, PlainFormatter, SyslogFormatter};
use crate::transport::{Transport, TransportHandle};
use crate::types::{Destination, FramingMode, LogDescriptor};

/// Chooses the wire formatter for a log: syslog when the descriptor names a
/// hostname (mirrors `le.py`'s `FormatSyslog` vs. token-only `FormatPlain`
/// split), plain otherwise.
fn build_formatter(descriptor: &LogDescriptor) -> Arc<dyn Formatter> {
    let token = descriptor.token().unwrap_or_default().to_string();
    match &descriptor.hostname {
        Some(hostname) => {
            let appname = descriptor
                .appname
                .clone()
                .unwrap_or_else(|| descriptor.name.clone());
            Arc::new(SyslogFormatter::new(token, hostname.clone(), appname))
        }
        None => Arc::new(PlainFormatter::new(token)),
    }
}

/// Assembles and runs a set of Followers against their resolved
/// descriptors, sharing Transports by structural destination identity, and
/// owns coordinated shutdown.
pub struct Supervisor {
    followers: Vec<FollowerHandle>,
    transports: Vec<TransportHandle>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Resolves Filter and Formatter per descriptor (by name -> id -> token
    /// lookup), constructs or reuses a Transport per distinct destination,
    /// and spawns one Follower per descriptor (spec §4.5).
    pub fn start(
        descriptors: Vec<LogDescriptor>,
        filters: &FilterRegistry,
        tunables: Tunables,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut transports: Vec<TransportHandle> = Vec::new();
        let mut followers: Vec<FollowerHandle> = Vec::new();

        for descriptor in descriptors {
            if !filters.filter_filenames(&descriptor.path_pattern) {
                tracing::info!(name = %descriptor.name, "log excluded by filename predicate");
                continue;
            }

            let filter = filters.resolve(&descriptor.name, descriptor.log_id(), descriptor.token());
            let formatter = build_formatter(&descriptor);
            let transport = find_or_spawn_transport(&mut transports, &descriptor.destination, &tunables);

            let follower = Follower::new(
                descriptor.name.clone(),
                descriptor.path_pattern.clone(),
                filter,
                formatter,
                transport,
                tunables.clone(),
            );
            followers.push(follower.spawn(shutdown_rx.clone()));
        }

        Self {
            followers,
            transports,
            shutdown_tx,
        }
    }

    /// Coordinated shutdown (spec §3, §4.5): stop every Follower first so
    /// nothing enqueues new frames, then drain and close every Transport.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for follower in self.followers {
            follower.close().await;
        }
        for transport in self.transports {
            transport.close().await;
        }
    }
}

/// Reuses an existing Transport whose destination is structurally identical
/// (spec §3, §9: "share when `endpoint+port+tls+preamble` tuple matches
/// exactly"), otherwise spawns and registers a new one.
fn find_or_spawn_transport(
    transports: &mut Vec<TransportHandle>,
    destination: &Destination,
    tunables: &Tunables,
) -> Transport {
    for handle in transports.iter() {
        if handle.transport.destination().shares_transport_with(destination) {
            return handle.transport();
        }
    }
    let handle = Transport::spawn(destination.clone(), tunables.clone());
    let transport = handle.transport();
    transports.push(handle);
    transport
}

/// Builds the preamble and destination shape for an API-addressed log
/// (spec §6: `PUT /<user_key>/hosts/<host_key>/<log_key>/?realtime=1
/// HTTP/1.0\r\n\r\n`, once per reconnect).
pub fn api_preamble(user_key: &str, host_key: &str, log_key: &str) -> Vec<u8> {
    format!("PUT /{user_key}/hosts/{host_key}/{log_key}/?realtime=1 HTTP/1.0\r\n\r\n").into_bytes()
}

/// Resolves the destination's effective port, falling back to the
/// mode-appropriate default when the descriptor didn't set one explicitly
/// (spec §6 tunables table).
pub fn default_port(tls: bool, tunables: &Tunables) -> u16 {
    if tls {
        tunables.tls_default_port
    } else {
        tunables.plain_default_port
    }
}

/// Convenience constructor matching the external `LogDescriptor` shape in
/// spec §6, filling in a default port when `port` is `0`.
pub fn resolve_destination(
    endpoint: String,
    port: u16,
    tls: bool,
    mode: &FramingMode,
    tunables: &Tunables,
) -> Destination {
    let preamble = match mode {
        FramingMode::Api { host_key, log_key } => api_preamble("", host_key, log_key),
        FramingMode::Token { .. } => Vec::new(),
    };
    Destination {
        endpoint,
        port: if port == 0 { default_port(tls, tunables) } else { port },
        tls,
        preamble,
    }
}
