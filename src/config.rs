//! Tunable constants for the tail-and-ship pipeline.
//!
//! This is the shape the (out-of-scope) configuration-file layer populates;
//! it carries no file-parsing logic of its own, only the defaults a
//! `Supervisor` falls back to when the caller doesn't override them.

use std::time::Duration;

use serde::Deserialize;

/// Every timing/sizing constant referenced by the pipeline, with the
/// production defaults baked in via `#[serde(default = ...)]`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Maximum number of frames resident in a Transport's send queue.
    pub send_queue_size: usize,
    /// Maximum assembled line length before truncation.
    pub max_line: usize,
    /// Sleep between no-data polls of a followed file.
    #[serde(with = "duration_secs_f64")]
    pub tail_recheck: Duration,
    /// Idle polls between rename/truncate checks.
    pub name_check: u32,
    /// Sleep between reopen attempts while a log file is missing.
    #[serde(with = "duration_secs_f64")]
    pub reopen_try_interval: Duration,
    /// Idle polls after which a heartbeat token is emitted.
    pub iaa_interval: u32,
    /// Initial reconnect backoff.
    #[serde(with = "duration_secs_f64")]
    pub srv_recon_to_min: Duration,
    /// Reconnect backoff ceiling.
    #[serde(with = "duration_secs_f64")]
    pub srv_recon_to_max: Duration,
    /// TCP connect/handshake timeout.
    #[serde(with = "duration_secs_f64")]
    pub tcp_timeout: Duration,
    /// Default port for `tls: true` destinations with no explicit port.
    pub tls_default_port: u16,
    /// Default port for plaintext destinations with no explicit port.
    pub plain_default_port: u16,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            send_queue_size: 32_000,
            max_line: 65_536,
            tail_recheck: Duration::from_millis(200),
            name_check: 4,
            reopen_try_interval: Duration::from_secs(1),
            iaa_interval: 100,
            srv_recon_to_min: Duration::from_secs(1),
            srv_recon_to_max: Duration::from_secs(10),
            tcp_timeout: Duration::from_secs(10),
            tls_default_port: 20_000,
            plain_default_port: 10_000,
        }
    }
}

mod duration_secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(de)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Literal heartbeat token emitted by a Follower after `iaa_interval` idle
/// polls with no data (§6 "IAA" — is-agent-alive).
pub const IAA_TOKEN: &str = "###LE-IAA###\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let t = Tunables::default();
        assert_eq!(t.send_queue_size, 32_000);
        assert_eq!(t.max_line, 65_536);
        assert_eq!(t.name_check, 4);
        assert_eq!(t.iaa_interval, 100);
        assert_eq!(t.srv_recon_to_min, Duration::from_secs(1));
        assert_eq!(t.srv_recon_to_max, Duration::from_secs(10));
    }

}
