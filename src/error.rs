//! Error taxonomy for the tail-and-ship pipeline (spec §7).
//!
//! None of these propagate out of `Transport::send`/`close` or
//! `Follower`/`Supervisor` background tasks — they exist so call sites can
//! log a structured, stable reason before retrying or dropping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("log file for '{name}' does not exist or is unreadable")]
    FileOpen { name: String },

    #[error("read failed on '{name}': {source}")]
    FileRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line exceeded max length ({max} bytes); truncated")]
    LineTooLong { max: usize },

    #[error("filter for '{name}' raised an error: {reason}")]
    Filter { name: String, reason: String },

    #[error("formatter for '{name}' raised an error: {reason}")]
    Formatter { name: String, reason: String },

    #[error("send queue full for {endpoint}; oldest frame dropped")]
    TransportQueueFull { endpoint: String },

    #[error("network error talking to {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate validation failed for {endpoint}: {reason}")]
    CertificateValidation { endpoint: String, reason: String },
}

/// Rate-limits a repeated log line to at most once per `window` per key,
/// backing the "first occurrence logged, subsequent suppressed until
/// recovery" and "once per follower per minute" rules in spec §7.
///
/// Not a general-purpose limiter: it tracks a single key (one per
/// `Follower`/`Transport` instance owns one `RateLimiter`), so there's no
/// need for external synchronization beyond the owner's single-threaded use.
pub struct RateLimiter {
    window: Duration,
    last_fired: Option<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: None,
        }
    }

    pub fn per_minute() -> Self {
        Self::new(Duration::from_secs(60))
    }

    /// Returns `true` the first time it's called, and at most once per
    /// `window` thereafter.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last_fired {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }

    /// Resets the limiter so the next `allow()` call fires immediately,
    /// used when a follower recovers from an outage (spec §7: "first
    /// occurrence logged... until recovery").
    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

/// Keyed variant of [`RateLimiter`] for call sites (e.g. per-log filter
/// errors) that need independent suppression windows per key without
/// spinning up a limiter per key ahead of time.
#[derive(Default)]
pub struct KeyedRateLimiter {
    window: Option<Duration>,
    last_fired: HashMap<String, Instant>,
}

impl KeyedRateLimiter {
    pub fn per_minute() -> Self {
        Self {
            window: Some(Duration::from_secs(60)),
            last_fired: HashMap::new(),
        }
    }

    pub fn allow(&mut self, key: &str) -> bool {
        let window = self.window.unwrap_or(Duration::from_secs(60));
        let now = Instant::now();
        match self.last_fired.get(key) {
            Some(last) if now.duration_since(*last) < window => false,
            _ => {
                self.last_fired.insert(key.to_string(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_fires_once_per_window() {
        let mut limiter = RateLimiter::new(Duration::from_millis(50));
        assert!(limiter.allow());
        assert!(!limiter.allow());
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.allow());
    }

    #[test]
    fn keyed_limiter_tracks_independently() {
        let mut limiter = KeyedRateLimiter {
            window: Some(Duration::from_secs(60)),
            last_fired: HashMap::new(),
        };
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }
}
