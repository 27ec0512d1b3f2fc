//! Tail-and-ship pipeline: follows append-only log files under rotation,
//! truncation and network outage, and delivers framed records over
//! long-lived TCP/TLS connections.
//!
//! The crate root only wires the pieces together; each module carries its
//! own contract:
//!
//! - [`formatter`] — line -> frame mapping (plain, syslog).
//! - [`filter`] — pure line predicate/transform, resolved by name/id/token.
//! - [`transport`] — one outbound connection plus its bounded send queue.
//! - [`follower`] — tails one file and drives filter -> formatter -> transport.
//! - [`supervisor`] — assembles followers and transports from a resolved
//!   log list and coordinates shutdown.
//!
//! Configuration-file parsing, host registration, and CLI/daemon plumbing
//! are out of scope: callers hand the [`supervisor::Supervisor`] an
//! already-resolved `Vec<types::LogDescriptor>`.

pub mod config;
pub mod error;
pub mod filter;
pub mod follower;
pub mod formatter;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use config::Tunables;
pub use error::PipelineError;
pub use supervisor::Supervisor;
pub use types::{Destination, FramingMode, LogDescriptor};
