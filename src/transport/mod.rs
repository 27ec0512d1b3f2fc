//! Long-lived, single-destination connection worker (spec §4.3).
//!
//! Owns a bounded FIFO of pending frames; a background task drains it,
//! maintains one TCP or TLS connection with exponential backoff, writes an
//! optional preamble after each (re)connect, and writes frames in order.

mod connect;
mod queue;
mod tls;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Tunables;
use crate::types::{Destination, Frame};
use connect::Connection;
use queue::DropHeadQueue;

/// Coarse connection state, surfaced for observability only — the sender
/// loop below is the source of truth (spec §4.3 state machine:
/// `DISCONNECTED -> CONNECTING -> CONNECTED -> SENDING <-> CONNECTED`, with
/// any error returning to `DISCONNECTED` and `close()` moving to `CLOSED`
/// from any state).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Sending,
    Closed,
}

/// A Transport's non-blocking, infallible-from-the-caller's-perspective
/// handle. Cloning shares the same queue and background sender — this is
/// how multiple Followers share one default Transport (spec §3, §9).
#[derive(Clone)]
pub struct Transport {
    queue: Arc<DropHeadQueue>,
    destination: Arc<Destination>,
    shutdown: watch::Sender<bool>,
}

/// Owns the background sender task; dropping it does not stop the task
/// (multiple `Transport` handles may still be live) — `Supervisor` calls
/// [`Transport::close`] explicitly during coordinated shutdown.
pub struct TransportHandle {
    pub transport: Transport,
    join: JoinHandle<()>,
}

impl Transport {
    /// Spawns the background sender and returns a handle plus the
    /// shareable `Transport` front-end.
    pub fn spawn(destination: Destination, tunables: Tunables) -> TransportHandle {
        let queue = Arc::new(DropHeadQueue::new(tunables.send_queue_size));
        let destination = Arc::new(destination);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sender_queue = queue.clone();
        let sender_destination = destination.clone();
        let join = tokio::spawn(sender_loop(
            sender_queue,
            sender_destination,
            tunables,
            shutdown_rx,
        ));

        TransportHandle {
            transport: Transport {
                queue,
                destination,
                shutdown: shutdown_tx,
            },
            join,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Non-blocking; never fails visibly (spec §4.3).
    pub fn send(&self, frame: Frame) {
        self.queue.push(frame);
    }
}

impl TransportHandle {
    /// Signals shutdown and waits (bounded, spec §4.3: "<=1.5s") for the
    /// sender to drain and close its socket.
    pub async fn close(self) {
        let _ = self.transport.shutdown.send(true);
        if tokio::time::timeout(Duration::from_millis(1_500), self.join)
            .await
            .is_err()
        {
            tracing::warn!(
                destination = %self.transport.destination,
                "transport sender did not stop within the shutdown grace period; abandoning"
            );
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport.clone()
    }
}

async fn sender_loop(
    queue: Arc<DropHeadQueue>,
    destination: Arc<Destination>,
    tunables: Tunables,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = tunables.srv_recon_to_min;
    let mut cert_error_logged = false;

    'reconnect: while !*shutdown.borrow() {
        let connect_attempt = connect::connect(&destination, tunables.tcp_timeout);
        let conn = tokio::select! {
            biased;
            _ = shutdown.changed() => break 'reconnect,
            result = connect_attempt => result,
        };

        let mut conn = match conn {
            Ok(conn) => conn,
            Err(err) => {
                if is_certificate_error(&err) {
                    if !cert_error_logged {
                        tracing::error!(
                            destination = %destination, error = %err,
                            "certificate validation failed; retrying with backoff"
                        );
                        cert_error_logged = true;
                    }
                } else {
                    tracing::debug!(destination = %destination, error = %err, "connect failed; retrying with backoff");
                }
                wait_or_shutdown(backoff, &mut shutdown).await;
                backoff = next_backoff(backoff, tunables.srv_recon_to_max);
                continue 'reconnect;
            }
        };
        cert_error_logged = false;

        if !destination.preamble.is_empty() {
            if let Err(err) = conn.write_all(&destination.preamble).await {
                tracing::debug!(destination = %destination, error = %err, "writing preamble failed; reconnecting");
                wait_or_shutdown(backoff, &mut shutdown).await;
                backoff = next_backoff(backoff, tunables.srv_recon_to_max);
                continue 'reconnect;
            }
        }

        tracing::info!(destination = %destination, "transport connected");

        let mut pending: Option<Frame> = None;
        loop {
            if *shutdown.borrow() {
                drain_on_shutdown(&mut conn, &queue, pending.take()).await;
                break 'reconnect;
            }

            let frame = match pending.take() {
                Some(frame) => frame,
                None => {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            drain_on_shutdown(&mut conn, &queue, None).await;
                            break 'reconnect;
                        }
                        popped = queue.pop_wait(Duration::from_secs(1)) => {
                            match popped {
                                Some(frame) => frame,
                                None => continue,
                            }
                        }
                    }
                }
            };

            match conn.write_all(&frame).await {
                Ok(()) => {
                    backoff = tunables.srv_recon_to_min;
                }
                Err(err) => {
                    tracing::debug!(destination = %destination, error = %err, "write failed; reconnecting");
                    // The frame is not consumed from the pipeline's
                    // perspective until a write succeeds (spec §4.3): carry
                    // it into the next connection attempt.
                    pending = Some(frame);
                    conn.shutdown().await;
                    wait_or_shutdown(backoff, &mut shutdown).await;
                    backoff = next_backoff(backoff, tunables.srv_recon_to_max);
                    continue 'reconnect;
                }
            }
        }
    }
}

/// Drains whatever is left in the queue (plus an in-flight frame, if any)
/// for up to the shutdown grace period, then gives up — the caller
/// (`TransportHandle::close`) bounds the overall wait, so this only needs
/// to best-effort flush rather than guarantee completion.
async fn drain_on_shutdown(conn: &mut Connection, queue: &DropHeadQueue, pending: Option<Frame>) {
    if let Some(frame) = pending {
        let _ = conn.write_all(&frame).await;
    }
    while let Some(frame) = queue.pop_wait(Duration::from_millis(0)).await {
        if conn.write_all(&frame).await.is_err() {
            break;
        }
    }
    conn.shutdown().await;
}

async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        biased;
        _ = shutdown.changed() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

fn is_certificate_error(err: &std::io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<connect::TlsHandshakeError>())
        .is_some_and(connect::TlsHandshakeError::is_certificate_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn delivers_frames_in_order_over_plain_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let received = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let destination = Destination {
            endpoint: "127.0.0.1".to_string(),
            port,
            tls: false,
            preamble: Vec::new(),
        };
        let handle = Transport::spawn(destination, Tunables::default());
        handle.transport.send(Bytes::from_static(b"one\n"));
        handle.transport.send(Bytes::from_static(b"two\n"));
        handle.transport.send(Bytes::from_static(b"three\n"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.close().await;

        let buf = received.await.unwrap();
        assert_eq!(buf, b"one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn sends_preamble_before_any_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let received = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let destination = Destination {
            endpoint: "127.0.0.1".to_string(),
            port,
            tls: false,
            preamble: b"PUT /u/hosts/h/l/?realtime=1 HTTP/1.0\r\n\r\n".to_vec(),
        };
        let handle = Transport::spawn(destination, Tunables::default());
        handle.transport.send(Bytes::from_static(b"line\n"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.close().await;

        let buf = received.await.unwrap();
        assert!(buf.starts_with(b"PUT /u/hosts/h/l/?realtime=1 HTTP/1.0\r\n\r\n"));
        assert!(buf.ends_with(b"line\n"));
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        let mut delay = min;
        let sequence: Vec<Duration> = std::iter::from_fn(|| {
            let current = delay;
            delay = next_backoff(delay, max);
            Some(current)
        })
        .take(6)
        .collect();
        assert_eq!(
            sequence,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
        // Manual doubling check independent of the loop above.
        assert_eq!(next_backoff(Duration::from_secs(1), max), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(8), max), Duration::from_secs(10));
        assert_eq!(next_backoff(Duration::from_secs(10), max), Duration::from_secs(10));
    }
}
