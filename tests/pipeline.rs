//! End-to-end scenarios against the public API: a Supervisor assembling
//! real Followers and Transports over a loopback listener.

use std::io::Write;
use std::time::Duration;

use tailship::config::Tunables;
use tailship::filter::FilterRegistry;
use tailship::transport::Transport;
use tailship::types::{Destination, FramingMode, LogDescriptor};
use tailship::Supervisor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Routes the crate's `tracing` output through the test harness's captured
/// stdout so a failing scenario's follower/transport logs show up in
/// `cargo test` output instead of vanishing. Safe to call from every test:
/// only the first call installs a subscriber.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn fast_tunables() -> Tunables {
    Tunables {
        tail_recheck: Duration::from_millis(10),
        reopen_try_interval: Duration::from_millis(10),
        name_check: 2,
        ..Tunables::default()
    }
}

/// S1 — plain format, single line: one write yields exactly one
/// token-prefixed frame.
#[tokio::test]
async fn s1_plain_single_line() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        socket.read_to_end(&mut buf).await.unwrap();
        buf
    });

    let descriptor = LogDescriptor {
        name: "app".to_string(),
        path_pattern: path.to_string_lossy().to_string(),
        destination: Destination {
            endpoint: "127.0.0.1".to_string(),
            port,
            tls: false,
            preamble: Vec::new(),
        },
        mode: FramingMode::Token {
            token: "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa".to_string(),
        },
        hostname: None,
        appname: None,
    };

    let supervisor = Supervisor::start(vec![descriptor], &FilterRegistry::new(), fast_tunables());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "hello").unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    supervisor.shutdown().await;

    let buf = received.await.unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaahello\n"
    );
}

/// S4 — truncation: file shrinks to zero mid-tail, a line written after the
/// truncation is delivered exactly once, with no error and no duplicate of
/// pre-truncation content.
#[tokio::test]
async fn s4_truncation_recovers_without_duplication() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "x".repeat(10 * 1024)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        socket.read_to_end(&mut buf).await.unwrap();
        buf
    });

    let descriptor = LogDescriptor {
        name: "app".to_string(),
        path_pattern: path.to_string_lossy().to_string(),
        destination: Destination {
            endpoint: "127.0.0.1".to_string(),
            port,
            tls: false,
            preamble: Vec::new(),
        },
        mode: FramingMode::Token {
            token: String::new(),
        },
        hostname: None,
        appname: None,
    };

    let supervisor = Supervisor::start(vec![descriptor], &FilterRegistry::new(), fast_tunables());

    // Let the follower open and seek to the current end before truncating.
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&path, "").unwrap();

    // Give the follower a chance to notice the truncation (reset its
    // position to the now-empty file's end) before any new data arrives,
    // so the later write isn't racing the detection cycle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "hello").unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    supervisor.shutdown().await;

    let buf = received.await.unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "hello\n");
}

/// S6 — reconnect: a frame enqueued while no listener is reachable must
/// still be delivered once a connection can be established, surviving the
/// reconnect/backoff cycle rather than being lost (spec §4.3: "not
/// consumed... until write succeeds").
#[tokio::test]
async fn s6_frame_survives_until_a_listener_becomes_reachable() {
    init_tracing();
    // Reserve a port, then release it so the transport's first connect
    // attempts fail with "connection refused" before anything is bound.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let destination = Destination {
        endpoint: "127.0.0.1".to_string(),
        port,
        tls: false,
        preamble: Vec::new(),
    };
    let tunables = Tunables {
        srv_recon_to_min: Duration::from_millis(20),
        srv_recon_to_max: Duration::from_millis(50),
        ..Tunables::default()
    };
    let handle = Transport::spawn(destination, tunables);
    handle.transport.send(bytes::Bytes::from_static(b"must-survive\n"));

    // Give the transport time to fail at least one connect attempt and back
    // off before the listener exists.
    tokio::time::sleep(Duration::from_millis(80)).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        socket.read_to_end(&mut buf).await.unwrap();
        buf
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.close().await;

    let buf = server.await.unwrap();
    assert_eq!(buf, b"must-survive\n");
}
