//! Per-log-file worker: opens a file by glob pattern, tails new bytes,
//! assembles lines, and hands them through Filter -> Formatter -> Transport
//! (spec §4.4).

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;

use crate::config::{Tunables, IAA_TOKEN};
use crate::error::{KeyedRateLimiter, PipelineError, RateLimiter};
use crate::filter::{self, FilterFn};
use crate::formatter::Formatter;
use crate::transport::Transport;
use crate::types::Line;

/// Tails `path_pattern`, applying `filter` then `formatter` to every
/// complete line and forwarding the resulting frames to `transport`.
pub struct Follower {
    name: String,
    path_pattern: String,
    filter: FilterFn,
    formatter: std::sync::Arc<dyn Formatter>,
    transport: Transport,
    tunables: Tunables,
    filter_formatter_errors: KeyedRateLimiter,
}

impl Follower {
    pub fn new(
        name: impl Into<String>,
        path_pattern: impl Into<String>,
        filter: FilterFn,
        formatter: std::sync::Arc<dyn Formatter>,
        transport: Transport,
        tunables: Tunables,
    ) -> Self {
        Self {
            name: name.into(),
            path_pattern: path_pattern.into(),
            filter,
            formatter,
            transport,
            tunables,
            filter_formatter_errors: KeyedRateLimiter::per_minute(),
        }
    }

    /// Spawns the follower as a background task, returning a handle that
    /// joins the worker (bounded) once `shutdown` is signalled.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> FollowerHandle {
        let join = tokio::spawn(self.run(shutdown));
        FollowerHandle { join }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let name = self.name.clone();
        let Some(mut open) = open_with_retry(
            &self.path_pattern,
            &name,
            self.tunables.reopen_try_interval,
            &mut shutdown,
        )
        .await
        else {
            return;
        };

        // Initial positioning: new data only, no replay (spec §4.4).
        let file = open.file.take().expect("file present after open");
        let (file, result) = blocking_fallible(file, |f| {
            f.seek(SeekFrom::End(0))?;
            Ok(())
        })
        .await;
        open.file = Some(file);
        if let Err(err) = result {
            tracing::warn!(name = %name, error = %err, "failed to seek to end of file on open");
        }

        let mut tail_buffer: Vec<u8> = Vec::new();
        let mut idle_cnt: u32 = 0;
        let mut iaa_cnt: u32 = 0;

        'outer: loop {
            if *shutdown.borrow() {
                break;
            }

            let max_read = self.tunables.max_line.saturating_sub(tail_buffer.len());
            if max_read == 0 {
                // tail_buffer filled MAX_LINE with no terminator: truncate
                // and start a fresh line (spec §3 line-length invariant).
                let line = String::from_utf8_lossy(&tail_buffer).into_owned();
                self.emit_line(line);
                tail_buffer.clear();
                continue;
            }

            let file = open.file.take().expect("file present in read loop");
            let read_result = blocking(move || {
                let mut buf = vec![0u8; max_read];
                let mut file = file;
                let n = file.read(&mut buf)?;
                buf.truncate(n);
                Ok((file, buf))
            })
            .await;

            let (file, chunk) = match read_result {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::debug!(name = %name, error = %err, "read failed; reopening");
                    let Some(reopened) = open_with_retry(
                        &self.path_pattern,
                        &name,
                        self.tunables.reopen_try_interval,
                        &mut shutdown,
                    )
                    .await
                    else {
                        break 'outer;
                    };
                    open = reopened;
                    tail_buffer.clear();
                    idle_cnt = 0;
                    iaa_cnt = 0;
                    continue;
                }
            };
            open.file = Some(file);

            if !chunk.is_empty() {
                tail_buffer.extend_from_slice(&chunk);
                let mut start = 0;
                while let Some(rel) = tail_buffer[start..].iter().position(|&b| b == b'\n') {
                    let end = start + rel;
                    let line = String::from_utf8_lossy(&tail_buffer[start..end]).into_owned();
                    self.emit_line(line);
                    start = end + 1;
                }
                tail_buffer.drain(0..start);
                idle_cnt = 0;
                iaa_cnt = 0;
                continue;
            }

            // No data: sleep TAIL_RECHECK, recheck shutdown.
            tokio::select! {
                biased;
                _ = shutdown.changed() => break 'outer,
                _ = tokio::time::sleep(self.tunables.tail_recheck) => {}
            }

            idle_cnt += 1;
            if idle_cnt == self.tunables.name_check {
                idle_cnt = 0;
                if detect_rotation(&open, &self.path_pattern).await {
                    tracing::info!(name = %name, "log rotation detected; reopening");
                    let Some(reopened) = open_with_retry(
                        &self.path_pattern,
                        &name,
                        self.tunables.reopen_try_interval,
                        &mut shutdown,
                    )
                    .await
                    else {
                        break 'outer;
                    };
                    open = reopened;
                    tail_buffer.clear();
                    iaa_cnt = 0;
                    continue;
                }
                if let Err(err) = recover_from_truncation(&mut open).await {
                    tracing::debug!(name = %name, error = %err, "truncation recovery check failed");
                }
            }

            iaa_cnt += 1;
            if iaa_cnt == self.tunables.iaa_interval {
                iaa_cnt = 0;
                self.transport.send(bytes::Bytes::from_static(IAA_TOKEN.as_bytes()));
            }
        }
    }

    /// Filter -> Formatter -> one `transport.send` per resulting frame
    /// (spec §4.2, §4.4). Mirrors `le.py`'s `_send_line`.
    ///
    /// A panicking filter or formatter drops the offending line instead of
    /// killing the follower task; the failure is logged at most once per
    /// minute per follower (spec §7).
    fn emit_line(&mut self, line: Line) {
        let filter = &self.filter;
        let filtered = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| filter::apply(filter, &line))) {
            Ok(filtered) => filtered,
            Err(payload) => {
                if self.filter_formatter_errors.allow("filter") {
                    let err = PipelineError::Filter {
                        name: self.name.clone(),
                        reason: panic_reason(&payload),
                    };
                    tracing::error!(name = %self.name, error = %err, "filter panicked; line dropped");
                }
                return;
            }
        };
        let Some(filtered) = filtered else {
            return;
        };

        let formatter = &self.formatter;
        let frames = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| formatter.format(&filtered))) {
            Ok(frames) => frames,
            Err(payload) => {
                if self.filter_formatter_errors.allow("formatter") {
                    let err = PipelineError::Formatter {
                        name: self.name.clone(),
                        reason: panic_reason(&payload),
                    };
                    tracing::error!(name = %self.name, error = %err, "formatter panicked; line dropped");
                }
                return;
            }
        };
        for frame in frames {
            self.transport.send(frame);
        }
    }
}

/// Extracts a human-readable message from a `catch_unwind` payload, falling
/// back to a generic reason for non-string panic values.
fn panic_reason(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".to_string()
    }
}

pub struct FollowerHandle {
    join: tokio::task::JoinHandle<()>,
}

impl FollowerHandle {
    /// Bounded join (spec §5: "~1s"); an orphaned worker past the bound is
    /// acceptable because the process is exiting.
    pub async fn close(self) {
        if tokio::time::timeout(Duration::from_secs(1), self.join)
            .await
            .is_err()
        {
            tracing::warn!("follower did not stop within the shutdown grace period; abandoning");
        }
    }
}

struct OpenFile {
    file: Option<std::fs::File>,
}

/// Runs a blocking closure on the blocking thread pool (spec §5: file reads
/// and stats are short, OS-bound suspension points).
async fn blocking<F, T>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking file task panicked")
}

/// Like [`blocking`], but for operations on an owned `File` that must be
/// handed back to the caller whether or not `op` succeeds — losing the
/// handle on a transient stat/seek error would otherwise strand the
/// Follower with no file to read from.
async fn blocking_fallible<T>(
    mut file: std::fs::File,
    op: impl FnOnce(&mut std::fs::File) -> std::io::Result<T> + Send + 'static,
) -> (std::fs::File, std::io::Result<T>)
where
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = op(&mut file);
        (file, result)
    })
    .await
    .expect("blocking file task panicked")
}

/// Newest-mtime glob candidate, ties broken by lexicographic path (spec
/// §4.4 step 1).
fn file_candidate(pattern: &str) -> Option<PathBuf> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = glob::glob(pattern)
        .ok()?
        .filter_map(Result::ok)
        .filter_map(|path| {
            std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .map(|mtime| (mtime, path))
        })
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    candidates.pop().map(|(_, path)| path)
}

/// Keeps retrying until a candidate opens successfully or shutdown fires.
/// Logs the failure once per outage (spec §4.4 step 2, §7 `FileOpenError`).
async fn open_with_retry(
    pattern: &str,
    name: &str,
    reopen_try_interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<OpenFile> {
    let mut limiter = RateLimiter::per_minute();
    let mut failing = false;

    loop {
        if *shutdown.borrow() {
            return None;
        }

        let pattern_owned = pattern.to_string();
        let candidate = blocking(move || Ok(file_candidate(&pattern_owned)))
            .await
            .ok()
            .flatten();

        if let Some(path) = candidate {
            let open_path = path.clone();
            let opened = blocking(move || std::fs::File::open(&open_path)).await;
            match opened {
                Ok(file) => {
                    if failing {
                        tracing::info!(name = %name, path = %path.display(), "log file opened after previous failure");
                    }
                    limiter.reset();
                    return Some(OpenFile { file: Some(file) });
                }
                Err(_) => {
                    failing = true;
                }
            }
        } else {
            failing = true;
        }

        if limiter.allow() {
            tracing::info!(name = %name, pattern = %pattern, "no matching log file; retrying");
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => return None,
            _ = tokio::time::sleep(reopen_try_interval) => {}
        }
    }
}

/// Samples the open handle's mtime twice around a stat of the newest glob
/// candidate; unchanged handle mtime with a differing candidate mtime means
/// the tailed path now points at a different inode (spec §4.4 step "rename
/// detection").
async fn detect_rotation(open: &OpenFile, pattern: &str) -> bool {
    let pattern = pattern.to_string();
    let file = open.file.as_ref();
    let handle_mtime_before = file.and_then(|f| f.metadata().ok()).and_then(|m| m.modified().ok());

    let candidate = blocking(move || Ok(file_candidate(&pattern))).await.ok().flatten();
    let Some(candidate) = candidate else {
        return false;
    };
    let candidate_mtime = std::fs::metadata(&candidate).ok().and_then(|m| m.modified().ok());

    let handle_mtime_after = open
        .file
        .as_ref()
        .and_then(|f| f.metadata().ok())
        .and_then(|m| m.modified().ok());

    match (handle_mtime_before, handle_mtime_after, candidate_mtime) {
        (Some(t1), Some(t2), Some(tc)) => t1 == t2 && t1 != tc,
        _ => false,
    }
}

/// If the current position is past end-of-file (external truncation), seeks
/// back to the new end so reads resume from there rather than erroring
/// (spec §4.4 truncation check, §8 invariant 5).
async fn recover_from_truncation(open: &mut OpenFile) -> std::io::Result<()> {
    let file = open.file.take().expect("file present during truncation check");
    let (file, result) = blocking_fallible(file, |f| {
        let position = f.stream_position()?;
        let file_size = f.seek(SeekFrom::End(0))?;
        let target = position.min(file_size);
        f.seek(SeekFrom::Start(target))?;
        Ok(())
    })
    .await;
    open.file = Some(file);
    result
}
