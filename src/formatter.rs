//! Pure line -> frame mapping (spec §4.1). Two built-ins: `plain` and
//! `syslog`. Both split on embedded `\n`, drop empty segments, and emit one
//! frame per non-empty segment.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;

use crate::types::Line;

/// Formats a log line (possibly containing embedded newlines) into zero or
/// more wire-ready frames. Implementations must be pure and reentrant:
/// `format` is called from a Follower's single-threaded read loop and must
/// not block or hold state across calls beyond what's captured at
/// construction time.
pub trait Formatter: Send + Sync {
    fn format(&self, line: &Line) -> Vec<Bytes>;
}

/// Splits `input` on `\n`, dropping segments that are empty after the
/// split. Shared by both built-in formatters.
fn non_empty_segments(input: &str) -> impl Iterator<Item = &str> {
    input.split('\n').filter(|segment| !segment.is_empty())
}

/// Prepends `token` to each non-empty segment of the input, one frame per
/// segment, each terminated with `\n`.
#[derive(Clone, Debug)]
pub struct PlainFormatter {
    token: String,
}

impl PlainFormatter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Formatter for PlainFormatter {
    fn format(&self, line: &Line) -> Vec<Bytes> {
        non_empty_segments(line)
            .map(|segment| {
                let mut buf = BytesMut::with_capacity(self.token.len() + segment.len() + 1);
                buf.put_slice(self.token.as_bytes());
                buf.put_slice(segment.as_bytes());
                buf.put_u8(b'\n');
                buf.freeze()
            })
            .collect()
    }
}

/// RFC 5424-shaped syslog framing (spec §4.1, §6). Facility 1 (user),
/// severity 6 (info) -> priority value 14, version `1`. Timestamp is
/// current UTC at format time with microsecond precision, `T` separator,
/// trailing `Z`.
#[derive(Clone, Debug)]
pub struct SyslogFormatter {
    token: String,
    hostname: String,
    appname: String,
    msgid: String,
}

impl SyslogFormatter {
    pub fn new(token: impl Into<String>, hostname: impl Into<String>, appname: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            hostname: hostname.into(),
            appname: appname.into(),
            msgid: "-".to_string(),
        }
    }

    pub fn with_msgid(mut self, msgid: impl Into<String>) -> Self {
        self.msgid = msgid.into();
        self
    }
}

impl Formatter for SyslogFormatter {
    fn format(&self, line: &Line) -> Vec<Bytes> {
        non_empty_segments(line)
            .map(|segment| {
                let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f");
                let rendered = format!(
                    "{token}<14>1 {timestamp}Z {hostname} {appname} - {msgid} - hostname={hostname} appname={appname} {segment}\n",
                    token = self.token,
                    timestamp = timestamp,
                    hostname = self.hostname,
                    appname = self.appname,
                    msgid = self.msgid,
                    segment = segment,
                );
                Bytes::from(rendered)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_prepends_token_and_empty_input_yields_nothing() {
        let formatter = PlainFormatter::new("TOK-");
        let frames = formatter.format(&"hello".to_string());
        assert_eq!(frames, vec![Bytes::from_static(b"TOK-hello\n")]);

        assert!(formatter.format(&String::new()).is_empty());
    }

    #[test]
    fn plain_splits_multiline_and_drops_empty_segments() {
        let formatter = PlainFormatter::new("T");
        let frames = formatter.format(&"a\n\nb".to_string());
        assert_eq!(
            frames,
            vec![Bytes::from_static(b"Ta\n"), Bytes::from_static(b"Tb\n")]
        );
    }

    #[test]
    fn syslog_frame_has_expected_shape() {
        let formatter = SyslogFormatter::new("T", "H", "A");
        let frames = formatter.format(&"hello world".to_string());
        assert_eq!(frames.len(), 1);
        let rendered = String::from_utf8(frames[0].to_vec()).unwrap();
        assert!(rendered.starts_with("T<14>1 "));
        assert!(rendered.contains(" H A - - - hostname=H appname=A hello world\n"));
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn syslog_multiline_emits_one_frame_per_segment_with_nondecreasing_timestamps() {
        let formatter = SyslogFormatter::new("T", "H", "A");
        let frames = formatter.format(&"x\n\ny".to_string());
        assert_eq!(frames.len(), 2);
        let extract_ts = |frame: &Bytes| -> String {
            let text = String::from_utf8(frame.to_vec()).unwrap();
            text.split(' ').nth(1).unwrap().to_string()
        };
        let ts1 = extract_ts(&frames[0]);
        let ts2 = extract_ts(&frames[1]);
        assert!(ts1 <= ts2);
    }
}
