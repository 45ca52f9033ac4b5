//! Marker-framed command execution over an interactive shell stream.
//!
//! An interactive shell gives back one unstructured byte stream: no command
//! boundaries, no exit codes. [`MarkerShell`] recovers both by appending
//! `; echo "<marker>:$?"` to every command, where `<marker>` is a short
//! random string unlikely to collide with real output. Everything that
//! arrives before the marker line is the command's output; the digits after
//! the marker are its exit code.
//!
//! The echoed input line also contains the marker text, but followed by the
//! literal `$?` rather than digits, so the scanner cannot match on it.
//!
//! Reads are event-driven: the buffer is scanned each time bytes arrive on
//! the stream, with the deadline bounding every read. No polling interval.
//!
//! The transport is generic over `AsyncRead + AsyncWrite`, so tests drive
//! the exact production code path through `tokio::io::duplex`.

use crate::{ExecError, ExecResult, timeout_result};
use opsgate_core::ExecutionResult;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed prefix of generated markers.
const MARKER_PREFIX: &str = "OG";

/// Random characters after the prefix.
const MARKER_RANDOM_LEN: usize = 8;

/// Read chunk size.
const READ_CHUNK: usize = 4096;

/// One interactive shell stream with marker framing.
///
/// Holds leftover bytes that arrived after a previous command's marker, so
/// a chatty shell does not bleed one command's tail into the next. Callers
/// needing concurrency must serialize access externally (the remote backend
/// wraps this in a `tokio::sync::Mutex`): interleaved writes would corrupt
/// markers and output across commands.
#[derive(Debug)]
pub struct MarkerShell<S> {
    stream: S,
    residual: Vec<u8>,
}

impl<S> MarkerShell<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established shell stream.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            residual: Vec::new(),
        }
    }

    /// Run one command and recover its output and exit code.
    ///
    /// On deadline expiry the partial buffer comes back as a structured
    /// timeout result; the remote process is *not* killed and may still be
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Connection`] when the stream closes or fails;
    /// the session is unusable afterwards.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> ExecResult<ExecutionResult> {
        let marker = generate_marker();
        let framed = format!("{command}; echo \"{marker}:$?\"\n");

        self.stream
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| ExecError::Connection(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ExecError::Connection(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut buffer = std::mem::take(&mut self.residual);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(split) = split_at_marker(&buffer, &marker) {
                self.residual = split.rest;
                tracing::debug!(exit_code = split.exit_code, "marker observed");
                return Ok(ExecutionResult {
                    stdout: extract_stdout(&split.before, &framed),
                    stderr: String::new(),
                    exit_code: split.exit_code,
                });
            }

            match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Err(_elapsed) => {
                    tracing::warn!("marker not observed before deadline");
                    let partial = String::from_utf8_lossy(&buffer).to_string();
                    return Ok(timeout_result(partial, timeout));
                },
                Ok(Ok(0)) => {
                    return Err(ExecError::Connection("shell channel closed".to_string()));
                },
                Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(ExecError::Connection(e.to_string())),
            }
        }
    }
}

/// Generate a marker unlikely to collide with command output.
fn generate_marker() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MARKER_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{MARKER_PREFIX}{random}")
}

/// The buffer split around a matched marker line.
struct MarkerSplit {
    /// Bytes strictly before the marker line.
    before: Vec<u8>,
    /// Exit code parsed from the digits after the marker.
    exit_code: i32,
    /// Bytes after the marker line, kept for the next command.
    rest: Vec<u8>,
}

/// Find `<marker>:<digits>` terminated by a line ending.
///
/// The echoed input contains `<marker>:$?`, which the digit requirement
/// rejects, so only the shell's substituted output matches.
fn split_at_marker(buffer: &[u8], marker: &str) -> Option<MarkerSplit> {
    let needle = format!("{marker}:");
    let needle = needle.as_bytes();

    let mut from = 0;
    while let Some(found) = find_subslice(&buffer[from..], needle) {
        let pos = from.saturating_add(found);
        let digits_start = pos.saturating_add(needle.len());
        let mut digits_end = digits_start;
        while digits_end < buffer.len() && buffer[digits_end].is_ascii_digit() {
            digits_end = digits_end.saturating_add(1);
        }

        let has_digits = digits_end > digits_start;
        let terminated = buffer
            .get(digits_end)
            .is_some_and(|b| *b == b'\n' || *b == b'\r');
        if has_digits && terminated {
            let digits = String::from_utf8_lossy(&buffer[digits_start..digits_end]);
            let exit_code = digits.parse().unwrap_or(-1);

            // Cut `before` at the start of the marker line.
            let line_start = buffer[..pos]
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |p| p.saturating_add(1));

            // Skip the line ending after the digits.
            let mut rest_start = digits_end;
            while buffer
                .get(rest_start)
                .is_some_and(|b| *b == b'\n' || *b == b'\r')
            {
                rest_start = rest_start.saturating_add(1);
            }

            return Some(MarkerSplit {
                before: buffer[..line_start].to_vec(),
                exit_code,
                rest: buffer[rest_start..].to_vec(),
            });
        }

        from = pos.saturating_add(1);
    }
    None
}

/// First index of `needle` within `haystack`.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Turn the pre-marker bytes into the command's stdout.
///
/// Interactive shells echo input back; when the first line is the echoed
/// framed command it is dropped. The trailing newline is trimmed.
fn extract_stdout(before: &[u8], framed: &str) -> String {
    let text = String::from_utf8_lossy(before);
    let framed = framed.trim_end();

    let mut lines = text.split('\n');
    let first = lines.next().unwrap_or_default();
    let stdout = if first.trim_end_matches('\r').ends_with(framed) {
        lines.collect::<Vec<_>>().join("\n")
    } else {
        text.to_string()
    };
    stdout.trim_end_matches(['\n', '\r']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    /// Extract the marker out of a framed command line the fake shell read.
    fn marker_of(line: &str) -> String {
        let start = line.rfind("echo \"").unwrap() + "echo \"".len();
        let end = line.rfind(":$?\"").unwrap();
        line[start..end].to_string()
    }

    /// Spawn a scripted fake shell on the far end of a duplex pipe.
    ///
    /// For each received framed line, `respond` produces what the shell
    /// writes back (given the echoed line and its marker).
    fn fake_shell(
        far: DuplexStream,
        respond: impl Fn(&str, &str) -> String + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(far);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let marker = marker_of(&line);
                let reply = respond(&line, &marker);
                write_half.write_all(reply.as_bytes()).await.unwrap();
                write_half.flush().await.unwrap();
            }
        })
    }

    #[tokio::test]
    async fn test_execute_recovers_stdout_and_exit_code() {
        let (near, far) = tokio::io::duplex(4096);
        let _shell = fake_shell(far, |_line, marker| format!("hi\n{marker}:0\n"));

        let mut shell = MarkerShell::new(near);
        let result = shell
            .execute("echo hi", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.stdout, "hi");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execute_strips_echoed_input_line() {
        let (near, far) = tokio::io::duplex(4096);
        // A pty echoes the input back before the output.
        let _shell = fake_shell(far, |line, marker| format!("{line}\r\nhi\n{marker}:0\n"));

        let mut shell = MarkerShell::new(near);
        let result = shell
            .execute("echo hi", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.stdout, "hi");
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit_code() {
        let (near, far) = tokio::io::duplex(4096);
        let _shell = fake_shell(far, |_line, marker| {
            format!("No resources found\n{marker}:1\n")
        });

        let mut shell = MarkerShell::new(near);
        let result = shell
            .execute("kubectl get pods -n absent", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.stdout, "No resources found");
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_execute_timeout_returns_partial_buffer() {
        let (near, far) = tokio::io::duplex(4096);
        // The shell produces some output but never the marker.
        let _shell = fake_shell(far, |_line, _marker| "partial output\n".to_string());

        let mut shell = MarkerShell::new(near);
        let result = shell
            .execute("tail -f /var/log/syslog", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(result.exit_code, crate::TIMEOUT_EXIT_CODE);
        assert!(result.stdout.contains("partial output"));
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_execute_closed_stream_is_connection_error() {
        let (near, far) = tokio::io::duplex(4096);
        drop(far);

        let mut shell = MarkerShell::new(near);
        let err = shell.execute("echo hi", Duration::from_secs(1)).await;
        assert!(matches!(err, Err(ExecError::Connection(_))));
    }

    #[tokio::test]
    async fn test_consecutive_commands_do_not_bleed() {
        let (near, far) = tokio::io::duplex(4096);
        // The shell appends a stray prompt after every marker line.
        let _shell = fake_shell(far, |_line, marker| format!("out\n{marker}:0\n$ "));

        let mut shell = MarkerShell::new(near);
        let first = shell
            .execute("echo out", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.stdout, "out");

        let second = shell
            .execute("echo out", Duration::from_secs(1))
            .await
            .unwrap();
        // The stray "$ " from the previous exchange stays out of stdout's
        // tail and the exit code still parses.
        assert_eq!(second.exit_code, 0);
        assert!(second.stdout.ends_with("out"));
    }

    #[test]
    fn test_marker_shape() {
        let marker = generate_marker();
        assert!(marker.starts_with(MARKER_PREFIX));
        assert_eq!(marker.len(), MARKER_PREFIX.len() + MARKER_RANDOM_LEN);
        assert_ne!(marker, generate_marker());
    }

    #[test]
    fn test_split_ignores_marker_without_digits() {
        // The echoed command carries `<marker>:$?` — not a match.
        let buffer = b"echo hi; echo \"OGabcd1234:$?\"\nhi\nOGabcd1234:0\n";
        let split = split_at_marker(buffer, "OGabcd1234").unwrap();
        assert_eq!(split.exit_code, 0);
        assert_eq!(split.before, b"echo hi; echo \"OGabcd1234:$?\"\nhi\n");
        assert!(split.rest.is_empty());
    }

    #[test]
    fn test_split_requires_line_terminator() {
        // Digits still streaming in: no match until the newline arrives.
        assert!(split_at_marker(b"hi\nOGabcd1234:1", "OGabcd1234").is_none());
        assert!(split_at_marker(b"hi\nOGabcd1234:12\n", "OGabcd1234").is_some());
    }

    #[test]
    fn test_split_keeps_rest_for_next_command() {
        let buffer = b"out\nOGabcd1234:0\n$ leftover";
        let split = split_at_marker(buffer, "OGabcd1234").unwrap();
        assert_eq!(split.rest, b"$ leftover");
    }
}
