//! Turns an attached container stream into a request/response
//! JSON-lines channel with deadlines.

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::docker::codec::decode_frames;

/// Error surfaced by the Line Reader when a read can't complete.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("timed out waiting for a line")]
    Timeout,
    #[error("peer closed the connection")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Residue buffers carried across reads on a session's stream: partial
/// Docker frame bytes, and partial decoded text not yet terminated by `\n`.
#[derive(Debug, Default)]
pub struct ReadResidue {
    pub raw_bytes: Vec<u8>,
    pub text: String,
}

const POLL_SLICE: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 4096;

/// Read one JSON-syntactically-valid line from `reader`, blocking for at
/// most `deadline` from now. Partial state survives in `residue` across
/// calls. Empty lines are skipped silently.
pub async fn read_json_line<R>(
    reader: &mut R,
    residue: &mut ReadResidue,
    deadline: Duration,
) -> Result<String, ReadError>
where
    R: AsyncRead + Unpin,
{
    let start = Instant::now();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        if let Some(line) = take_line(&mut residue.text) {
            return Ok(line);
        }

        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return Err(ReadError::Timeout);
        }
        let remaining = deadline - elapsed;
        let slice = remaining.min(POLL_SLICE);

        match tokio::time::timeout(slice, reader.read(&mut buf)).await {
            Ok(Ok(0)) => return Err(ReadError::Closed),
            Ok(Ok(n)) => {
                residue.raw_bytes.extend_from_slice(&buf[..n]);
                let (decoded, consumed) = decode_frames(&residue.raw_bytes);
                residue.raw_bytes.drain(..consumed);
                residue.text.push_str(&decoded);
            }
            Ok(Err(e)) => return Err(ReadError::Io(e)),
            Err(_elapsed) => {
                // This 1s slice ran out; loop back around and re-check the
                // overall deadline so cancellation stays responsive.
            }
        }
    }
}

/// Pull one `\n`-terminated, non-empty, trimmed line out of `text` if one
/// is present, salvaging a garbage-prefixed JSON object where possible.
fn take_line(text: &mut String) -> Option<String> {
    loop {
        let newline_pos = text.find('\n')?;
        let line = text[..newline_pos].trim().to_string();
        text.drain(..=newline_pos);

        if line.is_empty() {
            continue;
        }

        return Some(salvage_json_line(line));
    }
}

/// If `line` doesn't parse as JSON outright, try the substring starting at
/// the first `{` (one salvage attempt for a garbage-prefixed line).
fn salvage_json_line(line: String) -> String {
    if serde_json::from_str::<Value>(&line).is_ok() {
        return line;
    }

    if let Some(start) = line.find('{') {
        let candidate = &line[start..];
        if serde_json::from_str::<Value>(candidate).is_ok() {
            return candidate.to_string();
        }
    }

    line
}

/// Per-session bidirectional attach stream, abstracted so the codec and
/// line reader stay unit-testable without a live Docker daemon.
pub struct AttachedStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub residue: ReadResidue,
}

impl AttachedStream {
    pub fn new(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Self { reader, writer, residue: ReadResidue::default() }
    }
}

/// Send one command object, read back exactly one response object.
/// Errors never propagate to the caller — they're synthesised as
/// `{"status":"error","message":...}` so the session manager decides
/// how to react.
pub async fn send_command(
    stream: &mut AttachedStream,
    command: &Value,
    timeout: Duration,
) -> Value {
    match send_command_inner(stream, command, timeout).await {
        Ok(response) => response,
        Err(message) => serde_json::json!({ "status": "error", "message": message }),
    }
}

async fn send_command_inner(
    stream: &mut AttachedStream,
    command: &Value,
    timeout: Duration,
) -> Result<Value, String> {
    let mut payload = serde_json::to_string(command).map_err(|e| e.to_string())?;
    payload.push('\n');

    stream
        .writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| format!("write failed: {e}"))?;
    stream.writer.flush().await.map_err(|e| format!("flush failed: {e}"))?;

    let line = read_json_line(&mut stream.reader, &mut stream.residue, timeout)
        .await
        .map_err(|e| format!("{e}"))?;

    serde_json::from_str(&line).map_err(|e| format!("invalid JSON from worker: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A scripted `AsyncRead` double that yields chunks one at a time, for
    /// exercising the Line Reader without Docker. Once `chunks` is
    /// exhausted it either reports EOF (zero bytes) or, if constructed
    /// with `new_stalling`, stays genuinely `Pending` forever — a stand-in
    /// for a peer that's still connected but has nothing more to say,
    /// needed to exercise the deadline path rather than the EOF path.
    struct ScriptedReader {
        chunks: std::collections::VecDeque<Vec<u8>>,
        stall_on_exhaustion: bool,
    }

    impl ScriptedReader {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self { chunks: chunks.into_iter().collect(), stall_on_exhaustion: false }
        }

        fn new_stalling(chunks: Vec<Vec<u8>>) -> Self {
            Self { chunks: chunks.into_iter().collect(), stall_on_exhaustion: true }
        }
    }

    impl AsyncRead for ScriptedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf.put_slice(&chunk);
                    Poll::Ready(Ok(()))
                }
                None if self.stall_on_exhaustion => Poll::Pending,
                None => Poll::Ready(Ok(())), // EOF: zero bytes
            }
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut f = vec![1, 0, 0, 0];
        f.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    #[tokio::test]
    async fn reads_one_line_split_across_frames() {
        let mut reader = ScriptedReader::new(vec![
            frame(b"{\"status\":"),
            frame(b"\"ok\"}\n"),
        ]);
        let mut residue = ReadResidue::default();

        let line = read_json_line(&mut reader, &mut residue, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn skips_empty_lines() {
        let mut reader = ScriptedReader::new(vec![frame(b"\n\n{\"status\":\"ok\"}\n")]);
        let mut residue = ReadResidue::default();

        let line = read_json_line(&mut reader, &mut residue, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn salvages_garbage_prefixed_json() {
        let mut reader = ScriptedReader::new(vec![frame(b"garbage{\"status\":\"ok\"}\n")]);
        let mut residue = ReadResidue::default();

        let line = read_json_line(&mut reader, &mut residue, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn times_out_without_a_newline() {
        let mut reader = ScriptedReader::new_stalling(vec![frame(b"{\"no_newline\": true}")]);
        let mut residue = ReadResidue::default();

        let result = read_json_line(&mut reader, &mut residue, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ReadError::Timeout)));
    }

    #[tokio::test]
    async fn closed_on_eof_before_a_line_completes() {
        let mut reader = ScriptedReader::new(vec![]);
        let mut residue = ReadResidue::default();

        let result = read_json_line(&mut reader, &mut residue, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ReadError::Closed)));
    }
}
