//! Server-Sent Events line parser for streamed completions.
//!
//! Buffers raw bytes, splits on `\n`, and yields the payload of each `data:`
//! line. `[DONE]` ends the stream. A transport error mid-stream is surfaced as
//! a single [`CompletionError::StreamInterrupted`] item, after which the
//! stream ends.

use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use spark_core::CompletionError;
use tokio_stream::StreamExt;
use tracing::warn;

enum Extracted {
    Data(String),
    Done,
    Skip,
}

/// Parse SSE lines from a byte stream and yield raw `data:` payloads.
pub fn parse_sse_lines<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, CompletionError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), false),
        |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        continue;
                    };

                    match extract_sse_data(line) {
                        Extracted::Data(data) => return Some((Ok(data), (stream, buffer, false))),
                        Extracted::Done => return None,
                        Extracted::Skip => continue,
                    }
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        warn!("SSE stream read error: {e}");
                        let err = CompletionError::StreamInterrupted(e.to_string());
                        return Some((Err(err), (stream, buffer, true)));
                    }
                    None => {
                        // Trailing line without a newline terminator
                        if buffer.is_empty() {
                            return None;
                        }
                        let Ok(line) = std::str::from_utf8(&buffer) else {
                            return None;
                        };
                        if let Extracted::Data(data) = extract_sse_data(line) {
                            buffer.clear();
                            return Some((Ok(data), (stream, buffer, true)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

fn extract_sse_data(line: &str) -> Extracted {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Extracted::Skip;
    }

    let Some(data) = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))
    else {
        return Extracted::Skip;
    };

    match data.trim() {
        "" => Extracted::Skip,
        "[DONE]" => Extracted::Done,
        data => Extracted::Data(data.to_owned()),
    }
}
