//! Server-Sent-Events frame codec.
//!
//! Both provider families stream completions as SSE. This module turns a
//! raw byte stream into a pull-based stream of [`SseFrame`]s: a frame is
//! handed to the consumer before the next chunk is read from the socket,
//! so a slow consumer back-pressures the transport instead of buffering
//! unboundedly.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::error::ProviderError;

/// One parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` field, if the frame named one.
    pub event: Option<String>,
    /// The `data:` payload. Multi-line data is concatenated with `\n`.
    pub data: String,
}

/// A pull-based stream of SSE frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, ProviderError>> + Send>>;

struct SseState<S> {
    byte_stream: Pin<Box<S>>,
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
    done: bool,
}

/// Parse an SSE byte stream into frames.
///
/// Frames are delimited by a blank line. Only the `event:` and `data:`
/// fields are used; comment lines (leading `:`) and unknown fields are
/// ignored per the SSE spec.
pub fn parse_frames<S>(byte_stream: S) -> FrameStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            event: None,
            data_lines: Vec::new(),
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                // Drain complete lines already buffered.
                while let Some(line_end) = state.buffer.find('\n') {
                    let line = state.buffer[..line_end].trim_end_matches('\r').to_string();
                    state.buffer.drain(..=line_end);

                    if line.is_empty() {
                        // Blank line terminates the frame.
                        if !state.data_lines.is_empty() || state.event.is_some() {
                            let frame = SseFrame {
                                event: state.event.take(),
                                data: state.data_lines.join("\n"),
                            };
                            state.data_lines.clear();
                            return Some((Ok(frame), state));
                        }
                        continue;
                    }

                    if line.starts_with(':') {
                        continue;
                    }

                    if let Some(value) = field_value(&line, "event") {
                        state.event = Some(value.to_string());
                    } else if let Some(value) = field_value(&line, "data") {
                        state.data_lines.push(value.to_string());
                    }
                }

                // Need more bytes.
                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((
                            Err(ProviderError::transport(e.to_string(), false)),
                            state,
                        ));
                    }
                    None => {
                        state.done = true;
                        // Flush a trailing unterminated frame, if any.
                        if !state.data_lines.is_empty() {
                            let frame = SseFrame {
                                event: state.event.take(),
                                data: state.data_lines.join("\n"),
                            };
                            state.data_lines.clear();
                            return Some((Ok(frame), state));
                        }
                        return None;
                    }
                }
            }
        },
    ))
}

/// Extract the value of `<field>:` from a line, tolerating the optional
/// space after the colon.
fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
