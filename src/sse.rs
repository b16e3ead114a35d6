//! Server-Sent Events (SSE) frame parsing.
//!
//! This module turns the raw byte stream of an `text/event-stream` response
//! into [`SseFrame`]s.  It knows nothing about the payloads; decoding them is
//! up to the caller.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::{Error, Result};

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field, if present.
    pub event: Option<String>,
    /// The `data:` lines, joined with newlines.
    pub data: String,
    /// Value of the `id:` field, if present.
    pub id: Option<String>,
}

impl SseFrame {
    /// Returns the event name, defaulting to `message` as browsers do.
    pub fn name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Process a stream of bytes into a stream of server-sent event frames.
///
/// Comment lines and frames without any field are dropped.  `\r\n` line
/// endings are accepted, and multi-byte characters may be split across
/// chunks.
///
/// ```
/// use bytes::Bytes;
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
///     Ok(Bytes::from_static(b": keep-alive\nevent: new_message\nda")),
///     Ok(Bytes::from_static(b"ta: {}\n\n")),
/// ];
/// let frames: Vec<_> = yatri::sse::process_sse(futures::stream::iter(chunks))
///     .collect()
///     .await;
/// assert_eq!(frames.len(), 1);
/// let frame = frames[0].as_ref().unwrap();
/// assert_eq!(frame.name(), "new_message");
/// assert_eq!(frame.data, "{}");
/// # });
/// ```
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseFrame>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, String::new(), Vec::new()),
        move |(mut stream, mut buffer, mut partial)| async move {
            loop {
                while let Some((frame, remaining)) = extract_frame(&buffer) {
                    buffer = remaining;
                    if let Some(frame) = frame {
                        return Some((Ok(frame), (stream, buffer, partial)));
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        partial.extend_from_slice(&bytes);
                        match decode_utf8(&mut partial) {
                            Ok(text) => push_normalized(&mut buffer, &text),
                            Err(e) => return Some((Err(e), (stream, buffer, partial))),
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, partial)));
                    }
                    None => {
                        // A final frame may lack its blank-line terminator.
                        if !buffer.trim().is_empty() {
                            let frame = parse_frame(&buffer);
                            buffer.clear();
                            if let Some(frame) = frame {
                                return Some((Ok(frame), (stream, buffer, partial)));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Take the longest valid UTF-8 prefix of `partial`, leaving an incomplete
/// trailing character in place.
fn decode_utf8(partial: &mut Vec<u8>) -> Result<String> {
    match std::str::from_utf8(partial) {
        Ok(text) => {
            let text = text.to_string();
            partial.clear();
            Ok(text)
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&partial[..valid]).into_owned();
            partial.drain(..valid);
            Ok(text)
        }
        Err(e) => {
            partial.clear();
            Err(Error::encoding(
                format!("Invalid UTF-8 in stream: {e}"),
                Some(Box::new(e)),
            ))
        }
    }
}

fn push_normalized(buffer: &mut String, text: &str) {
    buffer.push_str(text);
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }
}

/// Extract one blank-line-delimited frame from `buffer`.
///
/// The inner option is `None` for frames that carry nothing to dispatch.
fn extract_frame(buffer: &str) -> Option<(Option<SseFrame>, String)> {
    let (frame_text, rest) = buffer.split_once("\n\n")?;
    Some((parse_frame(frame_text), rest.to_string()))
}

fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => frame.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            "id" => frame.id = Some(value.to_string()),
            _ => {}
        }
    }
    if frame.event.is_none() && data_lines.is_empty() {
        return None;
    }
    frame.data = data_lines.join("\n");
    Some(frame)
}
