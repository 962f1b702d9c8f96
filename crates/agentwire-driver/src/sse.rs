//! Generic SSE (Server-Sent Events) line parser.
//!
//! Converts any byte stream into a `Stream<Item = SseEvent>`, then decodes
//! each event's data as a [`RawStreamEvent`].

use std::fmt::Display;
use std::pin::Pin;

use agentwire_core::raw::RawStreamEvent;
use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::trace;

use crate::RawEventStream;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse a byte stream as an SSE stream.
pub fn parse_sse_stream<S, E>(byte_stream: S) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + 'static,
{
    let byte_stream = byte_stream.map(|chunk| chunk.map_err(|e| anyhow::anyhow!("SSE stream error: {e}")));

    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: Vec::new(),
            current: Pending::default(),
        },
        |mut state| async move {
            loop {
                // Lines are split on raw bytes so multi-byte characters
                // spanning chunk boundaries survive.
                if let Some(newline_pos) = state.buffer.iter().position(|b| *b == b'\n') {
                    let raw_line: Vec<u8> = state.buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&raw_line);
                    let line = line.trim_end_matches(['\n', '\r']);

                    if line.is_empty() {
                        if let Some(event) = state.current.dispatch() {
                            return Some((Ok(event), state));
                        }
                        continue;
                    }
                    state.current.feed(line);
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => {
                        // Stream ended. Flush an unterminated last line, then
                        // dispatch any remaining data.
                        if !state.buffer.is_empty() {
                            let rest = std::mem::take(&mut state.buffer);
                            let line = String::from_utf8_lossy(&rest);
                            state.current.feed(line.trim_end_matches('\r'));
                        }
                        return state.current.dispatch().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

/// Decode SSE events whose `data` field carries one raw event as JSON.
pub fn decode_sse_events<S>(sse: S) -> RawEventStream
where
    S: Stream<Item = anyhow::Result<SseEvent>> + Send + 'static,
{
    Box::pin(sse.map(|item| {
        let event = item?;
        trace!(event = ?event.event, "Decoding SSE event");
        serde_json::from_str::<RawStreamEvent>(&event.data)
            .map_err(|e| anyhow::anyhow!("Invalid raw event in SSE data: {e}"))
    }))
}

/// Parse and decode in one step.
pub fn raw_events_from_sse<S, E>(byte_stream: S) -> RawEventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + 'static,
{
    decode_sse_events(parse_sse_stream(byte_stream))
}

#[derive(Default)]
struct Pending {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl Pending {
    fn feed(&mut self, line: &str) {
        if line.starts_with(':') {
            // Comment, skip
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // Ignore unknown fields
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        })
    }
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    current: Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let owned: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from(p.to_string()))).collect();
        futures::stream::iter(owned)
    }

    async fn collect(parts: &[&str]) -> Vec<SseEvent> {
        parse_sse_stream(chunks(parts))
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_fields_comments_and_multiline_data() {
        let events = collect(&[
            ": keep-alive\n",
            "event: message_start\nid: 7\n",
            "data: line one\ndata: line two\n\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("message_start".into()),
                data: "line one\nline two".into(),
                id: Some("7".into()),
            }]
        );
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let events = collect(&["da", "ta: {\"a\"", ":1}\r\n", "\r\n", "data: x\n\n"]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, r#"{"a":1}"#);
        assert_eq!(events[1].data, "x");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let bytes = "data: héllo\n\n".as_bytes();
        let (left, right) = bytes.split_at(8);
        let owned: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::copy_from_slice(left)), Ok(Bytes::copy_from_slice(right))];
        let events: Vec<SseEvent> = parse_sse_stream(futures::stream::iter(owned))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(events[0].data, "héllo");
    }

    #[tokio::test]
    async fn test_trailing_event_at_eof() {
        let events = collect(&["event: ping\ndata: {}\n\n", "data: last"]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "last");
        assert!(events[1].event.is_none());
    }

    #[tokio::test]
    async fn test_event_without_data_is_not_dispatched() {
        let events = collect(&["event: ping\n\n", "data: real\n\n"]).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].event.is_none());
    }

    #[tokio::test]
    async fn test_decode_raw_events() {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"m1\",\"model\":\"x\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let decoded: Vec<_> = raw_events_from_sse(chunks(&[body])).collect().await;
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].as_ref().unwrap().type_name(), "message_start");
        assert_eq!(decoded[1].as_ref().unwrap().type_name(), "message_stop");
    }

    #[tokio::test]
    async fn test_decode_reports_bad_json() {
        let decoded: Vec<_> = raw_events_from_sse(chunks(&["data: not json\n\n"])).collect().await;
        assert!(decoded[0].is_err());
    }
}
