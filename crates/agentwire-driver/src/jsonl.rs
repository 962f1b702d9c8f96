//! JSON-lines decoding: one raw event per line.

use agentwire_core::raw::RawStreamEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::RawEventStream;

/// Decode one line. Blank lines and `#` comments yield `None`.
pub fn parse_json_line(line: &str) -> anyhow::Result<Option<RawStreamEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| anyhow::anyhow!("Invalid raw event line: {e}"))
}

/// Decode a whole JSON-lines document, stopping at the first bad line.
pub fn parse_json_lines(text: &str) -> anyhow::Result<Vec<RawStreamEvent>> {
    let mut events = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let parsed = parse_json_line(line).map_err(|e| e.context(format!("line {}", number + 1)))?;
        events.extend(parsed);
    }
    Ok(events)
}

/// Stream raw events from an async reader, one per line.
pub fn json_lines_stream<R>(reader: R) -> RawEventStream
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    Box::pin(futures::stream::unfold(reader.lines(), |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_json_line(&line) {
                    Ok(Some(event)) => return Some((Ok(event), lines)),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), lines)),
                },
                Ok(None) => return None,
                Err(e) => return Some((Err(anyhow::anyhow!("Read error: {e}")), lines)),
            }
        }
    }))
}
