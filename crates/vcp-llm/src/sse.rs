//! SSE line parsing for OpenAI-style streams.
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{},"finish_reason":"stop"}]}
//!
//! data: [DONE]
//! ```

use crate::error::{ProviderError, Result};
use crate::types::{StreamChunk, StreamDelta};

const DONE_SENTINEL: &str = "[DONE]";

/// Decode one SSE line into zero or more chunks.
///
/// Blank lines, comments and non-`data:` fields produce nothing.
pub fn parse_sse_line(line: &str) -> Result<Vec<StreamChunk>> {
    let line = line.trim_end();
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return Ok(vec![]);
    };
    if payload.is_empty() {
        return Ok(vec![]);
    }
    if payload == DONE_SENTINEL {
        return Ok(vec![StreamChunk::Done {
            finish_reason: None,
        }]);
    }

    let delta: StreamDelta = serde_json::from_str(payload)
        .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse SSE delta: {e}")))?;

    let mut chunks = Vec::new();
    if let Some(choice) = delta.choices.first() {
        if let Some(text) = &choice.delta.content
            && !text.is_empty()
        {
            chunks.push(StreamChunk::TextDelta { text: text.clone() });
        }
        if choice.finish_reason.is_some() {
            chunks.push(StreamChunk::Done {
                finish_reason: choice.finish_reason.clone(),
            });
        }
    }
    Ok(chunks)
}

/// Accumulates raw bytes and yields complete lines.
///
/// Bytes are buffered undecoded so a multi-byte character split across
/// network reads is not mangled.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).take(pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left after the stream ended without a final newline.
    pub fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        (!rest.trim().is_empty()).then_some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta() {
        let chunks =
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#)
                .unwrap();
        assert_eq!(chunks, vec![StreamChunk::TextDelta { text: "Hi".into() }]);
    }

    #[test]
    fn finish_reason_emits_done() {
        let chunks =
            parse_sse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(
            chunks,
            vec![StreamChunk::Done {
                finish_reason: Some("stop".into())
            }]
        );
    }

    #[test]
    fn done_sentinel() {
        let chunks = parse_sse_line("data: [DONE]").unwrap();
        assert_eq!(chunks, vec![StreamChunk::Done { finish_reason: None }]);
    }

    #[test]
    fn ignores_non_data_lines() {
        assert!(parse_sse_line("").unwrap().is_empty());
        assert!(parse_sse_line(": keep-alive").unwrap().is_empty());
        assert!(parse_sse_line("event: message").unwrap().is_empty());
        assert!(parse_sse_line("data:").unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_invalid_response() {
        let err = parse_sse_line("data: {oops").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn line_buffer_splits_across_pushes() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"data: a").is_empty());
        assert_eq!(buf.push(b"bc\r\ndata: d\n\nda"), vec!["data: abc\r", "data: d", ""]);
        assert_eq!(buf.finish().as_deref(), Some("da"));
    }

    #[test]
    fn line_buffer_keeps_split_utf8() {
        let text = "data: 你好\n".as_bytes();
        let mut buf = LineBuffer::default();
        assert!(buf.push(&text[..8]).is_empty());
        assert_eq!(buf.push(&text[8..]), vec!["data: 你好"]);
    }

    #[test]
    fn line_buffer_finish_ignores_whitespace() {
        let mut buf = LineBuffer::default();
        buf.push(b"x\n  ");
        assert_eq!(buf.finish(), None);
    }
}
