//! SSE (Server-Sent Events) framing for provider streams.
//!
//! Both providers stream `text/event-stream` bodies. This module only deals
//! with framing: splitting the byte stream into lines and classifying each
//! line. Payload decoding is provider-specific and lives with each adapter.
//!
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}
//!
//! data: [DONE]
//! ```

/// The sentinel value that marks the end of an OpenAI-style stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One classified SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// A non-empty `data:` payload.
    Data(&'a str),
    /// The `[DONE]` sentinel.
    Done,
    /// An `event:` name.
    Event(&'a str),
    /// Blank lines, comments, `id:`/`retry:` fields, empty payloads.
    Skip,
}

/// Classify a single SSE line.
pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    if let Some(rest) = line.strip_prefix("data:") {
        let payload = rest.trim();
        return match payload {
            "" => SseLine::Skip,
            DONE_SENTINEL => SseLine::Done,
            _ => SseLine::Data(payload),
        };
    }
    if let Some(rest) = line.strip_prefix("event:") {
        return SseLine::Event(rest.trim());
    }
    SseLine::Skip
}

/// Accumulates raw bytes and yields complete lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte UTF-8
/// character split across network chunks is decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every complete line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream ends, if anything.
    pub fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buf).into_owned();
        (!rest.trim().is_empty()).then_some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_line() {
        assert_eq!(parse_sse_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data:{\"a\":1}\r"), SseLine::Data("{\"a\":1}"));
    }

    #[test]
    fn done_sentinel() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
    }

    #[test]
    fn event_line() {
        assert_eq!(parse_sse_line("event: message_stop"), SseLine::Event("message_stop"));
    }

    #[test]
    fn skipped_lines() {
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("data:   "), SseLine::Skip);
        assert_eq!(parse_sse_line("id: 7"), SseLine::Skip);
    }

    #[test]
    fn buffer_splits_lines_across_pushes() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: hel").is_empty());
        let lines = buf.push(b"lo\n\ndata: wor");
        assert_eq!(lines, vec!["data: hello".to_string(), String::new()]);
        assert_eq!(buf.finish().as_deref(), Some("data: wor"));
    }

    #[test]
    fn buffer_keeps_split_utf8_intact() {
        let text = "data: héllo\n".as_bytes();
        // split inside the two-byte 'é'
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut buf = LineBuffer::new();
        assert!(buf.push(&text[..split]).is_empty());
        let lines = buf.push(&text[split..]);
        assert_eq!(lines, vec!["data: héllo".to_string()]);
    }

    #[test]
    fn finish_ignores_whitespace() {
        let mut buf = LineBuffer::new();
        buf.push(b"data: x\n  ");
        assert!(buf.finish().is_none());
    }
}
