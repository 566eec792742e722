//! Server-Sent Events decoding
//!
//! [`SseDecoder`] turns arbitrarily chunked bytes into logical lines.
//! [`parse_line`] classifies a line into its SSE field, and
//! [`decode_event_stream`] pipes a whole byte stream through a provider's
//! [`EventDecoder`](crate::provider::EventDecoder).

use std::collections::VecDeque;
use std::fmt::Display;

use futures::{Stream, StreamExt};
use memchr::memchr;

use crate::error::AgentError;
use crate::provider::{EventDecoder, EventStream, StreamEvent};

/// Splits a byte stream into lines, whatever the chunk boundaries.
///
/// Bytes are held until a `\n` arrives, so a UTF-8 sequence cut between two
/// chunks is decoded only once it is whole.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = memchr(b'\n', &self.buffer[start..]) {
            let end = start + pos;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Flush a final line that was never newline-terminated
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = decode_line(&self.buffer);
        self.buffer.clear();
        Some(line)
    }

    /// Bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// A classified SSE line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Empty line (event dispatch boundary)
    Blank,
    /// `: keep-alive` style comment
    Comment,
    /// `event: <name>`
    Event(&'a str),
    /// `data: <payload>`
    Data(&'a str),
    /// `id:` or `retry:` fields, which carry nothing we use
    Ignored,
    /// Anything else
    Unknown(&'a str),
}

/// Classify one SSE line. A single space after the colon is optional.
pub fn parse_line(line: &str) -> SseLine<'_> {
    if line.trim().is_empty() {
        return SseLine::Blank;
    }
    if line.starts_with(':') {
        return SseLine::Comment;
    }
    if let Some(payload) = field_value(line, "data") {
        return SseLine::Data(payload);
    }
    if let Some(name) = field_value(line, "event") {
        return SseLine::Event(name.trim());
    }
    if field_value(line, "id").is_some() || field_value(line, "retry").is_some() {
        return SseLine::Ignored;
    }
    SseLine::Unknown(line)
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

struct Pipeline<S> {
    bytes: std::pin::Pin<Box<S>>,
    lines: SseDecoder,
    decoder: Box<dyn EventDecoder>,
    pending: VecDeque<crate::error::Result<StreamEvent>>,
    finished: bool,
}

impl<S> Pipeline<S> {
    fn push_line(&mut self, line: &str) {
        if self.finished {
            return;
        }
        match self.decoder.decode_line(line) {
            Ok(events) => {
                for event in events {
                    let done = event == StreamEvent::Done;
                    self.pending.push_back(Ok(event));
                    if done {
                        self.finished = true;
                        return;
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, line, "skipping undecodable SSE line"),
        }
    }

    fn end_of_bytes(&mut self) {
        if let Some(line) = self.lines.finish() {
            self.push_line(&line);
        }
        if !self.finished {
            self.pending.extend(self.decoder.finish().into_iter().map(Ok));
            self.finished = true;
        }
    }
}

/// Decode a raw SSE byte stream into canonical stream events.
///
/// Lines reach the decoder strictly in arrival order. The stream ends after
/// the first `Done`; a transport error is yielded once as
/// [`AgentError::Network`] and ends the stream.
pub fn decode_event_stream<S, B, E>(bytes: S, decoder: Box<dyn EventDecoder>) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let pipeline = Pipeline {
        bytes: Box::pin(bytes),
        lines: SseDecoder::new(),
        decoder,
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(pipeline, |mut p| async move {
        loop {
            if let Some(item) = p.pending.pop_front() {
                return Some((item, p));
            }
            if p.finished {
                return None;
            }
            match p.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in p.lines.feed(chunk.as_ref()) {
                        p.push_line(&line);
                    }
                }
                Some(Err(e)) => {
                    p.finished = true;
                    p.pending.push_back(Err(AgentError::Network(e.to_string())));
                }
                None => p.end_of_bytes(),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    const STREAM: &str = "event: message_start\r\n\
data: {\"type\":\"message_start\"}\r\n\
\r\n\
: keep-alive\n\
data: {\"text\":\"héllo wörld ✓\"}\n\
\n\
data: [DONE]\n";

    fn decode_in_chunks(bytes: &[u8], size: usize) -> Vec<String> {
        let mut decoder = SseDecoder::new();
        let mut lines = Vec::new();
        for chunk in bytes.chunks(size) {
            lines.extend(decoder.feed(chunk));
        }
        lines.extend(decoder.finish());
        lines
    }

    #[test]
    fn test_split_invariance() {
        let bytes = STREAM.as_bytes();
        let whole = decode_in_chunks(bytes, bytes.len());
        assert_eq!(whole.len(), 7);
        assert_eq!(whole[4], "data: {\"text\":\"héllo wörld ✓\"}");

        for size in [1, 7, 4096] {
            assert_eq!(decode_in_chunks(bytes, size), whole, "chunk size {}", size);
        }
    }

    #[test]
    fn test_carriage_return_stripped_and_remainder_kept() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"data: a\r\ndata: b"), vec!["data: a"]);
        assert_eq!(decoder.pending(), 7);
        assert_eq!(decoder.feed(b"c\n"), vec!["data: bc"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("data: [DONE]"));
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line(""), SseLine::Blank);
        assert_eq!(parse_line(": ping"), SseLine::Comment);
        assert_eq!(parse_line("data: {}"), SseLine::Data("{}"));
        assert_eq!(parse_line("data:{}"), SseLine::Data("{}"));
        assert_eq!(parse_line("event: ping"), SseLine::Event("ping"));
        assert_eq!(parse_line("retry: 100"), SseLine::Ignored);
        assert_eq!(parse_line("garbage"), SseLine::Unknown("garbage"));
        assert_eq!(parse_line("database: x"), SseLine::Unknown("database: x"));
    }

    /// Emits every data payload as text; `[DONE]` ends the stream.
    struct EchoDecoder {
        done: bool,
    }

    impl EventDecoder for EchoDecoder {
        fn decode_line(&mut self, line: &str) -> Result<Vec<StreamEvent>> {
            match parse_line(line) {
                SseLine::Data("[DONE]") => {
                    self.done = true;
                    Ok(vec![StreamEvent::Done])
                }
                SseLine::Data(payload) => Ok(vec![StreamEvent::TextDelta(payload.to_string())]),
                SseLine::Unknown(other) => Err(AgentError::Parse(other.to_string())),
                _ => Ok(Vec::new()),
            }
        }

        fn finish(&mut self) -> Vec<StreamEvent> {
            if self.done {
                return Vec::new();
            }
            self.done = true;
            vec![StreamEvent::Done]
        }
    }

    async fn collect(
        chunks: Vec<std::result::Result<Vec<u8>, String>>,
    ) -> Vec<Result<StreamEvent>> {
        let bytes = futures::stream::iter(chunks);
        decode_event_stream(bytes, Box::new(EchoDecoder { done: false }))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_pipeline_skips_bad_lines_and_stops_at_done() {
        let body = b"data: one\nnonsense\ndata: two\ndata: [DONE]\ndata: late\n".to_vec();
        let events: Vec<StreamEvent> = collect(vec![Ok(body)])
            .await
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("one".into()),
                StreamEvent::TextDelta("two".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_pipeline_finishes_when_bytes_run_out() {
        let events = collect(vec![Ok(b"data: a".to_vec())]).await;
        let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events, vec![StreamEvent::TextDelta("a".into()), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn test_pipeline_surfaces_transport_error() {
        let events = collect(vec![Ok(b"data: a\n".to_vec()), Err("connection reset".into())]).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(AgentError::Network(ref m)) if m.contains("reset")));
    }
}
