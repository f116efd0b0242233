//! Server-Sent Events (SSE) decoding for chat-completion streams.
//!
//! The response body arrives as chunks whose boundaries mean nothing: one `data:` line may span
//! several chunks and one chunk may hold many lines, or end in the middle of a multi-byte
//! character.  [`FrameDecoder`] carries the unterminated tail between calls so that the frames it
//! emits depend only on the bytes, never on how they were split.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::error::{Error, Result};
use crate::observability::{STREAM_BYTES, STREAM_FRAMES, STREAM_MALFORMED_FRAMES};
use crate::types::ChatCompletionChunk;

/// Prefix of every significant line.
pub const DATA_PREFIX: &str = "data: ";

/// Payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A non-empty text fragment from the first choice's delta.
    Delta(String),
    /// The terminal sentinel.  Carries no content.
    Done,
}

/// Incremental line-oriented decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    pending: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder with empty carry-over.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text chunk and return the frames completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);
        self.drain_lines()
    }

    /// Feed a raw byte chunk.
    ///
    /// A multi-byte character cut by the chunk boundary is held back until the rest of it
    /// arrives.  Invalid sequences decode to U+FFFD.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);
        let text = take_utf8(&mut self.pending);
        self.push(&text)
    }

    /// Signal end of input.  A final line without a trailing newline is decoded here.
    pub fn finish(&mut self) -> Vec<Frame> {
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.buffer.push_str(&tail);
        }
        let mut frames = self.drain_lines();
        let rest = std::mem::take(&mut self.buffer);
        frames.extend(parse_line(&rest));
        frames
    }

    /// True if there is buffered text that has not formed a complete line.
    pub fn has_partial_line(&self) -> bool {
        !self.buffer.is_empty() || !self.pending.is_empty()
    }

    fn drain_lines(&mut self) -> Vec<Frame> {
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete.split('\n').filter_map(parse_line).collect()
    }
}

/// Decode one complete line.
///
/// Returns `None` for lines that carry no frame: non-`data:` lines, chunks without content, and
/// payloads that are not valid JSON.  The last are logged and dropped; they never end the stream.
pub fn parse_line(line: &str) -> Option<Frame> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload == DONE_SENTINEL {
        STREAM_FRAMES.click();
        return Some(Frame::Done);
    }
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => {
            let content = chunk.content()?;
            STREAM_FRAMES.click();
            Some(Frame::Delta(content.to_string()))
        }
        Err(err) => {
            STREAM_MALFORMED_FRAMES.click();
            tracing::warn!(error = %err, payload, "dropping malformed stream frame");
            None
        }
    }
}

/// Process a stream of bytes into a stream of frames.
///
/// Errors from the underlying body end the stream after being yielded once as
/// [`Error::Streaming`].  When the body ends, any unterminated final line is decoded.
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<Frame>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, FrameDecoder::new(), VecDeque::new(), false),
        move |(mut stream, mut decoder, mut ready, mut finished)| async move {
            loop {
                if let Some(frame) = ready.pop_front() {
                    return Some((Ok(frame), (stream, decoder, ready, finished)));
                }
                if finished {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        ready.extend(decoder.push_bytes(&bytes));
                    }
                    Some(Err(e)) => {
                        finished = true;
                        return Some((Err(e), (stream, decoder, ready, finished)));
                    }
                    None => {
                        finished = true;
                        ready.extend(decoder.finish());
                    }
                }
            }
        },
    )
}

/// Decode as much of `pending` as forms complete characters and remove it from the buffer.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut consumed = 0;
    while consumed < pending.len() {
        match std::str::from_utf8(&pending[consumed..]) {
            Ok(valid) => {
                out.push_str(valid);
                consumed = pending.len();
            }
            Err(err) => {
                let valid_up_to = consumed + err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[consumed..valid_up_to]));
                match err.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        consumed = valid_up_to + len;
                    }
                    // Incomplete character at the end; wait for more bytes.
                    None => {
                        consumed = valid_up_to;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..consumed);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_line(content: &str) -> String {
        let payload = serde_json::json!({"choices": [{"delta": {"content": content}}]});
        format!("data: {payload}\n")
    }

    fn decode_whole(input: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = decoder.push_bytes(input);
        frames.extend(decoder.finish());
        frames
    }

    fn decode_split(input: &[u8], cuts: &[usize]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            frames.extend(decoder.push_bytes(&input[start..cut]));
            start = cut;
        }
        frames.extend(decoder.push_bytes(&input[start..]));
        frames.extend(decoder.finish());
        frames
    }

    fn sample_stream() -> String {
        let mut body = String::new();
        body.push_str(": keep-alive\n\n");
        body.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
        body.push_str(&data_line("Hello"));
        body.push('\n');
        body.push_str(&data_line(", 世界 🌍"));
        body.push_str("data: {not json\n");
        body.push_str(&data_line("\n\n- item"));
        body.push_str("data: [DONE]\n");
        body
    }

    #[test]
    fn single_frame() {
        let frames = decode_whole(data_line("Hi").as_bytes());
        assert_eq!(frames, vec![Frame::Delta("Hi".to_string())]);
    }

    #[test]
    fn example_split_at_every_offset() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n";
        for cut in 0..=input.len() {
            let frames = decode_split(input.as_bytes(), &[cut]);
            assert_eq!(frames, vec![Frame::Delta("Hi".to_string())], "cut at {cut}");
        }
    }

    #[test]
    fn chunk_boundary_invariance_single_cut() {
        let input = sample_stream();
        let expected = decode_whole(input.as_bytes());
        assert_eq!(
            expected,
            vec![
                Frame::Delta("Hello".to_string()),
                Frame::Delta(", 世界 🌍".to_string()),
                Frame::Delta("\n\n- item".to_string()),
                Frame::Done,
            ]
        );
        for cut in 0..=input.len() {
            assert_eq!(decode_split(input.as_bytes(), &[cut]), expected, "cut at {cut}");
        }
    }

    #[test]
    fn chunk_boundary_invariance_two_cuts() {
        let mut input = data_line("ab");
        input.push_str(&data_line("ü"));
        input.push_str("data: [DONE]\n");
        let expected = decode_whole(input.as_bytes());
        for first in 0..=input.len() {
            for second in first..=input.len() {
                assert_eq!(
                    decode_split(input.as_bytes(), &[first, second]),
                    expected,
                    "cuts at {first}, {second}"
                );
            }
        }
    }

    #[test]
    fn byte_at_a_time() {
        let input = sample_stream();
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in input.as_bytes() {
            frames.extend(decoder.push_bytes(std::slice::from_ref(byte)));
        }
        frames.extend(decoder.finish());
        assert_eq!(frames, decode_whole(input.as_bytes()));
    }

    #[test]
    fn text_chunks_match_byte_chunks() {
        let input = sample_stream();
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for (idx, _) in input.char_indices().step_by(7) {
            let end = input[idx..]
                .char_indices()
                .nth(7)
                .map(|(i, _)| idx + i)
                .unwrap_or(input.len());
            frames.extend(decoder.push(&input[idx..end]));
        }
        frames.extend(decoder.finish());
        assert_eq!(frames, decode_whole(input.as_bytes()));
    }

    #[test]
    fn malformed_frame_does_not_abort() {
        let mut input = data_line("before");
        input.push_str("data: {not json\n");
        input.push_str(&data_line("after"));
        assert_eq!(
            decode_whole(input.as_bytes()),
            vec![
                Frame::Delta("before".to_string()),
                Frame::Delta("after".to_string()),
            ]
        );
    }

    #[test]
    fn done_mid_buffer_is_terminal_not_content() {
        let mut input = data_line("x");
        input.push_str("data: [DONE]\n");
        input.push_str(&data_line("y"));
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&input);
        assert_eq!(
            frames,
            vec![
                Frame::Delta("x".to_string()),
                Frame::Done,
                Frame::Delta("y".to_string()),
            ]
        );
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let input = "event: message\nid: 7\nretry: 100\ndata:{\"choices\":[]}\n: comment\n\n";
        assert!(decode_whole(input.as_bytes()).is_empty());
    }

    #[test]
    fn crlf_line_endings() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\r\ndata: [DONE]\r\n";
        assert_eq!(
            decode_whole(input.as_bytes()),
            vec![Frame::Delta("Hi".to_string()), Frame::Done]
        );
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("data: [DO").is_empty());
        assert!(decoder.has_partial_line());
        assert_eq!(decoder.push("NE]\n"), vec![Frame::Done]);
        assert!(!decoder.has_partial_line());
    }

    #[test]
    fn finish_decodes_unterminated_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), vec![Frame::Done]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut input = b"data: {\"choices\":[{\"delta\":{\"content\":\"a".to_vec();
        input.push(0xff);
        input.extend_from_slice(b"b\"}}]}\n");
        let expected = vec![Frame::Delta("a\u{fffd}b".to_string())];
        assert_eq!(decode_whole(&input), expected);
        for cut in 0..=input.len() {
            assert_eq!(decode_split(&input, &[cut]), expected, "cut at {cut}");
        }
    }

    #[test]
    fn empty_content_is_not_a_frame() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n";
        assert!(decode_whole(input.as_bytes()).is_empty());
    }

    #[tokio::test]
    async fn process_split_stream() {
        let input = sample_stream().into_bytes();
        let (a, b) = input.split_at(input.len() / 3);
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))];
        let frames: Vec<Frame> = process_sse(stream::iter(chunks))
            .map(|frame| frame.unwrap())
            .collect()
            .await;
        assert_eq!(frames, decode_whole(&input));
    }

    #[tokio::test]
    async fn process_surfaces_body_errors_once() {
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(data_line("partial"))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from(data_line("never"))),
        ];
        let mut frames = Box::pin(process_sse(stream::iter(chunks)));
        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            Frame::Delta("partial".to_string())
        );
        let err = frames.next().await.unwrap().unwrap_err();
        assert!(err.is_transport());
        assert!(frames.next().await.is_none());
    }

    #[test]
    fn process_decodes_trailing_line_at_end_of_body() {
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"data: [DONE]"))];
        let frames: Vec<Result<Frame>> =
            tokio_test::block_on(process_sse(stream::iter(chunks)).collect());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &Frame::Done);
    }
}
