//! Incremental Server-Sent Events decoder for chat completion streams.
//!
//! Lines look like `data: <json>` and the stream ends with `data: [DONE]`.
//! The decoder is a pure state machine: bytes go in, decoded events come out.
//! How the bytes are obtained (blocking read or async poll) is up to the caller.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Prefix marking an event line.
pub const DATA_PREFIX: &str = "data: ";
/// Payload that marks the logical end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    value: Value,
}

impl StreamEvent {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The raw JSON payload.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Incremental text at `choices[0].delta.content`, if the event carries any.
    pub fn delta_text(&self) -> Option<&str> {
        self.value.pointer("/choices/0/delta/content")?.as_str()
    }

    /// `choices[0].finish_reason`, if set.
    pub fn finish_reason(&self) -> Option<&str> {
        self.value.pointer("/choices/0/finish_reason")?.as_str()
    }

    /// Deserialize the payload into a provider-specific shape.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}

/// Classification of a single trimmed line.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Data(&'a str),
    Terminator,
    Other,
}

impl<'a> Line<'a> {
    fn classify(line: &'a str) -> Self {
        match line.strip_prefix(DATA_PREFIX) {
            Some(DONE_SENTINEL) => Line::Terminator,
            Some(payload) => Line::Data(payload),
            None => Line::Other,
        }
    }
}

/// Incremental SSE decoder.
///
/// Holds at most one partial line between calls to [`feed`](Self::feed), plus
/// any trailing bytes of a UTF-8 sequence that was split across chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    /// Incomplete UTF-8 sequence carried over from the previous chunk.
    partial_utf8: Vec<u8>,
    terminated: bool,
    discarded_lines: u64,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk and return the events completed by it, in order.
    ///
    /// Once the sentinel has been seen, every later call returns nothing.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.push_bytes(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].find('\n') {
            let end = consumed + offset;
            let line = self.buffer[consumed..end].trim();
            consumed = end + 1;

            match Line::classify(line) {
                Line::Terminator => {
                    self.terminated = true;
                    break;
                }
                Line::Data(payload) => match serde_json::from_str::<Value>(payload) {
                    Ok(value) => events.push(StreamEvent::new(value)),
                    Err(e) => {
                        self.discarded_lines += 1;
                        tracing::debug!(error = %e, payload, "Discarding malformed SSE line");
                    }
                },
                Line::Other => {}
            }
        }

        if self.terminated {
            self.buffer.clear();
            self.partial_utf8.clear();
        } else {
            self.buffer.drain(..consumed);
        }

        events
    }

    /// Decode bytes onto the text buffer, holding back an incomplete trailing
    /// UTF-8 sequence. Invalid sequences become U+FFFD.
    fn push_bytes(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.partial_utf8);
        bytes.extend_from_slice(chunk);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.buffer.push_str(text);
                    }
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.partial_utf8 = tail.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of `data:` lines dropped because their payload was not JSON.
    pub fn discarded_lines(&self) -> u64 {
        self.discarded_lines
    }

    /// Check if there's an unterminated line (or partial character) buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.partial_utf8.is_empty()
    }

    /// Clear the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.partial_utf8.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &[u8] = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\ndata: [DONE]\n";

    fn decode_chunks(chunks: &[&[u8]]) -> (Vec<StreamEvent>, SseDecoder) {
        let mut decoder = SseDecoder::new();
        let events = chunks.iter().flat_map(|c| decoder.feed(c)).collect();
        (events, decoder)
    }

    fn deltas(events: &[StreamEvent]) -> Vec<&str> {
        events.iter().filter_map(StreamEvent::delta_text).collect()
    }

    #[test]
    fn test_single_chunk_example() {
        let (events, decoder) = decode_chunks(&[EXAMPLE]);
        assert_eq!(deltas(&events), vec!["Hi", "!"]);
        assert!(decoder.is_terminated());
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_every_three_way_split_matches_single_chunk() {
        let (expected, _) = decode_chunks(&[EXAMPLE]);
        for a in 0..=EXAMPLE.len() {
            for b in a..=EXAMPLE.len() {
                let (events, decoder) =
                    decode_chunks(&[&EXAMPLE[..a], &EXAMPLE[a..b], &EXAMPLE[b..]]);
                assert_eq!(events, expected, "split at {a}/{b}");
                assert!(decoder.is_terminated(), "split at {a}/{b}");
            }
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let chunks: Vec<&[u8]> = EXAMPLE.chunks(1).collect();
        let (events, decoder) = decode_chunks(&chunks);
        assert_eq!(deltas(&events), vec!["Hi", "!"]);
        assert!(decoder.is_terminated());
    }

    #[test]
    fn test_nothing_after_done_is_examined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(
            b"data: {\"n\":1}\ndata: [DONE]\ndata: {\"n\":2}\ngarbage\n",
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value()["n"], 1);
        assert!(decoder.is_terminated());
        assert!(!decoder.has_pending());

        assert!(decoder.feed(b"data: {\"n\":3}\n").is_empty());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let (events, decoder) =
            decode_chunks(&[b"data: {\"n\":1}\ndata: {not json\ndata: {\"n\":2}\n"]);
        let ns: Vec<_> = events.iter().map(|e| e.value()["n"].clone()).collect();
        assert_eq!(ns, vec![1, 2]);
        assert_eq!(decoder.discarded_lines(), 1);
        assert!(!decoder.is_terminated());
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let (events, decoder) = decode_chunks(&[
            b": keep-alive comment\n\nevent: message\nid: 7\ndata:{\"tight\":true}\n",
            b"data: {\"n\":1}\n",
        ]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value()["n"], 1);
        assert_eq!(decoder.discarded_lines(), 0);
    }

    #[test]
    fn test_exhaustion_without_done() {
        let (events, decoder) = decode_chunks(&[b"data: {\"n\":1}\n", b"data: {\"n\":2}\ndata: {\"n\""]);
        assert_eq!(events.len(), 2);
        assert!(!decoder.is_terminated());
        assert!(decoder.has_pending());
    }

    #[test]
    fn test_order_preserved() {
        let input: String = (0..20).map(|i| format!("data: {{\"n\":{i}}}\n")).collect();
        let (events, _) = decode_chunks(&[input.as_bytes()]);
        let ns: Vec<u64> = events
            .iter()
            .filter_map(|e| e.value()["n"].as_u64())
            .collect();
        assert_eq!(ns, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_crlf_and_padding_trimmed() {
        let (events, decoder) = decode_chunks(&[b"  data: {\"n\":1}  \r\n\r\ndata: [DONE]\r\n"]);
        assert_eq!(events.len(), 1);
        assert!(decoder.is_terminated());
    }

    #[test]
    fn test_done_split_across_chunks() {
        let (events, decoder) = decode_chunks(&[b"data: [DO", b"NE]", b"\n"]);
        assert!(events.is_empty());
        assert!(decoder.is_terminated());
    }

    #[test]
    fn test_done_without_newline_is_not_terminal() {
        let (_, decoder) = decode_chunks(&[b"data: [DONE]"]);
        assert!(!decoder.is_terminated());
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"h\u{e9}llo \u{1F600}\"}}]}\n";
        let bytes = input.as_bytes();
        let emoji_start = input.find('\u{1F600}').unwrap();
        for split in [emoji_start + 1, emoji_start + 2, emoji_start + 3] {
            let (events, _) = decode_chunks(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(deltas(&events), vec!["h\u{e9}llo \u{1F600}"], "split at {split}");
        }
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let (events, _) = decode_chunks(&[b"data: {\"s\":\"a\xffb\"}\n"]);
        assert_eq!(events[0].value()["s"], "a\u{FFFD}b");
    }

    #[test]
    fn test_absent_delta_is_none() {
        let (events, _) = decode_chunks(&[
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n",
            b"data: {\"choices\":[]}\n",
            b"data: 42\n",
        ]);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.delta_text().is_none()));
    }

    #[test]
    fn test_finish_reason() {
        let (events, _) =
            decode_chunks(&[b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n"]);
        assert_eq!(events[0].finish_reason(), Some("stop"));
    }

    #[test]
    fn test_parse_typed() {
        #[derive(serde::Deserialize)]
        struct Chunk {
            id: String,
        }
        let (events, _) = decode_chunks(&[b"data: {\"id\":\"gen-1\",\"choices\":[]}\n"]);
        let chunk: Chunk = events[0].parse().unwrap();
        assert_eq!(chunk.id, "gen-1");
    }

    #[test]
    fn test_clear() {
        let mut decoder = SseDecoder::new();
        decoder.feed(b"data: {\"n\"");
        assert!(decoder.has_pending());
        decoder.clear();
        assert!(!decoder.has_pending());
        assert_eq!(decoder.feed(b"data: {\"n\":1}\n").len(), 1);
    }
}
