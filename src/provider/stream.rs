//! Blocking and async realizations of the SSE event stream.
//!
//! Both wrap the same [`SseDecoder`]; they differ only in how the next chunk
//! of the response body is obtained.

use crate::provider::error::Error;
use crate::provider::http::{SseDecoder, StreamEvent};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio_util::io::{ReaderStream, StreamReader};

/// Maximum size of a single chunk pulled from the response body.
pub const CHUNK_SIZE: usize = 1024;

/// Why a stream stopped producing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server sent `data: [DONE]`.
    Done,
    /// The body closed before the sentinel arrived.
    Truncated,
}

/// What a finished stream produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Concatenated delta text.
    pub text: String,
    pub events: usize,
    pub end: StreamEnd,
}

/// Blocking event iterator over any `Read` source.
///
/// Reads at most [`CHUNK_SIZE`] bytes at a time. A read error is yielded once,
/// after which the iterator is exhausted.
pub struct EventIter<R> {
    reader: Option<R>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    end: Option<StreamEnd>,
    buf: Vec<u8>,
}

impl<R: Read> EventIter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            end: None,
            buf: vec![0; CHUNK_SIZE],
        }
    }

    /// How the stream ended, once it has.
    pub fn end_reason(&self) -> Option<StreamEnd> {
        self.end
    }

    pub fn discarded_lines(&self) -> u64 {
        self.decoder.discarded_lines()
    }

    fn finish(&mut self, end: StreamEnd) {
        tracing::debug!(?end, discarded = self.decoder.discarded_lines(), "SSE stream finished");
        self.end = Some(end);
        self.reader = None;
    }

    /// Print each text delta as it arrives, flushing after every write.
    pub fn print_deltas<W: Write>(mut self, out: &mut W) -> Result<StreamSummary, Error> {
        let mut text = String::new();
        let mut events = 0;

        while let Some(event) = self.next() {
            let event = event?;
            events += 1;
            if let Some(delta) = event.delta_text() {
                write!(out, "{delta}").map_err(|e| Error::Stream(e.to_string()))?;
                out.flush().map_err(|e| Error::Stream(e.to_string()))?;
                text.push_str(delta);
            }
        }

        Ok(StreamSummary {
            text,
            events,
            end: self.end.unwrap_or(StreamEnd::Truncated),
        })
    }
}

impl<R: Read> Iterator for EventIter<R> {
    type Item = Result<StreamEvent, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            let reader = self.reader.as_mut()?;

            match reader.read(&mut self.buf) {
                Ok(0) => self.finish(StreamEnd::Truncated),
                Ok(n) => {
                    self.pending.extend(self.decoder.feed(&self.buf[..n]));
                    if self.decoder.is_terminated() {
                        self.finish(StreamEnd::Done);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.reader = None;
                    return Some(Err(Error::Stream(e.to_string())));
                }
            }
        }
    }
}

/// Async event stream over an HTTP response body.
///
/// Dropping it (or reaching the end) drops the body, which releases the
/// connection. After the sentinel the body is never polled again.
pub struct EventStream {
    source: Option<BoxStream<'static, io::Result<Bytes>>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    end: Option<StreamEnd>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("open", &self.source.is_some())
            .field("pending", &self.pending.len())
            .field("end", &self.end)
            .finish()
    }
}

impl EventStream {
    /// Wrap a byte stream, re-chunking it to at most [`CHUNK_SIZE`] bytes.
    pub fn new<S, E>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let reader = StreamReader::new(body.map_err(io::Error::other));
        Self {
            source: Some(ReaderStream::with_capacity(reader, CHUNK_SIZE).boxed()),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            end: None,
        }
    }

    pub fn end_reason(&self) -> Option<StreamEnd> {
        self.end
    }

    pub fn discarded_lines(&self) -> u64 {
        self.decoder.discarded_lines()
    }

    fn finish(&mut self, end: StreamEnd) {
        tracing::debug!(?end, discarded = self.decoder.discarded_lines(), "SSE stream finished");
        self.end = Some(end);
        self.source = None;
    }

    /// Drain the stream, passing each text delta to `on_delta`.
    ///
    /// The first error from `on_delta` stops the stream and closes the body.
    pub async fn for_each_delta<F>(mut self, mut on_delta: F) -> Result<StreamSummary, Error>
    where
        F: FnMut(&str) -> io::Result<()>,
    {
        let mut text = String::new();
        let mut events = 0;

        while let Some(event) = self.next().await {
            let event = event?;
            events += 1;
            if let Some(delta) = event.delta_text() {
                if let Err(e) = on_delta(delta) {
                    self.source = None;
                    return Err(Error::Stream(e.to_string()));
                }
                text.push_str(delta);
            }
        }

        Ok(StreamSummary {
            text,
            events,
            end: self.end.unwrap_or(StreamEnd::Truncated),
        })
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            let Some(source) = this.source.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(source.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    this.pending.extend(this.decoder.feed(&chunk));
                    if this.decoder.is_terminated() {
                        this.finish(StreamEnd::Done);
                    }
                }
                Some(Err(e)) => {
                    this.source = None;
                    return Poll::Ready(Some(Err(Error::Stream(e.to_string()))));
                }
                None => this.finish(StreamEnd::Truncated),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const EXAMPLE: &[u8] = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\ndata: [DONE]\n";

    /// Reader that hands out fixed slices, one per `read` call.
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkedReader {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    /// Writer that records flushes, and can start failing after `fail_after` writes.
    #[derive(Default)]
    struct FlushCounter {
        written: Vec<u8>,
        writes: usize,
        flushes: usize,
        fail_after: Option<usize>,
    }

    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_after.is_some_and(|n| self.writes >= n) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.writes += 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    /// Body stream that counts polls and drops.
    struct TrackedBody {
        chunks: VecDeque<Bytes>,
        polls: Arc<AtomicUsize>,
        drops: Arc<AtomicUsize>,
    }

    impl TrackedBody {
        fn new(chunks: &[&'static [u8]]) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let polls = Arc::new(AtomicUsize::new(0));
            let drops = Arc::new(AtomicUsize::new(0));
            let body = Self {
                chunks: chunks.iter().map(|c| Bytes::from_static(c)).collect(),
                polls: polls.clone(),
                drops: drops.clone(),
            };
            (body, polls, drops)
        }
    }

    impl Stream for TrackedBody {
        type Item = Result<Bytes, io::Error>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(self.chunks.pop_front().map(Ok))
        }
    }

    impl Drop for TrackedBody {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_iter_example_three_chunks() {
        let reader = ChunkedReader::new(&[&EXAMPLE[..10], &EXAMPLE[10..57], &EXAMPLE[57..]]);
        let mut iter = EventIter::new(reader);
        let deltas: Vec<String> = iter
            .by_ref()
            .map(|e| e.unwrap().delta_text().unwrap().to_string())
            .collect();
        assert_eq!(deltas, vec!["Hi", "!"]);
        assert_eq!(iter.end_reason(), Some(StreamEnd::Done));
    }

    #[test]
    fn test_iter_body_larger_than_one_read() {
        let mut body = Vec::new();
        for i in 0..200 {
            body.extend_from_slice(format!("data: {{\"n\":{i}}}\n").as_bytes());
        }
        let reader = ChunkedReader::new(&[&body]);
        let events: Vec<_> = EventIter::new(reader).collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 200);
        assert_eq!(events[199].value()["n"], 199);
    }

    #[test]
    fn test_iter_truncated() {
        let reader = ChunkedReader::new(&[b"data: {\"n\":1}\n", b"data: {\"n\":2}\n"]);
        let mut iter = EventIter::new(reader);
        assert_eq!(iter.by_ref().count(), 2);
        assert_eq!(iter.end_reason(), Some(StreamEnd::Truncated));
    }

    #[test]
    fn test_iter_transport_error_is_fatal() {
        let mut iter = EventIter::new(FailingReader);
        assert!(matches!(iter.next(), Some(Err(Error::Stream(_)))));
        assert!(iter.next().is_none());
        assert_eq!(iter.end_reason(), None);
    }

    #[test]
    fn test_print_deltas_writes_text() {
        let reader = ChunkedReader::new(&[EXAMPLE]);
        let mut out = Vec::new();
        let summary = EventIter::new(reader).print_deltas(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hi!");
        assert_eq!(summary.text, "Hi!");
        assert_eq!(summary.events, 2);
        assert_eq!(summary.end, StreamEnd::Done);
    }

    #[test]
    fn test_print_deltas_flushes_every_delta() {
        let reader = ChunkedReader::new(&[EXAMPLE]);
        let mut out = FlushCounter::default();
        let summary = EventIter::new(reader).print_deltas(&mut out).unwrap();
        assert_eq!(out.flushes, 2);
        assert_eq!(out.written, b"Hi!");
        assert_eq!(summary.events, 2);
    }

    #[test]
    fn test_print_deltas_skips_malformed() {
        let reader = ChunkedReader::new(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            b"data: nope\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        ]);
        let mut out = Vec::new();
        let summary = EventIter::new(reader).print_deltas(&mut out).unwrap();
        assert_eq!(summary.text, "ab");
        assert_eq!(summary.end, StreamEnd::Truncated);
    }

    #[tokio::test]
    async fn test_stream_example_three_chunks() {
        let (body, _, drops) =
            TrackedBody::new(&[&EXAMPLE[..23], &EXAMPLE[23..80], &EXAMPLE[80..]]);
        let mut stream = EventStream::new(body);

        let mut deltas = Vec::new();
        while let Some(event) = stream.next().await {
            deltas.push(event.unwrap().delta_text().unwrap().to_string());
        }
        assert_eq!(deltas, vec!["Hi", "!"]);
        assert_eq!(stream.end_reason(), Some(StreamEnd::Done));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_not_polled_after_done() {
        let (body, polls, drops) = TrackedBody::new(&[
            b"data: {\"n\":1}\ndata: [DONE]\n",
            b"data: {\"n\":2}\n",
        ]);
        let mut stream = EventStream::new(body);

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
        let polls_at_end = polls.load(Ordering::SeqCst);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        assert!(stream.next().await.is_none());
        assert_eq!(polls.load(Ordering::SeqCst), polls_at_end);
    }

    #[tokio::test]
    async fn test_cancel_releases_body_once() {
        let (body, polls, drops) = TrackedBody::new(&[
            b"data: {\"n\":1}\n",
            b"data: {\"n\":2}\n",
            b"data: {\"n\":3}\n",
        ]);
        let mut stream = EventStream::new(body);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.value()["n"], 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        let polls_before = polls.load(Ordering::SeqCst);
        drop(stream);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(polls.load(Ordering::SeqCst), polls_before);
    }

    #[tokio::test]
    async fn test_stream_truncated() {
        let (body, _, _) = TrackedBody::new(&[b"data: {\"n\":1}\ndata: {\"n\""]);
        let mut stream = EventStream::new(body);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.is_none());
        assert_eq!(stream.end_reason(), Some(StreamEnd::Truncated));
    }

    #[tokio::test]
    async fn test_stream_transport_error() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"n\":1}\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut stream = EventStream::new(body);
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(stream.next().await, Some(Err(Error::Stream(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_for_each_delta() {
        let (body, _, _) = TrackedBody::new(&[EXAMPLE]);
        let mut seen = Vec::new();
        let summary = EventStream::new(body)
            .for_each_delta(|d| {
                seen.push(d.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["Hi", "!"]);
        assert_eq!(summary.text, "Hi!");
        assert_eq!(summary.end, StreamEnd::Done);
    }

    #[tokio::test]
    async fn test_for_each_delta_stops_on_write_error() {
        let (body, polls, drops) = TrackedBody::new(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"c\"}}]}\n",
            b"data: [DONE]\n",
        ]);
        let mut out = FlushCounter {
            fail_after: Some(1),
            ..FlushCounter::default()
        };

        let result = EventStream::new(body)
            .for_each_delta(|d| {
                out.write_all(d.as_bytes())?;
                out.flush()
            })
            .await;

        assert!(matches!(result, Err(Error::Stream(ref msg)) if msg.contains("closed")));
        assert_eq!(out.written, b"a");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
