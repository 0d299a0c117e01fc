//! Server-sent-event frame decoding.
//!
//! Only `data: ` lines matter to the providers we talk to, so this is not a
//! general SSE parser: event names, ids and retry hints are ignored. Lines are
//! split on `\n` with the incomplete tail carried over to the next chunk.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};

use crate::error::AppError;

const DATA_PREFIX: &str = "data: ";

/// Incremental line decoder. Feed it raw chunks, get back the payloads of
/// every line completed by that chunk.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the last incomplete line. Kept undecoded so a multi-byte
    /// character split across chunks survives.
    carry: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let Some(last_newline) = self.carry.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(payload_of)
            .collect()
    }

    /// Decode whatever is left in the carry buffer once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.carry);
        payload_of(&tail)
    }
}

fn payload_of(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    line.trim()
        .strip_prefix(DATA_PREFIX)
        .map(str::to_string)
}

pub type BoxedBody = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Pulls payloads out of a chunked byte stream on demand.
pub struct SseReader<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl SseReader<BoxedBody> {
    /// Wrap a streaming HTTP response. Fails before producing any event when
    /// the response declares an empty body.
    pub fn from_response(response: reqwest::Response) -> Result<Self, AppError> {
        if response.status() == reqwest::StatusCode::NO_CONTENT
            || response.content_length() == Some(0)
        {
            return Err(AppError::Protocol("response has no readable body".to_string()));
        }
        let body = response.bytes_stream().map(|r| r.map(|b| b.to_vec()));
        Ok(Self::new(Box::pin(body)))
    }
}

impl<S, B, E> SseReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    pub fn new(body: S) -> Self {
        Self {
            body,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next decoded payload, `None` once the body is exhausted.
    ///
    /// The caller decides per payload whether to keep going; stopping early
    /// leaves the rest of the body unread. Cancel-safe: dropping the future
    /// between chunks loses nothing, since chunk decoding happens
    /// synchronously after the await.
    pub async fn next_event(&mut self) -> Option<Result<String, AppError>> {
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Some(Ok(payload));
            }
            if self.finished {
                return None;
            }
            match self.body.next().await {
                Some(Ok(chunk)) => {
                    let payloads = self.decoder.push(chunk.as_ref());
                    self.pending.extend(payloads);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(AppError::Protocol(format!(
                        "failed to read response body: {e}"
                    ))));
                }
                None => {
                    self.finished = true;
                    if let Some(payload) = self.decoder.finish() {
                        self.pending.push_back(payload);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::cell::Cell;
    use std::rc::Rc;

    const SAMPLE: &str = "data: {\"a\":1}\n\n: keepalive\nevent: delta\ndata: héllo wörld\n\n  data: [DONE]  \n";

    fn chunked(parts: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Unpin {
        stream::iter(parts.into_iter().map(Ok))
    }

    fn read_all(parts: Vec<Vec<u8>>) -> Vec<String> {
        tokio_test::block_on(async {
            let mut reader = SseReader::new(chunked(parts));
            let mut events = Vec::new();
            while let Some(event) = reader.next_event().await {
                events.push(event.unwrap());
            }
            events
        })
    }

    #[test]
    fn decodes_data_lines_only() {
        let events = read_all(vec![SAMPLE.as_bytes().to_vec()]);
        assert_eq!(events, vec!["{\"a\":1}", "héllo wörld", "[DONE]"]);
    }

    #[test]
    fn every_two_way_split_gives_same_events() {
        let bytes = SAMPLE.as_bytes();
        let expected = read_all(vec![bytes.to_vec()]);
        for i in 0..=bytes.len() {
            let parts = vec![bytes[..i].to_vec(), bytes[i..].to_vec()];
            assert_eq!(read_all(parts), expected, "split at byte {i}");
        }
    }

    #[test]
    fn byte_at_a_time_gives_same_events() {
        let parts: Vec<Vec<u8>> = SAMPLE.bytes().map(|b| vec![b]).collect();
        assert_eq!(read_all(parts), read_all(vec![SAMPLE.as_bytes().to_vec()]));
    }

    #[test]
    fn trailing_line_without_newline_is_decoded() {
        let events = read_all(vec![b"data: one\ndata: tw".to_vec(), b"o".to_vec()]);
        assert_eq!(events, vec!["one", "two"]);
    }

    #[test]
    fn stopping_at_sentinel_leaves_rest_unread() {
        tokio_test::block_on(async {
            let pulled = Rc::new(Cell::new(0));
            let counter = Rc::clone(&pulled);
            let parts = vec![
                b"data: a\ndata: [DONE]\n".to_vec(),
                b"data: after\n".to_vec(),
            ];
            let body = chunked(parts).inspect(move |_| counter.set(counter.get() + 1));
            let mut reader = SseReader::new(body);

            let mut events = Vec::new();
            while let Some(event) = reader.next_event().await {
                let payload = event.unwrap();
                let done = payload == "[DONE]";
                events.push(payload);
                if done {
                    break;
                }
            }
            assert_eq!(events, vec!["a", "[DONE]"]);
            assert_eq!(pulled.get(), 1, "second chunk must not be read");

            // The rest is still there for a later call.
            assert_eq!(reader.next_event().await.unwrap().unwrap(), "after");
            assert_eq!(pulled.get(), 2);
        });
    }

    #[test]
    fn body_error_is_protocol_error() {
        tokio_test::block_on(async {
            let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
                Ok(b"data: a\n".to_vec()),
                Err(std::io::Error::other("reset")),
            ];
            let mut reader = SseReader::new(stream::iter(parts));
            assert_eq!(reader.next_event().await.unwrap().unwrap(), "a");
            let err = reader.next_event().await.unwrap().unwrap_err();
            assert!(matches!(err, AppError::Protocol(_)));
            assert!(reader.next_event().await.is_none());
        });
    }

    #[test]
    fn bare_data_field_is_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data:\ndata:x\n").is_empty());
    }
}
