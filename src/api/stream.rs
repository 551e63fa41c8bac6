//! Folding a streamed `/api/generate` body into a reply.
//!
//! The server answers with one JSON record per line. Records are decoded as
//! they arrive and their `response` pieces are concatenated until a record
//! says `done`, the body ends, or something goes wrong. A failure keeps the
//! text gathered so far.

use std::fmt::Display;

use async_stream::stream;
use futures::{Stream, StreamExt};

use crate::{metrics::ReplyStats, models::GenerateResponse};

use super::QueryError;

/// Outcome of one prompt dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Complete {
        text: String,
        stats: Option<ReplyStats>,
    },
    /// `text` is the partial reply for an interrupted stream, or the
    /// formatted error when nothing could be read.
    Failed { text: String, error: QueryError },
}

impl Reply {
    #[cfg(test)]
    pub fn complete(text: impl ToString) -> Self {
        Reply::Complete {
            text: text.to_string(),
            stats: None,
        }
    }

    pub fn failed(error: QueryError) -> Self {
        Reply::Failed {
            text: error.to_string(),
            error,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Reply::Complete { text, .. } | Reply::Failed { text, .. } => text,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            Reply::Complete { .. } => None,
            Reply::Failed { error, .. } => Some(error),
        }
    }

    pub fn stats(&self) -> Option<&ReplyStats> {
        match self {
            Reply::Complete { stats, .. } => stats.as_ref(),
            Reply::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Everything received so far.
    Partial(String),
    Finished(Reply),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Idle,
    Receiving,
    Done,
    Failed,
}

#[derive(Debug, Default)]
pub struct Accumulator {
    state: DispatchState,
    text: String,
    stats: Option<ReplyStats>,
    error: Option<QueryError>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if self.state == DispatchState::Idle {
            self.state = DispatchState::Receiving;
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, DispatchState::Done | DispatchState::Failed)
    }

    /// Decodes one record and folds it in. Returns whether the record was
    /// accepted; records fed outside `Receiving` are ignored.
    pub fn feed(&mut self, line: &[u8]) -> bool {
        if self.state != DispatchState::Receiving {
            return false;
        }
        let fragment: GenerateResponse = match serde_json::from_slice(line) {
            Ok(fragment) => fragment,
            Err(err) => {
                log::error!("Dropping the rest of the reply after a bad record: {}", err);
                self.fail(err.into());
                return false;
            }
        };
        if let Some(message) = fragment.error {
            log::error!("Server reported an error mid-stream: {}", message);
            self.fail(QueryError::Server(message));
            return false;
        }

        self.text.push_str(&fragment.response);
        if fragment.done {
            self.stats = ReplyStats::from_response(&fragment);
            self.state = DispatchState::Done;
        }
        true
    }

    pub fn fail(&mut self, error: QueryError) {
        if !self.is_finished() {
            self.state = DispatchState::Failed;
            self.error = Some(error);
        }
    }

    pub fn finish(self) -> Reply {
        match self.error {
            Some(error) => Reply::Failed {
                text: self.text,
                error,
            },
            None => Reply::Complete {
                text: self.text,
                stats: self.stats,
            },
        }
    }
}

/// Splits raw body chunks into trimmed, non-blank lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Bytes of `pending` already known to hold no newline.
    scanned: usize,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|&b| b == b'\n') {
            let newline = self.scanned + offset;
            let line = self.pending[start..newline].trim_ascii();
            if !line.is_empty() {
                lines.push(line.to_vec());
            }
            start = newline + 1;
            self.scanned = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();
        lines
    }

    /// Whatever is left once the body ends without a final newline.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim_ascii();
        (!rest.is_empty()).then(|| rest.to_vec())
    }
}

/// Turns a response body into live progress followed by exactly one
/// [`StreamEvent::Finished`].
pub fn accumulate<S, B, E>(body: S) -> impl Stream<Item = StreamEvent> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    stream! {
        let mut body = Box::pin(body);
        let mut lines = LineBuffer::default();
        let mut acc = Accumulator::new();
        acc.start();

        loop {
            let mut exhausted = false;
            let ready = match body.next().await {
                Some(Ok(chunk)) => lines.push(chunk.as_ref()),
                Some(Err(err)) => {
                    log::error!("Reply stream broke off: {}", err);
                    acc.fail(QueryError::Connection(err.to_string()));
                    break;
                }
                None => {
                    exhausted = true;
                    lines.finish().into_iter().collect()
                }
            };

            for line in ready {
                let accepted = acc.feed(&line);
                if acc.is_finished() {
                    break;
                }
                if accepted {
                    yield StreamEvent::Partial(acc.text().to_string());
                }
            }

            if exhausted || acc.is_finished() {
                break;
            }
        }

        yield StreamEvent::Finished(acc.finish());
    }
}

/// Drains a dispatch and keeps only its outcome.
#[cfg(test)]
pub async fn collect_reply(events: impl Stream<Item = StreamEvent>) -> Reply {
    let mut events = std::pin::pin!(events);
    let mut reply = None;
    while let Some(event) = events.next().await {
        if let StreamEvent::Finished(finished) = event {
            reply = Some(finished);
        }
    }
    reply.unwrap_or_else(|| Reply::complete(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::stream;

    fn body(chunks: &[&str]) -> impl Stream<Item = Result<Vec<u8>, String>> + Send + 'static {
        let chunks: Vec<Result<Vec<u8>, String>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        stream::iter(chunks)
    }

    fn run(chunks: &[&str]) -> Vec<StreamEvent> {
        block_on(accumulate(body(chunks)).collect::<Vec<_>>())
    }

    #[test]
    fn test_hello_scenario() {
        let events = run(&[
            "{\"response\":\"Hi\",\"done\":false}\n",
            "{\"response\":\" there\",\"done\":true}\n",
        ]);

        assert_eq!(
            events,
            vec![
                StreamEvent::Partial("Hi".to_string()),
                StreamEvent::Finished(Reply::complete("Hi there")),
            ]
        );
    }

    #[test]
    fn test_live_text_grows() {
        let events = run(&[
            "{\"response\":\"a\"}\n{\"response\":\"b\"}\n",
            "{\"response\":\"c\"}\n",
            "{\"response\":\"d\",\"done\":true}\n",
        ]);

        let partials: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Partial(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(partials, vec!["a", "ab", "abc"]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Finished(Reply::complete("abcd")))
        );
    }

    #[test]
    fn test_record_split_across_chunks() {
        let reply = block_on(collect_reply(accumulate(body(&[
            "{\"respon",
            "se\":\"Hel\",\"done\":false}\r\n\r\n{\"response\":\"lo\",",
            "\"done\":true}\n",
        ]))));

        assert_eq!(reply, Reply::complete("Hello"));
    }

    #[test]
    fn test_malformed_record_keeps_prefix() {
        let reply = block_on(collect_reply(accumulate(body(&[
            "{\"response\":\"one \",\"done\":false}\n",
            "{\"response\":\"two\",\"done\":false}\n",
            "not json\n",
            "{\"response\":\" three\",\"done\":true}\n",
        ]))));

        assert_eq!(reply.text(), "one two");
        assert!(matches!(reply.error(), Some(QueryError::Malformed(_))));
        assert!(reply.stats().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"{\"response\":\"ok\"}\n".to_vec()),
            Ok(vec![0xff, 0xfe, b'\n']),
        ];
        let reply = block_on(collect_reply(accumulate(stream::iter(chunks))));

        assert_eq!(reply.text(), "ok");
        assert!(matches!(reply.error(), Some(QueryError::Malformed(_))));
    }

    #[test]
    fn test_server_error_record() {
        let reply = block_on(collect_reply(accumulate(body(&[
            "{\"response\":\"par\"}\n",
            "{\"error\":\"model ran out of memory\"}\n",
        ]))));

        assert_eq!(
            reply,
            Reply::Failed {
                text: "par".to_string(),
                error: QueryError::Server("model ran out of memory".to_string()),
            }
        );
    }

    #[test]
    fn test_exhausted_body_without_done() {
        let reply = block_on(collect_reply(accumulate(body(&[
            "{\"response\":\"x\"}\n",
            "{\"response\":\"y\"}",
        ]))));

        assert_eq!(reply, Reply::complete("xy"));
    }

    #[test]
    fn test_empty_body() {
        let events = run(&[]);
        assert_eq!(events, vec![StreamEvent::Finished(Reply::complete(""))]);
    }

    #[test]
    fn test_nothing_consumed_after_done() {
        let chunks = body(&[
            "{\"response\":\"end\",\"done\":true}\n{\"response\":\"ignored\"}\n",
        ])
        .chain(stream::once(async { panic!("read past the final record") }));
        let reply = block_on(collect_reply(accumulate(chunks)));

        assert_eq!(reply, Reply::complete("end"));
    }

    #[test]
    fn test_transport_error_keeps_prefix() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"{\"response\":\"half\"}\n".to_vec()),
            Err("connection reset".to_string()),
        ];
        let reply = block_on(collect_reply(accumulate(stream::iter(chunks))));

        assert_eq!(
            reply,
            Reply::Failed {
                text: "half".to_string(),
                error: QueryError::Connection("connection reset".to_string()),
            }
        );
    }

    #[test]
    fn test_final_record_stats() {
        let reply = block_on(collect_reply(accumulate(body(&[
            "{\"response\":\"hey\",\"done\":true,\"total_duration\":2000000000,\"eval_count\":10,\"eval_duration\":500000000}\n",
        ]))));

        let stats = reply.stats().unwrap();
        assert_eq!(stats.response_time.as_secs(), 2);
        assert_eq!(stats.tokens_per_second, Some(20.0));
    }

    #[test]
    fn test_accumulator_states() {
        let mut acc = Accumulator::new();
        assert_eq!(acc.state(), DispatchState::Idle);
        assert!(!acc.feed(b"{\"response\":\"early\"}"));

        acc.start();
        assert_eq!(acc.state(), DispatchState::Receiving);
        assert!(acc.feed(b"{\"response\":\"a\"}"));
        assert_eq!(acc.state(), DispatchState::Receiving);
        assert!(acc.feed(b"{\"response\":\"b\",\"done\":true}"));
        assert_eq!(acc.state(), DispatchState::Done);

        assert!(!acc.feed(b"{\"response\":\"c\"}"));
        acc.fail(QueryError::Connection("late".to_string()));
        assert_eq!(acc.state(), DispatchState::Done);
        assert_eq!(acc.finish(), Reply::complete("ab"));
    }

    #[test]
    fn test_line_buffer() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"  \n\n{\"a\"").is_empty());
        assert_eq!(lines.push(b":1}\r\n{\"b\":2}"), vec![b"{\"a\":1}".to_vec()]);
        assert_eq!(lines.finish(), Some(b"{\"b\":2}".to_vec()));
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_line_buffer_byte_at_a_time() {
        let body = b"{\"response\":\"long\"}\n\n{\"done\":true}\n";
        let mut lines = LineBuffer::default();
        let mut seen = Vec::new();
        for byte in body.iter() {
            seen.extend(lines.push(std::slice::from_ref(byte)));
            assert_eq!(lines.scanned, lines.pending.len());
        }
        assert_eq!(
            seen,
            vec![
                b"{\"response\":\"long\"}".to_vec(),
                b"{\"done\":true}".to_vec()
            ]
        );
        assert!(lines.pending.is_empty());
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_line_buffer_many_lines_in_one_chunk() {
        let mut lines = LineBuffer::default();
        assert_eq!(
            lines.push(b"a\nb\n\nc\nd"),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(lines.push(b"e\n"), vec![b"de".to_vec()]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_failed_reply_text() {
        let reply = Reply::failed(QueryError::Status(503));
        assert_eq!(reply.text(), "Error: 503");
        assert_eq!(reply.error(), Some(&QueryError::Status(503)));
    }
}
