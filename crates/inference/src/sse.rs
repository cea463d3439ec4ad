//! SSE plumbing for the llama.cpp server protocol.
//!
//! The server streams generation as `data:`-prefixed JSON lines
//! delimited by `\n\n`. [`take_event_payloads`] splits complete events
//! off a receive buffer; [`sse_token_stream`] turns a
//! `reqwest::Response` plus a payload parser into a token stream.

use sy_domain::events::BoxStream;
use sy_domain::{Error, Result};

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    Error::Http(e.to_string())
}

/// One parsed `data:` payload: zero or more tokens, plus whether the
/// server signalled end of generation.
pub(crate) struct ParsedChunk {
    pub tokens: Vec<String>,
    pub stop: bool,
}

/// Split complete SSE events off the front of `buffer` and return their
/// `data:` payloads in order.
///
/// An event ends at `\n\n`; whatever follows the last complete event
/// (typically a partial event cut mid-chunk) stays buffered for the
/// next network read. `event:`/`id:`/`retry:` lines are ignored.
pub(crate) fn take_event_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(boundary) = buffer.find("\n\n") {
        let remainder = buffer.split_off(boundary + 2);
        let event = std::mem::replace(buffer, remainder);

        payloads.extend(
            event
                .lines()
                .filter_map(|line| line.trim_start().strip_prefix("data:"))
                .map(str::trim)
                .filter(|payload| !payload.is_empty())
                .map(str::to_owned),
        );
    }

    payloads
}

/// Build a token stream from an SSE response and a payload parser.
///
/// The stream ends when the parser reports `stop`, when the body closes
/// (after flushing any partial trailing event), or on the first error.
pub(crate) fn sse_token_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<String>>
where
    F: FnMut(&str) -> Result<ParsedChunk> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for payload in take_event_payloads(&mut buffer) {
                        match parse_data(&payload) {
                            Ok(chunk) => {
                                for token in chunk.tokens {
                                    yield Ok(token);
                                }
                                if chunk.stop {
                                    return;
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                }
                Ok(None) => {
                    // Body closed -- flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for payload in take_event_payloads(&mut buffer) {
                            match parse_data(&payload) {
                                Ok(chunk) => {
                                    for token in chunk.tokens {
                                        yield Ok(token);
                                    }
                                    if chunk.stop {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                    }
                    return;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    return;
                }
            }
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_complete_event() {
        let mut buf = String::from("data: {\"content\":\"hi\"}\n\n");
        let payloads = take_event_payloads(&mut buf);
        assert_eq!(payloads, vec!["{\"content\":\"hi\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_events_in_one_read() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let payloads = take_event_payloads(&mut buf);
        assert_eq!(payloads, vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_event_stays_buffered() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let payloads = take_event_payloads(&mut buf);
        assert_eq!(payloads, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut buf = String::from("event: ping\nid: 42\ndata: payload\n\n");
        let payloads = take_event_payloads(&mut buf);
        assert_eq!(payloads, vec!["payload"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn buffered_remainder_completes_on_next_read() {
        let mut buf = String::from("data: chunk1");
        assert!(take_event_payloads(&mut buf).is_empty());
        assert_eq!(buf, "data: chunk1");

        buf.push_str("\n\ndata: chunk2\n\n");
        let payloads = take_event_payloads(&mut buf);
        assert_eq!(payloads, vec!["chunk1", "chunk2"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_data_payloads_are_dropped() {
        let mut buf = String::from("data: \n\n");
        assert!(take_event_payloads(&mut buf).is_empty());
        assert!(buf.is_empty());
    }
}
