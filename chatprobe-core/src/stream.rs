//! Decoding of streamed chat-completion bodies.
//!
//! The body is a sequence of lines. Lines of the form `data: <json>` carry one
//! chunk each; `data: [DONE]` ends the stream. Everything else (blank lines,
//! `event:` lines, comments, unparseable payloads, chunks without text) is
//! skipped without failing the decode.
//!
//! [`decode_frame`] handles one line. [`ContentIncrements`] drives it over any
//! iterator of lines, [`ContentStream`] over the line stream of an HTTP body.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use serde_json::Value;

use crate::error::CoreResult;
use crate::http_client::SseStream;
use crate::model::{StopReason, first_choice};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Result of decoding a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing to emit; keep reading.
    Skip,
    /// A well-formed chunk. `content` is `Some` only for non-empty text.
    Delta {
        content: Option<String>,
        stop_reason: Option<StopReason>,
    },
    /// The `[DONE]` sentinel; stop reading.
    Done,
}

impl FrameOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn into_content(self) -> Option<String> {
        match self {
            Self::Delta { content, .. } => content,
            _ => None,
        }
    }
}

/// Decode one line of a streamed body.
pub fn decode_frame(line: &str) -> FrameOutcome {
    if line.trim().is_empty() {
        return FrameOutcome::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        tracing::trace!(line, "skipping non-data line");
        return FrameOutcome::Skip;
    };
    if payload.trim() == DONE_SENTINEL {
        return FrameOutcome::Done;
    }
    let chunk: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed data payload");
            return FrameOutcome::Skip;
        }
    };
    let Some(choice) = first_choice(&chunk) else {
        return FrameOutcome::Delta {
            content: None,
            stop_reason: None,
        };
    };
    let content = choice
        .get("delta")
        .and_then(Value::as_object)
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let stop_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(StopReason::from_finish);
    FrameOutcome::Delta {
        content,
        stop_reason,
    }
}

/// Bookkeeping shared by the sync and async drivers.
#[derive(Debug, Default, Clone)]
struct DecodeState {
    finished: bool,
    saw_sentinel: bool,
    stop_reason: Option<StopReason>,
}

impl DecodeState {
    /// Feed one line; returns the increment to emit, if any.
    fn feed(&mut self, line: &str) -> Option<String> {
        match decode_frame(line) {
            FrameOutcome::Skip => None,
            FrameOutcome::Done => {
                self.finished = true;
                self.saw_sentinel = true;
                None
            }
            FrameOutcome::Delta {
                content,
                stop_reason,
            } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                content
            }
        }
    }
}

/// Lazy iterator of content increments over lines of text.
///
/// Stops at the first `[DONE]` or when the lines run out; lines after the
/// sentinel are never pulled from the underlying iterator.
pub struct ContentIncrements<I> {
    lines: I,
    state: DecodeState,
}

impl<I> ContentIncrements<I> {
    /// Whether the `[DONE]` sentinel has been seen.
    pub fn saw_sentinel(&self) -> bool {
        self.state.saw_sentinel
    }

    /// Last `finish_reason` seen so far.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.state.stop_reason
    }
}

/// Decode an iterator of lines into content increments.
pub fn decode_lines<I>(lines: I) -> ContentIncrements<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    ContentIncrements {
        lines: lines.into_iter(),
        state: DecodeState::default(),
    }
}

impl<I> Iterator for ContentIncrements<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.state.finished {
            let Some(line) = self.lines.next() else {
                self.state.finished = true;
                break;
            };
            if let Some(text) = self.state.feed(line.as_ref()) {
                return Some(text);
            }
        }
        None
    }
}

impl<I> std::iter::FusedIterator for ContentIncrements<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
}

/// Async stream of content increments over an HTTP body's lines.
///
/// A transport error while reading the body is yielded once as `Err`, after
/// which the stream is finished.
pub struct ContentStream {
    lines: SseStream,
    state: DecodeState,
}

impl ContentStream {
    pub fn new(lines: SseStream) -> Self {
        Self {
            lines,
            state: DecodeState::default(),
        }
    }

    pub fn saw_sentinel(&self) -> bool {
        self.state.saw_sentinel
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.state.stop_reason
    }
}

impl Stream for ContentStream {
    type Item = CoreResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.state.finished {
                return Poll::Ready(None);
            }
            match self.lines.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Some(text) = self.state.feed(&frame.line) {
                        return Poll::Ready(Some(Ok(text)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.state.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.state.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
