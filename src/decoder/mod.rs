//! Frame decoder: raw response bytes to [`StreamEvent`]s.
//!
//! Two transport shapes are accepted and told apart structurally, never by
//! configuration: a body whose first non-whitespace character is `{` is one
//! complete JSON document (non-streaming), anything else is a sequence of
//! `data: <json>` lines closed by `data: [DONE]`.

pub mod frame;
pub mod text;
mod wire;

pub use frame::FrameDecoder;
pub use text::{LineBuffer, Utf8StreamDecoder};

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::error::Result;
use crate::transport::TurnCancellation;
use crate::types::{EventStream, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyShape {
    Document,
    Lines,
}

/// Incremental state for one response body.
#[derive(Debug, Default)]
struct BodyDecoder {
    utf8: Utf8StreamDecoder,
    lines: LineBuffer,
    frames: FrameDecoder,
    shape: Option<BodyShape>,
    // Text held back until the shape is known, or the whole document body.
    held: String,
}

impl BodyDecoder {
    fn is_finished(&self) -> bool {
        self.frames.is_done() || self.frames.is_terminated()
    }

    /// Feed one chunk. Decoding stops at the first error.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent>> {
        let text = self.utf8.push(bytes);
        self.feed_text(&text)
    }

    fn feed_text(&mut self, text: &str) -> Vec<Result<StreamEvent>> {
        match self.shape {
            Some(BodyShape::Document) => {
                self.held.push_str(text);
                Vec::new()
            }
            Some(BodyShape::Lines) => self.feed_lines(text),
            None => {
                self.held.push_str(text);
                let Some(first) = self.held.trim_start().chars().next() else {
                    return Vec::new();
                };
                if first == '{' {
                    debug!("response body is a single document");
                    self.shape = Some(BodyShape::Document);
                    Vec::new()
                } else {
                    self.shape = Some(BodyShape::Lines);
                    let held = std::mem::take(&mut self.held);
                    self.feed_lines(&held)
                }
            }
        }
    }

    fn feed_lines(&mut self, text: &str) -> Vec<Result<StreamEvent>> {
        let mut out = Vec::new();
        for line in self.lines.push(text) {
            match self.frames.decode_line(&line) {
                Ok(events) => out.extend(events.into_iter().map(Ok)),
                Err(e) => {
                    out.push(Err(e));
                    break;
                }
            }
            if self.is_finished() {
                break;
            }
        }
        out
    }

    /// Source exhausted: flush buffered text and close the stream.
    fn finish(&mut self) -> Vec<Result<StreamEvent>> {
        let tail = self.utf8.finish();
        let mut out = if tail.is_empty() { Vec::new() } else { self.feed_text(&tail) };
        if out.iter().any(|r| r.is_err()) || self.is_finished() {
            return out;
        }

        match self.shape {
            Some(BodyShape::Document) => {
                let body = std::mem::take(&mut self.held);
                match self.frames.decode_document(&body) {
                    Ok(events) => out.extend(events.into_iter().map(Ok)),
                    Err(e) => out.push(Err(e)),
                }
            }
            Some(BodyShape::Lines) | None => {
                if let Some(line) = self.lines.take_remainder() {
                    match self.frames.decode_line(&line) {
                        Ok(events) => out.extend(events.into_iter().map(Ok)),
                        Err(e) => {
                            out.push(Err(e));
                            return out;
                        }
                    }
                }
                match self.frames.finish_eof() {
                    Ok(events) => out.extend(events.into_iter().map(Ok)),
                    Err(e) => out.push(Err(e)),
                }
            }
        }
        out
    }
}

/// Decode a byte source into a lazy event stream.
///
/// The read loop observes `cancel` at every read; once cancelled the stream
/// ends quietly with neither an error nor a `finish`. Transport errors from
/// the source and framing errors end the stream after being yielded once.
pub fn decode_stream<S, B>(source: S, cancel: TurnCancellation) -> EventStream
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let events = async_stream::stream! {
        let mut source = std::pin::pin!(source);
        let mut body = BodyDecoder::default();

        loop {
            let chunk = match cancel.run(source.next()).await {
                None => {
                    debug!("decoder read loop cancelled");
                    return;
                }
                Some(None) => break,
                Some(Some(Err(e))) => {
                    yield Err(e);
                    return;
                }
                Some(Some(Ok(chunk))) => chunk,
            };

            for item in body.feed(chunk.as_ref()) {
                let failed = item.is_err();
                yield item;
                if failed {
                    return;
                }
            }
            if body.is_finished() {
                return;
            }
        }

        for item in body.finish() {
            let failed = item.is_err();
            yield item;
            if failed {
                return;
            }
        }
    };
    Box::pin(events)
}
