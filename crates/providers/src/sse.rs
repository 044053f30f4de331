//! Server-sent-event plumbing shared by provider adapters.
//!
//! An adapter hands [`sse_event_stream`] the HTTP response plus a
//! parser closure for its `data:` payloads; buffering, event splitting,
//! and the trailing-flush/fallback-Done behaviour live here.

use valet_domain::error::{Error, Result};
use valet_domain::stream::{BoxStream, StreamEvent};

/// Accumulates raw chunks and yields complete `data:` payloads.
///
/// SSE frames are delimited by a blank line; a frame may carry
/// `event:`, `id:`, or `retry:` lines which are ignored here.
#[derive(Default)]
pub(crate) struct EventBuffer {
    buf: String,
}

impl EventBuffer {
    /// Feed a chunk of bytes; returns the `data:` payloads of every
    /// frame completed by it. Partial frames stay buffered.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let frame: String = self.buf.drain(..pos + 2).collect();
            for line in frame.lines() {
                if let Some(data) = line.trim().strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_string());
                    }
                }
            }
        }
        payloads
    }

    /// Treat whatever is left as a final frame (stream closed without a
    /// trailing blank line).
    pub(crate) fn flush(&mut self) -> Vec<String> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            return Vec::new();
        }
        self.push(b"\n\n")
    }
}

/// Build a [`BoxStream`] of [`StreamEvent`]s from an SSE response.
///
/// `parse_data` is `FnMut` because adapters keep assembly state across
/// payloads (tool-call buffers). If the parser never emits a `Done`
/// event, one is synthesised when the body closes.
pub(crate) fn sse_event_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = EventBuffer::default();
        let mut done_emitted = false;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    return;
                }
            };
            for payload in buffer.push(&chunk) {
                for event in parse_data(&payload) {
                    done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        for payload in buffer.flush() {
            for event in parse_data(&payload) {
                done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                yield event;
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done { stop_reason: None });
        }
    };

    Box::pin(stream)
}
