//! Server-sent event decoding for `stream: true` calls.
//!
//! The body arrives in arbitrary chunks. [`FrameDecoder`] reassembles them into
//! blank-line terminated records and [`EventStream`] turns each `data:` record
//! into a typed partial result, one record at a time, in arrival order.

use std::{
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;
use futures_util::{StreamExt, stream};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{Error, Result},
    http::ResponseMetadata,
    telemetry::StreamTelemetry,
    types::ApiResponse,
};

/// Payload that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One record of the event-stream protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// The joined `data:` lines of a record.
    Data(String),
    /// The terminal `data: [DONE]` record.
    Done,
    /// A record with no data (comments, keep-alives, bare `event:` lines).
    Empty,
}

/// Incremental record splitter.
///
/// Bytes are buffered until a blank line completes a record, so records may
/// span any number of chunks, including splits inside a multi-byte character.
/// Each push only rescans the tail a terminator could straddle.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Bytes already searched without finding a terminator.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete record, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        // The longest terminator is 4 bytes, so at most 3 of them can precede the
        // unscanned tail.
        let from = self.scanned.saturating_sub(3);
        let Some((end, separator)) = find_record_end(&self.buffer, from) else {
            self.scanned = self.buffer.len();
            return None;
        };
        let record: Vec<u8> = self.buffer.drain(..end + separator).take(end).collect();
        self.scanned = 0;
        Some(parse_record(&record))
    }

    /// Flush a trailing record left unterminated at end of body.
    pub fn finish(&mut self) -> Option<Frame> {
        self.scanned = 0;
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            return None;
        }
        let record = std::mem::take(&mut self.buffer);
        Some(parse_record(&record))
    }
}

fn find_record_end(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if rest.starts_with(b"\n\r\n") {
            Some((i, 3))
        } else {
            None
        }
    })
}

fn parse_record(record: &[u8]) -> Frame {
    let text = String::from_utf8_lossy(record);
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // `event:`, `id:`, `retry:` and `:` comments carry nothing we decode.
    }

    let data = data_lines.join("\n");
    let trimmed = data.trim();
    if trimmed.is_empty() {
        Frame::Empty
    } else if trimmed == DONE_SENTINEL {
        Frame::Done
    } else {
        Frame::Data(data)
    }
}

enum Step<T> {
    Yield(T),
    Skip,
    Close,
}

fn decode_frame<T: DeserializeOwned>(frame: Frame) -> Step<T> {
    match frame {
        Frame::Done => Step::Close,
        Frame::Empty => Step::Skip,
        Frame::Data(data) => match serde_json::from_str::<T>(&data) {
            Ok(value) => Step::Yield(value),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    error = %_err,
                    record = %truncate_for_log(&data, 200),
                    "skipping undecodable stream record"
                );
                Step::Skip
            }
        },
    }
}

#[cfg(feature = "tracing")]
fn truncate_for_log(data: &str, max_len: usize) -> String {
    if data.len() <= max_len {
        return data.to_string();
    }
    let mut end = max_len;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &data[..end], data.len())
}

/// A forward-only, cancellable sequence of typed partial results.
///
/// Ends after the `[DONE]` record, when the body closes, or when cancelled.
/// Undecodable records are skipped. A transport failure is yielded once and
/// ends the sequence.
pub struct EventStream<T> {
    metadata: ResponseMetadata,
    stream: Pin<Box<dyn Stream<Item = Result<T>> + Send>>,
    cancel: CancellationToken,
}

struct DecodeState<S, T> {
    body: Pin<Box<S>>,
    decoder: FrameDecoder,
    cancel: CancellationToken,
    telemetry: Option<StreamTelemetry>,
    body_done: bool,
    closed: bool,
    _item: PhantomData<fn() -> T>,
}

impl<S, T> DecodeState<S, T> {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            #[cfg(feature = "tracing")]
            tracing::debug!(cancelled = self.cancel.is_cancelled(), "event stream closed");
            if let Some(t) = self.telemetry.as_ref() {
                t.on_closed();
            }
        }
    }
}

impl<T> EventStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Decode an event stream from the body of an HTTP response.
    pub(crate) fn from_response(
        response: reqwest::Response,
        cancel: CancellationToken,
        telemetry: Option<StreamTelemetry>,
    ) -> Self {
        let metadata = ResponseMetadata::from_headers(response.headers());
        Self::build(response.bytes_stream(), metadata, cancel, telemetry)
    }

    /// Decode an event stream from any chunked byte source.
    pub fn from_byte_stream<S, B, E>(
        body: S,
        metadata: ResponseMetadata,
        cancel: CancellationToken,
    ) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<Error> + Send + 'static,
    {
        Self::build(body, metadata, cancel, None)
    }

    fn build<S, B, E>(
        body: S,
        metadata: ResponseMetadata,
        cancel: CancellationToken,
        telemetry: Option<StreamTelemetry>,
    ) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<Error> + Send + 'static,
    {
        let state = DecodeState::<S, T> {
            body: Box::pin(body),
            decoder: FrameDecoder::new(),
            cancel: cancel.clone(),
            telemetry,
            body_done: false,
            closed: false,
            _item: PhantomData,
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if state.closed {
                    return None;
                }
                if state.cancel.is_cancelled() {
                    state.close();
                    return None;
                }

                let frame = if state.body_done {
                    state.decoder.finish()
                } else {
                    state.decoder.next_frame()
                };
                if let Some(frame) = frame {
                    match decode_frame::<T>(frame) {
                        Step::Yield(value) => {
                            if let Some(t) = state.telemetry.as_ref() {
                                t.on_event();
                            }
                            return Some((Ok(value), state));
                        }
                        Step::Skip => continue,
                        Step::Close => {
                            state.close();
                            return None;
                        }
                    }
                }
                if state.body_done {
                    state.close();
                    return None;
                }

                let next = tokio::select! {
                    biased;
                    _ = state.cancel.cancelled() => {
                        state.close();
                        return None;
                    }
                    next = state.body.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => state.decoder.push(chunk.as_ref()),
                    Some(Err(err)) => {
                        let err: Error = err.into();
                        if let Some(t) = state.telemetry.as_ref() {
                            t.on_error(&err);
                        }
                        state.close();
                        return Some((Err(err), state));
                    }
                    None => state.body_done = true,
                }
            }
        });

        Self {
            metadata,
            stream: Box::pin(stream),
            cancel,
        }
    }

    /// An already-ended sequence for a call cancelled before its response arrived.
    pub(crate) fn cancelled(cancel: CancellationToken) -> Self {
        cancel.cancel();
        Self {
            metadata: ResponseMetadata::default(),
            stream: Box::pin(stream::empty()),
            cancel,
        }
    }

    /// Stamp the response metadata onto every partial result.
    pub fn stamp_metadata(mut self) -> Self
    where
        T: ApiResponse,
    {
        let metadata = self.metadata.clone();
        let inner = std::mem::replace(&mut self.stream, Box::pin(stream::empty()));
        self.stream = Box::pin(inner.map(move |item| {
            item.map(|mut value| {
                *value.metadata_mut() = metadata.clone();
                value
            })
        }));
        self
    }

    /// Push-style consumption: call `f` for each partial result in order.
    pub async fn on_each(mut self, mut f: impl FnMut(T)) -> Result<()> {
        while let Some(item) = self.next().await {
            f(item?);
        }
        Ok(())
    }
}

impl<T> EventStream<T> {
    /// Metadata read from the response headers before the first record.
    pub fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }

    /// Stop reading. The sequence ends without yielding a partial record.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> Stream for EventStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}
