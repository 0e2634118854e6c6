//! Pumps upstream SSE lines to the client while rebuilding the completion.
//!
//! A producer task reads the upstream, feeds the accumulator and forwards
//! every line into a bounded channel; the consumer is the response body
//! itself. Once the producer sees `[DONE]` or EOF it runs the finisher with
//! the rebuilt completion, whether or not the client is still reading.
//! Dropping the body before that closes the channel, which stops the
//! producer, drops the upstream connection and reports the turn abandoned.

use std::{future::Future, pin::Pin, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use inference_providers::{ChatCompletionResponse, ChatMessage, CompletionError, LineStream, SseLine};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::completions::{accumulator::CompletionAccumulator, tokens::TokenEstimator};

/// Frames buffered between the upstream reader and the client writer.
pub const CHANNEL_CAPACITY: usize = 100;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, CompletionError>> + Send>>;

/// Formats a JSON value as a standalone `data: {...}\n\n` event.
pub fn data_frame<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    let mut frame = BytesMut::with_capacity(json.len() + 8);
    frame.put_slice(b"data: ");
    frame.put_slice(&json);
    frame.put_slice(b"\n\n");
    Ok(frame.freeze())
}

/// Formats a named `event: <name>\ndata: {...}\n\n` event.
pub fn event_frame<T: Serialize>(event: &str, value: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    let mut frame = BytesMut::with_capacity(event.len() + json.len() + 16);
    frame.put_slice(b"event: ");
    frame.put_slice(event.as_bytes());
    frame.put_u8(b'\n');
    frame.put_slice(b"data: ");
    frame.put_slice(&json);
    frame.put_slice(b"\n\n");
    Ok(frame.freeze())
}

fn line_frame(line: &SseLine) -> Bytes {
    let raw = line.as_bytes();
    let mut frame = BytesMut::with_capacity(raw.len() + 1);
    frame.put_slice(raw);
    frame.put_u8(b'\n');
    frame.freeze()
}

/// How the upstream read ended, as handed to the finisher.
#[derive(Debug)]
pub enum StreamEnd {
    /// `[DONE]` or EOF was read; carries the rebuilt completion
    Completed(ChatCompletionResponse),
    Failed(CompletionError),
    /// The client went away before the upstream finished
    Abandoned,
}

type StreamMessage = Result<Bytes, CompletionError>;

/// Reads the upstream, accumulating every line and forwarding what
/// `transform` makes of it, then runs `finish` with the outcome. A frame
/// returned by `finish` is the last thing the body yields; the sender is held
/// until then so the body ends after the turn is saved.
fn spawn_producer<F, Fut, M>(
    mut upstream: LineStream,
    meta: StreamMeta,
    estimator: Arc<dyn TokenEstimator>,
    finish: F,
    mut transform: M,
) -> mpsc::Receiver<StreamMessage>
where
    F: FnOnce(StreamEnd) -> Fut + Send + 'static,
    Fut: Future<Output = Option<Bytes>> + Send + 'static,
    M: FnMut(&SseLine) -> Option<Bytes> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut accumulator = CompletionAccumulator::new();
        let finished = loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => break Ok(false),
                next = upstream.next() => next,
            };
            match next {
                Some(Ok(line)) => {
                    accumulator.push_line(&line);
                    let done = line.is_done();
                    let sent = match transform(&line) {
                        Some(frame) => tx.send(Ok(frame)).await.is_ok(),
                        None => !tx.is_closed(),
                    };
                    if done || !sent {
                        break Ok(done);
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Upstream stream failed");
                    break Err(e);
                }
                None => break Ok(!tx.is_closed()),
            }
        };

        let (end, error) = match finished {
            Ok(true) => {
                if accumulator.skipped() > 0 {
                    debug!(skipped = accumulator.skipped(), "Some stream chunks could not be parsed");
                }
                let response = accumulator.finish(
                    &meta.completion_id,
                    &meta.model,
                    &meta.prompt,
                    estimator.as_ref(),
                );
                (StreamEnd::Completed(response), None)
            }
            Ok(false) => {
                debug!(completion_id = %meta.completion_id, "Stream consumer went away, closing upstream");
                (StreamEnd::Abandoned, None)
            }
            Err(e) => (StreamEnd::Failed(e.clone()), Some(e)),
        };

        if let Some(trailer) = finish(end).await {
            let _ = tx.send(Ok(trailer)).await;
        }
        if let Some(e) = error {
            let _ = tx.send(Err(e)).await;
        }
        drop(tx);
    });
    rx
}

/// What the engine needs to rebuild the completion.
#[derive(Debug, Clone)]
pub struct StreamMeta {
    /// ID given to the rebuilt completion
    pub completion_id: String,
    pub model: String,
    pub prompt: Vec<ChatMessage>,
}

#[derive(Clone)]
pub struct StreamingEngine {
    estimator: Arc<dyn TokenEstimator>,
}

impl StreamingEngine {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    /// Returns the client body: `leading` (if any) followed by every upstream
    /// line plus `\n`. `finish` always learns how the upstream ended; when it
    /// read `[DONE]` or EOF the rebuilt completion is passed even if the
    /// client has already gone. Upstream errors end the body with an error
    /// after any frame `finish` returned.
    pub fn run<F, Fut>(
        &self,
        upstream: LineStream,
        leading: Option<Bytes>,
        meta: StreamMeta,
        finish: F,
    ) -> ByteStream
    where
        F: FnOnce(StreamEnd) -> Fut + Send + 'static,
        Fut: Future<Output = Option<Bytes>> + Send + 'static,
    {
        self.run_mapped(upstream, leading, meta, finish, |line| Some(line_frame(line)))
    }

    /// Like [`run`](Self::run) but each upstream line is rewritten by
    /// `transform` before it reaches the client. Lines mapped to `None` are
    /// dropped. `transform` and `finish` run in order on the same task, so
    /// state shared between them sees every line before the finish.
    pub fn run_mapped<F, Fut, M>(
        &self,
        upstream: LineStream,
        leading: Option<Bytes>,
        meta: StreamMeta,
        finish: F,
        transform: M,
    ) -> ByteStream
    where
        F: FnOnce(StreamEnd) -> Fut + Send + 'static,
        Fut: Future<Output = Option<Bytes>> + Send + 'static,
        M: FnMut(&SseLine) -> Option<Bytes> + Send + 'static,
    {
        let mut rx = spawn_producer(upstream, meta, self.estimator.clone(), finish, transform);

        Box::pin(async_stream::stream! {
            if let Some(leading) = leading {
                yield Ok(leading);
            }
            while let Some(message) = rx.recv().await {
                let failed = message.is_err();
                yield message;
                if failed {
                    return;
                }
            }
        })
    }
}
