use crate::CompletionError;
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Initial line buffer size.
pub const INITIAL_LINE_BUFFER: usize = 12 * 1024;
/// Longest upstream line accepted before the stream is failed.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// A single upstream SSE line exactly as received, minus its `\n` terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseLine(Bytes);

impl SseLine {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Payload of a `data: ` line, without a trailing carriage return.
    pub fn data(&self) -> Option<&str> {
        let line = std::str::from_utf8(&self.0).ok()?;
        line.trim_end_matches('\r').strip_prefix(DATA_PREFIX)
    }

    pub fn is_done(&self) -> bool {
        self.data().is_some_and(|d| d.trim() == DONE_MARKER)
    }
}

/// Splits an upstream byte stream into lines without interpreting them.
///
/// At most one partial line is buffered. Bytes are never re-encoded, so the
/// concatenation of yielded lines (each followed by `\n`) equals the input.
pub struct SseLineParser<S> {
    inner: S,
    buffer: BytesMut,
    ready: VecDeque<SseLine>,
    finished: bool,
}

impl<S, E> SseLineParser<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: BytesMut::with_capacity(INITIAL_LINE_BUFFER),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    /// Moves every complete line from the buffer into the ready queue.
    fn split_lines(&mut self) -> Result<(), CompletionError> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            self.ready.push_back(SseLine(line.freeze()));
        }
        if self.buffer.len() > MAX_LINE_LENGTH {
            return Err(CompletionError::StreamInterrupted(format!(
                "upstream line exceeds {MAX_LINE_LENGTH} bytes"
            )));
        }
        Ok(())
    }
}

impl<S, E> Stream for SseLineParser<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SseLine, CompletionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                    if let Err(e) = self.split_lines() {
                        self.finished = true;
                        self.buffer.clear();
                        return Poll::Ready(Some(Err(e)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(CompletionError::StreamInterrupted(
                        e.to_string(),
                    ))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // Unterminated final line
                    if !self.buffer.is_empty() {
                        let rest = self.buffer.split();
                        self.ready.push_back(SseLine(rest.freeze()));
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
