//! Response body lifecycle tracking.
//!
//! [`TrackedBody`] forwards every frame of the inner body unchanged while
//! counting data bytes, and runs its finisher exactly once: on end of
//! stream, on a read error, or when the body is dropped (the caller closing
//! it early). The finisher is owned by the body and consumed on first use,
//! so concurrent or repeated triggers cannot fire it twice.

use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Buf;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

/// How the body stopped being consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEnd {
    /// The inner body reported end of stream.
    Eof,
    /// Reading failed with this message.
    Error(String),
    /// Dropped before reaching the end.
    Closed,
}

/// What a finisher learns about the consumed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyOutcome {
    /// Data bytes handed to the consumer.
    pub bytes_read: u64,
    pub end: BodyEnd,
}

/// Completion callback registered by a layer.
pub type Finisher = Box<dyn FnOnce(BodyOutcome) + Send>;

pin_project! {
    /// A body that reports its own completion.
    pub struct TrackedBody<B> {
        #[pin]
        inner: B,
        bytes_read: u64,
        finisher: Option<Finisher>,
    }

    impl<B> PinnedDrop for TrackedBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(finish) = this.finisher.take() {
                finish(BodyOutcome {
                    bytes_read: *this.bytes_read,
                    end: BodyEnd::Closed,
                });
            }
        }
    }
}

impl<B> TrackedBody<B> {
    pub fn new(inner: B, finisher: Finisher) -> Self {
        Self {
            inner,
            bytes_read: 0,
            finisher: Some(finisher),
        }
    }

    /// Wrap without a finisher; frames pass through untouched.
    pub fn untracked(inner: B) -> Self {
        Self {
            inner,
            bytes_read: 0,
            finisher: None,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Whether the finisher is still pending.
    pub fn is_tracking(&self) -> bool {
        self.finisher.is_some()
    }

    pub fn get_ref(&self) -> &B {
        &self.inner
    }
}

impl<B> Body for TrackedBody<B>
where
    B: Body,
    B::Error: fmt::Display,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let result = ready!(this.inner.as_mut().poll_frame(cx));

        let end = match &result {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    *this.bytes_read = this.bytes_read.saturating_add(data.remaining() as u64);
                }
                this.inner.is_end_stream().then_some(BodyEnd::Eof)
            }
            Some(Err(err)) => Some(BodyEnd::Error(err.to_string())),
            None => Some(BodyEnd::Eof),
        };

        if let Some(end) = end {
            if let Some(finish) = this.finisher.take() {
                finish(BodyOutcome {
                    bytes_read: *this.bytes_read,
                    end,
                });
            }
        }

        Poll::Ready(result)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: fmt::Debug> fmt::Debug for TrackedBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedBody")
            .field("inner", &self.inner)
            .field("bytes_read", &self.bytes_read)
            .field("tracking", &self.is_tracking())
            .finish()
    }
}
