//! Message bodies as lazy, demand-driven chunk sequences.
//!
//! Both directions run over the same primitive: a [`chunk_channel`] whose
//! deliveries are gated by consumer demand (see [`crate::util::TransferService`]).
//! On the request side the connection feeds the sink as the handler polls
//! the stream; on the response side a handler may feed the sink while the
//! connection drains the stream onto the socket.

mod chunk_channel;

pub use chunk_channel::{chunk_channel, BodySink, ChunkStream};

pub(crate) use chunk_channel::chunk_channel_with_before_first;

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::protocol::{HttpError, PayloadSize};

/// The request body: a lazy chunk sequence observable by at most one
/// subscriber.
pub struct RequestBody {
    inner: RequestBodyRepr,
}

enum RequestBodyRepr {
    NoBody,
    Stream(ChunkStream),
}

impl RequestBody {
    pub(crate) fn empty() -> Self {
        Self { inner: RequestBodyRepr::NoBody }
    }

    pub(crate) fn stream(stream: ChunkStream) -> Self {
        Self { inner: RequestBodyRepr::Stream(stream) }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.inner, RequestBodyRepr::NoBody)
    }

    /// Collects the whole body into one buffer.
    pub async fn bytes(mut self) -> Result<Bytes, HttpError> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected.freeze())
    }
}

impl Stream for RequestBody {
    type Item = Result<Bytes, HttpError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().inner {
            RequestBodyRepr::NoBody => Poll::Ready(None),
            RequestBodyRepr::Stream(stream) => stream.poll_next_unpin(cx),
        }
    }
}

/// The response body a handler hands to the pipeline.
pub struct ResponseBody {
    inner: ResponseBodyRepr,
}

enum ResponseBodyRepr {
    Empty,
    Full(Bytes),
    Stream(ChunkStream),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: ResponseBodyRepr::Empty }
    }

    pub fn full(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self { inner: ResponseBodyRepr::Full(bytes) }
        }
    }

    /// A body produced lazily through a [`chunk_channel`]. Its length is
    /// unknown up front, so the response is written end-of-stream delimited
    /// and the connection closes after it.
    pub fn stream(stream: ChunkStream) -> Self {
        Self { inner: ResponseBodyRepr::Stream(stream) }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.inner, ResponseBodyRepr::Empty)
    }

    /// The declared size of this body.
    pub fn payload_size(&self) -> PayloadSize {
        match &self.inner {
            ResponseBodyRepr::Empty => PayloadSize::Empty,
            ResponseBodyRepr::Full(bytes) => PayloadSize::Length(bytes.len() as u64),
            ResponseBodyRepr::Stream(_) => PayloadSize::Unknown,
        }
    }

    /// Next chunk of the body; `None` when the body ends.
    pub(crate) async fn next_chunk(&mut self) -> Option<Result<Bytes, HttpError>> {
        match &mut self.inner {
            ResponseBodyRepr::Empty => None,
            ResponseBodyRepr::Full(bytes) => {
                let chunk = bytes.clone();
                self.inner = ResponseBodyRepr::Empty;
                Some(Ok(chunk))
            }
            ResponseBodyRepr::Stream(stream) => stream.next().await,
        }
    }
}

impl From<()> for ResponseBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::full(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::full(Bytes::from(bytes))
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::full(Bytes::from(value))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::full(Bytes::from_static(value.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_request_body_ends_immediately() {
        let mut body = RequestBody::empty();
        assert!(body.is_empty());
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn request_body_collects_chunks() {
        let (mut sink, stream) = chunk_channel();
        let feeder = tokio::spawn(async move {
            for chunk in [&b"Hello"[..], &b" "[..], &b"World"[..]] {
                sink.ready().await;
                sink.send(Bytes::from_static(chunk));
            }
            sink.ready().await;
            sink.send_eof();
        });

        let body = RequestBody::stream(stream);
        assert_eq!(body.bytes().await.unwrap(), Bytes::from_static(b"Hello World"));
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn full_response_body_yields_once() {
        let mut body = ResponseBody::from("Done!");
        assert_eq!(body.payload_size(), PayloadSize::Length(5));
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), Bytes::from_static(b"Done!"));
        assert!(body.next_chunk().await.is_none());
    }

    #[test]
    fn empty_strings_make_empty_bodies() {
        assert!(ResponseBody::from("").is_empty());
        assert_eq!(ResponseBody::from("").payload_size(), PayloadSize::Empty);
    }
}
