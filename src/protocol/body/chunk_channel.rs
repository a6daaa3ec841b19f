//! A demand-gated chunk pipe between one producer and one consumer.
//!
//! The pipe is a thin shell around [`TransferService`]: the consumer side
//! ([`ChunkStream`]) raises demand one chunk at a time as it is polled, the
//! producer side ([`BodySink`]) parks until that demand goes unmet and only
//! then feeds the next item. Nothing is buffered ahead of demand, which is
//! what keeps a slow handler from pulling the whole request body off the
//! socket.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::Notify;

use crate::protocol::{HttpError, PayloadItem};
use crate::util::TransferService;

type Item = Result<PayloadItem, HttpError>;

struct Core {
    /// Items the producer has queued, normally at most one thanks to the
    /// demand gating in `BodySink::ready`.
    queue: Mutex<VecDeque<Item>>,
    /// The delivery slot the consumer drains.
    slot: Mutex<Option<Item>>,
    waker: Mutex<Option<Waker>>,
    /// Consumer has raised demand that has not been delivered yet.
    pulled: AtomicBool,
    /// Signalled when a transfer attempt found demand but no queued item.
    starved: Notify,
}

impl Core {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            slot: Mutex::new(None),
            waker: Mutex::new(None),
            pulled: AtomicBool::new(false),
            starved: Notify::new(),
        }
    }
}

/// Creates a connected sink/stream pair.
pub fn chunk_channel() -> (BodySink, ChunkStream) {
    build(None)
}

/// Like [`chunk_channel`], with a callback that runs exactly once, right
/// before the consumer receives the first chunk.
pub(crate) fn chunk_channel_with_before_first<F>(before_first: F) -> (BodySink, ChunkStream)
where
    F: FnOnce() + Send + 'static,
{
    build(Some(Box::new(before_first)))
}

fn build(before_first: Option<Box<dyn FnOnce() + Send>>) -> (BodySink, ChunkStream) {
    let core = Arc::new(Core::new());

    let produce = {
        let core = core.clone();
        move || {
            let item = lock(&core.queue).pop_front();
            if item.is_none() {
                // demand exists (we only get pulled under demand) but the
                // producer has nothing; wake the feeding side
                core.starved.notify_one();
            }
            item
        }
    };
    let consume = {
        let core = core.clone();
        move |item: Item| {
            *lock(&core.slot) = Some(item);
            core.pulled.store(false, Ordering::Release);
            if let Some(waker) = lock(&core.waker).take() {
                waker.wake();
            }
        }
    };

    let service = Arc::new(match before_first {
        Some(callback) => TransferService::with_before_first(produce, consume, callback),
        None => TransferService::new(produce, consume),
    });

    (
        BodySink { core: core.clone(), service: service.clone(), ended: false },
        ChunkStream { core, service, done: false },
    )
}

/// Producer half of the chunk pipe.
///
/// Dropping the sink without having signalled the end of the stream
/// completes the consumer with [`HttpError::EndOfStream`], which is how
/// cancellation becomes observable to a handler mid-body.
pub struct BodySink {
    core: Arc<Core>,
    service: Arc<TransferService<Item>>,
    ended: bool,
}

impl BodySink {
    /// Resolves when the consumer has unmet demand (or the pipe finished),
    /// meaning the next [`send`](Self::send) will be delivered right away.
    pub async fn ready(&self) {
        loop {
            if self.service.is_finished() {
                return;
            }
            if self.service.has_demand() && lock(&self.core.queue).is_empty() {
                return;
            }
            self.core.starved.notified().await;
        }
    }

    /// Whether the consumer side has gone away.
    pub fn is_finished(&self) -> bool {
        self.service.is_finished()
    }

    pub fn send(&mut self, bytes: Bytes) {
        self.push(Ok(PayloadItem::Chunk(bytes)));
    }

    /// Signals a normal end of the chunk sequence.
    pub fn send_eof(&mut self) {
        self.ended = true;
        self.push(Ok(PayloadItem::Eof));
    }

    /// Completes the consumer with an error.
    pub fn fail(&mut self, error: HttpError) {
        self.ended = true;
        self.push(Err(error));
    }

    fn push(&self, item: Item) {
        lock(&self.core.queue).push_back(item);
        self.service.try_transfer();
    }
}

impl Drop for BodySink {
    fn drop(&mut self) {
        if !self.ended {
            self.push(Err(HttpError::EndOfStream));
        }
    }
}

/// Consumer half of the chunk pipe; a stream of body chunks.
pub struct ChunkStream {
    core: Arc<Core>,
    service: Arc<TransferService<Item>>,
    done: bool,
}

impl ChunkStream {
    fn take_delivered(&mut self) -> Option<Poll<Option<Result<Bytes, HttpError>>>> {
        let item = lock(&self.core.slot).take()?;
        Some(match item {
            Ok(PayloadItem::Chunk(bytes)) => Poll::Ready(Some(Ok(bytes))),
            Ok(PayloadItem::Eof) => {
                self.done = true;
                Poll::Ready(None)
            }
            Err(error) => {
                self.done = true;
                Poll::Ready(Some(Err(error)))
            }
        })
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes, HttpError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(ready) = this.take_delivered() {
                return ready;
            }

            *lock(&this.core.waker) = Some(cx.waker().clone());

            // raise demand once per outstanding pull; deliveries may happen
            // synchronously on this very thread, so re-check the slot
            if !this.core.pulled.swap(true, Ordering::AcqRel) {
                this.service.increase_demand(1);
            } else {
                this.service.try_transfer();
            }

            if lock(&this.core.slot).is_none() {
                return Poll::Pending;
            }
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        // stop deliveries and unpark the producer so it can observe the end
        let core = self.core.clone();
        self.service.finish(move || core.starved.notify_one());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn chunks_flow_in_order() {
        let (mut sink, mut stream) = chunk_channel();

        let feeder = tokio::spawn(async move {
            for chunk in [&b"hello"[..], &b" "[..], &b"world"[..]] {
                sink.ready().await;
                sink.send(Bytes::from_static(chunk));
            }
            sink.ready().await;
            sink.send_eof();
        });

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.push(chunk.unwrap());
        }
        assert_eq!(collected, vec![Bytes::from_static(b"hello"), Bytes::from_static(b" "), Bytes::from_static(b"world")]);

        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn producer_parks_until_the_consumer_pulls() {
        let (sink, mut stream) = chunk_channel();

        // nothing demanded yet: ready() must not resolve
        tokio::select! {
            _ = sink.ready() => panic!("ready without demand"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }

        let mut sink = sink;
        let feeder = tokio::spawn(async move {
            sink.ready().await;
            sink.send(Bytes::from_static(b"x"));
            sink.ready().await;
            sink.send_eof();
        });

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"x"));
        assert!(stream.next().await.is_none());
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_sink_fails_the_stream() {
        let (sink, mut stream) = chunk_channel();
        drop(sink);

        match stream.next().await {
            Some(Err(HttpError::EndOfStream)) => {}
            other => panic!("expected end-of-stream error, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn failed_sink_surfaces_the_error() {
        let (mut sink, mut stream) = chunk_channel();
        sink.fail(HttpError::BodyTimeout);

        assert!(matches!(stream.next().await, Some(Err(HttpError::BodyTimeout))));
    }

    #[tokio::test]
    async fn dropped_stream_finishes_the_sink() {
        let (sink, stream) = chunk_channel();
        drop(stream);

        sink.ready().await;
        assert!(sink.is_finished());
    }

    #[tokio::test]
    async fn before_first_fires_on_first_pull_only() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let (mut sink, mut stream) = chunk_channel_with_before_first(move || {
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!fired.load(Ordering::SeqCst));

        let feeder = tokio::spawn(async move {
            sink.ready().await;
            sink.send(Bytes::from_static(b"a"));
            sink.ready().await;
            sink.send_eof();
        });

        stream.next().await.unwrap().unwrap();
        assert!(fired.load(Ordering::SeqCst));

        feeder.await.unwrap();
    }
}
