//! Streaming response bodies.
//!
//! # Design
//! A body is the receiving half of a single-producer, single-consumer
//! channel. The producer is a task spawned by the reconstructor that owns the
//! bytes the transport delivered and writes them into the channel. The
//! reader half is bound to the call scope:
//!
//! - a read that is parked on an empty channel also waits on the scope, so
//!   cancelling the scope fails it with [`Error::Cancelled`] right away;
//! - the producer stops writing once the scope is cancelled;
//! - reading to the end finishes the scope;
//! - dropping a body before the end cancels the scope.
//!
//! `ResponseBody` implements [`http_body::Body`], so the usual
//! `http-body-util` combinators work on it.

use std::fmt;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::scope::Scope;

/// Writing half of a body channel.
pub struct BodySender {
    tx: mpsc::Sender<Bytes>,
    scope: Scope,
}

impl BodySender {
    /// Send one chunk. Fails once the scope is cancelled or the reader is gone.
    pub async fn send(&self, chunk: Bytes) -> Result<(), Error> {
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(Error::Cancelled),
            sent = self.tx.send(chunk) => sent.map_err(|_| Error::Cancelled),
        }
    }
}

/// A response body, read chunk by chunk.
pub struct ResponseBody {
    rx: mpsc::Receiver<Bytes>,
    scope: Scope,
    cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
    done: bool,
}

impl ResponseBody {
    /// Create a body channel bound to `scope`.
    pub fn channel(scope: Scope, capacity: usize) -> (BodySender, ResponseBody) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let body = ResponseBody {
            rx,
            cancelled: Box::pin(scope.clone().cancelled_owned()),
            scope: scope.clone(),
            done: false,
        };
        (BodySender { tx, scope }, body)
    }

    /// The next chunk, `None` at the end of the body.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, Error>> {
        poll_fn(|cx| self.poll_chunk(cx)).await
    }

    /// Read the rest of the body into one buffer.
    pub async fn bytes(mut self) -> Result<Bytes, Error> {
        let mut single: Option<Bytes> = None;
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.chunk().await {
            let chunk = chunk?;
            if single.is_none() && collected.is_empty() {
                single = Some(chunk);
                continue;
            }
            if let Some(first) = single.take() {
                collected.extend_from_slice(&first);
            }
            collected.extend_from_slice(&chunk);
        }
        Ok(single.unwrap_or_else(|| collected.freeze()))
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, Error>>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.cancelled.as_mut().poll(cx).is_ready() {
            self.done = true;
            return Poll::Ready(Some(Err(Error::Cancelled)));
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(chunk) => Poll::Ready(Some(Ok(chunk))),
            None => {
                self.done = true;
                if self.scope.is_cancelled() {
                    Poll::Ready(Some(Err(Error::Cancelled)))
                } else {
                    self.scope.finish();
                    Poll::Ready(None)
                }
            }
        }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Error>>> {
        self.get_mut()
            .poll_chunk(cx)
            .map(|chunk| chunk.map(|result| result.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if !self.done {
            self.scope.cancel();
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("scope", &self.scope)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn reads_chunks_then_finishes_scope() {
        let root = Scope::root();
        let scope = root.child();
        let (tx, mut body) = ResponseBody::channel(scope.clone(), 4);

        tx.send(Bytes::from_static(b"he")).await.unwrap();
        tx.send(Bytes::from_static(b"llo")).await.unwrap();
        drop(tx);

        assert_eq!(body.chunk().await.unwrap().unwrap(), "he");
        assert_eq!(body.chunk().await.unwrap().unwrap(), "llo");
        assert!(body.chunk().await.is_none());
        assert!(!scope.is_cancelled());
        assert!(!scope.is_live());
        assert_eq!(root.live_children(), 0);
    }

    #[tokio::test]
    async fn cancel_unblocks_pending_read() {
        let root = Scope::root();
        let scope = root.child();
        let (tx, mut body) = ResponseBody::channel(scope.clone(), 1);

        let reader = tokio::spawn(async move { body.chunk().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scope.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("read should not hang")
            .unwrap();
        assert!(matches!(result, Some(Err(Error::Cancelled))));
        assert!(tx.send(Bytes::from_static(b"late")).await.is_err());
    }

    #[tokio::test]
    async fn collects_with_body_ext() {
        let (tx, body) = ResponseBody::channel(Scope::root().child(), 1);
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"a")).await.unwrap();
            tx.send(Bytes::from_static(b"b")).await.unwrap();
        });
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes, "ab");
    }

    #[tokio::test]
    async fn bytes_concatenates_chunks() {
        let (tx, body) = ResponseBody::channel(Scope::root().child(), 4);
        tx.send(Bytes::from_static(b"one ")).await.unwrap();
        tx.send(Bytes::from_static(b"two")).await.unwrap();
        drop(tx);
        assert_eq!(body.bytes().await.unwrap(), "one two");
    }

    #[tokio::test]
    async fn read_after_cancelled_end_stays_finished() {
        let scope = Scope::root().child();
        let (_tx, mut body) = ResponseBody::channel(scope.clone(), 1);
        scope.cancel();
        assert!(matches!(body.chunk().await, Some(Err(Error::Cancelled))));
        assert!(body.chunk().await.is_none());
        assert!(body.is_end_stream());
    }

    #[tokio::test]
    async fn dropping_unread_body_cancels_scope() {
        let scope = Scope::root().child();
        let (_tx, body) = ResponseBody::channel(scope.clone(), 1);
        drop(body);
        assert!(scope.is_cancelled());
    }
}
