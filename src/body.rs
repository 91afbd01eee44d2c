//! Raw message bodies as delivered by the transport.
//!
//! A body arrives as a stream of chunks that ends either cleanly or with an
//! error. Parsing a partial buffer is never valid, so the only way to reach
//! the bytes is to drive a [`BodyReader`] to completion.

use crate::error::ParseError;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pub type ChunkStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// A fetched message: protocol sequence number plus its undelivered body.
pub struct RawMessage {
    pub seq: u32,
    chunks: ChunkStream,
}

impl RawMessage {
    pub fn new<S>(seq: u32, chunks: S) -> Self
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            seq,
            chunks: chunks.boxed(),
        }
    }

    /// A body that is already fully in memory, delivered as one chunk.
    pub fn from_bytes(seq: u32, bytes: Vec<u8>) -> Self {
        Self::new(seq, stream::iter(vec![Ok(bytes)]))
    }

    pub fn into_reader(self) -> BodyReader {
        BodyReader {
            seq: self.seq,
            chunks: self.chunks,
            buf: Vec::new(),
        }
    }
}

impl std::fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMessage").field("seq", &self.seq).finish()
    }
}

/// Buffers a chunk stream and resolves once the stream signals its end.
pub struct BodyReader {
    seq: u32,
    chunks: ChunkStream,
    buf: Vec<u8>,
}

impl Future for BodyReader {
    type Output = Result<Vec<u8>, ParseError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match this.chunks.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buf.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(source))) => {
                    return Poll::Ready(Err(ParseError::Stream {
                        seq: this.seq,
                        source,
                    }))
                }
                Poll::Ready(None) => {
                    let body = std::mem::take(&mut this.buf);
                    if body.iter().all(u8::is_ascii_whitespace) {
                        return Poll::Ready(Err(ParseError::Empty { seq: this.seq }));
                    }
                    return Poll::Ready(Ok(body));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn joins_chunks_in_order() {
        let chunks = vec![Ok(b"Subject: a\r\n".to_vec()), Ok(b"\r\nbody".to_vec())];
        let raw = RawMessage::new(7, stream::iter(chunks));
        let body = raw.into_reader().await.unwrap();
        assert_eq!(body, b"Subject: a\r\n\r\nbody");
    }

    #[async_std::test]
    async fn stream_error_discards_partial_buffer() {
        let chunks = vec![
            Ok(b"Subject: a\r\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let raw = RawMessage::new(3, stream::iter(chunks));
        match raw.into_reader().await {
            Err(ParseError::Stream { seq, .. }) => assert_eq!(seq, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[async_std::test]
    async fn blank_body_is_empty() {
        let raw = RawMessage::from_bytes(9, b"\r\n  ".to_vec());
        assert!(matches!(raw.into_reader().await, Err(ParseError::Empty { seq: 9 })));
    }
}
