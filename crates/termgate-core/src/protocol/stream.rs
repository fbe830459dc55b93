//! Framed message I/O over async byte streams.
//!
//! Works with QUIC stream halves and in-memory duplex pipes alike.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::READ_CHUNK_SIZE;
use crate::error::{Error, Result};
use crate::protocol::{Codec, Message};

/// Reads length-prefixed messages from a byte stream.
pub struct MessageReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the peer finished the stream on a frame
    /// boundary. A stream that ends mid-frame is a protocol error.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(msg) = Codec::decode(&mut self.buf)? {
                return Ok(Some(msg));
            }

            let n = self
                .inner
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| Error::Transport {
                    message: format!("failed to read from stream: {}", e),
                })?;

            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Protocol {
                    message: format!("stream ended inside a frame ({} bytes pending)", self.buf.len()),
                });
            }
        }
    }
}

/// Writes length-prefixed messages to a byte stream.
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send a message (includes flush for low latency).
    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        let data = Codec::encode(msg)?;
        self.inner
            .write_all(&data)
            .await
            .map_err(|e| Error::Transport {
                message: format!("failed to send message: {}", e),
            })?;
        self.inner.flush().await.map_err(|e| Error::Transport {
            message: format!("failed to flush stream: {}", e),
        })
    }

    /// Finish the stream (graceful write-side close).
    pub async fn finish(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(|e| Error::Transport {
            message: format!("failed to finish stream: {}", e),
        })
    }

    /// Get the underlying writer back.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Geometry;

    #[tokio::test]
    async fn send_then_recv_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = MessageWriter::new(a);
        let mut reader = MessageReader::new(b);

        writer.send(&Message::data("hello\n")).await.unwrap();
        writer.send(&Message::Resize(Geometry::new(100, 40))).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(reader.recv().await.unwrap(), Some(Message::data("hello\n")));
        assert_eq!(
            reader.recv().await.unwrap(),
            Some(Message::Resize(Geometry::new(100, 40)))
        );
        assert_eq!(reader.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_frame_is_protocol_error() {
        let (mut a, b) = tokio::io::duplex(1024);
        let encoded = Codec::encode(&Message::data("truncated")).unwrap();
        a.write_all(&encoded[..encoded.len() - 2]).await.unwrap();
        drop(a);

        let mut reader = MessageReader::new(b);
        assert!(matches!(reader.recv().await, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn frames_split_across_writes_are_reassembled() {
        let (mut a, b) = tokio::io::duplex(1024);
        let encoded = Codec::encode(&Message::Eof).unwrap();
        let mut reader = MessageReader::new(b);

        let (head, tail) = encoded.split_at(2);
        a.write_all(head).await.unwrap();
        let pending = tokio::spawn(async move { reader.recv().await });
        tokio::task::yield_now().await;
        a.write_all(tail).await.unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), Some(Message::Eof));
    }
}
