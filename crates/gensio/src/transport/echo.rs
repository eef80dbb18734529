//! Loopback transport that reflects every write back as readable data.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::channel::{ListenHandle, RawLink};
use crate::config::StackConfig;
use crate::descriptor::{Role, StageSpec};
use crate::error::{GensioError, ParseError, Result};
use crate::transport::TransportDriver;

/// Address reported by every echo gensio.
pub const ECHO_ADDR: &str = "echo";

/// The echo transport. It has no peer and ignores its parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTransport;

#[async_trait]
impl TransportDriver for EchoTransport {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn validate(&self, _spec: &StageSpec, _role: Option<Role>) -> std::result::Result<(), ParseError> {
        Ok(())
    }

    async fn connect(&self, _spec: &StageSpec, _config: &StackConfig) -> Result<RawLink> {
        tracing::debug!("echo channel opened");
        Ok(RawLink::new("echo", Box::new(EchoChannel::new()), ECHO_ADDR))
    }

    async fn listen(
        &self,
        _spec: &StageSpec,
        _config: &StackConfig,
    ) -> Result<Box<dyn ListenHandle>> {
        Err(GensioError::NotSupported("echo accepter".to_string()))
    }
}

/// A buffer that is its own peer: writes become immediately readable.
///
/// Shutting down the write side delivers end-of-stream once the buffered
/// bytes have been read.
#[derive(Debug, Default)]
pub struct EchoChannel {
    buf: BytesMut,
    reader: Option<Waker>,
    shutdown: bool,
}

impl EchoChannel {
    /// An empty loopback buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written but not yet read.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.reader.take() {
            waker.wake();
        }
    }
}

impl AsyncRead for EchoChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.buf.is_empty() {
            let n = out.remaining().min(this.buf.len());
            out.put_slice(&this.buf.split_to(n));
            return Poll::Ready(Ok(()));
        }
        if this.shutdown {
            return Poll::Ready(Ok(()));
        }
        this.reader = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for EchoChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.shutdown {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        this.buf.extend_from_slice(data);
        this.wake_reader();
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.shutdown = true;
        this.wake_reader();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_write_is_immediately_readable() {
        let mut echo = EchoChannel::new();
        echo.write_all(b"This is a test string!").await.unwrap();
        assert_eq!(echo.pending(), 22);
        let mut buf = [0u8; 22];
        echo.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"This is a test string!");
        assert_eq!(echo.pending(), 0);
    }

    #[tokio::test]
    async fn test_small_reads_fragment() {
        let mut echo = EchoChannel::new();
        echo.write_all(b"abcdef").await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(echo.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(echo.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_eof() {
        let mut echo = EchoChannel::new();
        echo.write_all(b"xy").await.unwrap();
        echo.shutdown().await.unwrap();
        let mut out = Vec::new();
        echo.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"xy");
        assert!(echo.write_all(b"z").await.is_err());
    }

    #[tokio::test]
    async fn test_split_reader_woken_by_writer() {
        let (mut rd, mut wr) = tokio::io::split(EchoChannel::new());
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 3];
            rd.read_exact(&mut buf).await.unwrap();
            buf
        });
        tokio::task::yield_now().await;
        wr.write_all(b"abc").await.unwrap();
        assert_eq!(&reader.await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_driver_raddr_and_listen() {
        let config = StackConfig::default();
        let link = EchoTransport
            .connect(&StageSpec::transport("echo"), &config)
            .await
            .unwrap();
        assert_eq!(link.raddr, ECHO_ADDR);
        let err = EchoTransport
            .listen(&StageSpec::transport("echo"), &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GensioError::NotSupported(_)));
    }
}
