//! The composed I/O object handed to applications.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::chain::StackChain;
use crate::channel::{BoxedChannel, RawLink, ReadOutcome};
use crate::descriptor::Role;
use crate::error::{GensioError, Result};
use crate::filter::mux::MuxSession;

/// Upper bound on the bytes one [`Gensio::read`] call returns.
pub const MAX_READ: usize = 64 * 1024;

/// Lifecycle of a gensio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GensioState {
    /// Reads and writes allowed.
    Open,
    /// Our write side is shut down; reads continue until end of stream.
    HalfClosed,
    /// Closed by the application or by an I/O error; every operation fails
    /// with [`GensioError::Closed`].
    Closed,
}

/// Access to the multiplexer a gensio's channel was opened on.
pub(crate) struct MuxHandle {
    pub(crate) session: Arc<MuxSession>,
    pub(crate) chain: Arc<StackChain>,
    /// Index of the mux stage in the chain, innermost first.
    pub(crate) level: usize,
}

/// A fully established stack: the outermost channel owns every inner stage.
///
/// Also usable as a plain tokio `AsyncRead + AsyncWrite`.
pub struct Gensio {
    channel: BoxedChannel,
    stages: Vec<String>,
    raddr: String,
    local_addr: Option<String>,
    peer_certs: Option<Vec<Vec<u8>>>,
    is_packet: bool,
    state: GensioState,
    read_size: usize,
    read_buf: BytesMut,
    mux: Option<MuxHandle>,
}

impl std::fmt::Debug for Gensio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gensio")
            .field("stages", &self.stages)
            .field("raddr", &self.raddr)
            .field("state", &self.state)
            .field("is_packet", &self.is_packet)
            .finish()
    }
}

impl Gensio {
    pub(crate) fn from_link(link: RawLink, read_size: usize, mux: Option<MuxHandle>) -> Self {
        let RawLink {
            channel,
            raddr,
            local_addr,
            peer_certs,
            is_packet,
            stages,
            ..
        } = link;
        Self {
            channel,
            stages,
            raddr,
            local_addr,
            peer_certs,
            is_packet,
            state: GensioState::Open,
            read_size: read_size.max(1),
            read_buf: BytesMut::new(),
            mux,
        }
    }

    /// Address of the remote end: `"echo"` for echo, `ip:port` otherwise.
    pub fn raddr(&self) -> &str {
        &self.raddr
    }

    /// Local address of the transport socket, when it has one.
    pub fn local_addr(&self) -> Option<&str> {
        self.local_addr.as_deref()
    }

    /// Stage names, outermost first.
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// DER certificates the peer presented during a TLS handshake.
    pub fn peer_certificates(&self) -> Option<&[Vec<u8>]> {
        self.peer_certs.as_deref()
    }

    /// True when some stage preserves message boundaries.
    pub fn is_packet(&self) -> bool {
        self.is_packet
    }

    /// Where the gensio is in its lifecycle.
    pub fn state(&self) -> GensioState {
        self.state
    }

    /// The mux session this gensio's channel belongs to, if any.
    pub fn mux_session(&self) -> Option<&Arc<MuxSession>> {
        self.mux.as_ref().map(|m| &m.session)
    }

    /// Reads at most `max` bytes, waiting until some are available.
    ///
    /// Requests above [`MAX_READ`] are trimmed to it.
    pub async fn read(&mut self, max: usize) -> Result<ReadOutcome> {
        if self.state == GensioState::Closed {
            return Err(GensioError::Closed);
        }
        if max == 0 {
            return Err(GensioError::Config("read size must be non-zero".to_string()));
        }
        let want = max.min(MAX_READ);
        self.read_buf.reserve(want);
        let mut limited = (&mut self.read_buf).limit(want);
        let read = self.channel.read_buf(&mut limited).await;
        let n = match read {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e).await),
        };
        if n == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        Ok(ReadOutcome::Data(self.read_buf.split().freeze()))
    }

    /// Reads with the configured default read size.
    pub async fn read_chunk(&mut self) -> Result<ReadOutcome> {
        self.read(self.read_size).await
    }

    /// Writes all of `data` and flushes it through every stage.
    ///
    /// On a packet gensio each call is one message.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.state != GensioState::Open {
            return Err(GensioError::Closed);
        }
        let written = match self.channel.write_all(data).await {
            Ok(()) => self.channel.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Ok(data.len()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Shuts down our sending side; the peer reads end of stream.
    pub async fn close_write(&mut self) -> Result<()> {
        match self.state {
            GensioState::Open => match self.channel.shutdown().await {
                Ok(()) => {
                    self.state = GensioState::HalfClosed;
                    Ok(())
                }
                Err(e) => {
                    self.mark_closed();
                    Err(e.into())
                }
            },
            GensioState::HalfClosed => Ok(()),
            GensioState::Closed => Err(GensioError::Closed),
        }
    }

    /// Closes the gensio, shutting down the outermost stage first.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == GensioState::Closed {
            return Err(GensioError::Closed);
        }
        let result = if self.state == GensioState::Open {
            self.channel.shutdown().await
        } else {
            Ok(())
        };
        self.state = GensioState::Closed;
        tracing::debug!(raddr = %self.raddr, "gensio closed");
        match result {
            Ok(()) => Ok(()),
            // The peer may already be gone.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Shuts the channel down after an I/O error and marks the gensio closed.
    async fn fail(&mut self, e: io::Error) -> GensioError {
        let _ = self.channel.shutdown().await;
        self.mark_closed();
        tracing::debug!(raddr = %self.raddr, error = %e, "gensio closed after I/O error");
        e.into()
    }

    pub(crate) fn mark_closed(&mut self) {
        self.state = GensioState::Closed;
    }

    /// Passes `result` through, closing the gensio if it is an I/O error.
    pub(crate) fn closed_on_io_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(GensioError::Io(e)) = &result {
            if self.state != GensioState::Closed {
                tracing::debug!(raddr = %self.raddr, error = %e, "transfer failed, closing gensio");
                self.mark_closed();
            }
        }
        result
    }

    /// Opens another channel on the same mux session, re-running any
    /// filters stacked above the mux.
    ///
    /// The upper filters run in the role this side holds on the lower link,
    /// so a server opening a channel stays the TLS server on it.
    ///
    /// The returned future does not borrow `self`.
    pub fn open_channel(&self) -> impl Future<Output = Result<Gensio>> + Send + 'static {
        let handle = self.mux_handle();
        async move {
            let (session, chain, level) = handle?;
            let link = session.open_channel().await?;
            let role = session.role();
            chain.finish(link, level + 1, role, Some(level)).await
        }
    }

    /// Waits for a channel the peer opened on this gensio's mux session.
    pub fn accept_channel(&self) -> impl Future<Output = Result<Gensio>> + Send + 'static {
        let handle = self.mux_handle();
        async move {
            let (session, chain, level) = handle?;
            let link = session.accept_channel().await?;
            let role = session.role();
            chain.finish(link, level + 1, role, Some(level)).await
        }
    }

    fn mux_handle(&self) -> Result<(Arc<MuxSession>, Arc<StackChain>, usize)> {
        self.mux
            .as_ref()
            .map(|m| (Arc::clone(&m.session), Arc::clone(&m.chain), m.level))
            .ok_or_else(|| GensioError::NotSupported("channels without a mux stage".to_string()))
    }
}

impl AsyncRead for Gensio {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.channel).poll_read(cx, buf);
        if let Poll::Ready(Err(_)) = result {
            self.mark_closed();
        }
        result
    }
}

impl AsyncWrite for Gensio {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.channel).poll_write(cx, buf);
        if let Poll::Ready(Err(_)) = result {
            self.mark_closed();
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.channel).poll_flush(cx);
        if let Poll::Ready(Err(_)) = result {
            self.mark_closed();
        }
        result
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.channel).poll_shutdown(cx);
        match result {
            Poll::Ready(Ok(())) if self.state == GensioState::Open => {
                self.state = GensioState::HalfClosed;
            }
            Poll::Ready(Err(_)) => self.mark_closed(),
            _ => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::echo::{EchoChannel, ECHO_ADDR};

    fn echo() -> Gensio {
        let link = RawLink::new("echo", Box::new(EchoChannel::new()), ECHO_ADDR);
        Gensio::from_link(link, 4, None)
    }

    #[tokio::test]
    async fn test_echo_read_write() {
        let mut io = echo();
        assert_eq!(io.raddr(), "echo");
        assert_eq!(io.write(b"This is a test string!").await.unwrap(), 22);
        let mut got = Vec::new();
        while got.len() < 22 {
            match io.read(8).await.unwrap() {
                ReadOutcome::Data(data) => {
                    assert!(data.len() <= 8);
                    got.extend_from_slice(&data);
                }
                ReadOutcome::EndOfStream => panic!("unexpected end of stream"),
            }
        }
        assert_eq!(got, b"This is a test string!");
    }

    #[tokio::test]
    async fn test_read_chunk_uses_default_size() {
        let mut io = echo();
        io.write(b"abcdefgh").await.unwrap();
        let data = io.read_chunk().await.unwrap().into_data().unwrap();
        assert_eq!(data, &b"abcd"[..]);
    }

    #[tokio::test]
    async fn test_half_close_then_close() {
        let mut io = echo();
        io.write(b"last").await.unwrap();
        io.close_write().await.unwrap();
        assert_eq!(io.state(), GensioState::HalfClosed);
        assert!(matches!(io.write(b"more").await, Err(GensioError::Closed)));
        assert_eq!(io.read(16).await.unwrap().into_data().unwrap(), &b"last"[..]);
        assert_eq!(io.read(16).await.unwrap(), ReadOutcome::EndOfStream);

        io.close().await.unwrap();
        assert_eq!(io.state(), GensioState::Closed);
        assert!(matches!(io.read(16).await, Err(GensioError::Closed)));
        assert!(matches!(io.close().await, Err(GensioError::Closed)));
    }

    #[tokio::test]
    async fn test_zero_read_rejected() {
        let mut io = echo();
        assert!(matches!(io.read(0).await, Err(GensioError::Config(_))));
    }

    fn duplex_pair() -> (Gensio, Gensio) {
        let (a, b) = tokio::io::duplex(1024);
        (
            Gensio::from_link(RawLink::new("duplex", Box::new(a), "b"), 64, None),
            Gensio::from_link(RawLink::new("duplex", Box::new(b), "a"), 64, None),
        )
    }

    #[tokio::test]
    async fn test_write_error_closes() {
        let (mut io, peer) = duplex_pair();
        drop(peer);
        let err = io.write(b"nobody listens").await.unwrap_err();
        assert!(matches!(err, GensioError::Io(_)));
        assert_eq!(io.state(), GensioState::Closed);
        assert!(matches!(io.write(b"again").await, Err(GensioError::Closed)));
        assert!(matches!(io.read(16).await, Err(GensioError::Closed)));
    }

    #[tokio::test]
    async fn test_large_read_request_is_capped() {
        let (mut io, mut peer) = duplex_pair();
        peer.write(b"small").await.unwrap();
        let data = io.read(1 << 30).await.unwrap().into_data().unwrap();
        assert_eq!(data, &b"small"[..]);

        let big = vec![7u8; 1000];
        peer.write(&big).await.unwrap();
        let mut got = Vec::new();
        while got.len() < big.len() {
            let data = io.read(usize::MAX).await.unwrap().into_data().unwrap();
            assert!(data.len() <= MAX_READ);
            got.extend_from_slice(&data);
        }
        assert_eq!(got, big);
    }

    #[tokio::test]
    async fn test_channels_need_mux() {
        let io = echo();
        assert!(io.mux_session().is_none());
        assert!(matches!(
            io.open_channel().await,
            Err(GensioError::NotSupported(_))
        ));
    }
}
