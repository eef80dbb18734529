//! SCTP transport over one-to-one style kernel sockets.
//!
//! Sockets are created through socket2 with `IPPROTO_SCTP` and then driven
//! by tokio's stream types, which only rely on connect/accept/read/write.
//! Hosts without kernel SCTP support fail at socket creation.

use std::net::SocketAddr;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::channel::{ListenHandle, RawLink};
use crate::config::StackConfig;
use crate::descriptor::{Role, StageSpec};
use crate::error::{GensioError, ParseError, Result};
use crate::transport::tcp::stream_link;
use crate::transport::{resolve, NetAddr, TransportDriver};

const IPPROTO_SCTP: i32 = 132;

/// SCTP transport, `sctp,[host,]port`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SctpTransport;

/// Returns true when the kernel can create SCTP sockets.
pub fn sctp_available() -> bool {
    Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::from(IPPROTO_SCTP))).is_ok()
}

fn sctp_socket(addr: &SocketAddr) -> std::io::Result<TcpSocket> {
    let socket = Socket::new(
        Domain::for_address(*addr),
        Type::STREAM,
        Some(Protocol::from(IPPROTO_SCTP)),
    )?;
    socket.set_nonblocking(true)?;
    Ok(TcpSocket::from_std_stream(socket.into()))
}

async fn connect_one(addr: SocketAddr) -> std::io::Result<TcpStream> {
    sctp_socket(&addr)?.connect(addr).await
}

#[async_trait]
impl TransportDriver for SctpTransport {
    fn name(&self) -> &'static str {
        "sctp"
    }

    fn validate(&self, spec: &StageSpec, role: Option<Role>) -> std::result::Result<(), ParseError> {
        spec.check_keys(&[])?;
        NetAddr::validate(spec, role).map(|_| ())
    }

    async fn connect(&self, spec: &StageSpec, config: &StackConfig) -> Result<RawLink> {
        let addr = NetAddr::validate(spec, Some(Role::Connect))?;
        let target = addr.connect_target();
        let mut last_err = None;
        for sockaddr in resolve(&target).await? {
            match tokio::time::timeout(config.connect_timeout(), connect_one(sockaddr)).await {
                Ok(Ok(stream)) => {
                    tracing::debug!(addr = %target, peer = %sockaddr, "SCTP connected");
                    return Ok(stream_link("sctp", stream, addr.host.as_deref()));
                }
                Ok(Err(e)) => last_err = Some(GensioError::from_connect(&target, e)),
                Err(_) => {
                    last_err = Some(GensioError::ConnectionTimeout {
                        addr: target.clone(),
                        timeout_ms: config.connect_timeout_ms,
                    })
                }
            }
        }
        Err(last_err.unwrap_or(GensioError::ConnectionRefused { addr: target }))
    }

    async fn listen(
        &self,
        spec: &StageSpec,
        config: &StackConfig,
    ) -> Result<Box<dyn ListenHandle>> {
        let addr = NetAddr::validate(spec, Some(Role::Accept))?;
        let target = addr.bind_target();
        let sockaddr = resolve(&target).await?[0];
        let socket = sctp_socket(&sockaddr)?;
        socket.set_reuseaddr(true)?;
        socket.bind(sockaddr)?;
        let inner = socket.listen(config.listen_backlog)?;
        tracing::debug!(addr = %target, "SCTP listening");
        Ok(Box::new(SctpListenHandle { inner }))
    }
}

/// Listening SCTP endpoint.
#[derive(Debug)]
pub struct SctpListenHandle {
    inner: TcpListener,
}

#[async_trait]
impl ListenHandle for SctpListenHandle {
    async fn accept(&self) -> Result<RawLink> {
        let (stream, peer) = self.inner.accept().await?;
        tracing::debug!(peer = %peer, "SCTP accepted");
        Ok(stream_link("sctp", stream, None))
    }

    fn local_addr(&self) -> Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}
