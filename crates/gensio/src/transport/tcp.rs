//! TCP transport implementation

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::channel::{ListenHandle, RawLink};
use crate::config::StackConfig;
use crate::descriptor::{Role, StageSpec};
use crate::error::{GensioError, ParseError, Result};
use crate::transport::{resolve, NetAddr, TransportDriver};

/// TCP transport, `tcp[(nodelay=bool)],[host,]port`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

/// Whether TCP_NODELAY applies, from the stage or the stack config.
pub(crate) fn nodelay(spec: &StageSpec, config: &StackConfig) -> Result<bool> {
    if spec.has_param("nodelay") {
        Ok(spec.flag("nodelay")?)
    } else {
        Ok(config.nodelay)
    }
}

/// Connects `target` within the configured timeout.
pub(crate) async fn connect_stream(target: &str, config: &StackConfig) -> Result<TcpStream> {
    tokio::time::timeout(config.connect_timeout(), TcpStream::connect(target))
        .await
        .map_err(|_| GensioError::ConnectionTimeout {
            addr: target.to_string(),
            timeout_ms: config.connect_timeout_ms,
        })?
        .map_err(|e| GensioError::from_connect(target, e))
}

/// Builds a link around an established stream.
pub(crate) fn stream_link(stage: &str, stream: TcpStream, host: Option<&str>) -> RawLink {
    let raddr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let local_addr = stream
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let link = RawLink::new(stage, Box::new(stream), raddr).with_local_addr(local_addr);
    match host {
        Some(host) => link.with_host(host),
        None => link,
    }
}

#[async_trait]
impl TransportDriver for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn validate(&self, spec: &StageSpec, role: Option<Role>) -> std::result::Result<(), ParseError> {
        spec.check_keys(&["nodelay"])?;
        spec.flag("nodelay")?;
        NetAddr::validate(spec, role).map(|_| ())
    }

    async fn connect(&self, spec: &StageSpec, config: &StackConfig) -> Result<RawLink> {
        let addr = NetAddr::validate(spec, Some(Role::Connect))?;
        let target = addr.connect_target();
        let stream = connect_stream(&target, config).await?;
        if nodelay(spec, config)? {
            stream.set_nodelay(true)?;
        }
        tracing::debug!(addr = %target, "TCP connected");
        Ok(stream_link("tcp", stream, addr.host.as_deref()))
    }

    async fn listen(
        &self,
        spec: &StageSpec,
        config: &StackConfig,
    ) -> Result<Box<dyn ListenHandle>> {
        let addr = NetAddr::validate(spec, Some(Role::Accept))?;
        let target = addr.bind_target();
        let sockaddr = resolve(&target).await?[0];
        let socket = if sockaddr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(sockaddr)?;
        let inner = socket.listen(config.listen_backlog)?;
        tracing::debug!(addr = %target, backlog = config.listen_backlog, "TCP listening");
        Ok(Box::new(TcpListenHandle {
            inner,
            nodelay: nodelay(spec, config)?,
        }))
    }
}

/// Wrapper around tokio's TcpListener to implement the ListenHandle trait.
#[derive(Debug)]
pub struct TcpListenHandle {
    inner: TcpListener,
    nodelay: bool,
}

#[async_trait]
impl ListenHandle for TcpListenHandle {
    async fn accept(&self) -> Result<RawLink> {
        let (stream, peer) = self.inner.accept().await?;
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        tracing::debug!(peer = %peer, "TCP accepted");
        Ok(stream_link("tcp", stream, None))
    }

    fn local_addr(&self) -> Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_connect_and_listen() {
        let transport = TcpTransport;
        let config = StackConfig::default();
        let listener = transport
            .listen(&StageSpec::transport("tcp").with_arg("127.0.0.1").with_arg("0"), &config)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.starts_with("127.0.0.1:"));
        let port = addr.rsplit_once(':').unwrap().1.to_string();

        let server = tokio::spawn(async move {
            let mut link = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            link.channel.read_exact(&mut buf).await.unwrap();
            link.channel.write_all(&buf).await.unwrap();
            link.channel.flush().await.unwrap();
        });

        let spec = StageSpec::transport("tcp").with_arg("127.0.0.1").with_arg(&port);
        let mut link = transport.connect(&spec, &config).await.unwrap();
        assert_eq!(link.raddr, addr);
        assert_eq!(link.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(link.stages, vec!["tcp"]);
        link.channel.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        link.channel.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_with_configured_backlog() {
        let config = StackConfig {
            listen_backlog: 2,
            ..StackConfig::default()
        };
        let spec = StageSpec::transport("tcp").with_arg("127.0.0.1").with_arg("0");
        let listener = TcpTransport.listen(&spec, &config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let clients: Vec<_> = (0..2)
            .map(|_| tokio::spawn(TcpStream::connect(addr.clone())))
            .collect();
        for _ in 0..2 {
            let link = listener.accept().await.unwrap();
            assert!(link.raddr.starts_with("127.0.0.1:"));
        }
        for client in clients {
            client.await.unwrap().unwrap();
        }

        // The port is free again for a fresh listener once this one is gone.
        let port = addr.rsplit_once(':').unwrap().1.to_string();
        drop(listener);
        let spec = StageSpec::transport("tcp").with_arg("127.0.0.1").with_arg(&port);
        assert!(TcpTransport.listen(&spec, &config).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        drop(listener);

        let spec = StageSpec::transport("tcp").with_arg("127.0.0.1").with_arg(&port);
        let err = TcpTransport
            .connect(&spec, &StackConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GensioError::ConnectionRefused { .. }));
    }

    #[test]
    fn test_validate_nodelay_param() {
        let spec = StageSpec::transport("tcp")
            .with_param("nodelay", "maybe")
            .with_arg("1");
        assert!(TcpTransport.validate(&spec, None).is_err());
        let spec = StageSpec::transport("tcp")
            .with_param("nodelay", "false")
            .with_arg("1");
        assert!(TcpTransport.validate(&spec, None).is_ok());
        assert!(!nodelay(&spec, &StackConfig::default()).unwrap());
    }
}
