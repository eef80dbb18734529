//! Listening side of a stack.
//!
//! An accepter owns one listening endpoint. Each inbound transport
//! connection is handshaked in its own task, so a slow or failing peer never
//! holds up the listener or connections that are already established.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::chain::{AcceptSink, StackChain};
use crate::config::StackConfig;
use crate::descriptor::{Role, StackSpec};
use crate::error::{GensioError, Result};
use crate::gensio::Gensio;
use crate::registry::StageRegistry;

/// Lifecycle of an accepter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccepterState {
    /// Created but not bound.
    Idle,
    /// Bound and accepting connections.
    Listening,
    /// Shut down; the endpoint is released.
    Shutdown,
}

/// Snapshot of accepter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptStats {
    /// Transport connections taken off the listener.
    pub connections: u64,
    /// Connections whose every filter handshake succeeded.
    pub established: u64,
    /// Connections that failed establishment.
    pub failed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AcceptCounters {
    connections: AtomicU64,
    established: AtomicU64,
    failed: AtomicU64,
}

impl AcceptCounters {
    pub(crate) fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_established(&self) {
        self.established.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AcceptStats {
        AcceptStats {
            connections: self.connections.load(Ordering::Relaxed),
            established: self.established.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Produces a [`Gensio`] for every peer that completes the stack's
/// handshakes.
pub struct Accepter {
    chain: Arc<StackChain>,
    local_addr: Option<String>,
    incoming: Option<Mutex<mpsc::Receiver<Result<Gensio>>>>,
    cancel: CancellationToken,
    counters: Arc<AcceptCounters>,
}

impl std::fmt::Debug for Accepter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepter")
            .field("descriptor", &self.chain.spec().to_string())
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl Accepter {
    /// Parses `descriptor` against the built-in stages.
    pub fn new(descriptor: &str, config: StackConfig) -> Result<Self> {
        Self::with_registry(descriptor, &StageRegistry::with_builtins(), config)
    }

    /// Parses `descriptor` against a caller-supplied registry.
    pub fn with_registry(
        descriptor: &str,
        registry: &StageRegistry,
        config: StackConfig,
    ) -> Result<Self> {
        let spec = StackSpec::parse_with(descriptor, registry, Some(Role::Accept))?;
        let chain = StackChain::resolve(spec, registry, config)?;
        Ok(Self {
            chain: Arc::new(chain),
            local_addr: None,
            incoming: None,
            cancel: CancellationToken::new(),
            counters: Arc::new(AcceptCounters::default()),
        })
    }

    /// Idle, listening or shut down.
    pub fn state(&self) -> AccepterState {
        if self.cancel.is_cancelled() {
            AccepterState::Shutdown
        } else if self.incoming.is_some() {
            AccepterState::Listening
        } else {
            AccepterState::Idle
        }
    }

    /// The parsed descriptor.
    pub fn spec(&self) -> &StackSpec {
        self.chain.spec()
    }

    /// Binds the endpoint and starts accepting. Calling it again while
    /// listening is a no-op.
    pub async fn startup(&mut self) -> Result<()> {
        match self.state() {
            AccepterState::Listening => return Ok(()),
            AccepterState::Shutdown => return Err(GensioError::Closed),
            AccepterState::Idle => {}
        }

        let listener = self.chain.listen().await?;
        let local_addr = listener.local_addr()?;
        let (out, rx) = mpsc::channel(self.chain.config().accept_queue_depth.max(1));
        let sink = AcceptSink {
            out,
            cancel: self.cancel.clone(),
            counters: Arc::clone(&self.counters),
        };
        let chain = Arc::clone(&self.chain);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok(link) => {
                        sink.counters.record_connection();
                        tracing::debug!(raddr = %link.raddr, "inbound connection");
                        tokio::spawn(Arc::clone(&chain).accept_from(link, 0, sink.clone(), None));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transport accept failed");
                        sink.counters.record_failed();
                        if sink.out.send(Err(e)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("accept loop stopped");
        });

        tracing::debug!(addr = %local_addr, descriptor = %self.chain.spec(), "accepter listening");
        self.local_addr = Some(local_addr);
        self.incoming = Some(Mutex::new(rx));
        Ok(())
    }

    /// Waits for the next established connection or establishment failure.
    ///
    /// Returns [`GensioError::Closed`] once the accepter is shut down.
    pub async fn accept(&self) -> Result<Gensio> {
        let Some(incoming) = &self.incoming else {
            return Err(GensioError::Config("accepter has not been started".to_string()));
        };
        let mut incoming = incoming.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(GensioError::Closed),
            next = incoming.recv() => next.unwrap_or(Err(GensioError::Closed)),
        }
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<&str> {
        self.local_addr.as_deref()
    }

    /// The bound port, once started.
    pub fn port(&self) -> Option<u16> {
        self.local_addr
            .as_deref()
            .and_then(|addr| addr.rsplit_once(':'))
            .and_then(|(_, port)| port.parse().ok())
    }

    /// Counters of established and failed inbound connections.
    pub fn stats(&self) -> AcceptStats {
        self.counters.snapshot()
    }

    /// Stops accepting and releases the endpoint. Pending [`accept`] calls
    /// return [`GensioError::Closed`]; established gensios are unaffected.
    ///
    /// [`accept`]: Accepter::accept
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(addr = ?self.local_addr, "accepter shutting down");
        }
        self.cancel.cancel();
    }
}

impl Drop for Accepter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn test_new_validates_descriptor() {
        let err = Accepter::new("tcp", StackConfig::default()).unwrap_err();
        assert!(matches!(err, GensioError::Parse(_)));
        let acc = Accepter::new("tcp,0", StackConfig::default()).unwrap();
        assert_eq!(acc.state(), AccepterState::Idle);
        assert!(acc.port().is_none());
    }

    #[tokio::test]
    async fn test_accept_before_startup() {
        let acc = Accepter::new("tcp,0", StackConfig::default()).unwrap();
        assert!(matches!(acc.accept().await, Err(GensioError::Config(_))));
    }

    #[tokio::test]
    async fn test_accept_tcp() {
        let mut acc = Accepter::new("tcp,127.0.0.1,0", StackConfig::default()).unwrap();
        acc.startup().await.unwrap();
        assert_eq!(acc.state(), AccepterState::Listening);
        let port = acc.port().unwrap();
        assert_ne!(port, 0);

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut io = acc.accept().await.unwrap();
        assert_eq!(io.stages(), &["tcp"]);
        assert_eq!(io.raddr(), client.local_addr().unwrap().to_string());

        client.write_all(b"hi").await.unwrap();
        assert_eq!(io.read(16).await.unwrap().into_data().unwrap(), &b"hi"[..]);
        io.write(b"yo").await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"yo");
        assert_eq!(acc.stats().established, 1);
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_accept() {
        let mut acc = Accepter::new("tcp,127.0.0.1,0", StackConfig::default()).unwrap();
        acc.startup().await.unwrap();
        let acc = Arc::new(acc);
        let waiter = {
            let acc = Arc::clone(&acc);
            tokio::spawn(async move { acc.accept().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        acc.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(GensioError::Closed)));
        assert_eq!(acc.state(), AccepterState::Shutdown);
    }

    #[tokio::test]
    async fn test_startup_after_shutdown_fails() {
        let mut acc = Accepter::new("tcp,127.0.0.1,0", StackConfig::default()).unwrap();
        acc.shutdown();
        assert!(matches!(acc.startup().await, Err(GensioError::Closed)));
    }

    #[tokio::test]
    async fn test_echo_cannot_listen() {
        let mut acc = Accepter::new("echo", StackConfig::default()).unwrap();
        assert!(matches!(
            acc.startup().await,
            Err(GensioError::NotSupported(_))
        ));
    }
}
