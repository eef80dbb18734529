//! Connecting side of a stack.

use std::sync::Arc;

use crate::chain::StackChain;
use crate::config::StackConfig;
use crate::descriptor::{Role, StackSpec};
use crate::error::Result;
use crate::gensio::Gensio;
use crate::registry::StageRegistry;

/// Outcome of [`Connector::establish`].
#[derive(Debug)]
pub enum Established {
    /// Every stage handshook; the gensio is open.
    Open(Gensio),
    /// The peer closed or rejected the connection during establishment,
    /// which the caller said to expect.
    RemoteClosed,
}

impl Established {
    /// Returns the open gensio, if establishment succeeded.
    pub fn into_gensio(self) -> Option<Gensio> {
        match self {
            Established::Open(io) => Some(io),
            Established::RemoteClosed => None,
        }
    }
}

/// Builds outbound connections from a descriptor.
#[derive(Debug, Clone)]
pub struct Connector {
    chain: Arc<StackChain>,
    expect_remclose: bool,
}

impl Connector {
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
        let spec = StackSpec::parse_with(descriptor, registry, Some(Role::Connect))?;
        let chain = StackChain::resolve(spec, registry, config)?;
        Ok(Self {
            chain: Arc::new(chain),
            expect_remclose: false,
        })
    }

    /// Treat the peer closing or rejecting us mid-handshake as an expected
    /// outcome rather than an error.
    pub fn expect_remclose(mut self, expect: bool) -> Self {
        self.expect_remclose = expect;
        self
    }

    /// The parsed descriptor.
    pub fn spec(&self) -> &StackSpec {
        self.chain.spec()
    }

    /// Connects and runs every handshake, honouring `expect_remclose`.
    pub async fn establish(&self) -> Result<Established> {
        match self.chain.connect().await {
            Ok(io) => {
                tracing::debug!(raddr = %io.raddr(), stages = ?io.stages(), "connection established");
                Ok(Established::Open(io))
            }
            Err(e) if self.expect_remclose && e.is_remote_close() => {
                tracing::debug!(error = %e, "peer closed during establishment, as expected");
                Ok(Established::RemoteClosed)
            }
            Err(e) => {
                tracing::warn!(descriptor = %self.chain.spec(), error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Connects and runs every handshake; any failure is an error.
    pub async fn connect(&self) -> Result<Gensio> {
        self.chain.connect().await
    }
}
