//! A parsed descriptor bound to concrete drivers.
//!
//! Both establishment directions walk the same chain: transport first, then
//! filters from the innermost outward. Every filter handshake is bounded by
//! the configured handshake timeout.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::accepter::AcceptCounters;
use crate::channel::{ListenHandle, RawLink};
use crate::config::StackConfig;
use crate::descriptor::{Role, StackSpec, StageSpec};
use crate::error::{GensioError, ParseError, Result};
use crate::filter::{FilterDriver, Wrapped};
use crate::gensio::{Gensio, MuxHandle};
use crate::registry::StageRegistry;
use crate::transport::TransportDriver;

/// A stack ready to connect or listen.
pub struct StackChain {
    spec: StackSpec,
    transport: Arc<dyn TransportDriver>,
    /// Innermost first.
    filters: Vec<(StageSpec, Arc<dyn FilterDriver>)>,
    config: StackConfig,
}

impl std::fmt::Debug for StackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackChain")
            .field("spec", &self.spec.to_string())
            .finish()
    }
}

/// Where the accept pipeline delivers finished connections.
#[derive(Clone)]
pub(crate) struct AcceptSink {
    pub(crate) out: mpsc::Sender<Result<Gensio>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) counters: Arc<AcceptCounters>,
}

impl AcceptSink {
    async fn deliver(&self, result: Result<Gensio>) {
        match &result {
            Ok(io) => {
                self.counters.record_established();
                tracing::debug!(raddr = %io.raddr(), "connection established");
            }
            Err(e) => {
                self.counters.record_failed();
                tracing::warn!(error = %e, "inbound handshake failed");
            }
        }
        if self.out.send(result).await.is_err() {
            tracing::debug!("accepter gone, dropping connection");
        }
    }
}

impl StackChain {
    /// Binds every stage of `spec` to its driver in `registry`.
    pub fn resolve(spec: StackSpec, registry: &StageRegistry, config: StackConfig) -> Result<Self> {
        let transport_spec = spec.transport();
        let transport = registry
            .transport(&transport_spec.name)
            .ok_or_else(|| ParseError::UnknownStage(transport_spec.name.clone()))?;
        let filters = spec
            .filters()
            .iter()
            .rev()
            .map(|stage| {
                registry
                    .filter(&stage.name)
                    .map(|driver| (stage.clone(), driver))
                    .ok_or_else(|| ParseError::UnknownStage(stage.name.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            spec,
            transport,
            filters,
            config,
        })
    }

    /// The parsed descriptor.
    pub fn spec(&self) -> &StackSpec {
        &self.spec
    }

    /// Configuration shared by every stage.
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    async fn wrap_stage(&self, index: usize, link: RawLink, role: Role) -> Result<Wrapped> {
        let (spec, driver) = &self.filters[index];
        tracing::trace!(stage = %spec.name, ?role, "starting filter handshake");
        tokio::time::timeout(
            self.config.handshake_timeout(),
            driver.wrap(spec, link, role, &self.config),
        )
        .await
        .map_err(|_| GensioError::Timeout {
            what: format!("{} handshake", spec.name),
            timeout_ms: self.config.handshake_timeout_ms,
        })?
    }

    /// Connects the transport and runs every filter handshake outward.
    pub async fn connect(self: &Arc<Self>) -> Result<Gensio> {
        let link = self
            .transport
            .connect(self.spec.transport(), &self.config)
            .await?;
        self.finish(link, 0, Role::Connect, None).await
    }

    /// Applies filters `from..` to a link that will not fan out.
    pub(crate) async fn finish(
        self: &Arc<Self>,
        mut link: RawLink,
        from: usize,
        role: Role,
        mut mux_level: Option<usize>,
    ) -> Result<Gensio> {
        for index in from..self.filters.len() {
            link = match self.wrap_stage(index, link, role).await? {
                Wrapped::Single(link) => link,
                Wrapped::Fanout(_) => {
                    return Err(GensioError::NotSupported(format!(
                        "{} fan-out outside an accepter",
                        self.filters[index].0.name
                    )))
                }
            };
            if self.filters[index].1.is_fanout() {
                mux_level = Some(index);
            }
        }
        Ok(self.gensio(link, mux_level))
    }

    fn gensio(self: &Arc<Self>, link: RawLink, mux_level: Option<usize>) -> Gensio {
        let mux = match (link.mux.clone(), mux_level) {
            (Some(session), Some(level)) => Some(MuxHandle {
                session,
                chain: Arc::clone(self),
                level,
            }),
            _ => None,
        };
        Gensio::from_link(link, self.config.read_buffer_size, mux)
    }

    /// Binds the transport's listening endpoint.
    pub async fn listen(&self) -> Result<Box<dyn ListenHandle>> {
        self.transport
            .listen(self.spec.transport(), &self.config)
            .await
    }

    /// Runs the accept-side handshakes for one inbound link from filter
    /// `from` outward, delivering each finished connection to `sink`.
    ///
    /// A fan-out stage spawns one pipeline per sub-channel and keeps
    /// serving them until the session ends or the accepter shuts down.
    pub(crate) fn accept_from(
        self: Arc<Self>,
        link: RawLink,
        from: usize,
        sink: AcceptSink,
        mux_level: Option<usize>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut link = link;
            for index in from..self.filters.len() {
                match self.wrap_stage(index, link, Role::Accept).await {
                    Ok(Wrapped::Single(next)) => link = next,
                    Ok(Wrapped::Fanout(mut channels)) => {
                        loop {
                            let sub = tokio::select! {
                                _ = sink.cancel.cancelled() => return,
                                sub = channels.recv() => sub,
                            };
                            let Some(sub) = sub else { return };
                            tokio::spawn(Arc::clone(&self).accept_from(
                                sub,
                                index + 1,
                                sink.clone(),
                                Some(index),
                            ));
                        }
                    }
                    Err(e) => {
                        sink.deliver(Err(e)).await;
                        return;
                    }
                }
            }
            let io = self.gensio(link, mux_level);
            sink.deliver(Ok(io)).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(descriptor: &str) -> Arc<StackChain> {
        let registry = StageRegistry::with_builtins();
        let spec = StackSpec::parse_with(descriptor, &registry, Some(Role::Connect)).unwrap();
        Arc::new(StackChain::resolve(spec, &registry, StackConfig::default()).unwrap())
    }

    #[test]
    fn test_filters_are_innermost_first() {
        let chain = chain("msgdelim,mux,echo");
        let names: Vec<_> = chain.filters.iter().map(|(s, _)| s.name.as_str()).collect();
        assert_eq!(names, vec!["mux", "msgdelim"]);
        assert_eq!(chain.transport.name(), "echo");
    }

    #[test]
    fn test_resolve_rejects_unregistered_stage() {
        let spec = StackSpec::parse("msgdelim,echo").unwrap();
        let registry = StageRegistry::new();
        let err = StackChain::resolve(spec, &registry, StackConfig::default()).unwrap_err();
        assert!(matches!(err, GensioError::Parse(ParseError::UnknownStage(_))));
    }

    #[tokio::test]
    async fn test_connect_echo_with_filter() {
        let mut io = chain("msgdelim,echo").connect().await.unwrap();
        assert_eq!(io.stages(), &["msgdelim", "echo"]);
        assert!(io.is_packet());
        io.write(b"one").await.unwrap();
        io.write(b"two").await.unwrap();
        assert_eq!(io.read(64).await.unwrap().into_data().unwrap(), &b"one"[..]);
        assert_eq!(io.read(64).await.unwrap().into_data().unwrap(), &b"two"[..]);
    }

    #[tokio::test]
    async fn test_mux_over_echo_is_refused() {
        // The echo channel reflects our own SYN, which collides with the
        // channel we are opening.
        let err = chain("mux,echo").connect().await.unwrap_err();
        assert!(err.is_establishment_failure());
    }

    struct Stall;

    #[async_trait::async_trait]
    impl FilterDriver for Stall {
        fn name(&self) -> &'static str {
            "stall"
        }

        fn validate(&self, _spec: &StageSpec) -> std::result::Result<(), ParseError> {
            Ok(())
        }

        async fn wrap(
            &self,
            _spec: &StageSpec,
            _link: RawLink,
            _role: Role,
            _config: &StackConfig,
        ) -> Result<Wrapped> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let mut registry = StageRegistry::with_builtins();
        registry.register_filter(Arc::new(Stall));
        let spec = StackSpec::parse_with("stall,echo", &registry, Some(Role::Connect)).unwrap();
        let config = StackConfig {
            handshake_timeout_ms: 50,
            ..StackConfig::default()
        };
        let chain = Arc::new(StackChain::resolve(spec, &registry, config).unwrap());
        let err = chain.connect().await.unwrap_err();
        assert!(matches!(err, GensioError::Timeout { .. }));
        assert!(err.to_string().starts_with("stall handshake"));
    }
}
