//! Name → stage driver lookup table.
//!
//! The registry is the only place stage names are resolved. The built-in
//! kinds are registered by [`StageRegistry::with_builtins`]; callers may add
//! their own transports and filters before parsing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::filter::msgdelim::MsgDelimFilter;
use crate::filter::mux::MuxFilter;
use crate::filter::tls::TlsFilter;
use crate::filter::FilterDriver;
use crate::transport::echo::EchoTransport;
use crate::transport::sctp::SctpTransport;
use crate::transport::tcp::TcpTransport;
use crate::transport::TransportDriver;

/// A resolved stage kind.
#[derive(Clone)]
pub enum StageDriver {
    /// A base transport.
    Transport(Arc<dyn TransportDriver>),
    /// A filter stage.
    Filter(Arc<dyn FilterDriver>),
}

impl std::fmt::Debug for StageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageDriver::Transport(t) => write!(f, "Transport({})", t.name()),
            StageDriver::Filter(d) => write!(f, "Filter({})", d.name()),
        }
    }
}

/// Registry of known stage kinds.
#[derive(Clone, Default)]
pub struct StageRegistry {
    drivers: HashMap<String, StageDriver>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding echo, tcp, sctp, ssl, mux and msgdelim.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_transport(Arc::new(EchoTransport));
        registry.register_transport(Arc::new(TcpTransport));
        registry.register_transport(Arc::new(SctpTransport));
        registry.register_filter(Arc::new(TlsFilter));
        registry.register_filter(Arc::new(MuxFilter));
        registry.register_filter(Arc::new(MsgDelimFilter));
        registry
    }

    /// Registers a transport under its own name, replacing any previous one.
    pub fn register_transport(&mut self, driver: Arc<dyn TransportDriver>) {
        self.drivers
            .insert(driver.name().to_string(), StageDriver::Transport(driver));
    }

    /// Registers a filter under its own name, replacing any previous one.
    pub fn register_filter(&mut self, driver: Arc<dyn FilterDriver>) {
        self.drivers
            .insert(driver.name().to_string(), StageDriver::Filter(driver));
    }

    /// The driver registered under `name`, of either kind.
    pub fn lookup(&self, name: &str) -> Option<StageDriver> {
        self.drivers.get(name).cloned()
    }

    /// The transport registered under `name`.
    pub fn transport(&self, name: &str) -> Option<Arc<dyn TransportDriver>> {
        match self.drivers.get(name) {
            Some(StageDriver::Transport(t)) => Some(t.clone()),
            _ => None,
        }
    }

    /// The filter registered under `name`.
    pub fn filter(&self, name: &str) -> Option<Arc<dyn FilterDriver>> {
        match self.drivers.get(name) {
            Some(StageDriver::Filter(f)) => Some(f.clone()),
            _ => None,
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("names", &self.names())
            .finish()
    }
}
