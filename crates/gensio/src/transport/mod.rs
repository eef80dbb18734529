//! Transport drivers: the innermost stage of every stack.
//!
//! This module defines the [`TransportDriver`] trait that the TCP, SCTP and
//! echo backends implement, plus the positional address handling shared by
//! the network transports.

pub mod echo;
pub mod sctp;
pub mod tcp;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::channel::{ListenHandle, RawLink};
use crate::config::StackConfig;
use crate::descriptor::{Role, StageSpec};
use crate::error::{GensioError, ParseError, Result};

/// A leaf provider of raw connection-oriented delivery.
#[async_trait]
pub trait TransportDriver: Send + Sync + 'static {
    /// The stage name used in descriptors.
    fn name(&self) -> &'static str;

    /// Checks keyed and positional parameters. `role` is `None` for a
    /// role-neutral parse.
    fn validate(&self, spec: &StageSpec, role: Option<Role>) -> std::result::Result<(), ParseError>;

    /// Connects to the peer described by `spec`.
    async fn connect(&self, spec: &StageSpec, config: &StackConfig) -> Result<RawLink>;

    /// Binds a listening endpoint described by `spec`.
    async fn listen(&self, spec: &StageSpec, config: &StackConfig)
        -> Result<Box<dyn ListenHandle>>;
}

/// Host and port taken from a network transport's positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetAddr {
    /// Host name or address; `None` binds every interface.
    pub host: Option<String>,
    /// Port, 0 for an ephemeral one when listening.
    pub port: u16,
}

impl NetAddr {
    /// Reads `[host,]port` from the positional parameters of `spec`.
    pub fn from_spec(spec: &StageSpec) -> std::result::Result<Self, ParseError> {
        let (host, port) = match spec.args.as_slice() {
            [] => return Err(spec.missing("port")),
            [port] => (None, port),
            [host, port] => (Some(host.clone()), port),
            _ => {
                return Err(spec.invalid(
                    "address",
                    format!("expected [host,]port, got {} parameters", spec.args.len()),
                ))
            }
        };
        let port = port
            .parse::<u16>()
            .map_err(|e| spec.invalid("port", format!("'{}': {}", port, e)))?;
        Ok(Self { host, port })
    }

    /// Validates positional parameters for `role`.
    pub fn validate(spec: &StageSpec, role: Option<Role>) -> std::result::Result<Self, ParseError> {
        let addr = Self::from_spec(spec)?;
        if role == Some(Role::Connect) && addr.host.is_none() {
            return Err(spec.missing("host"));
        }
        Ok(addr)
    }

    /// `host:port` for connecting. Requires a host.
    pub fn connect_target(&self) -> String {
        join_host_port(self.host.as_deref().unwrap_or("localhost"), self.port)
    }

    /// `host:port` for binding; no host means every IPv4 interface.
    pub fn bind_target(&self) -> String {
        join_host_port(self.host.as_deref().unwrap_or("0.0.0.0"), self.port)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Resolves `target`, failing when it yields no address.
pub(crate) async fn resolve(target: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target)
        .await
        .map_err(|e| GensioError::from_connect(target, e))?
        .collect();
    if addrs.is_empty() {
        return Err(GensioError::Connection {
            addr: target.to_string(),
            reason: "host resolved to no addresses".to_string(),
        });
    }
    Ok(addrs)
}
