//! Raw channel capability shared by transports and filters.
//!
//! Every stage, whether a base transport or a filter wrapping another stage,
//! exposes the same capability: an ordered, bidirectional tokio byte channel.
//! A [`RawLink`] carries such a channel together with the metadata a stack
//! accumulates while it is being built.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::filter::mux::MuxSession;

/// A bidirectional byte channel as seen by the stage above it.
pub trait RawChannel: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> RawChannel for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned, type-erased channel. The outermost box owns every inner stage.
pub type BoxedChannel = Box<dyn RawChannel>;

/// Result of a single read on a gensio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes received (never empty).
    Data(Bytes),
    /// The peer closed its sending side gracefully.
    EndOfStream,
}

impl ReadOutcome {
    /// Returns the received bytes, or `None` at end of stream.
    pub fn into_data(self) -> Option<Bytes> {
        match self {
            ReadOutcome::Data(data) => Some(data),
            ReadOutcome::EndOfStream => None,
        }
    }
}

/// A channel in the middle of being stacked, plus what is known about it.
pub struct RawLink {
    /// The outermost channel built so far.
    pub channel: BoxedChannel,
    /// Resolved address of the far end.
    pub raddr: String,
    /// Local address, when the transport has one.
    pub local_addr: Option<String>,
    /// Host name the connection was made to, used for TLS server names.
    pub host: Option<String>,
    /// DER certificates presented by the peer during a TLS handshake.
    pub peer_certs: Option<Vec<Vec<u8>>>,
    /// Set when a stage preserves message boundaries.
    pub is_packet: bool,
    /// Stage names, outermost first.
    pub stages: Vec<String>,
    pub(crate) mux: Option<Arc<MuxSession>>,
}

impl RawLink {
    /// Creates a link for a freshly connected transport channel.
    pub fn new(stage: &str, channel: BoxedChannel, raddr: impl Into<String>) -> Self {
        Self {
            channel,
            raddr: raddr.into(),
            local_addr: None,
            host: None,
            peer_certs: None,
            is_packet: false,
            stages: vec![stage.to_string()],
            mux: None,
        }
    }

    /// Sets the local address.
    pub fn with_local_addr(mut self, local_addr: impl Into<String>) -> Self {
        self.local_addr = Some(local_addr.into());
        self
    }

    /// Sets the host name used to reach the peer.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Replaces the channel with one produced by a filter stage wrapping it.
    pub fn wrap(mut self, stage: &str, channel: BoxedChannel) -> Self {
        self.channel = channel;
        self.stages.insert(0, stage.to_string());
        self
    }

    /// Splits off the channel, keeping the metadata for a new wrapper.
    pub fn take_channel(self) -> (BoxedChannel, LinkMeta) {
        let RawLink {
            channel,
            raddr,
            local_addr,
            host,
            peer_certs,
            is_packet,
            stages,
            mux,
        } = self;
        (
            channel,
            LinkMeta {
                raddr,
                local_addr,
                host,
                peer_certs,
                is_packet,
                stages,
                mux,
            },
        )
    }
}

impl std::fmt::Debug for RawLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawLink")
            .field("raddr", &self.raddr)
            .field("local_addr", &self.local_addr)
            .field("stages", &self.stages)
            .field("is_packet", &self.is_packet)
            .finish()
    }
}

/// Link metadata detached from its channel.
#[derive(Clone)]
pub struct LinkMeta {
    /// Remote address.
    pub raddr: String,
    /// Local socket address, when there is a socket.
    pub local_addr: Option<String>,
    /// Host name the connector dialled.
    pub host: Option<String>,
    /// DER certificates the peer presented.
    pub peer_certs: Option<Vec<Vec<u8>>>,
    /// True when a stage preserves message boundaries.
    pub is_packet: bool,
    /// Stage names, outermost first.
    pub stages: Vec<String>,
    pub(crate) mux: Option<Arc<MuxSession>>,
}

impl LinkMeta {
    /// Reattaches a channel produced by the stage named `stage`.
    pub fn attach(self, stage: &str, channel: BoxedChannel) -> RawLink {
        let mut stages = self.stages;
        stages.insert(0, stage.to_string());
        RawLink {
            channel,
            raddr: self.raddr,
            local_addr: self.local_addr,
            host: self.host,
            peer_certs: self.peer_certs,
            is_packet: self.is_packet,
            stages,
            mux: self.mux,
        }
    }
}

/// A bound listening endpoint owned by exactly one accepter.
#[async_trait]
pub trait ListenHandle: Send + Sync {
    /// Waits for the next inbound transport connection.
    async fn accept(&self) -> Result<RawLink>;

    /// The address this handle is bound to.
    fn local_addr(&self) -> Result<String>;
}
