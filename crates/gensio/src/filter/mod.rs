//! Filter stages stacked on top of a transport.
//!
//! A filter takes the [`RawLink`] built so far and returns a link whose
//! channel transforms bytes in transit. Most filters are one-to-one; the
//! multiplexer on the accept side fans one link out into a stream of
//! sub-channel links.

pub mod msgdelim;
pub mod mux;
pub mod tls;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::RawLink;
use crate::config::StackConfig;
use crate::descriptor::{Role, StageSpec};
use crate::error::{ParseError, Result};

/// What a filter produced from one inbound link.
pub enum Wrapped {
    /// One link out for the link in.
    Single(RawLink),
    /// Links opened by the remote end arrive here until the session ends.
    Fanout(mpsc::Receiver<RawLink>),
}

impl std::fmt::Debug for Wrapped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Wrapped::Single(link) => f.debug_tuple("Single").field(link).finish(),
            Wrapped::Fanout(_) => f.write_str("Fanout"),
        }
    }
}

/// A stackable transform exposing the same channel capability it wraps.
#[async_trait]
pub trait FilterDriver: Send + Sync + 'static {
    /// The stage name used in descriptors.
    fn name(&self) -> &'static str;

    /// Checks keyed parameters.
    fn validate(&self, spec: &StageSpec) -> std::result::Result<(), ParseError>;

    /// Runs the stage's handshake over `link` and wraps it.
    async fn wrap(
        &self,
        spec: &StageSpec,
        link: RawLink,
        role: Role,
        config: &StackConfig,
    ) -> Result<Wrapped>;

    /// True when the accept side of this stage yields [`Wrapped::Fanout`].
    fn is_fanout(&self) -> bool {
        false
    }
}
