#![warn(missing_docs)]

//! gensio: composable stream I/O stacks described by strings.
//!
//! A descriptor such as `ssl(CA=ca.pem),mux(chunksize=64),tcp,localhost,3023`
//! names filter stages (outermost first) over one base transport. The same
//! descriptor drives both directions: a [`Connector`] establishes an outbound
//! [`Gensio`], an [`Accepter`] produces one per inbound peer once every
//! filter handshake has succeeded.

pub mod accepter;
pub mod chain;
pub mod channel;
pub mod config;
pub mod connector;
pub mod descriptor;
pub mod error;
pub mod filter;
pub mod gensio;
pub mod registry;
pub mod transfer;
pub mod transport;

pub use accepter::{AcceptStats, Accepter, AccepterState};
pub use channel::{RawLink, ReadOutcome};
pub use config::{MuxDefaults, StackConfig};
pub use connector::{Connector, Established};
pub use descriptor::{Role, StackSpec, StageClass, StageSpec};
pub use error::{DetectedBy, GensioError, ParseError, Result};
pub use filter::mux::MuxSession;
pub use gensio::{Gensio, GensioState, MAX_READ};
pub use registry::StageRegistry;
pub use transfer::{TransferEngine, TransferReport};
pub use transport::sctp::sctp_available;
