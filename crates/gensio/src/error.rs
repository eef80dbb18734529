//! Error taxonomy for stack parsing, establishment and transfer.

use std::fmt;

use thiserror::Error;

/// Errors produced while parsing a stack descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The descriptor was empty or only whitespace.
    #[error("empty stack descriptor")]
    Empty,

    /// Two separators with nothing between them.
    #[error("empty stage at offset {pos}")]
    EmptyStage {
        /// Byte offset into the descriptor.
        pos: usize,
    },

    /// A stage that does not follow `name[(params)]`.
    #[error("malformed stage at offset {pos}: {reason}")]
    Malformed {
        /// Byte offset into the descriptor.
        pos: usize,
        /// What was wrong.
        reason: String,
    },

    /// A parameter list that never closes, or closes twice.
    #[error("unbalanced parentheses at offset {pos}")]
    UnbalancedParens {
        /// Byte offset into the descriptor.
        pos: usize,
    },

    /// No driver is registered under this name.
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    /// The last stage is not a transport.
    #[error("no transport at the end of the descriptor")]
    MissingTransport,

    /// A filter name where only transport arguments may follow.
    #[error("unexpected stage '{token}' after transport '{transport}'")]
    UnexpectedStage {
        /// The transport already seen.
        transport: String,
        /// The offending token.
        token: String,
    },

    /// The same key given twice.
    #[error("{stage}: duplicate parameter '{key}'")]
    DuplicateParam {
        /// Stage name.
        stage: String,
        /// Repeated key.
        key: String,
    },

    /// A key the stage does not understand.
    #[error("{stage}: unknown parameter '{key}'")]
    UnknownParam {
        /// Stage name.
        stage: String,
        /// Unrecognised key.
        key: String,
    },

    /// A known key with a value out of range or of the wrong type.
    #[error("{stage}: invalid value for '{key}': {reason}")]
    InvalidParam {
        /// Stage name.
        stage: String,
        /// Offending key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A required argument or parameter is absent.
    #[error("{stage}: missing {what}")]
    MissingParam {
        /// Stage name.
        stage: String,
        /// What is missing, e.g. `port`.
        what: String,
    },
}

/// Which end of a connection noticed an authentication failure first.
///
/// Either side may win the race, so callers should match on
/// [`GensioError::is_auth_failure`] rather than on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedBy {
    /// This end rejected the peer.
    Local,
    /// The peer rejected us and tore the connection down.
    Remote,
}

impl fmt::Display for DetectedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectedBy::Local => f.write_str("Communication error"),
            DetectedBy::Remote => f.write_str("Remote end closed connection"),
        }
    }
}

/// Errors from establishing, using and closing a gensio.
#[derive(Debug, Error)]
pub enum GensioError {
    /// The descriptor did not parse.
    #[error("invalid stack descriptor: {0}")]
    Parse(#[from] ParseError),

    /// Nothing listens at the target.
    #[error("connection refused to {addr}")]
    ConnectionRefused {
        /// Target address.
        addr: String,
    },

    /// The transport connect did not finish in time.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Target address.
        addr: String,
        /// The limit that expired.
        timeout_ms: u64,
    },

    /// Any other establishment failure.
    #[error("connection to {addr} failed: {reason}")]
    Connection {
        /// Remote address.
        addr: String,
        /// What went wrong.
        reason: String,
    },

    /// A filter handshake rejected the peer or was rejected by it.
    #[error("{stage} authentication failed ({reason}): {detected_by}")]
    AuthenticationFailed {
        /// Filter that failed, e.g. `ssl`.
        stage: String,
        /// Which end noticed first.
        detected_by: DetectedBy,
        /// Detail from the filter.
        reason: String,
    },

    /// Keys, certificates or CA could not be loaded.
    #[error("TLS configuration error: {reason}")]
    Tls {
        /// What could not be loaded.
        reason: String,
    },

    /// The peer sent bytes that break a filter's framing.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with the frame.
        reason: String,
    },

    /// The operation does not apply to this stack.
    #[error("{0} is not supported")]
    NotSupported(String),

    /// The gensio or accepter was closed.
    #[error("gensio is closed")]
    Closed,

    /// A handshake or transfer ran out of time.
    #[error("{what} timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        what: String,
        /// The limit that expired.
        timeout_ms: u64,
    },

    /// A transfer read back different bytes than it wrote.
    #[error("data mismatch at offset {offset}: expected 0x{expected:02x}, got 0x{got:02x}")]
    TransferMismatch {
        /// Offset of the first differing byte.
        offset: usize,
        /// Byte written.
        expected: u8,
        /// Byte read.
        got: u8,
    },

    /// Bad configuration or arguments.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error from a transport or filter.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GensioError {
    /// True for a filter handshake rejection, whichever side detected it.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, GensioError::AuthenticationFailed { .. })
    }

    /// True when the error aborted establishment rather than an open gensio.
    pub fn is_establishment_failure(&self) -> bool {
        matches!(
            self,
            GensioError::ConnectionRefused { .. }
                | GensioError::ConnectionTimeout { .. }
                | GensioError::Connection { .. }
                | GensioError::AuthenticationFailed { .. }
                | GensioError::Timeout { .. }
        )
    }

    /// True when the peer went away or rejected us, as opposed to a local fault.
    pub fn is_remote_close(&self) -> bool {
        match self {
            GensioError::AuthenticationFailed { detected_by, .. } => {
                *detected_by == DetectedBy::Remote
            }
            GensioError::Closed => true,
            GensioError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Maps a failed transport connect onto the establishment taxonomy.
    pub(crate) fn from_connect(addr: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => GensioError::ConnectionRefused {
                addr: addr.to_string(),
            },
            _ => GensioError::Connection {
                addr: addr.to_string(),
                reason: err.to_string(),
            },
        }
    }
}

/// Result alias for gensio operations.
pub type Result<T> = std::result::Result<T, GensioError>;
