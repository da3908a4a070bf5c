//! Error types for the connection pipeline

use shared::{ClientBuild, CodecError, Expansion};
use std::io;
use thiserror::Error;

/// Reasons a handshake is refused
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("client build {0} is not supported")]
    UnsupportedBuild(ClientBuild),
    #[error("client build {build} cannot play expansion {expansion:?}")]
    ExpansionNotAllowed {
        build: ClientBuild,
        expansion: Expansion,
    },
    #[error("unknown expansion id {0}")]
    UnknownExpansion(u8),
}

/// Everything that can end a connection
///
/// Any `Err` returned from a handler or from the receive path terminates the
/// connection. [`PipelineError::is_graceful`] tells the network layer whether
/// queued stream frames should be flushed first.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("login rejected for account {0}")]
    LoginRejected(String),
    #[error("message 0x{0:02X} requires a completed handshake")]
    NotNegotiated(u8),
    #[error("client claimed an unauthorised flight mode")]
    FlyHack,
    #[error("speed hack tolerance exceeded ({violations} consecutive violations)")]
    SpeedHack { violations: u32 },
    #[error("outbound frame 0x{code:02X} of {len} bytes exceeds the wire limit")]
    OversizeOutbound { code: u8, len: usize },
    #[error("client crash report received")]
    CrashReported,
    #[error("client quit")]
    Quit,
    #[error("dispatch pool closed")]
    PoolClosed,
    #[error("connection closed")]
    Disconnected,
}

impl PipelineError {
    /// Business-level closes deliver their explanatory frames before the
    /// socket goes away; framing and anomaly errors drop the socket at once.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            PipelineError::Handshake(_) | PipelineError::LoginRejected(_) | PipelineError::Quit
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
