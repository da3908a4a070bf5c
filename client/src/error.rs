use shared::CodecError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),
    #[error("server closed the connection")]
    Closed,
    #[error("login denied with code 0x{0:02X}")]
    Denied(u8),
    #[error("malformed 0x{code:02X} reply: {reason}")]
    Malformed { code: u8, reason: &'static str },
    #[error("datagram transport not initialised")]
    NoDatagramPath,
}
