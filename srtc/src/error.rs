use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The library error taxonomy. Parsing, negotiation and protocol failures
/// are `InvalidData`; socket-level failures are `Os`. Receive-side errors
/// never surface here, they are logged and the datagram is dropped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("os error: {0}")]
    Os(#[from] io::Error),
}

impl Error {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Error::InvalidData(message.into())
    }
}

impl From<stun::Error> for Error {
    fn from(e: stun::Error) -> Self {
        Error::InvalidData(e.to_string())
    }
}

impl From<rtp::Error> for Error {
    fn from(e: rtp::Error) -> Self {
        Error::InvalidData(e.to_string())
    }
}

impl From<rtcp::Error> for Error {
    fn from(e: rtcp::Error) -> Self {
        Error::InvalidData(e.to_string())
    }
}

impl From<srtp::Error> for Error {
    fn from(e: srtp::Error) -> Self {
        Error::InvalidData(e.to_string())
    }
}
