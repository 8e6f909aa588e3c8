use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("packet too short to be a valid RTCP packet")]
    PacketTooShort,
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("wrong packet type")]
    WrongType,
    #[error("invalid header length field")]
    BadLength,
    #[error("bad version")]
    BadVersion,
    #[error("delta exceeds the representable limit")]
    DeltaExceedLimit,
    #[error("packet status chunk must be 2 bytes")]
    PacketStatusChunkLength,
    #[error("{0}")]
    Other(String),
}
