use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("packet is not large enough")]
    ErrShortPacket,
    #[error("buffer too small")]
    ErrBufferTooSmall,
    #[error("header extension id must be between 1 and 14 for one-byte extensions")]
    ErrRfc8285OneByteHeaderIdRange,
    #[error("header extension payload must be 16 bytes or less for one-byte extensions")]
    ErrRfc8285OneByteHeaderSize,
    #[error("header extension id must be between 1 and 255 for two-byte extensions")]
    ErrRfc8285TwoByteHeaderIdRange,
    #[error("header extension payload must be 255 bytes or less for two-byte extensions")]
    ErrRfc8285TwoByteHeaderSize,
    #[error("STAP-A declared size is larger than buffer: {0} > {1}")]
    StapASizeLargerThanBuffer(usize, usize),
    #[error("nalu type {0} is currently not handled")]
    NaluTypeIsNotHandled(u8),
    #[error("{0}")]
    Other(String),
}
