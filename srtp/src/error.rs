use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("SRTP master key must be len {0}, got {1}")]
    SrtpMasterKeyLength(usize, usize),
    #[error("SRTP salt must be len {0}, got {1}")]
    SrtpSaltLength(usize, usize),
    #[error("keying material must be len {0}, got {1}")]
    KeyingMaterialLength(usize, usize),
    #[error("no such SRTP profile")]
    ErrNoSuchSrtpProfile,
    #[error("packet is too short to be an RTP packet")]
    ErrTooShortRtp,
    #[error("packet is too short to be an RTCP packet")]
    ErrTooShortRtcp,
    #[error("failed to verify auth tag")]
    ErrFailedToVerifyAuthTag,
    #[error("srtp ssrc={0} seq={1}: duplicated")]
    SrtpSsrcDuplicated(u32, u16),
    #[error("srtcp ssrc={0} index={1}: duplicated")]
    SrtcpSsrcDuplicated(u32, u32),
    #[error("{0}")]
    Other(String),
}

impl From<rtp::Error> for Error {
    fn from(e: rtp::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<aead::Error> for Error {
    fn from(_: aead::Error) -> Self {
        Error::ErrFailedToVerifyAuthTag
    }
}
