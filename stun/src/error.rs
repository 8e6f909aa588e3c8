use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("attribute not found")]
    ErrAttributeNotFound,
    #[error("unexpected EOF: not enough bytes to read header")]
    ErrUnexpectedHeaderEof,
    #[error("{0:x} is invalid magic cookie (should be {1:x})")]
    ErrInvalidMagicCookie(u32, u32),
    #[error("message size {0} exceeds the {1} byte limit")]
    ErrMessageTooLarge(usize, usize),
    #[error("attribute size is invalid")]
    ErrAttributeSizeInvalid,
    #[error("FINGERPRINT before MESSAGE-INTEGRITY attribute")]
    ErrFingerprintBeforeIntegrity,
    #[error("fingerprint check failed")]
    ErrFingerprintMismatch,
    #[error("integrity check failed")]
    ErrIntegrityMismatch,
    #[error("invalid address family value")]
    ErrBadUnexpectedFamily,
    #[error("{0}")]
    Other(String),
}
