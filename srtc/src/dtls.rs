use bytes::Bytes;

use srtp::ProtectionProfile;

use crate::certificate::Certificate;
use crate::error::Result;

/// Datagram MTU reported to the DTLS stack.
pub const DTLS_MTU: usize = 1200;

/// Keying material export label, RFC 5764 section 4.2.
pub const KEYING_MATERIAL_LABEL: &str = "EXTRACTOR-dtls_srtp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// More handshake datagrams are needed from the peer.
    WantRead,
    Complete,
}

/// The DTLS engine contract. The engine never touches the network: inbound
/// datagrams are pushed into its receive queue, outbound ones are popped
/// and written to the candidate's raw send queue, mirroring a datagram
/// BIO pair.
pub trait DtlsEngine: Send {
    /// Queues one inbound DTLS datagram.
    fn push_incoming(&mut self, datagram: Bytes);

    /// Pops the next outbound datagram produced by the engine, if any.
    fn pop_outgoing(&mut self) -> Option<Bytes>;

    /// Drives the handshake as far as the queued datagrams allow.
    fn handshake(&mut self) -> Result<HandshakeStatus>;

    /// SHA-256 digest of the peer certificate. Only valid after the
    /// handshake completed.
    fn peer_certificate_sha256(&self) -> Result<Vec<u8>>;

    /// The SRTP profile negotiated through the use_srtp extension.
    fn selected_srtp_profile(&self) -> Result<ProtectionProfile>;

    /// Exports `len` bytes of keying material for the given label.
    fn export_keying_material(&self, label: &str, len: usize) -> Result<Vec<u8>>;
}

/// Creates DTLS engines; the implementation wraps the TLS library and
/// lives outside this crate.
pub trait DtlsFactory: Send + Sync {
    fn create_engine(&self, role: DtlsRole, certificate: &Certificate)
        -> Result<Box<dyn DtlsEngine>>;
}
