pub mod cipher_aead_aes_gcm;
pub mod cipher_aes_cm_hmac_sha1;

use bytes::Bytes;

use crate::error::Result;

///NOTE: Auth tag and AEAD auth tag are placed at different positions in
///SRTCP.
///
///In a non-AEAD cipher, the authentication tag is placed *after* the
///ESRTCP word (encrypted-flag and SRTCP index):
///
///> | RTCP Header | Encrypted payload |E| SRTCP Index | Auth tag |
///
///In an AEAD cipher, the auth tag is embedded in the ciphertext, *before*
///the ESRTCP word:
///
///> | RTCP Header | Encrypted payload | AEAD auth tag |E| SRTCP Index |
///
///See https://tools.ietf.org/html/rfc7714 for the full specification.

/// One direction of an SRTP cipher: each instance is keyed with one master
/// key/salt pair and used only for encryption or only for decryption.
pub(crate) trait Cipher {
    /// Bytes added to an RTP payload by encrypt_rtp.
    fn rtp_overhead(&self) -> usize;

    /// Retrieves the ESRTCP index from the tail of a protected packet.
    fn get_rtcp_index(&self, input: &[u8]) -> u32;

    /// Encrypts a full RTP packet (header left in clear), appending the
    /// auth tag.
    fn encrypt_rtp(&mut self, packet: &[u8], header: &rtp::header::Header, roc: u32)
        -> Result<Bytes>;

    /// Decrypts a protected RTP packet, verifying its auth tag.
    fn decrypt_rtp(&mut self, packet: &[u8], header: &rtp::header::Header, roc: u32)
        -> Result<Bytes>;

    /// Encrypts a full RTCP packet, appending tag and ESRTCP trailer.
    fn encrypt_rtcp(&mut self, packet: &[u8], srtcp_index: u32, ssrc: u32) -> Result<Bytes>;

    /// Decrypts a protected RTCP packet, verifying and stripping tag and
    /// trailer.
    fn decrypt_rtcp(&mut self, packet: &[u8], srtcp_index: u32, ssrc: u32) -> Result<Bytes>;
}

pub(crate) const SRTCP_INDEX_SIZE: usize = 4;
pub(crate) const RTCP_ENCRYPTION_FLAG: u32 = 0x8000_0000;
pub(crate) const RTCP_HEADER_SIZE: usize = 8;
