use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit, Nonce};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use super::{Cipher, RTCP_ENCRYPTION_FLAG, RTCP_HEADER_SIZE, SRTCP_INDEX_SIZE};
use crate::error::{Error, Result};
use crate::key_derivation::*;
use crate::protection_profile::ProtectionProfile;

pub const AEAD_AUTH_TAG_LEN: usize = 16;

enum AeadCipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

impl AeadCipher {
    fn new(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Ok(AeadCipher::Aes128(
                Aes128Gcm::new_from_slice(key).map_err(|e| Error::Other(e.to_string()))?,
            )),
            32 => Ok(AeadCipher::Aes256(
                Aes256Gcm::new_from_slice(key).map_err(|e| Error::Other(e.to_string()))?,
            )),
            n => Err(Error::SrtpMasterKeyLength(16, n)),
        }
    }

    fn encrypt(&self, nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>> {
        Ok(match self {
            AeadCipher::Aes128(c) => c.encrypt(Nonce::from_slice(nonce), payload)?,
            AeadCipher::Aes256(c) => c.encrypt(Nonce::from_slice(nonce), payload)?,
        })
    }

    fn decrypt(&self, nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>> {
        Ok(match self {
            AeadCipher::Aes128(c) => c.decrypt(Nonce::from_slice(nonce), payload)?,
            AeadCipher::Aes256(c) => c.decrypt(Nonce::from_slice(nonce), payload)?,
        })
    }
}

/// AEAD cipher based on AES-GCM, RFC 7714.
pub(crate) struct CipherAeadAesGcm {
    srtp_cipher: AeadCipher,
    srtcp_cipher: AeadCipher,
    srtp_session_salt: Vec<u8>,
    srtcp_session_salt: Vec<u8>,
}

impl CipherAeadAesGcm {
    pub(crate) fn new(
        profile: ProtectionProfile,
        master_key: &[u8],
        master_salt: &[u8],
    ) -> Result<Self> {
        debug_assert_eq!(master_key.len(), profile.key_len());
        debug_assert_eq!(master_salt.len(), profile.salt_len());

        let srtp_session_key = aes_cm_key_derivation(
            LABEL_SRTP_ENCRYPTION,
            master_key,
            master_salt,
            0,
            master_key.len(),
        )?;
        let srtcp_session_key = aes_cm_key_derivation(
            LABEL_SRTCP_ENCRYPTION,
            master_key,
            master_salt,
            0,
            master_key.len(),
        )?;
        let srtp_session_salt = aes_cm_key_derivation(
            LABEL_SRTP_SALT,
            master_key,
            master_salt,
            0,
            master_salt.len(),
        )?;
        let srtcp_session_salt = aes_cm_key_derivation(
            LABEL_SRTCP_SALT,
            master_key,
            master_salt,
            0,
            master_salt.len(),
        )?;

        Ok(CipherAeadAesGcm {
            srtp_cipher: AeadCipher::new(&srtp_session_key)?,
            srtcp_cipher: AeadCipher::new(&srtcp_session_key)?,
            srtp_session_salt,
            srtcp_session_salt,
        })
    }

    /// The 12-octet IV is two zero octets, the 4-octet SSRC, the 4-octet
    /// ROC and the 2-octet SEQ, XOR'ed with the session salt.
    ///
    /// https://tools.ietf.org/html/rfc7714#section-8.1
    fn rtp_initialization_vector(&self, header: &rtp::header::Header, roc: u32) -> [u8; 12] {
        let mut iv = [0u8; 12];
        BigEndian::write_u32(&mut iv[2..], header.ssrc);
        BigEndian::write_u32(&mut iv[6..], roc);
        BigEndian::write_u16(&mut iv[10..], header.sequence_number);

        for (i, v) in iv.iter_mut().enumerate() {
            *v ^= self.srtp_session_salt[i];
        }
        iv
    }

    /// https://tools.ietf.org/html/rfc7714#section-9.1
    fn rtcp_initialization_vector(&self, srtcp_index: u32, ssrc: u32) -> [u8; 12] {
        let mut iv = [0u8; 12];
        BigEndian::write_u32(&mut iv[2..], ssrc);
        BigEndian::write_u32(&mut iv[8..], srtcp_index);

        for (i, v) in iv.iter_mut().enumerate() {
            *v ^= self.srtcp_session_salt[i];
        }
        iv
    }

    /// The ESRTCP word is appended to the 8-byte header as AAD.
    ///
    /// https://tools.ietf.org/html/rfc7714#section-17
    fn rtcp_additional_authenticated_data(&self, rtcp_packet: &[u8], srtcp_index: u32) -> [u8; 12] {
        let mut aad = [0u8; 12];
        aad[..8].copy_from_slice(&rtcp_packet[..8]);
        BigEndian::write_u32(&mut aad[8..], srtcp_index | RTCP_ENCRYPTION_FLAG);
        aad
    }
}

impl Cipher for CipherAeadAesGcm {
    fn rtp_overhead(&self) -> usize {
        AEAD_AUTH_TAG_LEN
    }

    fn get_rtcp_index(&self, input: &[u8]) -> u32 {
        let pos = input.len() - SRTCP_INDEX_SIZE;
        BigEndian::read_u32(&input[pos..]) & !RTCP_ENCRYPTION_FLAG
    }

    fn encrypt_rtp(
        &mut self,
        packet: &[u8],
        header: &rtp::header::Header,
        roc: u32,
    ) -> Result<Bytes> {
        let header_len = header.marshal_size();
        let mut writer = BytesMut::with_capacity(packet.len() + AEAD_AUTH_TAG_LEN);

        // Header stays in the clear and doubles as AAD
        writer.extend_from_slice(&packet[..header_len]);

        let nonce = self.rtp_initialization_vector(header, roc);
        let encrypted = self.srtp_cipher.encrypt(
            &nonce,
            Payload {
                msg: &packet[header_len..],
                aad: &writer,
            },
        )?;

        writer.extend(encrypted);
        Ok(writer.freeze())
    }

    fn decrypt_rtp(
        &mut self,
        packet: &[u8],
        header: &rtp::header::Header,
        roc: u32,
    ) -> Result<Bytes> {
        let header_len = header.marshal_size();
        if packet.len() < header_len + AEAD_AUTH_TAG_LEN {
            return Err(Error::ErrFailedToVerifyAuthTag);
        }

        let nonce = self.rtp_initialization_vector(header, roc);
        let decrypted = self.srtp_cipher.decrypt(
            &nonce,
            Payload {
                msg: &packet[header_len..],
                aad: &packet[..header_len],
            },
        )?;

        let mut writer = BytesMut::with_capacity(header_len + decrypted.len());
        writer.extend_from_slice(&packet[..header_len]);
        writer.extend(decrypted);
        Ok(writer.freeze())
    }

    fn encrypt_rtcp(&mut self, packet: &[u8], srtcp_index: u32, ssrc: u32) -> Result<Bytes> {
        let iv = self.rtcp_initialization_vector(srtcp_index, ssrc);
        let aad = self.rtcp_additional_authenticated_data(packet, srtcp_index);

        let encrypted = self.srtcp_cipher.encrypt(
            &iv,
            Payload {
                msg: &packet[RTCP_HEADER_SIZE..],
                aad: &aad,
            },
        )?;

        let mut writer =
            BytesMut::with_capacity(RTCP_HEADER_SIZE + encrypted.len() + SRTCP_INDEX_SIZE);
        writer.extend_from_slice(&packet[..RTCP_HEADER_SIZE]);
        writer.extend(encrypted);
        writer.put_u32(srtcp_index | RTCP_ENCRYPTION_FLAG);
        Ok(writer.freeze())
    }

    fn decrypt_rtcp(&mut self, packet: &[u8], srtcp_index: u32, _ssrc: u32) -> Result<Bytes> {
        if packet.len() < RTCP_HEADER_SIZE + AEAD_AUTH_TAG_LEN + SRTCP_INDEX_SIZE {
            return Err(Error::ErrTooShortRtcp);
        }

        let ssrc = BigEndian::read_u32(&packet[4..8]);
        let nonce = self.rtcp_initialization_vector(srtcp_index, ssrc);
        let aad = self.rtcp_additional_authenticated_data(packet, srtcp_index);

        let decrypted = self.srtcp_cipher.decrypt(
            &nonce,
            Payload {
                msg: &packet[RTCP_HEADER_SIZE..packet.len() - SRTCP_INDEX_SIZE],
                aad: &aad,
            },
        )?;

        let mut writer = BytesMut::with_capacity(RTCP_HEADER_SIZE + decrypted.len());
        writer.extend_from_slice(&packet[..RTCP_HEADER_SIZE]);
        writer.extend(decrypted);
        Ok(writer.freeze())
    }
}
