use aes::cipher::generic_array::GenericArray;
use aes::cipher::{KeyIvInit, StreamCipher};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use super::{Cipher, RTCP_ENCRYPTION_FLAG, RTCP_HEADER_SIZE, SRTCP_INDEX_SIZE};
use crate::error::{Error, Result};
use crate::key_derivation::*;
use crate::protection_profile::ProtectionProfile;

type HmacSha1 = Hmac<Sha1>;
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

const RTCP_AUTH_TAG_LEN: usize = 10;

/// AES-CM + HMAC-SHA1, RFC 3711. The RTP auth tag is truncated to 80 or
/// 32 bits per the profile; RTCP always carries the 80-bit tag.
pub(crate) struct CipherAesCmHmacSha1 {
    profile: ProtectionProfile,
    srtp_session_key: Vec<u8>,
    srtp_session_salt: Vec<u8>,
    srtp_session_auth: HmacSha1,
    srtcp_session_key: Vec<u8>,
    srtcp_session_salt: Vec<u8>,
    srtcp_session_auth: HmacSha1,
}

impl CipherAesCmHmacSha1 {
    pub(crate) fn new(
        profile: ProtectionProfile,
        master_key: &[u8],
        master_salt: &[u8],
    ) -> Result<Self> {
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

        let auth_key_len = profile.auth_key_len();
        let srtp_session_auth_tag = aes_cm_key_derivation(
            LABEL_SRTP_AUTHENTICATION_TAG,
            master_key,
            master_salt,
            0,
            auth_key_len,
        )?;
        let srtcp_session_auth_tag = aes_cm_key_derivation(
            LABEL_SRTCP_AUTHENTICATION_TAG,
            master_key,
            master_salt,
            0,
            auth_key_len,
        )?;

        let srtp_session_auth = HmacSha1::new_from_slice(&srtp_session_auth_tag)
            .map_err(|e| Error::Other(e.to_string()))?;
        let srtcp_session_auth = HmacSha1::new_from_slice(&srtcp_session_auth_tag)
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(CipherAesCmHmacSha1 {
            profile,
            srtp_session_key,
            srtp_session_salt,
            srtp_session_auth,
            srtcp_session_key,
            srtcp_session_salt,
            srtcp_session_auth,
        })
    }

    /// https://tools.ietf.org/html/rfc3711#section-4.2
    ///
    /// For SRTP the authenticated portion is the whole packet concatenated
    /// with the ROC; the HMAC output is truncated to the profile's tag
    /// length by the caller.
    fn generate_srtp_auth_tag(&self, buf: &[u8], roc: u32) -> [u8; 20] {
        let mut signer = self.srtp_session_auth.clone();
        signer.update(buf);
        signer.update(&roc.to_be_bytes());
        signer.finalize().into_bytes().into()
    }

    fn generate_srtcp_auth_tag(&self, buf: &[u8]) -> [u8; 20] {
        let mut signer = self.srtcp_session_auth.clone();
        signer.update(buf);
        signer.finalize().into_bytes().into()
    }

    fn apply_keystream(key: &[u8], counter: &[u8; 16], data: &mut [u8]) {
        let key = GenericArray::from_slice(key);
        let nonce = GenericArray::from_slice(counter);
        let mut stream = Aes128Ctr::new(key, nonce);
        stream.apply_keystream(data);
    }
}

impl Cipher for CipherAesCmHmacSha1 {
    fn rtp_overhead(&self) -> usize {
        self.profile.rtp_auth_tag_len()
    }

    fn get_rtcp_index(&self, input: &[u8]) -> u32 {
        let tail_offset = input.len() - (RTCP_AUTH_TAG_LEN + SRTCP_INDEX_SIZE);
        BigEndian::read_u32(&input[tail_offset..tail_offset + SRTCP_INDEX_SIZE])
            & !RTCP_ENCRYPTION_FLAG
    }

    fn encrypt_rtp(
        &mut self,
        packet: &[u8],
        header: &rtp::header::Header,
        roc: u32,
    ) -> Result<Bytes> {
        let auth_tag_len = self.profile.rtp_auth_tag_len();
        let mut writer = Vec::with_capacity(packet.len() + auth_tag_len);
        writer.extend_from_slice(packet);

        let counter = generate_counter(
            header.sequence_number,
            roc,
            header.ssrc,
            &self.srtp_session_salt,
        );
        let header_len = header.marshal_size();
        Self::apply_keystream(&self.srtp_session_key, &counter, &mut writer[header_len..]);

        let auth_tag = &self.generate_srtp_auth_tag(&writer, roc)[..auth_tag_len];
        writer.extend(auth_tag);

        Ok(Bytes::from(writer))
    }

    fn decrypt_rtp(
        &mut self,
        packet: &[u8],
        header: &rtp::header::Header,
        roc: u32,
    ) -> Result<Bytes> {
        let auth_tag_len = self.profile.rtp_auth_tag_len();
        if packet.len() < header.marshal_size() + auth_tag_len {
            return Err(Error::ErrTooShortRtp);
        }

        let actual_tag = &packet[packet.len() - auth_tag_len..];
        let cipher_text = &packet[..packet.len() - auth_tag_len];

        let expected_tag = &self.generate_srtp_auth_tag(cipher_text, roc)[..auth_tag_len];
        if actual_tag.ct_eq(expected_tag).unwrap_u8() != 1 {
            return Err(Error::ErrFailedToVerifyAuthTag);
        }

        let mut writer = cipher_text.to_vec();
        let counter = generate_counter(
            header.sequence_number,
            roc,
            header.ssrc,
            &self.srtp_session_salt,
        );
        let header_len = header.marshal_size();
        Self::apply_keystream(&self.srtp_session_key, &counter, &mut writer[header_len..]);

        Ok(Bytes::from(writer))
    }

    fn encrypt_rtcp(&mut self, packet: &[u8], srtcp_index: u32, ssrc: u32) -> Result<Bytes> {
        let mut writer =
            Vec::with_capacity(packet.len() + SRTCP_INDEX_SIZE + RTCP_AUTH_TAG_LEN);
        writer.extend_from_slice(packet);

        let counter = generate_counter(
            (srtcp_index & 0xFFFF) as u16,
            srtcp_index >> 16,
            ssrc,
            &self.srtcp_session_salt,
        );
        Self::apply_keystream(
            &self.srtcp_session_key,
            &counter,
            &mut writer[RTCP_HEADER_SIZE..],
        );

        // ESRTCP word with the encryption bit
        writer.put_u32(srtcp_index | RTCP_ENCRYPTION_FLAG);

        let auth_tag = &self.generate_srtcp_auth_tag(&writer)[..RTCP_AUTH_TAG_LEN];
        writer.extend(auth_tag);

        Ok(Bytes::from(writer))
    }

    fn decrypt_rtcp(&mut self, packet: &[u8], srtcp_index: u32, ssrc: u32) -> Result<Bytes> {
        if packet.len() < RTCP_HEADER_SIZE + SRTCP_INDEX_SIZE + RTCP_AUTH_TAG_LEN {
            return Err(Error::ErrTooShortRtcp);
        }

        let tail_offset = packet.len() - (RTCP_AUTH_TAG_LEN + SRTCP_INDEX_SIZE);

        let actual_tag = &packet[packet.len() - RTCP_AUTH_TAG_LEN..];
        let cipher_text = &packet[..packet.len() - RTCP_AUTH_TAG_LEN];

        let expected_tag = &self.generate_srtcp_auth_tag(cipher_text)[..RTCP_AUTH_TAG_LEN];
        if actual_tag.ct_eq(expected_tag).unwrap_u8() != 1 {
            return Err(Error::ErrFailedToVerifyAuthTag);
        }

        let mut writer = packet[..tail_offset].to_vec();

        let is_encrypted = packet[tail_offset] & 0x80 != 0;
        if is_encrypted {
            let counter = generate_counter(
                (srtcp_index & 0xFFFF) as u16,
                srtcp_index >> 16,
                ssrc,
                &self.srtcp_session_salt,
            );
            Self::apply_keystream(
                &self.srtcp_session_key,
                &counter,
                &mut writer[RTCP_HEADER_SIZE..],
            );
        }

        Ok(Bytes::from(writer))
    }
}
