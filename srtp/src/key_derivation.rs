use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};

use crate::error::{Error, Result};

pub const LABEL_SRTP_ENCRYPTION: u8 = 0x00;
pub const LABEL_SRTP_AUTHENTICATION_TAG: u8 = 0x01;
pub const LABEL_SRTP_SALT: u8 = 0x02;
pub const LABEL_SRTCP_ENCRYPTION: u8 = 0x03;
pub const LABEL_SRTCP_AUTHENTICATION_TAG: u8 = 0x04;
pub const LABEL_SRTCP_SALT: u8 = 0x05;

enum KdfCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl KdfCipher {
    fn new(master_key: &[u8]) -> Result<Self> {
        match master_key.len() {
            16 => Ok(KdfCipher::Aes128(
                Aes128::new_from_slice(master_key).map_err(|e| Error::Other(e.to_string()))?,
            )),
            32 => Ok(KdfCipher::Aes256(
                Aes256::new_from_slice(master_key).map_err(|e| Error::Other(e.to_string()))?,
            )),
            n => Err(Error::SrtpMasterKeyLength(16, n)),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; 16]) {
        match self {
            KdfCipher::Aes128(c) => c.encrypt_block(block.into()),
            KdfCipher::Aes256(c) => c.encrypt_block(block.into()),
        }
    }
}

/// AES-CM key derivation, RFC 3711 section 4.3.
///
/// The input block is the master salt left-aligned in 16 bytes with the
/// label XOR'ed into byte 7; the output is the AES-CTR keystream over that
/// block, truncated to `out_len`.
pub fn aes_cm_key_derivation(
    label: u8,
    master_key: &[u8],
    master_salt: &[u8],
    index_over_kdr: u64,
    out_len: usize,
) -> Result<Vec<u8>> {
    if index_over_kdr != 0 {
        // The KDR is left at its default of zero in DTLS-SRTP
        return Err(Error::Other("index_over_kdr > 0 is not supported".to_owned()));
    }
    if master_salt.len() > 14 {
        return Err(Error::SrtpSaltLength(14, master_salt.len()));
    }

    let cipher = KdfCipher::new(master_key)?;

    let mut prf_in = [0u8; 16];
    prf_in[..master_salt.len()].copy_from_slice(master_salt);
    prf_in[7] ^= label;

    let mut out = Vec::with_capacity((out_len + 15) / 16 * 16);
    let mut i = 0u16;
    while out.len() < out_len {
        let mut block = prf_in;
        block[14..16].copy_from_slice(&i.to_be_bytes());
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
        i += 1;
    }
    out.truncate(out_len);
    Ok(out)
}

/// The per-packet AES-CM counter, RFC 3711 section 4.1.1: session salt
/// XOR'ed with SSRC, ROC and SEQ, low 16 bits left for the block counter.
pub fn generate_counter(
    sequence_number: u16,
    rollover_counter: u32,
    ssrc: u32,
    session_salt: &[u8],
) -> [u8; 16] {
    let mut counter = [0u8; 16];
    counter[4..8].copy_from_slice(&ssrc.to_be_bytes());
    counter[8..12].copy_from_slice(&rollover_counter.to_be_bytes());
    counter[12..14].copy_from_slice(&sequence_number.to_be_bytes());

    for (i, s) in session_salt.iter().enumerate() {
        counter[i] ^= s;
    }
    counter
}

#[cfg(test)]
mod key_derivation_test {
    use super::*;

    fn from_hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    // https://datatracker.ietf.org/doc/html/rfc3711#appendix-B.3
    #[test]
    fn test_rfc3711_b3_cipher_key() {
        let master_key = from_hex("E1F97A0D3E018BE0D64FA32C06DE4139");
        let master_salt = from_hex("0EC675AD498AFEEBB6960B3AABE6");

        let key =
            aes_cm_key_derivation(LABEL_SRTP_ENCRYPTION, &master_key, &master_salt, 0, 16)
                .unwrap();
        assert_eq!(key, from_hex("C61E7A93744F39EE10734AFE3FF7A087"));
    }

    #[test]
    fn test_rfc3711_b3_auth_key() {
        let master_key = from_hex("E1F97A0D3E018BE0D64FA32C06DE4139");
        let master_salt = from_hex("0EC675AD498AFEEBB6960B3AABE6");

        let auth = aes_cm_key_derivation(
            LABEL_SRTP_AUTHENTICATION_TAG,
            &master_key,
            &master_salt,
            0,
            20,
        )
        .unwrap();
        assert_eq!(
            auth,
            from_hex("CEBE321F6FF7716B6FD4AB49AF256A156D38BAA4")
        );
    }

    #[test]
    fn test_rfc3711_b3_salt() {
        let master_key = from_hex("E1F97A0D3E018BE0D64FA32C06DE4139");
        let master_salt = from_hex("0EC675AD498AFEEBB6960B3AABE6");

        let salt =
            aes_cm_key_derivation(LABEL_SRTP_SALT, &master_key, &master_salt, 0, 14).unwrap();
        assert_eq!(salt, from_hex("30CBBC08863D8C85D49DB34A9AE1"));
    }

    #[test]
    fn test_256_bit_key_shape() {
        let master_key = from_hex(
            "F0F04914B513F2763A1B1FA130F10E2998F6F6E43E4309D1E622A0E332B9F1B6",
        );
        let master_salt = from_hex("3B04803DE51EE7C96423AB5B78D2");

        let key =
            aes_cm_key_derivation(LABEL_SRTP_ENCRYPTION, &master_key, &master_salt, 0, 32)
                .unwrap();
        assert_eq!(key.len(), 32);
        let salt =
            aes_cm_key_derivation(LABEL_SRTP_SALT, &master_key, &master_salt, 0, 12).unwrap();
        assert_eq!(salt.len(), 12);
    }

    #[test]
    fn test_counter_layout() {
        let salt = from_hex("30CBBC08863D8C85D49DB34A9AE1");
        let counter = generate_counter(32846, 0, 4160032296, &salt);
        // Low two bytes stay zero for the block counter
        assert_eq!(&counter[14..], &[0, 0]);
        // XOR is an involution
        let mut undo = counter;
        for (i, s) in salt.iter().enumerate() {
            undo[i] ^= s;
        }
        assert_eq!(&undo[4..8], &4160032296u32.to_be_bytes());
        assert_eq!(&undo[12..14], &32846u16.to_be_bytes());
    }
}
