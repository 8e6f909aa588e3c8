use crate::error::{Error, Result};

/// The profile list offered to the DTLS use_srtp extension, strongest
/// first.
pub const SRTP_PROFILES_EXTENSION: &str =
    "SRTP_AEAD_AES_128_GCM:SRTP_AEAD_AES_256_GCM:SRTP_AES128_CM_SHA1_80:SRTP_AES128_CM_SHA1_32";

/// ProtectionProfile specifies the cipher and auth tag details, similar to
/// a TLS cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionProfile {
    AeadAes128Gcm,
    AeadAes256Gcm,
    Aes128CmHmacSha1_80,
    Aes128CmHmacSha1_32,
}

impl ProtectionProfile {
    /// Resolves the profile negotiated by DTLS from its registry name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "SRTP_AEAD_AES_128_GCM" => Ok(ProtectionProfile::AeadAes128Gcm),
            "SRTP_AEAD_AES_256_GCM" => Ok(ProtectionProfile::AeadAes256Gcm),
            "SRTP_AES128_CM_SHA1_80" => Ok(ProtectionProfile::Aes128CmHmacSha1_80),
            "SRTP_AES128_CM_SHA1_32" => Ok(ProtectionProfile::Aes128CmHmacSha1_32),
            _ => Err(Error::ErrNoSuchSrtpProfile),
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            ProtectionProfile::AeadAes256Gcm => 32,
            _ => 16,
        }
    }

    pub fn salt_len(&self) -> usize {
        match self {
            ProtectionProfile::AeadAes128Gcm | ProtectionProfile::AeadAes256Gcm => 12,
            _ => 14,
        }
    }

    pub fn auth_key_len(&self) -> usize {
        match self {
            ProtectionProfile::AeadAes128Gcm | ProtectionProfile::AeadAes256Gcm => 0,
            _ => 20,
        }
    }

    /// Bytes appended to an RTP packet by protection.
    pub fn rtp_auth_tag_len(&self) -> usize {
        match self {
            ProtectionProfile::AeadAes128Gcm | ProtectionProfile::AeadAes256Gcm => 16,
            ProtectionProfile::Aes128CmHmacSha1_80 => 10,
            ProtectionProfile::Aes128CmHmacSha1_32 => 4,
        }
    }

    /// HMAC length on SRTCP packets. The non-AEAD profiles always use the
    /// 80-bit tag for control traffic.
    pub fn rtcp_auth_tag_len(&self) -> usize {
        match self {
            ProtectionProfile::AeadAes128Gcm | ProtectionProfile::AeadAes256Gcm => 0,
            _ => 10,
        }
    }

    pub fn aead_auth_tag_len(&self) -> usize {
        match self {
            ProtectionProfile::AeadAes128Gcm | ProtectionProfile::AeadAes256Gcm => 16,
            _ => 0,
        }
    }

    /// Total keying material needed from DTLS: key + salt for each of the
    /// client and server directions.
    pub fn keying_material_len(&self) -> usize {
        2 * (self.key_len() + self.salt_len())
    }
}

#[cfg(test)]
mod protection_profile_test {
    use super::*;

    #[test]
    fn test_lengths() {
        assert_eq!(ProtectionProfile::AeadAes128Gcm.key_len(), 16);
        assert_eq!(ProtectionProfile::AeadAes256Gcm.key_len(), 32);
        assert_eq!(ProtectionProfile::AeadAes128Gcm.salt_len(), 12);
        assert_eq!(ProtectionProfile::Aes128CmHmacSha1_80.salt_len(), 14);
        assert_eq!(ProtectionProfile::Aes128CmHmacSha1_80.rtp_auth_tag_len(), 10);
        assert_eq!(ProtectionProfile::Aes128CmHmacSha1_32.rtp_auth_tag_len(), 4);
        assert_eq!(ProtectionProfile::AeadAes256Gcm.keying_material_len(), 88);
    }

    #[test]
    fn test_profile_order_in_extension() {
        let names: Vec<&str> = SRTP_PROFILES_EXTENSION.split(':').collect();
        assert_eq!(
            names,
            vec![
                "SRTP_AEAD_AES_128_GCM",
                "SRTP_AEAD_AES_256_GCM",
                "SRTP_AES128_CM_SHA1_80",
                "SRTP_AES128_CM_SHA1_32"
            ]
        );
        for name in names {
            ProtectionProfile::from_name(name).unwrap();
        }
    }
}
