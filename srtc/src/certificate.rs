use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// The self-signed certificate generated for the offer, plus its SHA-256
/// fingerprint as published in the SDP.
pub struct Certificate {
    der: Vec<u8>,
    private_key_der: Vec<u8>,
    fingerprint_sha256: Vec<u8>,
}

impl Certificate {
    pub fn generate() -> Result<Self> {
        let cert = rcgen::generate_simple_self_signed(vec!["srtc".to_owned()])
            .map_err(|e| Error::invalid_data(format!("certificate generation: {e}")))?;
        let der = cert.cert.der().to_vec();
        let private_key_der = cert.key_pair.serialize_der();
        let fingerprint_sha256 = Sha256::digest(&der).to_vec();
        Ok(Certificate {
            der,
            private_key_der,
            fingerprint_sha256,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn private_key_der(&self) -> &[u8] {
        &self.private_key_der
    }

    pub fn fingerprint_sha256(&self) -> &[u8] {
        &self.fingerprint_sha256
    }

    /// `AA:BB:...` form as written into `a=fingerprint:sha-256`.
    pub fn fingerprint_hex(&self) -> String {
        fingerprint_to_hex(&self.fingerprint_sha256)
    }
}

pub fn fingerprint_to_hex(bin: &[u8]) -> String {
    bin.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// A remote certificate fingerprint from the answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateHash {
    /// Digest algorithm name, e.g. `sha-256`.
    pub alg: String,
    pub bin: Vec<u8>,
    pub hex: String,
}

impl CertificateHash {
    pub fn sha256(bin: Vec<u8>) -> Self {
        let hex = fingerprint_to_hex(&bin);
        CertificateHash {
            alg: "sha-256".to_owned(),
            bin,
            hex,
        }
    }
}

#[cfg(test)]
mod certificate_test {
    use super::*;

    #[test]
    fn test_generate() {
        let cert = Certificate::generate().unwrap();
        assert!(!cert.der().is_empty());
        assert!(!cert.private_key_der().is_empty());
        assert_eq!(cert.fingerprint_sha256().len(), 32);
        assert_eq!(cert.fingerprint_hex().len(), 32 * 3 - 1);
    }

    #[test]
    fn test_hash_hex_form() {
        let hash = CertificateHash::sha256(vec![0xAB, 0x01, 0xFF]);
        assert_eq!(hash.hex, "AB:01:FF");
        assert_eq!(hash.alg, "sha-256");
    }
}
