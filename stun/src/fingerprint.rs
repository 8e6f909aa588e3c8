use crc::{Crc, CRC_32_ISO_HDLC};

use crate::attributes::*;
use crate::error::*;
use crate::message::*;

/// FINGERPRINT attribute, RFC 5389 section 15.5.
pub struct FingerprintAttr;

pub const FINGERPRINT: FingerprintAttr = FingerprintAttr {};

pub const FINGERPRINT_XOR_VALUE: u32 = 0x5354554e;
pub const FINGERPRINT_SIZE: usize = 4; // 32 bit

/// CRC-32 of the message up to (but excluding) the FINGERPRINT attribute
/// itself, XOR'ed with 0x5354554e.
pub fn fingerprint_value(b: &[u8]) -> u32 {
    let checksum = Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(b);
    checksum ^ FINGERPRINT_XOR_VALUE
}

impl Setter for FingerprintAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let l = m.length;
        // The length in the header covers the fingerprint TLV
        m.length += (FINGERPRINT_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length();
        let val = fingerprint_value(&m.raw);
        m.length = l;
        m.add(ATTR_FINGERPRINT, &val.to_be_bytes());
        Ok(())
    }
}

impl FingerprintAttr {
    pub fn check(&self, m: &Message) -> Result<()> {
        let b = m.get(ATTR_FINGERPRINT)?;
        if b.len() != FINGERPRINT_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        let val = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);

        // The fingerprint is the last attribute; everything before its TLV
        // is covered, with the header length as written.
        let raw_len = MESSAGE_HEADER_SIZE + m.length as usize;
        let attr_start = raw_len - (FINGERPRINT_SIZE + ATTRIBUTE_HEADER_SIZE);
        let expected = fingerprint_value(&m.raw[..attr_start]);
        if val == expected {
            Ok(())
        } else {
            Err(Error::ErrFingerprintMismatch)
        }
    }
}
