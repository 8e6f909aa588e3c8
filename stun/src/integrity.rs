use ring::hmac;
use subtle::ConstantTimeEq;

use crate::attributes::*;
use crate::error::*;
use crate::message::*;

pub(crate) const MESSAGE_INTEGRITY_SIZE: usize = 20;

fn new_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mac = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::sign(&mac, message).as_ref().to_vec()
}

/// MESSAGE-INTEGRITY attribute, RFC 5389 section 15.4.
///
/// The HMAC key is the short-term credential password; the text covered is
/// the message up to but not including this attribute, with the header
/// length field adjusted to include the attribute's TLV.
#[derive(Default, Clone)]
pub struct MessageIntegrity(pub Vec<u8>);

impl MessageIntegrity {
    pub fn new_short_term_integrity(password: String) -> Self {
        MessageIntegrity(password.as_bytes().to_vec())
    }

    pub fn check(&self, m: &mut Message) -> Result<()> {
        let v = m.get(ATTR_MESSAGE_INTEGRITY)?;
        if v.len() != MESSAGE_INTEGRITY_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }

        // Adjust the header length to what it was when the HMAC was
        // computed, excluding any attributes added after the integrity.
        let length = m.length;
        let mut after_integrity = false;
        let mut size_reduced = 0usize;
        for a in &m.attributes.0 {
            if after_integrity {
                size_reduced += nearest_padded_value_length(a.length as usize);
                size_reduced += ATTRIBUTE_HEADER_SIZE;
            }
            if a.typ == ATTR_MESSAGE_INTEGRITY {
                after_integrity = true;
            }
        }
        m.length -= size_reduced as u32;
        m.write_length();
        let start_of_hmac = MESSAGE_HEADER_SIZE + m.length as usize
            - (ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE);
        let expected = new_hmac(&self.0, &m.raw[..start_of_hmac]);
        m.length = length;
        m.write_length();

        if v.ct_eq(&expected).unwrap_u8() == 1 {
            Ok(())
        } else {
            Err(Error::ErrIntegrityMismatch)
        }
    }
}

impl Setter for MessageIntegrity {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        for a in &m.attributes.0 {
            // FINGERPRINT must not precede MESSAGE-INTEGRITY
            if a.typ == ATTR_FINGERPRINT {
                return Err(Error::ErrFingerprintBeforeIntegrity);
            }
        }
        let length = m.length;
        m.length += (MESSAGE_INTEGRITY_SIZE + ATTRIBUTE_HEADER_SIZE) as u32;
        m.write_length();
        let v = new_hmac(&self.0, &m.raw);
        m.length = length;

        m.add(ATTR_MESSAGE_INTEGRITY, &v);
        Ok(())
    }
}

#[cfg(test)]
mod integrity_test {
    use super::*;
    use crate::fingerprint::FINGERPRINT;
    use crate::textattrs::TextAttribute;

    #[test]
    fn test_add_and_check() {
        let i = MessageIntegrity::new_short_term_integrity("icepassword".to_owned());

        let mut m = Message::build(BINDING_REQUEST);
        TextAttribute::new(ATTR_USERNAME, "remote:local".to_owned())
            .add_to(&mut m)
            .unwrap();
        i.add_to(&mut m).unwrap();
        FINGERPRINT.add_to(&mut m).unwrap();

        let mut decoded = Message::new();
        decoded.unmarshal_binary(&m.raw).unwrap();
        i.check(&mut decoded).unwrap();
    }

    #[test]
    fn test_wrong_password_fails() {
        let i = MessageIntegrity::new_short_term_integrity("icepassword".to_owned());

        let mut m = Message::build(BINDING_REQUEST);
        i.add_to(&mut m).unwrap();

        let wrong = MessageIntegrity::new_short_term_integrity("other".to_owned());
        let mut decoded = Message::new();
        decoded.unmarshal_binary(&m.raw).unwrap();
        assert_eq!(wrong.check(&mut decoded), Err(Error::ErrIntegrityMismatch));
    }

    #[test]
    fn test_fingerprint_must_come_after() {
        let i = MessageIntegrity::new_short_term_integrity("pw".to_owned());
        let mut m = Message::build(BINDING_REQUEST);
        FINGERPRINT.add_to(&mut m).unwrap();
        assert_eq!(i.add_to(&mut m), Err(Error::ErrFingerprintBeforeIntegrity));
    }
}
