use std::fmt;

use rand::Rng;

use crate::attributes::*;
use crate::error::*;

// MAGIC_COOKIE is the fixed value that aids in distinguishing STUN packets
// from packets of other protocols when STUN is multiplexed with those
// other protocols on the same port.
//
// Defined in "STUN Message Structure", RFC 5389 section 6.
pub const MAGIC_COOKIE: u32 = 0x2112A442;
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;
pub const MESSAGE_HEADER_SIZE: usize = 20;

// TRANSACTION_ID_SIZE is the length of the transaction id array (in bytes).
pub const TRANSACTION_ID_SIZE: usize = 12; // 96 bit

// Datagrams larger than this are not STUN messages we are willing to parse.
pub const MAX_MESSAGE_SIZE: usize = 1500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    pub fn new() -> Self {
        let mut id = TransactionId([0u8; TRANSACTION_ID_SIZE]);
        rand::thread_rng().fill(&mut id.0);
        id
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    #[default]
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    #[default]
    Binding,
    Unknown(u16),
}

// Bits 4 and 8 of the message type carry the class, interleaved with the
// method bits (RFC 5389 section 6).
const CLASS_C0_SHIFT: u16 = 4;
const CLASS_C1_SHIFT: u16 = 8;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageType {
    pub class: MessageClass,
    pub method: Method,
}

pub const BINDING_REQUEST: MessageType = MessageType {
    class: MessageClass::Request,
    method: Method::Binding,
};
pub const BINDING_SUCCESS: MessageType = MessageType {
    class: MessageClass::SuccessResponse,
    method: Method::Binding,
};
pub const BINDING_ERROR: MessageType = MessageType {
    class: MessageClass::ErrorResponse,
    method: Method::Binding,
};

impl MessageType {
    pub fn value(&self) -> u16 {
        let method = match self.method {
            Method::Binding => 0x0001,
            Method::Unknown(m) => m,
        };
        // Splice the method around the class bits
        let m3_0 = method & 0x000F;
        let m6_4 = (method & 0x0070) << 1;
        let m11_7 = (method & 0x0F80) << 2;
        let class = match self.class {
            MessageClass::Request => 0b00,
            MessageClass::Indication => 0b01,
            MessageClass::SuccessResponse => 0b10,
            MessageClass::ErrorResponse => 0b11,
        };
        let c0 = (class & 0b01) << CLASS_C0_SHIFT;
        let c1 = ((class & 0b10) >> 1) << CLASS_C1_SHIFT;
        m3_0 | m6_4 | m11_7 | c0 | c1
    }

    pub fn from_value(value: u16) -> Self {
        let c0 = (value >> CLASS_C0_SHIFT) & 0b01;
        let c1 = (value >> CLASS_C1_SHIFT) & 0b01;
        let class = match (c1 << 1) | c0 {
            0b00 => MessageClass::Request,
            0b01 => MessageClass::Indication,
            0b10 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        };
        let method = (value & 0x000F) | ((value >> 1) & 0x0070) | ((value >> 2) & 0x0F80);
        let method = if method == 0x0001 {
            Method::Binding
        } else {
            Method::Unknown(method)
        };
        MessageType { class, method }
    }
}

// is_message returns true if b looks like a STUN message. Useful for
// multiplexing; it does not guarantee that decoding will be successful.
pub fn is_message(b: &[u8]) -> bool {
    b.len() >= MESSAGE_HEADER_SIZE
        && b[0] < 4
        && u32::from_be_bytes([b[4], b[5], b[6], b[7]]) == MAGIC_COOKIE
}

// Interfaces implemented by message attributes and helpers.
pub trait Setter {
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

// Message represents a single STUN packet. It uses aggressive internal
// buffering to enable zero-allocation encoding and decoding, so the
// attribute views are valid only until `raw` is modified.
#[derive(Default, Debug, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub length: u32, // len(raw) not including header
    pub transaction_id: TransactionId,
    pub attributes: Attributes,
    pub raw: Vec<u8>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?} l={} attrs={}",
            self.typ.class,
            self.typ.method,
            self.length,
            self.attributes.0.len(),
        )
    }
}

const DEFAULT_RAW_CAPACITY: usize = 120;

impl Message {
    pub fn new() -> Self {
        Message {
            raw: {
                let mut raw = Vec::with_capacity(DEFAULT_RAW_CAPACITY);
                raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
                raw
            },
            ..Default::default()
        }
    }

    /// Builds a message of the given type with a fresh transaction id.
    pub fn build(typ: MessageType) -> Self {
        let mut m = Message::new();
        m.typ = typ;
        m.transaction_id = TransactionId::new();
        m.write_header();
        m
    }

    /// Builds a message of the given type reusing an existing transaction id.
    pub fn build_with_id(typ: MessageType, transaction_id: TransactionId) -> Self {
        let mut m = Message::new();
        m.typ = typ;
        m.transaction_id = transaction_id;
        m.write_header();
        m
    }

    // grow ensures that the internal buffer has length n.
    fn grow(&mut self, n: usize, resize: bool) {
        if self.raw.len() >= n {
            if resize {
                self.raw.resize(n, 0);
            }
            return;
        }
        self.raw.resize(n, 0);
    }

    // add appends a new attribute to the message. The value is copied into
    // the internal buffer, padded to a 4-byte boundary with zeroes.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        let alloc_size = ATTRIBUTE_HEADER_SIZE + v.len();
        let first = MESSAGE_HEADER_SIZE + self.length as usize;
        let mut last = first + alloc_size;
        self.grow(last, true);
        self.length += alloc_size as u32;

        let buf = &mut self.raw[first..last];
        buf[0..2].copy_from_slice(&t.value().to_be_bytes());
        buf[2..4].copy_from_slice(&(v.len() as u16).to_be_bytes());
        buf[ATTRIBUTE_HEADER_SIZE..].copy_from_slice(v);

        let attr = RawAttribute {
            typ: t,
            length: v.len() as u16,
            value: v.to_vec(),
        };

        if attr.length as usize % PADDING != 0 {
            let bytes_to_add = nearest_padded_value_length(v.len()) - v.len();
            last += bytes_to_add;
            self.grow(last, true);
            for b in &mut self.raw[last - bytes_to_add..last] {
                *b = 0;
            }
            self.length += bytes_to_add as u32;
        }
        self.attributes.0.push(attr);
        self.write_length();
    }

    pub fn get(&self, t: AttrType) -> Result<Vec<u8>> {
        self.attributes
            .get(t)
            .map(|a| a.value.clone())
            .ok_or(Error::ErrAttributeNotFound)
    }

    pub fn contains(&self, t: AttrType) -> bool {
        self.attributes.get(t).is_some()
    }

    pub fn write_length(&mut self) {
        self.grow(4, false);
        self.raw[2..4].copy_from_slice(&(self.length as u16).to_be_bytes());
    }

    pub fn write_header(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE, false);
        self.write_type();
        self.write_length();
        self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    pub fn write_type(&mut self) {
        self.grow(2, false);
        self.raw[..2].copy_from_slice(&self.typ.value().to_be_bytes());
    }

    // decode parses `raw` into the message fields.
    pub fn decode(&mut self) -> Result<()> {
        let buf = &self.raw;
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrUnexpectedHeaderEof);
        }
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(Error::ErrMessageTooLarge(buf.len(), MAX_MESSAGE_SIZE));
        }

        let t = u16::from_be_bytes([buf[0], buf[1]]);
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let full_size = MESSAGE_HEADER_SIZE + size;

        if cookie != MAGIC_COOKIE {
            return Err(Error::ErrInvalidMagicCookie(cookie, MAGIC_COOKIE));
        }
        if buf.len() < full_size {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        self.typ = MessageType::from_value(t);
        self.length = size as u32;
        self.transaction_id
            .0
            .copy_from_slice(&buf[8..MESSAGE_HEADER_SIZE]);

        self.attributes.0.clear();
        let mut offset = 0;
        let b = &buf[MESSAGE_HEADER_SIZE..full_size];
        while offset < size {
            if size - offset < ATTRIBUTE_HEADER_SIZE {
                return Err(Error::ErrAttributeSizeInvalid);
            }
            let typ = AttrType::from_value(u16::from_be_bytes([b[offset], b[offset + 1]]));
            let length = u16::from_be_bytes([b[offset + 2], b[offset + 3]]) as usize;
            let padded = nearest_padded_value_length(length);
            offset += ATTRIBUTE_HEADER_SIZE;
            if size - offset < length {
                return Err(Error::ErrAttributeSizeInvalid);
            }
            self.attributes.0.push(RawAttribute {
                typ,
                length: length as u16,
                value: b[offset..offset + length].to_vec(),
            });
            offset += padded;
        }

        Ok(())
    }

    pub fn unmarshal_binary(&mut self, data: &[u8]) -> Result<()> {
        self.raw.clear();
        self.raw.extend_from_slice(data);
        self.decode()
    }
}

#[cfg(test)]
mod message_test {
    use super::*;
    use crate::textattrs::TextAttribute;

    #[test]
    fn test_message_type_roundtrip() {
        for typ in [BINDING_REQUEST, BINDING_SUCCESS, BINDING_ERROR] {
            assert_eq!(MessageType::from_value(typ.value()), typ);
        }
        assert_eq!(BINDING_REQUEST.value(), 0x0001);
        assert_eq!(BINDING_SUCCESS.value(), 0x0101);
        assert_eq!(BINDING_ERROR.value(), 0x0111);
    }

    #[test]
    fn test_build_and_decode() {
        let mut m = Message::build(BINDING_REQUEST);
        TextAttribute::new(ATTR_SOFTWARE, "srtc".to_owned())
            .add_to(&mut m)
            .unwrap();

        let mut decoded = Message::new();
        decoded.unmarshal_binary(&m.raw).unwrap();
        assert_eq!(decoded.typ, BINDING_REQUEST);
        assert_eq!(decoded.transaction_id, m.transaction_id);
        assert_eq!(decoded.get(ATTR_SOFTWARE).unwrap(), b"srtc");
    }

    #[test]
    fn test_is_message() {
        let m = Message::build(BINDING_REQUEST);
        assert!(is_message(&m.raw));

        let mut not_stun = m.raw.clone();
        not_stun[4] = 0;
        assert!(!is_message(&not_stun));
        // DTLS content types start at 20
        let mut dtls = m.raw.clone();
        dtls[0] = 22;
        assert!(!is_message(&dtls));
    }

    #[test]
    fn test_attribute_padding() {
        let mut m = Message::build(BINDING_REQUEST);
        // 5-byte value gets padded to 8
        m.add(ATTR_SOFTWARE, b"abcde");
        assert_eq!(m.length % 4, 0);
        assert_eq!(m.get(ATTR_SOFTWARE).unwrap(), b"abcde");
    }

    #[test]
    fn test_oversize_message_rejected() {
        let mut m = Message::new();
        let data = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert_eq!(
            m.unmarshal_binary(&data),
            Err(Error::ErrMessageTooLarge(MAX_MESSAGE_SIZE + 1, MAX_MESSAGE_SIZE))
        );
    }

    #[test]
    fn test_truncated_attribute_rejected() {
        let mut m = Message::build(BINDING_REQUEST);
        m.add(ATTR_SOFTWARE, b"srtc");
        let mut raw = m.raw.clone();
        // Claim a longer attribute than present
        let len = raw.len();
        raw[len - 6] = 0xFF;
        let mut decoded = Message::new();
        assert!(decoded.unmarshal_binary(&raw).is_err());
    }
}
