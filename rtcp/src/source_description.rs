use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::*;

pub const SDES_CNAME: u8 = 1;

/// SourceDescription with a single CNAME chunk, RFC 3550 section 6.5.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescription {
    pub ssrc: u32,
    pub cname: String,
}

impl SourceDescription {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: 1,
            packet_type: PacketType::SourceDescription,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    fn item_size(&self) -> usize {
        // type + length + text, then the chunk is null-terminated and
        // padded to a 32-bit boundary
        let unpadded = SSRC_LENGTH + 2 + self.cname.len() + 1;
        unpadded + get_padding_size(unpadded)
    }

    pub fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.item_size()
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        let mut header_buf = [0u8; HEADER_LENGTH];
        self.header().marshal_to(&mut header_buf)?;
        buf.put_slice(&header_buf);
        buf.put_u32(self.ssrc);
        buf.put_u8(SDES_CNAME);
        buf.put_u8(self.cname.len() as u8);
        buf.put_slice(self.cname.as_bytes());
        buf.put_u8(0);
        while buf.len() % 4 != 0 {
            buf.put_u8(0);
        }
        Ok(buf.freeze())
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SourceDescription {
            return Err(Error::WrongType);
        }
        if buf.remaining() < SSRC_LENGTH + 2 {
            return Err(Error::PacketTooShort);
        }
        let ssrc = buf.get_u32();
        let typ = buf.get_u8();
        if typ != SDES_CNAME {
            return Err(Error::Other(format!("unsupported SDES item {typ}")));
        }
        let len = buf.get_u8() as usize;
        if buf.remaining() < len {
            return Err(Error::PacketTooShort);
        }
        let mut text = vec![0u8; len];
        buf.copy_to_slice(&mut text);
        let cname = String::from_utf8(text).map_err(|e| Error::Other(e.to_string()))?;
        Ok(SourceDescription { ssrc, cname })
    }
}

#[cfg(test)]
mod source_description_test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let sdes = SourceDescription {
            ssrc: 7,
            cname: "srtc-client".to_owned(),
        };
        let raw = sdes.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);
        let mut reader = raw.clone();
        assert_eq!(SourceDescription::unmarshal(&mut reader).unwrap(), sdes);
    }
}
