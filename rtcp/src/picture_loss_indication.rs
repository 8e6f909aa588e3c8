use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::*;

/// PictureLossIndication, RFC 4585 section 6.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
}

impl PictureLossIndication {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_PLI,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    pub fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        let mut header_buf = [0u8; HEADER_LENGTH];
        self.header().marshal_to(&mut header_buf)?;
        buf.put_slice(&header_buf);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        Ok(buf.freeze())
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback || header.count != FORMAT_PLI
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }
        Ok(PictureLossIndication {
            sender_ssrc: buf.get_u32(),
            media_ssrc: buf.get_u32(),
        })
    }
}

#[cfg(test)]
mod picture_loss_indication_test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let pli = PictureLossIndication {
            sender_ssrc: 1,
            media_ssrc: 0x11112222,
        };
        let raw = pli.marshal().unwrap();
        let mut reader = raw.clone();
        assert_eq!(PictureLossIndication::unmarshal(&mut reader).unwrap(), pli);
    }
}
