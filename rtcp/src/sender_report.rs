use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::*;

// NTP(8) + RTP time(4) + packet count(4) + octet count(4)
pub const SR_SENDER_INFO_LENGTH: usize = 20;

/// SenderReport, RFC 3550 section 6.4.1, without reception report blocks
/// (this stack is unidirectional per session).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    /// NTP timestamp, seconds in the high 32 bits, fraction in the low.
    pub ntp_time: u64,
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: 0,
            packet_type: PacketType::SenderReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    pub fn marshal_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH + SR_SENDER_INFO_LENGTH
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        let mut header_buf = [0u8; HEADER_LENGTH];
        self.header().marshal_to(&mut header_buf)?;
        buf.put_slice(&header_buf);
        buf.put_u32(self.ssrc);
        buf.put_u64(self.ntp_time);
        buf.put_u32(self.rtp_time);
        buf.put_u32(self.packet_count);
        buf.put_u32(self.octet_count);
        Ok(buf.freeze())
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SenderReport {
            return Err(Error::WrongType);
        }
        if buf.remaining() < SSRC_LENGTH + SR_SENDER_INFO_LENGTH {
            return Err(Error::PacketTooShort);
        }
        let ssrc = buf.get_u32();
        let ntp_time = buf.get_u64();
        let rtp_time = buf.get_u32();
        let packet_count = buf.get_u32();
        let octet_count = buf.get_u32();

        // Skip any reception reports and profile extensions
        let consumed = HEADER_LENGTH + SSRC_LENGTH + SR_SENDER_INFO_LENGTH;
        let total = (header.length as usize + 1) * 4;
        if total > consumed {
            let skip = (total - consumed).min(buf.remaining());
            buf.advance(skip);
        }

        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
        })
    }
}

#[cfg(test)]
mod sender_report_test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let sr = SenderReport {
            ssrc: 0x11112222,
            ntp_time: 0x0123456789ABCDEF,
            rtp_time: 90000,
            packet_count: 100,
            octet_count: 12345,
        };
        let raw = sr.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);
        assert_eq!(raw[1], 200);

        let mut reader = raw.clone();
        assert_eq!(SenderReport::unmarshal(&mut reader).unwrap(), sr);
    }
}
