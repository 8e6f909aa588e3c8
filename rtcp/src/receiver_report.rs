use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::*;

pub const RECEPTION_REPORT_LENGTH: usize = 24;

/// One reception report block, RFC 3550 section 6.4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceptionReport {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub total_lost: u32,
    pub last_sequence_number: u32,
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp from the most recent SR.
    pub last_sender_report: u32,
    /// Delay since that SR, in 1/65536 seconds.
    pub delay: u32,
}

impl ReceptionReport {
    fn marshal_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32(((self.fraction_lost as u32) << 24) | (self.total_lost & 0x00FF_FFFF));
        buf.put_u32(self.last_sequence_number);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sender_report);
        buf.put_u32(self.delay);
    }

    fn unmarshal_from<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < RECEPTION_REPORT_LENGTH {
            return Err(Error::PacketTooShort);
        }
        let ssrc = buf.get_u32();
        let lost = buf.get_u32();
        Ok(ReceptionReport {
            ssrc,
            fraction_lost: (lost >> 24) as u8,
            total_lost: lost & 0x00FF_FFFF,
            last_sequence_number: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sender_report: buf.get_u32(),
            delay: buf.get_u32(),
        })
    }
}

/// ReceiverReport, RFC 3550 section 6.4.2.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
}

impl ReceiverReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::ReceiverReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    pub fn marshal_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH + self.reports.len() * RECEPTION_REPORT_LENGTH
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        let mut header_buf = [0u8; HEADER_LENGTH];
        self.header().marshal_to(&mut header_buf)?;
        buf.put_slice(&header_buf);
        buf.put_u32(self.ssrc);
        for r in &self.reports {
            r.marshal_into(&mut buf);
        }
        Ok(buf.freeze())
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ReceiverReport {
            return Err(Error::WrongType);
        }
        if buf.remaining() < SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }
        let ssrc = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal_from(buf)?);
        }
        Ok(ReceiverReport { ssrc, reports })
    }
}

#[cfg(test)]
mod receiver_report_test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let rr = ReceiverReport {
            ssrc: 0xCAFEBABE,
            reports: vec![ReceptionReport {
                ssrc: 0x11112222,
                fraction_lost: 12,
                total_lost: 34,
                last_sequence_number: 0x00011049,
                jitter: 5,
                last_sender_report: 0x12345678,
                delay: 65536,
            }],
        };
        let raw = rr.marshal().unwrap();
        let mut reader = raw.clone();
        assert_eq!(ReceiverReport::unmarshal(&mut reader).unwrap(), rr);
    }
}
