use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

pub const HEADER_LENGTH: usize = 4;
pub const SSRC_LENGTH: usize = 4;
pub const VERSION: u8 = 2;

pub const FORMAT_NACK: u8 = 1;
pub const FORMAT_PLI: u8 = 1;
pub const FORMAT_TCC: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketType {
    #[default]
    Unsupported = 0,
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    ApplicationDefined = 204,
    TransportSpecificFeedback = 205,
    PayloadSpecificFeedback = 206,
}

impl From<u8> for PacketType {
    fn from(b: u8) -> Self {
        match b {
            200 => PacketType::SenderReport,
            201 => PacketType::ReceiverReport,
            202 => PacketType::SourceDescription,
            203 => PacketType::Goodbye,
            204 => PacketType::ApplicationDefined,
            205 => PacketType::TransportSpecificFeedback,
            206 => PacketType::PayloadSpecificFeedback,
            _ => PacketType::Unsupported,
        }
    }
}

/// RTCP packet header, RFC 3550 section 6.4.1.
///
/// `length` is the packet size in 32-bit words minus one, including header
/// and padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub padding: bool,
    /// RC for reports, FMT for feedback packets.
    pub count: u8,
    pub packet_type: PacketType,
    pub length: u16,
}

impl Header {
    pub fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::BufferTooSmall);
        }
        let mut writer = &mut buf[..];
        let mut b0 = VERSION << 6;
        if self.padding {
            b0 |= 1 << 5;
        }
        b0 |= self.count & 0x1F;
        writer.put_u8(b0);
        writer.put_u8(self.packet_type as u8);
        writer.put_u16(self.length);
        Ok(HEADER_LENGTH)
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }
        let b0 = buf.get_u8();
        if b0 >> 6 != VERSION {
            return Err(Error::BadVersion);
        }
        let padding = (b0 >> 5) & 0x1 > 0;
        let count = b0 & 0x1F;
        let packet_type = PacketType::from(buf.get_u8());
        let length = buf.get_u16();
        Ok(Header {
            padding,
            count,
            packet_type,
            length,
        })
    }
}

/// Pads a payload length up to a multiple of four.
pub fn get_padding_size(len: usize) -> usize {
    if len % 4 == 0 {
        0
    } else {
        4 - (len % 4)
    }
}
