use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};
use crate::header::Header;

/// An RTP packet: header plus payload, with optional tail padding.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
    /// Number of padding octets appended after the payload, including the
    /// trailing count octet. Zero means no padding.
    pub padding_size: u8,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RTP ssrc={:x} pt={} seq={} ts={} marker={} payload={}",
            self.header.ssrc,
            self.header.payload_type,
            self.header.sequence_number,
            self.header.timestamp,
            self.header.marker,
            self.payload.len(),
        )
    }
}

impl Packet {
    pub fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len() + self.padding_size as usize
    }

    pub fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::ErrBufferTooSmall);
        }

        let mut header = self.header.clone();
        header.padding = self.padding_size > 0;

        let n = header.marshal_to(buf)?;
        let mut writer = &mut buf[n..];
        writer.put_slice(&self.payload);

        if self.padding_size > 0 {
            for _ in 0..self.padding_size - 1 {
                writer.put_u8(0);
            }
            writer.put_u8(self.padding_size);
        }

        Ok(n + self.payload.len() + self.padding_size as usize)
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.marshal_size()];
        let n = self.marshal_to(&mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    pub fn unmarshal<B: Buf>(raw_packet: &mut B) -> Result<Self> {
        let header = Header::unmarshal(raw_packet)?;
        let payload_len = raw_packet.remaining();
        let payload = raw_packet.copy_to_bytes(payload_len);
        if header.padding {
            if payload_len == 0 {
                return Err(Error::ErrShortPacket);
            }
            let padding_len = payload[payload_len - 1] as usize;
            if padding_len == 0 || padding_len > payload_len {
                return Err(Error::ErrShortPacket);
            }
            Ok(Packet {
                header,
                payload: payload.slice(..payload_len - padding_len),
                padding_size: padding_len as u8,
            })
        } else {
            Ok(Packet {
                header,
                payload,
                padding_size: 0,
            })
        }
    }

    /// Wraps this packet for retransmission: RTX payload type, RTX SSRC, a
    /// fresh RTX sequence number, and the original sequence number
    /// prepended big-endian to the payload (RFC 4588). The header extension
    /// block is replaced by `extensions` when provided.
    pub fn to_rtx(
        &self,
        rtx_payload_type: u8,
        rtx_ssrc: u32,
        rtx_sequence_number: u16,
        extensions: Option<&Header>,
    ) -> Packet {
        let mut header = match extensions {
            Some(src) => {
                let mut h = self.header.clone();
                h.extension = src.extension;
                h.extension_profile = src.extension_profile;
                h.extensions = src.extensions.clone();
                h
            }
            None => self.header.clone(),
        };
        header.payload_type = rtx_payload_type;
        header.ssrc = rtx_ssrc;
        header.sequence_number = rtx_sequence_number;

        let mut payload = Vec::with_capacity(2 + self.payload.len());
        payload.extend_from_slice(&self.header.sequence_number.to_be_bytes());
        payload.extend_from_slice(&self.payload);

        Packet {
            header,
            payload: Bytes::from(payload),
            padding_size: 0,
        }
    }
}
