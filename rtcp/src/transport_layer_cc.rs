use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::*;

/// https://tools.ietf.org/html/draft-holmer-rmcat-transport-wide-cc-extensions-01#section-3.1.5
pub const DELTA_SCALE_FACTOR_MICROS: i64 = 250;

/// Reference time unit is 64 ms.
pub const REFERENCE_TIME_UNIT_MICROS: i64 = 64_000;

const PACKET_STATUS_CHUNK_LENGTH: usize = 2;
const FEEDBACK_FIXED_LENGTH: usize = 8; // base seq + count + ref time/fb count

/// Per-packet status symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum SymbolTypeTcc {
    #[default]
    PacketNotReceived = 0,
    PacketReceivedSmallDelta = 1,
    PacketReceivedLargeDelta = 2,
    PacketReceivedWithoutDelta = 3,
}

impl SymbolTypeTcc {
    pub fn has_delta(&self) -> bool {
        matches!(
            self,
            SymbolTypeTcc::PacketReceivedSmallDelta | SymbolTypeTcc::PacketReceivedLargeDelta
        )
    }
}

impl From<u16> for SymbolTypeTcc {
    fn from(val: u16) -> Self {
        match val {
            0 => SymbolTypeTcc::PacketNotReceived,
            1 => SymbolTypeTcc::PacketReceivedSmallDelta,
            2 => SymbolTypeTcc::PacketReceivedLargeDelta,
            _ => SymbolTypeTcc::PacketReceivedWithoutDelta,
        }
    }
}

/// Packet status chunks, draft section 3.1.3 / 3.1.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketStatusChunk {
    /// `(symbol, run length)`
    RunLength(SymbolTypeTcc, u16),
    /// 14 one-bit symbols: received-small-delta or not-received
    StatusVectorOneBit(Vec<bool>),
    /// 7 two-bit symbols
    StatusVectorTwoBit(Vec<SymbolTypeTcc>),
}

impl PacketStatusChunk {
    pub fn symbols(&self) -> Vec<SymbolTypeTcc> {
        match self {
            PacketStatusChunk::RunLength(symbol, run_length) => {
                vec![*symbol; *run_length as usize]
            }
            PacketStatusChunk::StatusVectorOneBit(bits) => bits
                .iter()
                .map(|b| {
                    if *b {
                        SymbolTypeTcc::PacketReceivedSmallDelta
                    } else {
                        SymbolTypeTcc::PacketNotReceived
                    }
                })
                .collect(),
            PacketStatusChunk::StatusVectorTwoBit(symbols) => symbols.clone(),
        }
    }

    fn marshal_value(&self) -> u16 {
        match self {
            PacketStatusChunk::RunLength(symbol, run_length) => {
                ((*symbol as u16) << 13) | (run_length & 0x1FFF)
            }
            PacketStatusChunk::StatusVectorOneBit(bits) => {
                let mut v = 0x8000u16;
                for (i, b) in bits.iter().take(14).enumerate() {
                    if *b {
                        v |= 1 << (13 - i);
                    }
                }
                v
            }
            PacketStatusChunk::StatusVectorTwoBit(symbols) => {
                let mut v = 0x8000u16 | 0x4000;
                for (i, s) in symbols.iter().take(7).enumerate() {
                    v |= (*s as u16) << (12 - 2 * i);
                }
                v
            }
        }
    }

    fn from_value(value: u16) -> Self {
        if value & 0x8000 == 0 {
            PacketStatusChunk::RunLength(
                SymbolTypeTcc::from((value >> 13) & 0x03),
                value & 0x1FFF,
            )
        } else if value & 0x4000 == 0 {
            let bits = (0..14).map(|i| (value >> (13 - i)) & 1 == 1).collect();
            PacketStatusChunk::StatusVectorOneBit(bits)
        } else {
            let symbols = (0..7)
                .map(|i| SymbolTypeTcc::from((value >> (12 - 2 * i)) & 0x03))
                .collect();
            PacketStatusChunk::StatusVectorTwoBit(symbols)
        }
    }
}

/// Receive time delta in microseconds, wire unit 250 us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecvDelta {
    pub type_tcc_packet: SymbolTypeTcc,
    pub delta_micros: i64,
}

impl RecvDelta {
    pub fn marshal_size(&self) -> usize {
        match self.type_tcc_packet {
            SymbolTypeTcc::PacketReceivedSmallDelta => 1,
            SymbolTypeTcc::PacketReceivedLargeDelta => 2,
            _ => 0,
        }
    }

    fn marshal_into(&self, buf: &mut BytesMut) -> Result<()> {
        let delta = self.delta_micros / DELTA_SCALE_FACTOR_MICROS;
        match self.type_tcc_packet {
            SymbolTypeTcc::PacketReceivedSmallDelta
                if (0..=u8::MAX as i64).contains(&delta) =>
            {
                buf.put_u8(delta as u8);
                Ok(())
            }
            SymbolTypeTcc::PacketReceivedLargeDelta
                if (i16::MIN as i64..=i16::MAX as i64).contains(&delta) =>
            {
                buf.put_i16(delta as i16);
                Ok(())
            }
            _ => Err(Error::DeltaExceedLimit),
        }
    }
}

/// One resolved entry of a feedback packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketResult {
    pub sequence_number: u16,
    pub status: SymbolTypeTcc,
    /// Present for small/large delta symbols, in microseconds.
    pub delta_micros: Option<i64>,
}

/// TransportLayerCc (PT=205, FMT=15),
/// https://tools.ietf.org/html/draft-holmer-rmcat-transport-wide-cc-extensions-01
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerCc {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_sequence_number: u16,
    pub packet_status_count: u16,
    /// Signed 24-bit value in units of 64 ms.
    pub reference_time: i32,
    pub fb_pkt_count: u8,
    pub packet_chunks: Vec<PacketStatusChunk>,
    pub recv_deltas: Vec<RecvDelta>,
}

impl TransportLayerCc {
    pub fn header(&self) -> Header {
        Header {
            padding: get_padding_size(self.raw_size()) != 0,
            count: FORMAT_TCC,
            packet_type: PacketType::TransportSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    fn raw_size(&self) -> usize {
        let deltas: usize = self.recv_deltas.iter().map(|d| d.marshal_size()).sum();
        HEADER_LENGTH
            + 2 * SSRC_LENGTH
            + FEEDBACK_FIXED_LENGTH
            + self.packet_chunks.len() * PACKET_STATUS_CHUNK_LENGTH
            + deltas
    }

    pub fn marshal_size(&self) -> usize {
        let l = self.raw_size();
        l + get_padding_size(l)
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        let mut header_buf = [0u8; HEADER_LENGTH];
        self.header().marshal_to(&mut header_buf)?;
        buf.put_slice(&header_buf);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        buf.put_u16(self.base_sequence_number);
        buf.put_u16(self.packet_status_count);
        let ref_and_count =
            (((self.reference_time as u32) & 0x00FF_FFFF) << 8) | self.fb_pkt_count as u32;
        buf.put_u32(ref_and_count);
        for chunk in &self.packet_chunks {
            buf.put_u16(chunk.marshal_value());
        }
        for delta in &self.recv_deltas {
            delta.marshal_into(&mut buf)?;
        }

        let padding = get_padding_size(buf.len());
        if padding > 0 {
            for _ in 0..padding - 1 {
                buf.put_u8(0);
            }
            buf.put_u8(padding as u8);
        }
        Ok(buf.freeze())
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_TCC
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH + FEEDBACK_FIXED_LENGTH {
            return Err(Error::PacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let base_sequence_number = buf.get_u16();
        let packet_status_count = buf.get_u16();
        let ref_and_count = buf.get_u32();
        let reference_time = (ref_and_count as i32) >> 8;
        let fb_pkt_count = (ref_and_count & 0xFF) as u8;

        // Chunks until all statuses are covered
        let mut packet_chunks = Vec::new();
        let mut symbols_parsed = 0usize;
        while symbols_parsed < packet_status_count as usize {
            if buf.remaining() < PACKET_STATUS_CHUNK_LENGTH {
                return Err(Error::PacketTooShort);
            }
            let chunk = PacketStatusChunk::from_value(buf.get_u16());
            symbols_parsed += chunk.symbols().len();
            packet_chunks.push(chunk);
        }

        // A delta per received symbol, in order
        let mut recv_deltas = Vec::new();
        let mut remaining_statuses = packet_status_count as usize;
        'outer: for chunk in &packet_chunks {
            for symbol in chunk.symbols() {
                if remaining_statuses == 0 {
                    break 'outer;
                }
                remaining_statuses -= 1;
                match symbol {
                    SymbolTypeTcc::PacketReceivedSmallDelta => {
                        if buf.remaining() < 1 {
                            return Err(Error::PacketTooShort);
                        }
                        recv_deltas.push(RecvDelta {
                            type_tcc_packet: symbol,
                            delta_micros: DELTA_SCALE_FACTOR_MICROS * buf.get_u8() as i64,
                        });
                    }
                    SymbolTypeTcc::PacketReceivedLargeDelta => {
                        if buf.remaining() < 2 {
                            return Err(Error::PacketTooShort);
                        }
                        recv_deltas.push(RecvDelta {
                            type_tcc_packet: symbol,
                            delta_micros: DELTA_SCALE_FACTOR_MICROS * buf.get_i16() as i64,
                        });
                    }
                    _ => {}
                }
            }
        }

        Ok(TransportLayerCc {
            sender_ssrc,
            media_ssrc,
            base_sequence_number,
            packet_status_count,
            reference_time,
            fb_pkt_count,
            packet_chunks,
            recv_deltas,
        })
    }

    /// Flattens chunks and deltas into one entry per reported packet.
    pub fn entries(&self) -> Vec<PacketResult> {
        let mut out = Vec::with_capacity(self.packet_status_count as usize);
        let mut deltas = self.recv_deltas.iter();
        let mut seq = self.base_sequence_number;
        'outer: for chunk in &self.packet_chunks {
            for symbol in chunk.symbols() {
                if out.len() == self.packet_status_count as usize {
                    break 'outer;
                }
                let delta_micros = if symbol.has_delta() {
                    deltas.next().map(|d| d.delta_micros)
                } else {
                    None
                };
                out.push(PacketResult {
                    sequence_number: seq,
                    status: symbol,
                    delta_micros,
                });
                seq = seq.wrapping_add(1);
            }
        }
        out
    }
}

#[cfg(test)]
mod transport_layer_cc_test {
    use super::*;

    #[test]
    fn test_run_length_roundtrip() {
        // 14 packets received with 1 ms deltas
        let cc = TransportLayerCc {
            sender_ssrc: 1,
            media_ssrc: 0x11112222,
            base_sequence_number: 200,
            packet_status_count: 14,
            reference_time: 100,
            fb_pkt_count: 0,
            packet_chunks: vec![PacketStatusChunk::RunLength(
                SymbolTypeTcc::PacketReceivedSmallDelta,
                14,
            )],
            recv_deltas: (0..14)
                .map(|_| RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta_micros: 1000,
                })
                .collect(),
        };

        let raw = cc.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);

        let mut reader = raw.clone();
        let parsed = TransportLayerCc::unmarshal(&mut reader).unwrap();
        assert_eq!(parsed.base_sequence_number, 200);
        assert_eq!(parsed.packet_status_count, 14);
        assert_eq!(parsed.reference_time, 100);
        assert_eq!(parsed.recv_deltas.len(), 14);

        let entries = parsed.entries();
        assert_eq!(entries.len(), 14);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.sequence_number, 200 + i as u16);
            assert_eq!(e.status, SymbolTypeTcc::PacketReceivedSmallDelta);
            assert_eq!(e.delta_micros, Some(1000));
        }
    }

    #[test]
    fn test_status_vector_roundtrip() {
        let bits = vec![
            true, false, true, true, false, false, false, true, false, false, false, false,
            false, false,
        ];
        let received = bits.iter().filter(|b| **b).count();
        let cc = TransportLayerCc {
            sender_ssrc: 1,
            media_ssrc: 2,
            base_sequence_number: 1000,
            packet_status_count: 14,
            reference_time: -3,
            fb_pkt_count: 7,
            packet_chunks: vec![PacketStatusChunk::StatusVectorOneBit(bits.clone())],
            recv_deltas: (0..received)
                .map(|i| RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta_micros: 250 * i as i64,
                })
                .collect(),
        };

        let raw = cc.marshal().unwrap();
        let mut reader = raw.clone();
        let parsed = TransportLayerCc::unmarshal(&mut reader).unwrap();
        assert_eq!(parsed.reference_time, -3);
        assert_eq!(parsed.fb_pkt_count, 7);

        let entries = parsed.entries();
        assert_eq!(entries.len(), 14);
        for (i, e) in entries.iter().enumerate() {
            if bits[i] {
                assert_eq!(e.status, SymbolTypeTcc::PacketReceivedSmallDelta);
                assert!(e.delta_micros.is_some());
            } else {
                assert_eq!(e.status, SymbolTypeTcc::PacketNotReceived);
                assert_eq!(e.delta_micros, None);
            }
        }
    }

    #[test]
    fn test_two_bit_vector_with_large_delta() {
        let symbols = vec![
            SymbolTypeTcc::PacketReceivedSmallDelta,
            SymbolTypeTcc::PacketNotReceived,
            SymbolTypeTcc::PacketReceivedLargeDelta,
            SymbolTypeTcc::PacketNotReceived,
            SymbolTypeTcc::PacketNotReceived,
            SymbolTypeTcc::PacketNotReceived,
            SymbolTypeTcc::PacketNotReceived,
        ];
        let cc = TransportLayerCc {
            sender_ssrc: 1,
            media_ssrc: 2,
            base_sequence_number: 65534,
            packet_status_count: 7,
            reference_time: 0,
            fb_pkt_count: 1,
            packet_chunks: vec![PacketStatusChunk::StatusVectorTwoBit(symbols)],
            recv_deltas: vec![
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta_micros: 500,
                },
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedLargeDelta,
                    delta_micros: -1000,
                },
            ],
        };

        let raw = cc.marshal().unwrap();
        let mut reader = raw.clone();
        let parsed = TransportLayerCc::unmarshal(&mut reader).unwrap();

        let entries = parsed.entries();
        assert_eq!(entries.len(), 7);
        // Sequence wraps from 65534
        assert_eq!(entries[0].sequence_number, 65534);
        assert_eq!(entries[2].sequence_number, 0);
        assert_eq!(entries[2].status, SymbolTypeTcc::PacketReceivedLargeDelta);
        assert_eq!(entries[2].delta_micros, Some(-1000));
    }

    #[test]
    fn test_delta_out_of_range_rejected() {
        let cc = TransportLayerCc {
            packet_status_count: 1,
            packet_chunks: vec![PacketStatusChunk::RunLength(
                SymbolTypeTcc::PacketReceivedSmallDelta,
                1,
            )],
            recv_deltas: vec![RecvDelta {
                type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                delta_micros: -250,
            }],
            ..Default::default()
        };
        assert_eq!(cc.marshal(), Err(Error::DeltaExceedLimit));
    }
}
