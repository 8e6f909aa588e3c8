use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::*;

/// One NACK entry: a packet id and a bitmask of the 16 packets following
/// it, RFC 4585 section 6.2.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NackPair {
    pub packet_id: u16,
    pub lost_packets: u16,
}

impl NackPair {
    /// Expands this pair into the sequence numbers it names.
    pub fn packet_list(&self) -> Vec<u16> {
        let mut seqs = Vec::with_capacity(17);
        seqs.push(self.packet_id);
        for i in 0..16u16 {
            if self.lost_packets & (1 << i) != 0 {
                seqs.push(self.packet_id.wrapping_add(i + 1));
            }
        }
        seqs
    }
}

/// Compresses a sorted list of lost sequence numbers into pid/blp pairs.
pub fn nack_pairs_from_sequence_numbers(seqs: &[u16]) -> Vec<NackPair> {
    let mut pairs: Vec<NackPair> = Vec::new();
    for &seq in seqs {
        match pairs.last_mut() {
            Some(pair) => {
                let diff = seq.wrapping_sub(pair.packet_id);
                if diff > 0 && diff <= 16 {
                    pair.lost_packets |= 1 << (diff - 1);
                    continue;
                }
                pairs.push(NackPair {
                    packet_id: seq,
                    lost_packets: 0,
                });
            }
            None => pairs.push(NackPair {
                packet_id: seq,
                lost_packets: 0,
            }),
        }
    }
    pairs
}

/// TransportLayerNack, RFC 4585 section 6.2.1 (PT=205, FMT=1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub nacks: Vec<NackPair>,
}

impl TransportLayerNack {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_NACK,
            packet_type: PacketType::TransportSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    pub fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + 4 * self.nacks.len()
    }

    pub fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        let mut header_buf = [0u8; HEADER_LENGTH];
        self.header().marshal_to(&mut header_buf)?;
        buf.put_slice(&header_buf);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for pair in &self.nacks {
            buf.put_u16(pair.packet_id);
            buf.put_u16(pair.lost_packets);
        }
        Ok(buf.freeze())
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_NACK
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();

        let mut nacks = Vec::new();
        while buf.remaining() >= 4 {
            nacks.push(NackPair {
                packet_id: buf.get_u16(),
                lost_packets: buf.get_u16(),
            });
        }

        Ok(TransportLayerNack {
            sender_ssrc,
            media_ssrc,
            nacks,
        })
    }
}

#[cfg(test)]
mod transport_layer_nack_test {
    use super::*;

    #[test]
    fn test_pair_expansion() {
        let pair = NackPair {
            packet_id: 1023,
            lost_packets: 0,
        };
        assert_eq!(pair.packet_list(), vec![1023]);

        let pair = NackPair {
            packet_id: 100,
            lost_packets: 0b101,
        };
        assert_eq!(pair.packet_list(), vec![100, 101, 103]);
    }

    #[test]
    fn test_compression_is_lossless() {
        let seqs = vec![100u16, 101, 103, 116, 117, 205];
        let pairs = nack_pairs_from_sequence_numbers(&seqs);

        let mut expanded: Vec<u16> = pairs.iter().flat_map(|p| p.packet_list()).collect();
        expanded.sort_unstable();
        assert_eq!(expanded, seqs);
    }

    #[test]
    fn test_compression_idempotent_across_wrap() {
        let seqs = vec![65534u16, 65535, 0, 1];
        let pairs = nack_pairs_from_sequence_numbers(&seqs);
        assert_eq!(pairs.len(), 1);
        let expanded = pairs[0].packet_list();
        assert_eq!(expanded, seqs);
    }

    #[test]
    fn test_roundtrip() {
        let nack = TransportLayerNack {
            sender_ssrc: 1,
            media_ssrc: 0x11112222,
            nacks: vec![NackPair {
                packet_id: 1023,
                lost_packets: 0,
            }],
        };
        let raw = nack.marshal().unwrap();
        let mut reader = raw.clone();
        assert_eq!(TransportLayerNack::unmarshal(&mut reader).unwrap(), nack);
    }
}
