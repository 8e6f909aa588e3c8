use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::packetizer::{Depacketizer, PacketKind, Payloader};

pub const STAPA_NALU_TYPE: u8 = 24;
pub const FUA_NALU_TYPE: u8 = 28;
pub const SPS_NALU_TYPE: u8 = 7;
pub const PPS_NALU_TYPE: u8 = 8;
pub const AUD_NALU_TYPE: u8 = 9;
pub const FILLER_NALU_TYPE: u8 = 12;
pub const IDR_NALU_TYPE: u8 = 5;
pub const NON_IDR_NALU_TYPE: u8 = 1;

pub const FUA_HEADER_SIZE: usize = 2;
pub const STAPA_HEADER_SIZE: usize = 1;
pub const STAPA_NALU_LENGTH_SIZE: usize = 2;

pub const NALU_TYPE_BITMASK: u8 = 0x1F;
pub const NALU_REF_IDC_BITMASK: u8 = 0x60;
pub const FU_START_BITMASK: u8 = 0x80;
pub const FU_END_BITMASK: u8 = 0x40;

pub const OUTPUT_STAP_AHEADER: u8 = 0x78;

pub static ANNEXB_NALUSTART_CODE: Bytes = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01]);

/// H264Payloader payloads H264 packets: SPS and PPS are aggregated into a
/// STAP-A ahead of the next slice, large NALs are fragmented into FU-A.
#[derive(Default, Debug, Clone)]
pub struct H264Payloader {
    sps_nalu: Option<Bytes>,
    pps_nalu: Option<Bytes>,
}

impl H264Payloader {
    fn next_ind(nalu: &Bytes, start: usize) -> (isize, isize) {
        let mut zero_count = 0;

        for (i, &b) in nalu[start..].iter().enumerate() {
            if b == 0 {
                zero_count += 1;
                continue;
            } else if b == 1 && zero_count >= 2 {
                return ((start + i - zero_count) as isize, zero_count as isize + 1);
            }
            zero_count = 0
        }
        (-1, -1)
    }

    fn emit(&mut self, nalu: &Bytes, mtu: usize, payloads: &mut Vec<Bytes>) {
        if nalu.is_empty() {
            return;
        }

        let nalu_type = nalu[0] & NALU_TYPE_BITMASK;
        let nalu_ref_idc = nalu[0] & NALU_REF_IDC_BITMASK;

        if nalu_type == AUD_NALU_TYPE || nalu_type == FILLER_NALU_TYPE {
            return;
        } else if nalu_type == SPS_NALU_TYPE {
            self.sps_nalu = Some(nalu.clone());
            return;
        } else if nalu_type == PPS_NALU_TYPE {
            self.pps_nalu = Some(nalu.clone());
            return;
        } else if let (Some(sps_nalu), Some(pps_nalu)) = (&self.sps_nalu, &self.pps_nalu) {
            // Pack the parameter sets into a STAP-A preceding this NALU
            let sps_len = (sps_nalu.len() as u16).to_be_bytes();
            let pps_len = (pps_nalu.len() as u16).to_be_bytes();

            let mut stap_a_nalu = Vec::with_capacity(1 + 2 + sps_nalu.len() + 2 + pps_nalu.len());
            stap_a_nalu.push(OUTPUT_STAP_AHEADER);
            stap_a_nalu.extend(sps_len);
            stap_a_nalu.extend_from_slice(sps_nalu);
            stap_a_nalu.extend(pps_len);
            stap_a_nalu.extend_from_slice(pps_nalu);
            if stap_a_nalu.len() <= mtu {
                payloads.push(Bytes::from(stap_a_nalu));
            }
        }

        if self.sps_nalu.is_some() && self.pps_nalu.is_some() {
            self.sps_nalu = None;
            self.pps_nalu = None;
        }

        // Single NALU
        if nalu.len() <= mtu {
            payloads.push(nalu.clone());
            return;
        }

        // FU-A
        let max_fragment_size = mtu as isize - FUA_HEADER_SIZE as isize;

        let nalu_data = nalu;
        // The first octet is carried in the FU indicator/header instead
        let mut nalu_data_index = 1;
        let nalu_data_length = nalu.len() as isize - nalu_data_index;
        let mut nalu_data_remaining = nalu_data_length;

        if std::cmp::min(max_fragment_size, nalu_data_remaining) <= 0 {
            return;
        }

        while nalu_data_remaining > 0 {
            let current_fragment_size = std::cmp::min(max_fragment_size, nalu_data_remaining);
            let mut out = BytesMut::with_capacity(FUA_HEADER_SIZE + current_fragment_size as usize);
            // |F|NRI|  Type   |
            let b0 = FUA_NALU_TYPE | nalu_ref_idc;
            out.put_u8(b0);

            // |S|E|R|  Type   |
            let mut b1 = nalu_type;
            if nalu_data_remaining == nalu_data_length {
                b1 |= FU_START_BITMASK;
            } else if nalu_data_remaining - current_fragment_size == 0 {
                b1 |= FU_END_BITMASK;
            }
            out.put_u8(b1);

            out.put(
                &nalu_data
                    [nalu_data_index as usize..(nalu_data_index + current_fragment_size) as usize],
            );
            payloads.push(out.freeze());

            nalu_data_remaining -= current_fragment_size;
            nalu_data_index += current_fragment_size;
        }
    }
}

impl Payloader for H264Payloader {
    fn payload(&mut self, mtu: usize, frame: &Bytes) -> Result<Vec<Bytes>> {
        if frame.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let mut payloads = vec![];

        let (mut next_ind_start, mut next_ind_len) = H264Payloader::next_ind(frame, 0);
        if next_ind_start == -1 {
            self.emit(frame, mtu, &mut payloads);
        } else {
            while next_ind_start != -1 {
                let prev_start = (next_ind_start + next_ind_len) as usize;
                let (next_ind_start2, next_ind_len2) = H264Payloader::next_ind(frame, prev_start);
                next_ind_start = next_ind_start2;
                next_ind_len = next_ind_len2;
                if next_ind_start != -1 {
                    self.emit(
                        &frame.slice(prev_start..next_ind_start as usize),
                        mtu,
                        &mut payloads,
                    );
                } else {
                    // Emit until end of stream, no end indicator found
                    self.emit(&frame.slice(prev_start..), mtu, &mut payloads);
                }
            }
        }

        Ok(payloads)
    }

    fn set_codec_specific_data(&mut self, csd: &[Bytes]) {
        for nalu in csd {
            let nalu = strip_annexb(nalu);
            if nalu.is_empty() {
                continue;
            }
            match nalu[0] & NALU_TYPE_BITMASK {
                SPS_NALU_TYPE => self.sps_nalu = Some(nalu),
                PPS_NALU_TYPE => self.pps_nalu = Some(nalu),
                _ => {}
            }
        }
    }
}

fn strip_annexb(nalu: &Bytes) -> Bytes {
    if nalu.len() >= 4 && nalu[..4] == [0, 0, 0, 1] {
        nalu.slice(4..)
    } else if nalu.len() >= 3 && nalu[..3] == [0, 0, 1] {
        nalu.slice(3..)
    } else {
        nalu.clone()
    }
}

/// H264Packet reassembles codec frames from H264 RTP payloads.
#[derive(PartialEq, Eq, Debug, Default, Clone)]
pub struct H264Packet {
    fua_buffer: Option<BytesMut>,
}

impl Depacketizer for H264Packet {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        if packet.len() <= 2 {
            return Err(Error::ErrShortPacket);
        }

        let mut payload = BytesMut::new();

        // https://tools.ietf.org/html/rfc6184#section-5.4
        let b0 = packet[0];
        let nalu_type = b0 & NALU_TYPE_BITMASK;

        match nalu_type {
            1..=23 => {
                payload.put(&*ANNEXB_NALUSTART_CODE);
                payload.put(&*packet.clone());
                Ok(payload.freeze())
            }
            STAPA_NALU_TYPE => {
                let mut curr_offset = STAPA_HEADER_SIZE;
                while curr_offset + STAPA_NALU_LENGTH_SIZE <= packet.len() {
                    let nalu_size =
                        ((packet[curr_offset] as usize) << 8) | packet[curr_offset + 1] as usize;
                    curr_offset += STAPA_NALU_LENGTH_SIZE;

                    if packet.len() < curr_offset + nalu_size {
                        return Err(Error::StapASizeLargerThanBuffer(
                            nalu_size,
                            packet.len() - curr_offset,
                        ));
                    }

                    payload.put(&*ANNEXB_NALUSTART_CODE);
                    payload.put(&*packet.slice(curr_offset..curr_offset + nalu_size));
                    curr_offset += nalu_size;
                }

                Ok(payload.freeze())
            }
            FUA_NALU_TYPE => {
                if packet.len() < FUA_HEADER_SIZE {
                    return Err(Error::ErrShortPacket);
                }

                if self.fua_buffer.is_none() {
                    self.fua_buffer = Some(BytesMut::new());
                }

                if let Some(fua_buffer) = &mut self.fua_buffer {
                    fua_buffer.put(&*packet.slice(FUA_HEADER_SIZE..));
                }

                let b1 = packet[1];
                if b1 & FU_END_BITMASK != 0 {
                    let nalu_ref_idc = b0 & NALU_REF_IDC_BITMASK;
                    let fragmented_nalu_type = b1 & NALU_TYPE_BITMASK;

                    if let Some(fua_buffer) = self.fua_buffer.take() {
                        payload.put(&*ANNEXB_NALUSTART_CODE);
                        payload.put_u8(nalu_ref_idc | fragmented_nalu_type);
                        payload.put(fua_buffer);
                    }

                    Ok(payload.freeze())
                } else {
                    Ok(Bytes::new())
                }
            }
            _ => Err(Error::NaluTypeIsNotHandled(nalu_type)),
        }
    }

    fn packet_kind(&self, payload: &Bytes) -> PacketKind {
        if payload.is_empty() {
            return PacketKind::Standalone;
        }

        let nalu_type = payload[0] & NALU_TYPE_BITMASK;
        if nalu_type == FUA_NALU_TYPE {
            if payload.len() < FUA_HEADER_SIZE {
                return PacketKind::Standalone;
            }
            let b1 = payload[1];
            if b1 & FU_START_BITMASK != 0 {
                PacketKind::Start
            } else if b1 & FU_END_BITMASK != 0 {
                PacketKind::End
            } else {
                PacketKind::Middle
            }
        } else {
            PacketKind::Standalone
        }
    }
}

/// True if the NALU begins a key frame (IDR, or the parameter sets that
/// precede one).
pub fn is_key_frame_nalu(nalu_type: u8) -> bool {
    nalu_type == IDR_NALU_TYPE
}

pub fn is_parameter_nalu(nalu_type: u8) -> bool {
    nalu_type == SPS_NALU_TYPE || nalu_type == PPS_NALU_TYPE
}

/// True if this slice payload (without the NAL header octet) starts a
/// frame, i.e. its first_mb_in_slice Exp-Golomb field is zero.
pub fn is_slice_frame_start(slice_data: &[u8]) -> bool {
    let mut reader = util::bit_reader::BitReader::new(slice_data);
    reader.read_unsigned_exp_golomb() == Some(0)
}

/// Scans an Annex-B frame for an IDR slice that starts a picture.
pub fn is_key_frame(frame: &[u8]) -> bool {
    let mut zero_count = 0usize;
    let mut i = 0usize;
    while i < frame.len() {
        let b = frame[i];
        if b == 0 {
            zero_count += 1;
            i += 1;
            continue;
        }
        if b == 1 && zero_count >= 2 {
            let nalu_start = i + 1;
            if nalu_start < frame.len() {
                let nalu_type = frame[nalu_start] & NALU_TYPE_BITMASK;
                if nalu_type == IDR_NALU_TYPE
                    && is_slice_frame_start(&frame[nalu_start + 1..])
                {
                    return true;
                }
            }
        }
        zero_count = 0;
        i += 1;
    }
    false
}

#[cfg(test)]
mod h264_test {
    use super::*;

    #[test]
    fn test_payload_single_nalu() {
        let mut payloader = H264Payloader::default();
        let frame = Bytes::from_static(&[0, 0, 1, 0x65, 1, 2, 3]);
        let out = payloader.payload(1200, &frame).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &[0x65, 1, 2, 3]);
    }

    #[test]
    fn test_payload_sps_pps_makes_stapa() {
        let mut payloader = H264Payloader::default();
        let frame = Bytes::from_static(&[
            0, 0, 0, 1, 0x67, 0xAA, // SPS
            0, 0, 0, 1, 0x68, 0xBB, // PPS
            0, 0, 0, 1, 0x65, 1, 2, // IDR
        ]);
        let out = payloader.payload(1200, &frame).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][0], OUTPUT_STAP_AHEADER);
        // STAP-A carries both parameter sets
        assert_eq!(&out[0][1..], &[0, 2, 0x67, 0xAA, 0, 2, 0x68, 0xBB]);
        assert_eq!(&out[1][..], &[0x65, 1, 2]);
    }

    #[test]
    fn test_payload_fragments_large_nalu() {
        let mut payloader = H264Payloader::default();
        let mut frame = vec![0, 0, 1, 0x65];
        frame.extend(std::iter::repeat(0xAB).take(300));
        let out = payloader.payload(100, &Bytes::from(frame)).unwrap();

        assert!(out.len() > 1);
        for (i, p) in out.iter().enumerate() {
            assert!(p.len() <= 100);
            assert_eq!(p[0] & NALU_TYPE_BITMASK, FUA_NALU_TYPE);
            let b1 = p[1];
            if i == 0 {
                assert_ne!(b1 & FU_START_BITMASK, 0);
            } else if i == out.len() - 1 {
                assert_ne!(b1 & FU_END_BITMASK, 0);
            } else {
                assert_eq!(b1 & (FU_START_BITMASK | FU_END_BITMASK), 0);
            }
            assert_eq!(b1 & NALU_TYPE_BITMASK, 0x05);
        }

        // Depacketizing the fragments reproduces the NALU
        let mut depacketizer = H264Packet::default();
        let mut nalu = BytesMut::new();
        for p in &out {
            let d = depacketizer.depacketize(p).unwrap();
            nalu.put(d);
        }
        assert_eq!(&nalu[..4], &[0, 0, 0, 1]);
        assert_eq!(nalu[4], 0x65);
        assert_eq!(nalu.len(), 4 + 1 + 300);
    }

    #[test]
    fn test_depacketize_stapa() {
        let mut depacketizer = H264Packet::default();
        let packet = Bytes::from_static(&[
            STAPA_NALU_TYPE | 0x60,
            0,
            2,
            0x67,
            0xAA,
            0,
            2,
            0x68,
            0xBB,
        ]);
        let out = depacketizer.depacketize(&packet).unwrap();
        assert_eq!(
            &out[..],
            &[0, 0, 0, 1, 0x67, 0xAA, 0, 0, 0, 1, 0x68, 0xBB]
        );
    }

    #[test]
    fn test_packet_kind() {
        let depacketizer = H264Packet::default();
        assert_eq!(
            depacketizer.packet_kind(&Bytes::from_static(&[0x65, 1, 2])),
            PacketKind::Standalone
        );
        assert_eq!(
            depacketizer.packet_kind(&Bytes::from_static(&[FUA_NALU_TYPE, FU_START_BITMASK | 5, 0])),
            PacketKind::Start
        );
        assert_eq!(
            depacketizer.packet_kind(&Bytes::from_static(&[FUA_NALU_TYPE, 5, 0])),
            PacketKind::Middle
        );
        assert_eq!(
            depacketizer.packet_kind(&Bytes::from_static(&[FUA_NALU_TYPE, FU_END_BITMASK | 5, 0])),
            PacketKind::End
        );
    }

    #[test]
    fn test_key_frame_detection() {
        // IDR slice with first_mb_in_slice == 0 (leading bit set)
        assert!(is_key_frame(&[0, 0, 0, 1, 0x65, 0x88, 0x80]));
        // Non-IDR slice
        assert!(!is_key_frame(&[0, 0, 0, 1, 0x61, 0x88, 0x80]));
        // IDR slice continuing a picture (first_mb_in_slice == 1: 010...)
        assert!(!is_key_frame(&[0, 0, 0, 1, 0x65, 0x40]));
        // SPS + PPS + IDR
        assert!(is_key_frame(&[
            0, 0, 0, 1, 0x67, 0xAA, 0, 0, 0, 1, 0x68, 0xBB, 0, 0, 1, 0x65, 0x88,
        ]));
    }

    #[test]
    fn test_csd_primes_parameter_sets() {
        let mut payloader = H264Payloader::default();
        payloader.set_codec_specific_data(&[
            Bytes::from_static(&[0, 0, 0, 1, 0x67, 0xAA]),
            Bytes::from_static(&[0, 0, 0, 1, 0x68, 0xBB]),
        ]);

        let frame = Bytes::from_static(&[0, 0, 1, 0x65, 1]);
        let out = payloader.payload(1200, &frame).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][0], OUTPUT_STAP_AHEADER);
    }
}
