use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use rtp::codecs::h264::{self, H264Packet};
use rtp::codecs::opus::OpusPacket;
use rtp::packetizer::{Depacketizer, PacketKind};
use util::extended_value::ExtendedValue;

use crate::config::Codec;

const CAPACITY: usize = 2048;
const MASK: u64 = (CAPACITY - 1) as u64;

/// A missing packet is NACKed after a short fuse and given up on after a
/// longer one.
pub const NACK_REQUEST_DELAY: Duration = Duration::from_millis(5);
pub const NACK_ABANDON_DELAY: Duration = Duration::from_millis(60);

struct Slot {
    seq_ext: u64,
    received: bool,
    nack_needed: bool,
    when_nack_request: Instant,
    when_nack_abandon: Instant,
    kind: PacketKind,
    rtp_timestamp_ext: u64,
    marker: bool,
    payload: Bytes,
}

impl Slot {
    fn missing(seq_ext: u64, now: Instant) -> Self {
        Slot {
            seq_ext,
            received: false,
            nack_needed: true,
            when_nack_request: now + NACK_REQUEST_DELAY,
            when_nack_abandon: now + NACK_ABANDON_DELAY,
            kind: PacketKind::Standalone,
            rtp_timestamp_ext: 0,
            marker: false,
            payload: Bytes::new(),
        }
    }
}

const HAVE_SPS: u8 = 0x01;
const HAVE_PPS: u8 = 0x02;
const HAVE_KEY: u8 = 0x04;
const HAVE_ALL: u8 = HAVE_SPS | HAVE_PPS | HAVE_KEY;

/// Reorders incoming packets by extended sequence number, requests
/// retransmission of gaps, reassembles fragmented codec frames, and does
/// not emit anything before the first valid key frame.
pub struct JitterBuffer {
    codec: Codec,
    depacketizer: Box<dyn Depacketizer>,
    slots: Vec<Option<Slot>>,
    seq_extender: ExtendedValue<u16>,
    ts_extender: ExtendedValue<u32>,
    /// Next extended sequence to consume; None until the first packet.
    base_seq_ext: Option<u64>,
    max_seq_ext: u64,

    frame_buffer: BytesMut,
    frame_timestamp: u64,
    have_bits: u8,
}

fn make_depacketizer(codec: Codec) -> Box<dyn Depacketizer> {
    match codec {
        Codec::H264 => Box::new(H264Packet::default()),
        Codec::Opus => Box::new(OpusPacket),
    }
}

impl JitterBuffer {
    pub fn new(codec: Codec) -> Self {
        let mut slots = Vec::with_capacity(CAPACITY);
        slots.resize_with(CAPACITY, || None);
        JitterBuffer {
            codec,
            depacketizer: make_depacketizer(codec),
            slots,
            seq_extender: ExtendedValue::new(),
            ts_extender: ExtendedValue::new(),
            base_seq_ext: None,
            max_seq_ext: 0,
            frame_buffer: BytesMut::new(),
            frame_timestamp: 0,
            have_bits: if codec == Codec::H264 { 0 } else { HAVE_ALL },
        }
    }

    /// Inserts one received packet, creating NACK placeholders for any
    /// gap between it and the previously highest sequence.
    pub fn put(&mut self, packet: rtp::packet::Packet) {
        let now = Instant::now();
        let seq_ext = self.seq_extender.extend(packet.header.sequence_number);
        let ts_ext = self.ts_extender.extend(packet.header.timestamp);

        match self.base_seq_ext {
            None => {
                self.base_seq_ext = Some(seq_ext);
                self.max_seq_ext = seq_ext;
            }
            Some(base) => {
                if seq_ext < base {
                    // Too late, already consumed or abandoned
                    return;
                }
                if seq_ext > self.max_seq_ext {
                    // Mark the gap for NACK
                    let mut missing = self.max_seq_ext + 1;
                    while missing < seq_ext {
                        let index = (missing & MASK) as usize;
                        if self.slots[index]
                            .as_ref()
                            .map(|s| s.seq_ext != missing)
                            .unwrap_or(true)
                        {
                            self.slots[index] = Some(Slot::missing(missing, now));
                        }
                        missing += 1;
                    }
                    self.max_seq_ext = seq_ext;

                    // The window is bounded; the oldest entries fall off
                    if self.max_seq_ext - self.base_seq_ext.unwrap() >= CAPACITY as u64 {
                        self.base_seq_ext = Some(self.max_seq_ext - CAPACITY as u64 + 1);
                    }
                }
            }
        }

        let kind = self.depacketizer.packet_kind(&packet.payload);
        let index = (seq_ext & MASK) as usize;
        self.slots[index] = Some(Slot {
            seq_ext,
            received: true,
            nack_needed: false,
            when_nack_request: now,
            when_nack_abandon: now,
            kind,
            rtp_timestamp_ext: ts_ext,
            marker: packet.header.marker,
            payload: packet.payload,
        });
    }

    /// Sequence numbers whose NACK fuse has burned down. Each is returned
    /// once; abandoned gaps are skipped over.
    pub fn nacks_due(&mut self, now: Instant) -> Vec<u16> {
        let base = match self.base_seq_ext {
            Some(base) => base,
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        let mut seq = base;
        while seq <= self.max_seq_ext {
            let index = (seq & MASK) as usize;
            if let Some(slot) = &mut self.slots[index] {
                if slot.seq_ext == seq && !slot.received && slot.nack_needed {
                    if now >= slot.when_nack_abandon {
                        slot.nack_needed = false;
                    } else if now >= slot.when_nack_request {
                        slot.nack_needed = false;
                        out.push((seq & 0xFFFF) as u16);
                    }
                }
            }
            seq += 1;
        }
        out
    }

    /// Consumes in-order packets and returns completed codec frames. A
    /// frame is complete at its marker packet; fragmented payloads are
    /// reassembled first. For H.264 nothing is emitted before SPS, PPS
    /// and a key frame have been seen.
    pub fn pop_frames(&mut self, now: Instant) -> Vec<Bytes> {
        let mut out = Vec::new();
        loop {
            let base = match self.base_seq_ext {
                Some(base) => base,
                None => break,
            };
            if base > self.max_seq_ext {
                break;
            }

            let index = (base & MASK) as usize;
            let slot_ready = match &self.slots[index] {
                Some(slot) if slot.seq_ext == base => {
                    if slot.received {
                        true
                    } else if now >= slot.when_nack_abandon {
                        false
                    } else {
                        // Still waiting for a retransmission
                        break;
                    }
                }
                _ => break,
            };

            if !slot_ready {
                // Abandon the packet: drop the partial frame and wait for
                // the next key frame before emitting again
                log::debug!("abandoning lost packet, dropping partial frame");
                self.slots[index] = None;
                self.base_seq_ext = Some(base + 1);
                self.frame_buffer.clear();
                self.depacketizer = make_depacketizer(self.codec);
                if self.codec == Codec::H264 {
                    self.have_bits = 0;
                }
                continue;
            }

            let slot = self.slots[index].take().unwrap();
            self.base_seq_ext = Some(base + 1);

            let piece = match self.depacketizer.depacketize(&slot.payload) {
                Ok(piece) => piece,
                Err(e) => {
                    log::debug!("failed to depacketize payload: {e}");
                    continue;
                }
            };

            if piece.is_empty() {
                // Start or middle of a fragmented NAL, nothing assembled
                // yet
                debug_assert!(matches!(slot.kind, PacketKind::Start | PacketKind::Middle));
                continue;
            }

            if self.frame_timestamp != slot.rtp_timestamp_ext {
                self.frame_timestamp = slot.rtp_timestamp_ext;
                self.frame_buffer.clear();
            }
            self.frame_buffer.put(piece);

            // Audio frames are one packet each and carry no marker
            let end_of_frame = slot.marker || self.codec == Codec::Opus;
            if end_of_frame {
                let frame = self.frame_buffer.split().freeze();
                if self.update_key_frame_gate(&frame) {
                    out.push(frame);
                } else {
                    log::debug!("not emitting a frame until there is a key frame");
                }
            }
        }
        out
    }

    /// True until the first complete key frame has been seen.
    pub fn waiting_for_key_frame(&self) -> bool {
        self.have_bits != HAVE_ALL
    }

    fn update_key_frame_gate(&mut self, frame: &Bytes) -> bool {
        if self.have_bits == HAVE_ALL {
            return true;
        }

        // Walk the Annex-B NALs of the frame
        let mut i = 0usize;
        while i + 4 <= frame.len() {
            if frame[i] == 0 && frame[i + 1] == 0 && frame[i + 2] == 0 && frame[i + 3] == 1 {
                if i + 4 < frame.len() {
                    let nalu_type = frame[i + 4] & 0x1F;
                    if nalu_type == h264::SPS_NALU_TYPE {
                        self.have_bits |= HAVE_SPS;
                    } else if nalu_type == h264::PPS_NALU_TYPE {
                        self.have_bits |= HAVE_PPS;
                    } else if h264::is_key_frame_nalu(nalu_type) {
                        self.have_bits |= HAVE_KEY;
                    }
                }
                i += 4;
            } else {
                i += 1;
            }
        }

        self.have_bits == HAVE_ALL
    }
}

#[cfg(test)]
mod jitter_test {
    use super::*;
    use rtp::header::Header;
    use rtp::packet::Packet;

    fn media_packet(seq: u16, timestamp: u32, marker: bool, payload: &'static [u8]) -> Packet {
        Packet {
            header: Header {
                marker,
                payload_type: 96,
                sequence_number: seq,
                timestamp,
                ssrc: 1,
                ..Default::default()
            },
            payload: Bytes::from_static(payload),
            padding_size: 0,
        }
    }

    // SPS, PPS and IDR packed the way the sender's STAP-A would arrive
    const KEY_FRAME_STAPA: &[u8] = &[
        24, // STAP-A
        0, 2, 0x67, 0xAA, // SPS
        0, 2, 0x68, 0xBB, // PPS
        0, 3, 0x65, 0x01, 0x02, // IDR
    ];

    #[test]
    fn test_in_order_key_frame_is_emitted() {
        let mut jb = JitterBuffer::new(Codec::H264);
        jb.put(media_packet(100, 3000, true, KEY_FRAME_STAPA));

        let frames = jb.pop_frames(Instant::now());
        assert_eq!(frames.len(), 1);
        // Three NALs, each with an Annex-B start code
        let frame = &frames[0];
        assert_eq!(frame.iter().filter(|b| **b == 0x67).count(), 1);
        assert_eq!(&frame[..5], &[0, 0, 0, 1, 0x67]);
    }

    #[test]
    fn test_non_key_frames_dropped_until_key() {
        let mut jb = JitterBuffer::new(Codec::H264);
        // A plain non-IDR slice
        jb.put(media_packet(10, 1000, true, &[0x61, 0x01]));
        assert!(jb.pop_frames(Instant::now()).is_empty());

        jb.put(media_packet(11, 2000, true, KEY_FRAME_STAPA));
        assert_eq!(jb.pop_frames(Instant::now()).len(), 1);

        // After the key frame, deltas flow
        jb.put(media_packet(12, 3000, true, &[0x61, 0x02]));
        assert_eq!(jb.pop_frames(Instant::now()).len(), 1);
    }

    #[test]
    fn test_reorder_within_window() {
        let mut jb = JitterBuffer::new(Codec::Opus);
        jb.put(media_packet(5, 100, false, &[1]));
        jb.put(media_packet(7, 300, false, &[3]));
        // Nothing past the gap is consumed
        assert_eq!(jb.pop_frames(Instant::now()).len(), 1);

        jb.put(media_packet(6, 200, false, &[2]));
        let frames = jb.pop_frames(Instant::now());
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &[2]);
        assert_eq!(&frames[1][..], &[3]);
    }

    #[test]
    fn test_gap_produces_nack_after_fuse() {
        let mut jb = JitterBuffer::new(Codec::Opus);
        jb.put(media_packet(5, 100, false, &[1]));
        jb.put(media_packet(8, 400, false, &[4]));

        // Not yet due
        assert!(jb.nacks_due(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_millis(10);
        let nacks = jb.nacks_due(later);
        assert_eq!(nacks, vec![6, 7]);
        // Each gap is requested only once
        assert!(jb.nacks_due(later).is_empty());
    }

    #[test]
    fn test_abandoned_gap_is_skipped() {
        let mut jb = JitterBuffer::new(Codec::Opus);
        jb.put(media_packet(5, 100, false, &[1]));
        jb.put(media_packet(7, 300, false, &[3]));
        assert_eq!(jb.pop_frames(Instant::now()).len(), 1);

        // Before the abandon fuse, the buffer waits
        assert!(jb.pop_frames(Instant::now()).is_empty());

        // Past the fuse, the lost packet is skipped
        let later = Instant::now() + NACK_ABANDON_DELAY + Duration::from_millis(5);
        let frames = jb.pop_frames(later);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[3]);
    }

    #[test]
    fn test_opus_marker_free_packets_emit_per_packet() {
        let mut jb = JitterBuffer::new(Codec::Opus);
        for seq in 0..5u16 {
            jb.put(media_packet(seq, seq as u32 * 960, false, &[9]));
        }
        assert_eq!(jb.pop_frames(Instant::now()).len(), 5);
    }
}
