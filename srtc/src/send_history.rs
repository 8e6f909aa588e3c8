use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rtp::packet::Packet;

use crate::track::Track;

const MAX_HISTORY: usize = 100;

/// One packet retained for possible retransmission.
#[derive(Clone)]
pub struct SentPacket {
    pub track: Arc<Track>,
    pub packet: Packet,
    pub rollover: u32,
}

/// A bounded per-SSRC ring of recently sent packets, indexed by
/// `(SSRC, SEQ)` for the NACK/RTX path.
#[derive(Default)]
pub struct SendHistory {
    map: HashMap<u32, VecDeque<SentPacket>>,
}

impl SendHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, track: Arc<Track>, packet: Packet, rollover: u32) {
        let list = self.map.entry(packet.header.ssrc).or_default();
        while list.len() >= MAX_HISTORY {
            list.pop_back();
        }
        list.push_front(SentPacket {
            track,
            packet,
            rollover,
        });
    }

    pub fn find(&self, ssrc: u32, sequence: u16) -> Option<&SentPacket> {
        self.map
            .get(&ssrc)?
            .iter()
            .find(|p| p.packet.header.sequence_number == sequence)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod send_history_test {
    use super::*;
    use crate::config::{Codec, Direction, MediaType};
    use crate::track::TrackDescriptor;
    use bytes::Bytes;

    fn test_track() -> Arc<Track> {
        Arc::new(Track::new(TrackDescriptor {
            direction: Direction::Publish,
            media_type: MediaType::Video,
            media_id: "0".to_owned(),
            ssrc: 0x11112222,
            payload_type: 96,
            rtx_ssrc: Some(0x33334444),
            rtx_payload_type: Some(97),
            codec: Codec::H264,
            profile_level_id: None,
            minptime: None,
            stereo: false,
            simulcast: None,
            clock_rate: 90_000,
            has_nack: true,
            has_pli: true,
        }))
    }

    fn packet(seq: u16) -> Packet {
        Packet {
            header: rtp::header::Header {
                payload_type: 96,
                sequence_number: seq,
                ssrc: 0x11112222,
                ..Default::default()
            },
            payload: Bytes::from_static(&[1, 2, 3]),
            padding_size: 0,
        }
    }

    #[test]
    fn test_find_by_ssrc_and_seq() {
        let mut history = SendHistory::new();
        let track = test_track();
        for seq in 1000..1050 {
            history.save(track.clone(), packet(seq), 0);
        }

        let found = history.find(0x11112222, 1023).unwrap();
        assert_eq!(found.packet.header.sequence_number, 1023);
        assert!(history.find(0x11112222, 2000).is_none());
        assert!(history.find(0xDEADBEEF, 1023).is_none());
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut history = SendHistory::new();
        let track = test_track();
        for seq in 0..150u16 {
            history.save(track.clone(), packet(seq), 0);
        }

        // Only the most recent 100 remain
        assert!(history.find(0x11112222, 49).is_none());
        assert!(history.find(0x11112222, 50).is_some());
        assert!(history.find(0x11112222, 149).is_some());
    }
}
