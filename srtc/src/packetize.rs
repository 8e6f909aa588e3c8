use std::sync::Arc;

use bytes::Bytes;

use rtp::codecs::h264::H264Payloader;
use rtp::codecs::opus::OpusPayloader;
use rtp::extension::{self, SimulcastLayer};
use rtp::header::Header;
use rtp::packet::Packet;
use rtp::packetizer::Payloader;

use crate::config::{Codec, MediaType};
use crate::dtls::DTLS_MTU;
use crate::error::Result;
use crate::track::Track;
use crate::twcc::TwccSource;

/// One packet ready for the pacer, carrying the rollover counter that its
/// sequence number was allocated under.
pub struct OutgoingPacket {
    pub track: Arc<Track>,
    pub packet: Packet,
    pub rollover: u32,
}

pub fn make_payloader(codec: Codec) -> Box<dyn Payloader> {
    match codec {
        Codec::H264 => Box::new(H264Payloader::default()),
        Codec::Opus => Box::new(OpusPayloader),
    }
}

/// Turns codec frames into RTP packets for one track: payload
/// fragmentation via the codec payloader, header extensions, sequence and
/// timestamp assignment, and probing padding.
pub struct Packetizer {
    payloader: Box<dyn Payloader>,
}

impl Packetizer {
    pub fn new(codec: Codec) -> Self {
        Packetizer {
            payloader: make_payloader(codec),
        }
    }

    pub fn set_codec_specific_data(&mut self, csd: &[Bytes]) {
        self.payloader.set_codec_specific_data(csd);
    }

    /// Builds the extension block shared by all packets of a frame: mid,
    /// rid and the video layers allocation on simulcast key frames, plus
    /// the TWCC placeholder.
    fn base_header(
        &self,
        track: &Track,
        layers: &[SimulcastLayer],
        twcc: Option<&TwccSource>,
        answer_video_ext: &ExtIds,
        is_key_frame: bool,
    ) -> Header {
        let mut header = Header {
            payload_type: track.payload_type(),
            ssrc: track.ssrc(),
            ..Default::default()
        };

        if let (Some(simulcast), true) = (track.simulcast(), is_key_frame) {
            if answer_video_ext.mid != 0 {
                let _ = header.set_extension(answer_video_ext.mid, track.media_id().as_bytes());
            }
            if answer_video_ext.rid != 0 {
                let _ =
                    header.set_extension(answer_video_ext.rid, simulcast.layer.name.as_bytes());
            }
            if answer_video_ext.vla != 0 && !layers.is_empty() {
                let vla = extension::build_google_vla(simulcast.index as u8, layers);
                let _ = header.set_extension(answer_video_ext.vla, &vla);
            }
        }

        if let Some(twcc) = twcc {
            twcc.add_placeholder(&mut header, track.media_type());
        }

        header
    }

    /// Packetizes one frame. The MTU budget is 1200 bytes minus the SRTP
    /// protection overhead and the header (with extensions) size.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &mut self,
        track: &Arc<Track>,
        layers: &[SimulcastLayer],
        mut twcc: Option<&mut TwccSource>,
        ext_ids: &ExtIds,
        srtp_overhead: usize,
        frame: &Bytes,
    ) -> Result<Vec<OutgoingPacket>> {
        // Stream identification travels on key frames, which every layer
        // restarts from
        let is_key_frame = match track.codec() {
            Codec::H264 => rtp::codecs::h264::is_key_frame(frame),
            Codec::Opus => false,
        };

        let base_header =
            self.base_header(track, layers, twcc.as_deref(), ext_ids, is_key_frame);
        let header_size = base_header.marshal_size();

        let budget = DTLS_MTU
            .saturating_sub(srtp_overhead)
            .saturating_sub(header_size);
        if budget == 0 {
            return Ok(vec![]);
        }

        let payloads = self.payloader.payload(budget, frame)?;
        if payloads.is_empty() {
            return Ok(vec![]);
        }

        let timestamp = track.curr_rtp_timestamp();
        let is_video = track.media_type() == MediaType::Video;
        let count = payloads.len();

        let mut out = Vec::with_capacity(count);
        for (i, payload) in payloads.into_iter().enumerate() {
            let (sequence_number, rollover) = track.next_rtp_sequence();

            let mut header = base_header.clone();
            header.sequence_number = sequence_number;
            header.timestamp = timestamp;
            header.marker = is_video && i == count - 1;

            let padding_size = match twcc.as_deref_mut() {
                Some(twcc) => {
                    let remaining = budget.saturating_sub(payload.len());
                    let padding = twcc.get_padding(track.media_type(), remaining) as usize;
                    // Never overflow the MTU budget
                    padding.min(remaining) as u8
                }
                None => 0,
            };

            out.push(OutgoingPacket {
                track: track.clone(),
                packet: Packet {
                    header,
                    payload,
                    padding_size,
                },
                rollover,
            });
        }

        Ok(out)
    }
}

/// Header extension ids negotiated for the video section of the answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtIds {
    pub mid: u8,
    pub rid: u8,
    pub repaired_rid: u8,
    pub vla: u8,
}

impl ExtIds {
    pub fn from_extension_map(map: &rtp::extension::ExtensionMap) -> Self {
        ExtIds {
            mid: map.find_by_uri(extension::EXT_SDES_MID).unwrap_or(0),
            rid: map
                .find_by_uri(extension::EXT_SDES_RTP_STREAM_ID)
                .unwrap_or(0),
            repaired_rid: map
                .find_by_uri(extension::EXT_SDES_REPAIRED_RTP_STREAM_ID)
                .unwrap_or(0),
            vla: map.find_by_uri(extension::EXT_GOOGLE_VLA).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod packetize_test {
    use super::*;
    use crate::config::Direction;
    use crate::track::{SimulcastTrackInfo, TrackDescriptor};

    fn video_track(simulcast: Option<SimulcastTrackInfo>) -> Arc<Track> {
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
            simulcast,
            clock_rate: 90_000,
            has_nack: true,
            has_pli: true,
        }))
    }

    fn h264_frame(size: usize) -> Bytes {
        let mut frame = vec![0, 0, 0, 1, 0x65];
        frame.extend(std::iter::repeat(0xAB).take(size));
        Bytes::from(frame)
    }

    #[test]
    fn test_sequences_are_consecutive() {
        let mut packetizer = Packetizer::new(Codec::H264);
        let track = video_track(None);

        let out = packetizer
            .generate(&track, &[], None, &ExtIds::default(), 16, &h264_frame(5000))
            .unwrap();
        assert!(out.len() > 1);

        for pair in out.windows(2) {
            assert_eq!(
                pair[1].packet.header.sequence_number,
                pair[0].packet.header.sequence_number.wrapping_add(1)
            );
            assert_eq!(pair[0].packet.header.timestamp, pair[1].packet.header.timestamp);
        }

        // Marker only on the last packet of a video frame
        for (i, p) in out.iter().enumerate() {
            assert_eq!(p.packet.header.marker, i == out.len() - 1);
            assert!(p.packet.marshal_size() + 16 <= DTLS_MTU);
        }
    }

    #[test]
    fn test_simulcast_extensions_present() {
        let layers = vec![
            SimulcastLayer {
                name: "low".to_owned(),
                width: 320,
                height: 180,
                frames_per_second: 15,
                kilobits_per_second: 150,
            },
            SimulcastLayer {
                name: "high".to_owned(),
                width: 1280,
                height: 720,
                frames_per_second: 30,
                kilobits_per_second: 1500,
            },
        ];
        let track = video_track(Some(SimulcastTrackInfo {
            index: 1,
            layer: layers[1].clone(),
        }));

        let ext_ids = ExtIds {
            mid: 1,
            rid: 2,
            repaired_rid: 3,
            vla: 4,
        };
        let mut packetizer = Packetizer::new(Codec::H264);
        let out = packetizer
            .generate(&track, &layers, None, &ext_ids, 16, &h264_frame(100))
            .unwrap();
        assert_eq!(out.len(), 1);

        let header = &out[0].packet.header;
        assert_eq!(header.get_extension(1).unwrap(), b"0");
        assert_eq!(header.get_extension(2).unwrap(), b"high");
        let vla = header.get_extension(4).unwrap();
        assert_eq!(vla[0], (1 << 6) | (1 << 4) | 0x01);

        // Delta frames travel without the stream identification block
        let delta = Bytes::from_static(&[0, 0, 0, 1, 0x61, 0x88]);
        let out = packetizer
            .generate(&track, &layers, None, &ext_ids, 16, &delta)
            .unwrap();
        assert!(out[0].packet.header.get_extension(2).is_none());
    }

    #[test]
    fn test_padding_respects_budget() {
        let mut twcc = TwccSource::new(14, 14);
        twcc.start_probing();

        let track = video_track(None);
        let mut packetizer = Packetizer::new(Codec::H264);
        let out = packetizer
            .generate(
                &track,
                &[],
                Some(&mut twcc),
                &ExtIds::default(),
                16,
                &h264_frame(5000),
            )
            .unwrap();

        for p in &out {
            assert!(p.packet.marshal_size() + 16 <= DTLS_MTU);
        }
        // At least the last, non-full packet picks up probe padding
        assert!(out.iter().any(|p| p.packet.padding_size > 0));
    }
}
