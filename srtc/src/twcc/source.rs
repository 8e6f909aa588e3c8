use std::time::{Duration, Instant};

use rtcp::transport_layer_cc::{SymbolTypeTcc, TransportLayerCc, REFERENCE_TIME_UNIT_MICROS};
use rtp::extension::{self, ExtensionMap, EXT_GOOGLE_TWCC};

use crate::answer::SdpAnswer;
use crate::config::{Direction, MediaType, OfferConfig};
use crate::stats::PublishConnectionStats;
use crate::track::Track;
use crate::twcc::publish::{
    PublishPacketHistory, STATUS_RECEIVED_LARGE_DELTA, STATUS_RECEIVED_SMALL_DELTA,
};

pub const START_PROBING_TIMEOUT: Duration = Duration::from_secs(10);
pub const PERIODIC_PROBING_TIMEOUT: Duration = Duration::from_secs(5);
pub const PROBE_DURATION: Duration = Duration::from_secs(1);

fn find_twcc_extension(map: &ExtensionMap) -> u8 {
    map.find_by_uri(EXT_GOOGLE_TWCC).unwrap_or(0)
}

/// Assigns transport-wide sequence numbers to outgoing packets, ingests
/// TWCC feedback, and owns the bandwidth analysis history.
pub struct TwccSource {
    video_ext_id: u8,
    audio_ext_id: u8,
    next_packet_seq: u16,
    history: PublishPacketHistory,
    epoch: Instant,
    is_probing: bool,
    probing_packet_count: u32,
}

impl TwccSource {
    /// Present only when the offer asked for BWE and every media section
    /// in the answer negotiated the TWCC extension.
    pub fn factory(
        direction: Direction,
        config: &OfferConfig,
        answer: &SdpAnswer,
    ) -> Option<TwccSource> {
        if direction != Direction::Publish || !config.enable_bwe {
            return None;
        }

        let mut video_ext_id = 0;
        if answer.has_video_media() {
            video_ext_id = find_twcc_extension(answer.video_extension_map());
            if video_ext_id == 0 {
                return None;
            }
        }

        let mut audio_ext_id = 0;
        if answer.has_audio_media() {
            audio_ext_id = find_twcc_extension(answer.audio_extension_map());
            if audio_ext_id == 0 {
                return None;
            }
        }

        Some(TwccSource::new(video_ext_id, audio_ext_id))
    }

    pub fn new(video_ext_id: u8, audio_ext_id: u8) -> Self {
        TwccSource {
            video_ext_id,
            audio_ext_id,
            next_packet_seq: 1,
            history: PublishPacketHistory::new(),
            epoch: Instant::now(),
            is_probing: false,
            probing_packet_count: 0,
        }
    }

    fn now_micros(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    pub fn extension_id(&self, media_type: MediaType) -> u8 {
        match media_type {
            MediaType::Video => self.video_ext_id,
            MediaType::Audio => self.audio_ext_id,
        }
    }

    /// Writes the placeholder sequence during packetization so that size
    /// measurement is correct; the real value is baked in right before
    /// the packet is generated for sending.
    pub fn add_placeholder(&self, header: &mut rtp::header::Header, media_type: MediaType) {
        let id = self.extension_id(media_type);
        if id != 0 {
            let _ = extension::set_u16(header, id, 0);
        }
    }

    /// Allocates the next transport-wide sequence number and rewrites the
    /// placeholder in the packet's extension block.
    pub fn on_before_generating(&mut self, packet: &mut rtp::packet::Packet, track: &Track) {
        let id = self.extension_id(track.media_type());
        if id != 0 {
            let seq = self.next_packet_seq;
            self.next_packet_seq = self.next_packet_seq.wrapping_add(1);
            let _ = extension::set_u16(&mut packet.header, id, seq);
        }
    }

    pub fn feedback_seq(&self, packet: &rtp::packet::Packet, track: &Track) -> Option<u16> {
        let id = self.extension_id(track.media_type());
        if id == 0 {
            return None;
        }
        extension::find_u16(&packet.header, id)
    }

    /// Records the outgoing packet's sizes and send time.
    pub fn on_before_sending(
        &mut self,
        packet: &rtp::packet::Packet,
        track: &Track,
        generated_size: usize,
        encrypted_size: usize,
    ) {
        let seq = match self.feedback_seq(packet, track) {
            Some(seq) => seq,
            None => return,
        };

        let now = self.now_micros();
        self.history.save_outgoing(
            seq,
            track.media_type(),
            packet.padding_size as u16,
            packet.payload.len() as u16,
            generated_size as u16,
            encrypted_size as u16,
            now,
        );
    }

    pub fn on_packet_was_nacked(&mut self, packet: &rtp::packet::Packet, track: &Track) {
        let seq = match self.feedback_seq(packet, track) {
            Some(seq) => seq,
            None => return,
        };
        if let Some(status) = self.history.get_mut(seq) {
            status.nack_count += 1;
        }
    }

    /// RTP padding to request for the next outgoing packet while probing.
    pub fn get_padding(&mut self, media_type: MediaType, remaining_data_size: usize) -> u8 {
        if !self.is_probing {
            return 0;
        }

        if remaining_data_size < 500 {
            return 50;
        }

        match media_type {
            MediaType::Video => {
                // Video gets packetized, we can always add ~10% to
                // outgoing packets
                self.probing_packet_count += 1;
                120
            }
            MediaType::Audio => {
                // Audio doesn't split packets, we have to stay within the
                // MTU
                if remaining_data_size < 1060 {
                    self.probing_packet_count += 1;
                    (remaining_data_size / 10) as u8
                } else {
                    0
                }
            }
        }
    }

    pub fn start_probing(&mut self) {
        log::trace!("start probing");
        self.is_probing = true;
        self.probing_packet_count = 0;
    }

    pub fn end_probing(&mut self) {
        if self.is_probing {
            log::trace!("end probing, {} packets", self.probing_packet_count);
            self.is_probing = false;
        }
    }

    pub fn is_probing(&self) -> bool {
        self.is_probing
    }

    /// Folds a feedback packet into the history and runs the analysis
    /// passes. Returns true when an active probe should be cut short.
    pub fn on_received_feedback(&mut self, cc: &TransportLayerCc) -> bool {
        if cc.packet_status_count == 0 {
            log::warn!("TWCC feedback carries no packet statuses");
            return false;
        }

        let reference_time_micros = cc.reference_time as i64 * REFERENCE_TIME_UNIT_MICROS;

        // Resolve absolute receive times by running sum over the received
        // entries, then fold each status into the history.
        let mut prev_time: Option<i64> = None;
        for entry in cc.entries() {
            match entry.status {
                SymbolTypeTcc::PacketReceivedSmallDelta
                | SymbolTypeTcc::PacketReceivedLargeDelta => {
                    let delta = entry.delta_micros.unwrap_or(0);
                    let time = match prev_time {
                        None => reference_time_micros + delta,
                        Some(t) => t + delta,
                    };
                    prev_time = Some(time);

                    if let Some(status) = self.history.get_mut(entry.sequence_number) {
                        status.reported_status =
                            if entry.status == SymbolTypeTcc::PacketReceivedSmallDelta {
                                STATUS_RECEIVED_SMALL_DELTA
                            } else {
                                STATUS_RECEIVED_LARGE_DELTA
                            };
                        status.received_time_micros = time;
                        status.received_time_present = true;
                    }
                }
                _ => {}
            }
        }

        let now = self.now_micros();
        self.history.update(now);

        // If probing starts causing delays or loss, stop early
        if self.is_probing && self.history.should_stop_probing() {
            log::trace!("stopping probing because of inter delays or packet loss");
            self.is_probing = false;
            return true;
        }
        false
    }

    /// Spread for pacing a frame's packets, scaled by this layer's share
    /// of the total simulcast bandwidth.
    pub fn pacing_spread(
        &self,
        total_payload_size: usize,
        bandwidth_scale: f32,
        default_value: Duration,
    ) -> Duration {
        self.history
            .pacing_spread_millis(total_payload_size, bandwidth_scale, default_value)
    }

    pub fn update_stats(&self, stats: &mut PublishConnectionStats) {
        self.history.update_stats(stats);
    }

    #[cfg(test)]
    pub(crate) fn history_mut(&mut self) -> &mut PublishPacketHistory {
        &mut self.history
    }
}
