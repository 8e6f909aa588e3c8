use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use rand::Rng;
use rtp::extension::SimulcastLayer;
use rtp::sequence::Sequencer;

use crate::config::{Codec, Direction, MediaType};

/// A simulcast layer bound to its ordinal index in the offer.
#[derive(Debug, Clone)]
pub struct SimulcastTrackInfo {
    pub index: usize,
    pub layer: SimulcastLayer,
}

/// Immutable track identity, resolved while parsing the answer.
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    pub direction: Direction,
    pub media_type: MediaType,
    /// SDP `mid` of the media section.
    pub media_id: String,
    pub ssrc: u32,
    pub payload_type: u8,
    pub rtx_ssrc: Option<u32>,
    pub rtx_payload_type: Option<u8>,
    pub codec: Codec,
    pub profile_level_id: Option<u32>,
    pub minptime: Option<u32>,
    pub stereo: bool,
    pub simulcast: Option<SimulcastTrackInfo>,
    pub clock_rate: u32,
    pub has_nack: bool,
    pub has_pli: bool,
}

/// Wrapping sequence allocation for one outgoing SSRC.
#[derive(Debug)]
pub struct PacketSource {
    sequencer: Sequencer,
}

impl PacketSource {
    fn new() -> Self {
        PacketSource {
            sequencer: Sequencer::new(),
        }
    }

    /// Next sequence number and the rollover counter that goes with it.
    pub fn next_sequence(&mut self) -> (u16, u32) {
        self.sequencer.next()
    }

    pub fn clear(&mut self) {
        self.sequencer = Sequencer::new();
    }
}

/// Monotone u32 counter for outgoing SRTCP indices.
#[derive(Debug, Default)]
pub struct RtcpPacketSource {
    next: u32,
}

impl RtcpPacketSource {
    pub fn next_sequence(&mut self) -> u32 {
        self.next = self.next.wrapping_add(1);
        self.next
    }

    pub fn clear(&mut self) {
        self.next = 0;
    }
}

/// Sent packet/byte counters, summed into the connection stats.
#[derive(Debug, Default)]
pub struct TrackStats {
    sent_packets: AtomicU32,
    sent_bytes: AtomicU64,
}

impl TrackStats {
    pub fn increment_sent_packets(&self, count: u32) {
        self.sent_packets.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_sent_bytes(&self, count: u64) {
        self.sent_bytes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn sent_packets(&self) -> u32 {
        self.sent_packets.load(Ordering::Relaxed)
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.sent_packets.store(0, Ordering::Relaxed);
        self.sent_bytes.store(0, Ordering::Relaxed);
    }
}

/// Produces RTP timestamps in the track's clock rate from a random base.
#[derive(Debug)]
pub struct RtpTimeSource {
    base: Instant,
    base_timestamp: u32,
    clock_rate: u32,
}

impl RtpTimeSource {
    fn new(clock_rate: u32) -> Self {
        RtpTimeSource {
            base: Instant::now(),
            base_timestamp: rand::thread_rng().gen(),
            clock_rate,
        }
    }

    pub fn curr_timestamp(&self) -> u32 {
        let elapsed = self.base.elapsed();
        let ticks = elapsed.as_micros() as u64 * self.clock_rate as u64 / 1_000_000;
        self.base_timestamp.wrapping_add(ticks as u32)
    }
}

/// A media stream identity plus its mutable counters. Immutable once
/// created; shared across the peer connection and its candidates.
pub struct Track {
    desc: TrackDescriptor,

    rtp_source: Mutex<PacketSource>,
    rtx_source: Mutex<PacketSource>,
    rtcp_source: Mutex<RtcpPacketSource>,
    stats: TrackStats,
    time_source: Mutex<RtpTimeSource>,
}

impl Track {
    pub fn new(desc: TrackDescriptor) -> Self {
        let clock_rate = desc.clock_rate;
        Track {
            desc,
            rtp_source: Mutex::new(PacketSource::new()),
            rtx_source: Mutex::new(PacketSource::new()),
            rtcp_source: Mutex::new(RtcpPacketSource::default()),
            stats: TrackStats::default(),
            time_source: Mutex::new(RtpTimeSource::new(clock_rate)),
        }
    }

    pub fn direction(&self) -> Direction {
        self.desc.direction
    }

    pub fn media_type(&self) -> MediaType {
        self.desc.media_type
    }

    pub fn media_id(&self) -> &str {
        &self.desc.media_id
    }

    pub fn ssrc(&self) -> u32 {
        self.desc.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.desc.payload_type
    }

    pub fn rtx_ssrc(&self) -> Option<u32> {
        self.desc.rtx_ssrc
    }

    pub fn rtx_payload_type(&self) -> Option<u8> {
        self.desc.rtx_payload_type
    }

    pub fn codec(&self) -> Codec {
        self.desc.codec
    }

    pub fn clock_rate(&self) -> u32 {
        self.desc.clock_rate
    }

    pub fn has_nack(&self) -> bool {
        self.desc.has_nack
    }

    pub fn has_pli(&self) -> bool {
        self.desc.has_pli
    }

    pub fn is_simulcast(&self) -> bool {
        self.desc.simulcast.is_some()
    }

    pub fn simulcast(&self) -> Option<&SimulcastTrackInfo> {
        self.desc.simulcast.as_ref()
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.desc
    }

    pub fn next_rtp_sequence(&self) -> (u16, u32) {
        self.rtp_source.lock().unwrap().next_sequence()
    }

    pub fn next_rtx_sequence(&self) -> (u16, u32) {
        self.rtx_source.lock().unwrap().next_sequence()
    }

    pub fn next_rtcp_sequence(&self) -> u32 {
        self.rtcp_source.lock().unwrap().next_sequence()
    }

    pub fn stats(&self) -> &TrackStats {
        &self.stats
    }

    pub fn curr_rtp_timestamp(&self) -> u32 {
        self.time_source.lock().unwrap().curr_timestamp()
    }

    /// Resets counters when a candidate is (re)selected.
    pub fn clear_sources(&self) {
        self.stats.clear();
        self.rtp_source.lock().unwrap().clear();
        self.rtx_source.lock().unwrap().clear();
        self.rtcp_source.lock().unwrap().clear();
    }
}
