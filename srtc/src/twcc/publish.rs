use std::time::Duration;

use util::filter::Filter;

use crate::config::MediaType;
use crate::stats::PublishConnectionStats;

pub const MAX_PACKET_COUNT: usize = 2048;
const MAX_PACKET_MASK: u16 = (MAX_PACKET_COUNT - 1) as u16;

const MAX_RECENT_ENOUGH: Duration = Duration::from_millis(3000);

const ACTUAL_CALCULATE_MIN_PACKETS: usize = 30;
const ACTUAL_CALCULATE_MIN_MICROS: i64 = 1_000_000;

const TREND_CALCULATE_MIN_PACKETS: usize = 15;
const TREND_CALCULATE_MIN_MICROS: i64 = 100_000;

const PROBE_CALCULATE_MIN_PACKETS: usize = 30;
const PROBE_CALCULATE_MIN_MICROS: i64 = 500_000;

const PROBE_MIN_PACKET_COUNT: u32 = 10;
const PROBE_MIN_DURATION_MICROS: i64 = 800_000;

const SLOPE_THRESHOLD: f64 = 0.1;
const OVERUSING_SINCE_MICROS: i64 = 2_000_000;
const OVERUSING_COUNT: u16 = 10;

pub const STATUS_NOT_RECEIVED: u8 = 0;
pub const STATUS_RECEIVED_SMALL_DELTA: u8 = 1;
pub const STATUS_RECEIVED_LARGE_DELTA: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendlineEstimate {
    Normal,
    Overuse,
    Underuse,
}

/// Status of a single published RTP packet, indexed by its TWCC sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishPacket {
    pub seq: u16,
    pub sent_time_micros: i64,
    pub received_time_micros: i64,

    pub padding_size: u16,
    pub payload_size: u16,
    pub generated_size: u16,
    pub encrypted_size: u16,

    pub nack_count: u16,
    pub media_type: Option<MediaType>,
    pub reported_status: u8,

    pub reported_as_not_received: bool,
    pub reported_checked: bool,
    pub received_time_present: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastPacketInfo {
    seq: u16,
    sent_time_micros: i64,
}

impl LastPacketInfo {
    fn is_enough(&self, max: &PublishPacket, min_packets: usize, min_micros: i64) -> bool {
        max.seq.wrapping_sub(self.seq) as usize >= min_packets
            && max.sent_time_micros - self.sent_time_micros >= min_micros
    }

    fn update(&mut self, max: &PublishPacket) {
        self.seq = max.seq;
        self.sent_time_micros = max.sent_time_micros;
    }
}

fn calculate_slope(list: &[(f64, f64)]) -> Option<f64> {
    if list.is_empty() {
        return None;
    }

    let total = list.len() as f64;
    let (sum_x, sum_y) = list
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    let mean_x = sum_x / total;
    let mean_y = sum_y / total;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (x, y) in list {
        let dx = x - mean_x;
        let dy = y - mean_y;
        numerator += dx * dy;
        denominator += dx * dx;
    }

    if denominator < 0.01 {
        return None;
    }
    Some(numerator / denominator)
}

/// A flat ring of [`PublishPacket`] over the 16-bit TWCC sequence space.
/// The closed interval `[min_seq, max_seq]` is never wider than the ring;
/// writes that would exceed it advance `min_seq` and zero displaced slots.
pub struct PublishPacketHistory {
    history: Option<Box<[PublishPacket]>>,
    min_seq: u16,
    max_seq: u16,

    instant_packet_loss_percent: f32,
    packets_lost_filter: Filter,
    bandwidth_actual_filter: Filter,
    instant_trendline: TrendlineEstimate,
    smoothed_trendline: TrendlineEstimate,
    overusing_since_micros: i64,
    overusing_count: u16,
    probe_bits_per_second: f32,

    last_max_for_actual: LastPacketInfo,
    last_max_for_probe: LastPacketInfo,
    last_max_for_trend: LastPacketInfo,
}

impl Default for PublishPacketHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishPacketHistory {
    pub fn new() -> Self {
        PublishPacketHistory {
            history: None,
            min_seq: 0,
            max_seq: 0,
            instant_packet_loss_percent: 0.0,
            packets_lost_filter: Filter::new(0.2),
            bandwidth_actual_filter: Filter::new(0.2),
            instant_trendline: TrendlineEstimate::Normal,
            smoothed_trendline: TrendlineEstimate::Normal,
            overusing_since_micros: -1,
            overusing_count: 0,
            probe_bits_per_second: 0.0,
            last_max_for_actual: LastPacketInfo::default(),
            last_max_for_probe: LastPacketInfo::default(),
            last_max_for_trend: LastPacketInfo::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn save_outgoing(
        &mut self,
        seq: u16,
        media_type: MediaType,
        padding_size: u16,
        payload_size: u16,
        generated_size: u16,
        encrypted_size: u16,
        sent_time_micros: i64,
    ) {
        let index;
        match &mut self.history {
            None => {
                self.min_seq = seq;
                self.max_seq = seq;
                self.history =
                    Some(vec![PublishPacket::default(); MAX_PACKET_COUNT].into_boxed_slice());
                index = (seq & MAX_PACKET_MASK) as usize;
            }
            Some(history) => {
                loop {
                    if self.max_seq.wrapping_sub(self.min_seq) as usize + 1 == MAX_PACKET_COUNT {
                        self.min_seq = self.min_seq.wrapping_add(1);
                    }
                    self.max_seq = self.max_seq.wrapping_add(1);
                    let i = (self.max_seq & MAX_PACKET_MASK) as usize;
                    history[i] = PublishPacket::default();
                    if self.max_seq == seq {
                        break;
                    }
                }
                index = (seq & MAX_PACKET_MASK) as usize;
            }
        }

        let curr = &mut self.history.as_mut().unwrap()[index];
        curr.seq = seq;
        curr.padding_size = padding_size;
        curr.payload_size = payload_size;
        curr.generated_size = generated_size;
        curr.encrypted_size = encrypted_size;
        curr.sent_time_micros = sent_time_micros;
        curr.media_type = Some(media_type);
    }

    fn contains(&self, seq: u16) -> bool {
        if self.history.is_none() {
            return false;
        }
        if self.min_seq <= self.max_seq {
            self.min_seq <= seq && seq <= self.max_seq
        } else {
            seq >= self.min_seq || seq <= self.max_seq
        }
    }

    pub fn get(&self, seq: u16) -> Option<&PublishPacket> {
        if !self.contains(seq) {
            return None;
        }
        self.history
            .as_ref()
            .map(|h| &h[(seq & MAX_PACKET_MASK) as usize])
    }

    pub fn get_mut(&mut self, seq: u16) -> Option<&mut PublishPacket> {
        if !self.contains(seq) {
            return None;
        }
        self.history
            .as_mut()
            .map(|h| &mut h[(seq & MAX_PACKET_MASK) as usize])
    }

    pub fn packet_count(&self) -> usize {
        if self.history.is_none() {
            return 0;
        }
        self.max_seq.wrapping_sub(self.min_seq) as usize + 1
    }

    /// Runs the analysis passes after a feedback packet has been folded
    /// into the history. `now_micros` is the stable clock of the sender.
    pub fn update(&mut self, now_micros: i64) {
        let max = match self.find_most_recent_received() {
            Some(max) => max,
            None => return,
        };

        // Mark everything up to the newest received packet as checked;
        // not-received statuses become definitive losses.
        let mut seq = max.seq;
        loop {
            let min_seq = self.min_seq;
            let ptr = &mut self.history.as_mut().unwrap()[(seq & MAX_PACKET_MASK) as usize];
            if ptr.reported_checked {
                break;
            }
            ptr.reported_checked = true;
            if ptr.reported_status == STATUS_NOT_RECEIVED {
                ptr.reported_as_not_received = true;
            }
            if seq == min_seq {
                break;
            }
            seq = seq.wrapping_sub(1);
        }

        if self
            .last_max_for_actual
            .is_enough(&max, ACTUAL_CALCULATE_MIN_PACKETS, ACTUAL_CALCULATE_MIN_MICROS)
            && self.calculate_bandwidth_actual(&max)
        {
            self.last_max_for_actual.update(&max);
        }

        if self
            .last_max_for_probe
            .is_enough(&max, PROBE_CALCULATE_MIN_PACKETS, PROBE_CALCULATE_MIN_MICROS)
            && self.calculate_bandwidth_probe(&max)
        {
            self.last_max_for_probe.update(&max);
        }

        if self
            .last_max_for_trend
            .is_enough(&max, TREND_CALCULATE_MIN_PACKETS, TREND_CALCULATE_MIN_MICROS)
            && self.calculate_bandwidth_trend(now_micros, &max)
        {
            self.last_max_for_trend.update(&max);
        }
    }

    /// Spreads a frame's packets over time according to the measured
    /// bandwidth; the clamp assumes video frame rates between 15 and 60.
    pub fn pacing_spread_millis(
        &self,
        total_size: usize,
        bandwidth_scale: f32,
        default_value: Duration,
    ) -> Duration {
        if self.history.is_some() {
            if let (Some(bits_per_second), Some(when)) = (
                self.bandwidth_actual_filter.value(),
                self.bandwidth_actual_filter.when_updated(),
            ) {
                if when.elapsed() <= MAX_RECENT_ENOUGH && bits_per_second >= 10_000.0 {
                    let bytes_per_second = bits_per_second * bandwidth_scale / 8.0;
                    let spread = (1000 * total_size) as f32 / bytes_per_second;
                    let safe = spread.clamp(16.0, 66.6) * 0.8;
                    return Duration::from_millis(safe as u64);
                }
            }
        }
        default_value
    }

    pub fn update_stats(&self, stats: &mut PublishConnectionStats) {
        if self.history.is_none() {
            return;
        }

        if let (Some(value), Some(when)) = (
            self.packets_lost_filter.value(),
            self.packets_lost_filter.when_updated(),
        ) {
            if when.elapsed() <= MAX_RECENT_ENOUGH {
                stats.packets_lost_percent = value;
            }
        }

        if let (Some(value), Some(when)) = (
            self.bandwidth_actual_filter.value(),
            self.bandwidth_actual_filter.when_updated(),
        ) {
            if when.elapsed() <= MAX_RECENT_ENOUGH {
                stats.bandwidth_actual_kbit_per_second = value / 1024.0;
            }
        }

        stats.bandwidth_suggested_kbit_per_second = stats.bandwidth_actual_kbit_per_second;
        if stats.packets_lost_percent >= 10.0
            || self.smoothed_trendline == TrendlineEstimate::Overuse
        {
            // High packet loss or overuse from trendline analysis
            stats.bandwidth_suggested_kbit_per_second *= 0.9;
        } else if self.probe_bits_per_second / 1024.0 > stats.bandwidth_suggested_kbit_per_second
        {
            // We ran a probe and got a higher value
            stats.bandwidth_suggested_kbit_per_second = self.probe_bits_per_second / 1024.0;
        }
    }

    pub fn should_stop_probing(&self) -> bool {
        self.instant_packet_loss_percent >= 10.0
            || self.instant_trendline == TrendlineEstimate::Overuse
    }

    pub fn smoothed_trendline(&self) -> TrendlineEstimate {
        self.smoothed_trendline
    }

    pub fn instant_packet_loss_percent(&self) -> f32 {
        self.instant_packet_loss_percent
    }

    pub fn probe_bits_per_second(&self) -> f32 {
        self.probe_bits_per_second
    }

    fn for_each_back<F: FnMut(&PublishPacket) -> bool>(&self, from: u16, mut f: F) {
        let history = match &self.history {
            Some(h) => h,
            None => return,
        };
        let mut seq = from;
        loop {
            let ptr = &history[(seq & MAX_PACKET_MASK) as usize];
            if !f(ptr) {
                break;
            }
            if seq == self.min_seq {
                break;
            }
            seq = seq.wrapping_sub(1);
        }
    }

    fn calculate_bandwidth_actual(&mut self, max: &PublishPacket) -> bool {
        let total = self.packet_count();
        if total < ACTUAL_CALCULATE_MIN_PACKETS {
            return false;
        }

        // Packet loss over the full retained window
        let mut lost = 0u32;
        let mut nacked = 0u32;
        {
            let history = self.history.as_ref().unwrap();
            let mut seq = self.min_seq;
            loop {
                let ptr = &history[(seq & MAX_PACKET_MASK) as usize];
                if ptr.reported_as_not_received {
                    lost += 1;
                }
                nacked += ptr.nack_count as u32;
                if seq == self.max_seq {
                    break;
                }
                seq = seq.wrapping_add(1);
            }
        }

        self.instant_packet_loss_percent =
            (100.0 * lost.max(nacked) as f32 / total as f32).clamp(0.0, 100.0);
        self.packets_lost_filter
            .update(self.instant_packet_loss_percent);

        // Actual bandwidth over the most recent received packets
        let mut items: Vec<(i64, u16)> = Vec::new();
        let max_received = max.received_time_micros;
        self.for_each_back(max.seq, |ptr| {
            if ptr.received_time_present {
                items.push((ptr.received_time_micros, ptr.payload_size));
                if max_received - ptr.received_time_micros >= ACTUAL_CALCULATE_MIN_MICROS
                    && items.len() >= ACTUAL_CALCULATE_MIN_PACKETS
                {
                    return false;
                }
            }
            true
        });

        if items.len() < ACTUAL_CALCULATE_MIN_PACKETS {
            return false;
        }

        // The buffer should be close to being sorted, but maybe not quite
        items.sort_by(|a, b| b.0.cmp(&a.0));

        let duration_micros = items.first().unwrap().0 - items.last().unwrap().0;
        if duration_micros < ACTUAL_CALCULATE_MIN_MICROS {
            return false;
        }

        let total_size: u64 = items.iter().map(|(_, size)| *size as u64).sum();
        let bits_per_second =
            (total_size as f32 * 8.0 * 1_000_000.0) / duration_micros as f32;
        self.bandwidth_actual_filter.update(bits_per_second);

        true
    }

    fn calculate_bandwidth_probe(&mut self, max: &PublishPacket) -> bool {
        let total = self.packet_count();
        if total < PROBE_CALCULATE_MIN_PACKETS {
            return false;
        }

        // Find the longest recent span of padded packets
        let mut end: Option<PublishPacket> = None;
        let mut start: Option<PublishPacket> = None;
        let mut total_count = 0u32;
        let mut padding_present_count = 0u32;
        let mut padding_absent_run = 0u32;

        {
            let history = self.history.as_ref().unwrap();
            let mut seq = self.max_seq;
            loop {
                let ptr = &history[(seq & MAX_PACKET_MASK) as usize];

                if ptr.padding_size > 0 {
                    if end.is_none() {
                        end = Some(*ptr);
                    }
                    total_count += 1;
                    padding_present_count += 1;
                    padding_absent_run = 0;
                } else if end.is_some() && ptr.media_type != Some(MediaType::Audio) {
                    // Audio packets may not be able to add padding
                    total_count += 1;
                    padding_absent_run += 1;
                }

                if let Some(end_packet) = &end {
                    if ptr.padding_size > 0 {
                        if padding_present_count >= PROBE_MIN_PACKET_COUNT
                            && padding_present_count >= total_count * 8 / 10
                            && end_packet.received_time_micros - ptr.received_time_micros
                                >= PROBE_MIN_DURATION_MICROS
                        {
                            start = Some(*ptr);
                        }
                        if start.is_some() && padding_absent_run >= 10 {
                            break;
                        }
                    }
                }

                if seq == self.min_seq {
                    break;
                }
                seq = seq.wrapping_sub(1);
            }
        }

        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            _ => return false,
        };

        // Bandwidth over the span we found
        let mut span_total = 0u32;
        let mut span_padding = 0u32;
        let mut span_data_size = 0u64;
        {
            let history = self.history.as_ref().unwrap();
            let mut seq = end.seq;
            loop {
                let ptr = &history[(seq & MAX_PACKET_MASK) as usize];
                span_total += 1;
                if ptr.padding_size > 0 {
                    span_padding += 1;
                }
                span_data_size += ptr.payload_size as u64 + ptr.padding_size as u64;
                if seq == start.seq {
                    break;
                }
                seq = seq.wrapping_sub(1);
            }
        }

        let span_duration = end.received_time_micros - start.received_time_micros;
        if span_duration <= 0 {
            return false;
        }

        let probe_bits_per_second =
            (span_data_size as f32 * 8.0 * 1_000_000.0) / span_duration as f32;

        log::trace!(
            "probing packets: min = {}, max = {}, span total = {span_total}, \
             span probing = {span_padding}, duration = {span_duration} us, \
             data size = {span_data_size}, bw = {:.2} kbit/s",
            start.seq,
            end.seq,
            probe_bits_per_second / 1024.0
        );

        self.probe_bits_per_second = probe_bits_per_second;
        true
    }

    fn calculate_bandwidth_trend(&mut self, now_micros: i64, max: &PublishPacket) -> bool {
        if self.packet_count() == 0 {
            return false;
        }

        // Inter-arrival delay deltas for adjacent received packets
        let mut items: Vec<(f64, f64)> = Vec::new();
        {
            let history = self.history.as_ref().unwrap();
            let mut curr_seq = max.seq;
            loop {
                let curr = &history[(curr_seq & MAX_PACKET_MASK) as usize];

                if curr.received_time_present && curr_seq != self.min_seq {
                    let prev_seq = curr_seq.wrapping_sub(1);
                    let prev = &history[(prev_seq & MAX_PACKET_MASK) as usize];

                    if prev.received_time_present {
                        let sent_millis = curr.sent_time_micros as f64 / 1000.0;
                        let sent_delta = curr.sent_time_micros - prev.sent_time_micros;
                        let received_delta =
                            curr.received_time_micros - prev.received_time_micros;
                        let inter_delta_millis = (received_delta - sent_delta) as f64 / 1000.0;

                        items.push((sent_millis, inter_delta_millis));

                        if max.received_time_micros - curr.received_time_micros
                            >= TREND_CALCULATE_MIN_MICROS
                            && items.len() >= TREND_CALCULATE_MIN_PACKETS
                        {
                            break;
                        }
                    }
                }

                if curr_seq == self.min_seq {
                    break;
                }
                curr_seq = curr_seq.wrapping_sub(1);
            }
        }

        if items.len() < TREND_CALCULATE_MIN_PACKETS {
            return false;
        }
        items.reverse();

        let slope = match calculate_slope(&items) {
            Some(slope) => slope,
            None => return false,
        };

        log::trace!("trendline slope = {slope:.4}");

        if slope >= SLOPE_THRESHOLD {
            // Overuse; make sure it's not a one time event
            if self.overusing_since_micros == -1 {
                self.overusing_since_micros = now_micros;
                self.overusing_count = 0;
            }
            self.overusing_count += 1;

            self.instant_trendline = TrendlineEstimate::Overuse;
            if now_micros - self.overusing_since_micros >= OVERUSING_SINCE_MICROS
                && self.overusing_count >= OVERUSING_COUNT
            {
                self.smoothed_trendline = TrendlineEstimate::Overuse;
                self.probe_bits_per_second = 0.0;
            }
        } else if slope <= -SLOPE_THRESHOLD {
            self.overusing_since_micros = -1;
            self.overusing_count = 0;
            self.instant_trendline = TrendlineEstimate::Underuse;
            self.smoothed_trendline = TrendlineEstimate::Underuse;
        } else {
            self.overusing_since_micros = -1;
            self.overusing_count = 0;
            self.instant_trendline = TrendlineEstimate::Normal;
            self.smoothed_trendline = TrendlineEstimate::Normal;
        }

        true
    }

    fn find_most_recent_received(&self) -> Option<PublishPacket> {
        let history = self.history.as_ref()?;
        let mut seq = self.max_seq;
        loop {
            let ptr = &history[(seq & MAX_PACKET_MASK) as usize];
            if ptr.reported_status == STATUS_RECEIVED_SMALL_DELTA
                || ptr.reported_status == STATUS_RECEIVED_LARGE_DELTA
            {
                return Some(*ptr);
            }
            if seq == self.min_seq {
                return None;
            }
            seq = seq.wrapping_sub(1);
        }
    }
}

#[cfg(test)]
mod publish_test {
    use super::*;

    fn save(history: &mut PublishPacketHistory, seq: u16, sent: i64) {
        history.save_outgoing(seq, MediaType::Video, 0, 1200, 1212, 1228, sent);
    }

    #[test]
    fn test_window_slides_at_capacity() {
        let mut history = PublishPacketHistory::new();
        for seq in 0..3000u32 {
            save(&mut history, seq as u16, seq as i64 * 1000);
        }
        assert_eq!(history.packet_count(), MAX_PACKET_COUNT);
        assert!(history.get(0).is_none());
        assert!(history.get((3000 - MAX_PACKET_COUNT as u32) as u16).is_some());
        assert!(history.get(2999).is_some());
    }

    #[test]
    fn test_window_slides_across_u16_wrap() {
        let mut history = PublishPacketHistory::new();
        let mut seq = 65000u16;
        for i in 0..2000 {
            save(&mut history, seq, i * 1000);
            seq = seq.wrapping_add(1);
        }
        assert_eq!(history.packet_count(), 2000);
        assert!(history.get(65000).is_some());
        assert!(history.get(100).is_some());
    }

    #[test]
    fn test_gaps_are_zeroed() {
        let mut history = PublishPacketHistory::new();
        save(&mut history, 10, 1000);
        save(&mut history, 13, 4000);
        // Skipped slots exist but carry no sent time
        assert_eq!(history.packet_count(), 4);
        assert_eq!(history.get(11).unwrap().sent_time_micros, 0);
        assert_eq!(history.get(13).unwrap().sent_time_micros, 4000);
    }

    fn feed_received(history: &mut PublishPacketHistory, seq: u16, received: i64) {
        let ptr = history.get_mut(seq).unwrap();
        ptr.reported_status = STATUS_RECEIVED_SMALL_DELTA;
        ptr.received_time_micros = received;
        ptr.received_time_present = true;
    }

    #[test]
    fn test_packet_loss_percent() {
        let mut history = PublishPacketHistory::new();
        // 40 packets, every fourth lost
        for i in 0..40u16 {
            save(&mut history, i, i as i64 * 33_000);
        }
        for i in 0..40u16 {
            if i % 4 != 0 {
                feed_received(&mut history, i, i as i64 * 33_000 + 5_000);
            }
        }
        history.update(40 * 33_000);
        assert!((history.instant_packet_loss_percent() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_actual_bandwidth_measurement() {
        let mut history = PublishPacketHistory::new();
        // 60 packets of 1200 bytes payload, 25 ms apart: 384 kbit/s
        for i in 0..60u16 {
            save(&mut history, i, i as i64 * 25_000);
        }
        for i in 0..60u16 {
            feed_received(&mut history, i, i as i64 * 25_000 + 2_000);
        }
        history.update(60 * 25_000);

        let mut stats = PublishConnectionStats::default();
        history.update_stats(&mut stats);
        let kbits = stats.bandwidth_actual_kbit_per_second;
        assert!(kbits > 0.0);
        // 1200 bytes / 25 ms = 384000 bit/s = 375 kbit/s
        assert!((kbits - 375.0).abs() < 40.0, "got {kbits}");
        // Without loss or probing, suggested tracks actual
        assert_eq!(
            stats.bandwidth_suggested_kbit_per_second,
            stats.bandwidth_actual_kbit_per_second
        );
    }

    #[test]
    fn test_trendline_overuse_needs_persistence() {
        let mut history = PublishPacketHistory::new();
        let mut now = 0i64;

        // Repeatedly feed batches whose inter-arrival delay grows:
        // sent every 20 ms, received drifting 5 ms extra per packet.
        let mut seq = 0u16;
        for round in 0..12 {
            for _ in 0..20 {
                save(&mut history, seq, seq as i64 * 20_000);
                seq = seq.wrapping_add(1);
            }
            for s in (seq - 20)..seq {
                let drift = s as i64 * 5_000;
                feed_received(&mut history, s, s as i64 * 20_000 + drift);
            }
            now = (round + 1) * 400_000;
            history.update(now);
        }

        // Instant estimate flips quickly; smoothed only after 2 s and 10
        // samples of sustained overuse.
        assert!(history.should_stop_probing());
        assert_eq!(history.smoothed_trendline(), TrendlineEstimate::Overuse);
    }

    #[test]
    fn test_pacing_spread_defaults_without_data() {
        let history = PublishPacketHistory::new();
        assert_eq!(
            history.pacing_spread_millis(10_000, 1.0, Duration::from_millis(15)),
            Duration::from_millis(15)
        );
    }

    #[test]
    fn test_pacing_spread_clamped() {
        let mut history = PublishPacketHistory::new();
        for i in 0..60u16 {
            save(&mut history, i, i as i64 * 25_000);
        }
        for i in 0..60u16 {
            feed_received(&mut history, i, i as i64 * 25_000 + 2_000);
        }
        history.update(60 * 25_000);

        // A tiny frame paces at the lower clamp: 16 * 0.8 = 12.8 -> 12ms
        let spread = history.pacing_spread_millis(100, 1.0, Duration::from_millis(15));
        assert_eq!(spread, Duration::from_millis(12));

        // A huge frame paces at the upper clamp: 66.6 * 0.8 -> 53ms
        let spread = history.pacing_spread_millis(10_000_000, 1.0, Duration::from_millis(15));
        assert_eq!(spread, Duration::from_millis(53));
    }
}
