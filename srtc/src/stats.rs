/// Aggregate publish-side statistics, delivered to the application every
/// five seconds. Values that are not (yet) known are -1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishConnectionStats {
    pub packet_count: u32,
    pub byte_count: u64,
    pub packets_lost_percent: f32,
    pub rtt_ms: f32,
    pub bandwidth_actual_kbit_per_second: f32,
    pub bandwidth_suggested_kbit_per_second: f32,
}

impl Default for PublishConnectionStats {
    fn default() -> Self {
        PublishConnectionStats {
            packet_count: 0,
            byte_count: 0,
            packets_lost_percent: -1.0,
            rtt_ms: -1.0,
            bandwidth_actual_kbit_per_second: -1.0,
            bandwidth_suggested_kbit_per_second: -1.0,
        }
    }
}
