use bytes::Bytes;

use crate::error::Result;

/// Position of one RTP payload within a codec frame, used by the jitter
/// buffer to find frame boundaries when reassembling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketKind {
    #[default]
    Standalone,
    Start,
    Middle,
    End,
}

/// Payloader fragments a codec frame into RTP payloads no larger than the
/// given MTU budget.
pub trait Payloader: Send {
    fn payload(&mut self, mtu: usize, frame: &Bytes) -> Result<Vec<Bytes>>;

    /// Hands codec-specific data (e.g. SPS/PPS) to the payloader ahead of
    /// frame data.
    fn set_codec_specific_data(&mut self, _csd: &[Bytes]) {}
}

/// Depacketizer extracts codec frames from RTP payloads.
pub trait Depacketizer: Send {
    fn depacketize(&mut self, payload: &Bytes) -> Result<Bytes>;

    /// Classifies a payload for reassembly ordering.
    fn packet_kind(&self, payload: &Bytes) -> PacketKind;
}
