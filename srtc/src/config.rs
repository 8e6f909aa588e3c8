use rtp::extension::SimulcastLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Publish,
    Subscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Opus,
}

impl Codec {
    pub fn clock_rate(&self) -> u32 {
        match self {
            Codec::H264 => 90_000,
            Codec::Opus => 48_000,
        }
    }
}

/// Options carried by the offer.
#[derive(Debug, Clone, Default)]
pub struct OfferConfig {
    /// SDES cname, carried in SR/SDES.
    pub cname: String,
    /// Advertise an RTX payload type (primary + 1) and allocate RTX SSRCs.
    pub enable_rtx: bool,
    /// Offer the TWCC extension and run bandwidth estimation.
    pub enable_bwe: bool,
    /// Debug builds only: drop 5 % of video packets in the pacer to
    /// exercise the NACK path.
    pub debug_drop_packets: bool,
}

#[derive(Debug, Clone)]
pub struct PubVideoCodec {
    pub codec: Codec,
    /// H.264 profile-level-id as negotiated in SDP.
    pub profile_level_id: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PubVideoConfig {
    pub codec_list: Vec<PubVideoCodec>,
    pub simulcast_layer_list: Vec<SimulcastLayer>,
}

#[derive(Debug, Clone)]
pub struct PubAudioCodec {
    pub codec: Codec,
    pub minptime: u32,
    pub stereo: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PubAudioConfig {
    pub codec_list: Vec<PubAudioCodec>,
}
