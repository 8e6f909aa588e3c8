use crate::error::Result;

/// The WHIP/WHEP signaling exchange: POST the offer SDP to the endpoint
/// and return the answer SDP. Implementations live outside this crate;
/// the call blocks and happens before any network I/O on the media plane.
pub trait Signaling {
    fn exchange(&self, endpoint_url: &str, offer_sdp: &str) -> Result<String>;
}
