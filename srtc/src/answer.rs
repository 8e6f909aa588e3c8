use std::net::SocketAddr;
use std::sync::Arc;

use rtp::extension::ExtensionMap;

use crate::certificate::CertificateHash;
use crate::error::{Error, Result};
use crate::track::Track;

/// A remote host candidate from the answer (UDP host candidates only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Host {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupRole {
    Active,
    Passive,
}

/// The remote side of the session, filled in by the external SDP parser.
/// Validated once on construction; immutable afterwards.
pub struct SdpAnswer {
    ice_ufrag: String,
    ice_password: String,
    setup_role: SetupRole,
    certificate_hash: CertificateHash,
    host_list: Vec<Host>,

    video_extension_map: ExtensionMap,
    audio_extension_map: ExtensionMap,

    video_single_track: Option<Arc<Track>>,
    video_simulcast_track_list: Vec<Arc<Track>>,
    audio_track: Option<Arc<Track>>,
}

/// Plain data handed over by the SDP parser.
pub struct SdpAnswerParams {
    pub ice_ufrag: String,
    pub ice_password: String,
    pub setup_role: SetupRole,
    pub certificate_hash: CertificateHash,
    pub host_list: Vec<Host>,
    pub video_extension_map: ExtensionMap,
    pub audio_extension_map: ExtensionMap,
    pub video_single_track: Option<Arc<Track>>,
    pub video_simulcast_track_list: Vec<Arc<Track>>,
    pub audio_track: Option<Arc<Track>>,
}

impl SdpAnswer {
    pub fn new(params: SdpAnswerParams) -> Result<Self> {
        if params.ice_ufrag.is_empty() || params.ice_password.is_empty() {
            return Err(Error::invalid_data("answer is missing ICE credentials"));
        }
        if params.host_list.is_empty() {
            return Err(Error::invalid_data("answer carries no host candidates"));
        }
        if params.certificate_hash.bin.is_empty() {
            return Err(Error::invalid_data(
                "answer is missing a certificate fingerprint",
            ));
        }
        if params.video_single_track.is_none()
            && params.video_simulcast_track_list.is_empty()
            && params.audio_track.is_none()
        {
            return Err(Error::invalid_data("answer resolved no tracks"));
        }

        Ok(SdpAnswer {
            ice_ufrag: params.ice_ufrag,
            ice_password: params.ice_password,
            setup_role: params.setup_role,
            certificate_hash: params.certificate_hash,
            host_list: params.host_list,
            video_extension_map: params.video_extension_map,
            audio_extension_map: params.audio_extension_map,
            video_single_track: params.video_single_track,
            video_simulcast_track_list: params.video_simulcast_track_list,
            audio_track: params.audio_track,
        })
    }

    pub fn ice_ufrag(&self) -> &str {
        &self.ice_ufrag
    }

    pub fn ice_password(&self) -> &str {
        &self.ice_password
    }

    /// True when the answer declared `a=setup:active`, making the local
    /// side the DTLS server.
    pub fn is_setup_active(&self) -> bool {
        self.setup_role == SetupRole::Active
    }

    pub fn certificate_hash(&self) -> &CertificateHash {
        &self.certificate_hash
    }

    pub fn host_list(&self) -> &[Host] {
        &self.host_list
    }

    pub fn has_video_media(&self) -> bool {
        self.video_single_track.is_some() || !self.video_simulcast_track_list.is_empty()
    }

    pub fn has_audio_media(&self) -> bool {
        self.audio_track.is_some()
    }

    pub fn video_extension_map(&self) -> &ExtensionMap {
        &self.video_extension_map
    }

    pub fn audio_extension_map(&self) -> &ExtensionMap {
        &self.audio_extension_map
    }

    pub fn is_video_simulcast(&self) -> bool {
        !self.video_simulcast_track_list.is_empty()
    }

    pub fn video_single_track(&self) -> Option<Arc<Track>> {
        self.video_single_track.clone()
    }

    pub fn video_simulcast_track_list(&self) -> &[Arc<Track>] {
        &self.video_simulcast_track_list
    }

    pub fn audio_track(&self) -> Option<Arc<Track>> {
        self.audio_track.clone()
    }

    /// Every track of the session, in media order.
    pub fn track_list(&self) -> Vec<Arc<Track>> {
        let mut list = Vec::new();
        if let Some(track) = &self.video_single_track {
            list.push(track.clone());
        }
        for track in &self.video_simulcast_track_list {
            list.push(track.clone());
        }
        if let Some(track) = &self.audio_track {
            list.push(track.clone());
        }
        list
    }
}

#[cfg(test)]
mod answer_test {
    use super::*;
    use crate::config::{Codec, Direction, MediaType};
    use crate::track::TrackDescriptor;

    pub(crate) fn test_track(ssrc: u32, media_type: MediaType) -> Arc<Track> {
        Arc::new(Track::new(TrackDescriptor {
            direction: Direction::Publish,
            media_type,
            media_id: "0".to_owned(),
            ssrc,
            payload_type: if media_type == MediaType::Video { 96 } else { 111 },
            rtx_ssrc: None,
            rtx_payload_type: None,
            codec: if media_type == MediaType::Video {
                Codec::H264
            } else {
                Codec::Opus
            },
            profile_level_id: None,
            minptime: None,
            stereo: false,
            simulcast: None,
            clock_rate: 90_000,
            has_nack: false,
            has_pli: false,
        }))
    }

    fn params() -> SdpAnswerParams {
        SdpAnswerParams {
            ice_ufrag: "XYZ67890".to_owned(),
            ice_password: "pwdpwdpwdpwdpwdpwdpwdpwd".to_owned(),
            setup_role: SetupRole::Active,
            certificate_hash: CertificateHash::sha256(vec![1u8; 32]),
            host_list: vec![Host {
                addr: "192.0.2.10:30000".parse().unwrap(),
            }],
            video_extension_map: ExtensionMap::new(),
            audio_extension_map: ExtensionMap::new(),
            video_single_track: Some(test_track(0x11112222, MediaType::Video)),
            video_simulcast_track_list: vec![],
            audio_track: None,
        }
    }

    #[test]
    fn test_valid_answer() {
        let answer = SdpAnswer::new(params()).unwrap();
        assert!(answer.is_setup_active());
        assert!(answer.has_video_media());
        assert!(!answer.has_audio_media());
        assert_eq!(answer.track_list().len(), 1);
    }

    #[test]
    fn test_missing_hosts_rejected() {
        let mut p = params();
        p.host_list.clear();
        assert!(SdpAnswer::new(p).is_err());
    }

    #[test]
    fn test_missing_tracks_rejected() {
        let mut p = params();
        p.video_single_track = None;
        assert!(SdpAnswer::new(p).is_err());
    }
}
