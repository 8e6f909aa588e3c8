use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::certificate::Certificate;
use crate::config::{Direction, OfferConfig, PubAudioConfig, PubVideoConfig};
use crate::error::Result;

const ICE_UFRAG_LEN: usize = 8;
const ICE_PASSWORD_LEN: usize = 24;

/// SSRCs allocated to one simulcast layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerSsrc {
    pub ssrc: u32,
    pub rtx_ssrc: u32,
}

/// The local side of the session: ICE credentials, SSRC assignments and
/// the self-signed certificate. The SDP text itself is produced by an
/// external generator from this model.
pub struct SdpOffer {
    direction: Direction,
    config: OfferConfig,
    video_config: Option<PubVideoConfig>,
    audio_config: Option<PubAudioConfig>,

    ice_ufrag: String,
    ice_password: String,
    certificate: Certificate,

    video_ssrc: u32,
    rtx_video_ssrc: u32,
    audio_ssrc: u32,
    rtx_audio_ssrc: u32,
    layer_ssrc: Vec<(String, LayerSsrc)>,
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_ssrc() -> u32 {
    // Avoid zero, it reads as unset
    rand::thread_rng().gen_range(1..u32::MAX)
}

impl SdpOffer {
    pub fn new_publish(
        config: OfferConfig,
        video_config: Option<PubVideoConfig>,
        audio_config: Option<PubAudioConfig>,
    ) -> Result<Self> {
        let layer_ssrc = video_config
            .as_ref()
            .map(|vc| {
                vc.simulcast_layer_list
                    .iter()
                    .map(|layer| {
                        (
                            layer.name.clone(),
                            LayerSsrc {
                                ssrc: random_ssrc(),
                                rtx_ssrc: random_ssrc(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SdpOffer {
            direction: Direction::Publish,
            config,
            video_config,
            audio_config,
            ice_ufrag: random_string(ICE_UFRAG_LEN),
            ice_password: random_string(ICE_PASSWORD_LEN),
            certificate: Certificate::generate()?,
            video_ssrc: random_ssrc(),
            rtx_video_ssrc: random_ssrc(),
            audio_ssrc: random_ssrc(),
            rtx_audio_ssrc: random_ssrc(),
            layer_ssrc,
        })
    }

    pub fn new_subscribe(config: OfferConfig) -> Result<Self> {
        Ok(SdpOffer {
            direction: Direction::Subscribe,
            config,
            video_config: None,
            audio_config: None,
            ice_ufrag: random_string(ICE_UFRAG_LEN),
            ice_password: random_string(ICE_PASSWORD_LEN),
            certificate: Certificate::generate()?,
            video_ssrc: random_ssrc(),
            rtx_video_ssrc: random_ssrc(),
            audio_ssrc: random_ssrc(),
            rtx_audio_ssrc: random_ssrc(),
            layer_ssrc: Vec::new(),
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn config(&self) -> &OfferConfig {
        &self.config
    }

    pub fn video_config(&self) -> Option<&PubVideoConfig> {
        self.video_config.as_ref()
    }

    pub fn audio_config(&self) -> Option<&PubAudioConfig> {
        self.audio_config.as_ref()
    }

    pub fn ice_ufrag(&self) -> &str {
        &self.ice_ufrag
    }

    pub fn ice_password(&self) -> &str {
        &self.ice_password
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn video_ssrc(&self) -> u32 {
        self.video_ssrc
    }

    pub fn rtx_video_ssrc(&self) -> u32 {
        self.rtx_video_ssrc
    }

    pub fn audio_ssrc(&self) -> u32 {
        self.audio_ssrc
    }

    pub fn rtx_audio_ssrc(&self) -> u32 {
        self.rtx_audio_ssrc
    }

    /// SSRC pair for a named simulcast layer.
    pub fn simulcast_ssrc(&self, name: &str) -> Option<LayerSsrc> {
        self.layer_ssrc
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    #[cfg(test)]
    pub(crate) fn set_ice_credentials_for_test(&mut self, ufrag: &str, password: &str) {
        self.ice_ufrag = ufrag.to_owned();
        self.ice_password = password.to_owned();
    }
}
