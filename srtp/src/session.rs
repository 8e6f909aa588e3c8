use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use util::replay_detector::{ReplayDetector, SlidingWindowDetector, WrappedSlidingWindowDetector};

use crate::cipher::cipher_aead_aes_gcm::CipherAeadAesGcm;
use crate::cipher::cipher_aes_cm_hmac_sha1::CipherAesCmHmacSha1;
use crate::cipher::Cipher;
use crate::error::{Error, Result};
use crate::protection_profile::ProtectionProfile;

const REPLAY_WINDOW: u64 = 2048;

// Media channels are keyed by (SSRC, PT); the control channel by (SSRC, 0).
type ChannelKey = (u32, u8);

#[derive(Default)]
struct Channel {
    replay: Option<Box<dyn ReplayDetector + Send>>,
    rollover_count: u32,
    last_sequence: Option<u16>,
}

fn make_cipher(
    profile: ProtectionProfile,
    master_key: &[u8],
    master_salt: &[u8],
) -> Result<Box<dyn Cipher + Send>> {
    if master_key.len() != profile.key_len() {
        return Err(Error::SrtpMasterKeyLength(
            profile.key_len(),
            master_key.len(),
        ));
    }
    if master_salt.len() != profile.salt_len() {
        return Err(Error::SrtpSaltLength(profile.salt_len(), master_salt.len()));
    }

    Ok(match profile {
        ProtectionProfile::AeadAes128Gcm | ProtectionProfile::AeadAes256Gcm => {
            Box::new(CipherAeadAesGcm::new(profile, master_key, master_salt)?)
        }
        ProtectionProfile::Aes128CmHmacSha1_80 | ProtectionProfile::Aes128CmHmacSha1_32 => {
            Box::new(CipherAesCmHmacSha1::new(profile, master_key, master_salt)?)
        }
    })
}

/// A two-directional SRTP session: one cipher per direction plus the
/// per-channel receive state (replay window, rollover counter, last seq).
pub struct Session {
    profile: ProtectionProfile,
    send: Box<dyn Cipher + Send>,
    receive: Box<dyn Cipher + Send>,
    in_channels: HashMap<ChannelKey, Channel>,
}

impl Session {
    pub fn new(
        profile: ProtectionProfile,
        send_master_key: &[u8],
        send_master_salt: &[u8],
        receive_master_key: &[u8],
        receive_master_salt: &[u8],
    ) -> Result<Self> {
        Ok(Session {
            profile,
            send: make_cipher(profile, send_master_key, send_master_salt)?,
            receive: make_cipher(profile, receive_master_key, receive_master_salt)?,
            in_channels: HashMap::new(),
        })
    }

    /// Builds a session from DTLS exported keying material (label
    /// `EXTRACTOR-dtls_srtp`), laid out as client key, server key, client
    /// salt, server salt. With `setup:active` in the answer the local side
    /// acts as the DTLS server and sends with the server keys.
    pub fn from_keying_material(
        profile: ProtectionProfile,
        material: &[u8],
        is_setup_active: bool,
    ) -> Result<Self> {
        let key_len = profile.key_len();
        let salt_len = profile.salt_len();
        if material.len() != profile.keying_material_len() {
            return Err(Error::KeyingMaterialLength(
                profile.keying_material_len(),
                material.len(),
            ));
        }

        let client_key = &material[..key_len];
        let server_key = &material[key_len..2 * key_len];
        let client_salt = &material[2 * key_len..2 * key_len + salt_len];
        let server_salt = &material[2 * key_len + salt_len..];

        if is_setup_active {
            Session::new(profile, server_key, server_salt, client_key, client_salt)
        } else {
            Session::new(profile, client_key, client_salt, server_key, server_salt)
        }
    }

    pub fn profile(&self) -> ProtectionProfile {
        self.profile
    }

    /// Bytes that protection will add to an RTP packet.
    pub fn media_protection_overhead(&self) -> usize {
        self.profile.rtp_auth_tag_len()
    }

    /// Clears all receive channel state. Called on ICE restart so replay
    /// windows start fresh.
    pub fn reset(&mut self) {
        self.in_channels.clear();
    }

    /// Protects an outgoing RTP packet. The rollover counter comes from
    /// the sender's sequence allocator.
    pub fn protect_rtp(&mut self, packet: &[u8], rollover_count: u32) -> Result<Bytes> {
        if packet.len() < 12 {
            return Err(Error::ErrTooShortRtp);
        }
        let mut reader = packet;
        let header = rtp::header::Header::unmarshal(&mut reader)?;
        self.send.encrypt_rtp(packet, &header, rollover_count)
    }

    /// Protects an outgoing RTCP packet with the caller-supplied per-SSRC
    /// index.
    pub fn protect_rtcp(&mut self, packet: &[u8], sequence: u32) -> Result<Bytes> {
        if packet.len() < 8 {
            return Err(Error::ErrTooShortRtcp);
        }
        let ssrc = BigEndian::read_u32(&packet[4..8]);
        self.send.encrypt_rtcp(packet, sequence, ssrc)
    }

    /// Unprotects an incoming RTP packet, maintaining the channel's replay
    /// window and rollover counter.
    pub fn unprotect_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        if packet.len() < 12 {
            return Err(Error::ErrTooShortRtp);
        }
        let mut reader = packet;
        let header = rtp::header::Header::unmarshal(&mut reader)?;

        let key: ChannelKey = (header.ssrc, header.payload_type);
        let channel = self
            .in_channels
            .entry(key)
            .or_insert_with(Channel::default);
        let replay = channel.replay.get_or_insert_with(|| {
            Box::new(WrappedSlidingWindowDetector::new(
                REPLAY_WINDOW,
                u16::MAX as u64,
            )) as Box<dyn ReplayDetector + Send>
        });

        if !replay.check(header.sequence_number as u64) {
            return Err(Error::SrtpSsrcDuplicated(
                header.ssrc,
                header.sequence_number,
            ));
        }

        // Because of jitter we may cross the rollover back and forth;
        // count it once and decrypt stale packets with the previous ROC.
        let seq = header.sequence_number;
        let mut roc = channel.rollover_count;
        match channel.last_sequence {
            None => channel.last_sequence = Some(seq),
            Some(last) if last <= 0x1000 && seq >= 0xF000 => {
                roc = roc.saturating_sub(1);
            }
            Some(last) => {
                if last >= 0xF000 && seq <= 0x1000 {
                    channel.rollover_count += 1;
                    roc += 1;
                }
                channel.last_sequence = Some(seq);
            }
        }

        let out = self.receive.decrypt_rtp(packet, &header, roc)?;

        if let Some(replay) = &mut self
            .in_channels
            .get_mut(&key)
            .and_then(|c| c.replay.as_mut())
        {
            replay.accept();
        }
        Ok(out)
    }

    /// Unprotects an incoming RTCP packet, checking its index against the
    /// control channel's replay window.
    pub fn unprotect_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        if packet.len() < 12 {
            return Err(Error::ErrTooShortRtcp);
        }

        let ssrc = BigEndian::read_u32(&packet[4..8]);
        let index = self.receive.get_rtcp_index(packet);

        let key: ChannelKey = (ssrc, 0);
        let channel = self
            .in_channels
            .entry(key)
            .or_insert_with(Channel::default);
        let replay = channel.replay.get_or_insert_with(|| {
            Box::new(SlidingWindowDetector::new(REPLAY_WINDOW, u32::MAX as u64))
                as Box<dyn ReplayDetector + Send>
        });

        if !replay.check(index as u64) {
            return Err(Error::SrtcpSsrcDuplicated(ssrc, index));
        }

        let out = self.receive.decrypt_rtcp(packet, index, ssrc)?;

        if let Some(replay) = &mut self
            .in_channels
            .get_mut(&key)
            .and_then(|c| c.replay.as_mut())
        {
            replay.accept();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod session_test {
    use super::*;
    use bytes::Bytes;
    use rtp::header::Header;
    use rtp::packet::Packet;

    const PROFILES: [ProtectionProfile; 4] = [
        ProtectionProfile::AeadAes128Gcm,
        ProtectionProfile::AeadAes256Gcm,
        ProtectionProfile::Aes128CmHmacSha1_80,
        ProtectionProfile::Aes128CmHmacSha1_32,
    ];

    fn test_keys(profile: ProtectionProfile) -> (Vec<u8>, Vec<u8>) {
        let key: Vec<u8> = (0..profile.key_len() as u8).map(|i| i + 1).collect();
        let salt: Vec<u8> = (0..profile.salt_len() as u8).map(|i| i + 31).collect();
        (key, salt)
    }

    fn symmetric_session(profile: ProtectionProfile) -> Session {
        let (key, salt) = test_keys(profile);
        Session::new(profile, &key, &salt, &key, &salt).unwrap()
    }

    fn media_packet(seq: u16, marker: bool) -> Bytes {
        let packet = Packet {
            header: Header {
                marker,
                payload_type: 96,
                sequence_number: seq,
                timestamp: 90_000 + seq as u32,
                ssrc: 0x11112222,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF, 0x42]),
            padding_size: 0,
        };
        packet.marshal().unwrap()
    }

    #[test]
    fn test_rtp_roundtrip_all_profiles() {
        for profile in PROFILES {
            let mut sender = symmetric_session(profile);
            let mut receiver = symmetric_session(profile);

            let plain = media_packet(1000, true);
            let protected = sender.protect_rtp(&plain, 0).unwrap();
            assert_eq!(
                protected.len(),
                plain.len() + profile.rtp_auth_tag_len(),
                "{profile:?}"
            );

            let unprotected = receiver.unprotect_rtp(&protected).unwrap();
            assert_eq!(unprotected, plain, "{profile:?}");
        }
    }

    #[test]
    fn test_rtp_tampered_rejected() {
        for profile in PROFILES {
            let mut sender = symmetric_session(profile);
            let mut receiver = symmetric_session(profile);

            let plain = media_packet(7, false);
            let protected = sender.protect_rtp(&plain, 0).unwrap();

            let mut tampered = protected.to_vec();
            let len = tampered.len();
            tampered[len - 1] ^= 0x01;
            assert!(receiver.unprotect_rtp(&tampered).is_err(), "{profile:?}");
        }
    }

    #[test]
    fn test_rtp_wrong_key_rejected() {
        for profile in PROFILES {
            let mut sender = symmetric_session(profile);
            let (key, salt) = test_keys(profile);
            let mut wrong_key = key.clone();
            wrong_key[0] ^= 0xFF;
            let mut receiver =
                Session::new(profile, &key, &salt, &wrong_key, &salt).unwrap();

            let protected = sender.protect_rtp(&media_packet(1, false), 0).unwrap();
            assert!(receiver.unprotect_rtp(&protected).is_err(), "{profile:?}");
        }
    }

    #[test]
    fn test_rtp_replay_rejected() {
        let mut sender = symmetric_session(ProtectionProfile::AeadAes128Gcm);
        let mut receiver = symmetric_session(ProtectionProfile::AeadAes128Gcm);

        let protected = sender.protect_rtp(&media_packet(55, false), 0).unwrap();
        receiver.unprotect_rtp(&protected).unwrap();
        assert_eq!(
            receiver.unprotect_rtp(&protected),
            Err(Error::SrtpSsrcDuplicated(0x11112222, 55))
        );
    }

    #[test]
    fn test_rtcp_roundtrip_all_profiles() {
        // A minimal receiver report for SSRC 7
        let mut plain = vec![0x80, 201, 0, 1];
        plain.extend_from_slice(&7u32.to_be_bytes());

        for profile in PROFILES {
            let mut sender = symmetric_session(profile);
            let mut receiver = symmetric_session(profile);

            let protected = sender.protect_rtcp(&plain, 1).unwrap();
            let unprotected = receiver.unprotect_rtcp(&protected).unwrap();
            assert_eq!(&unprotected[..], &plain[..], "{profile:?}");

            // Replaying the same index is rejected
            assert!(receiver.unprotect_rtcp(&protected).is_err());
        }
    }

    #[test]
    fn test_rollover_with_stale_packet() {
        let mut sender = symmetric_session(ProtectionProfile::AeadAes128Gcm);
        let mut receiver = symmetric_session(ProtectionProfile::AeadAes128Gcm);

        // Approach the wrap, cross it, then deliver one stale pre-wrap
        // packet after the wrap was observed.
        for seq in [0xFFFD_u16, 0xFFFE, 0xFFFF] {
            let protected = sender.protect_rtp(&media_packet(seq, false), 0).unwrap();
            receiver.unprotect_rtp(&protected).unwrap();
        }
        for seq in [0u16, 1] {
            let protected = sender.protect_rtp(&media_packet(seq, false), 1).unwrap();
            receiver.unprotect_rtp(&protected).unwrap();
        }

        // Stale packet from before the wrap still decrypts (ROC - 1)
        let protected = sender
            .protect_rtp(&media_packet(0xFFFA, false), 0)
            .unwrap();
        let plain = receiver.unprotect_rtp(&protected).unwrap();
        assert_eq!(plain, media_packet(0xFFFA, false));

        // And the current cycle continues with the incremented ROC
        let protected = sender.protect_rtp(&media_packet(2, false), 1).unwrap();
        receiver.unprotect_rtp(&protected).unwrap();
    }

    #[test]
    fn test_reset_clears_replay_state() {
        let mut sender = symmetric_session(ProtectionProfile::Aes128CmHmacSha1_80);
        let mut receiver = symmetric_session(ProtectionProfile::Aes128CmHmacSha1_80);

        let protected = sender.protect_rtp(&media_packet(9, false), 0).unwrap();
        receiver.unprotect_rtp(&protected).unwrap();
        assert!(receiver.unprotect_rtp(&protected).is_err());

        receiver.reset();
        receiver.unprotect_rtp(&protected).unwrap();
    }

    #[test]
    fn test_keying_material_role_split() {
        let profile = ProtectionProfile::AeadAes128Gcm;
        let material: Vec<u8> = (0..profile.keying_material_len() as u8).collect();

        // One side is the DTLS server (setup:active answer), the other the
        // client; their send/receive keys must mirror each other.
        let mut server = Session::from_keying_material(profile, &material, true).unwrap();
        let mut client = Session::from_keying_material(profile, &material, false).unwrap();

        let plain = media_packet(100, false);
        let protected = server.protect_rtp(&plain, 0).unwrap();
        assert_eq!(client.unprotect_rtp(&protected).unwrap(), plain);

        let protected = client.protect_rtp(&plain, 0).unwrap();
        assert_eq!(server.unprotect_rtp(&protected).unwrap(), plain);
    }
}
