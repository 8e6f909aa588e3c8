use bytes::Bytes;

use crate::error::{Error, Result};
use crate::packetizer::{Depacketizer, PacketKind, Payloader};

/// OpusPayloader payloads Opus packets: one frame per packet, never split.
#[derive(Default, Debug, Clone)]
pub struct OpusPayloader;

impl Payloader for OpusPayloader {
    fn payload(&mut self, mtu: usize, frame: &Bytes) -> Result<Vec<Bytes>> {
        if frame.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }
        Ok(vec![frame.clone()])
    }
}

/// OpusPacket passes Opus payloads through unchanged.
#[derive(PartialEq, Eq, Debug, Default, Clone)]
pub struct OpusPacket;

impl Depacketizer for OpusPacket {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        if packet.is_empty() {
            return Err(Error::ErrShortPacket);
        }
        Ok(packet.clone())
    }

    fn packet_kind(&self, _payload: &Bytes) -> PacketKind {
        PacketKind::Standalone
    }
}

#[cfg(test)]
mod opus_test {
    use super::*;

    #[test]
    fn test_payload() {
        let mut payloader = OpusPayloader;
        let out = payloader
            .payload(1200, &Bytes::from_static(&[1, 2, 3]))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &[1, 2, 3]);

        assert!(payloader.payload(1200, &Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_depacketize() {
        let mut d = OpusPacket;
        assert_eq!(
            d.depacketize(&Bytes::from_static(&[9])).unwrap(),
            Bytes::from_static(&[9])
        );
        assert!(d.depacketize(&Bytes::new()).is_err());
    }
}
