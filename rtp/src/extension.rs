use crate::header::Header;

// Header extension URIs this stack emits.
pub const EXT_SDES_MID: &str = "urn:ietf:params:rtp-hdrext:sdes:mid";
pub const EXT_SDES_RTP_STREAM_ID: &str = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id";
pub const EXT_SDES_REPAIRED_RTP_STREAM_ID: &str =
    "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id";
pub const EXT_GOOGLE_VLA: &str =
    "http://www.webrtc.org/experiments/rtp-hdrext/video-layers-allocation00";
pub const EXT_GOOGLE_TWCC: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";

/// An ordered `(id, uri)` map from one SDP media section. Send side looks
/// up by URI to learn which id to write; receive side looks up by id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtensionMap {
    entries: Vec<(u8, String)>,
}

impl ExtensionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: u8, uri: &str) {
        if id >= 1 && !self.entries.iter().any(|(eid, _)| *eid == id) {
            self.entries.push((id, uri.to_owned()));
        }
    }

    pub fn find_by_uri(&self, uri: &str) -> Option<u8> {
        self.entries
            .iter()
            .find(|(_, euri)| euri == uri)
            .map(|(id, _)| *id)
    }

    pub fn find_by_id(&self, id: u8) -> Option<&str> {
        self.entries
            .iter()
            .find(|(eid, _)| *eid == id)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A simulcast layer as negotiated in the offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulcastLayer {
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub frames_per_second: u8,
    pub kilobits_per_second: u32,
}

fn write_leb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Encodes the Google Video Layers Allocation extension value for the
/// stream with index `rid_index` among `layers`.
///
/// https://webrtc.googlesource.com/src/+/refs/heads/main/docs/native-code/rtp-hdrext/video-layers-allocation00
pub fn build_google_vla(rid_index: u8, layers: &[SimulcastLayer]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + layers.len() * 6);

    out.push((rid_index << 6) | (((layers.len() as u8) - 1) << 4) | 0x01);
    out.push(0);

    for layer in layers {
        write_leb128(&mut out, layer.kilobits_per_second);
    }

    for layer in layers {
        out.extend_from_slice(&(layer.width - 1).to_be_bytes());
        out.extend_from_slice(&(layer.height - 1).to_be_bytes());
        out.push(layer.frames_per_second);
    }

    out
}

/// Reads a big-endian u16 extension value (the TWCC sequence) from a header.
pub fn find_u16(header: &Header, id: u8) -> Option<u16> {
    let payload = header.get_extension(id)?;
    if payload.len() != 2 {
        return None;
    }
    Some(u16::from_be_bytes([payload[0], payload[1]]))
}

/// Writes or replaces a big-endian u16 extension value in a header.
pub fn set_u16(header: &mut Header, id: u8, value: u16) -> crate::error::Result<()> {
    header.set_extension(id, &value.to_be_bytes())
}

#[cfg(test)]
mod extension_test {
    use super::*;

    fn layers() -> Vec<SimulcastLayer> {
        vec![
            SimulcastLayer {
                name: "low".to_owned(),
                width: 320,
                height: 180,
                frames_per_second: 15,
                kilobits_per_second: 150,
            },
            SimulcastLayer {
                name: "high".to_owned(),
                width: 1280,
                height: 720,
                frames_per_second: 30,
                kilobits_per_second: 1500,
            },
        ]
    }

    #[test]
    fn test_extension_map_lookup() {
        let mut map = ExtensionMap::new();
        map.add(1, EXT_SDES_MID);
        map.add(14, EXT_GOOGLE_TWCC);
        // Duplicate id is ignored
        map.add(14, EXT_GOOGLE_VLA);

        assert_eq!(map.find_by_uri(EXT_GOOGLE_TWCC), Some(14));
        assert_eq!(map.find_by_id(1), Some(EXT_SDES_MID));
        assert_eq!(map.find_by_id(14), Some(EXT_GOOGLE_TWCC));
        assert_eq!(map.find_by_uri(EXT_SDES_RTP_STREAM_ID), None);
    }

    #[test]
    fn test_google_vla_layout() {
        let vla = build_google_vla(1, &layers());

        // rid index 1, 2 layers, one active stream bit
        assert_eq!(vla[0], (1 << 6) | (1 << 4) | 0x01);
        assert_eq!(vla[1], 0);
        // 150 = LEB128 [0x96, 0x01], 1500 = [0xDC, 0x0B]
        assert_eq!(&vla[2..6], &[0x96, 0x01, 0xDC, 0x0B]);
        // 320-1, 180-1, 15
        assert_eq!(&vla[6..11], &[0x01, 0x3F, 0x00, 0xB3, 15]);
        // 1280-1, 720-1, 30
        assert_eq!(&vla[11..16], &[0x04, 0xFF, 0x02, 0xCF, 30]);
    }

    #[test]
    fn test_u16_extension_rewrite() {
        let mut header = Header::default();
        set_u16(&mut header, 14, 0).unwrap();
        assert_eq!(find_u16(&header, 14), Some(0));

        // The placeholder is replaced in place, size unchanged
        let before = header.marshal_size();
        set_u16(&mut header, 14, 0xABCD).unwrap();
        assert_eq!(find_u16(&header, 14), Some(0xABCD));
        assert_eq!(header.marshal_size(), before);
    }
}
