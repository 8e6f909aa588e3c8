use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

pub const HEADER_LENGTH: usize = 12;
pub const VERSION: u8 = 2;
pub const CSRC_LENGTH: usize = 4;

pub const EXTENSION_PROFILE_ONE_BYTE: u16 = 0xBEDE;
pub const EXTENSION_PROFILE_TWO_BYTE: u16 = 0x1000;

const EXTENSION_ID_RESERVED: u8 = 0xF;

/// A single RTP header extension element.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Extension {
    pub id: u8,
    pub payload: Vec<u8>,
}

/// RTP packet header, RFC 3550 section 5.1, with RFC 8285 general header
/// extensions.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: u16,
    pub extensions: Vec<Extension>,
}

impl Header {
    pub fn marshal_size(&self) -> usize {
        let mut head_size = HEADER_LENGTH + self.csrc.len() * CSRC_LENGTH;
        if self.extension {
            let extension_payload_len = self.extension_payload_len();
            let extension_payload_size = (extension_payload_len + 3) / 4;
            head_size += 4 + extension_payload_size * 4;
        }
        head_size
    }

    fn extension_payload_len(&self) -> usize {
        let mut extension_length = 0;
        match self.extension_profile {
            EXTENSION_PROFILE_ONE_BYTE => {
                for extension in &self.extensions {
                    extension_length += 1 + extension.payload.len();
                }
            }
            EXTENSION_PROFILE_TWO_BYTE => {
                for extension in &self.extensions {
                    extension_length += 2 + extension.payload.len();
                }
            }
            _ => {
                for extension in &self.extensions {
                    extension_length += extension.payload.len();
                }
            }
        }
        extension_length
    }

    /// Sets an RTP header extension, upgrading to the two-byte form when
    /// needed. The profile is chosen on first insertion.
    pub fn set_extension(&mut self, id: u8, payload: &[u8]) -> Result<()> {
        if self.extension {
            match self.extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    if !(1..=14).contains(&id) {
                        return Err(Error::ErrRfc8285OneByteHeaderIdRange);
                    }
                    if payload.is_empty() || payload.len() > 16 {
                        return Err(Error::ErrRfc8285OneByteHeaderSize);
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    if id < 1 {
                        return Err(Error::ErrRfc8285TwoByteHeaderIdRange);
                    }
                    if payload.len() > 255 {
                        return Err(Error::ErrRfc8285TwoByteHeaderSize);
                    }
                }
                _ => {
                    if id != 0 {
                        return Err(Error::Other(
                            "header extension id must be 0 for non-RFC 8285 extensions".to_owned(),
                        ));
                    }
                }
            }

            for extension in &mut self.extensions {
                if extension.id == id {
                    extension.payload.clear();
                    extension.payload.extend_from_slice(payload);
                    return Ok(());
                }
            }
            self.extensions.push(Extension {
                id,
                payload: payload.to_vec(),
            });
            return Ok(());
        }

        self.extension = true;
        self.extension_profile = if id > 14 || payload.len() > 16 {
            EXTENSION_PROFILE_TWO_BYTE
        } else {
            EXTENSION_PROFILE_ONE_BYTE
        };
        self.extensions.push(Extension {
            id,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    pub fn get_extension(&self, id: u8) -> Option<&[u8]> {
        if !self.extension {
            return None;
        }
        self.extensions
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.payload.as_slice())
    }

    /// Removes an RTP header extension if present.
    pub fn del_extension(&mut self, id: u8) {
        self.extensions.retain(|e| e.id != id);
        if self.extensions.is_empty() {
            self.extension = false;
            self.extension_profile = 0;
        }
    }

    pub fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::ErrShortPacket);
        }

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        let padding = (b0 >> 5) & 0x1 > 0;
        let extension = (b0 >> 4) & 0x1 > 0;
        let cc = (b0 & 0xF) as usize;

        let b1 = buf.get_u8();
        let marker = b1 >> 7 > 0;
        let payload_type = b1 & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < cc * CSRC_LENGTH {
            return Err(Error::ErrShortPacket);
        }
        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        let (extension_profile, extensions) = if extension {
            if buf.remaining() < 4 {
                return Err(Error::ErrShortPacket);
            }
            let extension_profile = buf.get_u16();
            let extension_length = buf.get_u16() as usize * 4;
            if buf.remaining() < extension_length {
                return Err(Error::ErrShortPacket);
            }
            let mut payload = vec![0u8; extension_length];
            buf.copy_to_slice(&mut payload);

            let mut extensions = vec![];
            match extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    let mut curr_offset = 0;
                    while curr_offset < extension_length {
                        if payload[curr_offset] == 0x00 {
                            // padding
                            curr_offset += 1;
                            continue;
                        }

                        let extid = payload[curr_offset] >> 4;
                        let len = ((payload[curr_offset] & 0x0F) + 1) as usize;
                        curr_offset += 1;

                        if extid == EXTENSION_ID_RESERVED {
                            break;
                        }
                        if curr_offset + len > extension_length {
                            return Err(Error::ErrShortPacket);
                        }

                        extensions.push(Extension {
                            id: extid,
                            payload: payload[curr_offset..curr_offset + len].to_vec(),
                        });
                        curr_offset += len;
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    let mut curr_offset = 0;
                    while curr_offset < extension_length {
                        if payload[curr_offset] == 0x00 {
                            // padding
                            curr_offset += 1;
                            continue;
                        }

                        let extid = payload[curr_offset];
                        curr_offset += 1;
                        if curr_offset >= extension_length {
                            return Err(Error::ErrShortPacket);
                        }

                        let len = payload[curr_offset] as usize;
                        curr_offset += 1;
                        if curr_offset + len > extension_length {
                            return Err(Error::ErrShortPacket);
                        }

                        extensions.push(Extension {
                            id: extid,
                            payload: payload[curr_offset..curr_offset + len].to_vec(),
                        });
                        curr_offset += len;
                    }
                }
                _ => {
                    extensions.push(Extension {
                        id: 0,
                        payload,
                    });
                }
            }

            (extension_profile, extensions)
        } else {
            (0, vec![])
        };

        Ok(Header {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_profile,
            extensions,
        })
    }

    pub fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooSmall);
        }

        let mut writer = &mut buf[..];

        let mut b0 = VERSION << 6;
        if self.padding {
            b0 |= 1 << 5;
        }
        if self.extension {
            b0 |= 1 << 4;
        }
        b0 |= self.csrc.len() as u8;
        writer.put_u8(b0);

        let mut b1 = self.payload_type;
        if self.marker {
            b1 |= 1 << 7;
        }
        writer.put_u8(b1);

        writer.put_u16(self.sequence_number);
        writer.put_u32(self.timestamp);
        writer.put_u32(self.ssrc);

        for csrc in &self.csrc {
            writer.put_u32(*csrc);
        }

        if self.extension {
            writer.put_u16(self.extension_profile);

            let extension_payload_len = self.extension_payload_len();
            let extension_payload_size = (extension_payload_len + 3) / 4;
            writer.put_u16(extension_payload_size as u16);

            match self.extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    for extension in &self.extensions {
                        writer.put_u8((extension.id << 4) | (extension.payload.len() as u8 - 1));
                        writer.put_slice(&extension.payload);
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    for extension in &self.extensions {
                        writer.put_u8(extension.id);
                        writer.put_u8(extension.payload.len() as u8);
                        writer.put_slice(&extension.payload);
                    }
                }
                _ => {
                    for extension in &self.extensions {
                        writer.put_slice(&extension.payload);
                    }
                }
            }

            for _ in extension_payload_len..extension_payload_size * 4 {
                writer.put_u8(0);
            }
        }

        Ok(size)
    }
}

#[cfg(test)]
mod header_test {
    use super::*;

    #[test]
    fn test_basic_roundtrip() {
        let h = Header {
            marker: true,
            payload_type: 96,
            sequence_number: 1023,
            timestamp: 3653407706,
            ssrc: 0x11112222,
            ..Default::default()
        };

        let mut buf = vec![0u8; h.marshal_size()];
        let n = h.marshal_to(&mut buf).unwrap();
        assert_eq!(n, HEADER_LENGTH);

        let mut reader = &buf[..];
        let parsed = Header::unmarshal(&mut reader).unwrap();
        let mut expected = h.clone();
        expected.version = VERSION;
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_one_byte_extension_roundtrip() {
        let mut h = Header {
            payload_type: 96,
            sequence_number: 5,
            ssrc: 1,
            ..Default::default()
        };
        h.set_extension(1, b"m0").unwrap();
        h.set_extension(14, &[0xAA, 0xBB]).unwrap();
        assert_eq!(h.extension_profile, EXTENSION_PROFILE_ONE_BYTE);

        let mut buf = vec![0u8; h.marshal_size()];
        h.marshal_to(&mut buf).unwrap();

        let mut reader = &buf[..];
        let parsed = Header::unmarshal(&mut reader).unwrap();
        assert_eq!(parsed.get_extension(1).unwrap(), b"m0");
        assert_eq!(parsed.get_extension(14).unwrap(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_id_above_14_forces_two_byte_form() {
        let mut h = Header::default();
        h.set_extension(15, &[1, 2, 3]).unwrap();
        assert_eq!(h.extension_profile, EXTENSION_PROFILE_TWO_BYTE);

        let mut buf = vec![0u8; h.marshal_size()];
        h.marshal_to(&mut buf).unwrap();
        let mut reader = &buf[..];
        let parsed = Header::unmarshal(&mut reader).unwrap();
        assert_eq!(parsed.extension_profile, EXTENSION_PROFILE_TWO_BYTE);
        assert_eq!(parsed.get_extension(15).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_one_byte_form_rejects_id_15() {
        let mut h = Header::default();
        h.set_extension(1, &[0]).unwrap();
        assert_eq!(
            h.set_extension(15, &[0]),
            Err(Error::ErrRfc8285OneByteHeaderIdRange)
        );
    }

    #[test]
    fn test_csrc_roundtrip() {
        let h = Header {
            csrc: vec![0x12345678, 0x9ABCDEF0],
            ..Default::default()
        };
        let mut buf = vec![0u8; h.marshal_size()];
        h.marshal_to(&mut buf).unwrap();
        let mut reader = &buf[..];
        let parsed = Header::unmarshal(&mut reader).unwrap();
        assert_eq!(parsed.csrc, h.csrc);
    }
}
