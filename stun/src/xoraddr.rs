use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::attributes::*;
use crate::error::*;
use crate::message::*;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// XOR-MAPPED-ADDRESS attribute, RFC 5389 section 15.2.
///
/// The port is XOR'ed with the most significant 16 bits of the magic
/// cookie; the address with the magic cookie (IPv4) or the magic cookie
/// concatenated with the transaction id (IPv6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorMappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for XorMappedAddress {
    fn default() -> Self {
        XorMappedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl From<SocketAddr> for XorMappedAddress {
    fn from(addr: SocketAddr) -> Self {
        XorMappedAddress {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl Setter for XorMappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let xor_port = self.port ^ (MAGIC_COOKIE >> 16) as u16;

        let mut value = Vec::with_capacity(20);
        value.push(0);
        match self.ip {
            IpAddr::V4(ip) => {
                value.push(FAMILY_IPV4);
                value.extend_from_slice(&xor_port.to_be_bytes());
                let xored = u32::from(ip) ^ MAGIC_COOKIE;
                value.extend_from_slice(&xored.to_be_bytes());
            }
            IpAddr::V6(ip) => {
                value.push(FAMILY_IPV6);
                value.extend_from_slice(&xor_port.to_be_bytes());
                let mut xor_mask = [0u8; 16];
                xor_mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                xor_mask[4..].copy_from_slice(&m.transaction_id.0);
                let octets = ip.octets();
                for i in 0..16 {
                    value.push(octets[i] ^ xor_mask[i]);
                }
            }
        }
        m.add(ATTR_XOR_MAPPED_ADDRESS, &value);
        Ok(())
    }
}

impl Getter for XorMappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_XOR_MAPPED_ADDRESS)?;
        if v.len() < 8 {
            return Err(Error::ErrAttributeSizeInvalid);
        }

        let family = v[1];
        let xor_port = u16::from_be_bytes([v[2], v[3]]);
        self.port = xor_port ^ (MAGIC_COOKIE >> 16) as u16;

        match family {
            FAMILY_IPV4 => {
                let xored = u32::from_be_bytes([v[4], v[5], v[6], v[7]]);
                self.ip = IpAddr::V4(Ipv4Addr::from(xored ^ MAGIC_COOKIE));
            }
            FAMILY_IPV6 => {
                if v.len() < 20 {
                    return Err(Error::ErrAttributeSizeInvalid);
                }
                let mut xor_mask = [0u8; 16];
                xor_mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                xor_mask[4..].copy_from_slice(&m.transaction_id.0);
                let mut octets = [0u8; 16];
                for i in 0..16 {
                    octets[i] = v[4 + i] ^ xor_mask[i];
                }
                self.ip = IpAddr::V6(Ipv6Addr::from(octets));
            }
            _ => return Err(Error::ErrBadUnexpectedFamily),
        }
        Ok(())
    }
}

#[cfg(test)]
mod xoraddr_test {
    use super::*;

    #[test]
    fn test_v4_roundtrip() {
        let mut m = Message::build(BINDING_SUCCESS);
        let addr = XorMappedAddress {
            ip: "192.0.2.10".parse().unwrap(),
            port: 30000,
        };
        addr.add_to(&mut m).unwrap();

        let mut got = XorMappedAddress::default();
        got.get_from(&m).unwrap();
        assert_eq!(got, addr);
    }

    #[test]
    fn test_v6_roundtrip() {
        let mut m = Message::build(BINDING_SUCCESS);
        let addr = XorMappedAddress {
            ip: "2001:db8::42".parse().unwrap(),
            port: 4242,
        };
        addr.add_to(&mut m).unwrap();

        let mut got = XorMappedAddress::default();
        got.get_from(&m).unwrap();
        assert_eq!(got, addr);
    }
}
