//! Byte-order conversions and the address tagged union.
//!
//! Everything here is pure and allocation-free; invalid textual input yields
//! [`NetError::Args`] rather than a sentinel value.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{NetError, Result};

/// Host-to-network conversion for a 32-bit unsigned integer.
pub fn host_to_net_long(x: u32) -> u32 {
    x.to_be()
}

/// Network-to-host conversion for a 32-bit unsigned integer.
pub fn net_to_host_long(x: u32) -> u32 {
    u32::from_be(x)
}

/// Host-to-network conversion for a 16-bit unsigned integer.
pub fn host_to_net_short(x: u16) -> u16 {
    x.to_be()
}

/// Network-to-host conversion for a 16-bit unsigned integer.
pub fn net_to_host_short(x: u16) -> u16 {
    u16::from_be(x)
}

/// Address family tag for [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    V4,
    V6,
}

/// A tagged union over an IPv4 or IPv6 address, stored as 16 raw bytes
/// (IPv4 occupies the first 4, in host byte order) plus a type tag, matching
/// the base spec's `IP address` data model entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    bytes: [u8; 16],
    kind: AddressKind,
}

impl Default for Address {
    /// The unspecified IPv4 address, `0.0.0.0`.
    fn default() -> Self {
        Address::v4([0, 0, 0, 0])
    }
}

impl Address {
    pub const fn v4(octets: [u8; 4]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0] = octets[0];
        bytes[1] = octets[1];
        bytes[2] = octets[2];
        bytes[3] = octets[3];
        Address { bytes, kind: AddressKind::V4 }
    }

    pub const fn v6(octets: [u8; 16]) -> Self {
        Address { bytes: octets, kind: AddressKind::V6 }
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn is_v4(&self) -> bool {
        matches!(self.kind, AddressKind::V4)
    }

    pub fn is_v6(&self) -> bool {
        matches!(self.kind, AddressKind::V6)
    }

    /// Raw bytes backing this address: 4 significant bytes for V4, 16 for V6.
    pub fn octets(&self) -> &[u8] {
        match self.kind {
            AddressKind::V4 => &self.bytes[0..4],
            AddressKind::V6 => &self.bytes[..],
        }
    }

    /// Parses a dotted-quad IPv4 address or colon-hex IPv6 address.
    pub fn parse(s: &str) -> Result<Self> {
        if let Ok(v4) = Ipv4Addr::from_str(s) {
            return Ok(Address::from(IpAddr::V4(v4)));
        }
        if let Ok(v6) = Ipv6Addr::from_str(s) {
            return Ok(Address::from(IpAddr::V6(v6)));
        }
        Err(NetError::Args)
    }

    /// True when `s` parses as an IP literal (used to decide whether DNS
    /// resolution, or SNI, is necessary).
    pub fn is_literal(s: &str) -> bool {
        Ipv4Addr::from_str(s).is_ok() || Ipv6Addr::from_str(s).is_ok()
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::v4(v4.octets()),
            IpAddr::V6(v6) => Address::v6(v6.octets()),
        }
    }
}

impl From<Address> for IpAddr {
    fn from(addr: Address) -> Self {
        match addr.kind {
            AddressKind::V4 => {
                IpAddr::V4(Ipv4Addr::new(addr.bytes[0], addr.bytes[1], addr.bytes[2], addr.bytes[3]))
            }
            AddressKind::V6 => IpAddr::V6(Ipv6Addr::from(addr.bytes)),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip: IpAddr = (*self).into();
        write!(f, "{ip}")
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_network_long_roundtrip() {
        for x in [0u32, 1, 0x1234_5678, u32::MAX] {
            assert_eq!(net_to_host_long(host_to_net_long(x)), x);
        }
    }

    #[test]
    fn host_network_short_roundtrip() {
        for x in [0u16, 1, 0x1234, u16::MAX] {
            assert_eq!(net_to_host_short(host_to_net_short(x)), x);
        }
    }

    #[test]
    fn v4_string_roundtrip() {
        let addr = Address::parse("192.168.1.42").unwrap();
        assert!(addr.is_v4());
        assert_eq!(addr.to_string(), "192.168.1.42");
    }

    #[test]
    fn v6_string_roundtrip() {
        let addr = Address::parse("::1").unwrap();
        assert!(addr.is_v6());
        assert_eq!(addr.to_string(), "::1");
    }

    #[test]
    fn invalid_address_is_args_error() {
        assert!(matches!(Address::parse("not-an-ip"), Err(NetError::Args)));
    }

    #[test]
    fn literal_detection() {
        assert!(Address::is_literal("127.0.0.1"));
        assert!(Address::is_literal("::1"));
        assert!(!Address::is_literal("localhost"));
    }
}
