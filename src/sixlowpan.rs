//! 6LoWPAN: IPv6 over Low-Power Wireless Personal Area Networks
//!
//! # References
//!
//! - [RFC 4944: Transmission of IPv6 Packets over IEEE 802.15.4 Networks][0]
//!
//! [0]: https://tools.ietf.org/html/rfc4944
//!
//! - [RFC 6282: Compression Format for IPv6 Datagrams over IEEE 802.15.4-Based Networks][1]
//!
//! [1]: https://tools.ietf.org/html/rfc6282

pub mod frag;
pub mod iphc;
pub mod nhc;
pub mod rbuf;

/// Uncompressed IPv6 dispatch value
pub const IPV6_DISPATCH: u8 = 0b0100_0001;

/// 6LoWPAN dispatch type: what the first byte of a 6LoWPAN frame says comes next
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// Not a LoWPAN frame (`00xxxxxx`)
    Nalp,
    /// Uncompressed IPv6 header (`01000001`)
    Ipv6,
    /// LOWPAN_IPHC compressed IPv6 header (`011xxxxx`)
    Iphc,
    /// Broadcast header (`01010000`)
    Broadcast,
    /// Mesh addressing header (`10xxxxxx`)
    Mesh,
    /// First fragment header (`11000xxx`)
    Frag1,
    /// Subsequent fragment header (`11100xxx`)
    FragN,
    /// Reserved or unsupported dispatch value
    Unknown(u8),
}

impl Dispatch {
    /// Classifies a dispatch byte
    pub fn of(byte: u8) -> Self {
        match byte {
            IPV6_DISPATCH => Dispatch::Ipv6,
            0b0101_0000 => Dispatch::Broadcast,
            _ if byte >> 6 == 0b00 => Dispatch::Nalp,
            _ if byte >> 5 == 0b011 => Dispatch::Iphc,
            _ if byte >> 6 == 0b10 => Dispatch::Mesh,
            _ if byte >> 3 == frag::FRAG1 => Dispatch::Frag1,
            _ if byte >> 3 == frag::FRAGN => Dispatch::FragN,
            _ => Dispatch::Unknown(byte),
        }
    }

    /// Classifies the first byte of `payload`; `None` if it's empty
    pub fn of_payload(payload: &[u8]) -> Option<Self> {
        payload.first().map(|byte| Dispatch::of(*byte))
    }
}
