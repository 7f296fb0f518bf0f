//! IPv6: Internet Protocol v6
//!
//! Only the fixed header is modeled here. 6LoWPAN header decompression rebuilds this header in
//! front of the reassembled payload and the upper layer inspects it through [`Packet`].
//!
//! # References
//!
//! - [RFC 8200 Internet Protocol, Version 6 (IPv6) Specification][rfc8200]
//! - [RFC 4291 IP Version 6 Addressing Architecture][rfc4291]
//!
//! [rfc8200]: https://tools.ietf.org/html/rfc8200
//! [rfc4291]: https://tools.ietf.org/html/rfc4291

use core::{
    fmt,
    ops::{Range, RangeFrom, RangeTo},
};

use as_slice::{AsMutSlice, AsSlice};
use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u32, usize};

use crate::{fmt::Quoted, traits::UncheckedIndex};

/* Packet structure */
const V: usize = 0;
mod v {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 4;
    pub const SIZE: usize = 4;
}

const TC: RangeTo<usize> = ..2;
mod tc {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 4;
    pub const SIZE: usize = 8;
}

const FLH: usize = 1;
const FLL: Range<usize> = 2..4;

const LENGTH: Range<usize> = 4..6;
const NEXT_HEADER: usize = 6;
const HOP_LIMIT: usize = 7;
const SOURCE: Range<usize> = 8..24;
const DESTINATION: Range<usize> = 24..40;
const PAYLOAD: RangeFrom<usize> = 40..;

/// Fixed header size, in bytes
pub const HEADER_SIZE: u8 = DESTINATION.end as u8;

/// IPv6 packet
pub struct Packet<BUFFER>
where
    BUFFER: AsSlice<Element = u8>,
{
    buffer: BUFFER,
}

impl<B> Packet<B>
where
    B: AsSlice<Element = u8>,
{
    /* Constructors */
    /// Parses bytes into an IPv6 packet
    ///
    /// Extension headers, if any, are left in the payload
    pub fn parse(bytes: B) -> Result<Self, B> {
        if bytes.as_slice().len() < usize(HEADER_SIZE) {
            // smaller than header
            return Err(bytes);
        }

        if get!(bytes.as_slice()[V], v) != 6 {
            // version is not `6`
            return Err(bytes);
        }

        Ok(Packet { buffer: bytes })
    }

    /* Accessors */
    /// Reads the 'Version' field
    ///
    /// This always returns `6`
    pub fn get_version(&self) -> u8 {
        debug_assert_eq!(get!(&self.header()[V], v), 6);

        6
    }

    /// Reads the 'Traffic Class' field
    pub fn get_traffic_class(&self) -> u8 {
        get!(NE::read_u16(&self.header()[TC]), tc) as u8
    }

    /// Reads the 'Flow Label' field (20 bits)
    pub fn get_flow_label(&self) -> u32 {
        let mask = (1 << 4) - 1;

        (u32(self.header()[FLH]) & mask) << 16 | u32(NE::read_u16(&self.header()[FLL]))
    }

    /// Reads the 'Payload length' field
    pub fn get_length(&self) -> u16 {
        NE::read_u16(&self.header()[LENGTH])
    }

    /// Reads the 'Next Header' field
    pub fn get_next_header(&self) -> NextHeader {
        self.header()[NEXT_HEADER].into()
    }

    /// Reads the 'Hop Limit' field
    pub fn get_hop_limit(&self) -> u8 {
        self.header()[HOP_LIMIT]
    }

    /// Reads the 'Source Address' field
    pub fn get_source(&self) -> Addr {
        let mut addr = Addr::UNSPECIFIED;
        addr.0.copy_from_slice(unsafe { self.as_slice().r(SOURCE) });
        addr
    }

    /// Reads the 'Destination Address' field
    pub fn get_destination(&self) -> Addr {
        let mut addr = Addr::UNSPECIFIED;
        addr.0.copy_from_slice(unsafe { self.as_slice().r(DESTINATION) });
        addr
    }

    /// Immutable view into the payload
    pub fn payload(&self) -> &[u8] {
        unsafe { self.as_slice().rf(PAYLOAD) }
    }

    /// Returns the byte representation of this packet
    pub fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }

    /// Frees the underlying buffer
    pub fn free(self) -> B {
        self.buffer
    }

    /* Private */
    fn header(&self) -> &[u8; HEADER_SIZE as usize] {
        debug_assert!(self.as_slice().len() >= usize(HEADER_SIZE));

        unsafe { &*(self.as_slice().as_ptr() as *const _) }
    }

    fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}

impl<B> Packet<B>
where
    B: AsMutSlice<Element = u8>,
{
    /* Constructors */
    /// Transforms the given buffer into an IPv6 packet
    ///
    /// Most of the header will be filled with sensible defaults:
    ///
    /// - Version = 6
    /// - Traffic class = 0
    /// - Flow label = 0
    /// - Length = buffer.len() - HEADER_SIZE
    /// - Hop limit = 255
    ///
    /// The fields that are left unpopulated are:
    ///
    /// - Next header
    /// - Source address
    /// - Destination address
    ///
    /// # Panics
    ///
    /// This constructor panics if
    ///
    /// - the given `buffer` is smaller than `HEADER_SIZE`
    /// - the packet would result in a payload length larger than `u16::MAX`.
    pub fn new(buffer: B) -> Self {
        let blen = buffer.as_slice().len();
        assert!(blen >= usize(HEADER_SIZE) && blen <= usize(u16::MAX) + usize(HEADER_SIZE));

        let mut p = Packet { buffer };

        p.set_version();
        p.set_traffic_class(0);
        p.set_flow_label(0);
        // NOTE(cast) see `assert` above
        p.set_length((blen - usize(HEADER_SIZE)) as u16);
        p.set_hop_limit(255);

        p
    }

    /// Sets the 'Traffic class' field
    pub fn set_traffic_class(&mut self, tc: u8) {
        let mask = (1 << 4) - 1;

        // low nibble goes in the high half of the second byte
        let tcl = &mut self.header_mut()[1];
        *tcl &= !(mask << 4);
        *tcl |= (tc & mask) << 4;

        // high nibble goes in the low half of the first byte
        let tch = &mut self.header_mut()[0];
        *tch &= !mask;
        *tch |= tc >> 4;
    }

    /// Sets the 'Flow label' field
    ///
    /// Only the 20 least significant bits of `fl` are used
    pub fn set_flow_label(&mut self, fl: u32) {
        // low half-word
        NE::write_u16(&mut self.header_mut()[FLL], fl as u16);

        // high nibble
        let mask = (1 << 4) - 1;
        let flh = &mut self.header_mut()[FLH];
        *flh &= !mask;
        *flh |= (fl >> 16) as u8 & mask;
    }

    /// Sets the 'Payload length' field
    ///
    /// NOTE this does *not* resize the underlying buffer
    pub fn set_length(&mut self, len: u16) {
        NE::write_u16(&mut self.header_mut()[LENGTH], len);
    }

    /// Sets the 'Next Header' field
    pub fn set_next_header(&mut self, nh: NextHeader) {
        self.header_mut()[NEXT_HEADER] = nh.into();
    }

    /// Sets the 'Hop limit' field
    pub fn set_hop_limit(&mut self, hl: u8) {
        self.header_mut()[HOP_LIMIT] = hl;
    }

    /// Sets the 'Source address' field
    pub fn set_source(&mut self, addr: Addr) {
        self.header_mut()[SOURCE].copy_from_slice(&addr.0)
    }

    /// Sets the 'Destination address' field
    pub fn set_destination(&mut self, addr: Addr) {
        self.header_mut()[DESTINATION].copy_from_slice(&addr.0)
    }

    /// Mutable view into the payload
    pub fn payload_mut(&mut self) -> &mut [u8] {
        unsafe { self.as_mut_slice().rfm(PAYLOAD) }
    }

    /* Private */
    fn header_mut(&mut self) -> &mut [u8; HEADER_SIZE as usize] {
        debug_assert!(self.as_slice().len() >= usize(HEADER_SIZE));

        unsafe { &mut *(self.as_mut_slice().as_mut_ptr() as *mut _) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    fn set_version(&mut self) {
        set!(self.header_mut()[V], v, 6);
    }
}

impl<B> fmt::Debug for Packet<B>
where
    B: AsSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ipv6::Packet")
            .field("version", &self.get_version())
            .field("traffic_class", &self.get_traffic_class())
            .field("flow_label", &self.get_flow_label())
            .field("length", &self.get_length())
            .field("next_header", &self.get_next_header())
            .field("hop_limit", &self.get_hop_limit())
            .field("source", &Quoted(self.get_source()))
            .field("destination", &Quoted(self.get_destination()))
            .finish()
    }
}

full_range!(
    u8,
    /// Next header: extension header or upper layer protocol
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum NextHeader {
        /// Hop-by-Hop Options
        HopByHop = 0,
        /// Transmission Control Protocol
        Tcp = 6,
        /// User Datagram Protocol
        Udp = 17,
        /// Routing header
        Ipv6Route = 43,
        /// Fragment header
        Ipv6Frag = 44,
        /// ICMP for IPv6
        Ipv6Icmp = 58,
        /// No next header
        Ipv6NoNxt = 59,
        /// Destination Options
        Ipv6Opts = 60,
    }
);

/// IPv6 address
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Addr(pub [u8; 16]);

impl Addr {
    // Section 2.5.2
    /// Unspecified address
    pub const UNSPECIFIED: Self = Addr([0; 16]);

    // Section 2.5.6
    /// Link-local prefix (`fe80::/64`)
    pub const LINK_LOCAL_PREFIX: [u8; 8] = [0xfe, 0x80, 0, 0, 0, 0, 0, 0];
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut is_first = true;

        for chunk in self.0.chunks(2) {
            if is_first {
                is_first = false;
            } else {
                f.write_str(":")?;
            }

            write!(f, "{:x}", NE::read_u16(chunk))?;
        }

        Ok(())
    }
}
