//! LOWPAN_IPHC encoding
//!
//! Only stateless compression is understood. Headers that reference a compression context are
//! rejected by `Packet::parse`.

use core::fmt;

use as_slice::AsSlice;
use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::usize;

use crate::{
    fmt::Quoted,
    ieee802154 as ll, ipv6,
    sixlowpan::nhc,
    traits::UncheckedIndex,
};

/* Header format */
const IPHC0: usize = 0;

mod dispatch {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::tf::OFFSET + super::tf::SIZE;
    pub const SIZE: usize = 3;
    pub const VALUE: u8 = 0b011;
}

mod tf {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::nh::OFFSET + super::nh::SIZE;
    pub const SIZE: usize = 2;
}

mod nh {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::hlim::OFFSET + super::hlim::SIZE;
    pub const SIZE: usize = 1;
}

mod hlim {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 2;
}

const IPHC1: usize = 1;

mod cid {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::sac::OFFSET + super::sac::SIZE;
    pub const SIZE: usize = 1;
}

mod sac {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::sam::OFFSET + super::sam::SIZE;
    pub const SIZE: usize = 1;
}

mod sam {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::m::OFFSET + super::m::SIZE;
    pub const SIZE: usize = 2;
}

mod m {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::dac::OFFSET + super::dac::SIZE;
    pub const SIZE: usize = 1;
}

mod dac {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::dam::OFFSET + super::dam::SIZE;
    pub const SIZE: usize = 1;
}

mod dam {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 2;
}

/// LOWPAN_IPHC compressed IPv6 packet
#[derive(Clone, Copy)]
pub struct Packet<BUFFER>
where
    BUFFER: AsSlice<Element = u8>,
{
    buffer: BUFFER,
    /// Index at which the payload starts
    payload: u8,
}

impl<B> Packet<B>
where
    B: AsSlice<Element = u8>,
{
    /* Constructors */
    /// Parses the bytes as a LOWPAN_IPHC compressed IPv6 packet
    ///
    /// # Notes
    ///
    /// The following field values require a compression context and are treated as errors
    ///
    /// - CID = 1
    /// - SAC = 1 && SAM != 0
    /// - DAC = 1
    pub fn parse(bytes: B) -> Result<Self, B> {
        // validation
        if let Ok(len) = (|| {
            let slice = bytes.as_slice();

            let mut len = 2;
            if slice.len() < usize::from(len) {
                // too small
                return Err(());
            }

            let header = Packet {
                buffer: slice,
                payload: 0,
            };

            if header.get_dispatch() != dispatch::VALUE {
                return Err(());
            }

            // context based modes
            if header.get_cid()
                || (header.get_sac() && header.get_sam() != 0b00)
                || header.get_dac()
            {
                return Err(());
            }

            len += header.tf_size();
            len += header.nh_size();
            len += header.hlim_size();
            len += header.src_addr_size();

            // end of inline IP fields
            len += header.dest_addr_size();

            if slice.len() < usize::from(len) {
                // too small
                Err(())
            } else {
                Ok(len)
            }
        })() {
            Ok(Packet {
                buffer: bytes,
                payload: len,
            })
        } else {
            Err(bytes)
        }
    }

    /* Accessors */
    /// Reads the (potentially elided) 'Traffic Class' field
    ///
    /// NOTE the in-line encoding orders the bits as ECN + DSCP; this returns them in IPv6 order
    /// (DSCP + ECN)
    pub fn get_traffic_class(&self) -> u8 {
        let start = usize::from(self.ip_fields_start());

        match self.get_tf() {
            // ECN + DSCP
            0b00 | 0b10 => {
                let byte = self.as_slice()[start];
                ((byte & 0x3f) << 2) | (byte >> 6)
            }
            // ECN only
            0b01 => self.as_slice()[start] >> 6,
            // elided
            0b11 => 0,
            _ => unreachable!(),
        }
    }

    /// Reads the (potentially elided) 'Flow Label' field (20 bits)
    pub fn get_flow_label(&self) -> u32 {
        let start = usize::from(self.ip_fields_start());

        let fl = match self.get_tf() {
            0b00 => unsafe { self.as_slice().r(start + 1..start + 4) },
            0b01 => unsafe { self.as_slice().r(start..start + 3) },
            0b10 | 0b11 => return 0,
            _ => unreachable!(),
        };

        NE::read_u24(fl) & ((1 << 20) - 1)
    }

    /// Reads the 'Next header' field
    ///
    /// **NOTE**: This returns `None` if the next header is encoded using the LOWPAN_NHC format. In
    /// that case the slice returned by `payload` starts with a LOWPAN_NHC encoding and *must* be
    /// parsed using one of the encoders in the `nhc` module
    pub fn get_next_header(&self) -> Option<ipv6::NextHeader> {
        if self.get_nh() {
            None
        } else {
            let mut start = self.ip_fields_start();
            start += self.tf_size();

            Some(ipv6::NextHeader::from(self.as_slice()[usize::from(start)]))
        }
    }

    /// Reads the (potentially compressed) 'Hop limit' field
    pub fn get_hop_limit(&self) -> u8 {
        match self.get_hlim() {
            0b00 => {
                let mut start = self.ip_fields_start();
                start += self.tf_size();
                start += self.nh_size();

                self.as_slice()[usize::from(start)]
            }
            0b01 => 1,
            0b10 => 64,
            0b11 => 255,
            _ => unreachable!(),
        }
    }

    /// Reads the (potentially compressed) 'Source Address' field
    pub fn get_source(&self) -> Addr {
        let mut start = self.ip_fields_start();
        start += self.tf_size();
        start += self.nh_size();
        start += self.hlim_size();

        let inline = unsafe { self.as_slice().rf(usize::from(start)..) };

        if self.get_sac() {
            // SAC = 1 && SAM != 0 is rejected in `parse`
            debug_assert_eq!(self.get_sam(), 0b00);

            Addr::Complete(ipv6::Addr::UNSPECIFIED)
        } else {
            link_local(self.get_sam(), inline)
        }
    }

    /// Reads the (potentially compressed) 'Destination Address' field
    pub fn get_destination(&self) -> Addr {
        let mut start = self.ip_fields_start();
        start += self.tf_size();
        start += self.nh_size();
        start += self.hlim_size();
        start += self.src_addr_size();

        let inline = unsafe { self.as_slice().rf(usize::from(start)..) };

        // DAC = 1 is rejected in `parse`
        debug_assert!(!self.get_dac());

        if self.get_m() {
            Addr::Complete(multicast(self.get_dam(), inline))
        } else {
            link_local(self.get_dam(), inline)
        }
    }

    /// Immutable view into the header
    pub fn header(&self) -> &[u8] {
        unsafe { self.as_slice().rt(..usize::from(self.payload)) }
    }

    /// Immutable view into the payload
    pub fn payload(&self) -> &[u8] {
        unsafe { self.as_slice().rf(usize::from(self.payload)..) }
    }

    /// Byte representation of this packet
    pub fn bytes(&self) -> &[u8] {
        self.as_slice()
    }

    /// Reads the 'Traffic class, Flow label' field
    pub fn get_tf(&self) -> u8 {
        get!(self.header_()[IPHC0], tf)
    }

    /// Reads the 'Next Header field
    pub fn get_nh(&self) -> bool {
        get!(self.header_()[IPHC0], nh) != 0
    }

    /// Reads the 'Hop Limit' field
    pub fn get_hlim(&self) -> u8 {
        get!(self.header_()[IPHC0], hlim)
    }

    /// Reads the 'Context IDentifier extension' field
    pub fn get_cid(&self) -> bool {
        get!(self.header_()[IPHC1], cid) != 0
    }

    /// Reads the 'Source Address Compression' field
    pub fn get_sac(&self) -> bool {
        get!(self.header_()[IPHC1], sac) != 0
    }

    /// Reads the 'Source Address Mode' field
    pub fn get_sam(&self) -> u8 {
        get!(self.header_()[IPHC1], sam)
    }

    /// Reads the 'Multicast compression' field
    pub fn get_m(&self) -> bool {
        get!(self.header_()[IPHC1], m) != 0
    }

    /// Reads the 'Destination Address Compression' field
    pub fn get_dac(&self) -> bool {
        get!(self.header_()[IPHC1], dac) != 0
    }

    /// Reads the 'Destination Address Mode' IPHC field
    pub fn get_dam(&self) -> u8 {
        get!(self.header_()[IPHC1], dam)
    }

    /* Decompression */
    /// Computes how many bytes decompression consumes and produces, without writing anything
    ///
    /// Fails if the header can't be decompressed on its own: an unsupported or truncated
    /// LOWPAN_NHC encoding, or a UDP header whose checksum was elided
    pub fn decompressed_sizes(&self) -> Result<Decompressed, ()> {
        let mut consumed = u16::from(self.payload);
        let mut written = u16::from(ipv6::HEADER_SIZE);

        if self.get_nh() {
            let udp = nhc::UdpPacket::parse(self.payload()).map_err(drop)?;

            if udp.get_checksum().is_none() {
                return Err(());
            }

            consumed += udp.header().len() as u16;
            written += u16::from(nhc::UDP_HEADER_SIZE);
        }

        Ok(Decompressed { consumed, written })
    }

    /// Writes the uncompressed IPv6 header (plus UDP header, if LOWPAN_NHC follows) at the start
    /// of `out`
    ///
    /// `out` must span the *whole* uncompressed datagram: the IPv6 payload length (and the UDP
    /// length) are derived from its length. `ctxt` provides the link-layer addresses used to
    /// rebuild elided addresses.
    pub fn decompress(&self, ctxt: &Context, out: &mut [u8]) -> Result<Decompressed, ()> {
        let sizes = self.decompressed_sizes()?;

        let total = out.len();
        if total < usize(sizes.written) || total > usize(u16::MAX) + usize(ipv6::HEADER_SIZE) {
            return Err(());
        }

        let src = self.get_source().resolve(ctxt.source).ok_or(())?;
        let dest = self.get_destination().resolve(ctxt.destination).ok_or(())?;

        let mut ip = ipv6::Packet::new(&mut *out);
        ip.set_traffic_class(self.get_traffic_class());
        ip.set_flow_label(self.get_flow_label());
        ip.set_next_header(self.get_next_header().unwrap_or(ipv6::NextHeader::Udp));
        ip.set_hop_limit(self.get_hop_limit());
        ip.set_source(src);
        ip.set_destination(dest);
        let length = ip.get_length();

        if self.get_nh() {
            let udp = nhc::UdpPacket::parse(self.payload()).map_err(drop)?;
            udp.decompress(length, &mut out[usize(ipv6::HEADER_SIZE)..])?;
        }

        Ok(sizes)
    }

    /* Private */
    fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    // Header is at least two bytes long
    fn header_(&self) -> &[u8; 2] {
        debug_assert!(self.buffer.as_slice().len() >= 2);

        unsafe { &*(self.buffer.as_slice().as_ptr() as *const _) }
    }

    fn get_dispatch(&self) -> u8 {
        get!(self.as_slice()[IPHC0], dispatch)
    }

    // NOTE CID = 1 is rejected in `parse` so the IP fields always start right after IPHC1
    fn ip_fields_start(&self) -> u8 {
        2
    }

    fn tf_size(&self) -> u8 {
        match self.get_tf() {
            0b00 => 4,
            0b01 => 3,
            0b10 => 1,
            0b11 => 0,
            _ => unreachable!(),
        }
    }

    fn nh_size(&self) -> u8 {
        if self.get_nh() {
            0
        } else {
            1
        }
    }

    fn hlim_size(&self) -> u8 {
        if self.get_hlim() == 0b00 {
            1
        } else {
            0
        }
    }

    // NOTE context based modes are rejected in `parse`
    fn src_addr_size(&self) -> u8 {
        match (self.get_sac(), self.get_sam()) {
            (false, 0b00) => 16,
            (false, 0b01) => 8,
            (false, 0b10) => 2,
            (false, 0b11) => 0,

            // unspecified address
            (true, _) => 0,

            _ => unreachable!(),
        }
    }

    fn dest_addr_size(&self) -> u8 {
        match (self.get_m(), self.get_dam()) {
            (false, 0b00) => 16,
            (false, 0b01) => 8,
            (false, 0b10) => 2,
            (false, 0b11) => 0,

            (true, 0b00) => 16,
            (true, 0b01) => 6,
            (true, 0b10) => 4,
            (true, 0b11) => 1,

            _ => unreachable!(),
        }
    }
}

// Decodes a stateless unicast address (SAC / DAC = 0, M = 0)
fn link_local(mode: u8, inline: &[u8]) -> Addr {
    let mut bytes = [0; 16];

    // 0..8: link local prefix padded with zeros
    bytes[..8].copy_from_slice(&ipv6::Addr::LINK_LOCAL_PREFIX);

    match mode {
        // in-line
        0b00 => bytes.copy_from_slice(unsafe { inline.r(0..16) }),

        // 8..16: in-line
        0b01 => bytes[8..].copy_from_slice(unsafe { inline.r(0..8) }),

        0b10 => {
            // 8..14 = 0000:00ff:fe00
            bytes[11] = 0xff;
            bytes[12] = 0xfe;

            // 14..16: in-line
            bytes[14..].copy_from_slice(unsafe { inline.r(0..2) });
        }

        0b11 => return Addr::Elided(ElidedAddr { _0: () }),

        _ => unreachable!(),
    }

    Addr::Complete(ipv6::Addr(bytes))
}

// Decodes a stateless multicast address (M = 1, DAC = 0)
fn multicast(mode: u8, inline: &[u8]) -> ipv6::Addr {
    let mut bytes = [0; 16];
    bytes[0] = 0xff;

    match mode {
        0b00 => bytes.copy_from_slice(unsafe { inline.r(0..16) }),

        // ffXX::00XX:XXXX:XXXX
        0b01 => {
            bytes[1] = inline[0];
            bytes[11..].copy_from_slice(unsafe { inline.r(1..6) });
        }

        // ffXX::00XX:XXXX
        0b10 => {
            bytes[1] = inline[0];
            bytes[13..].copy_from_slice(unsafe { inline.r(1..4) });
        }

        // ff02::00XX
        0b11 => {
            bytes[1] = 0x02;
            bytes[15] = inline[0];
        }

        _ => unreachable!(),
    }

    ipv6::Addr(bytes)
}

impl<B> fmt::Debug for Packet<B>
where
    B: AsSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Binary(u8);

        impl fmt::Debug for Binary {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0b{:02b}", self.0)
            }
        }

        let mut s = f.debug_struct("iphc::Packet");
        s.field("tf", &Binary(self.get_tf()))
            .field("nh", &u8::from(self.get_nh()))
            .field("hlim", &Binary(self.get_hlim()))
            .field("sac", &u8::from(self.get_sac()))
            .field("sam", &Binary(self.get_sam()))
            .field("m", &u8::from(self.get_m()))
            .field("dam", &Binary(self.get_dam()))
            .field("traffic_class", &self.get_traffic_class())
            .field("flow_label", &self.get_flow_label())
            .field("next_header", &self.get_next_header())
            .field("hop_limit", &self.get_hop_limit());

        match self.get_source() {
            Addr::Complete(addr) => {
                s.field("source", &Quoted(addr));
            }
            Addr::Elided(ea) => {
                s.field("source", &Quoted(ea));
            }
        }

        match self.get_destination() {
            Addr::Complete(addr) => {
                s.field("destination", &Quoted(addr));
            }
            Addr::Elided(ea) => {
                s.field("destination", &Quoted(ea));
            }
        }

        s.finish()
    }
}

/// Result of a successful decompression
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Decompressed {
    /// Compressed bytes (IPHC plus LOWPAN_NHC, if any) that were replaced
    pub consumed: u16,
    /// Uncompressed header bytes written in their place
    pub written: u16,
}

/// Maybe IPHC compressed address
pub enum Addr {
    /// Complete address
    Complete(ipv6::Addr),
    /// Elided address
    Elided(ElidedAddr),
}

impl Addr {
    /// Turns this address into a complete one, using the link-layer address for elided ones
    ///
    /// Returns `None` if the address is elided but there's no link-layer address to derive it
    /// from
    pub fn resolve(self, ll_addr: Option<ll::Addr>) -> Option<ipv6::Addr> {
        match self {
            Addr::Complete(addr) => Some(addr),
            Addr::Elided(ea) => ll_addr.map(|ll_addr| ea.complete(ll_addr)),
        }
    }
}

/// Fully elided IPv6 address
pub struct ElidedAddr {
    _0: (),
}

impl fmt::Display for ElidedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fe80::X:X:X:X")
    }
}

impl ElidedAddr {
    /// Complete this elided address using Link-layer information
    pub fn complete<A>(self, ll_addr: A) -> ipv6::Addr
    where
        A: Into<ll::Addr>,
    {
        self.complete_(ll_addr.into())
    }

    fn complete_(self, ll_addr: ll::Addr) -> ipv6::Addr {
        let mut bytes = [0; 16];

        bytes[..8].copy_from_slice(&ipv6::Addr::LINK_LOCAL_PREFIX);

        match ll_addr {
            ll::Addr::Short(sa) => {
                // map into an EUI-64 address
                bytes[11] = 0xff;
                bytes[12] = 0xfe;

                NE::write_u16(&mut bytes[14..], sa.0);
            }
            ll::Addr::Extended(ea) => bytes[8..].copy_from_slice(&ea.eui_64()),
        }

        ipv6::Addr(bytes)
    }
}

/// Link-layer addresses of the frame that carried the IPHC header
#[derive(Clone, Copy, Debug, Default)]
pub struct Context {
    /// Source link-layer address
    pub source: Option<ll::Addr>,

    /// Destination link-layer address
    pub destination: Option<ll::Addr>,
}

impl Context {
    /// No context
    pub fn empty() -> Self {
        Context {
            source: None,
            destination: None,
        }
    }
}
