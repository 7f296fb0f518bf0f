//! LOWPAN_NHC encoding
//!
//! Only the UDP header compression format (RFC 6282, Section 4.3) is supported

use core::fmt;

use as_slice::AsSlice;
use byteorder::{ByteOrder, NetworkEndian as NE};

use crate::traits::UncheckedIndex;

/* Header format */
const NHC: usize = 0;

mod id {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::c::OFFSET + super::c::SIZE;
    pub const SIZE: usize = 5;
    pub const VALUE: u8 = 0b11110;
}

mod c {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::p::OFFSET + super::p::SIZE;
    pub const SIZE: usize = 1;
}

mod p {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 2;
}

/// Size of an uncompressed UDP header
pub const UDP_HEADER_SIZE: u8 = 8;

/// LOWPAN_NHC compressed UDP packet
pub struct UdpPacket<BUFFER>
where
    BUFFER: AsSlice<Element = u8>,
{
    buffer: BUFFER,
    /// Index at which the payload starts
    payload: u8,
}

impl<B> UdpPacket<B>
where
    B: AsSlice<Element = u8>,
{
    /* Constructors */
    /// Parses the bytes as a LOWPAN_NHC compressed UDP header
    pub fn parse(buffer: B) -> Result<Self, B> {
        let mut start = 1u8; // NHC

        if buffer.as_slice().len() < usize::from(start) {
            return Err(buffer);
        }

        let mut p = UdpPacket { buffer, payload: 0 };

        // check NHC ID
        if get!(p.header_(), id) != id::VALUE {
            return Err(p.buffer);
        }

        if !p.get_c() {
            start += 2; // checksum
        }

        start += p.ports_size();

        p.payload = start;

        if p.buffer.as_slice().len() < usize::from(start) {
            Err(p.buffer)
        } else {
            Ok(p)
        }
    }

    /* Getters */
    /// Reads the (potentially compressed) 'Source Port' field
    pub fn get_source(&self) -> u16 {
        unsafe {
            match self.get_p() {
                0b00 | 0b01 => NE::read_u16(self.as_slice().r(1..3)),
                0b10 => 0xf000 + u16::from(self.as_slice()[1]),
                0b11 => 0xf0b0 + u16::from(self.as_slice()[1] >> 4),
                _ => unreachable!(),
            }
        }
    }

    /// Reads the (potentially compressed) 'Destination Port' field
    pub fn get_destination(&self) -> u16 {
        unsafe {
            match self.get_p() {
                0b00 => NE::read_u16(self.as_slice().r(3..5)),
                0b01 => 0xf000 + u16::from(self.as_slice()[3]),
                0b10 => NE::read_u16(self.as_slice().r(2..4)),
                0b11 => 0xf0b0 + u16::from(self.as_slice()[1] & 0x0f),
                _ => unreachable!(),
            }
        }
    }

    /// Reads the (potentially compressed) 'Checksum' field
    ///
    /// `None` means that the checksum has been elided by the compressor
    pub fn get_checksum(&self) -> Option<u16> {
        if !self.get_c() {
            let start = usize::from(1 + self.ports_size());
            Some(NE::read_u16(unsafe { self.as_slice().r(start..start + 2) }))
        } else {
            None
        }
    }

    /// Immutable view into the compressed header
    pub fn header(&self) -> &[u8] {
        unsafe { self.as_slice().rt(..usize::from(self.payload)) }
    }

    /// Immutable view into the UDP payload
    pub fn payload(&self) -> &[u8] {
        let start = usize::from(self.payload);
        unsafe { self.as_slice().rf(start..) }
    }

    /// Reads the 'Checksum' NHC field
    pub fn get_c(&self) -> bool {
        get!(self.header_(), c) != 0
    }

    /// Reads the 'Ports' NHC field
    pub fn get_p(&self) -> u8 {
        get!(self.header_(), p)
    }

    /// Writes the uncompressed UDP header into the first 8 bytes of `out`
    ///
    /// `length` goes into the header as is; it must cover the UDP header plus payload of the
    /// *reassembled* datagram, which is usually more than what this fragment carries.
    ///
    /// Fails if the compressor elided the checksum (recomputing it requires the whole datagram)
    /// or if `out` is too short.
    pub fn decompress(&self, length: u16, out: &mut [u8]) -> Result<(), ()> {
        let checksum = self.get_checksum().ok_or(())?;

        if out.len() < usize::from(UDP_HEADER_SIZE) {
            return Err(());
        }

        NE::write_u16(&mut out[0..2], self.get_source());
        NE::write_u16(&mut out[2..4], self.get_destination());
        NE::write_u16(&mut out[4..6], length);
        NE::write_u16(&mut out[6..8], checksum);

        Ok(())
    }

    /* Private */
    fn ports_size(&self) -> u8 {
        match self.get_p() {
            // source & destination uncompressed
            0b00 => 2 + 2,
            // destination compressed
            0b01 => 2 /* source */ + 1, /* destination */
            // source compressed
            0b10 => 1 /* source */ + 2, /* destination */
            // source and destination compressed
            0b11 => 1,
            _ => unreachable!(),
        }
    }

    fn header_(&self) -> u8 {
        self.as_slice()[NHC]
    }

    fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}

impl<B> fmt::Debug for UdpPacket<B>
where
    B: AsSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::fmt::Hex;

        let mut s = f.debug_struct("nhc::UdpPacket");
        s.field("source", &self.get_source())
            .field("destination", &self.get_destination());
        if let Some(cksum) = self.get_checksum() {
            s.field("checksum", &Hex(cksum));
        }
        s.finish()
    }
}
