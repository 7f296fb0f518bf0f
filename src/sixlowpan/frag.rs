//! Fragmentation headers (RFC 4944, Section 5.3)
//!
//! ``` text
//!                      1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 0 0 0|    datagram_size    |         datagram_tag          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 0 0|    datagram_size    |         datagram_tag          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |datagram_offset|
//! +-+-+-+-+-+-+-+-+
//! ```

use core::{fmt, ops::Range};

use as_slice::{AsMutSlice, AsSlice};
use byteorder::{ByteOrder, NetworkEndian as NE};

use crate::{buf::Resize, fmt::Hex, traits::UncheckedIndex};

/// Dispatch value of the first fragment header (5 bits)
pub const FRAG1: u8 = 0b11000;

/// Dispatch value of the subsequent fragment headers (5 bits)
pub const FRAGN: u8 = 0b11100;

/// Largest datagram size that fits in the 11-bit field
pub const MAX_DATAGRAM_SIZE: u16 = (1 << size::SIZE) - 1;

/* Header format */
const DISPATCH_SIZE: Range<usize> = 0..2;

mod dispatch {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::size::OFFSET + super::size::SIZE;
    pub const SIZE: usize = 5;
}

mod size {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 11;
}

const TAG: Range<usize> = 2..4;
const OFFSET: usize = 4;

/// Size of the FRAG1 header
pub const FRAG1_HEADER_SIZE: u8 = 4;

/// Size of the FRAGN header
pub const FRAGN_HEADER_SIZE: u8 = 5;

/// First fragment of a datagram
pub struct FirstFragment<BUFFER>
where
    BUFFER: AsSlice<Element = u8>,
{
    buffer: BUFFER,
}

/// Subsequent fragment of a datagram
pub struct NextFragment<BUFFER>
where
    BUFFER: AsSlice<Element = u8>,
{
    buffer: BUFFER,
}

fn check(bytes: &[u8], kind: u8, header_size: u8) -> Result<(), ()> {
    if bytes.len() < usize::from(header_size) {
        // too small
        return Err(());
    }

    if get!(NE::read_u16(&bytes[DISPATCH_SIZE]), dispatch) != u16::from(kind) {
        return Err(());
    }

    Ok(())
}

fn init(bytes: &mut [u8], kind: u8, datagram_size: u16, tag: u16) {
    assert!(datagram_size <= MAX_DATAGRAM_SIZE);

    let mut word = 0;
    set!(word, dispatch, u16::from(kind));
    set!(word, size, datagram_size);
    NE::write_u16(&mut bytes[DISPATCH_SIZE], word);
    NE::write_u16(&mut bytes[TAG], tag);
}

macro_rules! common {
    ($Fragment:ident, $DISPATCH:expr, $HEADER_SIZE:expr) => {
        impl<B> $Fragment<B>
        where
            B: AsSlice<Element = u8>,
        {
            /* Constructors */
            /// Parses bytes into a fragment
            pub fn parse(bytes: B) -> Result<Self, B> {
                match check(bytes.as_slice(), $DISPATCH, $HEADER_SIZE) {
                    Ok(()) => Ok($Fragment { buffer: bytes }),
                    Err(()) => Err(bytes),
                }
            }

            /* Getters */
            /// Reads the 'datagram_size' field: size of the whole datagram *after* header
            /// decompression
            pub fn get_datagram_size(&self) -> u16 {
                get!(NE::read_u16(unsafe { self.as_slice().r(DISPATCH_SIZE) }), size)
            }

            /// Reads the 'datagram_tag' field
            pub fn get_datagram_tag(&self) -> u16 {
                NE::read_u16(unsafe { self.as_slice().r(TAG) })
            }

            /// Immutable view into the header
            pub fn header(&self) -> &[u8] {
                unsafe { self.as_slice().rt(..usize::from($HEADER_SIZE)) }
            }

            /// Immutable view into the fragment payload
            pub fn payload(&self) -> &[u8] {
                unsafe { self.as_slice().rf(usize::from($HEADER_SIZE)..) }
            }

            /// Returns the byte representation of this fragment
            pub fn as_bytes(&self) -> &[u8] {
                self.as_slice()
            }

            /// Frees the underlying buffer
            pub fn free(self) -> B {
                self.buffer
            }

            fn as_slice(&self) -> &[u8] {
                self.buffer.as_slice()
            }
        }

        impl<B> $Fragment<B>
        where
            B: AsMutSlice<Element = u8>,
        {
            /// Mutable view into the fragment payload
            pub fn payload_mut(&mut self) -> &mut [u8] {
                unsafe { self.as_mut_slice().rfm(usize::from($HEADER_SIZE)..) }
            }

            fn as_mut_slice(&mut self) -> &mut [u8] {
                self.buffer.as_mut_slice()
            }
        }

        impl<B> $Fragment<B>
        where
            B: AsMutSlice<Element = u8> + Resize,
        {
            /// Fills the payload with the given data and adjusts the length of the fragment
            ///
            /// # Panics
            ///
            /// This method panics if `payload` doesn't fit in the buffer
            pub fn set_payload(&mut self, payload: &[u8]) {
                let plen = payload.len();
                self.payload_mut()[..plen].copy_from_slice(payload);
                self.buffer.truncate(u16::from($HEADER_SIZE) + plen as u16);
            }
        }
    };
}

common!(FirstFragment, FRAG1, FRAG1_HEADER_SIZE);
common!(NextFragment, FRAGN, FRAGN_HEADER_SIZE);

impl<B> FirstFragment<B>
where
    B: AsMutSlice<Element = u8>,
{
    /// Writes a FRAG1 header at the start of `buffer`
    ///
    /// # Panics
    ///
    /// This constructor panics if `buffer` is smaller than the header or if `datagram_size`
    /// doesn't fit in 11 bits
    pub fn new(mut buffer: B, datagram_size: u16, tag: u16) -> Self {
        init(buffer.as_mut_slice(), FRAG1, datagram_size, tag);

        FirstFragment { buffer }
    }
}

impl<B> NextFragment<B>
where
    B: AsSlice<Element = u8>,
{
    /// Reads the 'datagram_offset' field, in units of 8 octets
    pub fn get_datagram_offset(&self) -> u8 {
        self.as_slice()[OFFSET]
    }

    /// Offset of this fragment within the datagram, in bytes
    pub fn offset(&self) -> u16 {
        u16::from(self.get_datagram_offset()) * 8
    }
}

impl<B> NextFragment<B>
where
    B: AsMutSlice<Element = u8>,
{
    /// Writes a FRAGN header at the start of `buffer`
    ///
    /// `offset` is in units of 8 octets
    ///
    /// # Panics
    ///
    /// This constructor panics if `buffer` is smaller than the header or if `datagram_size`
    /// doesn't fit in 11 bits
    pub fn new(mut buffer: B, datagram_size: u16, tag: u16, offset: u8) -> Self {
        init(buffer.as_mut_slice(), FRAGN, datagram_size, tag);
        buffer.as_mut_slice()[OFFSET] = offset;

        NextFragment { buffer }
    }
}

impl<B> fmt::Debug for FirstFragment<B>
where
    B: AsSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("frag::FirstFragment")
            .field("datagram_size", &self.get_datagram_size())
            .field("datagram_tag", &Hex(self.get_datagram_tag()))
            .finish()
    }
}

impl<B> fmt::Debug for NextFragment<B>
where
    B: AsSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("frag::NextFragment")
            .field("datagram_size", &self.get_datagram_size())
            .field("datagram_tag", &Hex(self.get_datagram_tag()))
            .field("datagram_offset", &self.get_datagram_offset())
            .finish()
    }
}
