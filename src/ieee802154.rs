//! IEEE 802.15.4
//!
//! # References
//!
//! - [IEEE 802.15.4-2003 standard][standard], Section 7.2.1 General MAC frame format
//!
//! [standard]: https://www.iith.ac.in/~tbr/teaching/docs/802.15.4-2003.pdf

// NOTE(dev) unlike other networking protocol 802.15.4 uses the LITTLE endian byte order

use core::fmt;

use as_slice::{AsMutSlice, AsSlice};
use byteorder::{ByteOrder, NetworkEndian as NE, LE};

use crate::{buf::Resize, traits::UncheckedIndex};

/* Frame format (Section 7.2.1) */
// Frame control low byte
const CONTROLL: usize = 0;
mod frame_type {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = 0;
    pub const SIZE: u8 = 3;
}

mod security_enabled {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = super::frame_type::OFFSET + super::frame_type::SIZE;
    pub const SIZE: u8 = 1;
}

mod frame_pending {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = super::security_enabled::OFFSET + super::security_enabled::SIZE;
    pub const SIZE: u8 = 1;
}

mod ack_request {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = super::frame_pending::OFFSET + super::frame_pending::SIZE;
    pub const SIZE: u8 = 1;
}

mod intra_pan {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = super::ack_request::OFFSET + super::ack_request::SIZE;
    pub const SIZE: u8 = 1;
}

// Frame control high byte
const CONTROLH: usize = 1;
mod dest_addr_mode {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = 2;
    pub const SIZE: u8 = 2;
}

mod src_addr_mode {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: u8 = 6;
    pub const SIZE: u8 = 2;
}

// Sequence number
const SEQUENCE: usize = 2;

const HEADER_SIZE: u8 = SEQUENCE as u8 + 1;

const PAN_ID_SIZE: u8 = 2;

/// IEEE 802.15.4 MAC frame
#[derive(Clone, Copy)]
pub struct Frame<BUFFER>
where
    BUFFER: AsSlice<Element = u8>,
{
    buffer: BUFFER,
    payload: u8,
}

impl<B> Frame<B>
where
    B: AsSlice<Element = u8>,
{
    /* Constructors */
    /// Parses bytes into an 802.15.4 frame
    pub fn parse(bytes: B) -> Result<Self, B> {
        match Self::header_len(bytes.as_slice()) {
            Ok(payload) => Ok(Frame {
                payload,
                buffer: bytes,
            }),
            Err(()) => Err(bytes),
        }
    }

    /* Accessors */
    /// Reads the 'Frame type' field
    pub fn get_type(&self) -> Type {
        Type::from(get!(self.header_()[CONTROLL], frame_type))
    }

    /// Reads the 'Security enabled' field
    pub fn get_security_enabled(&self) -> bool {
        get!(self.header_()[CONTROLL], security_enabled) == 1
    }

    /// Reads the 'Frame pending' field
    pub fn get_frame_pending(&self) -> bool {
        get!(self.header_()[CONTROLL], frame_pending) == 1
    }

    /// Reads the 'Ack. request' field
    pub fn get_ack_request(&self) -> bool {
        get!(self.header_()[CONTROLL], ack_request) == 1
    }

    /// Reads the 'Intra-PAN' field
    pub fn get_intra_pan(&self) -> bool {
        get!(self.header_()[CONTROLL], intra_pan) == 1
    }

    /// Reads the 'Dest. addressing mode' field
    pub fn get_dest_addr_mode(&self) -> AddrMode {
        unsafe { AddrMode::unchecked(get!(self.header_()[CONTROLH], dest_addr_mode)) }
    }

    /// Reads the 'Source addressing mode' field
    pub fn get_src_addr_mode(&self) -> AddrMode {
        unsafe { AddrMode::unchecked(get!(self.header_()[CONTROLH], src_addr_mode)) }
    }

    /// Reads the 'Sequence number' field
    pub fn get_sequence_number(&self) -> u8 {
        self.header_()[SEQUENCE]
    }

    /// Reads the 'Destination PAN identifier' field
    pub fn get_dest_pan_id(&self) -> Option<PanId> {
        // See 7.2.1.3 Destination PAN identifier field
        if self.get_dest_addr_mode() == AddrMode::None {
            None
        } else {
            let start = usize::from(HEADER_SIZE);
            Some(PanId(LE::read_u16(unsafe {
                self.as_slice().r(start..start + 2)
            })))
        }
    }

    /// Reads the 'Destination address' field
    pub fn get_dest_addr(&self) -> Option<Addr> {
        let mut start = HEADER_SIZE;

        if self.get_dest_pan_id().is_some() {
            start += PAN_ID_SIZE;
        }

        self.read_addr(self.get_dest_addr_mode(), start)
    }

    /// Reads the 'Source PAN identifier' field
    pub fn get_src_pan_id(&self) -> Option<PanId> {
        // See 7.2.1.5 Source PAN identifier field
        if self.get_src_addr_mode() != AddrMode::None && !self.get_intra_pan() {
            let start = usize::from(self.src_pan_id_start());

            Some(PanId(LE::read_u16(unsafe {
                self.as_slice().r(start..start + 2)
            })))
        } else {
            None
        }
    }

    /// Reads the 'Source address' field
    pub fn get_src_addr(&self) -> Option<Addr> {
        let mut start = self.src_pan_id_start();

        if self.get_src_pan_id().is_some() {
            start += PAN_ID_SIZE;
        }

        self.read_addr(self.get_src_addr_mode(), start)
    }

    /// Returns an immutable view into the header
    pub fn header(&self) -> &[u8] {
        unsafe { self.as_slice().rt(..usize::from(self.payload)) }
    }

    /// Returns an immutable view into the payload
    pub fn payload(&self) -> &[u8] {
        unsafe { self.as_slice().rf(usize::from(self.payload)..) }
    }

    /// Returns the byte representation of this frame
    pub fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }

    /* Miscellaneous */
    /// Frees the underlying buffer
    pub fn free(self) -> B {
        self.buffer
    }

    /* Private */
    // Validates the header and returns its length
    fn header_len(slice: &[u8]) -> Result<u8, ()> {
        if slice.len() < usize::from(HEADER_SIZE) {
            // too small
            return Err(());
        }

        let ftype = Type::from(get!(slice[CONTROLL], frame_type));
        let dest_addr_mode = AddrMode::checked(get!(slice[CONTROLH], dest_addr_mode)).ok_or(())?;
        let src_addr_mode = AddrMode::checked(get!(slice[CONTROLH], src_addr_mode)).ok_or(())?;
        let intra_pan = get!(slice[CONTROLL], intra_pan) == 1;

        // 7.2.1.1.6 Destination addressing mode subfield
        //
        // "If this subfield is equal to 0 and the frame type subfield does not specify that this
        // frame is an acknowledgment or beacon frame, the source addressing mode subfield shall be
        // nonzero"
        //
        // 7.2.1.1.7 Source addressing mode subfield
        //
        // "If this subfield is equal to 0 and the frame type subfield does not specify that this
        // frame is an acknowledgment frame, the destination addressing mode subfield shall be
        // nonzero"
        if dest_addr_mode == AddrMode::None
            && src_addr_mode == AddrMode::None
            && ftype != Type::Acknowledgment
        {
            return Err(());
        }

        let mut len = HEADER_SIZE + dest_addr_mode.size() + src_addr_mode.size();

        // 7.2.1.3 Destination PAN identifier field
        //
        // "This field shall be included in the MAC frame only if the destination addressing mode
        // subfield of the frame control field is nonzero."
        if dest_addr_mode != AddrMode::None {
            len += PAN_ID_SIZE;
        }

        // 7.2.1.5 Source PAN identifier field
        //
        // "This field shall be included in the MAC frame only if the source addressing mode and
        // intra-PAN subfields of the frame control field are nonzero and equal to zero,
        // respectively."
        if src_addr_mode != AddrMode::None && !intra_pan {
            len += PAN_ID_SIZE;
        }

        if slice.len() < usize::from(len) {
            // too small
            Err(())
        } else {
            Ok(len)
        }
    }

    fn src_pan_id_start(&self) -> u8 {
        let mut start = HEADER_SIZE;

        if self.get_dest_pan_id().is_some() {
            start += PAN_ID_SIZE;
        }

        start + self.get_dest_addr_mode().size()
    }

    fn read_addr(&self, mode: AddrMode, start: u8) -> Option<Addr> {
        let start = usize::from(start);

        Some(match mode {
            AddrMode::None => return None,
            AddrMode::Short => Addr::Short(ShortAddr(LE::read_u16(unsafe {
                self.as_slice().r(start..start + 2)
            }))),
            AddrMode::Extended => Addr::Extended(ExtendedAddr(LE::read_u64(unsafe {
                self.as_slice().r(start..start + 8)
            }))),
        })
    }

    fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    fn header_(&self) -> &[u8; HEADER_SIZE as usize] {
        debug_assert!(self.as_slice().len() >= HEADER_SIZE as usize);

        unsafe { &*(self.as_slice().as_ptr() as *const _) }
    }
}

impl<B> fmt::Debug for Frame<B>
where
    B: AsSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::fmt::{Display, Quoted};

        let mut s = f.debug_struct("ieee802154::Frame");
        s.field("type", &self.get_type())
            .field("security_enabled", &self.get_security_enabled())
            .field("frame_pending", &self.get_frame_pending())
            .field("ack_request", &self.get_ack_request())
            .field("intra_pan", &self.get_intra_pan())
            .field("dest_addr_mode", &self.get_dest_addr_mode())
            .field("src_addr_mode", &self.get_src_addr_mode())
            .field("sequence_number", &self.get_sequence_number());

        if let Some(pan_id) = self.get_dest_pan_id() {
            s.field("dest_pan_id", &Display(pan_id));
        }
        if let Some(addr) = self.get_dest_addr() {
            s.field("dest_addr", &Quoted(addr));
        }

        if let Some(pan_id) = self.get_src_pan_id() {
            s.field("src_pan_id", &Display(pan_id));
        }
        if let Some(addr) = self.get_src_addr() {
            s.field("src_addr", &Quoted(addr));
        }

        s.field("payload_len", &self.payload().len());
        s.finish()
    }
}

impl<B> Frame<B>
where
    B: AsMutSlice<Element = u8>,
{
    /* Constructors */
    /// Creates a new data frame from the given buffer
    ///
    /// # Panics
    ///
    /// This constructor panics if `buffer` can't hold the MAC header
    pub fn data(mut buffer: B, src_dest: SrcDest) -> Self {
        let payload = HEADER_SIZE + src_dest.size();
        assert!(buffer.as_slice().len() >= usize::from(payload));

        // Zero the frame control field and sequence number
        buffer.as_mut_slice()[..usize::from(HEADER_SIZE)].copy_from_slice(&[0, 0, 0]);
        let mut frame = Frame { buffer, payload };

        frame.set_frame_type(Type::Data);

        let mut start = HEADER_SIZE;
        match src_dest {
            SrcDest::IntraPan {
                pan_id,
                src_addr,
                dest_addr,
            } => {
                frame.set_intra_pan(1);

                start = frame.write_pan_id(start, pan_id);
                frame.set_dest_addr_mode(dest_addr.mode());
                start = frame.write_addr(start, dest_addr);
                frame.set_src_addr_mode(src_addr.mode());
                frame.write_addr(start, src_addr);
            }
            SrcDest::InterPan {
                src_pan_id,
                src_addr,
                dest_pan_id,
                dest_addr,
            } => {
                start = frame.write_pan_id(start, dest_pan_id);
                frame.set_dest_addr_mode(dest_addr.mode());
                start = frame.write_addr(start, dest_addr);
                start = frame.write_pan_id(start, src_pan_id);
                frame.set_src_addr_mode(src_addr.mode());
                frame.write_addr(start, src_addr);
            }
        }

        frame
    }

    /* Setters */
    /// Returns a mutable view into the payload
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = usize::from(self.payload);
        unsafe { self.as_mut_slice().rfm(start..) }
    }

    fn set_frame_type(&mut self, ftype: Type) {
        set!(self.header_mut_()[CONTROLL], frame_type, u8::from(ftype))
    }

    fn set_intra_pan(&mut self, ip: u8) {
        set!(self.header_mut_()[CONTROLL], intra_pan, ip)
    }

    fn set_dest_addr_mode(&mut self, am: AddrMode) {
        set!(self.header_mut_()[CONTROLH], dest_addr_mode, u8::from(am))
    }

    fn set_src_addr_mode(&mut self, am: AddrMode) {
        set!(self.header_mut_()[CONTROLH], src_addr_mode, u8::from(am))
    }

    /* Private */
    fn write_pan_id(&mut self, start: u8, pan_id: PanId) -> u8 {
        let start = usize::from(start);
        LE::write_u16(&mut self.as_mut_slice()[start..start + 2], pan_id.0);
        (start as u8) + PAN_ID_SIZE
    }

    fn write_addr(&mut self, start: u8, addr: Addr) -> u8 {
        let ustart = usize::from(start);
        match addr {
            Addr::Short(sa) => LE::write_u16(&mut self.as_mut_slice()[ustart..ustart + 2], sa.0),
            Addr::Extended(ea) => {
                LE::write_u64(&mut self.as_mut_slice()[ustart..ustart + 8], ea.0)
            }
        }
        start + addr.mode().size()
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    fn header_mut_(&mut self) -> &mut [u8; HEADER_SIZE as usize] {
        debug_assert!(self.as_slice().len() >= HEADER_SIZE as usize);

        unsafe { &mut *(self.as_mut_slice().as_mut_ptr() as *mut _) }
    }
}

impl<B> Frame<B>
where
    B: AsMutSlice<Element = u8> + Resize,
{
    /// Fills the payload with the given data and adjusts the length of the frame
    ///
    /// # Panics
    ///
    /// This method panics if `payload` doesn't fit in the frame
    pub fn set_payload(&mut self, payload: &[u8]) {
        assert!(self.payload().len() >= payload.len());

        let plen = payload.len();

        self.payload_mut()[..plen].copy_from_slice(payload);
        self.buffer
            .truncate(u16::from(self.payload) + plen as u16);
    }
}

/// Source and destination of a data frame
pub enum SrcDest {
    /// Both nodes are in the same PAN
    IntraPan {
        /// PAN identifier
        pan_id: PanId,
        /// Address of the source node
        src_addr: Addr,
        /// Address of the destination node
        dest_addr: Addr,
    },
    /// Nodes are in different PANs
    InterPan {
        /// Identifier of the PAN the source node is in
        src_pan_id: PanId,
        /// Address of the source node
        src_addr: Addr,
        /// Identifier of the PAN the destination node is in
        dest_pan_id: PanId,
        /// Address of the destination node
        dest_addr: Addr,
    },
}

impl SrcDest {
    fn size(&self) -> u8 {
        match *self {
            SrcDest::IntraPan {
                src_addr,
                dest_addr,
                ..
            } => PAN_ID_SIZE + src_addr.mode().size() + dest_addr.mode().size(),
            SrcDest::InterPan {
                src_addr,
                dest_addr,
                ..
            } => 2 * PAN_ID_SIZE + src_addr.mode().size() + dest_addr.mode().size(),
        }
    }
}

full_range!(
    u8,
    /// Frame type
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Type {
        /// Beacon frame
        Beacon = 0b000,
        /// Data frame
        Data = 0b001,
        /// Acknowledgment frame
        Acknowledgment = 0b010,
        /// MAC command frame
        MacCommand = 0b011,
    }
);

/// Address mode
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddrMode {
    /// PAN identifier and address field are not present
    None = 0b00,
    /// Address field contains a 16 bit short addres
    Short = 0b10,
    /// Address field contains a 64 bit extended address
    Extended = 0b11,
}

impl AddrMode {
    // Returns `None` if bits equals the reserved value (0b01)
    fn checked(bits: u8) -> Option<Self> {
        Some(match bits & 0b11 {
            0b00 => AddrMode::None,
            0b01 => return None,
            0b10 => AddrMode::Short,
            0b11 => AddrMode::Extended,
            _ => unreachable!(),
        })
    }

    unsafe fn unchecked(bits: u8) -> Self {
        match Self::checked(bits) {
            Some(mode) => mode,
            None => debug_unreachable!(),
        }
    }

    // Size of the address field, in bytes
    fn size(self) -> u8 {
        match self {
            AddrMode::None => 0,
            AddrMode::Short => 2,
            AddrMode::Extended => 8,
        }
    }
}

impl From<AddrMode> for u8 {
    fn from(am: AddrMode) -> u8 {
        am as u8
    }
}

/// An address, either short or extended
///
/// Two addresses are only equal if they have the same length *and* the same value; the short
/// address `0x0001` and the extended address `0x0000_0000_0000_0001` are different addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Addr {
    /// Short address
    Short(ShortAddr),
    /// Extended address
    Extended(ExtendedAddr),
}

impl Addr {
    /// Length of the address, in bytes
    pub fn len(&self) -> u8 {
        self.mode().size()
    }

    fn mode(&self) -> AddrMode {
        match *self {
            Addr::Short(_) => AddrMode::Short,
            Addr::Extended(_) => AddrMode::Extended,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Addr::Short(sa) => sa.fmt(f),
            Addr::Extended(ea) => ea.fmt(f),
        }
    }
}

/// PAN identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PanId(pub u16);

impl fmt::Display for PanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl PanId {
    /// Broadcast identifier
    pub const BROADCAST: PanId = PanId(0xffff);
}

/// Short (16-bit) address
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShortAddr(pub u16);

impl fmt::Display for ShortAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<ShortAddr> for Addr {
    fn from(sa: ShortAddr) -> Addr {
        Addr::Short(sa)
    }
}

/// Extended (64-bit) address
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtendedAddr(pub u64);

impl ExtendedAddr {
    // Network endianness bytes
    /// Serializes the address into an array of bytes using network endianness
    pub fn ne_bytes(&self) -> [u8; 8] {
        let mut bytes = [0; 8];
        NE::write_u64(&mut bytes, self.0);
        bytes
    }

    /// Converts the address into an Extended Unique Identifier (EUI-64)
    pub fn eui_64(&self) -> [u8; 8] {
        let mut bytes = self.ne_bytes();

        // toggle the universal / local bit
        bytes[0] ^= 1 << 1;

        bytes
    }
}

// NOTE printed in BIG (Network) endian representation to match the output of `ip link`
impl fmt::Display for ExtendedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut is_first = true;

        for byte in self.ne_bytes().iter() {
            if is_first {
                is_first = false;
            } else {
                f.write_str(":")?;
            }

            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl From<ExtendedAddr> for Addr {
    fn from(ea: ExtendedAddr) -> Addr {
        Addr::Extended(ea)
    }
}
