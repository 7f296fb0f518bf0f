//! Fragment reassembly buffer
//!
//! [`Rbuf`] tracks up to `SLOTS` datagrams at once. Each datagram being reassembled is bound to
//! a slot keyed by `(source, destination, size, tag)`; the byte ranges received so far are
//! recorded in a pool of `INTERVALS` nodes shared by all the slots.
//!
//! Every call to [`Rbuf::add`] first reclaims the slots that timed out, then finds (or binds) the
//! slot for the incoming fragment, validates the fragment against what the slot already has and
//! copies it in. Once all the bytes of a datagram are in, the datagram is handed to the
//! [`Upstream`] layer and the slot is released.
//!
//! Nothing here is ever reported back to the sender; a discarded fragment or datagram simply
//! never shows up upstream. The [`Discard`] values returned by `add` exist for logging and tests.

use core::fmt;

use as_slice::{AsMutSlice, AsSlice};
use cast::{u16, usize};

use crate::{
    buf::Buffer,
    fmt::{Hex, Quoted},
    ieee802154 as ll, ipv6,
    pktbuf::Alloc,
    sixlowpan::{iphc, Dispatch},
    time::Instant,
};

mod ints;

pub use self::ints::Iter;
use self::ints::Intervals;

/// Number of reassembly slots used when none is specified
pub const DEFAULT_SLOTS: usize = 4;

/// Number of interval nodes used when none is specified
///
/// Enough to reassemble `DEFAULT_SLOTS` 1280-byte datagrams split in 32-byte fragments
pub const DEFAULT_INTERVALS: usize = (1280 + 31) / 32 * DEFAULT_SLOTS;

/// Runtime configuration
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// A slot that hasn't seen a fragment in *more* than this many ticks is reclaimed
    pub timeout: u32,
    /// What to do when a fragment overlaps data that was already received
    pub overlap: Overlap,
}

impl Config {
    /// 3 seconds of a microsecond clock; permissive overlap policy
    pub const DEFAULT: Config = Config {
        timeout: 3_000_000,
        overlap: Overlap::Permissive,
    };
}

impl Default for Config {
    fn default() -> Self {
        Config::DEFAULT
    }
}

/// Overlap policy (RFC 4944, Section 5.3)
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Overlap {
    /// A fragment that exactly matches an already received range is a retransmission: its bytes
    /// are copied again and nothing else changes. Any other overlap discards the datagram
    Permissive,
    /// Any overlap, exact retransmissions included, discards the datagram
    Strict,
}

/// Link-layer metadata of a received frame
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkInfo {
    /// Interface the frame came in through
    pub iface: u8,
    /// Source link-layer address
    pub src: ll::Addr,
    /// Destination link-layer address
    pub dst: ll::Addr,
    /// Received signal strength, in dBm
    pub rssi: i8,
    /// Link quality indicator
    pub lqi: u8,
}

/// A fragment, with its 6LoWPAN fragmentation header already stripped
#[derive(Clone, Copy, Debug)]
pub struct Fragment<'a> {
    /// Metadata of the frame that carried this fragment
    pub link: LinkInfo,
    /// Size of the whole datagram, after header decompression
    pub size: u16,
    /// Datagram tag
    pub tag: u16,
    /// Offset of this fragment within the datagram, in bytes
    pub offset: u16,
    /// Fragment payload
    pub payload: &'a [u8],
}

/// Identity of a datagram being reassembled
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Key {
    /// Source link-layer address
    pub src: ll::Addr,
    /// Destination link-layer address
    pub dst: ll::Addr,
    /// Datagram size
    pub size: u16,
    /// Datagram tag
    pub tag: u16,
}

/// Outcome of a fragment that was accepted
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    /// The datagram is still missing some bytes
    Pending,
    /// The datagram is complete and was handed to the upstream layer
    Complete {
        /// Whether the upstream layer took the datagram
        accepted: bool,
    },
}

/// Reason why a fragment was dropped
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Discard {
    /// No packet buffer for a new datagram; no slot was bound
    NoBuffer,
    /// The fragment extends past the end of the datagram; the datagram was discarded
    TooBig,
    /// The fragment overlaps data that was already received; the datagram was discarded
    Overlap,
    /// The compressed header of the first fragment couldn't be expanded; the datagram was
    /// discarded
    Decompression,
    /// The interval pool is exhausted; only this fragment was dropped
    NoInterval,
}

/// A reassembled datagram
pub struct Datagram<CHUNK>
where
    CHUNK: AsSlice<Element = u8>,
{
    buffer: Buffer<CHUNK>,
    link: LinkInfo,
}

impl<C> Datagram<C>
where
    C: AsSlice<Element = u8>,
{
    /// Wraps a datagram that never needed reassembly
    pub fn new(buffer: Buffer<C>, link: LinkInfo) -> Self {
        Datagram { buffer, link }
    }

    /// The reassembled IPv6 datagram
    pub fn payload(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Metadata of the *last* fragment of this datagram
    pub fn link(&self) -> &LinkInfo {
        &self.link
    }

    /// IPv6 view into the payload
    pub fn packet(&self) -> Option<ipv6::Packet<&[u8]>> {
        ipv6::Packet::parse(self.payload()).ok()
    }

    /// Takes ownership of the buffer
    pub fn free(self) -> Buffer<C> {
        self.buffer
    }
}

impl<C> fmt::Debug for Datagram<C>
where
    C: AsSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("rbuf::Datagram")
            .field("len", &self.buffer.len())
            .field("link", &self.link)
            .finish()
    }
}

/// Consumer of reassembled datagrams
pub trait Upstream<CHUNK>
where
    CHUNK: AsSlice<Element = u8>,
{
    /// Hands over a datagram; returns `false` if the datagram was not taken
    ///
    /// The buffer is released when `datagram` is dropped, whatever the return value
    fn receive(&mut self, datagram: Datagram<CHUNK>) -> bool;
}

/// `None` stands for "no receiver registered": datagrams are dropped
impl<C, U> Upstream<C> for Option<U>
where
    C: AsSlice<Element = u8>,
    U: Upstream<C>,
{
    fn receive(&mut self, datagram: Datagram<C>) -> bool {
        match self {
            Some(upstream) => upstream.receive(datagram),
            None => {
                net_debug!("rbuf: no receiver; dropping {} byte datagram", datagram.buffer.len());
                false
            }
        }
    }
}

struct Entry<C>
where
    C: AsMutSlice<Element = u8>,
{
    key: Key,
    buffer: Buffer<C>,
    received: u16,
    arrival: Instant,
    ints: Option<u16>,
}

/// Reassembly buffer
pub struct Rbuf<C, const SLOTS: usize = DEFAULT_SLOTS, const INTERVALS: usize = DEFAULT_INTERVALS>
where
    C: AsMutSlice<Element = u8>,
{
    config: Config,
    slots: [Option<Entry<C>>; SLOTS],
    ints: Intervals<INTERVALS>,
}

impl<C, const SLOTS: usize, const INTERVALS: usize> Rbuf<C, SLOTS, INTERVALS>
where
    C: AsMutSlice<Element = u8>,
{
    /// Creates an empty reassembly buffer
    ///
    /// # Panics
    ///
    /// This constructor panics if `INTERVALS` is greater than `u16::MAX`
    pub fn new(config: Config) -> Self {
        Rbuf {
            config,
            slots: core::array::from_fn(|_| None),
            ints: Intervals::new(),
        }
    }

    /// Returns the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Adds a fragment
    ///
    /// Runs the timeout sweep, then looks up the slot of the fragment's datagram (binding a new
    /// one if needed) and copies the fragment in. If that completes the datagram, the datagram
    /// is handed to `upstream` and the slot is released.
    ///
    /// When all slots are taken, the one that saw a fragment the longest time ago is discarded
    /// to make room for a new datagram, no matter how much of it was already received.
    ///
    /// A fragment with an empty payload is ignored; it never binds (or evicts) a slot.
    pub fn add<A, U>(
        &mut self,
        alloc: &mut A,
        upstream: &mut U,
        now: Instant,
        frag: Fragment<'_>,
    ) -> Result<Progress, Discard>
    where
        A: Alloc<Chunk = C> + ?Sized,
        U: Upstream<C> + ?Sized,
    {
        self.gc(now);

        if frag.payload.is_empty() {
            net_trace!("rbuf: empty fragment (tag {:#06x}); ignoring", frag.tag);

            return Ok(Progress::Pending);
        }

        net_trace!(
            "rbuf: {} -> {} size={} tag={:#06x} offset={} len={}",
            frag.link.src,
            frag.link.dst,
            frag.size,
            frag.tag,
            frag.offset,
            frag.payload.len(),
        );

        let key = Key {
            src: frag.link.src,
            dst: frag.link.dst,
            size: frag.size,
            tag: frag.tag,
        };

        let index = self.lookup(alloc, now, key)?;

        let overlap = self.config.overlap;
        let entry = match self.slots[index] {
            Some(ref mut entry) => entry,
            None => unreachable!(),
        };

        match entry.admit(&mut self.ints, overlap, &frag) {
            Ok(false) => Ok(Progress::Pending),
            Ok(true) => {
                let entry = match self.slots[index].take() {
                    Some(entry) => entry,
                    None => unreachable!(),
                };
                self.ints.release(entry.ints);

                net_debug!(
                    "rbuf: {} byte datagram from {} (tag {:#06x}) complete",
                    entry.key.size,
                    entry.key.src,
                    entry.key.tag,
                );

                // "last fragment wins"
                let accepted = upstream.receive(Datagram {
                    buffer: entry.buffer,
                    link: frag.link,
                });

                Ok(Progress::Complete { accepted })
            }
            Err(Discard::NoInterval) => {
                net_debug!("rbuf: interval pool exhausted; dropping fragment");

                Err(Discard::NoInterval)
            }
            Err(e) => {
                net_debug!(
                    "rbuf: {:?}; discarding datagram from {} (tag {:#06x})",
                    e,
                    key.src,
                    key.tag
                );
                self.remove(index);

                Err(e)
            }
        }
    }

    /// Discards every datagram that hasn't seen a fragment in more than `timeout` ticks
    ///
    /// Returns the number of discarded datagrams
    pub fn gc(&mut self, now: Instant) -> usize {
        let timeout = self.config.timeout;

        let mut n = 0;
        for index in 0..SLOTS {
            let expired = self.slots[index]
                .as_ref()
                .map(|entry| now.elapsed_since(entry.arrival) > timeout)
                .unwrap_or(false);

            if expired {
                net_debug!("rbuf: slot {} timed out", index);
                self.remove(index);
                n += 1;
            }
        }

        n
    }

    /// Discards the datagram bound to slot `index`, if any
    ///
    /// Returns `true` if there was a datagram
    pub fn rm(&mut self, index: usize) -> bool {
        index < SLOTS && self.remove(index)
    }

    /// Datagrams being reassembled
    pub fn entries(&self) -> impl Iterator<Item = Slot<'_, C>> + '_ {
        let ints = &self.ints;
        self.slots
            .iter()
            .enumerate()
            .filter_map(move |(index, slot)| {
                slot.as_ref().map(|entry| Slot {
                    index,
                    entry,
                    intervals: ints.iter(entry.ints),
                })
            })
    }

    /// Number of datagrams being reassembled
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Is there no datagram being reassembled?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of interval nodes in use
    pub fn intervals_in_use(&self) -> usize {
        self.ints.in_use()
    }

    /* Private */
    // Returns the slot bound to `key`, binding a free (or evicted) slot if there's none
    fn lookup<A>(&mut self, alloc: &mut A, now: Instant, key: Key) -> Result<usize, Discard>
    where
        A: Alloc<Chunk = C> + ?Sized,
    {
        let mut free = None;
        // (index, age)
        let mut oldest: Option<(usize, u32)> = None;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(entry) => {
                    if entry.key == key {
                        entry.arrival = now;
                        return Ok(index);
                    }

                    let age = now.elapsed_since(entry.arrival);
                    if oldest.map(|(_, oldest)| age > oldest).unwrap_or(true) {
                        oldest = Some((index, age));
                    }
                }
                None => {
                    if free.is_none() {
                        free = Some(index);
                    }
                }
            }
        }

        let index = match (free, oldest) {
            (Some(index), _) => index,
            (None, Some((index, age))) => {
                net_debug!("rbuf: evicting slot {} (idle for {} ticks)", index, age);
                self.remove(index);
                index
            }
            // zero slots
            (None, None) => return Err(Discard::NoBuffer),
        };

        let buffer = alloc
            .alloc(key.size)
            .and_then(|chunk| Buffer::with_len(chunk, key.size).ok());

        match buffer {
            Some(buffer) => {
                self.slots[index] = Some(Entry {
                    key,
                    buffer,
                    received: 0,
                    arrival: now,
                    ints: None,
                });

                Ok(index)
            }
            None => {
                net_debug!("rbuf: couldn't allocate {} bytes", key.size);

                Err(Discard::NoBuffer)
            }
        }
    }

    fn remove(&mut self, index: usize) -> bool {
        if let Some(entry) = self.slots[index].take() {
            self.ints.release(entry.ints);
            // NOTE dropping `entry` returns its buffer to the allocator
            true
        } else {
            false
        }
    }
}

impl<C> Entry<C>
where
    C: AsMutSlice<Element = u8>,
{
    // Returns `true` if the datagram is now complete
    fn admit<const N: usize>(
        &mut self,
        ints: &mut Intervals<N>,
        overlap: Overlap,
        frag: &Fragment<'_>,
    ) -> Result<bool, Discard> {
        let mut data = frag.payload;
        // bytes written in front of `data` by header decompression
        let mut header = 0;

        if frag.offset == 0 {
            match Dispatch::of_payload(data) {
                Some(Dispatch::Ipv6) => data = &data[1..],
                Some(Dispatch::Iphc) => {
                    let packet = iphc::Packet::parse(data).map_err(|_| Discard::Decompression)?;
                    let ctxt = iphc::Context {
                        source: Some(frag.link.src),
                        destination: Some(frag.link.dst),
                    };
                    let sizes = packet
                        .decompress(&ctxt, self.buffer.as_mut_slice())
                        .map_err(|_| Discard::Decompression)?;

                    data = &data[usize(sizes.consumed)..];
                    header = sizes.written;
                }
                _ => {}
            }
        }

        let len = u16(data.len())
            .ok()
            .and_then(|len| len.checked_add(header))
            .ok_or(Discard::TooBig)?;

        if len == 0 {
            // nothing to record but a zero-sized datagram is already complete
            return Ok(self.received == self.key.size);
        }

        if u32::from(frag.offset) + u32::from(len) > u32::from(self.key.size) {
            return Err(Discard::TooBig);
        }

        let start = frag.offset;
        let end = frag.offset + len - 1;

        let mut duplicate = false;
        for range in ints.iter(self.ints) {
            if start <= *range.end() && *range.start() <= end {
                if overlap == Overlap::Permissive && start == *range.start() && end == *range.end()
                {
                    duplicate = true;
                } else {
                    return Err(Discard::Overlap);
                }
            }
        }

        if duplicate {
            net_trace!("rbuf: retransmission of {}..={}", start, end);
        } else {
            self.ints = Some(
                ints.push(self.ints, start, end)
                    .ok_or(Discard::NoInterval)?,
            );
            self.received += len;
        }

        let at = usize(start + header);
        self.buffer.as_mut_slice()[at..at + data.len()].copy_from_slice(data);

        Ok(self.received == self.key.size)
    }
}

/// View into a datagram being reassembled
pub struct Slot<'a, C>
where
    C: AsMutSlice<Element = u8>,
{
    index: usize,
    entry: &'a Entry<C>,
    intervals: Iter<'a>,
}

impl<'a, C> Slot<'a, C>
where
    C: AsMutSlice<Element = u8>,
{
    /// Position in the slot table
    pub fn index(&self) -> usize {
        self.index
    }

    /// Identity of the datagram
    pub fn key(&self) -> &Key {
        &self.entry.key
    }

    /// Bytes received so far, expanded headers included
    pub fn received(&self) -> u16 {
        self.entry.received
    }

    /// When the last fragment of this datagram arrived
    pub fn arrival(&self) -> Instant {
        self.entry.arrival
    }

    /// Byte ranges received so far, most recent first
    pub fn intervals(&self) -> Iter<'a> {
        self.intervals.clone()
    }
}

impl<'a, C> fmt::Debug for Slot<'a, C>
where
    C: AsMutSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.key();

        f.debug_struct("rbuf::Slot")
            .field("index", &self.index)
            .field("src", &Quoted(key.src))
            .field("dst", &Quoted(key.dst))
            .field("size", &key.size)
            .field("tag", &Hex(key.tag))
            .field("received", &self.received())
            .field("arrival", &self.arrival())
            .field("intervals", &self.intervals)
            .finish()
    }
}

impl<C, const SLOTS: usize, const INTERVALS: usize> fmt::Debug for Rbuf<C, SLOTS, INTERVALS>
where
    C: AsMutSlice<Element = u8>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, format, rc::Rc, vec, vec::Vec};

    use as_slice::{AsMutSlice, AsSlice};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{
        Config, Datagram, Discard, Fragment, Key, LinkInfo, Overlap, Progress, Rbuf, Upstream,
    };
    use crate::{
        ieee802154::{Addr, ExtendedAddr, ShortAddr},
        ipv6,
        pktbuf::Alloc,
        time::Instant,
    };

    // Allocator that keeps track of the chunks that are still alive
    #[derive(Default)]
    struct Counting {
        live: Rc<Cell<usize>>,
        exhausted: bool,
    }

    struct Chunk {
        bytes: Vec<u8>,
        live: Rc<Cell<usize>>,
    }

    impl Counting {
        fn live(&self) -> usize {
            self.live.get()
        }
    }

    impl Alloc for Counting {
        type Chunk = Chunk;

        fn alloc(&mut self, size: u16) -> Option<Chunk> {
            if self.exhausted {
                return None;
            }

            self.live.set(self.live.get() + 1);
            Some(Chunk {
                // NOTE bigger than asked for, like a block allocator would do
                bytes: vec![0xff; usize::from(size) + 16],
                live: self.live.clone(),
            })
        }
    }

    impl Drop for Chunk {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    impl AsSlice for Chunk {
        type Element = u8;

        fn as_slice(&self) -> &[u8] {
            &self.bytes
        }
    }

    impl AsMutSlice for Chunk {
        fn as_mut_slice(&mut self) -> &mut [u8] {
            &mut self.bytes
        }
    }

    #[derive(Default)]
    struct Sink {
        datagrams: Vec<(Vec<u8>, LinkInfo)>,
        reject: bool,
    }

    impl Upstream<Chunk> for Sink {
        fn receive(&mut self, datagram: Datagram<Chunk>) -> bool {
            if self.reject {
                return false;
            }

            self.datagrams
                .push((datagram.payload().to_vec(), *datagram.link()));
            true
        }
    }

    const A: Addr = Addr::Short(ShortAddr(0x0001));
    const B: Addr = Addr::Short(ShortAddr(0x0002));

    fn link(src: Addr) -> LinkInfo {
        LinkInfo {
            iface: 3,
            src,
            dst: B,
            rssi: -40,
            lqi: 200,
        }
    }

    fn frag(size: u16, tag: u16, offset: u16, payload: &[u8]) -> Fragment<'_> {
        Fragment {
            link: link(A),
            size,
            tag,
            offset,
            payload,
        }
    }

    // `len` bytes that start with the uncompressed IPv6 dispatch
    fn first(len: usize) -> Vec<u8> {
        let mut bytes: Vec<u8> = (0..len).map(|i| i as u8).collect();
        bytes[0] = 0x41;
        bytes
    }

    fn body(offset: u16, len: usize) -> Vec<u8> {
        (0..len).map(|i| (usize::from(offset) + i) as u8).collect()
    }

    #[test]
    fn two_fragments() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(101);
        let f1 = body(100, 100);

        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(0), frag(200, 7, 0, &f0)),
            Ok(Progress::Pending)
        );
        assert_eq!(rbuf.len(), 1);
        assert_eq!(rbuf.intervals_in_use(), 1);
        assert_eq!(alloc.live(), 1);

        {
            let slot = rbuf.entries().next().unwrap();
            assert_eq!(
                *slot.key(),
                Key {
                    src: A,
                    dst: B,
                    size: 200,
                    tag: 7
                }
            );
            assert_eq!(slot.received(), 100);
            assert_eq!(slot.intervals().collect::<Vec<_>>(), [0..=99]);
        }

        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(1), frag(200, 7, 100, &f1)),
            Ok(Progress::Complete { accepted: true })
        );

        assert!(rbuf.is_empty());
        assert_eq!(rbuf.intervals_in_use(), 0);
        assert_eq!(alloc.live(), 0);

        assert_eq!(sink.datagrams.len(), 1);
        let expected: Vec<u8> = f0[1..].iter().chain(f1.iter()).cloned().collect();
        assert_eq!(sink.datagrams[0].0, expected);
    }

    #[test]
    fn out_of_order() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(97);
        let f1 = body(96, 96);
        let f2 = body(192, 60);

        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(0), frag(252, 1, 192, &f2)),
            Ok(Progress::Pending)
        );
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(1), frag(252, 1, 0, &f0)),
            Ok(Progress::Pending)
        );
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(2), frag(252, 1, 96, &f1)),
            Ok(Progress::Complete { accepted: true })
        );

        let expected: Vec<u8> = f0[1..]
            .iter()
            .chain(f1.iter())
            .chain(f2.iter())
            .cloned()
            .collect();
        assert_eq!(sink.datagrams[0].0, expected);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn partial_overlap() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(81);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(0), frag(150, 3, 0, &f0)),
            Ok(Progress::Pending)
        );

        // [40, 79] overlaps [0, 79]
        let bad = body(40, 40);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(1), frag(150, 3, 40, &bad)),
            Err(Discard::Overlap)
        );
        assert!(rbuf.is_empty());
        assert_eq!(rbuf.intervals_in_use(), 0);
        assert_eq!(alloc.live(), 0);

        // the datagram starts from scratch
        let f1 = body(80, 70);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(2), frag(150, 3, 80, &f1)),
            Ok(Progress::Pending)
        );
        assert_eq!(rbuf.entries().next().map(|s| s.received()), Some(70));
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(3), frag(150, 3, 0, &f0)),
            Ok(Progress::Complete { accepted: true })
        );
        assert_eq!(sink.datagrams.len(), 1);
        assert_eq!(sink.datagrams[0].0.len(), 150);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn retransmission() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(65);
        for now in 0..3 {
            assert_eq!(
                rbuf.add(&mut alloc, &mut sink, Instant(now), frag(128, 9, 0, &f0)),
                Ok(Progress::Pending)
            );
        }

        {
            let slot = rbuf.entries().next().unwrap();
            assert_eq!(slot.received(), 64);
            assert_eq!(slot.arrival(), Instant(2));
        }
        assert_eq!(rbuf.intervals_in_use(), 1);

        let f1 = body(64, 64);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(3), frag(128, 9, 64, &f1)),
            Ok(Progress::Complete { accepted: true })
        );
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn strict_overlap() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config {
            overlap: Overlap::Strict,
            ..Config::DEFAULT
        });

        let f1 = body(64, 64);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(0), frag(192, 9, 64, &f1)),
            Ok(Progress::Pending)
        );
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(1), frag(192, 9, 64, &f1)),
            Err(Discard::Overlap)
        );
        assert!(rbuf.is_empty());
        assert_eq!(alloc.live(), 0);

        // adjacent ranges don't overlap
        let f0 = first(65);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(2), frag(128, 9, 0, &f0)),
            Ok(Progress::Pending)
        );
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(3), frag(128, 9, 64, &f1)),
            Ok(Progress::Complete { accepted: true })
        );
    }

    #[test]
    fn too_big() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(97);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(0), frag(150, 5, 0, &f0)),
            Ok(Progress::Pending)
        );

        // 96 + 100 > 150
        let f1 = body(96, 100);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(1), frag(150, 5, 96, &f1)),
            Err(Discard::TooBig)
        );
        assert!(rbuf.is_empty());
        assert_eq!(rbuf.intervals_in_use(), 0);
        assert_eq!(alloc.live(), 0);

        // a fragment that ends exactly at the end of the datagram is fine
        let f1 = body(96, 54);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(2), frag(150, 5, 96, &f1)),
            Ok(Progress::Pending)
        );
    }

    #[test]
    fn eviction() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(65);
        let f1 = body(64, 64);

        // tag 0 is the most complete datagram but also the one that's been idle the longest
        rbuf.add(&mut alloc, &mut sink, Instant(0), frag(256, 0, 0, &f0))
            .unwrap();
        rbuf.add(&mut alloc, &mut sink, Instant(1), frag(256, 0, 64, &f1))
            .unwrap();
        for tag in 1..4 {
            rbuf.add(
                &mut alloc,
                &mut sink,
                Instant(u32::from(tag) * 10),
                frag(256, tag, 0, &f0),
            )
            .unwrap();
        }
        assert_eq!(rbuf.len(), 4);
        assert_eq!(rbuf.intervals_in_use(), 5);

        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(40), frag(256, 4, 0, &f0)),
            Ok(Progress::Pending)
        );

        let mut tags: Vec<u16> = rbuf.entries().map(|slot| slot.key().tag).collect();
        tags.sort();
        assert_eq!(tags, [1, 2, 3, 4]);
        assert_eq!(rbuf.intervals_in_use(), 4);
        assert_eq!(alloc.live(), 4);

        // the slot of the evicted datagram was reused
        assert_eq!(
            rbuf.entries()
                .find(|slot| slot.key().tag == 4)
                .map(|slot| slot.index()),
            Some(0)
        );
    }

    #[test]
    fn eviction_across_wraparound() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk, 2> = Rbuf::new(Config::DEFAULT);

        let f0 = first(33);

        // the counter wraps between the two arrivals; `Instant(5)` is the newest one
        let t0 = Instant(u32::MAX - 5);
        let t1 = t0.wrapping_add(11);
        assert_eq!(t1, Instant(5));

        rbuf.add(&mut alloc, &mut sink, t0, frag(64, 1, 0, &f0))
            .unwrap();
        rbuf.add(&mut alloc, &mut sink, t1, frag(64, 2, 0, &f0))
            .unwrap();

        rbuf.add(&mut alloc, &mut sink, Instant(6), frag(64, 3, 0, &f0))
            .unwrap();

        let mut tags: Vec<u16> = rbuf.entries().map(|slot| slot.key().tag).collect();
        tags.sort();
        assert_eq!(tags, [2, 3]);
        assert_eq!(alloc.live(), 2);
    }

    #[test]
    fn timeout() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config {
            timeout: 100,
            ..Config::DEFAULT
        });

        let f0 = first(33);
        rbuf.add(&mut alloc, &mut sink, Instant(0), frag(64, 1, 0, &f0))
            .unwrap();

        assert_eq!(rbuf.gc(Instant(100)), 0);
        assert_eq!(rbuf.len(), 1);

        assert_eq!(rbuf.gc(Instant(101)), 1);
        assert!(rbuf.is_empty());
        assert_eq!(rbuf.intervals_in_use(), 0);
        assert_eq!(alloc.live(), 0);

        // across the wrap boundary
        let t0 = Instant(u32::MAX - 49);
        rbuf.add(&mut alloc, &mut sink, t0, frag(64, 1, 0, &f0))
            .unwrap();

        assert_eq!(rbuf.gc(Instant(50)), 0);
        assert_eq!(rbuf.gc(Instant(51)), 1);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn timeout_on_add() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config {
            timeout: 100,
            ..Config::DEFAULT
        });

        let f0 = first(33);
        let f1 = body(32, 32);
        rbuf.add(&mut alloc, &mut sink, Instant(0), frag(64, 1, 0, &f0))
            .unwrap();

        // the stale slot is reclaimed before the lookup so this fragment starts a new datagram
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(500), frag(64, 1, 32, &f1)),
            Ok(Progress::Pending)
        );
        assert_eq!(rbuf.len(), 1);
        assert_eq!(rbuf.entries().next().map(|s| s.received()), Some(32));
        assert_eq!(alloc.live(), 1);
        assert!(sink.datagrams.is_empty());
    }

    #[test]
    fn interval_exhaustion() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk, 4, 2> = Rbuf::new(Config::DEFAULT);

        let f0 = first(9);
        let f1 = body(8, 8);
        let f2 = body(16, 8);

        rbuf.add(&mut alloc, &mut sink, Instant(0), frag(24, 1, 0, &f0))
            .unwrap();
        rbuf.add(&mut alloc, &mut sink, Instant(1), frag(24, 1, 8, &f1))
            .unwrap();

        // the fragment is dropped; the datagram is kept
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(2), frag(24, 1, 16, &f2)),
            Err(Discard::NoInterval)
        );
        assert_eq!(rbuf.len(), 1);
        assert_eq!(rbuf.entries().next().map(|s| s.received()), Some(16));

        // other datagrams are affected too, even though there are free slots
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(3), frag(24, 2, 0, &f0)),
            Err(Discard::NoInterval)
        );
        assert_eq!(rbuf.len(), 2);
        assert_eq!(alloc.live(), 2);

        // releasing the first datagram frees its intervals
        assert!(rbuf.rm(0));
        assert!(!rbuf.rm(0));
        assert!(!rbuf.rm(7));
        assert_eq!(rbuf.intervals_in_use(), 0);
        assert_eq!(alloc.live(), 1);
    }

    #[test]
    fn zero_sized_datagram() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        // only the dispatch byte; nothing left once it's stripped
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(0), frag(0, 1, 0, &[0x41])),
            Ok(Progress::Complete { accepted: true })
        );
        assert!(rbuf.is_empty());
        assert_eq!(rbuf.intervals_in_use(), 0);
        assert_eq!(alloc.live(), 0);

        assert_eq!(sink.datagrams.len(), 1);
        assert!(sink.datagrams[0].0.is_empty());
    }

    #[test]
    fn empty_fragment() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(33);
        for tag in 0..4u16 {
            rbuf.add(
                &mut alloc,
                &mut sink,
                Instant(u32::from(tag)),
                frag(64, tag, 0, &f0),
            )
            .unwrap();
        }

        // the table is full but nothing gets evicted
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(10), frag(10, 9, 8, &[])),
            Ok(Progress::Pending)
        );
        assert_eq!(rbuf.len(), 4);
        assert!(rbuf.entries().any(|slot| slot.key().tag == 0));
        assert_eq!(alloc.live(), 4);

        // nor is a datagram that's already being reassembled touched
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(11), frag(64, 1, 32, &[])),
            Ok(Progress::Pending)
        );
        let slot = rbuf.entries().find(|slot| slot.key().tag == 1).unwrap();
        assert_eq!(slot.received(), 32);
        assert_eq!(slot.arrival(), Instant(1));
        assert_eq!(slot.intervals().count(), 1);
        assert!(sink.datagrams.is_empty());
    }

    #[test]
    fn no_buffer() {
        let mut alloc = Counting {
            exhausted: true,
            ..Counting::default()
        };
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(33);
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(0), frag(64, 1, 0, &f0)),
            Err(Discard::NoBuffer)
        );
        assert!(rbuf.is_empty());
        assert_eq!(rbuf.intervals_in_use(), 0);
    }

    #[test]
    fn no_receiver() {
        let mut alloc = Counting::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(33);
        let f1 = body(32, 32);

        let mut upstream: Option<Sink> = None;
        rbuf.add(&mut alloc, &mut upstream, Instant(0), frag(64, 1, 0, &f0))
            .unwrap();
        assert_eq!(
            rbuf.add(&mut alloc, &mut upstream, Instant(1), frag(64, 1, 32, &f1)),
            Ok(Progress::Complete { accepted: false })
        );
        assert!(rbuf.is_empty());
        assert_eq!(alloc.live(), 0);

        // rejected datagrams are released as well
        let mut sink = Sink {
            reject: true,
            ..Sink::default()
        };
        rbuf.add(&mut alloc, &mut sink, Instant(2), frag(64, 1, 0, &f0))
            .unwrap();
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(3), frag(64, 1, 32, &f1)),
            Ok(Progress::Complete { accepted: false })
        );
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn last_fragment_wins() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(33);
        let f1 = body(32, 32);

        let mut frag0 = frag(64, 1, 0, &f0);
        frag0.link.iface = 1;
        frag0.link.rssi = -90;
        let mut frag1 = frag(64, 1, 32, &f1);
        frag1.link.iface = 2;
        frag1.link.rssi = -30;
        frag1.link.lqi = 10;

        rbuf.add(&mut alloc, &mut sink, Instant(0), frag0).unwrap();
        rbuf.add(&mut alloc, &mut sink, Instant(1), frag1).unwrap();

        assert_eq!(sink.datagrams[0].1, frag1.link);
    }

    #[test]
    fn key() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f0 = first(33);

        rbuf.add(&mut alloc, &mut sink, Instant(0), frag(64, 1, 0, &f0))
            .unwrap();
        // different size
        rbuf.add(&mut alloc, &mut sink, Instant(0), frag(72, 1, 0, &f0))
            .unwrap();
        // different tag
        rbuf.add(&mut alloc, &mut sink, Instant(0), frag(64, 2, 0, &f0))
            .unwrap();
        // same numeric address, different length
        let mut other = frag(64, 1, 0, &f0);
        other.link.src = Addr::Extended(ExtendedAddr(0x0001));
        rbuf.add(&mut alloc, &mut sink, Instant(0), other).unwrap();

        assert_eq!(rbuf.len(), 4);
        assert!(rbuf
            .entries()
            .all(|slot| slot.received() == 32 && slot.intervals().count() == 1));
    }

    #[test]
    fn compressed_first_fragment() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        // 40 (IPv6) + 8 (UDP) + 52 (UDP payload)
        const SIZE: u16 = 100;

        let mut f0 = vec![
            0b011_11_1_11,   // TF elided, NH = LOWPAN_NHC, HLIM = 255
            0b0_0_11_0_0_11, // SAM = DAM = elided
            0b11110_0_00,    // UDP
            0x16,
            0x33,
            0x16,
            0x34,
            0xab,
            0xcd,
        ];
        f0.extend(0..32);
        let f1: Vec<u8> = (32..52).collect();

        // the first fragment expands to 48 + 32 bytes
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(0), frag(SIZE, 1, 80, &f1)),
            Ok(Progress::Pending)
        );
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(1), frag(SIZE, 1, 0, &f0)),
            Ok(Progress::Complete { accepted: true })
        );
        assert_eq!(alloc.live(), 0);

        let bytes = &sink.datagrams[0].0;
        assert_eq!(bytes.len(), usize::from(SIZE));

        let ip = ipv6::Packet::parse(&bytes[..]).unwrap();
        assert_eq!(ip.get_length(), SIZE - 40);
        assert_eq!(ip.get_next_header(), ipv6::NextHeader::Udp);
        assert_eq!(ip.get_hop_limit(), 255);
        assert_eq!(
            ip.get_source(),
            ipv6::Addr([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xfe, 0, 0, 1])
        );
        assert_eq!(
            ip.get_destination(),
            ipv6::Addr([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xfe, 0, 0, 2])
        );

        let udp = ip.payload();
        assert_eq!(&udp[..8], &[0x16, 0x33, 0x16, 0x34, 0, 60, 0xab, 0xcd]);
        let expected: Vec<u8> = (0..52).collect();
        assert_eq!(&udp[8..], &expected[..]);
    }

    #[test]
    fn decompression_failure() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f1 = body(48, 16);
        rbuf.add(&mut alloc, &mut sink, Instant(0), frag(64, 1, 48, &f1))
            .unwrap();

        // elided UDP checksum
        let f0 = [0b011_11_1_11, 0b0_0_11_0_0_11, 0b11110_1_11, 0x12, 0, 0];
        assert_eq!(
            rbuf.add(&mut alloc, &mut sink, Instant(1), frag(64, 1, 0, &f0)),
            Err(Discard::Decompression)
        );
        assert!(rbuf.is_empty());
        assert_eq!(rbuf.intervals_in_use(), 0);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn capacity() {
        const SLOTS: usize = 4;
        const INTERVALS: usize = 12;

        let mut rng = StdRng::seed_from_u64(0x6c6f_7770_616e);
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk, SLOTS, INTERVALS> = Rbuf::new(Config {
            timeout: 1_000,
            ..Config::DEFAULT
        });

        let mut now = Instant(u32::MAX - 5_000);
        let payload = [0u8; 64];
        for _ in 0..5_000 {
            now = now.wrapping_add(rng.gen_range(0..50));

            let tag = rng.gen_range(0..8);
            let offset = rng.gen_range(1..16) * 8;
            let len = rng.gen_range(1..=64);

            let _ = rbuf.add(
                &mut alloc,
                &mut sink,
                now,
                frag(128, tag, offset, &payload[..len]),
            );

            assert!(rbuf.len() <= SLOTS);
            assert!(rbuf.intervals_in_use() <= INTERVALS);
            // every bound slot owns exactly one buffer
            assert_eq!(alloc.live(), rbuf.len());

            for slot in rbuf.entries() {
                assert!(slot.received() <= slot.key().size);
                let total: u16 = slot
                    .intervals()
                    .map(|range| range.end() - range.start() + 1)
                    .sum();
                assert_eq!(total, slot.received());
            }
        }
    }

    #[test]
    fn dump() {
        let mut alloc = Counting::default();
        let mut sink = Sink::default();
        let mut rbuf: Rbuf<Chunk> = Rbuf::new(Config::DEFAULT);

        let f1 = body(96, 96);
        rbuf.add(&mut alloc, &mut sink, Instant(7), frag(348, 0x690e, 96, &f1))
            .unwrap();

        let dump = format!("{:?}", rbuf);
        assert!(dump.contains("tag: 0x690e"));
        assert!(dump.contains("received: 96"));
        assert!(dump.contains("96..=191"));
        assert!(dump.contains("Instant(7)"));
    }
}
