//! 6LoWPAN fragment reassembly for IEEE 802.15.4 links
//!
//! IPv6 requires a link MTU of at least 1280 bytes; an 802.15.4 frame carries at most 127. RFC
//! 4944 bridges the gap by slicing datagrams into link fragments, each one prefixed with a FRAG1
//! or FRAGN header. This crate is the receiving side of that scheme: it puts the fragments back
//! together and hands complete IPv6 datagrams to an upper layer.
//!
//! There's no IO in here. Frames come in as byte buffers
//! (anything that implements `AsSlice<Element = u8>`) and reassembled datagrams leave as owned
//! [`Buffer`](buf/struct.Buffer.html)s; where the memory comes from is up to the
//! [`Alloc`](pktbuf/trait.Alloc.html) implementation you plug in.
//!
//! All state lives in fixed size tables (see [`Rbuf`](sixlowpan/rbuf/struct.Rbuf.html)) so the
//! memory footprint is known at compile time.
//!
//! # Examples
//!
//! - Reassembling a datagram that was split in two fragments
//!
//! ```
//! use lowpan_rbuf::{
//!     ieee802154::{Addr, ShortAddr},
//!     pktbuf::Alloc,
//!     sixlowpan::rbuf::{Config, Datagram, Fragment, LinkInfo, Progress, Rbuf, Upstream},
//!     time::Instant,
//! };
//!
//! // packet buffer backed by a single static chunk
//! struct Static(Option<&'static mut [u8]>);
//!
//! impl Alloc for Static {
//!     type Chunk = &'static mut [u8];
//!
//!     fn alloc(&mut self, size: u16) -> Option<Self::Chunk> {
//!         if self.0.as_ref().map(|c| c.len()).unwrap_or(0) >= usize::from(size) {
//!             self.0.take()
//!         } else {
//!             None
//!         }
//!     }
//! }
//!
//! struct Sink(usize);
//!
//! impl Upstream<&'static mut [u8]> for Sink {
//!     fn receive(&mut self, datagram: Datagram<&'static mut [u8]>) -> bool {
//!         self.0 = datagram.payload().len();
//!         true
//!     }
//! }
//!
//! static mut CHUNK: [u8; 256] = [0; 256];
//!
//! let mut alloc = Static(Some(unsafe { &mut CHUNK[..] }));
//! let mut sink = Sink(0);
//! let mut rbuf: Rbuf<_> = Rbuf::new(Config::DEFAULT);
//!
//! let link = LinkInfo {
//!     iface: 0,
//!     src: Addr::Short(ShortAddr(0x0001)),
//!     dst: Addr::Short(ShortAddr(0x0002)),
//!     rssi: -60,
//!     lqi: 255,
//! };
//!
//! // 200 byte datagram, tag 7; the first fragment starts with the uncompressed IPv6 dispatch
//! let mut first = [0x60; 101];
//! first[0] = 0x41;
//! let second = [0x54; 100];
//!
//! let frag = Fragment { link, size: 200, tag: 7, offset: 0, payload: &first[..] };
//! assert_eq!(
//!     rbuf.add(&mut alloc, &mut sink, Instant(0), frag),
//!     Ok(Progress::Pending)
//! );
//!
//! let frag = Fragment { link, size: 200, tag: 7, offset: 100, payload: &second[..] };
//! assert_eq!(
//!     rbuf.add(&mut alloc, &mut sink, Instant(10), frag),
//!     Ok(Progress::Complete { accepted: true })
//! );
//! assert_eq!(sink.0, 200);
//! assert!(rbuf.is_empty());
//! ```

#![deny(missing_docs)]
#![deny(rust_2018_compatibility)]
#![deny(rust_2018_idioms)]
#![deny(warnings)]
#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

#[cfg(test)]
extern crate std;

#[macro_use]
mod macros;

mod fmt;
mod traits;

pub mod buf;
pub mod pktbuf;
pub mod time;

// Medium Access Control layer
pub mod ieee802154;

// Network layer
pub mod ipv6;
pub mod sixlowpan;

pub mod netif;
