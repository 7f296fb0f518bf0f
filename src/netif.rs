//! Receive path of a 6LoWPAN network interface
//!
//! The radio driver (or its interrupt handler) pushes [`Message`]s into a single producer single
//! consumer queue; [`Netif::poll`] drains that queue one message at a time. Because a single
//! context owns the `Netif` no locking is needed around the reassembly state.

use as_slice::{AsMutSlice, AsSlice};
use cast::{u16, usize};
use heapless::spsc::Consumer;

use crate::{
    buf::Buffer,
    ieee802154 as ll,
    pktbuf::Alloc,
    sixlowpan::{
        frag::{FirstFragment, NextFragment},
        iphc,
        rbuf::{
            Config, Datagram, Fragment, LinkInfo, Rbuf, Upstream, DEFAULT_INTERVALS, DEFAULT_SLOTS,
        },
        Dispatch,
    },
    time::Instant,
};

/// A frame as delivered by a radio driver
#[derive(Clone, Copy, Debug)]
pub struct Received<F> {
    /// Interface that received the frame
    pub iface: u8,
    /// Received signal strength, in dBm
    pub rssi: i8,
    /// Link quality indicator
    pub lqi: u8,
    /// The raw IEEE 802.15.4 frame, MAC header included and FCS excluded
    pub frame: F,
}

/// Work item
#[derive(Clone, Copy, Debug)]
pub enum Message<F> {
    /// A frame was received
    Frame(Received<F>),
    /// Periodic timer: discard the datagrams that timed out
    Gc,
}

/// 6LoWPAN network interface (receive side)
pub struct Netif<A, U, const SLOTS: usize = DEFAULT_SLOTS, const INTERVALS: usize = DEFAULT_INTERVALS>
where
    A: Alloc,
{
    alloc: A,
    rbuf: Rbuf<A::Chunk, SLOTS, INTERVALS>,
    receiver: Option<U>,
}

impl<A, U, const SLOTS: usize, const INTERVALS: usize> Netif<A, U, SLOTS, INTERVALS>
where
    A: Alloc,
    U: Upstream<A::Chunk>,
{
    /// Creates an interface with no receiver registered
    pub fn new(alloc: A, config: Config) -> Self {
        Netif {
            alloc,
            rbuf: Rbuf::new(config),
            receiver: None,
        }
    }

    /// Registers the receiver of IPv6 datagrams; returns the previous one
    pub fn register(&mut self, receiver: U) -> Option<U> {
        self.receiver.replace(receiver)
    }

    /// Unregisters the receiver; datagrams will be dropped until a new one is registered
    pub fn unregister(&mut self) -> Option<U> {
        self.receiver.take()
    }

    /// The registered receiver
    pub fn receiver(&self) -> Option<&U> {
        self.receiver.as_ref()
    }

    /// Mutable access to the registered receiver
    pub fn receiver_mut(&mut self) -> Option<&mut U> {
        self.receiver.as_mut()
    }

    /// The reassembly buffer
    pub fn rbuf(&self) -> &Rbuf<A::Chunk, SLOTS, INTERVALS> {
        &self.rbuf
    }

    /// Handles every message in `queue`, oldest first
    ///
    /// Returns the number of handled messages
    pub fn poll<F, const N: usize>(
        &mut self,
        now: Instant,
        queue: &mut Consumer<'_, Message<F>, N>,
    ) -> usize
    where
        F: AsSlice<Element = u8>,
    {
        let mut n = 0;
        while let Some(msg) = queue.dequeue() {
            self.handle(now, msg);
            n += 1;
        }
        n
    }

    /// Handles a single message
    pub fn handle<F>(&mut self, now: Instant, msg: Message<F>)
    where
        F: AsSlice<Element = u8>,
    {
        match msg {
            Message::Frame(rx) => self.on_frame(now, rx),
            Message::Gc => {
                let n = self.rbuf.gc(now);
                if n != 0 {
                    net_debug!("netif: {} datagram(s) timed out", n);
                }
            }
        }
    }

    /* Private */
    fn on_frame<F>(&mut self, now: Instant, rx: Received<F>)
    where
        F: AsSlice<Element = u8>,
    {
        let mac = if let Ok(mac) = ll::Frame::parse(rx.frame) {
            mac
        } else {
            net_debug!("netif: invalid MAC frame");

            return;
        };

        if mac.get_type() != ll::Type::Data {
            net_trace!("netif: not a data frame");

            return;
        }

        if mac.get_security_enabled() {
            net_debug!("netif: security not supported; ignoring frame");

            return;
        }

        let (src, dst) = match (mac.get_src_addr(), mac.get_dest_addr()) {
            (Some(src), Some(dst)) => (src, dst),
            _ => {
                net_debug!("netif: frame lacks the source or destination address");

                return;
            }
        };

        let link = LinkInfo {
            iface: rx.iface,
            src,
            dst,
            rssi: rx.rssi,
            lqi: rx.lqi,
        };

        let payload = mac.payload();
        match Dispatch::of_payload(payload) {
            Some(Dispatch::Frag1) => {
                if let Ok(frag) = FirstFragment::parse(payload) {
                    self.on_fragment(
                        now,
                        Fragment {
                            link,
                            size: frag.get_datagram_size(),
                            tag: frag.get_datagram_tag(),
                            offset: 0,
                            payload: frag.payload(),
                        },
                    );
                } else {
                    net_debug!("netif: truncated FRAG1 header");
                }
            }

            Some(Dispatch::FragN) => {
                if let Ok(frag) = NextFragment::parse(payload) {
                    self.on_fragment(
                        now,
                        Fragment {
                            link,
                            size: frag.get_datagram_size(),
                            tag: frag.get_datagram_tag(),
                            offset: frag.offset(),
                            payload: frag.payload(),
                        },
                    );
                } else {
                    net_debug!("netif: truncated FRAGN header");
                }
            }

            Some(Dispatch::Ipv6) => self.on_ipv6(link, &payload[1..]),

            Some(Dispatch::Iphc) => self.on_iphc(link, payload),

            Some(other) => net_debug!("netif: unsupported dispatch {:?}; ignoring", other),

            None => net_debug!("netif: empty payload"),
        }
    }

    fn on_fragment(&mut self, now: Instant, frag: Fragment<'_>) {
        // discards have already been logged by `Rbuf`
        let _ = self
            .rbuf
            .add(&mut self.alloc, &mut self.receiver, now, frag);
    }

    fn on_ipv6(&mut self, link: LinkInfo, packet: &[u8]) {
        let len = if let Ok(len) = u16(packet.len()) {
            len
        } else {
            return;
        };

        if let Some(mut buffer) = self.buffer(len) {
            buffer.as_mut_slice().copy_from_slice(packet);

            self.dispatch(Datagram::new(buffer, link));
        }
    }

    fn on_iphc(&mut self, link: LinkInfo, bytes: &[u8]) {
        let packet = if let Ok(packet) = iphc::Packet::parse(bytes) {
            packet
        } else {
            net_debug!("netif: invalid (or unsupported) LOWPAN_IPHC header");

            return;
        };

        let sizes = if let Ok(sizes) = packet.decompressed_sizes() {
            sizes
        } else {
            net_debug!("netif: can't decompress LOWPAN_IPHC header");

            return;
        };

        let consumed = usize(sizes.consumed);
        let total = u16(bytes.len() - consumed)
            .ok()
            .and_then(|rest| rest.checked_add(sizes.written));

        let mut buffer = if let Some(buffer) = total.and_then(|total| self.buffer(total)) {
            buffer
        } else {
            return;
        };

        let ctxt = iphc::Context {
            source: Some(link.src),
            destination: Some(link.dst),
        };

        let out = buffer.as_mut_slice();
        if packet.decompress(&ctxt, out).is_err() {
            net_debug!("netif: can't decompress LOWPAN_IPHC header");

            return;
        }
        out[usize(sizes.written)..].copy_from_slice(&bytes[consumed..]);

        self.dispatch(Datagram::new(buffer, link));
    }

    fn buffer(&mut self, len: u16) -> Option<Buffer<A::Chunk>> {
        let buffer = self
            .alloc
            .alloc(len)
            .and_then(|chunk| Buffer::with_len(chunk, len).ok());

        if buffer.is_none() {
            net_debug!("netif: couldn't allocate {} bytes", len);
        }

        buffer
    }

    fn dispatch(&mut self, datagram: Datagram<A::Chunk>) {
        net_trace!("netif: {} byte datagram", datagram.payload().len());

        self.receiver.receive(datagram);
    }
}
