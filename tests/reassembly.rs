use std::{cell::Cell, rc::Rc};

use as_slice::{AsMutSlice, AsSlice};
use heapless::spsc::Queue;
use lowpan_rbuf::{
    ieee802154::{Addr, ExtendedAddr, Frame, PanId, SrcDest},
    ipv6,
    netif::{Message, Netif, Received},
    pktbuf::Alloc,
    sixlowpan::{
        frag::{FirstFragment, NextFragment},
        rbuf::{Config, Datagram, LinkInfo, Upstream},
    },
    time::Instant,
};

const TAG: u16 = 0x690e;
const SIZE: u16 = 348;
const IFACE: u8 = 9;

const SRC: ExtendedAddr = ExtendedAddr(0xb347_6049_78fe_9548);
const DEST: ExtendedAddr = ExtendedAddr(0xa4f2_d2c9_13b9_bb25);

// ICMPv6 echo reply with a 300 byte payload
fn datagram() -> Vec<u8> {
    let mut bytes = vec![
        0x60, 0x00, 0x00, 0x00, 0x01, 0x34, 0x3a, 0x40, // version .. hop limit
        0xfe, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // source
        0x7b, 0x65, 0x08, 0x22, 0x86, 0x93, 0x9d, 0x5a, //
        0xfe, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // destination
        0x7b, 0x79, 0x7f, 0x7f, 0xa4, 0xb1, 0x55, 0x2e, //
        0x81, 0x00, 0x7a, 0x81, 0x00, 0x54, 0x00, 0x02, // ICMPv6
    ];
    bytes.resize(usize::from(SIZE), 0x54);
    bytes
}

// (offset, 6LoWPAN payload) of each of the four fragments
fn fragments(datagram: &[u8]) -> Vec<(u16, Vec<u8>)> {
    let mut frags = vec![];

    let mut buf = vec![0; 127];
    let mut first = FirstFragment::new(&mut buf[..], SIZE, TAG);
    let mut payload = vec![0x41];
    payload.extend_from_slice(&datagram[..96]);
    first.set_payload(&payload);
    frags.push((0, first.as_bytes().to_vec()));

    for offset in (96..usize::from(SIZE)).step_by(96) {
        let end = (offset + 96).min(usize::from(SIZE));

        let mut buf = vec![0; 127];
        let mut next = NextFragment::new(&mut buf[..], SIZE, TAG, (offset / 8) as u8);
        next.set_payload(&datagram[offset..end]);
        frags.push((offset as u16, next.as_bytes().to_vec()));
    }

    frags
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0; 127];
    let mut frame = Frame::data(
        &mut buf[..],
        SrcDest::IntraPan {
            pan_id: PanId(0xcafe),
            src_addr: Addr::Extended(SRC),
            dest_addr: Addr::Extended(DEST),
        },
    );
    frame.set_payload(payload);
    frame.as_bytes().to_vec()
}

fn rx(frame: &[u8]) -> Message<&[u8]> {
    Message::Frame(Received {
        iface: IFACE,
        rssi: -42,
        lqi: 180,
        frame,
    })
}

#[derive(Default)]
struct Counting {
    live: Rc<Cell<usize>>,
}

struct Chunk {
    bytes: Box<[u8]>,
    live: Rc<Cell<usize>>,
}

impl Alloc for Counting {
    type Chunk = Chunk;

    fn alloc(&mut self, size: u16) -> Option<Chunk> {
        self.live.set(self.live.get() + 1);

        Some(Chunk {
            bytes: vec![0; usize::from(size)].into_boxed_slice(),
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
}

impl Upstream<Chunk> for Sink {
    fn receive(&mut self, datagram: Datagram<Chunk>) -> bool {
        self.datagrams
            .push((datagram.payload().to_vec(), *datagram.link()));
        true
    }
}

#[test]
fn vector() {
    let datagram = datagram();
    let frags = fragments(&datagram);

    assert_eq!(frags.len(), 4);
    assert_eq!(
        frags.iter().map(|(offset, _)| *offset).collect::<Vec<_>>(),
        [0, 96, 192, 288]
    );
    assert_eq!(&frags[0].1[..5], &[0xc1, 0x5c, 0x69, 0x0e, 0x41]);
    assert_eq!(&frags[1].1[..5], &[0xe1, 0x5c, 0x69, 0x0e, 0x0c]);
    assert_eq!(&frags[2].1[..5], &[0xe1, 0x5c, 0x69, 0x0e, 0x18]);
    assert_eq!(&frags[3].1[..5], &[0xe1, 0x5c, 0x69, 0x0e, 0x24]);
    assert_eq!(frags[3].1.len(), 5 + 60);
}

#[test]
fn out_of_order() {
    let datagram = datagram();
    let frames: Vec<Vec<u8>> = fragments(&datagram)
        .iter()
        .map(|(_, frag)| frame(frag))
        .collect();

    let alloc = Counting::default();
    let live = alloc.live.clone();
    let mut netif: Netif<Counting, Sink> = Netif::new(alloc, Config::DEFAULT);
    netif.register(Sink::default());

    let mut queue: Queue<Message<&[u8]>, 8> = Queue::new();
    let (mut p, mut c) = queue.split();

    // last, second (twice), first, third
    for i in &[3usize, 1, 1, 0] {
        assert!(p.enqueue(rx(&frames[*i])).is_ok());
    }
    assert_eq!(netif.poll(Instant(1_000), &mut c), 4);

    {
        let slot = netif.rbuf().entries().next().unwrap();
        assert_eq!(slot.key().tag, TAG);
        assert_eq!(slot.key().src, Addr::Extended(SRC));
        assert_eq!(slot.key().dst, Addr::Extended(DEST));
        assert_eq!(slot.received(), 60 + 96 + 96);
    }
    assert!(netif.receiver().unwrap().datagrams.is_empty());
    assert_eq!(live.get(), 1);

    assert!(p.enqueue(rx(&frames[2])).is_ok());
    assert!(p.enqueue(Message::Gc).is_ok());
    assert_eq!(netif.poll(Instant(2_000), &mut c), 2);

    assert!(netif.rbuf().is_empty());
    assert_eq!(netif.rbuf().intervals_in_use(), 0);

    let sink = netif.unregister().unwrap();
    assert_eq!(sink.datagrams.len(), 1);

    let (bytes, link) = &sink.datagrams[0];
    assert_eq!(bytes, &datagram);
    assert_eq!(link.iface, IFACE);
    assert_eq!(link.src, Addr::Extended(SRC));

    let ip = ipv6::Packet::parse(&bytes[..]).unwrap();
    assert_eq!(ip.get_length(), SIZE - 40);
    assert_eq!(ip.get_next_header(), ipv6::NextHeader::Ipv6Icmp);
    assert_eq!(ip.get_hop_limit(), 64);

    drop(sink);
    assert_eq!(live.get(), 0);
}

#[test]
fn timeout() {
    let datagram = datagram();
    let frames: Vec<Vec<u8>> = fragments(&datagram)
        .iter()
        .map(|(_, frag)| frame(frag))
        .collect();

    let alloc = Counting::default();
    let live = alloc.live.clone();
    let mut netif: Netif<Counting, Sink> = Netif::new(
        alloc,
        Config {
            timeout: 100,
            ..Config::DEFAULT
        },
    );
    netif.register(Sink::default());

    // the clock wraps while the datagram is being reassembled
    let t0 = Instant(u32::MAX - 10);
    netif.handle(t0, rx(&frames[0]));
    netif.handle(t0.wrapping_add(50), rx(&frames[1]));
    assert_eq!(live.get(), 1);

    netif.handle::<&[u8]>(t0.wrapping_add(150), Message::Gc);
    assert_eq!(netif.rbuf().len(), 1);

    netif.handle::<&[u8]>(t0.wrapping_add(151), Message::Gc);
    assert!(netif.rbuf().is_empty());
    assert_eq!(live.get(), 0);

    // late fragments start a new datagram that never completes
    netif.handle(t0.wrapping_add(160), rx(&frames[2]));
    netif.handle(t0.wrapping_add(170), rx(&frames[3]));
    assert_eq!(netif.rbuf().len(), 1);
    assert!(netif.receiver().unwrap().datagrams.is_empty());
}

#[test]
fn interleaved() {
    let datagram = datagram();
    let frags = fragments(&datagram);

    // same tag, different sender
    let other: Vec<Vec<u8>> = frags
        .iter()
        .map(|(_, frag)| {
            let mut buf = vec![0; 127];
            let mut frame = Frame::data(
                &mut buf[..],
                SrcDest::IntraPan {
                    pan_id: PanId(0xcafe),
                    src_addr: Addr::Extended(DEST),
                    dest_addr: Addr::Extended(SRC),
                },
            );
            frame.set_payload(frag);
            frame.as_bytes().to_vec()
        })
        .collect();
    let frames: Vec<Vec<u8>> = frags.iter().map(|(_, frag)| frame(frag)).collect();

    let alloc = Counting::default();
    let live = alloc.live.clone();
    let mut netif: Netif<Counting, Sink> = Netif::new(alloc, Config::DEFAULT);
    netif.register(Sink::default());

    for i in 0..4 {
        netif.handle(Instant(i as u32), rx(&frames[i]));
        netif.handle(Instant(i as u32), rx(&other[3 - i]));
    }

    let sink = netif.unregister().unwrap();
    assert_eq!(sink.datagrams.len(), 2);
    assert!(sink.datagrams.iter().all(|(bytes, _)| *bytes == datagram));
    assert_eq!(sink.datagrams[0].1.src, Addr::Extended(SRC));
    assert_eq!(sink.datagrams[1].1.src, Addr::Extended(DEST));

    drop(sink);
    assert_eq!(live.get(), 0);
}
