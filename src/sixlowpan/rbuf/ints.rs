//! Interval pool
//!
//! Fixed capacity arena of byte ranges shared by every reassembly slot. Each slot owns a singly
//! linked list of nodes threaded through the arena by index; a `None` entry is a free node.

use core::{fmt, ops::RangeInclusive};

#[derive(Clone, Copy)]
pub(crate) struct Node {
    start: u16,
    // inclusive
    end: u16,
    next: Option<u16>,
}

pub(crate) struct Intervals<const N: usize> {
    nodes: [Option<Node>; N],
}

impl<const N: usize> Intervals<N> {
    pub(crate) fn new() -> Self {
        assert!(N <= usize::from(u16::MAX));

        Intervals { nodes: [None; N] }
    }

    /// Prepends `[start, end]` to the list that starts at `head`; returns the new head
    ///
    /// Returns `None` if the pool is exhausted
    pub(crate) fn push(&mut self, head: Option<u16>, start: u16, end: u16) -> Option<u16> {
        let index = self.nodes.iter().position(Option::is_none)?;

        self.nodes[index] = Some(Node {
            start,
            end,
            next: head,
        });

        // NOTE(cast) `N` was checked in `new`
        Some(index as u16)
    }

    /// Returns every node in the list that starts at `head` to the pool
    pub(crate) fn release(&mut self, mut head: Option<u16>) -> usize {
        let mut n = 0;
        while let Some(index) = head {
            head = self.nodes[usize::from(index)].take().and_then(|node| node.next);
            n += 1;
        }
        n
    }

    pub(crate) fn iter(&self, head: Option<u16>) -> Iter<'_> {
        Iter {
            nodes: &self.nodes,
            next: head,
        }
    }

    pub(crate) fn in_use(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }
}

/// Iterator over the byte ranges recorded for one datagram, most recent first
#[derive(Clone)]
pub struct Iter<'a> {
    nodes: &'a [Option<Node>],
    next: Option<u16>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = RangeInclusive<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes[usize::from(self.next?)].as_ref()?;
        self.next = node.next;
        Some(node.start..=node.end)
    }
}

impl<'a> fmt::Debug for Iter<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}
