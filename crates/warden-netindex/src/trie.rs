//! Exact-match prefix tree over canonical address segments
//!
//! IPv4 addresses descend by octet, IPv6 addresses by hextet, so every
//! textual spelling of one address lands on the same leaf.

use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Default)]
struct Node {
    children: HashMap<u16, Node>,
    terminal: bool,
}

/// Set of individual addresses, IPv4 and IPv6 kept in separate roots
#[derive(Debug, Clone, Default)]
pub struct SegmentTrie {
    v4: Node,
    v6: Node,
    len: usize,
}

fn segments(addr: &IpAddr) -> ([u16; 8], usize) {
    let mut out = [0u16; 8];
    match addr {
        IpAddr::V4(v4) => {
            for (slot, octet) in out.iter_mut().zip(v4.octets()) {
                *slot = u16::from(octet);
            }
            (out, 4)
        }
        IpAddr::V6(v6) => (v6.segments(), 8),
    }
}

impl SegmentTrie {
    /// Create empty trie
    pub fn new() -> Self {
        Self::default()
    }

    fn root(&self, addr: &IpAddr) -> &Node {
        match addr {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        }
    }

    fn root_mut(&mut self, addr: &IpAddr) -> &mut Node {
        match addr {
            IpAddr::V4(_) => &mut self.v4,
            IpAddr::V6(_) => &mut self.v6,
        }
    }

    /// Insert an address; false if it was already present
    pub fn insert(&mut self, addr: &IpAddr) -> bool {
        let (path, depth) = segments(addr);
        let mut node = self.root_mut(addr);
        for segment in &path[..depth] {
            node = node.children.entry(*segment).or_default();
        }
        if node.terminal {
            return false;
        }
        node.terminal = true;
        self.len += 1;
        true
    }

    /// Exact membership
    #[inline]
    pub fn contains(&self, addr: &IpAddr) -> bool {
        let (path, depth) = segments(addr);
        let mut node = self.root(addr);
        for segment in &path[..depth] {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.terminal
    }

    /// Remove an address, pruning empty branches; false if absent
    pub fn remove(&mut self, addr: &IpAddr) -> bool {
        let (path, depth) = segments(addr);
        let removed = remove_path(self.root_mut(addr), &path[..depth]);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Number of stored addresses
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no address is stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn remove_path(node: &mut Node, path: &[u16]) -> bool {
    let Some((head, rest)) = path.split_first() else {
        let was_present = node.terminal;
        node.terminal = false;
        return was_present;
    };
    let Some(child) = node.children.get_mut(head) else {
        return false;
    };
    let removed = remove_path(child, rest);
    if removed && !child.terminal && child.children.is_empty() {
        node.children.remove(head);
    }
    removed
}
