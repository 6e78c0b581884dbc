//! Lock-free network index with atomic rebuilds

use crate::entry::{ListEntry, Span};
use crate::range_tree::{linear_contains, RangeTree, SortedRanges};
use crate::trie::SegmentTrie;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use warden_common::{address_key, parse_ip, IpFamily};

/// Range lookup strategy, selectable only for benchmarking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Augmented interval tree (production path)
    RangeTree,
    /// Binary search over merged spans
    SortedRanges,
    /// Check every range
    LinearScan,
}

#[derive(Debug, Clone, Default)]
struct FamilyRanges {
    /// Distinct spans in insertion order
    spans: Vec<Span>,
    seen: HashSet<Span>,
    tree: RangeTree,
    sorted: SortedRanges,
}

impl FamilyRanges {
    fn insert(&mut self, span: Span) -> bool {
        if !self.seen.insert(span) {
            return false;
        }
        self.spans.push(span);
        true
    }

    fn remove(&mut self, span: Span) -> bool {
        if !self.seen.remove(&span) {
            return false;
        }
        self.spans.retain(|s| *s != span);
        true
    }

    fn has(&self, span: &Span) -> bool {
        self.seen.contains(span)
    }

    fn reorder(&mut self) {
        self.tree = RangeTree::build(&self.spans);
        self.sorted = SortedRanges::build(&self.spans);
    }

    #[inline]
    fn contains(&self, key: u128, strategy: LookupStrategy) -> bool {
        match strategy {
            LookupStrategy::RangeTree => self.tree.contains(key),
            LookupStrategy::SortedRanges => self.sorted.contains(key),
            LookupStrategy::LinearScan => linear_contains(&self.spans, key),
        }
    }
}

/// Immutable view of the index; readers hold one for the whole lookup
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    exact: SegmentTrie,
    v4: FamilyRanges,
    v6: FamilyRanges,
}

impl IndexSnapshot {
    fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut snapshot = Self::default();
        let mut skipped = 0usize;

        for raw in entries {
            let raw = raw.as_ref();
            match ListEntry::parse(raw) {
                Ok(entry) => {
                    snapshot.insert(&entry);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(entry = raw, error = %e, "Skipping malformed list entry");
                }
            }
        }

        snapshot.v4.reorder();
        snapshot.v6.reorder();

        if skipped > 0 {
            debug!(skipped, "Index built with skipped entries");
        }
        snapshot
    }

    fn ranges(&self, family: IpFamily) -> &FamilyRanges {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }

    fn ranges_mut(&mut self, family: IpFamily) -> &mut FamilyRanges {
        match family {
            IpFamily::V4 => &mut self.v4,
            IpFamily::V6 => &mut self.v6,
        }
    }

    /// Insert without reordering the range structures
    fn insert(&mut self, entry: &ListEntry) -> bool {
        match entry {
            ListEntry::Address(addr) => self.exact.insert(addr),
            ListEntry::Range(range) => self.ranges_mut(range.family()).insert(range.span()),
        }
    }

    fn has(&self, entry: &ListEntry) -> bool {
        match entry {
            ListEntry::Address(addr) => self.exact.contains(addr),
            ListEntry::Range(range) => self.ranges(range.family()).has(&range.span()),
        }
    }

    #[inline]
    fn contains(&self, addr: &IpAddr, strategy: LookupStrategy) -> bool {
        let addr = addr.to_canonical();
        if self.exact.contains(&addr) {
            return true;
        }
        self.ranges(IpFamily::of(&addr))
            .contains(address_key(&addr), strategy)
    }

    fn stats(&self) -> IndexStats {
        let ipv4_ranges = self.v4.spans.len();
        let ipv6_ranges = self.v6.spans.len();
        IndexStats {
            individual_ips: self.exact.len(),
            ipv4_ranges,
            ipv6_ranges,
            total_ranges: ipv4_ranges + ipv6_ranges,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Individual addresses in the exact-match tree
    pub individual_ips: usize,
    /// IPv4 CIDR blocks
    pub ipv4_ranges: usize,
    /// IPv6 CIDR blocks
    pub ipv6_ranges: usize,
    /// All CIDR blocks
    pub total_ranges: usize,
}

/// Membership index over individual addresses and CIDR blocks
///
/// Readers never block and never see a partially built index: every
/// rebuild or mutation publishes a complete new snapshot.
pub struct NetworkIndex {
    snapshot: ArcSwap<IndexSnapshot>,
    version: AtomicU64,
}

impl NetworkIndex {
    /// Create empty index
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(IndexSnapshot::default()),
            version: AtomicU64::new(0),
        }
    }

    /// Build from textual entries; malformed entries are skipped
    pub fn build<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            snapshot: ArcSwap::from_pointee(IndexSnapshot::from_entries(entries)),
            version: AtomicU64::new(1),
        }
    }

    /// Replace the whole index atomically
    pub fn rebuild<I, S>(&self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.publish(IndexSnapshot::from_entries(entries));
    }

    /// Swap in an empty index
    pub fn clear(&self) {
        self.publish(IndexSnapshot::default());
    }

    fn publish(&self, snapshot: IndexSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Membership test for a textual address; invalid input is never a member
    #[inline]
    pub fn contains(&self, ip: &str) -> bool {
        match parse_ip(ip) {
            Ok(addr) => self.contains_addr(&addr),
            Err(_) => {
                debug!(ip, "Lookup with invalid address");
                false
            }
        }
    }

    /// Membership test for a parsed address
    #[inline]
    pub fn contains_addr(&self, addr: &IpAddr) -> bool {
        self.snapshot.load().contains(addr, LookupStrategy::RangeTree)
    }

    /// Membership test using an alternate range strategy.
    ///
    /// Exists for benchmarks; production lookups go through [`Self::contains`].
    #[doc(hidden)]
    pub fn contains_with(&self, addr: &IpAddr, strategy: LookupStrategy) -> bool {
        self.snapshot.load().contains(addr, strategy)
    }

    /// Add one entry; false if it was already present
    pub fn add(&self, raw: &str) -> warden_common::WardenResult<bool> {
        let entry = ListEntry::parse(raw)?;
        let previous = self.snapshot.rcu(|current| {
            let mut next = IndexSnapshot::clone(current);
            if next.insert(&entry) && matches!(entry, ListEntry::Range(_)) {
                next.ranges_mut(entry.family()).reorder();
            }
            next
        });
        let added = !previous.has(&entry);
        if added {
            self.version.fetch_add(1, Ordering::Release);
        }
        Ok(added)
    }

    /// Remove one entry; false if it was absent
    pub fn remove(&self, raw: &str) -> warden_common::WardenResult<bool> {
        let entry = ListEntry::parse(raw)?;
        let previous = self.snapshot.rcu(|current| {
            let mut next = IndexSnapshot::clone(current);
            match &entry {
                ListEntry::Address(addr) => {
                    next.exact.remove(addr);
                }
                ListEntry::Range(range) => {
                    let ranges = next.ranges_mut(range.family());
                    if ranges.remove(range.span()) {
                        ranges.reorder();
                    }
                }
            }
            next
        });
        let removed = previous.has(&entry);
        if removed {
            self.version.fetch_add(1, Ordering::Release);
        }
        Ok(removed)
    }

    /// Counts of stored entries
    pub fn stats(&self) -> IndexStats {
        self.snapshot.load().stats()
    }

    /// True if the index holds nothing
    pub fn is_empty(&self) -> bool {
        let stats = self.stats();
        stats.individual_ips == 0 && stats.total_ranges == 0
    }

    /// Bumped on every published change
    #[inline(always)]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Current snapshot, for callers that run many lookups against one view
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.load_full()
    }
}

impl IndexSnapshot {
    /// Membership test against this snapshot
    pub fn contains_ip(&self, addr: &IpAddr) -> bool {
        self.contains(addr, LookupStrategy::RangeTree)
    }
}

impl Default for NetworkIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NetworkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkIndex")
            .field("stats", &self.stats())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const STRATEGIES: [LookupStrategy; 3] = [
        LookupStrategy::RangeTree,
        LookupStrategy::SortedRanges,
        LookupStrategy::LinearScan,
    ];

    #[test]
    fn test_exact_and_range_membership() {
        let index = NetworkIndex::build([
            "192.168.1.10",
            "10.0.0.0/8",
            "2001:db8::/32",
            "2001:db9::7",
        ]);

        assert!(index.contains("192.168.1.10"));
        assert!(!index.contains("192.168.1.11"));
        assert!(index.contains("10.200.3.4"));
        assert!(!index.contains("11.0.0.0"));
        assert!(index.contains("2001:db8:ffff::1"));
        assert!(!index.contains("2001:db7::1"));
        assert!(index.contains("2001:DB9:0::7"));
    }

    #[test]
    fn test_invalid_input_is_not_member() {
        let index = NetworkIndex::build(["0.0.0.0/0", "::/0"]);
        assert!(!index.contains(""));
        assert!(!index.contains("garbage"));
        assert!(!index.contains("1.2.3.4/32"));
        assert!(index.contains("1.2.3.4"));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let index = NetworkIndex::build([
            "10.0.0.1",
            "nonsense",
            "10.0.0.0/33",
            "2001:db8::/129",
            "172.16.0.0/12",
        ]);
        let stats = index.stats();
        assert_eq!(stats.individual_ips, 1);
        assert_eq!(stats.ipv4_ranges, 1);
        assert_eq!(stats.ipv6_ranges, 0);
        assert!(index.contains("172.20.1.1"));
    }

    #[test]
    fn test_duplicates_deduplicated() {
        let index = NetworkIndex::build(["10.0.0.1", "10.0.0.1", " 10.0.0.1 "]);
        assert_eq!(index.stats().individual_ips, 1);
    }

    #[test]
    fn test_ipv4_mapped_client() {
        let index = NetworkIndex::build(["10.0.0.0/8"]);
        assert!(index.contains("::ffff:10.1.1.1"));
    }

    #[test]
    fn test_ipv4_mapped_block_entry() {
        let index = NetworkIndex::build(["::ffff:10.0.0.0/104"]);
        let stats = index.stats();
        assert_eq!(stats.ipv4_ranges, 1);
        assert_eq!(stats.ipv6_ranges, 0);
        assert!(index.contains("10.1.1.1"));
        assert!(index.contains("::ffff:10.1.1.1"));
        assert!(!index.contains("11.0.0.1"));
    }

    #[test]
    fn test_large_list_dedup() {
        let entries: Vec<String> = (0..50_000u32)
            .chain(0..1_000)
            .map(|i| format!("{}/32", std::net::Ipv4Addr::from(0x0A00_0000 + i)))
            .collect();
        let index = NetworkIndex::build(&entries);
        assert_eq!(index.stats().ipv4_ranges, 50_000);
        assert!(index.contains("10.0.195.79"));
        assert!(!index.contains("10.0.195.80"));

        assert!(!index.add("10.0.0.7/32").unwrap());
        assert!(index.remove("10.0.0.7/32").unwrap());
        assert!(!index.remove("10.0.0.7/32").unwrap());
        assert!(index.add("10.0.0.7/32").unwrap());
        assert_eq!(index.stats().ipv4_ranges, 50_000);
    }

    #[test]
    fn test_rebuild_and_clear() {
        let index = NetworkIndex::build(["10.0.0.0/8"]);
        let v = index.version();

        index.rebuild(["192.168.0.0/16"]);
        assert!(!index.contains("10.0.0.1"));
        assert!(index.contains("192.168.3.3"));
        assert!(index.version() > v);

        index.rebuild(Vec::<String>::new());
        assert!(!index.contains("192.168.3.3"));
        assert!(index.is_empty());

        index.rebuild(["1.1.1.1"]);
        index.clear();
        assert!(!index.contains("1.1.1.1"));
    }

    #[test]
    fn test_incremental_mutation() {
        let index = NetworkIndex::new();
        assert!(index.add("10.0.0.0/8").unwrap());
        assert!(!index.add("10.0.0.0/8").unwrap());
        assert!(index.add("1.0.0.0/24").unwrap());
        assert!(index.add("8.8.8.8").unwrap());
        assert!(index.contains("1.0.0.77"));
        assert!(index.contains("10.9.9.9"));
        assert!(index.contains("8.8.8.8"));

        assert!(index.remove("10.0.0.0/8").unwrap());
        assert!(!index.remove("10.0.0.0/8").unwrap());
        assert!(!index.contains("10.9.9.9"));
        assert!(index.contains("1.0.0.77"));

        assert!(index.remove("8.8.8.8").unwrap());
        assert!(!index.contains("8.8.8.8"));
        assert!(index.add("bogus").is_err());
    }

    #[test]
    fn test_snapshot_isolation() {
        let index = NetworkIndex::build(["10.0.0.0/8"]);
        let old = index.snapshot();
        index.rebuild(["192.168.0.0/16"]);

        let addr: IpAddr = "10.1.1.1".parse().unwrap();
        assert!(old.contains_ip(&addr));
        assert!(!index.contains_addr(&addr));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let index = Arc::new(NetworkIndex::build(["10.0.0.0/8", "10.0.0.1"]));
        let addr_a: IpAddr = "10.0.0.1".parse().unwrap();
        let addr_b: IpAddr = "10.5.5.5".parse().unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snap = index.snapshot();
                        // Both addresses live in the same build, so one
                        // snapshot must answer them identically.
                        assert_eq!(snap.contains_ip(&addr_a), snap.contains_ip(&addr_b));
                    }
                })
            })
            .collect();

        for i in 0..200 {
            if i % 2 == 0 {
                index.rebuild(["192.168.0.0/16"]);
            } else {
                index.rebuild(["10.0.0.0/8", "10.0.0.1"]);
            }
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_strategies_agree_on_overlaps() {
        let index = NetworkIndex::build([
            "10.0.0.0/8",
            "10.1.0.0/16",
            "10.1.2.0/24",
            "192.168.0.0/24",
            "192.168.0.128/25",
        ]);
        for probe in ["10.1.2.3", "10.255.0.1", "11.0.0.0", "192.168.0.200", "192.168.1.0"] {
            let addr: IpAddr = probe.parse().unwrap();
            let expected = index.contains_with(&addr, LookupStrategy::LinearScan);
            for strategy in STRATEGIES {
                assert_eq!(index.contains_with(&addr, strategy), expected, "{probe} {strategy:?}");
            }
        }
    }

    proptest! {
        #[test]
        fn prop_ipv4_cidr_boundaries(addr in any::<u32>(), prefix in 0u8..=32) {
            let entry = format!("{}/{}", Ipv4Addr::from(addr), prefix);
            let index = NetworkIndex::build([entry]);

            let host_mask = u32::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
            let start = addr & !host_mask;
            let end = start | host_mask;

            for strategy in STRATEGIES {
                prop_assert!(index.contains_with(&IpAddr::V4(Ipv4Addr::from(start)), strategy));
                prop_assert!(index.contains_with(&IpAddr::V4(Ipv4Addr::from(end)), strategy));
                if let Some(before) = start.checked_sub(1) {
                    prop_assert!(!index.contains_with(&IpAddr::V4(Ipv4Addr::from(before)), strategy));
                }
                if let Some(after) = end.checked_add(1) {
                    prop_assert!(!index.contains_with(&IpAddr::V4(Ipv4Addr::from(after)), strategy));
                }
            }
        }

        #[test]
        fn prop_ipv6_cidr_boundaries(addr in any::<u128>(), prefix in 0u8..=128) {
            let entry = format!("{}/{}", Ipv6Addr::from(addr), prefix);
            let index = NetworkIndex::build([entry]);

            let host_mask = u128::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
            let start = addr & !host_mask;
            let end = start | host_mask;

            // IPv4-mapped space folds onto IPv4 on lookup, so probe with
            // the raw family to keep the property about the range itself.
            for strategy in STRATEGIES {
                let snapshot = index.snapshot();
                let ranges = snapshot.ranges(IpFamily::V6);
                prop_assert!(ranges.contains(start, strategy));
                prop_assert!(ranges.contains(end, strategy));
                if let Some(before) = start.checked_sub(1) {
                    prop_assert!(!ranges.contains(before, strategy));
                }
                if let Some(after) = end.checked_add(1) {
                    prop_assert!(!ranges.contains(after, strategy));
                }
            }
        }

        #[test]
        fn prop_exact_entries_are_members(addrs in proptest::collection::vec(any::<u32>(), 1..50)) {
            let entries: Vec<String> = addrs.iter().map(|a| Ipv4Addr::from(*a).to_string()).collect();
            let index = NetworkIndex::build(&entries);
            for entry in &entries {
                prop_assert!(index.contains(entry));
            }
        }
    }
}
