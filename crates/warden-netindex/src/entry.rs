//! Address list entries

use ipnetwork::IpNetwork;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use warden_common::{address_key, parse_ip, IpFamily, WardenError, WardenResult};

/// Inclusive numeric interval over an address family's full width
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    /// First address
    pub start: u128,
    /// Last address
    pub end: u128,
}

impl Span {
    /// Create span
    pub const fn new(start: u128, end: u128) -> Self {
        Self { start, end }
    }

    /// True if `key` lies inside the span
    #[inline(always)]
    pub fn contains(&self, key: u128) -> bool {
        self.start <= key && key <= self.end
    }
}

/// A CIDR block with its precomputed bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrRange {
    network: IpNetwork,
    span: Span,
}

impl CidrRange {
    /// Build from an address and prefix length.
    ///
    /// Host bits in `addr` are ignored.
    pub fn new(addr: IpAddr, prefix: u8) -> WardenResult<Self> {
        let network = IpNetwork::new(addr, prefix)
            .map_err(|e| WardenError::InvalidEntry(format!("{}/{}: {}", addr, prefix, e)))?;

        let width = IpFamily::of(&addr).bits();
        let host_bits = u32::from(width - prefix);
        let host_mask = match host_bits {
            0 => 0,
            128 => u128::MAX,
            n => (1u128 << n) - 1,
        };
        let start = address_key(&addr) & !host_mask;

        Ok(Self {
            network,
            span: Span::new(start, start | host_mask),
        })
    }

    /// Address family
    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.network.ip())
    }

    /// Prefix length
    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    /// Numeric bounds
    pub fn span(&self) -> Span {
        self.span
    }

    /// True if `addr` falls inside the block
    pub fn contains(&self, addr: &IpAddr) -> bool {
        IpFamily::of(addr) == self.family() && self.span.contains(address_key(addr))
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network.network(), self.prefix())
    }
}

/// One line of an address list: a single address or a CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListEntry {
    /// Individual address
    Address(IpAddr),
    /// CIDR block
    Range(CidrRange),
}

impl ListEntry {
    /// Parse `addr` or `addr/prefix`
    pub fn parse(raw: &str) -> WardenResult<Self> {
        let trimmed = raw.trim();
        match trimmed.split_once('/') {
            None => parse_ip(trimmed)
                .map(Self::Address)
                .map_err(|_| WardenError::InvalidEntry(raw.to_string())),
            Some((addr, prefix)) => {
                let addr = addr
                    .trim()
                    .parse::<IpAddr>()
                    .map_err(|_| WardenError::InvalidEntry(raw.to_string()))?;
                let prefix = prefix
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| WardenError::InvalidEntry(raw.to_string()))?;
                let (addr, prefix) =
                    fold_mapped(addr, prefix).ok_or_else(|| WardenError::InvalidEntry(raw.to_string()))?;
                CidrRange::new(addr, prefix).map(Self::Range)
            }
        }
    }

    /// Address family
    pub fn family(&self) -> IpFamily {
        match self {
            Self::Address(addr) => IpFamily::of(addr),
            Self::Range(range) => range.family(),
        }
    }
}

/// Lookups fold IPv4-mapped clients onto IPv4, so mapped blocks are stored
/// as IPv4 too. A mapped block wider than the mapped space cannot be
/// expressed and is rejected.
fn fold_mapped(addr: IpAddr, prefix: u8) -> Option<(IpAddr, u8)> {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) if prefix >= 96 => Some((IpAddr::V4(v4), prefix - 96)),
            Some(_) => None,
            None => Some((addr, prefix)),
        },
        IpAddr::V4(_) => Some((addr, prefix)),
    }
}

impl FromStr for ListEntry {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split a newline or comma separated list into entries.
///
/// Blank lines and `#` comments are dropped.
pub fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
