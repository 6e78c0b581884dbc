//! Client address helpers

use crate::{WardenError, WardenResult};
use std::net::IpAddr;

/// Address family of a client or list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl IpFamily {
    /// Family of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Address width in bits, which is also the largest valid prefix length
    pub const fn bits(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }

    /// Lowercase label used in logs and telemetry
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
        }
    }
}

/// Parse a textual address, folding IPv4-mapped IPv6 onto IPv4
pub fn parse_ip(raw: &str) -> WardenResult<IpAddr> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(WardenError::InvalidIp(raw.to_string()));
    }
    trimmed
        .parse::<IpAddr>()
        .map(|addr| addr.to_canonical())
        .map_err(|_| WardenError::InvalidIp(raw.to_string()))
}

/// True if the text is a valid IPv4 or IPv6 address
pub fn is_valid_ip(raw: &str) -> bool {
    parse_ip(raw).is_ok()
}

/// Numeric key of an address over its full width
#[inline]
pub fn address_key(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(*v4)),
        IpAddr::V6(v6) => u128::from(*v6),
    }
}
