//! CIDR arithmetic
//!
//! Addresses of both families are mapped onto `u128` so range walks and
//! counting share one code path.

use ipnetwork::IpNetwork;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{IpamError, IpamResult};

/// Parse CIDR notation, rejecting host bits outside the prefix
pub fn parse_cidr(cidr: &str) -> IpamResult<IpNetwork> {
    let network: IpNetwork = cidr
        .trim()
        .parse()
        .map_err(|e| IpamError::InvalidCidr(format!("{cidr}: {e}")))?;

    if network.ip() != network.network() {
        return Err(IpamError::InvalidCidr(format!(
            "{cidr}: host bits set, did you mean {}/{}?",
            network.network(),
            network.prefix()
        )));
    }

    Ok(network)
}

/// True if the two blocks share at least one address
pub fn overlaps(a: &IpNetwork, b: &IpNetwork) -> bool {
    a.is_ipv4() == b.is_ipv4() && (a.contains(b.network()) || b.contains(a.network()))
}

/// Numeric value of an address
#[inline]
pub fn to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Address for a numeric value in the given family
#[inline]
pub fn from_u128(value: u128, ipv6: bool) -> IpAddr {
    if ipv6 {
        IpAddr::V6(Ipv6Addr::from(value))
    } else {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    }
}

/// Number of addresses in the block, saturating for ::/0
pub fn total_addresses(network: &IpNetwork) -> u128 {
    let bits: u32 = if network.is_ipv4() { 32 } else { 128 };
    let host_bits = bits - network.prefix() as u32;
    if host_bits >= 128 {
        u128::MAX
    } else {
        1u128 << host_bits
    }
}

/// Inclusive range of addresses that may be bound to a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsableRange {
    /// First usable address
    pub first: u128,
    /// Last usable address
    pub last: u128,
    /// Address family
    pub ipv6: bool,
}

impl UsableRange {
    /// Number of usable addresses
    pub fn len(&self) -> u128 {
        (self.last - self.first).saturating_add(1)
    }

    /// Ranges are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True if `ip` is inside the range
    pub fn contains(&self, ip: IpAddr) -> bool {
        ip.is_ipv6() == self.ipv6 && {
            let v = to_u128(ip);
            v >= self.first && v <= self.last
        }
    }

    /// First usable address
    pub fn first_ip(&self) -> IpAddr {
        from_u128(self.first, self.ipv6)
    }

    /// Last usable address
    pub fn last_ip(&self) -> IpAddr {
        from_u128(self.last, self.ipv6)
    }
}

/// Usable host range of a block
///
/// IPv4 excludes the network and broadcast addresses, except for /31
/// (RFC 3021 point-to-point, both usable) and /32 (single host).
/// IPv6 excludes the subnet-router anycast address, except for /127 and /128.
pub fn usable_range(network: &IpNetwork) -> UsableRange {
    let ipv6 = network.is_ipv6();
    let start = to_u128(network.network());
    let total = total_addresses(network);
    let end = start.saturating_add(total - 1);
    let prefix = network.prefix();

    let (first, last) = match (ipv6, prefix) {
        (false, 32) | (true, 128) => (start, start),
        (false, 31) | (true, 127) => (start, end),
        (false, _) => (start + 1, end - 1),
        (true, _) => (start + 1, end),
    };

    UsableRange { first, last, ipv6 }
}

/// Lowest usable address of `range` not present in `occupied`
pub fn first_free(range: &UsableRange, occupied: &BTreeSet<IpAddr>) -> Option<IpAddr> {
    let mut candidate = range.first;

    for ip in occupied.range(range.first_ip()..=range.last_ip()) {
        let value = to_u128(*ip);
        if value > candidate {
            break;
        }
        if value == candidate {
            if candidate == range.last {
                return None;
            }
            candidate += 1;
        }
    }

    Some(from_u128(candidate, range.ipv6))
}
