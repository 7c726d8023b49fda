//! Address availability

use ipam_common::cidr;
use ipam_store::{AddressHolder, Network};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Why an address is or is not available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityReason {
    Free,
    OutsideNetwork,
    NetworkAddress,
    BroadcastAddress,
    Gateway,
    Allocated,
    Reserved,
    NetworkDeprecated,
}

impl AvailabilityReason {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Free => "address is free",
            Self::OutsideNetwork => "address is outside the network",
            Self::NetworkAddress => "address is the network address",
            Self::BroadcastAddress => "address is the broadcast address",
            Self::Gateway => "address is the network gateway",
            Self::Allocated => "address is allocated",
            Self::Reserved => "address is reserved",
            Self::NetworkDeprecated => "network is deprecated",
        }
    }
}

/// Result of an availability check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub ip: IpAddr,
    pub available: bool,
    pub reason: AvailabilityReason,
}

impl Availability {
    pub(crate) fn new(ip: IpAddr, reason: AvailabilityReason) -> Self {
        Self {
            ip,
            available: reason == AvailabilityReason::Free,
            reason,
        }
    }
}

/// Structural check that does not need the store: is `ip` bindable at all?
pub(crate) fn structural_reason(network: &Network, ip: IpAddr) -> Option<AvailabilityReason> {
    if !network.cidr.contains(ip) {
        return Some(AvailabilityReason::OutsideNetwork);
    }

    let range = cidr::usable_range(&network.cidr);
    if !range.contains(ip) {
        let reason = if cidr::to_u128(ip) < range.first {
            AvailabilityReason::NetworkAddress
        } else {
            AvailabilityReason::BroadcastAddress
        };
        return Some(reason);
    }

    if network.gateway == Some(ip) {
        return Some(AvailabilityReason::Gateway);
    }
    None
}

pub(crate) fn holder_reason(holder: &AddressHolder) -> AvailabilityReason {
    match holder {
        AddressHolder::Allocation(_) => AvailabilityReason::Allocated,
        AddressHolder::Reservation(_) => AvailabilityReason::Reserved,
    }
}
