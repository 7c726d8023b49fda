//! Address-space records

use chrono::{DateTime, Utc};
use ipam_common::{
    AllocationId, Metadata, NetworkId, NetworkKind, ReservationId, TenantId,
};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Network lifecycle state
///
/// Networks are never physically removed by normal operation; deprecation
/// keeps their allocation history queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NetworkStatus {
    /// Accepts new allocations and reservations
    Active,
    /// Soft-deleted
    Deprecated {
        /// When the network was deprecated
        at: DateTime<Utc>,
    },
}

/// A CIDR block scoped to a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Unique network ID
    pub id: NetworkId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Display name
    pub name: String,
    /// Address block
    pub cidr: IpNetwork,
    /// Purpose tag
    pub kind: NetworkKind,
    /// Default gateway
    pub gateway: Option<IpAddr>,
    /// DNS resolvers handed to consumers
    pub dns_servers: Vec<IpAddr>,
    /// 802.1Q VLAN id
    pub vlan_id: Option<u16>,
    /// Site / location
    pub site: Option<String>,
    /// DHCP served on this network
    pub dhcp_enabled: bool,
    /// Lifecycle state
    pub status: NetworkStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Network {
    /// True unless deprecated
    pub fn is_active(&self) -> bool {
        matches!(self.status, NetworkStatus::Active)
    }
}

/// How an address was handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    /// Picked by the engine
    Dynamic,
    /// Requested explicitly by an operator
    Static,
    /// Leased by a DHCP server
    Dhcp,
}

/// Allocation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Bound to a consumer
    Allocated,
    /// Released by the consumer
    Released,
    /// Lease elapsed
    Expired,
    /// Held for a consumer that has not claimed it (imported records)
    Reserved,
}

/// Consumer an address is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignee {
    /// Resource ID (VM, site, device, ...)
    pub resource_id: String,
    /// Resource type
    pub resource_type: String,
}

impl Assignee {
    /// Create assignee
    pub fn new(resource_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// Binding of one address inside a network to a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub tenant_id: TenantId,
    pub network_id: NetworkId,
    pub ip: IpAddr,
    pub kind: AllocationKind,
    pub status: AllocationStatus,
    pub assignee: Option<Assignee>,
    /// Lease length; 0 means the allocation never expires
    pub lease_seconds: u64,
    pub allocated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when the allocation leaves the `Allocated` state
    pub closed_at: Option<DateTime<Utc>>,
    /// Reservation this allocation fulfilled
    pub reservation_id: Option<ReservationId>,
    pub metadata: Metadata,
}

impl Allocation {
    /// Allocated and lease not elapsed
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == AllocationStatus::Allocated && !self.is_lapsed(now)
    }

    /// Lease elapsed, regardless of status
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Reservation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding the address
    Active,
    /// Converted into an allocation
    Allocated,
    /// TTL elapsed
    Expired,
    /// Cancelled by the caller or preempted
    Cancelled,
}

/// Temporary, non-binding hold on an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub network_id: NetworkId,
    pub ip: IpAddr,
    pub reserved_for: Option<Assignee>,
    /// Higher wins when holds compete
    pub priority: i32,
    pub ttl_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub closed_at: Option<DateTime<Utc>>,
    /// Allocation created when the reservation was fulfilled
    pub allocation_id: Option<AllocationId>,
    pub metadata: Metadata,
}

impl Reservation {
    /// Holding and TTL not elapsed
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at > now
    }
}

/// Kind of record holding an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolderKind {
    /// An active allocation
    Allocation,
    /// An active reservation
    Reservation,
}

impl HolderKind {
    /// Human-readable state of the held address
    pub fn as_state(&self) -> &'static str {
        match self {
            Self::Allocation => "allocated",
            Self::Reservation => "reserved",
        }
    }
}

/// Current holder of an address
#[derive(Debug, Clone, PartialEq)]
pub enum AddressHolder {
    /// Held by an allocation
    Allocation(Allocation),
    /// Held by a reservation
    Reservation(Reservation),
}

impl AddressHolder {
    /// Holder kind
    pub fn kind(&self) -> HolderKind {
        match self {
            Self::Allocation(_) => HolderKind::Allocation,
            Self::Reservation(_) => HolderKind::Reservation,
        }
    }
}

/// Result of inserting a reservation
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationInsert {
    /// Stored reservation
    pub reservation: Reservation,
    /// Lower-priority reservation cancelled to make room
    pub preempted: Option<Reservation>,
}

/// Records removed by a hard network delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeSummary {
    pub allocations: usize,
    pub reservations: usize,
}
