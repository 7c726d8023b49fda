//! Error types for the IPAM engine

use crate::ids::{AllocationId, NetworkId, ReservationId};
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use thiserror::Error;

/// IPAM error type
///
/// Every variant only carries data the calling tenant supplied or owns.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IpamError {
    /// Malformed CIDR notation or host bits set
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Request rejected before any mutation (VLAN, gateway, address range, ...)
    #[error("validation failed: {0}")]
    Validation(String),

    /// New network overlaps an active network of the same tenant
    #[error("network {cidr} overlaps existing network {existing}")]
    NetworkOverlap {
        /// Requested CIDR
        cidr: String,
        /// Conflicting CIDR owned by the same tenant
        existing: String,
    },

    /// Network unknown to the tenant
    #[error("network not found: {0}")]
    NetworkNotFound(NetworkId),

    /// Network has been soft-deleted and accepts no new bindings
    #[error("network {0} is deprecated")]
    NetworkDeprecated(NetworkId),

    /// No free address left in the network
    #[error("network {0} has no free addresses")]
    NetworkExhausted(NetworkId),

    /// Address already allocated or reserved
    #[error("address {ip} is already {held_by}")]
    AddressConflict {
        /// Contended address
        ip: IpAddr,
        /// "allocated" or "reserved"
        held_by: String,
    },

    /// Allocation unknown to the tenant
    #[error("allocation not found: {0}")]
    AllocationNotFound(AllocationId),

    /// Reservation unknown to the tenant
    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Too many requests
    #[error("rate limit exceeded for {operation}, retry after {retry_after_secs}s")]
    RateLimitExceeded {
        /// Limited operation
        operation: String,
        /// Configured ceiling including burst
        limit: u64,
        /// Remaining requests in the window (always 0 when rejected)
        remaining: u64,
        /// When the current window resets
        reset_at: DateTime<Utc>,
        /// Seconds until a retry can succeed
        retry_after_secs: u64,
    },

    /// Backing store unreachable or timed out
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl IpamError {
    /// Returns true if the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IpamError::StoreUnavailable(_) | IpamError::RateLimitExceeded { .. }
        )
    }

    /// Returns true for "does not exist (for you)" errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            IpamError::NetworkNotFound(_)
                | IpamError::AllocationNotFound(_)
                | IpamError::ReservationNotFound(_)
        )
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            IpamError::InvalidCidr(_) => "invalid_cidr",
            IpamError::Validation(_) => "validation_failed",
            IpamError::NetworkOverlap { .. } => "network_overlap",
            IpamError::NetworkNotFound(_) => "network_not_found",
            IpamError::NetworkDeprecated(_) => "network_deprecated",
            IpamError::NetworkExhausted(_) => "network_exhausted",
            IpamError::AddressConflict { .. } => "address_conflict",
            IpamError::AllocationNotFound(_) => "allocation_not_found",
            IpamError::ReservationNotFound(_) => "reservation_not_found",
            IpamError::RateLimitExceeded { .. } => "too_many_requests",
            IpamError::StoreUnavailable(_) => "store_unavailable",
            IpamError::Config(_) => "config_error",
        }
    }
}

/// Result type for IPAM operations
pub type IpamResult<T> = Result<T, IpamError>;
