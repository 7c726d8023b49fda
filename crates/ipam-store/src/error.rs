//! Storage errors

use ipam_common::{AllocationId, IpamError, NetworkId, ReservationId};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::time::Duration;

use crate::models::HolderKind;

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Record a lookup failed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Network(NetworkId),
    Allocation(AllocationId),
    Reservation(ReservationId),
}

/// Storage errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0:?}")]
    NotFound(EntityRef),

    #[error("unique violation on {ip}: held by {held_by:?}")]
    UniqueViolation { ip: IpAddr, held_by: HolderKind },

    #[error("overlap: {cidr} intersects {existing}")]
    Overlap { cidr: IpNetwork, existing: IpNetwork },

    #[error("network {0} is deprecated")]
    Deprecated(NetworkId),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Transient failure worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<StoreError> for IpamError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(EntityRef::Network(id)) => IpamError::NetworkNotFound(id),
            StoreError::NotFound(EntityRef::Allocation(id)) => IpamError::AllocationNotFound(id),
            StoreError::NotFound(EntityRef::Reservation(id)) => IpamError::ReservationNotFound(id),
            StoreError::UniqueViolation { ip, held_by } => IpamError::AddressConflict {
                ip,
                held_by: held_by.as_state().to_string(),
            },
            StoreError::Overlap { cidr, existing } => IpamError::NetworkOverlap {
                cidr: cidr.to_string(),
                existing: existing.to_string(),
            },
            StoreError::Deprecated(id) => IpamError::NetworkDeprecated(id),
            StoreError::InvalidState(msg) => IpamError::Validation(msg),
            StoreError::Unavailable(msg) => IpamError::StoreUnavailable(msg),
            StoreError::Timeout(after) => {
                IpamError::StoreUnavailable(format!("timed out after {after:?}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_becomes_conflict() {
        let err: IpamError = StoreError::UniqueViolation {
            ip: "10.0.0.9".parse().unwrap(),
            held_by: HolderKind::Allocation,
        }
        .into();
        assert!(matches!(err, IpamError::AddressConflict { ref held_by, .. } if held_by == "allocated"));
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = StoreError::Timeout(Duration::from_millis(250));
        assert!(err.is_transient());
        assert!(IpamError::from(err).is_retryable());
    }
}
