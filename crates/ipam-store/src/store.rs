//! Store abstraction
//!
//! Every mutating method is a single atomic unit against the backing store.
//! Implementations must enforce, inside that unit:
//! - at most one active allocation per (tenant, address)
//! - at most one active reservation per (tenant, address), and never both
//! - no two active networks of one tenant with overlapping CIDRs
//!
//! Lookups are tenant-scoped: a record owned by another tenant is reported as
//! `NotFound`, never as a permission failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipam_common::{AllocationId, NetworkId, ReservationId, TenantId};
use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::error::StoreResult;
use crate::models::*;

/// Persistent address-space store
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Insert a network, rejecting overlaps with the tenant's active networks
    async fn insert_network(&self, network: Network) -> StoreResult<Network>;

    /// Get network by ID
    async fn get_network(&self, tenant: &TenantId, id: NetworkId) -> StoreResult<Network>;

    /// List all networks of a tenant, active and deprecated
    async fn list_networks(&self, tenant: &TenantId) -> StoreResult<Vec<Network>>;

    /// Soft delete; idempotent
    async fn deprecate_network(
        &self,
        tenant: &TenantId,
        id: NetworkId,
        at: DateTime<Utc>,
    ) -> StoreResult<Network>;

    /// Hard delete, cascading to the network's allocations and reservations
    async fn purge_network(
        &self,
        tenant: &TenantId,
        id: NetworkId,
        now: DateTime<Utc>,
    ) -> StoreResult<PurgeSummary>;

    /// Insert an allocation under the active-address uniqueness constraint.
    ///
    /// If `allocation.reservation_id` names the active reservation holding the
    /// same address, that reservation is converted to `Allocated` in the same
    /// unit. Lapsed holders of the address are expired in place.
    async fn insert_allocation(
        &self,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation>;

    /// Get allocation by ID
    async fn get_allocation(&self, tenant: &TenantId, id: AllocationId) -> StoreResult<Allocation>;

    /// List allocation records of a network, any status
    async fn list_allocations(
        &self,
        tenant: &TenantId,
        network_id: NetworkId,
    ) -> StoreResult<Vec<Allocation>>;

    /// Release; a no-op for allocations that are already closed
    async fn release_allocation(
        &self,
        tenant: &TenantId,
        id: AllocationId,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation>;

    /// Move the expiry of an active allocation
    async fn renew_allocation(
        &self,
        tenant: &TenantId,
        id: AllocationId,
        lease_seconds: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation>;

    /// Insert a reservation under the active-address uniqueness constraint.
    ///
    /// With `allow_preemption`, an active reservation of strictly lower
    /// priority is cancelled instead of failing.
    async fn insert_reservation(
        &self,
        reservation: Reservation,
        allow_preemption: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<ReservationInsert>;

    /// Get reservation by ID
    async fn get_reservation(
        &self,
        tenant: &TenantId,
        id: ReservationId,
    ) -> StoreResult<Reservation>;

    /// List reservation records of a network, any status
    async fn list_reservations(
        &self,
        tenant: &TenantId,
        network_id: NetworkId,
    ) -> StoreResult<Vec<Reservation>>;

    /// Cancel; a no-op for reservations that are already closed
    async fn cancel_reservation(
        &self,
        tenant: &TenantId,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<Reservation>;

    /// Active record currently holding `ip`, if any
    async fn address_holder(
        &self,
        tenant: &TenantId,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AddressHolder>>;

    /// Addresses of a network held by active allocations or reservations
    async fn occupied_addresses(
        &self,
        tenant: &TenantId,
        network_id: NetworkId,
        now: DateTime<Utc>,
    ) -> StoreResult<BTreeSet<IpAddr>>;

    /// Allocations still marked allocated whose lease elapsed, oldest first
    async fn due_allocations(&self, now: DateTime<Utc>, limit: usize)
        -> StoreResult<Vec<Allocation>>;

    /// Reservations still marked active whose TTL elapsed, oldest first
    async fn due_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Reservation>>;

    /// Expire the given allocations if still due; returns transitions made
    async fn expire_allocations(&self, ids: &[AllocationId], now: DateTime<Utc>)
        -> StoreResult<usize>;

    /// Expire the given reservations if still due; returns transitions made
    async fn expire_reservations(
        &self,
        ids: &[ReservationId],
        now: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Tenants owning at least one network
    async fn tenants(&self) -> StoreResult<Vec<TenantId>>;
}
