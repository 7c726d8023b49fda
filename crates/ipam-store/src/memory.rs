//! In-memory address-space store
//!
//! All tables live behind one `RwLock`, so every mutating call is a single
//! critical section. The per-tenant address indexes play the role of the
//! unique (tenant, ip, active) constraint of a relational schema; the expiry
//! sets play the role of the `expires_at` index.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ipam_common::cidr;
use ipam_common::{AllocationId, NetworkId, ReservationId, TenantId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;

use crate::error::{EntityRef, StoreError, StoreResult};
use crate::models::*;
use crate::store::AddressStore;

#[derive(Default)]
struct Tables {
    networks: HashMap<NetworkId, Network>,
    allocations: HashMap<AllocationId, Allocation>,
    reservations: HashMap<ReservationId, Reservation>,
    /// (tenant, ip) -> allocation in `Allocated` state
    active_allocations: HashMap<TenantId, BTreeMap<IpAddr, AllocationId>>,
    /// (tenant, ip) -> reservation in `Active` state
    active_reservations: HashMap<TenantId, BTreeMap<IpAddr, ReservationId>>,
    allocation_expiry: BTreeSet<(DateTime<Utc>, AllocationId)>,
    reservation_expiry: BTreeSet<(DateTime<Utc>, ReservationId)>,
}

impl Tables {
    fn network(&self, tenant: &TenantId, id: NetworkId) -> StoreResult<&Network> {
        self.networks
            .get(&id)
            .filter(|n| &n.tenant_id == tenant)
            .ok_or(StoreError::NotFound(EntityRef::Network(id)))
    }

    fn writable_network(&self, tenant: &TenantId, id: NetworkId, ip: IpAddr) -> StoreResult<()> {
        let network = self.network(tenant, id)?;
        if !network.is_active() {
            return Err(StoreError::Deprecated(id));
        }
        if !network.cidr.contains(ip) {
            return Err(StoreError::InvalidState(format!(
                "address {ip} is outside network {}",
                network.cidr
            )));
        }
        Ok(())
    }

    fn allocation_at(&self, tenant: &TenantId, ip: &IpAddr) -> Option<AllocationId> {
        self.active_allocations.get(tenant)?.get(ip).copied()
    }

    fn reservation_at(&self, tenant: &TenantId, ip: &IpAddr) -> Option<ReservationId> {
        self.active_reservations.get(tenant)?.get(ip).copied()
    }

    fn close_allocation(&mut self, id: AllocationId, status: AllocationStatus, now: DateTime<Utc>) {
        let Some(allocation) = self.allocations.get_mut(&id) else {
            return;
        };
        if allocation.status != AllocationStatus::Allocated {
            return;
        }
        allocation.status = status;
        allocation.closed_at = Some(now);

        if let Some(at) = allocation.expires_at {
            self.allocation_expiry.remove(&(at, id));
        }
        if let Some(index) = self.active_allocations.get_mut(&allocation.tenant_id) {
            if index.get(&allocation.ip) == Some(&id) {
                index.remove(&allocation.ip);
            }
        }
    }

    fn close_reservation(&mut self, id: ReservationId, status: ReservationStatus, now: DateTime<Utc>) {
        let Some(reservation) = self.reservations.get_mut(&id) else {
            return;
        };
        if reservation.status != ReservationStatus::Active {
            return;
        }
        reservation.status = status;
        reservation.closed_at = Some(now);

        self.reservation_expiry.remove(&(reservation.expires_at, id));
        if let Some(index) = self.active_reservations.get_mut(&reservation.tenant_id) {
            if index.get(&reservation.ip) == Some(&id) {
                index.remove(&reservation.ip);
            }
        }
    }

    /// Expire holders of `ip` whose lease/TTL elapsed but were not reaped yet
    fn reap_lapsed(&mut self, tenant: &TenantId, ip: &IpAddr, now: DateTime<Utc>) {
        if let Some(id) = self.allocation_at(tenant, ip) {
            if self.allocations.get(&id).is_some_and(|a| a.is_lapsed(now)) {
                self.close_allocation(id, AllocationStatus::Expired, now);
                tracing::debug!(tenant = %tenant, ip = %ip, allocation_id = %id, "reaped lapsed allocation");
            }
        }
        if let Some(id) = self.reservation_at(tenant, ip) {
            if self.reservations.get(&id).is_some_and(|r| !r.is_active(now)) {
                self.close_reservation(id, ReservationStatus::Expired, now);
                tracing::debug!(tenant = %tenant, ip = %ip, reservation_id = %id, "reaped lapsed reservation");
            }
        }
    }

    fn index_allocation(&mut self, allocation: &Allocation) {
        self.active_allocations
            .entry(allocation.tenant_id.clone())
            .or_default()
            .insert(allocation.ip, allocation.id);
        if let Some(at) = allocation.expires_at {
            self.allocation_expiry.insert((at, allocation.id));
        }
    }

    fn index_reservation(&mut self, reservation: &Reservation) {
        self.active_reservations
            .entry(reservation.tenant_id.clone())
            .or_default()
            .insert(reservation.ip, reservation.id);
        self.reservation_expiry
            .insert((reservation.expires_at, reservation.id));
    }
}

/// In-memory store (for tests, development and single-instance deployments)
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressStore for InMemoryStore {
    async fn insert_network(&self, network: Network) -> StoreResult<Network> {
        let mut tables = self.tables.write();

        if network.is_active() {
            let clash = tables.networks.values().find(|existing| {
                existing.tenant_id == network.tenant_id
                    && existing.is_active()
                    && cidr::overlaps(&existing.cidr, &network.cidr)
            });
            if let Some(existing) = clash {
                return Err(StoreError::Overlap {
                    cidr: network.cidr,
                    existing: existing.cidr,
                });
            }
        }

        tables.networks.insert(network.id, network.clone());
        Ok(network)
    }

    async fn get_network(&self, tenant: &TenantId, id: NetworkId) -> StoreResult<Network> {
        self.tables.read().network(tenant, id).cloned()
    }

    async fn list_networks(&self, tenant: &TenantId) -> StoreResult<Vec<Network>> {
        let tables = self.tables.read();
        let mut networks: Vec<_> = tables
            .networks
            .values()
            .filter(|n| &n.tenant_id == tenant)
            .cloned()
            .collect();
        networks.sort_by_key(|n| n.created_at);
        Ok(networks)
    }

    async fn deprecate_network(
        &self,
        tenant: &TenantId,
        id: NetworkId,
        at: DateTime<Utc>,
    ) -> StoreResult<Network> {
        let mut tables = self.tables.write();
        tables.network(tenant, id)?;

        let network = tables
            .networks
            .get_mut(&id)
            .ok_or(StoreError::NotFound(EntityRef::Network(id)))?;
        if network.is_active() {
            network.status = NetworkStatus::Deprecated { at };
            network.updated_at = at;
        }
        Ok(network.clone())
    }

    async fn purge_network(
        &self,
        tenant: &TenantId,
        id: NetworkId,
        now: DateTime<Utc>,
    ) -> StoreResult<PurgeSummary> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        tables.network(tenant, id)?;
        tables.networks.remove(&id);

        let allocation_ids: Vec<_> = tables
            .allocations
            .values()
            .filter(|a| a.network_id == id)
            .map(|a| a.id)
            .collect();
        let reservation_ids: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.network_id == id)
            .map(|r| r.id)
            .collect();

        // Drop index entries first, then the rows themselves
        for aid in &allocation_ids {
            tables.close_allocation(*aid, AllocationStatus::Released, now);
            tables.allocations.remove(aid);
        }
        for rid in &reservation_ids {
            tables.close_reservation(*rid, ReservationStatus::Cancelled, now);
            tables.reservations.remove(rid);
        }

        tracing::debug!(
            tenant = %tenant,
            network_id = %id,
            allocations = allocation_ids.len(),
            reservations = reservation_ids.len(),
            at = %now,
            "network rows purged"
        );
        Ok(PurgeSummary {
            allocations: allocation_ids.len(),
            reservations: reservation_ids.len(),
        })
    }

    async fn insert_allocation(
        &self,
        allocation: Allocation,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        let tenant = &allocation.tenant_id;
        let ip = allocation.ip;

        tables.writable_network(tenant, allocation.network_id, ip)?;
        tables.reap_lapsed(tenant, &ip, now);

        if tables.allocation_at(tenant, &ip).is_some() {
            return Err(StoreError::UniqueViolation {
                ip,
                held_by: HolderKind::Allocation,
            });
        }

        match (tables.reservation_at(tenant, &ip), allocation.reservation_id) {
            (Some(held), Some(fulfils)) if held == fulfils => {
                tables.close_reservation(held, ReservationStatus::Allocated, now);
                if let Some(reservation) = tables.reservations.get_mut(&held) {
                    reservation.allocation_id = Some(allocation.id);
                }
                tracing::debug!(
                    tenant = %tenant,
                    ip = %ip,
                    reservation_id = %held,
                    allocation_id = %allocation.id,
                    "reservation fulfilled"
                );
            }
            (Some(_), _) => {
                return Err(StoreError::UniqueViolation {
                    ip,
                    held_by: HolderKind::Reservation,
                });
            }
            (None, Some(fulfils)) => {
                return Err(StoreError::NotFound(EntityRef::Reservation(fulfils)));
            }
            (None, None) => {}
        }

        tables.index_allocation(&allocation);
        tables.allocations.insert(allocation.id, allocation.clone());
        Ok(allocation)
    }

    async fn get_allocation(&self, tenant: &TenantId, id: AllocationId) -> StoreResult<Allocation> {
        self.tables
            .read()
            .allocations
            .get(&id)
            .filter(|a| &a.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound(EntityRef::Allocation(id)))
    }

    async fn list_allocations(
        &self,
        tenant: &TenantId,
        network_id: NetworkId,
    ) -> StoreResult<Vec<Allocation>> {
        let tables = self.tables.read();
        tables.network(tenant, network_id)?;

        let mut allocations: Vec<_> = tables
            .allocations
            .values()
            .filter(|a| a.network_id == network_id)
            .cloned()
            .collect();
        allocations.sort_by_key(|a| a.allocated_at);
        Ok(allocations)
    }

    async fn release_allocation(
        &self,
        tenant: &TenantId,
        id: AllocationId,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation> {
        let mut tables = self.tables.write();
        let allocation = tables
            .allocations
            .get(&id)
            .filter(|a| &a.tenant_id == tenant)
            .ok_or(StoreError::NotFound(EntityRef::Allocation(id)))?;

        let status = if allocation.is_lapsed(now) {
            AllocationStatus::Expired
        } else {
            AllocationStatus::Released
        };
        tables.close_allocation(id, status, now);

        tables
            .allocations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityRef::Allocation(id)))
    }

    async fn renew_allocation(
        &self,
        tenant: &TenantId,
        id: AllocationId,
        lease_seconds: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        let allocation = tables
            .allocations
            .get_mut(&id)
            .filter(|a| &a.tenant_id == tenant)
            .ok_or(StoreError::NotFound(EntityRef::Allocation(id)))?;

        if !allocation.is_active(now) {
            return Err(StoreError::InvalidState(format!(
                "allocation {id} is no longer active"
            )));
        }

        if let Some(at) = allocation.expires_at {
            tables.allocation_expiry.remove(&(at, id));
        }
        allocation.lease_seconds = lease_seconds;
        allocation.expires_at = lease_expiry(now, lease_seconds);
        if let Some(at) = allocation.expires_at {
            tables.allocation_expiry.insert((at, id));
        }
        Ok(allocation.clone())
    }

    async fn insert_reservation(
        &self,
        reservation: Reservation,
        allow_preemption: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<ReservationInsert> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        let tenant = &reservation.tenant_id;
        let ip = reservation.ip;

        tables.writable_network(tenant, reservation.network_id, ip)?;
        tables.reap_lapsed(tenant, &ip, now);

        if tables.allocation_at(tenant, &ip).is_some() {
            return Err(StoreError::UniqueViolation {
                ip,
                held_by: HolderKind::Allocation,
            });
        }

        let mut preempted = None;
        if let Some(held) = tables.reservation_at(tenant, &ip) {
            let outranked = tables
                .reservations
                .get(&held)
                .is_some_and(|existing| reservation.priority > existing.priority);
            if !(allow_preemption && outranked) {
                return Err(StoreError::UniqueViolation {
                    ip,
                    held_by: HolderKind::Reservation,
                });
            }
            tables.close_reservation(held, ReservationStatus::Cancelled, now);
            tracing::debug!(tenant = %tenant, ip = %ip, reservation_id = %held, "reservation preempted");
            preempted = tables.reservations.get(&held).cloned();
        }

        tables.index_reservation(&reservation);
        tables.reservations.insert(reservation.id, reservation.clone());
        Ok(ReservationInsert {
            reservation,
            preempted,
        })
    }

    async fn get_reservation(
        &self,
        tenant: &TenantId,
        id: ReservationId,
    ) -> StoreResult<Reservation> {
        self.tables
            .read()
            .reservations
            .get(&id)
            .filter(|r| &r.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::NotFound(EntityRef::Reservation(id)))
    }

    async fn list_reservations(
        &self,
        tenant: &TenantId,
        network_id: NetworkId,
    ) -> StoreResult<Vec<Reservation>> {
        let tables = self.tables.read();
        tables.network(tenant, network_id)?;

        let mut reservations: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.network_id == network_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn cancel_reservation(
        &self,
        tenant: &TenantId,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<Reservation> {
        let mut tables = self.tables.write();
        let reservation = tables
            .reservations
            .get(&id)
            .filter(|r| &r.tenant_id == tenant)
            .ok_or(StoreError::NotFound(EntityRef::Reservation(id)))?;

        let status = if reservation.expires_at <= now {
            ReservationStatus::Expired
        } else {
            ReservationStatus::Cancelled
        };
        tables.close_reservation(id, status, now);

        tables
            .reservations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityRef::Reservation(id)))
    }

    async fn address_holder(
        &self,
        tenant: &TenantId,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AddressHolder>> {
        let tables = self.tables.read();

        let allocation = tables
            .allocation_at(tenant, &ip)
            .and_then(|id| tables.allocations.get(&id))
            .filter(|a| a.is_active(now));
        if let Some(allocation) = allocation {
            return Ok(Some(AddressHolder::Allocation(allocation.clone())));
        }

        let reservation = tables
            .reservation_at(tenant, &ip)
            .and_then(|id| tables.reservations.get(&id))
            .filter(|r| r.is_active(now));
        Ok(reservation.map(|r| AddressHolder::Reservation(r.clone())))
    }

    async fn occupied_addresses(
        &self,
        tenant: &TenantId,
        network_id: NetworkId,
        now: DateTime<Utc>,
    ) -> StoreResult<BTreeSet<IpAddr>> {
        let tables = self.tables.read();
        let network = tables.network(tenant, network_id)?;

        let start = network.cidr.network();
        let last = cidr::to_u128(start).saturating_add(cidr::total_addresses(&network.cidr) - 1);
        let end = cidr::from_u128(last, network.cidr.is_ipv6());

        let mut occupied = BTreeSet::new();
        if let Some(index) = tables.active_allocations.get(tenant) {
            occupied.extend(
                index
                    .range(start..=end)
                    .filter(|(_, id)| tables.allocations.get(id).is_some_and(|a| a.is_active(now)))
                    .map(|(ip, _)| *ip),
            );
        }
        if let Some(index) = tables.active_reservations.get(tenant) {
            occupied.extend(
                index
                    .range(start..=end)
                    .filter(|(_, id)| tables.reservations.get(id).is_some_and(|r| r.is_active(now)))
                    .map(|(ip, _)| *ip),
            );
        }
        Ok(occupied)
    }

    async fn due_allocations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Allocation>> {
        let tables = self.tables.read();
        Ok(tables
            .allocation_expiry
            .iter()
            .take_while(|(at, _)| *at <= now)
            .filter_map(|(_, id)| tables.allocations.get(id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn due_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Reservation>> {
        let tables = self.tables.read();
        Ok(tables
            .reservation_expiry
            .iter()
            .take_while(|(at, _)| *at <= now)
            .filter_map(|(_, id)| tables.reservations.get(id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn expire_allocations(
        &self,
        ids: &[AllocationId],
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let mut expired = 0;
        for id in ids {
            let due = tables.allocations.get(id).is_some_and(|a| {
                a.status == AllocationStatus::Allocated && a.is_lapsed(now)
            });
            if due {
                tables.close_allocation(*id, AllocationStatus::Expired, now);
                expired += 1;
            }
        }
        tracing::debug!(requested = ids.len(), expired, "expired allocation batch");
        Ok(expired)
    }

    async fn expire_reservations(
        &self,
        ids: &[ReservationId],
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let mut expired = 0;
        for id in ids {
            let due = tables.reservations.get(id).is_some_and(|r| {
                r.status == ReservationStatus::Active && r.expires_at <= now
            });
            if due {
                tables.close_reservation(*id, ReservationStatus::Expired, now);
                expired += 1;
            }
        }
        tracing::debug!(requested = ids.len(), expired, "expired reservation batch");
        Ok(expired)
    }

    async fn tenants(&self) -> StoreResult<Vec<TenantId>> {
        let tables = self.tables.read();
        let tenants: BTreeSet<_> = tables.networks.values().map(|n| n.tenant_id.clone()).collect();
        Ok(tenants.into_iter().collect())
    }
}

/// Expiry for a lease starting at `now`; `None` for zero-length (permanent) leases
pub fn lease_expiry(now: DateTime<Utc>, lease_seconds: u64) -> Option<DateTime<Utc>> {
    if lease_seconds == 0 {
        return None;
    }
    let secs = i64::try_from(lease_seconds).unwrap_or(i64::MAX);
    Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d))
}
