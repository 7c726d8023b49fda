//! Allocation Engine
//!
//! Picks or accepts an address and binds it to a consumer. Conflict freedom
//! is never decided here: the engine only proposes a candidate and the
//! store's uniqueness check accepts or rejects it in one critical section.
//!
//! ```text
//!   allocate ──► network checks ──► candidate ──► store.insert_allocation
//!                                      ▲                  │
//!                                      └── UniqueViolation (dynamic only,
//!                                          bounded rescans)
//! ```

use ipam_common::{
    cidr, AllocationId, Clock, IpamError, IpamResult, Metadata, NetworkId, ReservationId, TenantId,
};
use ipam_store::{
    lease_expiry, AddressStore, Allocation, AllocationKind, AllocationStatus, Assignee, Network,
    StoreError,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

use crate::availability::{self, Availability, AvailabilityReason};
use crate::config::EngineConfig;

/// Allocation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub network_id: NetworkId,
    /// Explicit address; `None` lets the engine pick the lowest free one
    #[serde(default)]
    pub ip: Option<IpAddr>,
    pub kind: AllocationKind,
    #[serde(default)]
    pub assignee: Option<Assignee>,
    /// Lease length; engine default when absent, 0 for no expiry
    #[serde(default)]
    pub lease_seconds: Option<u64>,
    /// Reservation being fulfilled by this allocation
    #[serde(default)]
    pub reservation_id: Option<ReservationId>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AllocateRequest {
    /// Engine-picked address
    pub fn dynamic(network_id: NetworkId) -> Self {
        Self {
            network_id,
            ip: None,
            kind: AllocationKind::Dynamic,
            assignee: None,
            lease_seconds: None,
            reservation_id: None,
            metadata: Metadata::default(),
        }
    }

    /// Caller-chosen address
    pub fn explicit(network_id: NetworkId, ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            kind: AllocationKind::Static,
            ..Self::dynamic(network_id)
        }
    }

    /// Claim a reserved address
    pub fn fulfilling(network_id: NetworkId, reservation_id: ReservationId) -> Self {
        Self {
            reservation_id: Some(reservation_id),
            kind: AllocationKind::Static,
            ..Self::dynamic(network_id)
        }
    }

    pub fn with_kind(mut self, kind: AllocationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_assignee(mut self, assignee: Assignee) -> Self {
        self.assignee = Some(assignee);
        self
    }

    pub fn with_lease(mut self, lease_seconds: u64) -> Self {
        self.lease_seconds = Some(lease_seconds);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Allocation engine
pub struct AllocationEngine {
    store: Arc<dyn AddressStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AllocationEngine {
    pub fn new(store: Arc<dyn AddressStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Allocate an address
    pub async fn allocate(&self, tenant: &TenantId, request: AllocateRequest) -> IpamResult<Allocation> {
        let result = self.try_allocate(tenant, request).await;
        let outcome = match &result {
            Ok(_) => "allocated",
            Err(IpamError::AddressConflict { .. }) => "conflict",
            Err(IpamError::NetworkExhausted(_)) => "exhausted",
            Err(_) => "error",
        };
        metrics::counter!("ipam_allocations_total", "outcome" => outcome).increment(1);
        result
    }

    async fn try_allocate(&self, tenant: &TenantId, request: AllocateRequest) -> IpamResult<Allocation> {
        request.metadata.validate()?;
        let network = self.store.get_network(tenant, request.network_id).await?;
        if !network.is_active() {
            return Err(IpamError::NetworkDeprecated(network.id));
        }

        let mut explicit = request.ip;
        if let Some(reservation_id) = request.reservation_id {
            let reservation = self.store.get_reservation(tenant, reservation_id).await?;
            if reservation.network_id != network.id {
                return Err(IpamError::ReservationNotFound(reservation_id));
            }
            match explicit {
                Some(ip) if ip != reservation.ip => {
                    return Err(IpamError::Validation(format!(
                        "reservation {reservation_id} holds {}, not {ip}",
                        reservation.ip
                    )));
                }
                _ => explicit = Some(reservation.ip),
            }
        }

        let lease_seconds = request.lease_seconds.unwrap_or(self.config.default_lease_secs);

        let allocation = match explicit {
            Some(ip) => {
                check_explicit(&network, ip)?;
                let candidate = self.record(tenant, &network, ip, lease_seconds, &request);
                self.store
                    .insert_allocation(candidate, self.clock.now())
                    .await?
            }
            None => self.allocate_dynamic(tenant, &network, lease_seconds, &request).await?,
        };

        tracing::info!(
            tenant = %tenant,
            network_id = %network.id,
            allocation_id = %allocation.id,
            ip = %allocation.ip,
            kind = ?allocation.kind,
            "address allocated"
        );
        Ok(allocation)
    }

    async fn allocate_dynamic(
        &self,
        tenant: &TenantId,
        network: &Network,
        lease_seconds: u64,
        request: &AllocateRequest,
    ) -> IpamResult<Allocation> {
        let range = cidr::usable_range(&network.cidr);
        let attempts = self.config.max_allocation_attempts.max(1);

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let mut occupied = self.store.occupied_addresses(tenant, network.id, now).await?;
            if let Some(gateway) = network.gateway {
                occupied.insert(gateway);
            }

            let Some(ip) = cidr::first_free(&range, &occupied) else {
                return Err(IpamError::NetworkExhausted(network.id));
            };

            let candidate = self.record(tenant, network, ip, lease_seconds, request);
            match self.store.insert_allocation(candidate, now).await {
                Ok(allocation) => return Ok(allocation),
                Err(StoreError::UniqueViolation { ip, .. }) if attempt < attempts => {
                    tracing::debug!(%ip, attempt, "lost allocation race, rescanning");
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Unreachable in practice: the last attempt returns above
        Err(IpamError::NetworkExhausted(network.id))
    }

    fn record(
        &self,
        tenant: &TenantId,
        network: &Network,
        ip: IpAddr,
        lease_seconds: u64,
        request: &AllocateRequest,
    ) -> Allocation {
        let now = self.clock.now();
        Allocation {
            id: AllocationId::new(),
            tenant_id: tenant.clone(),
            network_id: network.id,
            ip,
            kind: request.kind,
            status: AllocationStatus::Allocated,
            assignee: request.assignee.clone(),
            lease_seconds,
            allocated_at: now,
            expires_at: lease_expiry(now, lease_seconds),
            closed_at: None,
            reservation_id: request.reservation_id,
            metadata: request.metadata.clone(),
        }
    }

    /// Release an allocation; no-op when it is already closed
    pub async fn release(&self, tenant: &TenantId, id: AllocationId) -> IpamResult<Allocation> {
        let allocation = self
            .store
            .release_allocation(tenant, id, self.clock.now())
            .await?;
        metrics::counter!("ipam_releases_total").increment(1);
        tracing::info!(
            tenant = %tenant,
            allocation_id = %id,
            status = ?allocation.status,
            "allocation released"
        );
        Ok(allocation)
    }

    /// Availability of one address (read only)
    pub async fn check_availability(
        &self,
        tenant: &TenantId,
        network_id: NetworkId,
        ip: IpAddr,
    ) -> IpamResult<Availability> {
        let network = self.store.get_network(tenant, network_id).await?;
        if !network.is_active() {
            return Ok(Availability::new(ip, AvailabilityReason::NetworkDeprecated));
        }
        if let Some(reason) = availability::structural_reason(&network, ip) {
            return Ok(Availability::new(ip, reason));
        }

        let holder = self.store.address_holder(tenant, ip, self.clock.now()).await?;
        let reason = holder
            .as_ref()
            .map_or(AvailabilityReason::Free, availability::holder_reason);
        Ok(Availability::new(ip, reason))
    }

    /// Get allocation
    pub async fn get(&self, tenant: &TenantId, id: AllocationId) -> IpamResult<Allocation> {
        Ok(self.store.get_allocation(tenant, id).await?)
    }

    /// Allocation records of a network, any status
    pub async fn list(&self, tenant: &TenantId, network_id: NetworkId) -> IpamResult<Vec<Allocation>> {
        Ok(self.store.list_allocations(tenant, network_id).await?)
    }

    /// Extend the lease of an active allocation
    pub async fn renew(
        &self,
        tenant: &TenantId,
        id: AllocationId,
        lease_seconds: Option<u64>,
    ) -> IpamResult<Allocation> {
        let lease = lease_seconds.unwrap_or(self.config.default_lease_secs);
        let allocation = self
            .store
            .renew_allocation(tenant, id, lease, self.clock.now())
            .await?;
        tracing::debug!(tenant = %tenant, allocation_id = %id, lease, "lease renewed");
        Ok(allocation)
    }

    /// Allocate `count` dynamic addresses; all or nothing
    pub async fn bulk_allocate(
        &self,
        tenant: &TenantId,
        template: AllocateRequest,
        count: usize,
    ) -> IpamResult<Vec<Allocation>> {
        if count == 0 || count > self.config.max_bulk_allocation {
            return Err(IpamError::Validation(format!(
                "bulk allocation count must be within 1-{}",
                self.config.max_bulk_allocation
            )));
        }
        if template.ip.is_some() || template.reservation_id.is_some() {
            return Err(IpamError::Validation(
                "bulk allocation only supports engine-picked addresses".into(),
            ));
        }

        let mut allocated = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate(tenant, template.clone()).await {
                Ok(allocation) => allocated.push(allocation),
                Err(err) => {
                    self.rollback(tenant, &allocated).await;
                    return Err(err);
                }
            }
        }
        Ok(allocated)
    }

    async fn rollback(&self, tenant: &TenantId, allocated: &[Allocation]) {
        for allocation in allocated {
            if let Err(err) = self
                .store
                .release_allocation(tenant, allocation.id, self.clock.now())
                .await
            {
                tracing::error!(
                    tenant = %tenant,
                    allocation_id = %allocation.id,
                    error = %err,
                    "bulk allocation rollback failed"
                );
            }
        }
        if !allocated.is_empty() {
            tracing::warn!(tenant = %tenant, rolled_back = allocated.len(), "bulk allocation rolled back");
        }
    }
}

fn check_explicit(network: &Network, ip: IpAddr) -> IpamResult<()> {
    match availability::structural_reason(network, ip) {
        None => Ok(()),
        Some(AvailabilityReason::Gateway) => Err(IpamError::AddressConflict {
            ip,
            held_by: "gateway".into(),
        }),
        Some(reason) => Err(IpamError::Validation(format!(
            "{ip} cannot be allocated in {}: {}",
            network.cidr,
            reason.describe()
        ))),
    }
}
