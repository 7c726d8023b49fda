//! Reservation Engine
//!
//! Time-boxed holds on a single address. A hold blocks allocation of the
//! address by anyone except an allocation that names it; that allocation is
//! the only way a reservation becomes `Allocated`.

use chrono::Duration;
use ipam_common::{cidr, Clock, IpamError, IpamResult, Metadata, NetworkId, ReservationId, TenantId};
use ipam_store::{AddressStore, Assignee, Reservation, ReservationInsert, ReservationStatus};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

use crate::availability::{self, AvailabilityReason};
use crate::config::EngineConfig;

/// Reservation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub network_id: NetworkId,
    pub ip: IpAddr,
    #[serde(default)]
    pub reserved_for: Option<Assignee>,
    /// Engine default when absent
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ReserveRequest {
    pub fn new(network_id: NetworkId, ip: IpAddr) -> Self {
        Self {
            network_id,
            ip,
            reserved_for: None,
            ttl_seconds: None,
            priority: 0,
            metadata: Metadata::default(),
        }
    }

    pub fn for_assignee(mut self, assignee: Assignee) -> Self {
        self.reserved_for = Some(assignee);
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Reservation engine
pub struct ReservationEngine {
    store: Arc<dyn AddressStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn AddressStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Place a hold on an address
    pub async fn reserve(&self, tenant: &TenantId, request: ReserveRequest) -> IpamResult<ReservationInsert> {
        request.metadata.validate()?;
        let ttl = request
            .ttl_seconds
            .unwrap_or(self.config.default_reservation_ttl_secs);
        if ttl == 0 {
            return Err(IpamError::Validation("reservation TTL must be positive".into()));
        }

        let network = self.store.get_network(tenant, request.network_id).await?;
        if !network.is_active() {
            return Err(IpamError::NetworkDeprecated(network.id));
        }
        match availability::structural_reason(&network, request.ip) {
            None => {}
            Some(AvailabilityReason::Gateway) => {
                return Err(IpamError::AddressConflict {
                    ip: request.ip,
                    held_by: "gateway".into(),
                })
            }
            Some(reason) => {
                return Err(IpamError::Validation(format!(
                    "{} cannot be reserved in {}: {}",
                    request.ip,
                    network.cidr,
                    reason.describe()
                )))
            }
        }

        let now = self.clock.now();
        let secs = i64::try_from(ttl).unwrap_or(i64::MAX);
        let expires_at = Duration::try_seconds(secs)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| IpamError::Validation(format!("reservation TTL {ttl}s out of range")))?;

        let reservation = Reservation {
            id: ReservationId::new(),
            tenant_id: tenant.clone(),
            network_id: network.id,
            ip: request.ip,
            reserved_for: request.reserved_for,
            priority: request.priority,
            ttl_seconds: ttl,
            created_at: now,
            expires_at,
            status: ReservationStatus::Active,
            closed_at: None,
            allocation_id: None,
            metadata: request.metadata,
        };

        let outcome = self
            .store
            .insert_reservation(reservation, self.config.reservation_preemption, now)
            .await?;

        metrics::counter!("ipam_reservations_total").increment(1);
        if let Some(preempted) = &outcome.preempted {
            tracing::info!(
                tenant = %tenant,
                ip = %preempted.ip,
                preempted = %preempted.id,
                priority = preempted.priority,
                by_priority = outcome.reservation.priority,
                "reservation preempted"
            );
        }
        tracing::info!(
            tenant = %tenant,
            network_id = %network.id,
            reservation_id = %outcome.reservation.id,
            ip = %outcome.reservation.ip,
            ttl,
            "address reserved"
        );
        Ok(outcome)
    }

    /// Cancel a hold; no-op when it is already closed
    pub async fn cancel(&self, tenant: &TenantId, id: ReservationId) -> IpamResult<Reservation> {
        let reservation = self
            .store
            .cancel_reservation(tenant, id, self.clock.now())
            .await?;
        tracing::info!(
            tenant = %tenant,
            reservation_id = %id,
            status = ?reservation.status,
            "reservation cancelled"
        );
        Ok(reservation)
    }

    pub async fn get(&self, tenant: &TenantId, id: ReservationId) -> IpamResult<Reservation> {
        Ok(self.store.get_reservation(tenant, id).await?)
    }

    pub async fn list(&self, tenant: &TenantId, network_id: NetworkId) -> IpamResult<Vec<Reservation>> {
        Ok(self.store.list_reservations(tenant, network_id).await?)
    }

    /// Lowest free address of a network that a hold could be placed on
    pub async fn suggest(&self, tenant: &TenantId, network_id: NetworkId) -> IpamResult<Option<IpAddr>> {
        let network = self.store.get_network(tenant, network_id).await?;
        let mut occupied = self
            .store
            .occupied_addresses(tenant, network_id, self.clock.now())
            .await?;
        if let Some(gateway) = network.gateway {
            occupied.insert(gateway);
        }
        Ok(cidr::first_free(&cidr::usable_range(&network.cidr), &occupied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{AllocateRequest, AllocationEngine};
    use crate::network::{NetworkService, NewNetwork};
    use ipam_common::{ManualClock, NetworkKind};
    use ipam_store::{InMemoryStore, Network};
    use tokio_test::assert_ok;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<dyn AddressStore>,
        networks: NetworkService,
        tenant: TenantId,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn AddressStore> = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        Fixture {
            networks: NetworkService::new(store.clone(), clock.clone()),
            store,
            clock,
            tenant: TenantId::new("acme").unwrap(),
        }
    }

    fn engine(fx: &Fixture, preemption: bool) -> ReservationEngine {
        let config = EngineConfig {
            reservation_preemption: preemption,
            ..EngineConfig::default()
        };
        ReservationEngine::new(fx.store.clone(), fx.clock.clone(), config)
    }

    async fn network(fx: &Fixture) -> Network {
        fx.networks
            .create(&fx.tenant, NewNetwork::new("10.20.0.0/24", NetworkKind::Customer))
            .await
            .unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_reserve_defaults_and_conflicts() {
        let fx = fixture();
        let net = network(&fx).await;
        let reservations = engine(&fx, false);

        let held = reservations
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.5")))
            .await
            .unwrap()
            .reservation;
        assert_eq!(held.ttl_seconds, 3600);
        assert_eq!(held.priority, 0);
        assert_eq!(held.expires_at, fx.clock.now() + Duration::seconds(3600));

        let err = reservations
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.5")))
            .await
            .unwrap_err();
        assert!(matches!(err, IpamError::AddressConflict { .. }));

        let allocations = AllocationEngine::new(fx.store.clone(), fx.clock.clone(), EngineConfig::default());
        allocations
            .allocate(&fx.tenant, AllocateRequest::explicit(net.id, ip("10.20.0.6")))
            .await
            .unwrap();
        let err = reservations
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.6")).with_priority(100))
            .await
            .unwrap_err();
        assert!(matches!(err, IpamError::AddressConflict { ref held_by, .. } if held_by == "allocated"));
    }

    #[tokio::test]
    async fn test_preemption_is_opt_in() {
        let fx = fixture();
        let net = network(&fx).await;

        let plain = engine(&fx, false);
        plain
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.9")).with_priority(1))
            .await
            .unwrap();
        assert!(plain
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.9")).with_priority(9))
            .await
            .is_err());

        let arbitrating = engine(&fx, true);
        let outcome = arbitrating
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.9")).with_priority(9))
            .await
            .unwrap();
        let preempted = outcome.preempted.unwrap();
        assert_eq!(preempted.status, ReservationStatus::Cancelled);
        assert_eq!(preempted.priority, 1);

        // Equal priority never preempts
        assert!(arbitrating
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.9")).with_priority(9))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_expired_hold_releases_address() {
        let fx = fixture();
        let net = network(&fx).await;
        let reservations = engine(&fx, false);

        let first = reservations
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.30")).with_ttl(30))
            .await
            .unwrap()
            .reservation;
        fx.clock.advance(Duration::seconds(30));

        assert_ok!(
            reservations
                .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.30")))
                .await
        );
        let first = reservations.get(&fx.tenant, first.id).await.unwrap();
        assert_eq!(first.status, ReservationStatus::Expired);
    }

    #[tokio::test]
    async fn test_cancel_and_validation() {
        let fx = fixture();
        let net = network(&fx).await;
        let reservations = engine(&fx, false);

        let held = reservations
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.40")))
            .await
            .unwrap()
            .reservation;
        let cancelled = reservations.cancel(&fx.tenant, held.id).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(reservations.cancel(&fx.tenant, held.id).await.unwrap(), cancelled);

        let missing = ReservationId::new();
        assert_eq!(
            reservations.cancel(&fx.tenant, missing).await.unwrap_err(),
            IpamError::ReservationNotFound(missing)
        );

        let err = reservations
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.41")).with_ttl(0))
            .await
            .unwrap_err();
        assert!(matches!(err, IpamError::Validation(_)));

        let err = reservations
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.21.0.1")))
            .await
            .unwrap_err();
        assert!(matches!(err, IpamError::Validation(_)));
    }

    #[tokio::test]
    async fn test_suggest_skips_held_addresses() {
        let fx = fixture();
        let net = network(&fx).await;
        let reservations = engine(&fx, false);

        assert_eq!(reservations.suggest(&fx.tenant, net.id).await.unwrap(), Some(ip("10.20.0.1")));
        reservations
            .reserve(&fx.tenant, ReserveRequest::new(net.id, ip("10.20.0.1")))
            .await
            .unwrap();
        assert_eq!(reservations.suggest(&fx.tenant, net.id).await.unwrap(), Some(ip("10.20.0.2")));
    }
}
