//! Tenant-scoped SDK facade
//!
//! [`Ipam`] owns the engine, limiter and scheduler; [`TenantContext`] is the
//! per-request handle. Every mutating call passes the admission checks
//! enabled by [`Capabilities`] before it touches the store:
//!
//! ```text
//! TenantContext::allocate_ip
//!   ├─ in-flight slot    (tenant_quotas)
//!   ├─ operation limit   (rate_limiting)
//!   ├─ tier quota        (tenant_quotas)
//!   └─ AllocationEngine::allocate
//! ```
//!
//! A call turned away by the operation limit never counts against the
//! tenant's quota.

use ipam_common::{AllocationId, Clock, IpamResult, NetworkId, ReservationId, SystemClock, TenantId};
use ipam_engine::{
    AllocateRequest, AllocationEngine, Availability, CleanupOptions, CleanupReport, MaintenanceScheduler,
    NetworkService, NetworkUtilization, NewNetwork, ReservationEngine, ReserveRequest,
};
use ipam_planner::{ConflictReport, OptimizedPlan, SubnetPlan, SubnetRequirement};
use ipam_ratelimit::{
    CounterStore, LocalCounterStore, Operation, QuotaManager, RateLimiter, StaticTierResolver, TierResolver,
};
use ipam_store::{AddressStore, Allocation, InMemoryStore, Network, PurgeSummary, Reservation, ReservationInsert};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Capabilities, IpamConfig};

/// Tenant charged for maintenance triggered through the SDK
const SYSTEM_TENANT: &str = "system";

/// Builder for [`Ipam`]
pub struct IpamBuilder {
    config: IpamConfig,
    store: Option<Arc<dyn AddressStore>>,
    counters: Option<Arc<dyn CounterStore>>,
    clock: Option<Arc<dyn Clock>>,
    tiers: Option<Arc<dyn TierResolver>>,
}

impl IpamBuilder {
    /// Address store; defaults to [`InMemoryStore`]
    pub fn store(mut self, store: Arc<dyn AddressStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shared counter store for the limiter and quotas
    pub fn counter_store(mut self, counters: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Tenant tier lookup; defaults to the `quota.tenant_tiers` table
    pub fn tier_resolver(mut self, tiers: Arc<dyn TierResolver>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn build(self) -> IpamResult<Ipam> {
        self.config.validate()?;
        let config = self.config.resolved();
        let capabilities = config.capabilities;

        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let counters: Arc<dyn CounterStore> = match (self.counters, capabilities.shared_counter_store) {
            (Some(counters), _) => counters,
            (None, true) => {
                warn!("shared counter store enabled but none configured, limits are per instance");
                Arc::new(LocalCounterStore::new())
            }
            (None, false) => Arc::new(LocalCounterStore::new()),
        };
        let tiers = self
            .tiers
            .unwrap_or_else(|| Arc::new(StaticTierResolver::from_config(&config.quota)));

        let ipam = Ipam {
            networks: NetworkService::new(store.clone(), clock.clone()),
            allocations: AllocationEngine::new(store.clone(), clock.clone(), config.engine.clone()),
            reservations: ReservationEngine::new(store.clone(), clock.clone(), config.engine.clone()),
            maintenance: Arc::new(MaintenanceScheduler::new(
                store.clone(),
                clock.clone(),
                config.maintenance.clone(),
            )),
            limiter: RateLimiter::new(config.rate_limit.clone(), counters.clone(), clock.clone()),
            quotas: QuotaManager::new(config.quota.clone(), tiers, counters.clone(), clock),
            counter_backend: counters.name(),
            store,
            capabilities,
        };

        info!(
            rate_limiting = capabilities.rate_limiting,
            tenant_quotas = capabilities.tenant_quotas,
            counters = ipam.counter_backend,
            preemption = capabilities.reservation_preemption,
            "IPAM initialised"
        );
        Ok(ipam)
    }
}

/// IPAM service handle
pub struct Ipam {
    networks: NetworkService,
    allocations: AllocationEngine,
    reservations: ReservationEngine,
    maintenance: Arc<MaintenanceScheduler>,
    limiter: RateLimiter,
    quotas: QuotaManager,
    store: Arc<dyn AddressStore>,
    counter_backend: &'static str,
    capabilities: Capabilities,
}

impl Ipam {
    pub fn builder(config: IpamConfig) -> IpamBuilder {
        IpamBuilder {
            config,
            store: None,
            counters: None,
            clock: None,
            tiers: None,
        }
    }

    /// In-memory instance with the given configuration
    pub fn in_memory(config: IpamConfig) -> IpamResult<Self> {
        Self::builder(config).build()
    }

    /// Handle scoped to one tenant
    pub fn tenant(&self, tenant_id: &str) -> IpamResult<TenantContext<'_>> {
        Ok(self.for_tenant(TenantId::new(tenant_id)?))
    }

    pub fn for_tenant(&self, tenant: TenantId) -> TenantContext<'_> {
        TenantContext {
            ipam: self,
            tenant,
            user: None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn store(&self) -> &Arc<dyn AddressStore> {
        &self.store
    }

    pub fn maintenance(&self) -> Arc<MaintenanceScheduler> {
        self.maintenance.clone()
    }

    /// One expiry sweep on demand
    pub async fn cleanup_expired(&self, options: CleanupOptions) -> IpamResult<CleanupReport> {
        if self.capabilities.rate_limiting {
            let system = TenantId::new(SYSTEM_TENANT)?;
            self.limiter.enforce(Operation::Cleanup, &system, None).await?;
        }
        Ok(self.maintenance.cleanup_expired(options).await)
    }

    /// Utilization of every network, optionally for one tenant
    pub async fn utilization_report(&self, tenant: Option<&TenantId>) -> IpamResult<Vec<NetworkUtilization>> {
        self.maintenance.utilization_report(tenant).await
    }

    /// Start the maintenance loop when `background_maintenance` is on
    pub fn spawn_maintenance(&self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.capabilities.background_maintenance {
            info!("background maintenance disabled");
            return None;
        }
        Some(tokio::spawn(self.maintenance.clone().run(shutdown)))
    }
}

/// Admission held for the duration of one call
struct Admission {
    _slot: Option<OwnedSemaphorePermit>,
}

/// Operations on behalf of one tenant
pub struct TenantContext<'a> {
    ipam: &'a Ipam,
    tenant: TenantId,
    user: Option<String>,
}

impl TenantContext<'_> {
    /// Attribute calls to a user (used for per-user rate limit keys)
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant
    }

    async fn admit(&self, operation: Operation) -> IpamResult<Admission> {
        let caps = self.ipam.capabilities;

        let slot = if caps.tenant_quotas {
            Some(self.ipam.quotas.acquire_slot(&self.tenant)?)
        } else {
            None
        };

        if caps.rate_limiting {
            self.ipam
                .limiter
                .enforce(operation, &self.tenant, self.user.as_deref())
                .await?;
        }

        if caps.tenant_quotas {
            self.ipam
                .quotas
                .check_quota(&self.tenant, operation)
                .await
                .into_result()?;
        }

        Ok(Admission { _slot: slot })
    }

    // Networks

    pub async fn create_network(&self, request: NewNetwork) -> IpamResult<Network> {
        let _admission = self.admit(Operation::CreateNetwork).await?;
        self.ipam.networks.create(&self.tenant, request).await
    }

    pub async fn get_network(&self, id: NetworkId) -> IpamResult<Network> {
        self.ipam.networks.get(&self.tenant, id).await
    }

    pub async fn list_networks(&self) -> IpamResult<Vec<Network>> {
        self.ipam.networks.list(&self.tenant).await
    }

    pub async fn deprecate_network(&self, id: NetworkId) -> IpamResult<Network> {
        let _admission = self.admit(Operation::CreateNetwork).await?;
        self.ipam.networks.deprecate(&self.tenant, id).await
    }

    pub async fn purge_network(&self, id: NetworkId) -> IpamResult<PurgeSummary> {
        let _admission = self.admit(Operation::CreateNetwork).await?;
        self.ipam.networks.purge(&self.tenant, id).await
    }

    pub async fn get_network_utilization(&self, id: NetworkId) -> IpamResult<NetworkUtilization> {
        self.ipam.networks.utilization(&self.tenant, id).await
    }

    // Allocations

    pub async fn allocate_ip(&self, request: AllocateRequest) -> IpamResult<Allocation> {
        let _admission = self.admit(Operation::Allocate).await?;
        self.ipam.allocations.allocate(&self.tenant, request).await
    }

    pub async fn bulk_allocate(&self, template: AllocateRequest, count: usize) -> IpamResult<Vec<Allocation>> {
        let _admission = self.admit(Operation::BulkAllocate).await?;
        self.ipam.allocations.bulk_allocate(&self.tenant, template, count).await
    }

    pub async fn release_ip(&self, id: AllocationId) -> IpamResult<Allocation> {
        let _admission = self.admit(Operation::Release).await?;
        self.ipam.allocations.release(&self.tenant, id).await
    }

    pub async fn renew_lease(&self, id: AllocationId, lease_seconds: Option<u64>) -> IpamResult<Allocation> {
        let _admission = self.admit(Operation::Allocate).await?;
        self.ipam.allocations.renew(&self.tenant, id, lease_seconds).await
    }

    pub async fn get_allocation(&self, id: AllocationId) -> IpamResult<Allocation> {
        self.ipam.allocations.get(&self.tenant, id).await
    }

    pub async fn list_allocations(&self, network_id: NetworkId) -> IpamResult<Vec<Allocation>> {
        self.ipam.allocations.list(&self.tenant, network_id).await
    }

    pub async fn check_availability(&self, network_id: NetworkId, ip: IpAddr) -> IpamResult<Availability> {
        let _admission = self.admit(Operation::CheckAvailability).await?;
        self.ipam
            .allocations
            .check_availability(&self.tenant, network_id, ip)
            .await
    }

    // Reservations

    pub async fn reserve_ip(&self, request: ReserveRequest) -> IpamResult<ReservationInsert> {
        let _admission = self.admit(Operation::Reserve).await?;
        self.ipam.reservations.reserve(&self.tenant, request).await
    }

    pub async fn cancel_reservation(&self, id: ReservationId) -> IpamResult<Reservation> {
        let _admission = self.admit(Operation::CancelReservation).await?;
        self.ipam.reservations.cancel(&self.tenant, id).await
    }

    pub async fn get_reservation(&self, id: ReservationId) -> IpamResult<Reservation> {
        self.ipam.reservations.get(&self.tenant, id).await
    }

    pub async fn list_reservations(&self, network_id: NetworkId) -> IpamResult<Vec<Reservation>> {
        self.ipam.reservations.list(&self.tenant, network_id).await
    }

    /// Next address a reservation could take
    pub async fn suggest_address(&self, network_id: NetworkId) -> IpamResult<Option<IpAddr>> {
        let _admission = self.admit(Operation::CheckAvailability).await?;
        self.ipam.reservations.suggest(&self.tenant, network_id).await
    }

    // Planning

    pub async fn plan_subnets(&self, parent: &str, requirements: &[SubnetRequirement]) -> IpamResult<SubnetPlan> {
        let _admission = self.admit(Operation::PlanSubnets).await?;
        ipam_planner::plan(parent, requirements)
    }

    pub async fn optimize_subnets(
        &self,
        parent: &str,
        requirements: &[SubnetRequirement],
    ) -> IpamResult<OptimizedPlan> {
        let _admission = self.admit(Operation::PlanSubnets).await?;
        ipam_planner::optimize(parent, requirements)
    }

    /// Check proposed blocks against each other and the tenant's active networks
    pub async fn detect_conflicts<P: AsRef<str>>(&self, proposed: &[P]) -> IpamResult<ConflictReport> {
        let _admission = self.admit(Operation::PlanSubnets).await?;
        let existing: Vec<String> = self
            .list_networks()
            .await?
            .iter()
            .filter(|n| n.is_active())
            .map(|n| n.cidr.to_string())
            .collect();
        Ok(ipam_planner::detect_conflicts(proposed, existing.as_slice()))
    }
}

impl std::fmt::Debug for Ipam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ipam")
            .field("capabilities", &self.capabilities)
            .field("counters", &self.counter_backend)
            .finish_non_exhaustive()
    }
}
