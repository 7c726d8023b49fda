//! Maintenance Scheduler
//!
//! Batch jobs over the whole store:
//! - expire allocations and reservations whose lease/TTL elapsed
//! - per-network utilization reports
//! - audit for residual conflicts
//!
//! Every expiry batch commits on its own and the store only transitions
//! records that are still due, so a run interrupted half-way (or two
//! workers running at once) replays as a no-op.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ipam_common::{Clock, IpamResult, NetworkId, TenantId};
use ipam_store::{AddressStore, ReservationStatus, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::MaintenanceConfig;
use crate::network::{measure, NetworkUtilization};

/// Caller limits for one cleanup run
///
/// The default is a dry run; mutating runs ask for [`CleanupOptions::apply`].
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Count what would expire without changing anything
    pub dry_run: bool,
    /// Records processed per kind; scheduler default when `None`
    pub max_records: Option<usize>,
    /// Stop starting new batches after this instant
    pub deadline: Option<Instant>,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self::dry_run()
    }
}

impl CleanupOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            max_records: None,
            deadline: None,
        }
    }

    pub fn apply() -> Self {
        Self {
            dry_run: false,
            ..Self::dry_run()
        }
    }

    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = Some(max);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Outcome of a cleanup run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub expired_allocations: usize,
    pub expired_reservations: usize,
    /// Committed expiry batches
    pub batches: usize,
    /// Store calls repeated after a transient error
    pub retries: usize,
    /// Stopped on the record cap or the deadline with due records left
    pub truncated: bool,
    /// Store failures that ended a phase early
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.expired_allocations + self.expired_reservations
    }

    pub fn is_complete(&self) -> bool {
        !self.truncated && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Two active allocations for one (tenant, address)
    DuplicateActiveAllocation,
    /// An address both allocated and reserved
    AllocatedAndReserved,
    /// Active allocation inside a deprecated network
    AllocationOnInactiveNetwork,
    /// Reservation left active far beyond its TTL
    StaleReservation,
}

impl FindingKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::DuplicateActiveAllocation | Self::AllocatedAndReserved => Severity::High,
            Self::AllocationOnInactiveNetwork => Severity::Medium,
            Self::StaleReservation => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub tenant_id: TenantId,
    pub network_id: NetworkId,
    pub ip: IpAddr,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub generated_at: DateTime<Utc>,
    pub tenants_scanned: usize,
    pub networks_scanned: usize,
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

/// Maintenance scheduler
pub struct MaintenanceScheduler {
    store: Arc<dyn AddressStore>,
    clock: Arc<dyn Clock>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(store: Arc<dyn AddressStore>, clock: Arc<dyn Clock>, config: MaintenanceConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Expire everything whose lease or TTL elapsed
    pub async fn cleanup_expired(&self, options: CleanupOptions) -> CleanupReport {
        let now = self.clock.now();
        let cap = options
            .max_records
            .unwrap_or(self.config.max_records_per_run)
            .max(1);
        let mut report = CleanupReport {
            dry_run: options.dry_run,
            ..CleanupReport::default()
        };

        if options.dry_run {
            self.preview(now, cap, &mut report).await;
        } else {
            self.expire_allocations(now, cap, options.deadline, &mut report).await;
            self.expire_reservations(now, cap, options.deadline, &mut report).await;
        }

        if report.total() > 0 || !report.errors.is_empty() {
            tracing::info!(
                dry_run = report.dry_run,
                allocations = report.expired_allocations,
                reservations = report.expired_reservations,
                batches = report.batches,
                retries = report.retries,
                truncated = report.truncated,
                errors = report.errors.len(),
                "expiry cleanup finished"
            );
        }
        report
    }

    async fn preview(&self, now: DateTime<Utc>, cap: usize, report: &mut CleanupReport) {
        let mut retries = 0;
        let allocations = self
            .with_retry("due_allocations", &mut retries, || {
                self.store.due_allocations(now, cap.saturating_add(1))
            })
            .await;
        match allocations {
            Ok(due) => {
                report.truncated |= due.len() > cap;
                report.expired_allocations = due.len().min(cap);
            }
            Err(err) => report.errors.push(format!("allocations: {err}")),
        }

        let reservations = self
            .with_retry("due_reservations", &mut retries, || {
                self.store.due_reservations(now, cap.saturating_add(1))
            })
            .await;
        match reservations {
            Ok(due) => {
                report.truncated |= due.len() > cap;
                report.expired_reservations = due.len().min(cap);
            }
            Err(err) => report.errors.push(format!("reservations: {err}")),
        }
        report.retries += retries;
    }

    async fn expire_allocations(
        &self,
        now: DateTime<Utc>,
        cap: usize,
        deadline: Option<Instant>,
        report: &mut CleanupReport,
    ) {
        let mut processed = 0;
        loop {
            if processed >= cap || deadline.is_some_and(|d| Instant::now() >= d) {
                report.truncated |= self.more_due(self.store.due_allocations(now, 1)).await;
                break;
            }
            let limit = self.config.batch_size.max(1).min(cap - processed);

            let due = self
                .with_retry("due_allocations", &mut report.retries, || {
                    self.store.due_allocations(now, limit)
                })
                .await;
            let batch = match due {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(error = %err, "giving up on allocation expiry");
                    report.errors.push(format!("allocations: {err}"));
                    break;
                }
            };

            let ids: Vec<_> = batch.iter().map(|a| a.id).collect();
            let expired = self
                .with_retry("expire_allocations", &mut report.retries, || {
                    self.store.expire_allocations(&ids, now)
                })
                .await;
            match expired {
                Ok(n) => {
                    processed += ids.len();
                    report.expired_allocations += n;
                    report.batches += 1;
                    metrics::counter!("ipam_expired_records_total", "record" => "allocation")
                        .increment(n as u64);
                }
                Err(err) => {
                    tracing::error!(error = %err, "giving up on allocation expiry");
                    report.errors.push(format!("allocations: {err}"));
                    break;
                }
            }
        }
    }

    async fn expire_reservations(
        &self,
        now: DateTime<Utc>,
        cap: usize,
        deadline: Option<Instant>,
        report: &mut CleanupReport,
    ) {
        let mut processed = 0;
        loop {
            if processed >= cap || deadline.is_some_and(|d| Instant::now() >= d) {
                report.truncated |= self.more_due(self.store.due_reservations(now, 1)).await;
                break;
            }
            let limit = self.config.batch_size.max(1).min(cap - processed);

            let due = self
                .with_retry("due_reservations", &mut report.retries, || {
                    self.store.due_reservations(now, limit)
                })
                .await;
            let batch = match due {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(error = %err, "giving up on reservation expiry");
                    report.errors.push(format!("reservations: {err}"));
                    break;
                }
            };

            let ids: Vec<_> = batch.iter().map(|r| r.id).collect();
            let expired = self
                .with_retry("expire_reservations", &mut report.retries, || {
                    self.store.expire_reservations(&ids, now)
                })
                .await;
            match expired {
                Ok(n) => {
                    processed += ids.len();
                    report.expired_reservations += n;
                    report.batches += 1;
                    metrics::counter!("ipam_expired_records_total", "record" => "reservation")
                        .increment(n as u64);
                }
                Err(err) => {
                    tracing::error!(error = %err, "giving up on reservation expiry");
                    report.errors.push(format!("reservations: {err}"));
                    break;
                }
            }
        }
    }

    /// Whether records are still due after a stop; an unreadable store counts as yes
    async fn more_due<T>(&self, due: impl Future<Output = StoreResult<Vec<T>>>) -> bool {
        due.await.map_or(true, |rest| !rest.is_empty())
    }

    /// Run a store call, retrying transient failures with doubling backoff
    async fn with_retry<T, F, Fut>(&self, op: &'static str, retries: &mut usize, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut backoff = self.config.retry_backoff();
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    *retries += 1;
                    tracing::debug!(op, attempt, error = %err, "transient store error, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Utilization of every active network, optionally for one tenant
    pub async fn utilization_report(&self, tenant: Option<&TenantId>) -> IpamResult<Vec<NetworkUtilization>> {
        let tenants = match tenant {
            Some(tenant) => vec![tenant.clone()],
            None => self.store.tenants().await?,
        };

        let now = self.clock.now();
        let mut report = Vec::new();
        for tenant in &tenants {
            for network in self.store.list_networks(tenant).await? {
                if network.is_active() {
                    report.push(measure(self.store.as_ref(), &network, now).await?);
                }
            }
        }
        Ok(report)
    }

    /// Scan for residual conflicts; findings are reported, never remediated
    pub async fn audit(&self) -> IpamResult<AuditReport> {
        let now = self.clock.now();
        let tenants = self.store.tenants().await?;
        let mut findings = Vec::new();
        let mut networks_scanned = 0;

        for tenant in &tenants {
            let mut allocated: HashMap<IpAddr, Vec<NetworkId>> = HashMap::new();
            let mut reserved: HashMap<IpAddr, NetworkId> = HashMap::new();

            for network in self.store.list_networks(tenant).await? {
                networks_scanned += 1;

                for allocation in self.store.list_allocations(tenant, network.id).await? {
                    if !allocation.is_active(now) {
                        continue;
                    }
                    if !network.is_active() {
                        findings.push(finding(
                            FindingKind::AllocationOnInactiveNetwork,
                            tenant,
                            network.id,
                            allocation.ip,
                            format!("allocation {} is active in deprecated network {}", allocation.id, network.cidr),
                        ));
                    }
                    allocated.entry(allocation.ip).or_default().push(network.id);
                }

                let factor = i64::from(self.config.stale_reservation_factor.max(1));
                for reservation in self.store.list_reservations(tenant, network.id).await? {
                    if reservation.status != ReservationStatus::Active {
                        continue;
                    }
                    let ttl = i64::try_from(reservation.ttl_seconds).unwrap_or(i64::MAX);
                    let limit = ChronoDuration::seconds(ttl.saturating_mul(factor).min(i64::MAX / 1000));
                    let age = now - reservation.created_at;
                    if age > limit {
                        findings.push(finding(
                            FindingKind::StaleReservation,
                            tenant,
                            network.id,
                            reservation.ip,
                            format!(
                                "reservation {} open for {}s with a {}s TTL",
                                reservation.id,
                                age.num_seconds(),
                                reservation.ttl_seconds
                            ),
                        ));
                    }
                    if reservation.is_active(now) {
                        reserved.insert(reservation.ip, network.id);
                    }
                }
            }

            for (ip, networks) in &allocated {
                if networks.len() > 1 {
                    findings.push(finding(
                        FindingKind::DuplicateActiveAllocation,
                        tenant,
                        networks[0],
                        *ip,
                        format!("{} active allocations for {ip}", networks.len()),
                    ));
                }
                if let Some(network_id) = reserved.get(ip) {
                    findings.push(finding(
                        FindingKind::AllocatedAndReserved,
                        tenant,
                        *network_id,
                        *ip,
                        format!("{ip} is allocated and reserved at once"),
                    ));
                }
            }
        }

        findings.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(AuditReport {
            generated_at: now,
            tenants_scanned: tenants.len(),
            networks_scanned,
            findings,
        })
    }

    /// One scheduled pass: cleanup, then audit when enabled
    pub async fn run_once(&self) -> CleanupReport {
        let options = CleanupOptions::apply().with_deadline(Instant::now() + self.config.interval());
        let report = self.cleanup_expired(options).await;

        if self.config.audit_each_run {
            match self.audit().await {
                Ok(audit) if audit.count(Severity::High) > 0 => {
                    tracing::error!(
                        high = audit.count(Severity::High),
                        findings = audit.findings.len(),
                        "address audit found conflicts"
                    );
                }
                Ok(audit) if !audit.findings.is_empty() => {
                    tracing::warn!(findings = audit.findings.len(), "address audit findings");
                }
                Ok(_) => tracing::debug!("address audit clean"),
                Err(err) => tracing::warn!(error = %err, "address audit failed"),
            }
        }
        report
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.config.interval().as_secs(), "maintenance scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("maintenance scheduler stopped");
    }
}

fn finding(kind: FindingKind, tenant: &TenantId, network_id: NetworkId, ip: IpAddr, detail: String) -> AuditFinding {
    AuditFinding {
        kind,
        severity: kind.severity(),
        tenant_id: tenant.clone(),
        network_id,
        ip,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{AllocateRequest, AllocationEngine};
    use crate::config::EngineConfig;
    use crate::network::{NetworkService, NewNetwork};
    use crate::reservation::{ReservationEngine, ReserveRequest};
    use async_trait::async_trait;
    use ipam_common::{AllocationId, ManualClock, NetworkKind, ReservationId};
    use ipam_store::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Store whose expiry calls fail a fixed number of times first
    struct FlakyStore {
        inner: InMemoryStore,
        failures: AtomicU32,
        purged_at: Mutex<Option<DateTime<Utc>>>,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                inner: InMemoryStore::new(),
                failures: AtomicU32::new(times),
                purged_at: Mutex::new(None),
            }
        }

        fn trip(&self) -> StoreResult<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Timeout(std::time::Duration::from_millis(50)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AddressStore for FlakyStore {
        async fn insert_network(&self, network: Network) -> StoreResult<Network> {
            self.inner.insert_network(network).await
        }
        async fn get_network(&self, tenant: &TenantId, id: NetworkId) -> StoreResult<Network> {
            self.inner.get_network(tenant, id).await
        }
        async fn list_networks(&self, tenant: &TenantId) -> StoreResult<Vec<Network>> {
            self.inner.list_networks(tenant).await
        }
        async fn deprecate_network(&self, tenant: &TenantId, id: NetworkId, at: DateTime<Utc>) -> StoreResult<Network> {
            self.inner.deprecate_network(tenant, id, at).await
        }
        async fn purge_network(
            &self,
            tenant: &TenantId,
            id: NetworkId,
            now: DateTime<Utc>,
        ) -> StoreResult<PurgeSummary> {
            *self.purged_at.lock().unwrap() = Some(now);
            self.inner.purge_network(tenant, id, now).await
        }
        async fn insert_allocation(&self, allocation: Allocation, now: DateTime<Utc>) -> StoreResult<Allocation> {
            self.inner.insert_allocation(allocation, now).await
        }
        async fn get_allocation(&self, tenant: &TenantId, id: AllocationId) -> StoreResult<Allocation> {
            self.inner.get_allocation(tenant, id).await
        }
        async fn list_allocations(&self, tenant: &TenantId, network_id: NetworkId) -> StoreResult<Vec<Allocation>> {
            self.inner.list_allocations(tenant, network_id).await
        }
        async fn release_allocation(&self, tenant: &TenantId, id: AllocationId, now: DateTime<Utc>) -> StoreResult<Allocation> {
            self.inner.release_allocation(tenant, id, now).await
        }
        async fn renew_allocation(&self, tenant: &TenantId, id: AllocationId, lease_seconds: u64, now: DateTime<Utc>) -> StoreResult<Allocation> {
            self.inner.renew_allocation(tenant, id, lease_seconds, now).await
        }
        async fn insert_reservation(&self, reservation: Reservation, allow_preemption: bool, now: DateTime<Utc>) -> StoreResult<ReservationInsert> {
            self.inner.insert_reservation(reservation, allow_preemption, now).await
        }
        async fn get_reservation(&self, tenant: &TenantId, id: ReservationId) -> StoreResult<Reservation> {
            self.inner.get_reservation(tenant, id).await
        }
        async fn list_reservations(&self, tenant: &TenantId, network_id: NetworkId) -> StoreResult<Vec<Reservation>> {
            self.inner.list_reservations(tenant, network_id).await
        }
        async fn cancel_reservation(&self, tenant: &TenantId, id: ReservationId, now: DateTime<Utc>) -> StoreResult<Reservation> {
            self.inner.cancel_reservation(tenant, id, now).await
        }
        async fn address_holder(&self, tenant: &TenantId, ip: IpAddr, now: DateTime<Utc>) -> StoreResult<Option<AddressHolder>> {
            self.inner.address_holder(tenant, ip, now).await
        }
        async fn occupied_addresses(&self, tenant: &TenantId, network_id: NetworkId, now: DateTime<Utc>) -> StoreResult<BTreeSet<IpAddr>> {
            self.inner.occupied_addresses(tenant, network_id, now).await
        }
        async fn due_allocations(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Allocation>> {
            self.inner.due_allocations(now, limit).await
        }
        async fn due_reservations(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Reservation>> {
            self.inner.due_reservations(now, limit).await
        }
        async fn expire_allocations(&self, ids: &[AllocationId], now: DateTime<Utc>) -> StoreResult<usize> {
            self.trip()?;
            self.inner.expire_allocations(ids, now).await
        }
        async fn expire_reservations(&self, ids: &[ReservationId], now: DateTime<Utc>) -> StoreResult<usize> {
            self.trip()?;
            self.inner.expire_reservations(ids, now).await
        }
        async fn tenants(&self) -> StoreResult<Vec<TenantId>> {
            self.inner.tenants().await
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        networks: NetworkService,
        allocations: AllocationEngine,
        reservations: ReservationEngine,
        scheduler: MaintenanceScheduler,
        tenant: TenantId,
    }

    fn fixture_with(store: Arc<dyn AddressStore>, config: MaintenanceConfig) -> Fixture {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        Fixture {
            networks: NetworkService::new(store.clone(), clock.clone()),
            allocations: AllocationEngine::new(store.clone(), clock.clone(), EngineConfig::default()),
            reservations: ReservationEngine::new(store.clone(), clock.clone(), EngineConfig::default()),
            scheduler: MaintenanceScheduler::new(store, clock.clone(), config),
            clock,
            tenant: TenantId::new("acme").unwrap(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryStore::new()), MaintenanceConfig::default())
    }

    async fn seed(fx: &Fixture, leases: usize, holds: usize) -> Network {
        let net = fx
            .networks
            .create(&fx.tenant, NewNetwork::new("10.50.0.0/24", NetworkKind::Customer))
            .await
            .unwrap();
        for _ in 0..leases {
            fx.allocations
                .allocate(&fx.tenant, AllocateRequest::dynamic(net.id).with_lease(60))
                .await
                .unwrap();
        }
        for n in 0..holds {
            let ip: IpAddr = format!("10.50.0.{}", 200 + n).parse().unwrap();
            fx.reservations
                .reserve(&fx.tenant, ReserveRequest::new(net.id, ip).with_ttl(60))
                .await
                .unwrap();
        }
        net
    }

    #[tokio::test]
    async fn test_cleanup_expires_then_is_idempotent() {
        let fx = fixture();
        seed(&fx, 5, 3).await;
        fx.clock.advance(ChronoDuration::seconds(61));

        let first = fx.scheduler.cleanup_expired(CleanupOptions::apply()).await;
        assert_eq!(first.expired_allocations, 5);
        assert_eq!(first.expired_reservations, 3);
        assert!(first.is_complete());

        let second = fx.scheduler.cleanup_expired(CleanupOptions::apply()).await;
        assert_eq!(second.total(), 0);
        assert_eq!(second.batches, 0);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let fx = fixture();
        let net = seed(&fx, 4, 2).await;
        fx.clock.advance(ChronoDuration::seconds(61));

        let preview = fx.scheduler.cleanup_expired(CleanupOptions::dry_run()).await;
        assert!(preview.dry_run);
        assert_eq!(preview.expired_allocations, 4);
        assert_eq!(preview.expired_reservations, 2);

        let records = fx.allocations.list(&fx.tenant, net.id).await.unwrap();
        assert!(records.iter().all(|a| a.status == AllocationStatus::Allocated));

        let applied = fx.scheduler.cleanup_expired(CleanupOptions::apply()).await;
        assert_eq!(applied.total(), preview.total());
    }

    #[tokio::test]
    async fn test_cleanup_respects_record_cap() {
        let fx = fixture_with(
            Arc::new(InMemoryStore::new()),
            MaintenanceConfig {
                batch_size: 2,
                ..MaintenanceConfig::default()
            },
        );
        seed(&fx, 7, 0).await;
        fx.clock.advance(ChronoDuration::seconds(61));

        let partial = fx
            .scheduler
            .cleanup_expired(CleanupOptions::apply().with_max_records(5))
            .await;
        assert_eq!(partial.expired_allocations, 5);
        assert_eq!(partial.batches, 3);
        assert!(partial.truncated);

        let rest = fx.scheduler.cleanup_expired(CleanupOptions::apply()).await;
        assert_eq!(rest.expired_allocations, 2);
    }

    #[tokio::test]
    async fn test_cap_reached_with_nothing_left_is_complete() {
        let fx = fixture_with(
            Arc::new(InMemoryStore::new()),
            MaintenanceConfig {
                batch_size: 2,
                ..MaintenanceConfig::default()
            },
        );
        seed(&fx, 5, 0).await;
        fx.clock.advance(ChronoDuration::seconds(61));

        let report = fx
            .scheduler
            .cleanup_expired(CleanupOptions::apply().with_max_records(5))
            .await;
        assert_eq!(report.expired_allocations, 5);
        assert!(!report.truncated);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_default_options_are_a_dry_run() {
        let fx = fixture();
        let net = seed(&fx, 3, 1).await;
        fx.clock.advance(ChronoDuration::seconds(61));
        assert!(CleanupOptions::default().dry_run);

        let preview = fx.scheduler.cleanup_expired(CleanupOptions::default()).await;
        assert!(preview.dry_run);
        assert_eq!(preview.expired_allocations, 3);
        let records = fx.allocations.list(&fx.tenant, net.id).await.unwrap();
        assert!(records.iter().all(|a| a.status == AllocationStatus::Allocated));

        let applied = fx.scheduler.cleanup_expired(CleanupOptions::apply()).await;
        assert!(!applied.dry_run);
        assert_eq!(applied.total(), 4);
    }

    #[tokio::test]
    async fn test_purge_uses_service_clock() {
        let store = Arc::new(FlakyStore::failing(0));
        let fx = fixture_with(store.clone(), MaintenanceConfig::default());
        let net = seed(&fx, 2, 1).await;
        fx.clock.advance(ChronoDuration::seconds(30));

        let summary = fx.networks.purge(&fx.tenant, net.id).await.unwrap();
        assert_eq!(summary, PurgeSummary { allocations: 2, reservations: 1 });
        assert_eq!(*store.purged_at.lock().unwrap(), Some(fx.clock.now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let fx = fixture_with(Arc::new(FlakyStore::failing(2)), MaintenanceConfig::default());
        seed(&fx, 3, 0).await;
        fx.clock.advance(ChronoDuration::seconds(61));

        let report = fx.scheduler.cleanup_expired(CleanupOptions::apply()).await;
        assert_eq!(report.expired_allocations, 3);
        assert_eq!(report.retries, 2);
        assert!(report.errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_partial_progress() {
        let config = MaintenanceConfig {
            max_retries: 1,
            ..MaintenanceConfig::default()
        };
        let fx = fixture_with(Arc::new(FlakyStore::failing(5)), config);
        seed(&fx, 2, 0).await;
        fx.clock.advance(ChronoDuration::seconds(61));

        let report = fx.scheduler.cleanup_expired(CleanupOptions::apply()).await;
        assert_eq!(report.expired_allocations, 0);
        assert!(!report.errors.is_empty());
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_audit_flags_inactive_network_and_stale_hold() {
        let fx = fixture();
        let net = seed(&fx, 1, 1).await;
        fx.networks.deprecate(&fx.tenant, net.id).await.unwrap();

        let clean_hold = fx.scheduler.audit().await.unwrap();
        assert_eq!(clean_hold.networks_scanned, 1);
        assert_eq!(clean_hold.findings.len(), 1);
        assert_eq!(clean_hold.findings[0].kind, FindingKind::AllocationOnInactiveNetwork);

        // Reservation TTL is 60s; the default factor flags it after 240s
        fx.clock.advance(ChronoDuration::seconds(241));
        let audit = fx.scheduler.audit().await.unwrap();
        assert!(audit
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::StaleReservation && f.severity == Severity::Low));
        assert_eq!(audit.count(Severity::High), 0);
    }

    #[tokio::test]
    async fn test_utilization_report_covers_active_networks() {
        let fx = fixture();
        seed(&fx, 10, 2).await;
        let retired = fx
            .networks
            .create(&fx.tenant, NewNetwork::new("10.60.0.0/24", NetworkKind::Management))
            .await
            .unwrap();
        fx.networks.deprecate(&fx.tenant, retired.id).await.unwrap();

        let report = fx.scheduler.utilization_report(None).await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].allocated, 10);
        assert_eq!(report[0].reserved, 2);
        assert_eq!(report[0].available, 254 - 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_stops_on_shutdown() {
        let fx = fixture();
        seed(&fx, 2, 0).await;
        fx.clock.advance(ChronoDuration::seconds(61));

        let scheduler = Arc::new(fx.scheduler);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(rx));

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let again = scheduler.cleanup_expired(CleanupOptions::apply()).await;
        assert_eq!(again.total(), 0);
    }
}
