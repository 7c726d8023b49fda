//! Tenant tier quotas
//!
//! Independent of the per-operation limits, every tenant has a tier-derived
//! quota across four windows (second, minute, hour, day) plus a cap on
//! in-flight requests. Quotas are resolved from the tenant's tier and cached
//! with a TTL; nothing is persisted per request beyond the window counters.
//!
//! ```text
//!   check_quota(tenant)
//!     ├─ quota = cache[tenant] or for_tier(resolver.tier(tenant))
//!     ├─ for window in [1s, 60s, 3600s, 86400s]:
//!     │     count = store.increment(key(window))
//!     │     count > ceiling ─► roll back this and earlier windows, reject
//!     └─ allow (remaining = tightest window)
//! ```

use dashmap::DashMap;
use ipam_common::{Clock, IpamError, IpamResult, TenantId};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::Operation;
use crate::limiter::{RateLimitDecision, Window};
use crate::store::CounterStore;

/// Tenant service tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

/// Per-tenant request ceilings; a zero window ceiling means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TenantQuota {
    pub tier: TenantTier,
    pub per_second: u64,
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
    /// Extra requests allowed on top of `per_second`
    pub burst: u64,
    pub max_concurrent: u32,
    /// Relative share when callers arbitrate between tenants
    pub priority_weight: u32,
}

impl TenantQuota {
    /// Get quota for tier
    pub fn for_tier(tier: TenantTier) -> Self {
        match tier {
            TenantTier::Free => Self {
                tier,
                per_second: 5,
                per_minute: 100,
                per_hour: 2_000,
                per_day: 20_000,
                burst: 10,
                max_concurrent: 4,
                priority_weight: 1,
            },
            TenantTier::Pro => Self {
                tier,
                per_second: 50,
                per_minute: 1_500,
                per_hour: 50_000,
                per_day: 500_000,
                burst: 100,
                max_concurrent: 32,
                priority_weight: 5,
            },
            TenantTier::Enterprise => Self {
                tier,
                per_second: 500,
                per_minute: 20_000,
                per_hour: 1_000_000,
                per_day: 10_000_000,
                burst: 1_000,
                max_concurrent: 256,
                priority_weight: 10,
            },
        }
    }

    /// (window length, ceiling) pairs, shortest window first
    fn windows(&self) -> [(u64, u64); 4] {
        let per_second = if self.per_second == 0 {
            0
        } else {
            self.per_second.saturating_add(self.burst)
        };
        [
            (1, per_second),
            (60, self.per_minute),
            (3_600, self.per_hour),
            (86_400, self.per_day),
        ]
    }
}

/// Maps tenants to tiers
pub trait TierResolver: Send + Sync {
    fn tier(&self, tenant: &TenantId) -> TenantTier;
}

/// Tier table from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTierResolver {
    tiers: HashMap<TenantId, TenantTier>,
    default_tier: TenantTier,
}

impl StaticTierResolver {
    pub fn new(tiers: HashMap<TenantId, TenantTier>, default_tier: TenantTier) -> Self {
        Self { tiers, default_tier }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.tenant_tiers.clone(), config.default_tier)
    }
}

impl TierResolver for StaticTierResolver {
    fn tier(&self, tenant: &TenantId) -> TenantTier {
        self.tiers.get(tenant).copied().unwrap_or(self.default_tier)
    }
}

/// Quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
    pub default_tier: TenantTier,
    pub tenant_tiers: HashMap<TenantId, TenantTier>,
    /// Explicit quotas that replace the tier table for a tenant
    pub overrides: HashMap<TenantId, TenantQuota>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_secs: 300,
            cache_capacity: 10_000,
            default_tier: TenantTier::Free,
            tenant_tiers: HashMap::new(),
            overrides: HashMap::new(),
        }
    }
}

/// Tier quota enforcement and concurrency caps
pub struct QuotaManager {
    config: QuotaConfig,
    resolver: Arc<dyn TierResolver>,
    cache: Cache<TenantId, TenantQuota>,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    in_flight: DashMap<TenantId, Arc<Semaphore>>,
}

impl QuotaManager {
    pub fn new(
        config: QuotaConfig,
        resolver: Arc<dyn TierResolver>,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs.max(1)))
            .build();

        Self {
            config,
            resolver,
            cache,
            store,
            clock,
            in_flight: DashMap::new(),
        }
    }

    /// Effective quota, served from cache
    pub fn quota(&self, tenant: &TenantId) -> TenantQuota {
        self.cache.get_with(tenant.clone(), || {
            self.config
                .overrides
                .get(tenant)
                .copied()
                .unwrap_or_else(|| TenantQuota::for_tier(self.resolver.tier(tenant)))
        })
    }

    /// Drop the cached quota so the next lookup re-resolves the tier
    pub fn invalidate(&self, tenant: &TenantId) {
        self.cache.invalidate(tenant);
        self.in_flight.remove(tenant);
    }

    /// Count one request against every quota window
    pub async fn check_quota(&self, tenant: &TenantId, operation: Operation) -> RateLimitDecision {
        let quota = self.quota(tenant);
        let now = self.clock.now();

        let mut counted: Vec<String> = Vec::with_capacity(4);
        let mut tightest: Option<(u64, Window, u64)> = None;

        for (window_secs, ceiling) in quota.windows() {
            if !self.config.enabled || ceiling == 0 {
                continue;
            }

            let window = Window::containing(now, window_secs);
            let key = format!("ipam:quota:{tenant}:{window_secs}:{}", window.start);

            let count = match self.store.increment(&key, window.ttl()).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(error = %err, %tenant, "quota store failed, allowing request");
                    metrics::counter!("ipam_quota_total", "outcome" => "fail_open").increment(1);
                    return RateLimitDecision {
                        allowed: true,
                        operation,
                        limit: ceiling,
                        remaining: ceiling,
                        reset_at: window.reset_time(),
                        retry_after_secs: None,
                        degraded: true,
                    };
                }
            };

            if count > ceiling {
                counted.push(key);
                for key in &counted {
                    if let Err(err) = self.store.decrement(key).await {
                        debug!(error = %err, key = %key, "quota rollback failed");
                    }
                }
                metrics::counter!("ipam_quota_total", "outcome" => "rejected").increment(1);
                debug!(%tenant, tier = ?quota.tier, window_secs, ceiling, "tenant quota exceeded");

                return RateLimitDecision {
                    allowed: false,
                    operation,
                    limit: ceiling,
                    remaining: 0,
                    reset_at: window.reset_time(),
                    retry_after_secs: Some(window.retry_after()),
                    degraded: false,
                };
            }

            counted.push(key);
            let remaining = ceiling - count;
            if tightest.map_or(true, |(_, _, r)| remaining < r) {
                tightest = Some((ceiling, window, remaining));
            }
        }

        metrics::counter!("ipam_quota_total", "outcome" => "allowed").increment(1);
        match tightest {
            Some((limit, window, remaining)) => RateLimitDecision {
                allowed: true,
                operation,
                limit,
                remaining,
                reset_at: window.reset_time(),
                retry_after_secs: None,
                degraded: false,
            },
            None => RateLimitDecision {
                allowed: true,
                operation,
                limit: 0,
                remaining: 0,
                reset_at: now,
                retry_after_secs: None,
                degraded: false,
            },
        }
    }

    /// Take one in-flight slot for the tenant; the slot frees on drop
    pub fn acquire_slot(&self, tenant: &TenantId) -> IpamResult<OwnedSemaphorePermit> {
        let max = self.quota(tenant).max_concurrent;
        let semaphore = self
            .in_flight
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(max as usize)))
            .clone();

        semaphore.try_acquire_owned().map_err(|_| {
            metrics::counter!("ipam_quota_total", "outcome" => "concurrency_rejected").increment(1);
            IpamError::RateLimitExceeded {
                operation: "concurrency".into(),
                limit: max as u64,
                remaining: 0,
                reset_at: self.clock.now(),
                retry_after_secs: 1,
            }
        })
    }

    /// Slots currently free for the tenant
    pub fn available_slots(&self, tenant: &TenantId) -> usize {
        match self.in_flight.get(tenant) {
            Some(semaphore) => semaphore.available_permits(),
            None => self.quota(tenant).max_concurrent as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalCounterStore;
    use ipam_common::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        tier: TenantTier,
    }

    impl TierResolver for CountingResolver {
        fn tier(&self, _tenant: &TenantId) -> TenantTier {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tier
        }
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn manager(config: QuotaConfig, clock: Arc<ManualClock>) -> QuotaManager {
        let resolver = Arc::new(StaticTierResolver::from_config(&config));
        QuotaManager::new(config, resolver, Arc::new(LocalCounterStore::new()), clock)
    }

    fn tiny() -> TenantQuota {
        TenantQuota {
            tier: TenantTier::Free,
            per_second: 2,
            per_minute: 3,
            per_hour: 0,
            per_day: 0,
            burst: 0,
            max_concurrent: 2,
            priority_weight: 1,
        }
    }

    #[test]
    fn test_tier_table() {
        let free = TenantQuota::for_tier(TenantTier::Free);
        let enterprise = TenantQuota::for_tier(TenantTier::Enterprise);
        assert!(free.per_minute < enterprise.per_minute);
        assert!(free.max_concurrent < enterprise.max_concurrent);
        assert_eq!(free.windows()[0], (1, 15));
    }

    #[test]
    fn test_quota_is_cached_until_invalidated() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            tier: TenantTier::Pro,
        });
        let manager = QuotaManager::new(
            QuotaConfig::default(),
            resolver.clone(),
            Arc::new(LocalCounterStore::new()),
            Arc::new(ManualClock::at_unix(0)),
        );
        let acme = tenant("acme");

        assert_eq!(manager.quota(&acme).tier, TenantTier::Pro);
        assert_eq!(manager.quota(&acme).tier, TenantTier::Pro);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        manager.invalidate(&acme);
        manager.quota(&acme);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_static_tiers_and_overrides() {
        let mut config = QuotaConfig::default();
        config.tenant_tiers.insert(tenant("big"), TenantTier::Enterprise);
        config.overrides.insert(tenant("odd"), tiny());
        let manager = manager(config, Arc::new(ManualClock::at_unix(0)));

        assert_eq!(manager.quota(&tenant("big")).tier, TenantTier::Enterprise);
        assert_eq!(manager.quota(&tenant("small")).tier, TenantTier::Free);
        assert_eq!(manager.quota(&tenant("odd")).per_minute, 3);
    }

    #[tokio::test]
    async fn test_rejection_rolls_back_every_window() {
        let clock = Arc::new(ManualClock::at_unix(600));
        let mut config = QuotaConfig::default();
        config.overrides.insert(tenant("acme"), tiny());
        let manager = manager(config, clock.clone());
        let acme = tenant("acme");

        // Second window caps at two; minute window is not charged for the third
        assert!(manager.check_quota(&acme, Operation::Allocate).await.allowed);
        assert!(manager.check_quota(&acme, Operation::Allocate).await.allowed);
        let rejected = manager.check_quota(&acme, Operation::Allocate).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.limit, 2);

        clock.advance(chrono::Duration::seconds(1));
        let third = manager.check_quota(&acme, Operation::Allocate).await;
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);

        // Minute window is full now
        clock.advance(chrono::Duration::seconds(1));
        let rejected = manager.check_quota(&acme, Operation::Allocate).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.limit, 3);
        assert_eq!(rejected.retry_after_secs, Some(58));

        clock.advance(chrono::Duration::seconds(58));
        assert!(manager.check_quota(&acme, Operation::Allocate).await.allowed);
    }

    #[tokio::test]
    async fn test_disabled_quotas_allow() {
        let config = QuotaConfig {
            enabled: false,
            ..QuotaConfig::default()
        };
        let manager = manager(config, Arc::new(ManualClock::at_unix(0)));
        for _ in 0..100 {
            assert!(manager.check_quota(&tenant("acme"), Operation::Reserve).await.allowed);
        }
    }

    #[test]
    fn test_concurrency_cap() {
        let mut config = QuotaConfig::default();
        config.overrides.insert(tenant("acme"), tiny());
        let manager = manager(config, Arc::new(ManualClock::at_unix(0)));
        let acme = tenant("acme");

        let first = manager.acquire_slot(&acme).unwrap();
        let _second = manager.acquire_slot(&acme).unwrap();
        let err = manager.acquire_slot(&acme).unwrap_err();
        assert!(matches!(err, IpamError::RateLimitExceeded { limit: 2, .. }));
        assert_eq!(manager.available_slots(&acme), 0);

        drop(first);
        assert_eq!(manager.available_slots(&acme), 1);
        assert!(manager.acquire_slot(&acme).is_ok());

        // Other tenants have their own slots
        assert_eq!(manager.available_slots(&tenant("other")), 4);
    }
}
