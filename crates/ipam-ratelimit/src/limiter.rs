//! Fixed-window rate limiter
//!
//! Every (operation, tenant[, user]) pair gets one counter per window. The
//! window is aligned to the epoch so that every instance sharing a counter
//! store agrees on where it starts:
//!
//! ```text
//!   window_start = floor(now / window) * window
//!   key          = ipam:rl:{operation}:{tenant}[:{user}]:{window_start}
//! ```
//!
//! A request is admitted while the counter stays at or below
//! `requests + burst`. Rejected requests roll their increment back so they
//! do not eat into the next caller's budget. When the counter store fails,
//! the limiter admits the request and flags the decision as degraded.

use chrono::{DateTime, Utc};
use ipam_common::{Clock, IpamError, IpamResult, TenantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{LimitRule, Operation, RateLimitConfig};
use crate::store::CounterStore;

/// Outcome of one rate-limit check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub operation: Operation,
    /// Ceiling including burst
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// Set only on rejection
    pub retry_after_secs: Option<u64>,
    /// True when the counter store failed and the request was let through
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Standard rate-limit response headers
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit".to_string(), self.limit.to_string()),
            ("X-RateLimit-Remaining".to_string(), self.remaining.to_string()),
            ("X-RateLimit-Reset".to_string(), self.reset_at.timestamp().to_string()),
        ];

        if let Some(retry) = self.retry_after_secs {
            headers.push(("Retry-After".to_string(), retry.to_string()));
        }

        headers
    }

    /// Convert a rejection into [`IpamError::RateLimitExceeded`]
    pub fn into_result(self) -> IpamResult<Self> {
        if self.allowed {
            return Ok(self);
        }
        Err(IpamError::RateLimitExceeded {
            operation: self.operation.to_string(),
            limit: self.limit,
            remaining: self.remaining,
            reset_at: self.reset_at,
            retry_after_secs: self.retry_after_secs.unwrap_or(1),
        })
    }
}

/// Epoch-aligned window containing `now`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub start: i64,
    pub reset_at: i64,
    pub now: i64,
}

impl Window {
    pub(crate) fn containing(now: DateTime<Utc>, window_secs: u64) -> Self {
        let now = now.timestamp();
        let len = window_secs.clamp(1, i64::MAX as u64) as i64;
        let start = now.div_euclid(len) * len;
        Self {
            start,
            reset_at: start.saturating_add(len),
            now,
        }
    }

    pub(crate) fn reset_time(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.reset_at, 0).unwrap_or_default()
    }

    /// Whole seconds until the window resets, at least one
    pub(crate) fn retry_after(&self) -> u64 {
        (self.reset_at - self.now).max(1) as u64
    }

    /// Counter lifetime: the rest of the window plus a second of slack
    pub(crate) fn ttl(&self) -> Duration {
        Duration::from_secs(self.retry_after() + 1)
    }
}

/// Per-tenant, per-operation limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { config, store, clock }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request and decide whether it may proceed
    pub async fn check(&self, operation: Operation, tenant: &TenantId, user: Option<&str>) -> RateLimitDecision {
        let rule = self.config.rule_for(operation, tenant);
        let window = Window::containing(self.clock.now(), rule.window_secs);

        if !self.config.enabled {
            return Self::admitted(operation, &rule, &window, rule.ceiling(), false);
        }

        let key = self.key(operation, tenant, user, window.start);
        let count = match self.store.increment(&key, window.ttl()).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    error = %err,
                    store = self.store.name(),
                    %operation,
                    %tenant,
                    "rate limit store failed, allowing request"
                );
                metrics::counter!("ipam_rate_limit_total", "operation" => operation.as_str(), "outcome" => "fail_open")
                    .increment(1);
                return Self::admitted(operation, &rule, &window, rule.ceiling(), true);
            }
        };

        if count <= rule.ceiling() {
            metrics::counter!("ipam_rate_limit_total", "operation" => operation.as_str(), "outcome" => "allowed")
                .increment(1);
            return Self::admitted(operation, &rule, &window, rule.ceiling() - count, false);
        }

        if let Err(err) = self.store.decrement(&key).await {
            debug!(error = %err, key = %key, "rate limit rollback failed");
        }
        metrics::counter!("ipam_rate_limit_total", "operation" => operation.as_str(), "outcome" => "rejected")
            .increment(1);
        debug!(%operation, %tenant, count, limit = rule.ceiling(), "rate limit exceeded");

        RateLimitDecision {
            allowed: false,
            operation,
            limit: rule.ceiling(),
            remaining: 0,
            reset_at: window.reset_time(),
            retry_after_secs: Some(window.retry_after()),
            degraded: false,
        }
    }

    /// [`check`](Self::check), turning a rejection into an error
    pub async fn enforce(
        &self,
        operation: Operation,
        tenant: &TenantId,
        user: Option<&str>,
    ) -> IpamResult<RateLimitDecision> {
        self.check(operation, tenant, user).await.into_result()
    }

    fn key(&self, operation: Operation, tenant: &TenantId, user: Option<&str>, window_start: i64) -> String {
        match user.filter(|_| self.config.key_by_user) {
            Some(user) => format!("ipam:rl:{operation}:{tenant}:{user}:{window_start}"),
            None => format!("ipam:rl:{operation}:{tenant}:{window_start}"),
        }
    }

    fn admitted(
        operation: Operation,
        rule: &LimitRule,
        window: &Window,
        remaining: u64,
        degraded: bool,
    ) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            operation,
            limit: rule.ceiling(),
            remaining,
            reset_at: window.reset_time(),
            retry_after_secs: None,
            degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CounterError, LocalCounterStore};
    use async_trait::async_trait;
    use ipam_common::ManualClock;

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, CounterError> {
            Err(CounterError::Unavailable("connection refused".into()))
        }

        async fn decrement(&self, _key: &str) -> Result<(), CounterError> {
            Err(CounterError::Unavailable("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "down"
        }
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn limiter(config: RateLimitConfig, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(config, Arc::new(LocalCounterStore::new()), clock)
    }

    #[tokio::test]
    async fn test_burst_then_reject_then_next_window() {
        // Five seconds into the window starting at 1_699_999_980
        let clock = Arc::new(ManualClock::at_unix(1_699_999_985));
        let config = RateLimitConfig::default().with_rule(Operation::Allocate, LimitRule::per_minute(3, 2));
        let limiter = limiter(config, clock.clone());
        let acme = tenant("acme");

        for expected_remaining in (0..5).rev() {
            let decision = limiter.check(Operation::Allocate, &acme, None).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let rejected = limiter.check(Operation::Allocate, &acme, None).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.limit, 5);
        assert_eq!(rejected.retry_after_secs, Some(55));

        let err = rejected.into_result().unwrap_err();
        assert_eq!(err.code(), "too_many_requests");

        clock.advance(chrono::Duration::seconds(55));
        let decision = limiter.check(Operation::Allocate, &acme, None).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_rejections_do_not_consume_budget() {
        let clock = Arc::new(ManualClock::at_unix(60_000));
        let config = RateLimitConfig::default().with_rule(Operation::Reserve, LimitRule::per_minute(1, 0));
        let store = Arc::new(LocalCounterStore::new());
        let limiter = RateLimiter::new(config, store.clone(), clock);
        let acme = tenant("acme");

        assert!(limiter.check(Operation::Reserve, &acme, None).await.allowed);
        for _ in 0..5 {
            assert!(!limiter.check(Operation::Reserve, &acme, None).await.allowed);
        }

        // Counter was rolled back to the ceiling each time
        let next = store.increment("ipam:rl:reserve:acme:60000", Duration::from_secs(60)).await.unwrap();
        assert_eq!(next, 2);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_is_down() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let limiter = RateLimiter::new(RateLimitConfig::default(), Arc::new(DownStore), clock);

        let decision = limiter.enforce(Operation::Cleanup, &tenant("acme"), None).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);
    }

    #[tokio::test]
    async fn test_tenants_and_operations_are_isolated() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let config = RateLimitConfig::default()
            .with_rule(Operation::CreateNetwork, LimitRule::per_minute(1, 0))
            .with_tenant_rule(tenant("vip"), Operation::CreateNetwork, LimitRule::per_minute(3, 0));
        let limiter = limiter(config, clock);

        assert!(limiter.check(Operation::CreateNetwork, &tenant("acme"), None).await.allowed);
        assert!(!limiter.check(Operation::CreateNetwork, &tenant("acme"), None).await.allowed);
        assert!(limiter.check(Operation::PlanSubnets, &tenant("acme"), None).await.allowed);

        for _ in 0..3 {
            assert!(limiter.check(Operation::CreateNetwork, &tenant("vip"), None).await.allowed);
        }
        assert!(!limiter.check(Operation::CreateNetwork, &tenant("vip"), None).await.allowed);
    }

    #[tokio::test]
    async fn test_user_keys_only_when_enabled() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let mut config = RateLimitConfig::default().with_rule(Operation::Allocate, LimitRule::per_minute(1, 0));
        let acme = tenant("acme");

        let shared = limiter(config.clone(), clock.clone());
        assert!(shared.check(Operation::Allocate, &acme, Some("alice")).await.allowed);
        assert!(!shared.check(Operation::Allocate, &acme, Some("bob")).await.allowed);

        config.key_by_user = true;
        let per_user = limiter(config, clock);
        assert!(per_user.check(Operation::Allocate, &acme, Some("alice")).await.allowed);
        assert!(per_user.check(Operation::Allocate, &acme, Some("bob")).await.allowed);
        assert!(!per_user.check(Operation::Allocate, &acme, Some("bob")).await.allowed);
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everything() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let config = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let limiter = limiter(config, clock);
        for _ in 0..10 {
            assert!(limiter.check(Operation::Cleanup, &tenant("acme"), None).await.allowed);
        }
    }

    #[test]
    fn test_headers() {
        let decision = RateLimitDecision {
            allowed: false,
            operation: Operation::Allocate,
            limit: 120,
            remaining: 0,
            reset_at: DateTime::<Utc>::from_timestamp(1_700_000_040, 0).unwrap(),
            retry_after_secs: Some(12),
            degraded: false,
        };

        let headers = decision.headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[0], ("X-RateLimit-Limit".to_string(), "120".to_string()));
        assert_eq!(headers[2].1, "1700000040");
        assert_eq!(headers[3], ("Retry-After".to_string(), "12".to_string()));
    }

    #[test]
    fn test_window_alignment() {
        let at = DateTime::<Utc>::from_timestamp(125, 0).unwrap();
        let window = Window::containing(at, 60);
        assert_eq!(window.start, 120);
        assert_eq!(window.retry_after(), 55);

        let on_edge = Window::containing(DateTime::<Utc>::from_timestamp(180, 0).unwrap(), 60);
        assert_eq!(on_edge.start, 180);
        assert_eq!(on_edge.retry_after(), 60);
    }
}
