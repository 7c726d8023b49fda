//! OpenSASE IPAM Rate Limiting
//!
//! Tenant-aware throttling in front of the allocation engine.
//!
//! # Features
//!
//! - Fixed-window counters per (operation, tenant[, user]) with burst
//! - Pluggable atomic counter store, in-process fallback
//! - Fail-open on counter store failure
//! - Tier-derived tenant quotas (second/minute/hour/day) cached with a TTL
//! - Per-tenant in-flight caps
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ipam_common::{SystemClock, TenantId};
//! use ipam_ratelimit::{LocalCounterStore, Operation, RateLimitConfig, RateLimiter};
//!
//! # tokio_test::block_on(async {
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::default(),
//!     Arc::new(LocalCounterStore::new()),
//!     Arc::new(SystemClock),
//! );
//! let tenant = TenantId::new("acme").unwrap();
//! let decision = limiter.check(Operation::Allocate, &tenant, None).await;
//! assert!(decision.allowed);
//! # });
//! ```

pub mod config;
pub mod limiter;
pub mod quota;
pub mod store;

pub use config::{LimitRule, Operation, RateLimitConfig};
pub use limiter::{RateLimitDecision, RateLimiter};
pub use quota::{QuotaConfig, QuotaManager, StaticTierResolver, TenantQuota, TenantTier, TierResolver};
pub use store::{CounterError, CounterStore, LocalCounterStore};
