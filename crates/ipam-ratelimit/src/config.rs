//! Rate limit configuration

use ipam_common::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Protected operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Allocate,
    Reserve,
    Release,
    CancelReservation,
    CreateNetwork,
    BulkAllocate,
    PlanSubnets,
    CheckAvailability,
    Cleanup,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Allocate,
        Operation::Reserve,
        Operation::Release,
        Operation::CancelReservation,
        Operation::CreateNetwork,
        Operation::BulkAllocate,
        Operation::PlanSubnets,
        Operation::CheckAvailability,
        Operation::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allocate => "allocate",
            Self::Reserve => "reserve",
            Self::Release => "release",
            Self::CancelReservation => "cancel_reservation",
            Self::CreateNetwork => "create_network",
            Self::BulkAllocate => "bulk_allocate",
            Self::PlanSubnets => "plan_subnets",
            Self::CheckAvailability => "check_availability",
            Self::Cleanup => "cleanup",
        }
    }

    /// Built-in limit for the operation
    pub fn default_rule(&self) -> LimitRule {
        match self {
            Self::Allocate | Self::Reserve => LimitRule::per_minute(100, 20),
            Self::Release | Self::CancelReservation => LimitRule::per_minute(200, 40),
            Self::CreateNetwork => LimitRule::per_minute(10, 2),
            Self::BulkAllocate => LimitRule::per_minute(5, 1),
            Self::PlanSubnets => LimitRule::per_minute(30, 5),
            Self::CheckAvailability => LimitRule::per_minute(600, 100),
            Self::Cleanup => LimitRule::per_minute(2, 0),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `requests` per `window_secs`, plus `burst` extra requests per window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    pub requests: u64,
    pub window_secs: u64,
    #[serde(default)]
    pub burst: u64,
}

impl LimitRule {
    pub fn new(requests: u64, window_secs: u64, burst: u64) -> Self {
        Self {
            requests,
            window_secs: window_secs.max(1),
            burst,
        }
    }

    pub fn per_second(requests: u64, burst: u64) -> Self {
        Self::new(requests, 1, burst)
    }

    pub fn per_minute(requests: u64, burst: u64) -> Self {
        Self::new(requests, 60, burst)
    }

    /// Highest counter value still allowed in one window
    pub fn ceiling(&self) -> u64 {
        self.requests.saturating_add(self.burst)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

/// Limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Count per (tenant, user) instead of per tenant when a user is given
    pub key_by_user: bool,
    /// Global per-operation rules; operations not listed use their built-in rule
    pub operations: HashMap<Operation, LimitRule>,
    /// Per-tenant overrides, consulted first
    pub tenants: HashMap<TenantId, HashMap<Operation, LimitRule>>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_by_user: false,
            operations: HashMap::new(),
            tenants: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Effective rule for `operation` as seen by `tenant`
    pub fn rule_for(&self, operation: Operation, tenant: &TenantId) -> LimitRule {
        self.tenants
            .get(tenant)
            .and_then(|rules| rules.get(&operation))
            .or_else(|| self.operations.get(&operation))
            .copied()
            .unwrap_or_else(|| operation.default_rule())
    }

    pub fn with_rule(mut self, operation: Operation, rule: LimitRule) -> Self {
        self.operations.insert(operation, rule);
        self
    }

    pub fn with_tenant_rule(mut self, tenant: TenantId, operation: Operation, rule: LimitRule) -> Self {
        self.tenants.entry(tenant).or_default().insert(operation, rule);
        self
    }
}
