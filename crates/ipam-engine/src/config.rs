//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Allocation / reservation engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lease applied when the caller gives none
    pub default_lease_secs: u64,
    /// Reservation TTL applied when the caller gives none
    pub default_reservation_ttl_secs: u64,
    /// Rescans allowed when a dynamic pick loses a race
    pub max_allocation_attempts: u32,
    /// Upper bound for one bulk allocation
    pub max_bulk_allocation: usize,
    /// Let higher-priority reservations cancel lower-priority ones
    pub reservation_preemption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_lease_secs: 86_400,
            default_reservation_ttl_secs: 3_600,
            max_allocation_attempts: 8,
            max_bulk_allocation: 256,
            reservation_preemption: false,
        }
    }
}

/// Maintenance scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between background runs
    pub interval_secs: u64,
    /// Records expired per store transaction
    pub batch_size: usize,
    /// Records processed per run unless the caller sets a cap
    pub max_records_per_run: usize,
    /// Attempts after a transient store error
    pub max_retries: u32,
    /// First retry delay, doubled each attempt
    pub retry_backoff_ms: u64,
    /// Active reservations older than `ttl * factor` are flagged by the audit
    pub stale_reservation_factor: u32,
    /// Run the conflict audit after each cleanup pass
    pub audit_each_run: bool,
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 500,
            max_records_per_run: 10_000,
            max_retries: 3,
            retry_backoff_ms: 100,
            stale_reservation_factor: 4,
            audit_each_run: true,
        }
    }
}
