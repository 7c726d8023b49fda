//! SDK configuration
//!
//! One JSON document covers every component. Missing sections and fields
//! take their defaults, so `{}` is a valid configuration.

use ipam_common::{IpamError, IpamResult};
use ipam_engine::{EngineConfig, MaintenanceConfig};
use ipam_ratelimit::{QuotaConfig, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "IPAM_CONFIG";

/// Complete IPAM configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpamConfig {
    pub engine: EngineConfig,
    pub rate_limit: RateLimitConfig,
    pub quota: QuotaConfig,
    pub maintenance: MaintenanceConfig,
    pub capabilities: Capabilities,
    pub log: LogConfig,
}

/// Feature switches, resolved once when the SDK is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Per-operation request throttling
    pub rate_limiting: bool,
    /// Tier quotas and in-flight caps
    pub tenant_quotas: bool,
    /// Counters live in a store shared by every instance
    pub shared_counter_store: bool,
    /// Higher-priority reservations may cancel lower-priority ones
    pub reservation_preemption: bool,
    /// Run the maintenance loop in the background
    pub background_maintenance: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            rate_limiting: true,
            tenant_quotas: false,
            shared_counter_store: false,
            reservation_preemption: false,
            background_maintenance: true,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            ansi: true,
        }
    }
}

impl IpamConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> IpamResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IpamError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> IpamResult<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| IpamError::Config(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `IPAM_CONFIG`, or defaults when it is unset
    pub fn from_env() -> IpamResult<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => {
                tracing::warn!("{CONFIG_ENV} not set, using default configuration");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> IpamResult<()> {
        if self.engine.max_allocation_attempts == 0 {
            return Err(IpamError::Config("engine.max_allocation_attempts must be positive".into()));
        }
        if self.engine.max_bulk_allocation == 0 {
            return Err(IpamError::Config("engine.max_bulk_allocation must be positive".into()));
        }
        if self.maintenance.batch_size == 0 {
            return Err(IpamError::Config("maintenance.batch_size must be positive".into()));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(IpamError::Config("maintenance.interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Copy capability switches into the component sections
    pub(crate) fn resolved(mut self) -> Self {
        self.engine.reservation_preemption = self.capabilities.reservation_preemption;
        self.rate_limit.enabled &= self.capabilities.rate_limiting;
        self.quota.enabled &= self.capabilities.tenant_quotas;
        self
    }
}
