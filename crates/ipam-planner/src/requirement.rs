//! Sized subnet demands

use ipam_common::{IpamError, IpamResult, NetworkKind};
use serde::{Deserialize, Serialize};

/// Shortest prefix a planned block may have
pub const MIN_PREFIX: u8 = 8;
/// Longest prefix a planned block may have
pub const MAX_PREFIX: u8 = 30;

/// One purpose-tagged block demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetRequirement {
    pub purpose: NetworkKind,
    /// Optional label carried into the plan
    #[serde(default)]
    pub name: Option<String>,
    pub min_hosts: u32,
    /// Caps the block size when set
    #[serde(default)]
    pub max_hosts: Option<u32>,
    /// Used as-is when it fits `min_hosts`
    #[serde(default)]
    pub preferred_prefix_length: Option<u8>,
    /// Headroom multiplier applied to `min_hosts`
    #[serde(default = "default_growth")]
    pub growth_factor: f64,
    /// Higher is planned first
    #[serde(default)]
    pub priority: i32,
}

fn default_growth() -> f64 {
    1.0
}

impl SubnetRequirement {
    pub fn new(purpose: NetworkKind, min_hosts: u32) -> Self {
        Self {
            purpose,
            name: None,
            min_hosts,
            max_hosts: None,
            preferred_prefix_length: None,
            growth_factor: default_growth(),
            priority: 0,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_hosts(mut self, max_hosts: u32) -> Self {
        self.max_hosts = Some(max_hosts);
        self
    }

    pub fn with_preferred_prefix(mut self, prefix: u8) -> Self {
        self.preferred_prefix_length = Some(prefix);
        self
    }

    pub fn with_growth(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> IpamResult<()> {
        if self.min_hosts == 0 {
            return Err(IpamError::Validation("min_hosts must be at least 1".into()));
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(IpamError::Validation(format!(
                "growth_factor must be a finite value >= 1.0, got {}",
                self.growth_factor
            )));
        }
        if let Some(max) = self.max_hosts {
            if max < self.min_hosts {
                return Err(IpamError::Validation(format!(
                    "max_hosts {max} is below min_hosts {}",
                    self.min_hosts
                )));
            }
        }
        if let Some(prefix) = self.preferred_prefix_length {
            if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
                return Err(IpamError::Validation(format!(
                    "preferred prefix /{prefix} outside /{MIN_PREFIX}-/{MAX_PREFIX}"
                )));
            }
        }
        Ok(())
    }

    /// Hosts to provision, growth included
    pub fn hosts_needed(&self) -> u64 {
        (self.min_hosts as f64 * self.growth_factor).ceil() as u64
    }

    /// Prefix length of the block planned for this requirement
    pub fn target_prefix(&self) -> u8 {
        let needed = prefix_for_hosts(self.hosts_needed());
        let mut target = needed.min(self.purpose.default_max_prefix());

        if let Some(max) = self.max_hosts {
            target = target.max(prefix_for_hosts(max.max(self.min_hosts) as u64));
        }
        if let Some(preferred) = self.preferred_prefix_length {
            if usable_hosts(preferred) >= self.min_hosts as u64 {
                target = preferred;
            }
        }
        target.clamp(MIN_PREFIX, MAX_PREFIX)
    }

    /// Addresses consumed by the planned block
    pub fn block_size(&self) -> u64 {
        block_size(self.target_prefix())
    }
}

/// Longest IPv4 prefix whose block holds `hosts` plus network and broadcast
pub fn prefix_for_hosts(hosts: u64) -> u8 {
    let needed = hosts.saturating_add(2);
    let mut bits = 0u32;
    while bits < 32 && (1u64 << bits) < needed {
        bits += 1;
    }
    (32 - bits) as u8
}

/// Host addresses of an IPv4 block, network and broadcast excluded
pub fn usable_hosts(prefix: u8) -> u64 {
    match prefix {
        32 => 1,
        31 => 2,
        p => block_size(p) - 2,
    }
}

pub fn block_size(prefix: u8) -> u64 {
    1u64 << (32 - prefix.min(32) as u32)
}
