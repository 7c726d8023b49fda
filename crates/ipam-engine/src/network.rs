//! Network administration
//!
//! Creation validates everything before touching the store; overlap with
//! the tenant's active networks is enforced by the store itself.

use chrono::{DateTime, Utc};
use ipam_common::{cidr, Clock, IpamError, IpamResult, NetworkId, NetworkKind, TenantId};
use ipam_store::{AddressStore, Network, NetworkStatus, PurgeSummary};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Network creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNetwork {
    pub cidr: String,
    pub kind: NetworkKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
    #[serde(default)]
    pub vlan_id: Option<u16>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub dhcp_enabled: bool,
}

impl NewNetwork {
    pub fn new(cidr: impl Into<String>, kind: NetworkKind) -> Self {
        Self {
            cidr: cidr.into(),
            kind,
            name: None,
            gateway: None,
            dns_servers: Vec::new(),
            vlan_id: None,
            site: None,
            dhcp_enabled: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_dns(mut self, servers: Vec<IpAddr>) -> Self {
        self.dns_servers = servers;
        self
    }

    pub fn with_vlan(mut self, vlan_id: u16) -> Self {
        self.vlan_id = Some(vlan_id);
        self
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_dhcp(mut self) -> Self {
        self.dhcp_enabled = true;
        self
    }
}

/// Point-in-time usage of one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkUtilization {
    pub tenant_id: TenantId,
    pub network_id: NetworkId,
    pub cidr: String,
    pub total: u128,
    pub usable: u128,
    pub allocated: u128,
    pub reserved: u128,
    pub available: u128,
    /// Allocated, reserved and gateway addresses over usable
    pub utilization_percent: f64,
}

/// Network administration service
pub struct NetworkService {
    store: Arc<dyn AddressStore>,
    clock: Arc<dyn Clock>,
}

impl NetworkService {
    pub fn new(store: Arc<dyn AddressStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a network
    pub async fn create(&self, tenant: &TenantId, request: NewNetwork) -> IpamResult<Network> {
        let network_cidr = cidr::parse_cidr(&request.cidr)?;

        if let Some(vlan) = request.vlan_id {
            if !(1..=4094).contains(&vlan) {
                return Err(IpamError::Validation(format!(
                    "VLAN id {vlan} out of range 1-4094"
                )));
            }
        }
        if let Some(gateway) = request.gateway {
            if !cidr::usable_range(&network_cidr).contains(gateway) {
                return Err(IpamError::Validation(format!(
                    "gateway {gateway} is not a usable address of {network_cidr}"
                )));
            }
        }
        if request.site.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(IpamError::Validation("site cannot be blank".into()));
        }

        let now = self.clock.now();
        let network = Network {
            id: NetworkId::new(),
            tenant_id: tenant.clone(),
            name: request
                .name
                .unwrap_or_else(|| format!("{}-{}", request.kind, network_cidr)),
            cidr: network_cidr,
            kind: request.kind,
            gateway: request.gateway,
            dns_servers: request.dns_servers,
            vlan_id: request.vlan_id,
            site: request.site,
            dhcp_enabled: request.dhcp_enabled,
            status: NetworkStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let network = self.store.insert_network(network).await?;
        tracing::info!(
            tenant = %tenant,
            network_id = %network.id,
            cidr = %network.cidr,
            kind = %network.kind,
            "network created"
        );
        Ok(network)
    }

    /// Get network
    pub async fn get(&self, tenant: &TenantId, id: NetworkId) -> IpamResult<Network> {
        Ok(self.store.get_network(tenant, id).await?)
    }

    /// List tenant networks
    pub async fn list(&self, tenant: &TenantId) -> IpamResult<Vec<Network>> {
        Ok(self.store.list_networks(tenant).await?)
    }

    /// Soft delete
    pub async fn deprecate(&self, tenant: &TenantId, id: NetworkId) -> IpamResult<Network> {
        let network = self.store.deprecate_network(tenant, id, self.clock.now()).await?;
        tracing::info!(tenant = %tenant, network_id = %id, "network deprecated");
        Ok(network)
    }

    /// Hard delete with cascade
    pub async fn purge(&self, tenant: &TenantId, id: NetworkId) -> IpamResult<PurgeSummary> {
        let summary = self.store.purge_network(tenant, id, self.clock.now()).await?;
        tracing::warn!(
            tenant = %tenant,
            network_id = %id,
            allocations = summary.allocations,
            reservations = summary.reservations,
            "network purged"
        );
        Ok(summary)
    }

    /// Current utilization
    pub async fn utilization(&self, tenant: &TenantId, id: NetworkId) -> IpamResult<NetworkUtilization> {
        let network = self.store.get_network(tenant, id).await?;
        measure(self.store.as_ref(), &network, self.clock.now()).await
    }
}

/// Count active bindings of a network
pub(crate) async fn measure(
    store: &dyn AddressStore,
    network: &Network,
    now: DateTime<Utc>,
) -> IpamResult<NetworkUtilization> {
    let tenant = &network.tenant_id;
    let allocated = store
        .list_allocations(tenant, network.id)
        .await?
        .iter()
        .filter(|a| a.is_active(now))
        .count() as u128;
    let reserved = store
        .list_reservations(tenant, network.id)
        .await?
        .iter()
        .filter(|r| r.is_active(now))
        .count() as u128;

    let range = cidr::usable_range(&network.cidr);
    let usable = range.len();
    let gateway = network
        .gateway
        .filter(|gw| range.contains(*gw))
        .map_or(0, |_| 1);
    let available = usable.saturating_sub(allocated + reserved + gateway);

    Ok(NetworkUtilization {
        tenant_id: tenant.clone(),
        network_id: network.id,
        cidr: network.cidr.to_string(),
        total: cidr::total_addresses(&network.cidr),
        usable,
        allocated,
        reserved,
        available,
        utilization_percent: percent(allocated + reserved + gateway, usable),
    })
}

fn percent(used: u128, usable: u128) -> f64 {
    if usable == 0 {
        return 0.0;
    }
    (used as f64 / usable as f64) * 100.0
}
