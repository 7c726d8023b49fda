//! Partitioning a parent block
//!
//! Free space is a list of aligned power-of-two blocks. Each requirement
//! takes the smallest free block that can hold it (lowest address on ties)
//! and splits it in halves down to the target size, returning the unused
//! halves to the free list. Because a split only ever creates sizes that were
//! missing from the free list, free blocks keep pairwise distinct sizes, so
//! any requirement whose block fits the total free space is satisfied.

use ipam_common::{cidr, IpamError, IpamResult, NetworkKind};
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::requirement::{block_size, usable_hosts, SubnetRequirement};

/// A block handed to one requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSubnet {
    pub purpose: NetworkKind,
    pub name: Option<String>,
    pub cidr: Ipv4Network,
    pub prefix_len: u8,
    pub usable_hosts: u64,
    pub requested_hosts: u32,
    pub priority: i32,
    /// Position of the requirement in the caller's list
    pub requirement_index: usize,
    /// First usable address, conventionally the gateway
    pub gateway: Ipv4Addr,
}

/// A requirement the plan could not satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFailure {
    pub requirement_index: usize,
    pub purpose: NetworkKind,
    pub min_hosts: u32,
    pub target_prefix: u8,
    pub reason: String,
}

/// Planning result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetPlan {
    pub parent: Ipv4Network,
    /// In planning order
    pub allocated: Vec<PlannedSubnet>,
    /// Unused space, coalesced and sorted by address
    pub remaining_space: Vec<Ipv4Network>,
    /// Share of the parent covered by allocated blocks
    pub utilization_percent: f64,
    pub failures: Vec<PlanFailure>,
}

impl SubnetPlan {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn allocated_addresses(&self) -> u64 {
        self.allocated.iter().map(|s| block_size(s.prefix_len)).sum()
    }

    pub fn remaining_addresses(&self) -> u64 {
        self.remaining_space
            .iter()
            .map(|n| block_size(n.prefix()))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    start: u32,
    prefix: u8,
}

impl Block {
    fn size(&self) -> u64 {
        block_size(self.prefix)
    }
}

/// Plan with the default order: priority descending, then block size descending
pub fn plan(parent: &str, requirements: &[SubnetRequirement]) -> IpamResult<SubnetPlan> {
    let parent = parse_parent(parent)?;
    validate_all(requirements)?;
    let order = priority_first_order(requirements);
    Ok(plan_in_order(parent, requirements, &order))
}

pub(crate) fn parse_parent(parent: &str) -> IpamResult<Ipv4Network> {
    match cidr::parse_cidr(parent)? {
        IpNetwork::V4(v4) => Ok(v4),
        IpNetwork::V6(v6) => Err(IpamError::InvalidCidr(format!(
            "{v6}: subnet planning supports IPv4 parents only"
        ))),
    }
}

pub(crate) fn validate_all(requirements: &[SubnetRequirement]) -> IpamResult<()> {
    for (index, requirement) in requirements.iter().enumerate() {
        requirement.validate().map_err(|err| match err {
            IpamError::Validation(msg) => IpamError::Validation(format!("requirement {index}: {msg}")),
            other => other,
        })?;
    }
    Ok(())
}

pub(crate) fn priority_first_order(requirements: &[SubnetRequirement]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..requirements.len()).collect();
    order.sort_by(|&a, &b| {
        let (ra, rb) = (&requirements[a], &requirements[b]);
        rb.priority
            .cmp(&ra.priority)
            .then(rb.block_size().cmp(&ra.block_size()))
    });
    order
}

/// Core planning pass over requirements visited in `order`
pub(crate) fn plan_in_order(
    parent: Ipv4Network,
    requirements: &[SubnetRequirement],
    order: &[usize],
) -> SubnetPlan {
    let mut free = vec![Block {
        start: u32::from(parent.network()),
        prefix: parent.prefix(),
    }];
    let mut allocated = Vec::new();
    let mut failures = Vec::new();

    for &index in order {
        let requirement = &requirements[index];
        let target = requirement.target_prefix();

        if target < parent.prefix() {
            failures.push(failure(
                index,
                requirement,
                target,
                format!("needs a /{target}, larger than the parent /{}", parent.prefix()),
            ));
            continue;
        }

        let Some(block) = take_best_fit(&mut free, target) else {
            failures.push(failure(
                index,
                requirement,
                target,
                format!("no free /{target} block remains"),
            ));
            continue;
        };

        let cidr = to_network(block);
        allocated.push(PlannedSubnet {
            purpose: requirement.purpose,
            name: requirement.name.clone(),
            cidr,
            prefix_len: target,
            usable_hosts: usable_hosts(target),
            requested_hosts: requirement.min_hosts,
            priority: requirement.priority,
            requirement_index: index,
            gateway: Ipv4Addr::from(block.start + 1),
        });
    }

    let used: u64 = allocated.iter().map(|s: &PlannedSubnet| block_size(s.prefix_len)).sum();
    let utilization_percent = used as f64 / block_size(parent.prefix()) as f64 * 100.0;

    tracing::debug!(
        parent = %parent,
        allocated = allocated.len(),
        failures = failures.len(),
        utilization_percent,
        "subnet plan computed"
    );

    SubnetPlan {
        parent,
        allocated,
        remaining_space: coalesce(&free),
        utilization_percent,
        failures,
    }
}

fn failure(index: usize, requirement: &SubnetRequirement, target: u8, reason: String) -> PlanFailure {
    PlanFailure {
        requirement_index: index,
        purpose: requirement.purpose,
        min_hosts: requirement.min_hosts,
        target_prefix: target,
        reason,
    }
}

/// Remove the smallest free block able to hold a /`target` and split it down
fn take_best_fit(free: &mut Vec<Block>, target: u8) -> Option<Block> {
    let (position, _) = free
        .iter()
        .enumerate()
        .filter(|(_, b)| b.prefix <= target)
        .max_by(|(_, a), (_, b)| a.prefix.cmp(&b.prefix).then(b.start.cmp(&a.start)))?;

    let mut block = free.swap_remove(position);
    while block.prefix < target {
        block.prefix += 1;
        let sibling = Block {
            start: block.start + block.size() as u32,
            prefix: block.prefix,
        };
        free.push(sibling);
    }
    Some(block)
}

/// Merge free blocks into the fewest aligned CIDRs
fn coalesce(free: &[Block]) -> Vec<Ipv4Network> {
    let mut ranges: Vec<(u64, u64)> = free
        .iter()
        .map(|b| (b.start as u64, b.start as u64 + b.size()))
        .collect();
    ranges.sort_unstable();

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if last.1 == start => last.1 = end,
            _ => merged.push((start, end)),
        }
    }

    let mut networks = Vec::new();
    for (mut start, end) in merged {
        while start < end {
            // Largest aligned block starting at `start` that fits before `end`
            let align = if start == 0 { 1u64 << 32 } else { 1u64 << start.trailing_zeros() };
            let mut size = align;
            while size > end - start {
                size >>= 1;
            }
            let prefix = 32 - size.trailing_zeros() as u8;
            networks.push(to_network(Block {
                start: start as u32,
                prefix,
            }));
            start += size;
        }
    }
    networks
}

fn to_network(block: Block) -> Ipv4Network {
    // Blocks are aligned to their own size, so this never fails
    Ipv4Network::new(Ipv4Addr::from(block.start), block.prefix)
        .unwrap_or_else(|_| unreachable!("prefix {} is within 0-32", block.prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(purpose: NetworkKind, hosts: u32) -> SubnetRequirement {
        SubnetRequirement::new(purpose, hosts)
    }

    fn assert_disjoint_and_contained(plan: &SubnetPlan) {
        for (i, a) in plan.allocated.iter().enumerate() {
            assert!(plan.parent.contains(a.cidr.network()));
            assert!(plan.parent.contains(a.cidr.broadcast()));
            for b in &plan.allocated[i + 1..] {
                assert!(
                    !cidr::overlaps(&IpNetwork::V4(a.cidr), &IpNetwork::V4(b.cidr)),
                    "{} overlaps {}",
                    a.cidr,
                    b.cidr
                );
            }
        }
        assert_eq!(
            plan.allocated_addresses() + plan.remaining_addresses(),
            block_size(plan.parent.prefix())
        );
    }

    #[test]
    fn test_customer_and_infra_in_slash16() {
        let plan = plan(
            "10.0.0.0/16",
            &[req(NetworkKind::Customer, 1000), req(NetworkKind::Infrastructure, 50)],
        )
        .unwrap();

        assert!(plan.is_complete());
        let customer = &plan.allocated[0];
        let infra = &plan.allocated[1];
        assert_eq!(customer.cidr.to_string(), "10.0.0.0/22");
        assert!(customer.prefix_len <= 22);
        assert_eq!(infra.cidr.to_string(), "10.0.4.0/26");
        assert!(infra.prefix_len <= 26);
        assert_eq!(customer.gateway, Ipv4Addr::new(10, 0, 0, 1));
        assert_disjoint_and_contained(&plan);
    }

    #[test]
    fn test_remaining_space_is_coalesced() {
        let plan = plan("192.168.0.0/24", &[req(NetworkKind::PointToPoint, 2)]).unwrap();
        let remaining: Vec<String> = plan.remaining_space.iter().map(|n| n.to_string()).collect();
        assert_eq!(
            remaining,
            [
                "192.168.0.4/30",
                "192.168.0.8/29",
                "192.168.0.16/28",
                "192.168.0.32/27",
                "192.168.0.64/26",
                "192.168.0.128/25"
            ]
        );
        assert!((plan.utilization_percent - 4.0 / 256.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_priority_orders_the_plan() {
        let plan = plan(
            "10.1.0.0/23",
            &[
                req(NetworkKind::Customer, 200),
                req(NetworkKind::Customer, 200).with_priority(5),
                req(NetworkKind::Customer, 200),
            ],
        )
        .unwrap();

        assert_eq!(plan.allocated.len(), 2);
        assert_eq!(plan.allocated[0].requirement_index, 1);
        assert_eq!(plan.failures.len(), 1);
        assert_eq!(plan.failures[0].requirement_index, 2);
        assert_eq!(plan.failures[0].target_prefix, 24);
        assert_eq!(plan.utilization_percent, 100.0);
    }

    #[test]
    fn test_best_fit_reuses_split_halves() {
        // The first /26 leaves a /26 and a /25 free; the /25 demand takes the
        // /25 half and the last /26 lands in the leftover /26
        let plan = plan(
            "10.2.0.0/24",
            &[
                req(NetworkKind::Infrastructure, 50).with_priority(2),
                req(NetworkKind::Customer, 100).with_preferred_prefix(25).with_priority(1),
                req(NetworkKind::Infrastructure, 50),
            ],
        )
        .unwrap();

        assert!(plan.is_complete());
        let cidrs: Vec<String> = plan.allocated.iter().map(|s| s.cidr.to_string()).collect();
        assert_eq!(cidrs, ["10.2.0.0/26", "10.2.0.128/25", "10.2.0.64/26"]);
        assert!(plan.remaining_space.is_empty());
    }

    #[test]
    fn test_oversized_requirement_fails_with_reason() {
        let plan = plan("10.3.0.0/24", &[req(NetworkKind::Customer, 1000)]).unwrap();
        assert!(plan.allocated.is_empty());
        assert_eq!(plan.failures[0].target_prefix, 22);
        assert!(plan.failures[0].reason.contains("larger than the parent"));
        assert_eq!(plan.remaining_space, vec![plan.parent]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            plan("10.0.0.1/16", &[]),
            Err(IpamError::InvalidCidr(_))
        ));
        assert!(matches!(
            plan("2001:db8::/48", &[]),
            Err(IpamError::InvalidCidr(_))
        ));
        assert!(matches!(
            plan("10.0.0.0/16", &[req(NetworkKind::Customer, 0)]),
            Err(IpamError::Validation(msg)) if msg.starts_with("requirement 0")
        ));
    }

    #[test]
    fn test_empty_requirements() {
        let plan = plan("0.0.0.0/0", &[]).unwrap();
        assert!(plan.is_complete());
        assert_eq!(plan.utilization_percent, 0.0);
        assert_eq!(plan.remaining_space.len(), 1);
        assert_eq!(plan.remaining_space[0].prefix(), 0);
    }
}
