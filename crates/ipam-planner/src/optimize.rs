//! Multi-strategy planning
//!
//! The same requirements are planned under several visiting orders and each
//! plan is scored:
//!
//! ```text
//! score = 0.4 * satisfied / total
//!       + 0.3 * min(utilization * 1.2, 1)
//!       + 0.3 * sum(priority weight of satisfied) / sum(priority weight)
//! ```
//!
//! Priority weight is `priority + 1`, floored at 1 so negative priorities
//! still count.

use ipam_common::{IpamError, IpamResult};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::{parse_parent, plan_in_order, priority_first_order, validate_all, SubnetPlan};
use crate::requirement::SubnetRequirement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Priority descending, then size descending
    PriorityFirst,
    /// Size descending, then priority descending
    SizeFirst,
    /// Priority and size weighed together
    Balanced,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::PriorityFirst, Strategy::SizeFirst, Strategy::Balanced];

    fn order(&self, requirements: &[SubnetRequirement]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..requirements.len()).collect();
        match self {
            Self::PriorityFirst => return priority_first_order(requirements),
            Self::SizeFirst => order.sort_by(|&a, &b| {
                let (ra, rb) = (&requirements[a], &requirements[b]);
                rb.block_size()
                    .cmp(&ra.block_size())
                    .then(rb.priority.cmp(&ra.priority))
            }),
            Self::Balanced => order.sort_by(|&a, &b| {
                balanced_key(&requirements[b]).total_cmp(&balanced_key(&requirements[a]))
            }),
        }
        order
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PriorityFirst => "priority_first",
            Self::SizeFirst => "size_first",
            Self::Balanced => "balanced",
        };
        f.write_str(name)
    }
}

/// Priority plus half the block's host bits
fn balanced_key(requirement: &SubnetRequirement) -> f64 {
    let host_bits = 32 - requirement.target_prefix() as u32;
    requirement.priority as f64 + host_bits as f64 / 2.0
}

fn weight(requirement: &SubnetRequirement) -> f64 {
    (requirement.priority as f64 + 1.0).max(1.0)
}

/// Score of one candidate plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyScore {
    pub strategy: Strategy,
    pub score: f64,
    pub satisfied: usize,
    pub failed: usize,
    pub utilization_percent: f64,
}

/// Best plan among all strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedPlan {
    pub strategy: Strategy,
    pub score: f64,
    pub plan: SubnetPlan,
    /// Every strategy tried, in evaluation order
    pub candidates: Vec<StrategyScore>,
}

/// Score a plan against the requirements it was built from
pub fn score(plan: &SubnetPlan, requirements: &[SubnetRequirement]) -> f64 {
    if requirements.is_empty() {
        return 1.0;
    }

    let satisfaction = plan.allocated.len() as f64 / requirements.len() as f64;
    let utilization = (plan.utilization_percent / 100.0 * 1.2).min(1.0);

    let total_weight: f64 = requirements.iter().map(weight).sum();
    let satisfied_weight: f64 = plan
        .allocated
        .iter()
        .map(|s| weight(&requirements[s.requirement_index]))
        .sum();

    0.4 * satisfaction + 0.3 * utilization + 0.3 * (satisfied_weight / total_weight)
}

/// Plan under every strategy and keep the best score; earlier strategies win ties
pub fn optimize(parent: &str, requirements: &[SubnetRequirement]) -> IpamResult<OptimizedPlan> {
    let parent = parse_parent(parent)?;
    validate_all(requirements)?;

    let mut best: Option<(Strategy, f64, SubnetPlan)> = None;
    let mut candidates = Vec::with_capacity(Strategy::ALL.len());

    for strategy in Strategy::ALL {
        let plan = plan_in_order(parent, requirements, &strategy.order(requirements));
        let plan_score = score(&plan, requirements);
        candidates.push(StrategyScore {
            strategy,
            score: plan_score,
            satisfied: plan.allocated.len(),
            failed: plan.failures.len(),
            utilization_percent: plan.utilization_percent,
        });

        if best.as_ref().map_or(true, |(_, s, _)| plan_score > *s) {
            best = Some((strategy, plan_score, plan));
        }
    }

    let Some((strategy, score, plan)) = best else {
        return Err(IpamError::Validation("no planning strategy available".into()));
    };
    tracing::debug!(%strategy, score, "subnet plan optimized");

    Ok(OptimizedPlan {
        strategy,
        score,
        plan,
        candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_common::NetworkKind;

    #[test]
    fn test_perfect_plan_scores_one() {
        let reqs = [
            SubnetRequirement::new(NetworkKind::Customer, 200),
            SubnetRequirement::new(NetworkKind::Customer, 200),
        ];
        let result = optimize("10.0.0.0/23", &reqs).unwrap();
        assert!((result.score - 1.0).abs() < 1e-9);
        assert_eq!(result.strategy, Strategy::PriorityFirst);
        assert_eq!(result.candidates.len(), 3);
    }

    #[test]
    fn test_over_subscribed_parent_prefers_priority() {
        // 320 addresses requested from 256: some strategy must drop a block
        let reqs = [
            SubnetRequirement::new(NetworkKind::Infrastructure, 100),
            SubnetRequirement::new(NetworkKind::Infrastructure, 100),
            SubnetRequirement::new(NetworkKind::Infrastructure, 50).with_priority(3),
        ];
        let result = optimize("10.9.0.0/24", &reqs).unwrap();

        let by = |s: Strategy| result.candidates.iter().find(|c| c.strategy == s).unwrap().clone();
        assert_eq!(by(Strategy::PriorityFirst).failed, 1);
        assert_eq!(by(Strategy::SizeFirst).failed, 1);
        assert!(by(Strategy::SizeFirst).score < by(Strategy::PriorityFirst).score);

        // Keeping the priority-3 block outweighs filling the parent
        assert_eq!(result.strategy, Strategy::PriorityFirst);
        assert!(result.plan.allocated.iter().any(|s| s.requirement_index == 2));
        assert!(result.candidates.iter().all(|c| c.score <= result.score));
    }

    #[test]
    fn test_score_weights_priorities() {
        let reqs = [
            SubnetRequirement::new(NetworkKind::Customer, 200).with_priority(9),
            SubnetRequirement::new(NetworkKind::Customer, 200),
        ];
        let plan = crate::plan::plan("10.0.0.0/24", &reqs).unwrap();
        assert_eq!(plan.allocated[0].requirement_index, 0);

        // satisfaction 0.5, utilization capped at 1, weight 10 / 11
        let expected = 0.4 * 0.5 + 0.3 * 1.0 + 0.3 * (10.0 / 11.0);
        assert!((score(&plan, &reqs) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_balanced_key() {
        let big = SubnetRequirement::new(NetworkKind::Customer, 1000);
        let urgent = SubnetRequirement::new(NetworkKind::PointToPoint, 2).with_priority(4);
        assert_eq!(balanced_key(&big), 5.0);
        assert_eq!(balanced_key(&urgent), 5.0);
        assert_eq!(Strategy::Balanced.to_string(), "balanced");
    }
}
