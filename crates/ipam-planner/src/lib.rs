//! OpenSASE IPAM Subnet Planner
//!
//! Pure functions over a snapshot of free space; nothing here touches the
//! store.
//!
//! - [`plan`]: partition an IPv4 parent block for a list of sized demands
//! - [`optimize`]: plan under every [`Strategy`] and keep the best score
//! - [`detect_conflicts`]: pairwise overlap report for proposed blocks
//!
//! # Example
//!
//! ```
//! use ipam_common::NetworkKind;
//! use ipam_planner::{plan, SubnetRequirement};
//!
//! let result = plan(
//!     "10.0.0.0/16",
//!     &[
//!         SubnetRequirement::new(NetworkKind::Customer, 1000),
//!         SubnetRequirement::new(NetworkKind::Infrastructure, 50),
//!     ],
//! )
//! .unwrap();
//! assert!(result.is_complete());
//! assert_eq!(result.allocated[0].prefix_len, 22);
//! ```

pub mod conflict;
pub mod optimize;
pub mod plan;
pub mod requirement;

pub use conflict::{detect_conflicts, Conflict, ConflictKind, ConflictReport, ConflictSeverity};
pub use optimize::{optimize, score, OptimizedPlan, Strategy, StrategyScore};
pub use plan::{plan, PlanFailure, PlannedSubnet, SubnetPlan};
pub use requirement::{prefix_for_hosts, usable_hosts, SubnetRequirement, MAX_PREFIX, MIN_PREFIX};
