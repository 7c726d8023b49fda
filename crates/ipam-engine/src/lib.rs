//! OpenSASE IPAM Engine
//!
//! Tenant-facing address operations on top of an [`AddressStore`]:
//!
//! - [`NetworkService`]: create, deprecate, purge and measure networks
//! - [`AllocationEngine`]: bind addresses to consumers under a lease
//! - [`ReservationEngine`]: priority-ordered, time-boxed holds
//! - [`MaintenanceScheduler`]: expiry sweeps, utilization reports, audits
//!
//! ```text
//!            ┌──────────────┐  ┌──────────────────┐  ┌───────────────────┐
//! request ──►│NetworkService│  │ AllocationEngine │  │ ReservationEngine │
//!            └──────┬───────┘  └────────┬─────────┘  └─────────┬─────────┘
//!                   │                   │                      │
//!                   ▼                   ▼                      ▼
//!            ┌──────────────────────────────────────────────────────────┐
//!            │          AddressStore (uniqueness + expiry index)        │
//!            └──────────────────────────────────────────────────────────┘
//!                                       ▲
//!                          MaintenanceScheduler (interval)
//! ```
//!
//! All services share one store and one [`Clock`](ipam_common::Clock), so
//! tests drive lease expiry with a `ManualClock`.
//!
//! [`AddressStore`]: ipam_store::AddressStore

pub mod allocation;
pub mod availability;
pub mod config;
pub mod maintenance;
pub mod network;
pub mod reservation;

pub use allocation::{AllocateRequest, AllocationEngine};
pub use availability::{Availability, AvailabilityReason};
pub use config::{EngineConfig, MaintenanceConfig};
pub use maintenance::{
    AuditFinding, AuditReport, CleanupOptions, CleanupReport, FindingKind, MaintenanceScheduler,
    Severity,
};
pub use network::{NetworkService, NetworkUtilization, NewNetwork};
pub use reservation::{ReservationEngine, ReserveRequest};
