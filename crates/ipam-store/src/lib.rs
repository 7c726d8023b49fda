//! Address-Space Store
//!
//! Persistent records for networks, allocations and reservations, all
//! tenant-scoped. The store is the single place where the central invariant
//! is enforced: for a given tenant, at most one active binding (allocation or
//! reservation) per address.
//!
//! ```text
//! ┌──────────────────────────── AddressStore ────────────────────────────┐
//! │                                                                       │
//! │   networks ──┬── allocations ── active index (tenant, ip) ── expiry   │
//! │              └── reservations ─ active index (tenant, ip) ── expiry   │
//! │                                                                       │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod models;
pub mod store;

pub use error::{EntityRef, StoreError, StoreResult};
pub use memory::{lease_expiry, InMemoryStore};
pub use models::*;
pub use store::AddressStore;
