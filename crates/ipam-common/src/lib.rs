//! OpenSASE IPAM Common - Shared types for the address management engine
//!
//! This crate provides the primitives every IPAM component agrees on:
//! - Tenant and record identifiers
//! - Error kinds surfaced to SDK callers
//! - CIDR arithmetic (usable ranges, overlap, first-free scan)
//! - Wall clock abstraction
//! - Typed record metadata
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         ipam-sdk                              │
//! │   TenantContext ─► RateLimiter ─► Allocation/Reservation      │
//! └───────────┬───────────────────┬───────────────────┬───────────┘
//!             │                   │                   │
//!     ┌───────▼──────┐    ┌───────▼──────┐    ┌───────▼──────┐
//!     │ ipam-engine  │    │ipam-ratelimit│    │ ipam-planner │
//!     └───────┬──────┘    └──────────────┘    └──────────────┘
//!             │
//!     ┌───────▼──────┐
//!     │  ipam-store  │
//!     └──────────────┘
//!          (all of the above depend on ipam-common)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cidr;
pub mod clock;
pub mod error;
pub mod ids;
pub mod kind;
pub mod metadata;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::*;
pub use ids::*;
pub use kind::NetworkKind;
pub use metadata::Metadata;
