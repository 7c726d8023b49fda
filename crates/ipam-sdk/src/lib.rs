//! OpenSASE IPAM SDK
//!
//! Composition root for the address management engine. Builds the store,
//! engines, limiter and scheduler from one [`IpamConfig`] and hands out
//! tenant-scoped [`TenantContext`] handles.
//!
//! ```
//! use ipam_common::NetworkKind;
//! use ipam_engine::{AllocateRequest, NewNetwork};
//! use ipam_sdk::{Ipam, IpamConfig};
//!
//! # tokio_test::block_on(async {
//! let ipam = Ipam::in_memory(IpamConfig::default()).unwrap();
//! let acme = ipam.tenant("acme").unwrap();
//!
//! let network = acme
//!     .create_network(NewNetwork::new("10.0.0.0/24", NetworkKind::Customer))
//!     .await
//!     .unwrap();
//! let allocation = acme.allocate_ip(AllocateRequest::dynamic(network.id)).await.unwrap();
//! assert_eq!(allocation.ip.to_string(), "10.0.0.1");
//! # });
//! ```

pub mod client;
pub mod config;
pub mod telemetry;

pub use client::{Ipam, IpamBuilder, TenantContext};
pub use config::{Capabilities, IpamConfig, LogConfig, CONFIG_ENV};
pub use telemetry::init_tracing;
