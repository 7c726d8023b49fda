//! Background maintenance daemon
//!
//! Loads the configuration named by `IPAM_CONFIG`, then sweeps expired
//! leases and reservations on the configured interval until Ctrl-C.

use anyhow::Context;
use ipam_sdk::{init_tracing, Ipam, IpamConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = IpamConfig::from_env().context("loading configuration")?;
    init_tracing(&config.log).context("initialising logging")?;

    tracing::info!("OpenSASE IPAM maintenance v{}", env!("CARGO_PKG_VERSION"));

    // The daemon exists to run the loop
    config.capabilities.background_maintenance = true;
    let ipam = Ipam::builder(config).build().context("building IPAM")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = ipam
        .spawn_maintenance(shutdown_rx)
        .context("maintenance loop did not start")?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");

    shutdown_tx.send(true).ok();
    handle.await.context("maintenance task panicked")?;
    Ok(())
}
