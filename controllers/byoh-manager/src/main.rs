//! BYOH Controller Manager
//!
//! Cluster API infrastructure provider for bring-your-own hosts:
//! - ByoMachine: claims a registered ByoHost and wires it into the workload cluster
//! - K8sInstallerConfig: renders the Kubernetes install/uninstall scripts for a host
//! - ByoCluster: cluster-level readiness and finalizer
//! - CertificateSigningRequest: approves host agent CSRs

mod backoff;
mod config;
mod controller;
mod error;
mod installer;
mod leader_election;
mod metrics;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use controller::Controller;
use crate::config::ManagerConfig;
use crate::error::ControllerError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting BYOH Controller Manager");

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    let config = ManagerConfig::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
